use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Environment variable the host uses to pass its log settings to the worker.
pub const WORKER_LOG_LEVEL_ENV: &str = "FLEETLINK_LOG_LEVEL";
pub const WORKER_LOG_FORMAT_ENV: &str = "FLEETLINK_LOG_FORMAT";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Argument spelling of a clap value, e.g. for forwarding through the environment.
pub fn value_name<T: ValueEnum>(value: &T) -> String {
    value
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_default()
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_names_round_trip_through_clap() {
        assert_eq!(value_name(&LogLevel::Debug), "debug");
        assert_eq!(value_name(&LogFormat::Json), "json");
        assert_eq!(
            LogLevel::from_str("warn", true).expect("level should parse"),
            LogLevel::Warn
        );
    }
}
