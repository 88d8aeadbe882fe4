use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use fleetlink_frame::Fault;
use serde_json::Value;

/// A named handler served over a connection.
///
/// Implementations dispatch on `command` and fail with
/// [`unknown_command`] for names they do not handle.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn call(&self, command: &str, arg: Value) -> Result<Value, Fault>;
}

/// Fault returned for a command a channel does not handle.
pub fn unknown_command(command: &str) -> Fault {
    Fault::message(format!("unknown command: {command}"))
}

/// Fault returned when a request names an unregistered channel.
pub fn unknown_channel(channel: &str) -> Fault {
    Fault::message(format!("unknown channel: {channel}"))
}

/// Channels by name, shared between every connection of a server.
///
/// Channels registered after a connection was accepted are visible to it
/// from the next request on.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<HashMap<String, Arc<dyn Channel>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, channel: Arc<dyn Channel>) {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels.insert(name.into(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered channel names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl Channel for Echo {
        async fn call(&self, command: &str, arg: Value) -> Result<Value, Fault> {
            match command {
                "echo" => Ok(arg),
                other => Err(unknown_command(other)),
            }
        }
    }

    #[tokio::test]
    async fn registry_lookup_and_replace() {
        let registry = ChannelRegistry::new();
        assert!(registry.get("echo").is_none());

        registry.register("echo", Arc::new(Echo));
        let channel = registry.get("echo").expect("channel should be registered");
        assert_eq!(
            channel.call("echo", json!([1])).await.expect("echo should succeed"),
            json!([1])
        );

        let err = channel.call("shout", Value::Null).await.unwrap_err();
        assert_eq!(err.error_message(), Some("unknown command: shout"));

        registry.register("other", Arc::new(Echo));
        assert_eq!(registry.names(), vec!["echo".to_string(), "other".to_string()]);
    }
}
