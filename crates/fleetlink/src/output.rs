use std::io::{IsTerminal, Write};
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fleetlink_host::{OperationDescription, RepositoryKind};
use serde::Serialize;
use serde_json::json;

use crate::config::{Config, Remote};
use crate::extension_worker::OperationOutput;
use crate::store::{Data, Language};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn kind_name(kind: RepositoryKind) -> &'static str {
    match kind {
        RepositoryKind::Git => "git",
        RepositoryKind::Svn => "svn",
    }
}

fn language_name(language: Language) -> &'static str {
    match language {
        Language::Java => "java",
        Language::JavaScript => "javascript",
    }
}

pub fn print_data(data: &Data, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(data),
        OutputFormat::Table => {
            let mut repos = table(vec!["TYPE", "URL"]);
            for repo in &data.repos {
                repos.add_row(vec![kind_name(repo.kind), repo.url.as_str()]);
            }
            println!("{repos}");

            let mut projects = table(vec!["PROJECT", "LANGUAGE", "PATH", "REPOSITORY"]);
            for project in &data.projects {
                projects.add_row(vec![
                    project.name.as_str(),
                    language_name(project.language),
                    project.path.as_str(),
                    project.repository.url.as_str(),
                ]);
            }
            println!("{projects}");
        }
        OutputFormat::Pretty => {
            for repo in &data.repos {
                println!("repo {} {}", kind_name(repo.kind), repo.url);
            }
            for project in &data.projects {
                println!(
                    "project {} ({}) at {} from {}",
                    project.name,
                    language_name(project.language),
                    project.path,
                    project.repository.url
                );
            }
        }
    }
}

pub fn print_remotes(remotes: &[Remote], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&remotes),
        OutputFormat::Table => {
            let mut out = table(vec!["NAME", "URL"]);
            for remote in remotes {
                out.add_row(vec![remote.name.as_str(), remote.url.as_str()]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            for remote in remotes {
                println!("{}\t{}", remote.name, remote.url);
            }
        }
    }
}

pub fn print_config(config: &Config, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Table | OutputFormat::Pretty => {
            let root = config
                .root_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("root path: {root}");
            print_remotes(&config.remotes, format);
        }
    }
}

pub fn print_operations(operations: &[OperationDescription], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&operations),
        OutputFormat::Table => {
            let mut out = table(vec!["OPERATION", "ARGS", "DESCRIPTION"]);
            for op in operations {
                out.add_row(vec![
                    op.name.clone(),
                    op.args.join(" "),
                    op.description.clone().unwrap_or_default(),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            for op in operations {
                let args: Vec<String> = op.args.iter().map(|a| format!("<{a}>")).collect();
                println!("{} {}", op.name, args.join(" "));
            }
        }
    }
}

pub fn print_operation_output(name: &str, output: &OperationOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&json!({
            "operation": name,
            "status": output.status,
            "stdout": output.stdout,
            "stderr": output.stderr,
        })),
        OutputFormat::Table | OutputFormat::Pretty => {
            print!("{}", output.stdout);
            let _ = std::io::stdout().flush();
            eprint!("{}", output.stderr);
        }
    }
}

pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&json!({"event": "listening", "address": addr})),
        OutputFormat::Table | OutputFormat::Pretty => println!("listening on {addr}"),
    }
}

pub fn print_sync_result(action: &str, remote: &str, data: &Data, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&json!({
            "action": action,
            "remote": remote,
            "repos": data.repos.len(),
            "projects": data.projects.len(),
        })),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "{action} {remote}: {} repos, {} projects",
            data.repos.len(),
            data.projects.len()
        ),
    }
}
