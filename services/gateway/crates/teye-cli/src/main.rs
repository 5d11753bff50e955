//! Terminal Eye operator CLI.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use teye_common::{CommandRequest, EventStatus, GatewayConfig, OutboundEvent};

/// Terminal Eye operator CLI.
///
/// Validates gateway configuration documents and runs catalog commands
/// against a live gateway.
#[derive(Parser, Debug)]
#[command(name = "teye", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a configuration document and list the commands it declares
    Check {
        /// Path to the JSON configuration document
        #[arg(long, env = "TEYE_CONFIG")]
        config: PathBuf,
    },
    /// Run one catalog command on a gateway and stream its output
    Run {
        /// Gateway URL (ws:// or wss://)
        #[arg(long, env = "TEYE_URL", default_value = "ws://127.0.0.1:1234/")]
        url: String,
        /// Catalog command name
        command: String,
        /// String argument, as name=value (repeatable)
        #[arg(long = "arg", value_name = "NAME=VALUE")]
        args: Vec<String>,
        /// Typed argument, as name=<json number|boolean|string> (repeatable)
        #[arg(long = "json-arg", value_name = "NAME=JSON")]
        json_args: Vec<String>,
    },
}

/// Split `name=value` at the first `=`.
fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => bail!("invalid argument '{pair}': expected name=value"),
    }
}

/// Build the request `args` map from `--arg` and `--json-arg` values.
fn build_args(args: &[String], json_args: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in args {
        let (name, value) = split_pair(pair)?;
        map.insert(name.to_string(), Value::String(value.to_string()));
    }
    for pair in json_args {
        let (name, raw) = split_pair(pair)?;
        let value: Value = serde_json::from_str(raw)
            .with_context(|| format!("invalid JSON value for '{name}': {raw}"))?;
        if !(value.is_string() || value.is_number() || value.is_boolean()) {
            bail!("invalid JSON value for '{name}': expected a string, number or boolean");
        }
        map.insert(name.to_string(), value);
    }
    Ok(map)
}

/// What a received event means for a `run` in progress.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// Output or announcement; keep reading.
    Continue,
    /// Terminal event; the command is over.
    Done { success: bool },
}

/// Tracks one command's lifecycle on the wire.
///
/// `stderr` lines and the terminal failure share the `error` status, so the
/// terminal event is recognised by its `Error executing "<name>"` prefix
/// once the command has been announced. Before the announcement any error
/// is terminal.
struct RunTracker {
    announcement: String,
    terminal_prefix: String,
    announced: bool,
}

impl RunTracker {
    fn new(command: &str) -> Self {
        Self {
            announcement: format!("Executing: {command}"),
            terminal_prefix: format!("Error executing \"{command}\""),
            announced: false,
        }
    }

    fn observe(&mut self, event: &OutboundEvent) -> Step {
        match event.status {
            EventStatus::Success => Step::Done { success: true },
            EventStatus::Running => {
                if event.msg == self.announcement {
                    self.announced = true;
                }
                Step::Continue
            }
            EventStatus::Error if !self.announced => Step::Done { success: false },
            EventStatus::Error if event.msg.starts_with(&self.terminal_prefix) => {
                Step::Done { success: false }
            }
            EventStatus::Error => Step::Continue,
        }
    }
}

fn check(config: &Path) -> Result<()> {
    let text = std::fs::read_to_string(config)
        .with_context(|| format!("failed to read {}", config.display()))?;
    let GatewayConfig { settings, catalog } = GatewayConfig::from_json(&text)
        .with_context(|| format!("failed to parse {}", config.display()))?;

    println!(
        "{}: {} command(s), port {}{}",
        config.display(),
        catalog.len(),
        settings.port(),
        if settings.ssl { ", TLS" } else { "" },
    );
    let mut defects = 0;
    for (name, spec) in catalog.iter() {
        let args: Vec<String> = spec
            .args
            .iter()
            .map(|arg| {
                let mut label = if arg.name.is_empty() { "?".to_string() } else { arg.name.clone() };
                if let Some(t) = arg.arg_type {
                    label.push_str(&format!(":{t}"));
                }
                if arg.required {
                    label.push('*');
                }
                label
            })
            .collect();
        println!("  {name} -> {} [{}]", spec.script, args.join(", "));
        for index in spec.unnamed_args() {
            eprintln!("  warning: {name}: argument [{index}] has no name");
            defects += 1;
        }
    }
    if defects > 0 {
        bail!("{defects} argument(s) without a name");
    }
    Ok(())
}

async fn run(url: &str, command: &str, args: Map<String, Value>) -> Result<bool> {
    if url.starts_with("wss://") {
        // Both ring and aws-lc may be compiled in; pick one explicitly.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid gateway URL {url}"))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("echo-protocol"),
    );

    let (mut socket, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    let payload = serde_json::to_string(&CommandRequest {
        command: Some(command.to_string()),
        args: Some(args),
    })
    .context("failed to encode request")?;
    socket
        .send(Message::text(payload))
        .await
        .context("failed to send request")?;

    let mut tracker = RunTracker::new(command);
    while let Some(frame) = socket.next().await {
        let frame = frame.context("connection error")?;
        let Message::Text(text) = frame else {
            continue;
        };
        let event: OutboundEvent = serde_json::from_str(text.as_str())
            .with_context(|| format!("unexpected frame from gateway: {}", text.as_str()))?;

        match event.status {
            EventStatus::Running => println!("{}", event.msg),
            EventStatus::Error => eprintln!("{}", event.msg),
            EventStatus::Success => {}
        }

        if let Step::Done { success } = tracker.observe(&event) {
            let _ = socket.close(None).await;
            return Ok(success);
        }
    }
    bail!("connection closed before the command finished")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { ref config } => {
            check(config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            ref url,
            ref command,
            ref args,
            ref json_args,
        } => {
            let args = build_args(args, json_args)?;
            if run(url, command, args).await? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
