#![forbid(unsafe_code)]

//! `pilot-deck-ctl` — local CLI companion for `pilot-deck`.
//!
//! Connects to the IPC socket and sends JSON commands to the server.
//! Designed for operator overrides from the machine running the server.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

/// Environment variable consulted when `--auth-token` is omitted.
const IPC_TOKEN_ENV: &str = "PILOT_DECK_IPC_TOKEN";

#[derive(Debug, Parser)]
#[command(
    name = "pilot-deck-ctl",
    about = "Local CLI for the pilot-deck server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match server's `ipc_name` config).
    #[arg(long, default_value = "pilot-deck")]
    ipc_name: String,

    /// Shared secret expected by the server; defaults to `$PILOT_DECK_IPC_TOKEN`.
    #[arg(long)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered sessions.
    List,

    /// Pause a session at its next suspension point.
    Pause {
        /// Session ID.
        id: String,
    },

    /// Resume a paused session.
    Resume {
        /// Session ID.
        id: String,
    },

    /// Stop a session at its next suspension point.
    Stop {
        /// Session ID.
        id: String,
    },

    /// Queue a hint for the session's next decision.
    Nudge {
        /// Session ID.
        id: String,
        /// Hint text.
        text: String,
    },
}

fn main() {
    let args = Cli::parse();

    let mut request_json = match &args.command {
        Command::List => serde_json::json!({ "command": "list" }),
        Command::Pause { id } => serde_json::json!({ "command": "pause", "id": id }),
        Command::Resume { id } => serde_json::json!({ "command": "resume", "id": id }),
        Command::Stop { id } => serde_json::json!({ "command": "stop", "id": id }),
        Command::Nudge { id, text } => {
            serde_json::json!({ "command": "nudge", "id": id, "text": text })
        }
    };

    let token = args
        .auth_token
        .clone()
        .or_else(|| std::env::var(IPC_TOKEN_ENV).ok())
        .filter(|token| !token.is_empty());
    if let Some(token) = token {
        request_json["auth_token"] = serde_json::Value::String(token);
    }

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to server: {err}");
            eprintln!("Is pilot-deck running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
