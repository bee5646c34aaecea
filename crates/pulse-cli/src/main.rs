//! # pulse
//!
//! Command-line client: loads settings, connects one session over WebSocket
//! and logs every routed event until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time;
use tracing::{info, warn};

use pulse_core::frames::GLOBAL_TOPIC;
use pulse_core::logging::init_subscriber;
use pulse_core::{EventPayload, HandlerError, SessionStatus};
use pulse_session::{Session, SessionConfig, WsTransportFactory};
use pulse_settings::{PulseSettings, load_settings_from_path, settings_path};

/// Pulse real-time session client.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Pulse real-time session client")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, authenticate and log routed events until Ctrl-C.
    Listen {
        /// User id sent in the authentication handshake.
        #[arg(long)]
        user_id: String,

        /// Server origin (overrides settings).
        #[arg(long)]
        origin: Option<String>,

        /// Topic to subscribe to; repeatable. `*` sees every event.
        #[arg(long = "topic", default_value = "*")]
        topics: Vec<String>,
    },
    /// Print the effective settings as JSON.
    Config,
}

fn load(path: Option<&Path>) -> Result<PulseSettings> {
    let path = path.map_or_else(settings_path, Path::to_path_buf);
    load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(cli.settings.as_deref())?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Command::Config => {
            let json = serde_json::to_string_pretty(&settings)
                .context("Failed to serialize settings")?;
            println!("{json}");
            Ok(())
        }
        Command::Listen {
            user_id,
            origin,
            topics,
        } => {
            if let Some(origin) = origin {
                settings.endpoint.origin = origin;
            }
            listen(&settings, &user_id, &topics).await
        }
    }
}

async fn listen(settings: &PulseSettings, user_id: &str, topics: &[String]) -> Result<()> {
    let config = SessionConfig::from_settings(settings).context("Invalid session settings")?;
    info!(url = %config.url, topics = ?topics, "connecting");
    let session = Session::builder(config, Arc::new(WsTransportFactory::new())).build();

    let _subscriptions: Vec<_> = topics
        .iter()
        .map(|topic| session.subscribe(topic.clone(), log_event))
        .collect();

    let mut status = session.watch_status();
    session.start(user_id).context("Failed to start session")?;

    let outcome = loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("interrupted, stopping");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.status != SessionStatus::Closed {
                    continue;
                }
                match snapshot.last_error {
                    Some(error) => break Err(anyhow::Error::new(error).context("Session closed")),
                    None => break Ok(()),
                }
            }
        }
    };

    session.stop();
    wait_for_close(&session).await;
    let stats = session.dispatch_stats();
    info!(
        frames = stats.frames,
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        "session finished"
    );
    outcome
}

/// Give a requested close the chance to reach the server before exiting.
async fn wait_for_close(session: &Session) {
    let limit = session.config().close_timeout;
    let drained = time::timeout(limit, async {
        while session.pending_timers().close_watchdog {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("close not confirmed before exit");
    }
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: &EventPayload) -> Result<(), HandlerError> {
    info!(
        kind = %event.kind,
        topic = event.topic.as_deref().unwrap_or(GLOBAL_TOPIC),
        data = %event.data,
        "event"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn listen_defaults_to_wildcard_topic() {
        let cli = Cli::try_parse_from(["pulse", "listen", "--user-id", "u1"]).unwrap();
        match cli.command {
            Command::Listen {
                user_id,
                origin,
                topics,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(origin, None);
                assert_eq!(topics, vec!["*"]);
            }
            Command::Config => panic!("expected listen"),
        }
    }

    #[test]
    fn listen_accepts_repeated_topics() {
        let cli = Cli::try_parse_from([
            "pulse", "listen", "--user-id", "u1", "--topic", "c1", "--topic", "global",
        ])
        .unwrap();
        let Command::Listen { topics, .. } = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(topics, vec!["c1", "global"]);
    }

    #[test]
    fn listen_requires_user_id() {
        assert!(Cli::try_parse_from(["pulse", "listen"]).is_err());
    }

    #[test]
    fn settings_flag_is_global() {
        let cli = Cli::try_parse_from(["pulse", "config", "--settings", "/tmp/p.json"]).unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/p.json")));
    }

    #[test]
    fn load_reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"endpoint":{"origin":"https://chat.example.com"}}"#).unwrap();
        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.endpoint.origin, "https://chat.example.com");
        assert_eq!(settings.heartbeat.max_missed, 2);
    }

    #[test]
    fn load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
