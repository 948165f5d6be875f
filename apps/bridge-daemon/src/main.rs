//! # Screen Time Bridge Daemon
//!
//! Entry point: loads configuration, connects the broker, starts the session
//! task and the optional status server, then waits for a shutdown signal.
//!
//! ```text
//! screentime-bridge [CONFIG_PATH] [--once]
//!
//!   CONFIG_PATH   bridge.toml (default: platform config dir)
//!   --once        log in, sync once, run queued commands, exit
//!
//!   RUST_LOG      log filter (default: info)
//!   SCREENTIME_*  configuration overrides
//! ```

mod status_server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use screentime_bridge::{
    command_queue, BridgeAgentBuilder, BridgeConfig, CommandIngress, CredentialStore,
    FileCredentialStore, MqttAdapter,
};
use screentime_core::TopicRouter;

use crate::status_server::StatusState;

/// Time given to the broker client to flush queued publishes in `--once` mode.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// How long `POST /api/refresh` waits for the session task to answer.
const REFRESH_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    once: bool,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> Self {
        let mut parsed = Args::default();
        for arg in args {
            match arg.as_str() {
                "--once" => parsed.once = true,
                other if other.starts_with("--") => warn!(arg = other, "Ignoring unknown flag"),
                path => parsed.config_path = Some(PathBuf::from(path)),
            }
        }
        parsed
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse(std::env::args().skip(1));
    let config = BridgeConfig::load(args.config_path.clone()).context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        subject = %config.subject.name,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "Starting Screen Time Bridge"
    );

    // Broker first, so the queue sender exists before the agent is built.
    let (sender, queue) = command_queue();
    let builder = BridgeAgentBuilder::new(config.clone());
    let ingress = CommandIngress::new(TopicRouter::from_topics(builder.topics()), sender.clone());
    let (mqtt, publisher) = MqttAdapter::spawn(&config.mqtt, ingress);

    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(config.credential_path()));
    info!(store = %store.describe(), "Using credential store");

    let (agent, handle) = builder
        .with_publisher(publisher)
        .with_credential_store(store.clone())
        .with_commands(sender, queue)
        .build()
        .context("Failed to build bridge agent")?;

    if args.once {
        let outcome = agent.run_once().await;
        info!(?outcome, "Single pass complete");
        tokio::time::sleep(FLUSH_GRACE).await;
        let _ = mqtt.shutdown().await;
        return Ok(());
    }

    let status_server = if config.status_server.enabled {
        let state = Arc::new(StatusState {
            store,
            agent: handle.clone(),
            broker: Some(mqtt.clone()),
            critical_cookies: config.session.critical_cookies.clone(),
            expiry_horizon: config.expiry_horizon(),
            refresh_wait: REFRESH_WAIT,
        });
        Some(status_server::start(&config.status_server.bind_address(), state).await?)
    } else {
        None
    };

    let agent_task = tokio::spawn(agent.run());

    shutdown_signal().await;

    handle.shutdown().await;
    if let Err(e) = agent_task.await {
        error!(%e, "Bridge agent task failed");
    }
    if let Some(server) = status_server {
        server.shutdown().await;
    }
    if let Err(e) = mqtt.shutdown().await {
        warn!(%e, "MQTT adapter already stopped");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A signal source that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(%e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(%e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_args() {
        let args = parse(&["/etc/bridge.toml", "--once"]);
        assert!(args.once);
        assert_eq!(args.config_path, Some(PathBuf::from("/etc/bridge.toml")));

        let args = parse(&["--verbose"]);
        assert!(!args.once);
        assert_eq!(args.config_path, None);
    }
}
