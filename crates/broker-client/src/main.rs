//! broker-client demo binary.
//!
//! Connects a [`Broker`] carrying `String` payloads to one HTTP endpoint,
//! sends every line typed on stdin, and logs every message that comes back.
//! Stops on end of input or Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! broker-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>                   TOML config file [default: broker.toml]
//!   --url <URL>                       Broker endpoint (overrides the file)
//!   --id <ID>                         Broker id used in logs (overrides the file)
//!   --sleep-after-io-error-ms <MS>    Pause after a failed poll (overrides the file)
//!   --shutdown-timeout-ms <MS>        How long to wait for a clean stop [default: 5000]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                          | Flag                         |
//! |-----------------------------------|------------------------------|
//! | `BROKER_CONFIG`                   | `--config`                   |
//! | `BROKER_URL`                      | `--url`                      |
//! | `BROKER_ID`                       | `--id`                       |
//! | `BROKER_SLEEP_AFTER_IO_ERROR_MS`  | `--sleep-after-io-error-ms`  |
//!
//! Precedence, highest first: command line, environment, config file,
//! built-in defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use broker_client::application::{Broker, BrokerBuilder, BrokerSettings, Channel, ThreadExecutor};
use broker_client::infrastructure::config::{load_config, ClientConfig};
use broker_client::infrastructure::transport::ReqwestTransport;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bidirectional message channel over HTTP POST and long-poll GET.
#[derive(Debug, Parser)]
#[command(
    name = "broker-client",
    about = "Send stdin lines through an HTTP long-poll broker and log replies",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "broker.toml", env = "BROKER_CONFIG")]
    config: PathBuf,

    /// Broker endpoint URL.
    #[arg(long, env = "BROKER_URL")]
    url: Option<String>,

    /// Broker id used in log lines.
    #[arg(long, env = "BROKER_ID")]
    id: Option<String>,

    /// Pause after a failed poll, in milliseconds.  `0` retries immediately.
    #[arg(long, env = "BROKER_SLEEP_AFTER_IO_ERROR_MS")]
    sleep_after_io_error_ms: Option<u64>,

    /// How long to wait for the background tasks on exit, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    shutdown_timeout_ms: u64,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn into_broker_settings(self, file: &ClientConfig) -> BrokerSettings {
        let mut settings = file.broker.to_settings();
        if let Some(url) = self.url {
            settings.url = url;
        }
        if let Some(id) = self.id {
            settings.id = id;
        }
        if let Some(ms) = self.sleep_after_io_error_ms {
            settings.sleep_after_io_error = Duration::from_millis(ms);
        }
        settings
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // `RUST_LOG` wins; otherwise use the level from the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file.logging.level)),
        )
        .init();

    let shutdown_timeout = Duration::from_millis(cli.shutdown_timeout_ms);
    let settings = cli.into_broker_settings(&file);
    info!("broker-client starting: id={}, url={}", settings.id, settings.url);

    let transport = ReqwestTransport::new(file.broker.connect_timeout())
        .context("building HTTP transport")?;
    let executor = ThreadExecutor::spawn(format!("{}-dispatch", settings.id))
        .context("spawning dispatch thread")?;

    let broker: Broker<String> = BrokerBuilder::new()
        .settings(settings)
        .transport(Arc::new(transport))
        .request_initializer(file.broker.request_headers())
        .dispatch_executor(Arc::new(executor))
        .receiver(|message: String, channel: &Channel<String>| {
            info!("[{}] received: {message}", channel.broker_id());
        })
        .build()
        .context("starting broker")?;

    let channel = broker.channel();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    channel.send_with_failure(line, |e| warn!("send failed: {e}"));
                }
                Ok(None) => {
                    info!("end of input");
                    break;
                }
                Err(e) => {
                    warn!("reading stdin failed: {e}");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl+C: {e}");
                }
                info!("received Ctrl+C; shutting down");
                break;
            }
        }
    }

    if !broker.shutdown(shutdown_timeout).await {
        warn!("broker did not stop within {shutdown_timeout:?}");
    }
    info!("broker-client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
