pub mod app;
pub mod commands;
pub mod config;
mod error;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub use app::{Engine, OracleApp};
pub use commands::{Cli, Command, run_command};
pub use config::{OracleConfig, Secrets};
pub use error::AppError;

/// Targets that are noisy at `info`.
const QUIET_TARGETS: [&str; 2] = ["electrum_client", "rustls"];

/// Install the stderr logger. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let mut filter = EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();
    for target in QUIET_TARGETS {
        if let Ok(directive) = format!("{target}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Load config and secrets, open the app and run one command.
pub async fn run(cli: Cli) -> Result<Value, AppError> {
    // Install the rustls CryptoProvider before any TLS connections.
    // electrum-client pulls in rustls 0.23 which requires an explicit provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = OracleConfig::load(&cli.config)?;
    let keys = Secrets::from_env()?.key_ring()?;
    let mut app = OracleApp::open(config, keys)?;
    run_command(&mut app, cli.command).await
}
