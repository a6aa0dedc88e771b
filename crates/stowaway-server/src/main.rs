//! Stowaway server binary
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: SFTP on 127.0.0.1:2200, HTTP on 127.0.0.1:8080, ./uploads
//! stowaway-server
//!
//! # Custom root and credentials
//! stowaway-server --upload-dir /srv/drop -u alice -p "$SECRET"
//!
//! # SFTP only
//! STOWAWAY_NO_HTTP=true stowaway-server
//! ```

use std::process::ExitCode;

use clap::Parser;
use stowaway_server::Args;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "cannot listen for interrupt"),
        }
    });

    if let Err(e) = stowaway_server::run(args.into_config(), shutdown).await {
        tracing::error!("Server error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
