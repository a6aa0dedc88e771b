//! Stowaway server library
//!
//! SFTP over SSH plus a browser API, both confined to one upload directory.

pub mod config;
pub mod constants;
pub mod filetypes;
pub mod sftp;
pub mod ssh;
pub mod web;

use anyhow::Context;
use stowaway_vfs::Root;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use config::{Args, Credentials, ServerConfig};
pub use sftp::SftpSession;
pub use ssh::{SshError, SshServer, SshServerConfig};

/// Run the SSH server and, when enabled, the HTTP API until `shutdown`
/// fires. Fails fast if the root cannot be prepared or a listener cannot
/// bind.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    if config.credentials.uses_default_password() {
        tracing::warn!("running with the default password; set STOWAWAY_PASSWORD");
    }

    let root = Root::new(&config.upload_dir)
        .with_context(|| format!("preparing upload dir {}", config.upload_dir.display()))?;

    let ssh_config = SshServerConfig::ephemeral(config.sftp_addr)?;
    let ssh_listener = TcpListener::bind(config.sftp_addr)
        .await
        .with_context(|| format!("binding SFTP address {}", config.sftp_addr))?;
    let ssh = SshServer::new(ssh_config, root.clone(), config.credentials.clone());

    let http = match config.http_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding HTTP address {addr}"))?;
            Some(tokio::spawn(web::serve(listener, root, shutdown.clone())))
        }
        None => {
            tracing::info!("HTTP API disabled");
            None
        }
    };

    let ssh_result = ssh.serve(ssh_listener, shutdown.clone()).await;
    // Bring the HTTP side down too if SSH stopped on its own.
    shutdown.cancel();

    if let Some(http) = http {
        http.await.context("HTTP task panicked")??;
    }
    ssh_result?;
    Ok(())
}
