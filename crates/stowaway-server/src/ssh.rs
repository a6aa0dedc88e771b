//! SSH server for stowaway
//!
//! Accepts SSH connections, authenticates the configured user by password
//! and starts an SFTP session for every `sftp` subsystem request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::PrivateKey;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, Pty, Sig};
use stowaway_vfs::{FileOps, Root};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::Credentials;
use crate::constants::{SFTP_SUBSYSTEM, SSH_AUTH_REJECTION_DELAY};
use crate::sftp::SftpSession;

/// SSH server errors
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("host key generation failed: {0}")]
    HostKey(#[from] russh::keys::ssh_key::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// SSH server configuration
#[derive(Clone)]
pub struct SshServerConfig {
    pub bind_addr: SocketAddr,
    pub host_key: PrivateKey,
}

impl SshServerConfig {
    /// Config with a fresh Ed25519 host key. Clients see a new key on every
    /// start.
    pub fn ephemeral(bind_addr: SocketAddr) -> Result<Self, SshError> {
        let host_key =
            PrivateKey::random(&mut rand::thread_rng(), russh::keys::Algorithm::Ed25519)?;
        Ok(Self {
            bind_addr,
            host_key,
        })
    }

    fn russh_config(&self) -> Arc<server::Config> {
        Arc::new(server::Config {
            auth_rejection_time: SSH_AUTH_REJECTION_DELAY,
            auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
            keys: vec![self.host_key.clone()],
            ..Default::default()
        })
    }
}

/// SSH server
pub struct SshServer {
    config: SshServerConfig,
    root: Root,
    credentials: Credentials,
}

impl SshServer {
    pub fn new(config: SshServerConfig, root: Root, credentials: Credentials) -> Self {
        Self {
            config,
            root,
            credentials,
        }
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SshError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` fires.
    ///
    /// Each connection runs on its own task; a failing connection never
    /// affects the others or the accept loop.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), SshError> {
        let config = self.config.russh_config();
        tracing::info!(addr = %listener.local_addr()?, root = %self.root, "SFTP server listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let handler = ConnectionHandler::new(self.root.clone(), self.credentials.clone(), peer);
            tokio::spawn(handle_connection(config.clone(), stream, handler));
        }

        tracing::info!("SFTP server stopped accepting connections");
        Ok(())
    }
}

async fn handle_connection(
    config: Arc<server::Config>,
    stream: TcpStream,
    handler: ConnectionHandler,
) {
    let peer = handler.peer;
    tracing::debug!(%peer, "connection accepted");

    let session = match server::run_stream(config, stream, handler).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "SSH handshake failed");
            return;
        }
    };

    // In-flight sessions are not cut at shutdown; they end with the client.
    match session.await {
        Ok(()) => tracing::debug!(%peer, "connection closed"),
        Err(e) => tracing::warn!(%peer, error = %e, "connection ended with error"),
    }
}

/// Handler for a single SSH connection
struct ConnectionHandler {
    root: Root,
    credentials: Credentials,
    peer: SocketAddr,
    username: Option<String>,
    /// Session channels not yet bound to a subsystem.
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl ConnectionHandler {
    fn new(root: Root, credentials: Credentials, peer: SocketAddr) -> Self {
        Self {
            root,
            credentials,
            peer,
            username: None,
            channels: HashMap::new(),
        }
    }
}

impl server::Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.credentials.verify(user, password) {
            tracing::info!(peer = %self.peer, user, "authenticated");
            self.username = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            tracing::warn!(peer = %self.peer, user, "password rejected");
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(peer = %self.peer, channel = %channel.id(), "session channel opened");
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != SFTP_SUBSYSTEM {
            tracing::debug!(peer = %self.peer, subsystem = name, "unsupported subsystem");
            session.channel_failure(channel_id)?;
            return Ok(());
        }

        let Some(channel) = self.channels.remove(&channel_id) else {
            tracing::debug!(peer = %self.peer, channel = %channel_id, "subsystem on unknown channel");
            session.channel_failure(channel_id)?;
            return Ok(());
        };

        session.channel_success(channel_id)?;
        tracing::info!(
            peer = %self.peer,
            user = self.username.as_deref().unwrap_or("-"),
            "sftp session started"
        );

        let handler = SftpSession::new(FileOps::new(self.root.clone()));
        russh_sftp::server::run(channel.into_stream(), handler).await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, "exec refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, "shell refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    // Channel requests other than a subsystem get a negative reply.
    // `channel_failure` only writes a frame when the client asked for one.

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, term, "pty refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, variable = variable_name, "env refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, "x11 refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, ?signal, "signal ignored");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::warn!(
            peer = %self.peer,
            channel = %channel.id(),
            target = %format!("{host_to_connect}:{port_to_connect}"),
            "port forwarding refused"
        );
        Ok(false)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, channel = %channel, "channel closed");
        self.channels.remove(&channel);
        Ok(())
    }
}
