//! SSH client for stowaway servers
//!
//! Uses russh for the transport and password authentication. Each SFTP
//! session or channel request runs on its own session channel, so one
//! rejected request leaves the connection usable.

use std::sync::Arc;

use russh::client::{self, Config, Handle, Msg};
use russh::keys::{HashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;

use crate::constants::{DEFAULT_SSH_HOST, DEFAULT_SSH_PORT, SFTP_SUBSYSTEM, SSH_INACTIVITY_TIMEOUT};

/// SSH connection configuration
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SSH_HOST.into(),
            port: DEFAULT_SSH_PORT,
            username: "testuser".into(),
            password: "password".into(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Client handler for russh - handles server key verification
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = ClientError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Stowaway servers generate a new host key on every start, so there
        // is nothing stable to pin against.
        log::warn!(
            "Accepting server key without verification: {}",
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// An authenticated connection to a stowaway server
pub struct SftpClient {
    session: Handle<ClientHandler>,
}

impl SftpClient {
    /// Connect and authenticate with the configured password
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let ssh_config = Config {
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            ..<_>::default()
        };

        let addr = (config.host.as_str(), config.port);
        let mut session = client::connect(Arc::new(ssh_config), addr, ClientHandler).await?;

        log::info!(
            "Connected to {}:{}, attempting authentication",
            config.host,
            config.port
        );

        let auth = session
            .authenticate_password(&config.username, &config.password)
            .await?;
        if !auth.success() {
            return Err(ClientError::AuthFailed(config.username));
        }
        log::info!("Authenticated as {}", config.username);

        Ok(Self { session })
    }

    /// Open a new channel and start an SFTP session on it
    pub async fn open_sftp(&self) -> Result<SftpSession, ClientError> {
        let channel = self.subsystem_channel(SFTP_SUBSYSTEM).await?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ClientError::Sftp(e.to_string()))
    }

    /// Request a subsystem on a fresh channel and report whether the server
    /// acknowledged it. The channel is closed either way.
    pub async fn request_subsystem(&self, name: &str) -> Result<bool, ClientError> {
        match self.subsystem_channel(name).await {
            Ok(channel) => {
                channel.close().await?;
                Ok(true)
            }
            Err(ClientError::SubsystemRejected(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn subsystem_channel(&self, name: &str) -> Result<Channel<Msg>, ClientError> {
        let mut channel = self.session_channel().await?;
        channel.request_subsystem(true, name).await?;

        if wait_reply(&mut channel).await? {
            log::debug!("Subsystem {} accepted", name);
            Ok(channel)
        } else {
            log::debug!("Subsystem {} rejected", name);
            // Best effort; the server may already have dropped it.
            let _ = channel.close().await;
            Err(ClientError::SubsystemRejected(name.to_string()))
        }
    }

    /// Request a pseudo-terminal on a fresh session channel and report
    /// whether the server granted it.
    pub async fn request_pty(&self, term: &str) -> Result<bool, ClientError> {
        let mut channel = self.session_channel().await?;
        channel.request_pty(true, term, 80, 24, 0, 0, &[]).await?;
        let granted = wait_reply(&mut channel).await?;
        let _ = channel.close().await;
        Ok(granted)
    }

    /// Ask the server to set an environment variable on a fresh session
    /// channel and report whether it agreed.
    pub async fn set_env(&self, name: &str, value: &str) -> Result<bool, ClientError> {
        let mut channel = self.session_channel().await?;
        channel.set_env(true, name, value).await?;
        let granted = wait_reply(&mut channel).await?;
        let _ = channel.close().await;
        Ok(granted)
    }

    /// Try to open a direct-tcpip (local forwarding) channel. Returns false
    /// when the server refuses the channel.
    pub async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<bool, ClientError> {
        match self
            .session
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
        {
            Ok(channel) => {
                channel.close().await?;
                Ok(true)
            }
            Err(russh::Error::ChannelOpenFailure(reason)) => {
                log::debug!("direct-tcpip to {}:{} refused: {:?}", host, port, reason);
                Ok(false)
            }
            Err(e) => Err(ClientError::ChannelFailed(e.to_string())),
        }
    }

    async fn session_channel(&self) -> Result<Channel<Msg>, ClientError> {
        self.session
            .channel_open_session()
            .await
            .map_err(|e| ClientError::ChannelFailed(e.to_string()))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        !self.session.is_closed()
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.session
            .disconnect(Disconnect::ByApplication, "Client disconnecting", "en")
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))
    }
}

/// Wait for the server's answer to a channel request sent with want_reply.
async fn wait_reply(channel: &mut Channel<Msg>) -> Result<bool, ClientError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(true),
            Some(ChannelMsg::Failure) => return Ok(false),
            Some(_) => continue,
            None => return Err(ClientError::Disconnected),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Auth failed for user {0}")]
    AuthFailed(String),
    #[error("Channel failed: {0}")]
    ChannelFailed(String),
    #[error("Subsystem rejected: {0}")]
    SubsystemRejected(String),
    #[error("SFTP error: {0}")]
    Sftp(String),
    #[error("Disconnected")]
    Disconnected,
}

impl From<russh::Error> for ClientError {
    fn from(e: russh::Error) -> Self {
        ClientError::ConnectionFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_hides_password() {
        let config = ClientConfig::new("example.test", 22).with_credentials("bob", "hunter2");
        let shown = format!("{config:?}");
        assert!(shown.contains("bob"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, DEFAULT_SSH_HOST);
        assert_eq!(config.port, DEFAULT_SSH_PORT);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SftpClient::connect(ClientConfig::new("127.0.0.1", port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::ConnectionFailed(_)));
    }
}
