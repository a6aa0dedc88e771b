//! Server configuration.
//!
//! Everything the server needs is gathered into one [`ServerConfig`] value
//! at startup and passed down through constructors.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::constants::{
    DEFAULT_HTTP_ADDR, DEFAULT_PASSWORD, DEFAULT_SFTP_ADDR, DEFAULT_UPLOAD_DIR, DEFAULT_USERNAME,
};

/// SFTP + browser server for one upload directory.
#[derive(Parser, Debug, Clone)]
#[command(name = "stowaway-server")]
#[command(about = "SFTP upload server with a browser API over the same directory")]
pub struct Args {
    /// Address the SFTP server listens on
    #[arg(long, env = "STOWAWAY_SFTP_ADDR", default_value = DEFAULT_SFTP_ADDR)]
    pub sftp_addr: SocketAddr,

    /// Address the HTTP API listens on
    #[arg(long, env = "STOWAWAY_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: SocketAddr,

    /// Directory all uploads are confined to (created if missing)
    #[arg(long, env = "STOWAWAY_UPLOAD_DIR", default_value = DEFAULT_UPLOAD_DIR)]
    pub upload_dir: PathBuf,

    /// SFTP user name
    #[arg(short, long, env = "STOWAWAY_USER", default_value = DEFAULT_USERNAME)]
    pub user: String,

    /// SFTP password
    #[arg(short, long, env = "STOWAWAY_PASSWORD", default_value = DEFAULT_PASSWORD, hide_env_values = true)]
    pub password: String,

    /// Run without the HTTP API
    #[arg(long, env = "STOWAWAY_NO_HTTP")]
    pub no_http: bool,

    /// Log filter when RUST_LOG is unset (e.g. "info", "stowaway_server=debug")
    #[arg(long, env = "STOWAWAY_LOG", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            sftp_addr: self.sftp_addr,
            http_addr: (!self.no_http).then_some(self.http_addr),
            upload_dir: self.upload_dir,
            credentials: Credentials::new(self.user, self.password),
        }
    }
}

/// The single user/password pair accepted by the SFTP endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check a login attempt. Compares every byte regardless of where the
    /// first mismatch is.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }

    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_PASSWORD
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub sftp_addr: SocketAddr,
    /// `None` disables the HTTP API.
    pub http_addr: Option<SocketAddr>,
    pub upload_dir: PathBuf,
    pub credentials: Credentials,
}
