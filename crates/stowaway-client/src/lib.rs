//! # stowaway-client
//!
//! Minimal SSH client for stowaway servers: password login, then SFTP
//! sessions or raw subsystem requests on fresh channels.

pub mod constants;
mod ssh;

pub use russh_sftp::client::SftpSession;
pub use ssh::{ClientConfig, ClientError, SftpClient};
