//! Client configuration constants.

use std::time::Duration;

/// Default server host.
pub const DEFAULT_SSH_HOST: &str = "127.0.0.1";

/// Default server SFTP port.
pub const DEFAULT_SSH_PORT: u16 = 2200;

/// SSH inactivity timeout.
pub const SSH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Subsystem name requested by [`crate::SftpClient::open_sftp`].
pub const SFTP_SUBSYSTEM: &str = "sftp";
