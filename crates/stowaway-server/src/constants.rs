//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default SFTP listen address (localhost only for security).
pub const DEFAULT_SFTP_ADDR: &str = "127.0.0.1:2200";

/// Default HTTP listen address for the browser API.
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";

/// Default upload directory, relative to the working directory.
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";

/// Default SFTP user name.
pub const DEFAULT_USERNAME: &str = "testuser";

/// Default SFTP password. A warning is logged when it is left in place.
pub const DEFAULT_PASSWORD: &str = "password";

/// SSH authentication rejection delay (prevents timing attacks).
pub const SSH_AUTH_REJECTION_DELAY: Duration = Duration::from_secs(1);

/// Subsystem name that starts an SFTP session on a channel.
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// Maximum entries returned by one SFTP readdir.
pub const READDIR_PAGE_SIZE: usize = 128;
