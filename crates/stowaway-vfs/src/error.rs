//! VFS error types.

use std::io;
use std::path::Path;
use thiserror::Error;

/// VFS error type.
///
/// Every variant ends the single operation that produced it; none of them
/// carries enough meaning to end a session.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The path resolves outside the root. Never silently corrected.
    #[error("path escapes root: {0}")]
    PathTraversalRejected(String),

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Permission denied by the OS or by root protection.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Unknown request method.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Any other filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a PathTraversalRejected error.
    pub fn traversal(path: impl Into<String>) -> Self {
        Self::PathTraversalRejected(path.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an AccessDenied error.
    pub fn access_denied(path: impl Into<String>) -> Self {
        Self::AccessDenied(path.into())
    }

    /// Create an UnsupportedOperation error naming the method.
    pub fn unsupported(method: impl Into<String>) -> Self {
        Self::UnsupportedOperation(method.into())
    }

    /// Classify an I/O error raised while operating on `path`.
    ///
    /// The path in the message is the client-visible one; callers must not
    /// pass physical paths here.
    pub fn from_io(err: io::Error, path: impl AsRef<Path>) -> Self {
        let shown = path.as_ref().display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(shown),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(shown),
            io::ErrorKind::NotADirectory => Self::NotADirectory(shown),
            _ => Self::Io(err),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::PathTraversalRejected(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::AccessDenied(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::UnsupportedOperation(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::Io(e) => e,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_kinds() {
        let err = VfsError::from_io(io::Error::from(io::ErrorKind::NotFound), "/a.txt");
        assert!(matches!(err, VfsError::NotFound(ref p) if p == "/a.txt"));

        let err = VfsError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/b");
        assert!(matches!(err, VfsError::AccessDenied(_)));

        let err = VfsError::from_io(io::Error::from(io::ErrorKind::NotADirectory), "/c");
        assert!(matches!(err, VfsError::NotADirectory(_)));

        let err = VfsError::from_io(io::Error::other("disk on fire"), "/d");
        assert!(matches!(err, VfsError::Io(_)));
    }

    #[test]
    fn test_into_io_error() {
        let io_err: io::Error = VfsError::traversal("../etc").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);

        let io_err: io::Error = VfsError::unsupported("Link").into();
        assert_eq!(io_err.kind(), io::ErrorKind::Unsupported);
    }
}
