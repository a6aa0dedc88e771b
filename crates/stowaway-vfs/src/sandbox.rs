//! Path confinement.
//!
//! Every path a client sends is untrusted. [`confine`] turns it into a
//! [`ConfinedPath`], which can only be constructed once containment under
//! the root has been verified on the final, lexically normalized path.
//! Both the SFTP handler and the HTTP API go through here.

use std::fmt;
use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};

/// The directory all client-visible paths live under.
///
/// Cheap to clone; shared read-only by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    path: Arc<Path>,
}

impl Root {
    /// Resolve `path` to an absolute directory, creating it if missing.
    ///
    /// The result is canonicalized (e.g. macOS `/tmp` → `/private/tmp`) so
    /// later containment checks compare against the real location.
    pub fn new(path: impl Into<PathBuf>) -> VfsResult<Self> {
        let path: PathBuf = path.into();
        let absolute = std::path::absolute(&path)?;
        std::fs::create_dir_all(&absolute)?;
        let canonical = dunce::canonicalize(&absolute)?;

        tracing::debug!(root = %canonical.display(), "upload root ready");
        Ok(Self {
            path: Arc::from(canonical),
        })
    }

    /// Get the root path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recreate the root directory if something removed it.
    pub async fn ensure_exists(&self) -> VfsResult<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Confine a client-supplied path under this root.
    pub fn confine(&self, virtual_path: &str) -> VfsResult<ConfinedPath> {
        confine(&self.path, virtual_path)
    }

    /// Confine an already-physical absolute path.
    ///
    /// Unlike [`Root::confine`], the input is not re-rooted: it must already
    /// name the root or a descendant. Identity on any [`ConfinedPath`].
    pub fn contain(&self, absolute: &Path) -> VfsResult<ConfinedPath> {
        if !absolute.is_absolute() {
            return Err(VfsError::traversal(absolute.display().to_string()));
        }
        let normalized = normalize(absolute);
        checked(&self.path, normalized, || absolute.display().to_string())
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A physical path proven to be the root or one of its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedPath {
    physical: PathBuf,
    relative: PathBuf,
}

impl ConfinedPath {
    /// The absolute path on disk.
    pub fn as_path(&self) -> &Path {
        &self.physical
    }

    /// Whether this is the root itself.
    pub fn is_root(&self) -> bool {
        self.relative.as_os_str().is_empty()
    }

    /// The client-visible form: `/` for the root, `/a/b` below it.
    pub fn virtual_path(&self) -> String {
        let mut out = String::from("/");
        let parts: Vec<_> = self
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        out.push_str(&parts.join("/"));
        out
    }

    /// Last path segment, or `None` for the root.
    pub fn file_name(&self) -> Option<String> {
        if self.is_root() {
            return None;
        }
        self.physical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

impl AsRef<Path> for ConfinedPath {
    fn as_ref(&self) -> &Path {
        &self.physical
    }
}

/// Displays the virtual path so log lines never carry the physical layout.
impl fmt::Display for ConfinedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.virtual_path())
    }
}

/// Map an untrusted slash-separated path under `root`.
///
/// The virtual path is always treated as relative, even with a leading `/`.
/// `/` and `\` both separate segments; empty and `.` segments are dropped.
/// The joined path is normalized without touching the filesystem, and only
/// then checked for containment. `root` must be absolute and normalized.
pub fn confine(root: &Path, virtual_path: &str) -> VfsResult<ConfinedPath> {
    if virtual_path.contains('\0') {
        return Err(VfsError::traversal(virtual_path));
    }

    let mut joined = root.to_path_buf();
    for segment in virtual_path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            other => joined.push(other),
        }
    }

    let normalized = normalize(&joined);
    checked(root, normalized, || virtual_path.to_string())
}

/// Resolve `.` and `..` lexically. `..` at the filesystem root stays there.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// The containment check, on the final string.
fn checked(
    root: &Path,
    normalized: PathBuf,
    shown: impl FnOnce() -> String,
) -> VfsResult<ConfinedPath> {
    if !is_within(root, &normalized) {
        return Err(VfsError::traversal(shown()));
    }

    let relative = normalized
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| VfsError::traversal(shown()))?;

    Ok(ConfinedPath {
        physical: normalized,
        relative,
    })
}

/// `candidate` equals `root`, or starts with `root` plus a separator.
fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = root.as_os_str().as_encoded_bytes();
    let candidate = candidate.as_os_str().as_encoded_bytes();

    if candidate == root {
        return true;
    }

    let sep = MAIN_SEPARATOR as u8;
    if root.last() == Some(&sep) {
        return candidate.starts_with(root);
    }

    candidate.len() > root.len() && candidate.starts_with(root) && candidate[root.len()] == sep
}
