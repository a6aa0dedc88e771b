//! File operations against a confined root.
//!
//! [`FileOps`] is protocol-agnostic: the SFTP adapter translates wire
//! requests into the four entry points here (read, write, command, list)
//! and translates results back. Every path argument is confined before any
//! filesystem call; a confinement failure ends the whole operation.
//!
//! No locks and no caching. A write handle fills a staging file next to its
//! target and renames it into place when closed, so concurrent writers to
//! one path never interleave: the last one to close wins whole.

use std::path::Path;
use std::str::FromStr;

use strum::{EnumString, IntoStaticStr};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{VfsError, VfsResult};
use crate::listing::Listing;
use crate::sandbox::{ConfinedPath, Root};
use crate::types::{EntryMetadata, ListingEntry, RealEntry, VirtualEntry};

/// Largest single read served, whatever the client asks for.
pub const MAX_READ_LEN: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
enum CmdMethod {
    Setstat,
    Setattr,
    Rename,
    Rmdir,
    Mkdir,
    Remove,
    Rm,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
enum ListMethod {
    List,
    Stat,
    Lstat,
    Readlink,
}

/// A mutating command. Each variant carries exactly the paths it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCmd {
    /// Attribute change. Acknowledged, never applied.
    Setstat { path: String },
    /// Move `path` to `target`.
    Rename { path: String, target: String },
    /// Remove an empty directory.
    Rmdir { path: String },
    /// Create a directory and any missing parents.
    Mkdir { path: String },
    /// Remove a file.
    Remove { path: String },
    /// Create a link at `link` pointing at `target`.
    Symlink { link: String, target: String },
}

impl FileCmd {
    /// Build a command from a method name as protocol layers spell it.
    ///
    /// `target` is required for `Rename` and `Symlink` and ignored otherwise.
    pub fn from_method(
        method: &str,
        path: impl Into<String>,
        target: Option<String>,
    ) -> VfsResult<Self> {
        let parsed = CmdMethod::from_str(method).map_err(|_| VfsError::unsupported(method))?;
        let path = path.into();
        let need_target = || {
            target
                .clone()
                .ok_or_else(|| VfsError::unsupported(format!("{method} without target")))
        };

        Ok(match parsed {
            CmdMethod::Setstat | CmdMethod::Setattr => FileCmd::Setstat { path },
            CmdMethod::Rename => FileCmd::Rename {
                path,
                target: need_target()?,
            },
            CmdMethod::Rmdir => FileCmd::Rmdir { path },
            CmdMethod::Mkdir => FileCmd::Mkdir { path },
            CmdMethod::Remove | CmdMethod::Rm => FileCmd::Remove { path },
            CmdMethod::Symlink => FileCmd::Symlink {
                link: path,
                target: need_target()?,
            },
        })
    }

    /// Canonical method name.
    pub fn method(&self) -> &'static str {
        match self {
            FileCmd::Setstat { .. } => CmdMethod::Setstat.into(),
            FileCmd::Rename { .. } => CmdMethod::Rename.into(),
            FileCmd::Rmdir { .. } => CmdMethod::Rmdir.into(),
            FileCmd::Mkdir { .. } => CmdMethod::Mkdir.into(),
            FileCmd::Remove { .. } => CmdMethod::Remove.into(),
            FileCmd::Symlink { .. } => CmdMethod::Symlink.into(),
        }
    }
}

/// A listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListCmd {
    /// Directory contents.
    List { path: String },
    /// One entry, following symlinks.
    Stat { path: String },
    /// One entry, not following symlinks.
    Lstat { path: String },
    /// The link target as a synthesized entry.
    Readlink { path: String },
}

impl ListCmd {
    pub fn from_method(method: &str, path: impl Into<String>) -> VfsResult<Self> {
        let parsed = ListMethod::from_str(method).map_err(|_| VfsError::unsupported(method))?;
        let path = path.into();
        Ok(match parsed {
            ListMethod::List => ListCmd::List { path },
            ListMethod::Stat => ListCmd::Stat { path },
            ListMethod::Lstat => ListCmd::Lstat { path },
            ListMethod::Readlink => ListCmd::Readlink { path },
        })
    }

    pub fn method(&self) -> &'static str {
        match self {
            ListCmd::List { .. } => ListMethod::List.into(),
            ListCmd::Stat { .. } => ListMethod::Stat.into(),
            ListCmd::Lstat { .. } => ListMethod::Lstat.into(),
            ListCmd::Readlink { .. } => ListMethod::Readlink.into(),
        }
    }
}

/// Whether a handle was opened for reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    Read,
    Write,
}

/// Name prefix of in-progress uploads. Listings hide these files.
const STAGING_PREFIX: &str = ".stowaway-";
const STAGING_SUFFIX: &str = ".part";

fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

/// An open file supporting reads and writes at arbitrary offsets.
///
/// A write handle works on a staging file in the target's directory. The
/// staging file replaces the target when the handle is closed or dropped.
#[derive(Debug)]
pub struct FileHandle {
    file: fs::File,
    path: ConfinedPath,
    mode: HandleMode,
    staged: Option<TempPath>,
}

impl FileHandle {
    pub fn path(&self) -> &ConfinedPath {
        &self.path
    }

    pub fn mode(&self) -> HandleMode {
        self.mode
    }

    /// Read up to `len` bytes at `offset`. Empty at end of file.
    pub async fn read_at(&mut self, offset: u64, len: u32) -> VfsResult<Vec<u8>> {
        let len = len.min(MAX_READ_LEN) as u64;
        let Self { file, path, .. } = self;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| io_err(path, e))?;

        let mut buffer = Vec::with_capacity(len as usize);
        file.take(len)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| io_err(path, e))?;
        Ok(buffer)
    }

    /// Write all of `data` at `offset`.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> VfsResult<()> {
        if self.mode != HandleMode::Write {
            return Err(VfsError::access_denied(self.path.virtual_path()));
        }
        let Self { file, path, .. } = self;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| io_err(path, e))?;
        file.write_all(data).await.map_err(|e| io_err(path, e))?;
        // Complete the write before the next request can observe the file.
        file.flush().await.map_err(|e| io_err(path, e))
    }

    /// Metadata of the open file.
    pub async fn metadata(&self) -> VfsResult<RealEntry> {
        let meta = self
            .file
            .metadata()
            .await
            .map_err(|e| io_err(&self.path, e))?;
        let name = self.path.file_name().unwrap_or_else(|| "/".into());
        Ok(RealEntry::from_metadata(name, &meta))
    }

    /// Finish the handle. For a write handle this moves the staged content
    /// over the target in one rename.
    pub async fn close(mut self) -> VfsResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| io_err(&self.path, e))?;
        self.commit()
    }

    fn commit(&mut self) -> VfsResult<()> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        staged
            .persist(&self.path)
            .map_err(|e| io_err(&self.path, e.error))?;
        tracing::debug!(path = %self.path, "write committed");
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        // Handles left open at session end still publish what was written.
        if let Err(e) = self.commit() {
            tracing::warn!(path = %self.path, error = %e, "staged write not committed");
        }
    }
}

/// Create the staging file for a write to `target`, in the same directory
/// so the final rename never crosses filesystems.
async fn stage(target: &ConfinedPath) -> VfsResult<(fs::File, TempPath)> {
    let dir = target
        .as_path()
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| VfsError::access_denied(target.virtual_path()))?;

    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_PREFIX).suffix(STAGING_SUFFIX);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }

    let staged = tokio::task::spawn_blocking(move || builder.tempfile_in(dir))
        .await
        .map_err(|e| VfsError::Io(std::io::Error::other(e)))?
        .map_err(|e| io_err(target, e))?;

    let (file, path) = staged.into_parts();
    Ok((fs::File::from_std(file), path))
}

fn io_err(path: &ConfinedPath, err: std::io::Error) -> VfsError {
    VfsError::from_io(err, path.virtual_path())
}

/// The per-session file operation handler.
///
/// Holds only the root; cloning it is cheap and clones share nothing mutable.
#[derive(Debug, Clone)]
pub struct FileOps {
    root: Root,
}

impl FileOps {
    pub fn new(root: Root) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Normalized client-visible form of `path`.
    pub fn realpath(&self, path: &str) -> VfsResult<String> {
        Ok(self.root.confine(path)?.virtual_path())
    }

    /// Open an existing file for reading.
    pub async fn file_read(&self, path: &str) -> VfsResult<FileHandle> {
        let confined = self.root.confine(path)?;
        tracing::debug!(path = %confined, "read");

        let file = fs::File::open(&confined)
            .await
            .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;

        Ok(FileHandle {
            file,
            path: confined,
            mode: HandleMode::Read,
            staged: None,
        })
    }

    /// Open `path` for writing. The handle starts empty and its content
    /// replaces the target when it is closed. Missing parent directories
    /// are created; they lie under the root because the path itself was
    /// confined first.
    pub async fn file_write(&self, path: &str) -> VfsResult<FileHandle> {
        let confined = self.root.confine(path)?;
        tracing::debug!(path = %confined, "write");

        if confined.is_root() {
            return Err(VfsError::access_denied(confined.virtual_path()));
        }

        self.root.ensure_exists().await?;
        if let Some(parent) = confined.as_path().parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;
        }

        match fs::metadata(&confined).await {
            Ok(meta) if meta.is_dir() => {
                return Err(VfsError::from_io(
                    std::io::ErrorKind::IsADirectory.into(),
                    confined.virtual_path(),
                ));
            }
            _ => {}
        }

        let (file, staged) = stage(&confined).await?;
        Ok(FileHandle {
            file,
            path: confined,
            mode: HandleMode::Write,
            staged: Some(staged),
        })
    }

    /// Run a mutating command.
    pub async fn file_cmd(&self, cmd: FileCmd) -> VfsResult<()> {
        tracing::debug!(method = cmd.method(), "command");

        match cmd {
            FileCmd::Setstat { path } => {
                let confined = self.root.confine(&path)?;
                tracing::debug!(path = %confined, "setstat acknowledged, attributes not applied");
                Ok(())
            }
            FileCmd::Rename { path, target } => {
                let from = self.root.confine(&path)?;
                let to = self.root.confine(&target)?;
                Self::refuse_root(&from)?;
                Self::refuse_root(&to)?;
                fs::rename(&from, &to)
                    .await
                    .map_err(|e| VfsError::from_io(e, from.virtual_path()))
            }
            FileCmd::Rmdir { path } => {
                let confined = self.root.confine(&path)?;
                Self::refuse_root(&confined)?;
                fs::remove_dir(&confined)
                    .await
                    .map_err(|e| VfsError::from_io(e, confined.virtual_path()))
            }
            FileCmd::Mkdir { path } => {
                let confined = self.root.confine(&path)?;
                fs::create_dir_all(&confined)
                    .await
                    .map_err(|e| VfsError::from_io(e, confined.virtual_path()))
            }
            FileCmd::Remove { path } => {
                let confined = self.root.confine(&path)?;
                Self::refuse_root(&confined)?;
                fs::remove_file(&confined)
                    .await
                    .map_err(|e| VfsError::from_io(e, confined.virtual_path()))
            }
            FileCmd::Symlink { link, target } => {
                let link = self.root.confine(&link)?;
                let target = self.root.confine(&target)?;
                // The stored target is confined; what it resolves to later
                // is up to the OS.
                fs::symlink(target.as_path(), link.as_path())
                    .await
                    .map_err(|e| VfsError::from_io(e, link.virtual_path()))
            }
        }
    }

    /// Run a listing request.
    pub async fn file_list(&self, cmd: ListCmd) -> VfsResult<Listing> {
        tracing::debug!(method = cmd.method(), "list");

        match cmd {
            ListCmd::List { path } => self.list_dir(&path).await,
            ListCmd::Stat { path } => {
                let confined = self.root.confine(&path)?;
                let meta = fs::metadata(&confined)
                    .await
                    .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;
                Ok(Listing::single(RealEntry::from_metadata(
                    Self::display_name(&confined),
                    &meta,
                )))
            }
            ListCmd::Lstat { path } => {
                let confined = self.root.confine(&path)?;
                let meta = fs::symlink_metadata(&confined)
                    .await
                    .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;
                Ok(Listing::single(RealEntry::from_metadata(
                    Self::display_name(&confined),
                    &meta,
                )))
            }
            ListCmd::Readlink { path } => {
                let confined = self.root.confine(&path)?;
                let target = fs::read_link(&confined)
                    .await
                    .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;
                Ok(Listing::single(VirtualEntry::link_target(&target)))
            }
        }
    }

    async fn list_dir(&self, path: &str) -> VfsResult<Listing> {
        let confined = self.root.confine(path)?;
        let meta = fs::metadata(&confined)
            .await
            .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;
        if !meta.is_dir() {
            return Err(VfsError::not_a_directory(confined.virtual_path()));
        }

        let mut dir = fs::read_dir(&confined)
            .await
            .map_err(|e| VfsError::from_io(e, confined.virtual_path()))?;

        let mut entries: Vec<ListingEntry> = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %confined, error = %e, "directory read interrupted");
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if is_staging_name(&name) {
                continue;
            }
            match entry.metadata().await {
                Ok(meta) => entries.push(RealEntry::from_metadata(name, &meta).into()),
                Err(e) => {
                    tracing::warn!(path = %confined, entry = %name, error = %e, "skipping unreadable entry");
                }
            }
        }

        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Listing::new(entries))
    }

    fn refuse_root(path: &ConfinedPath) -> VfsResult<()> {
        if path.is_root() {
            Err(VfsError::access_denied(path.virtual_path()))
        } else {
            Ok(())
        }
    }

    fn display_name(path: &ConfinedPath) -> String {
        path.file_name().unwrap_or_else(|| "/".into())
    }
}
