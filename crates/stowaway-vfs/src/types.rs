//! Listing entry types.
//!
//! A listing row is either backed by real filesystem metadata or
//! synthesized (readlink results). Both satisfy [`EntryMetadata`].

use serde::Serialize;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::time::SystemTime;

/// Entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file (or anything that is not a directory or link).
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// Read-only metadata contract for listing rows.
pub trait EntryMetadata {
    /// Entry name (not full path).
    fn name(&self) -> &str;
    /// Size in bytes.
    fn size(&self) -> u64;
    /// Last modification time.
    fn modified(&self) -> SystemTime;
    /// Entry kind.
    fn kind(&self) -> EntryKind;
    /// Permission bits (e.g. `0o644`), without file type bits.
    fn permissions(&self) -> u32;

    /// Returns true if this is a directory.
    fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Returns true if this is a symbolic link.
    fn is_symlink(&self) -> bool {
        self.kind() == EntryKind::Symlink
    }
}

/// Metadata read from the filesystem.
#[derive(Debug, Clone)]
pub struct RealEntry {
    pub name: String,
    pub size: u64,
    pub kind: EntryKind,
    pub perm: u32,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

impl RealEntry {
    /// Convert std::fs::Metadata into an entry named `name`.
    pub fn from_metadata(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };

        Self {
            name: name.into(),
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }
}

/// Synthesized metadata with no backing file.
#[derive(Debug, Clone)]
pub struct VirtualEntry {
    pub name: String,
    pub size: u64,
    pub kind: EntryKind,
    pub perm: u32,
    pub mtime: SystemTime,
}

impl VirtualEntry {
    /// The row returned for a readlink: the target's base name as a
    /// zero-size symlink, stamped now. Not the target's real metadata.
    pub fn link_target(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.to_string_lossy().into_owned());

        Self {
            name,
            size: 0,
            kind: EntryKind::Symlink,
            perm: 0o644,
            mtime: SystemTime::now(),
        }
    }
}

/// One row of a listing.
#[derive(Debug, Clone)]
pub enum ListingEntry {
    Real(RealEntry),
    Virtual(VirtualEntry),
}

impl ListingEntry {
    /// Owner uid/gid, known only for real entries.
    pub fn owner(&self) -> Option<(u32, u32)> {
        match self {
            ListingEntry::Real(e) => Some((e.uid, e.gid)),
            ListingEntry::Virtual(_) => None,
        }
    }

    /// Returns true if this row was synthesized.
    pub fn is_virtual(&self) -> bool {
        matches!(self, ListingEntry::Virtual(_))
    }
}

impl EntryMetadata for ListingEntry {
    fn name(&self) -> &str {
        match self {
            ListingEntry::Real(e) => &e.name,
            ListingEntry::Virtual(e) => &e.name,
        }
    }

    fn size(&self) -> u64 {
        match self {
            ListingEntry::Real(e) => e.size,
            ListingEntry::Virtual(e) => e.size,
        }
    }

    fn modified(&self) -> SystemTime {
        match self {
            ListingEntry::Real(e) => e.mtime,
            ListingEntry::Virtual(e) => e.mtime,
        }
    }

    fn kind(&self) -> EntryKind {
        match self {
            ListingEntry::Real(e) => e.kind,
            ListingEntry::Virtual(e) => e.kind,
        }
    }

    fn permissions(&self) -> u32 {
        match self {
            ListingEntry::Real(e) => e.perm,
            ListingEntry::Virtual(e) => e.perm,
        }
    }
}

impl From<RealEntry> for ListingEntry {
    fn from(e: RealEntry) -> Self {
        ListingEntry::Real(e)
    }
}

impl From<VirtualEntry> for ListingEntry {
    fn from(e: VirtualEntry) -> Self {
        ListingEntry::Virtual(e)
    }
}
