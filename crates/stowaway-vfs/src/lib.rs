//! # stowaway-vfs
//!
//! Root-confined file operations for stowaway.
//!
//! - [`confine`] / [`Root`] - map untrusted virtual paths to physical paths
//!   that provably sit under one root directory
//! - [`Listing`] - materialized listings read back in pages by offset
//! - [`FileOps`] - read, write, command and list requests against the root
//!
//! Nothing here knows about SSH or HTTP; the server crate adapts both
//! protocols onto these types.

mod error;
mod listing;
mod ops;
mod sandbox;
mod types;

pub use error::{VfsError, VfsResult};
pub use listing::{Listing, Page};
pub use ops::{FileCmd, FileHandle, FileOps, HandleMode, ListCmd, MAX_READ_LEN};
pub use sandbox::{ConfinedPath, Root, confine};
pub use types::{EntryKind, EntryMetadata, ListingEntry, RealEntry, VirtualEntry};
