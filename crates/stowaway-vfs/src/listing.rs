//! Paged directory listings.
//!
//! A [`Listing`] is materialized once when the list request arrives and then
//! read in pages by offset. Nothing is re-read from disk between pages, so
//! a page reflects the directory as it was at list time; concurrent changes
//! show up only in the next listing.

use crate::types::ListingEntry;

/// An ordered, randomly indexable set of listing rows.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    entries: Vec<ListingEntry>,
}

/// Result of [`Listing::list_at`].
#[derive(Debug)]
pub struct Page<'a> {
    /// Rows copied for this call.
    pub entries: &'a [ListingEntry],
    /// No rows remain after this page.
    pub end: bool,
}

impl Listing {
    /// Wrap already-ordered entries.
    pub fn new(entries: Vec<ListingEntry>) -> Self {
        Self { entries }
    }

    /// A one-row listing (stat, readlink).
    pub fn single(entry: impl Into<ListingEntry>) -> Self {
        Self {
            entries: vec![entry.into()],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListingEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<ListingEntry> {
        self.entries
    }

    /// Up to `capacity` rows starting at `offset`.
    ///
    /// An offset at or past the end yields no rows and `end`. Otherwise the
    /// page is filled as far as possible; `end` is set only when the page
    /// came back short of `capacity`.
    pub fn list_at(&self, offset: u64, capacity: usize) -> Page<'_> {
        let len = self.entries.len();
        let start = match usize::try_from(offset) {
            Ok(o) if o < len => o,
            _ => {
                return Page {
                    entries: &[],
                    end: true,
                };
            }
        };

        let count = capacity.min(len - start);
        Page {
            entries: &self.entries[start..start + count],
            end: count < capacity,
        }
    }
}

impl IntoIterator for Listing {
    type Item = ListingEntry;
    type IntoIter = std::vec::IntoIter<ListingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryMetadata, VirtualEntry};
    use std::path::Path;

    fn listing(n: usize) -> Listing {
        Listing::new(
            (0..n)
                .map(|i| VirtualEntry::link_target(Path::new(&format!("f{i}"))).into())
                .collect(),
        )
    }

    #[test]
    fn test_offset_past_end() {
        let l = listing(3);
        let page = l.list_at(3, 10);
        assert!(page.entries.is_empty());
        assert!(page.end);

        let page = l.list_at(u64::MAX, 10);
        assert!(page.entries.is_empty());
        assert!(page.end);
    }

    #[test]
    fn test_small_buffer_fills_exactly() {
        let l = listing(5);
        let page = l.list_at(0, 2);
        assert_eq!(page.entries.len(), 2);
        assert!(!page.end);
        assert_eq!(page.entries[0].name(), "f0");
    }

    #[test]
    fn test_short_page_signals_end() {
        let l = listing(5);
        let page = l.list_at(4, 2);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].name(), "f4");
        assert!(page.end);
    }

    #[test]
    fn test_paging_walks_everything_once() {
        let l = listing(7);
        let mut offset = 0u64;
        let mut seen = Vec::new();
        loop {
            let page = l.list_at(offset, 3);
            seen.extend(page.entries.iter().map(|e| e.name().to_string()));
            offset += page.entries.len() as u64;
            if page.end {
                break;
            }
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last().map(String::as_str), Some("f6"));
    }

    #[test]
    fn test_empty_listing() {
        let l = Listing::default();
        assert!(l.is_empty());
        assert!(l.list_at(0, 4).end);
    }
}
