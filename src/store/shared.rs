//! Immutable, cheaply cloneable byte regions
//!
//! Segment files are opened once and then shared by every reader, iterator
//! and slice that needs them. A region is either a heap block or a
//! read-only memory map; both deref to `[u8]`.

use std::fmt;
use std::fs::File;
use std::io;
use std::ops::{Deref, Range};
use std::sync::Arc;

use memmap2::Mmap;

enum Region {
    Heap(Vec<u8>),
    Mapped(Mmap),
}

impl Region {
    fn bytes(&self) -> &[u8] {
        match self {
            Region::Heap(v) => v,
            Region::Mapped(m) => m,
        }
    }
}

/// A shared view into an immutable byte region
#[derive(Clone)]
pub struct SharedBytes {
    region: Arc<Region>,
    start: usize,
    end: usize,
}

impl SharedBytes {
    /// Take ownership of a heap block without copying
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let end = bytes.len();
        Self {
            region: Arc::new(Region::Heap(bytes)),
            start: 0,
            end,
        }
    }

    /// Map a file read-only
    ///
    /// Empty files cannot be mapped on every platform and become an empty
    /// heap region instead.
    pub fn map_file(file: &File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self::from_vec(Vec::new()));
        }
        // SAFETY: segment files are written once and renamed into place;
        // nothing truncates or rewrites a published file while it is mapped.
        let mmap = unsafe { Mmap::map(file)? };
        let end = mmap.len();
        Ok(Self {
            region: Arc::new(Region::Mapped(mmap)),
            start: 0,
            end,
        })
    }

    /// Sub-range sharing the same region, `None` if out of bounds
    pub fn slice(&self, range: Range<usize>) -> Option<Self> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        Some(Self {
            region: Arc::clone(&self.region),
            start: self.start + range.start,
            end: self.start + range.end,
        })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the region is backed by a memory map
    pub fn is_mapped(&self) -> bool {
        matches!(*self.region, Region::Mapped(_))
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.region.bytes()[self.start..self.end]
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBytes")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_slice_shares_region() {
        let bytes = SharedBytes::from_vec((0u8..10).collect());
        let mid = bytes.slice(2..6).unwrap();
        assert_eq!(&*mid, &[2, 3, 4, 5]);

        let inner = mid.slice(1..3).unwrap();
        assert_eq!(&*inner, &[3, 4]);
        assert!(mid.slice(3..7).is_none());
        assert!(!bytes.is_mapped());
    }

    #[test]
    fn test_map_file() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"segment bytes").unwrap();
        file.flush().unwrap();

        let bytes = SharedBytes::map_file(&file).unwrap();
        assert!(bytes.is_mapped());
        assert_eq!(&*bytes, b"segment bytes");

        let empty = SharedBytes::map_file(&tempfile::tempfile().unwrap()).unwrap();
        assert!(empty.is_empty());
    }
}
