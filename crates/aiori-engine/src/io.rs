//! Extent and memory descriptors for array I/O.
//!
//! An I/O request pairs an [`ArrayIod`] (which byte ranges of the array) with
//! a scatter-gather list (which memory regions). The engine walks both in
//! order; their total lengths must match.

use serde::{Deserialize, Serialize};

/// A contiguous range of array cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayRange {
    /// First cell of the range.
    pub index: u64,
    /// Number of cells.
    pub len: u64,
}

impl ArrayRange {
    pub fn new(index: u64, len: u64) -> Self {
        Self { index, len }
    }

    /// One past the last cell, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.index.checked_add(self.len)
    }
}

/// Array I/O descriptor: the set of ranges touched by one request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayIod {
    pub ranges: Vec<ArrayRange>,
}

impl ArrayIod {
    /// Descriptor for the single extent `[offset, offset + len)`.
    pub fn single(offset: u64, len: u64) -> Self {
        Self {
            ranges: vec![ArrayRange::new(offset, len)],
        }
    }

    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(|r| r.len).sum()
    }
}

/// Read-only scatter-gather list used as the source of a write.
#[derive(Debug, Default)]
pub struct SgList<'a> {
    pub iovs: Vec<&'a [u8]>,
}

impl<'a> SgList<'a> {
    pub fn single(buf: &'a [u8]) -> Self {
        Self { iovs: vec![buf] }
    }

    pub fn total_len(&self) -> u64 {
        self.iovs.iter().map(|iov| iov.len() as u64).sum()
    }
}

/// Writable scatter-gather list used as the destination of a read.
#[derive(Debug, Default)]
pub struct SgListMut<'a> {
    pub iovs: Vec<&'a mut [u8]>,
}

impl<'a> SgListMut<'a> {
    pub fn single(buf: &'a mut [u8]) -> Self {
        Self { iovs: vec![buf] }
    }

    pub fn total_len(&self) -> u64 {
        self.iovs.iter().map(|iov| iov.len() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_extent() {
        let iod = ArrayIod::single(4096, 100);
        assert_eq!(iod.ranges.len(), 1);
        assert_eq!(iod.ranges[0].end(), Some(4196));
        assert_eq!(iod.total_len(), 100);
    }

    #[test]
    fn overflowing_range_has_no_end() {
        assert_eq!(ArrayRange::new(u64::MAX, 2).end(), None);
    }

    #[test]
    fn sgl_lengths() {
        let a = [0u8; 3];
        let b = [0u8; 5];
        let sgl = SgList { iovs: vec![&a, &b] };
        assert_eq!(sgl.total_len(), 8);

        let mut c = [0u8; 7];
        assert_eq!(SgListMut::single(&mut c).total_len(), 7);
    }
}
