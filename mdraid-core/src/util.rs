// vim: tw=80
//! Common utility functions used throughout mdraid

/// Size in bytes of one disk sector.  Writes must be aligned to this
/// granularity, and the partial-chunk validity bitmap tracks it.
pub const BYTES_PER_SECTOR: usize = 512;

/// Page size assumed by chunk validation.  A chunk must be a whole number
/// of pages so that stripe arithmetic never splits a page across members.
pub const PAGE_SIZE: usize = 4096;

/// Divide two unsigned numbers (usually integers), rounding up.
pub fn div_roundup(dividend: u64, divisor: u64) -> u64 {
    (dividend + divisor - 1) / divisor
}

/// Return the length of data in an sglist, not the number of iovecs
pub fn sglist_len<T>(sglist: &[T]) -> usize
    where T: std::ops::Deref<Target=[u8]>
{
    sglist.iter().fold(0usize, |accumulator, buf| {
        accumulator + buf.len()
    })
}

// LCOV_EXCL_STOP
