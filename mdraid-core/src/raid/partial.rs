// vim: tw=80
//! Staging for writes that don't cover a whole stripe
//!
//! A write whose edges are not stripe-aligned still sends its data to
//! the data members immediately, but the affected stripes' parity can't
//! be computed from the request alone.  The ragged bytes are staged
//! here, keyed by stripe, until a flush assembles parity over them and
//! writes only the populated sector runs to the parity member.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::Mutex,
};

use fixedbitset::FixedBitSet;

use crate::{
    types::*,
    util::*,
};

/// In-memory staging of one stripe's not-yet-parity-covered writes
///
/// `data` spans the stripe's whole logical extent.  `valid` has one bit
/// per sector, set iff the sector has been populated since the chunk was
/// created.  Bytes whose bit is clear are undefined and must never reach
/// parity.
pub struct PartialChunk {
    /// Logical byte offset of the start of the stripe
    offset: u64,
    data: Vec<u8>,
    valid: FixedBitSet,
}

impl PartialChunk {
    fn new(offset: u64, stripe_bytes: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(stripe_bytes)?;
        data.resize(stripe_bytes, 0);
        let valid = FixedBitSet::with_capacity(
            stripe_bytes / BYTES_PER_SECTOR);
        Ok(PartialChunk { offset, data, valid })
    }

    /// Logical byte offset of the start of the stripe
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Maximal runs of populated sectors, as `(first_sector, nsectors)`
    pub fn sector_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start = None;
        for sector in 0..self.valid.len() {
            match (start, self.valid.contains(sector)) {
                (None, true) => start = Some(sector),
                (Some(s), false) => {
                    runs.push((s, sector - s));
                    start = None;
                }
                _ => ()
            }
        }
        if let Some(s) = start {
            runs.push((s, self.valid.len() - s));
        }
        runs
    }

    /// Maximal runs of parity sectors needing a rewrite, as
    /// `(first_sector, nsectors)` in chunk-sector space.
    ///
    /// Parity sector `i` covers sector `i` of every data chunk, so it
    /// is stale iff any data chunk's sector `i` has been populated.
    /// `chunk_sectors` is the length of one chunk in sectors.
    pub fn parity_sector_runs(&self, chunk_sectors: usize)
        -> Vec<(usize, usize)>
    {
        debug_assert_eq!(self.valid.len() % chunk_sectors, 0);
        let stale = |sector: usize| {
            (0..self.valid.len() / chunk_sectors)
                .any(|d| self.valid.contains(d * chunk_sectors + sector))
        };
        let mut runs = Vec::new();
        let mut start = None;
        for sector in 0..chunk_sectors {
            match (start, stale(sector)) {
                (None, true) => start = Some(sector),
                (Some(s), false) => {
                    runs.push((s, sector - s));
                    start = None;
                }
                _ => ()
            }
        }
        if let Some(s) = start {
            runs.push((s, chunk_sectors - s));
        }
        runs
    }

    /// Tear down into `(stripe offset, staged bytes, validity bitmap)`.
    pub fn into_parts(self) -> (u64, Vec<u8>, FixedBitSet) {
        (self.offset, self.data, self.valid)
    }
}

/// Partial-chunk store, shared by every request against the array
///
/// Internally synchronized; the engine reaches it through a shared
/// reference.
#[derive(Default)]
pub struct PartialChunkStore {
    chunks: Mutex<BTreeMap<u64, PartialChunk>>,
}

impl PartialChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `bytes`, written at logical byte `offset`, into the chunk
    /// of the containing stripe.  `full_stripe` is the stripe's logical
    /// extent in bytes.
    ///
    /// Sectors may be staged more than once; the last write wins.
    pub fn add(&self, full_stripe: u64, offset: u64, bytes: &[u8])
        -> Result<()>
    {
        debug_assert_eq!(offset % BYTES_PER_SECTOR as u64, 0);
        debug_assert_eq!(bytes.len() % BYTES_PER_SECTOR, 0);
        let base = offset - offset % full_stripe;
        debug_assert!(offset + bytes.len() as u64 <= base + full_stripe);
        let mut chunks = self.chunks.lock().unwrap();
        let pc = match chunks.entry(base) {
            Entry::Occupied(oe) => oe.into_mut(),
            Entry::Vacant(ve) =>
                ve.insert(PartialChunk::new(base, full_stripe as usize)?),
        };
        let at = (offset - base) as usize;
        pc.data[at..at + bytes.len()].copy_from_slice(bytes);
        pc.valid.set_range(
            at / BYTES_PER_SECTOR..(at + bytes.len()) / BYTES_PER_SECTOR,
            true);
        Ok(())
    }

    /// Remove and return the chunk staging the stripe at `stripe_base`,
    /// if any.
    pub fn take(&self, stripe_base: u64) -> Option<PartialChunk> {
        self.chunks.lock().unwrap().remove(&stripe_base)
    }

    /// Remove and return every staged chunk, in stripe order.
    pub fn take_all(&self) -> Vec<PartialChunk> {
        let mut chunks = self.chunks.lock().unwrap();
        std::mem::take(&mut *chunks).into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().unwrap().is_empty()
    }
}

// LCOV_EXCL_STOP
