// vim: tw=80

use std::{
    ops::Deref,
    pin::Pin,
    sync::Arc,
};

use divbuf::DivBufShared;
use futures::{
    Future,
    StreamExt,
    stream::FuturesUnordered,
};
use futures_locks::{RwLock, RwLockWriteGuard};
use mockall_double::double;
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    member::BoxMemberFut,
    types::*,
    util::*,
};
use super::{
    layout::*,
    partial::*,
    xor,
};

#[double]
use crate::member::Member;

/// Future representing one whole logical request against the array.
pub type BoxRaidFut = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Persisted geometry of one array
#[derive(Serialize, Deserialize, Debug)]
pub struct Label {
    /// Array UUID, fixed at assembly time
    pub uuid:       Uuid,
    pub level:      RaidLevel,
    /// Raw parity layout code, as a superblock stores it
    pub layout:     u32,
    /// Chunk size in sectors
    pub chunksize:  u64,
    pub raid_disks: u32,
}

/// One child I/O: a contiguous byte range on one member, backed by a
/// scatter list sharing the request's pages.
///
/// `T` is `IoVec` for writes and `IoVecMut` for reads.  Everything a
/// child owns, including its share of the buffers, is released when it
/// drops, on every path.
struct ChildIo<T> {
    disk: usize,

    /// Member-relative byte offset where the range starts
    start: u64,

    sglist: Vec<T>,
}

/// Accumulates per-member runs during a planning walk.
///
/// A new run opens whenever a member's next chunk is not contiguous
/// with its previous one, i.e. a chunk of that member was skipped in
/// between.  Each finished run becomes one child I/O.
struct RunBuilder<T> {
    runs: Vec<Vec<ChildIo<T>>>,
    next: Vec<u64>,
}

impl<T: Deref<Target=[u8]>> RunBuilder<T> {
    fn new(raid_disks: usize) -> Self {
        let mut runs = Vec::with_capacity(raid_disks);
        runs.resize_with(raid_disks, Vec::new);
        RunBuilder { runs, next: vec![0; raid_disks] }
    }

    fn push(&mut self, disk: usize, off: u64, seg: T) {
        let end = off + seg.len() as u64;
        let contiguous = !self.runs[disk].is_empty() &&
            self.next[disk] == off;
        if !contiguous {
            self.runs[disk].push(
                ChildIo { disk, start: off, sglist: Vec::new() });
        }
        self.runs[disk].last_mut().unwrap().sglist.push(seg);
        self.next[disk] = end;
    }

    /// All runs, in ascending member order and ascending offset within
    /// each member.  That is the order they'll be dispatched in.
    fn into_children(self) -> Vec<ChildIo<T>> {
        self.runs.into_iter().flatten().collect()
    }
}

/// Split a multi-chunk read into per-member child I/Os.
///
/// Walks the data chunks of `[offset, offset + buf.len())` in logical
/// order, handing each member the slices of `buf` that land on it.
/// Parity chunks are never read; where one interrupts a member's data,
/// that member's run is split so every child stays contiguous.
fn plan_read(geom: &Geometry, mut buf: IoVecMut, offset: u64)
    -> Vec<ChildIo<IoVecMut>>
{
    let stripe_length = geom.stripe_length();
    let end = offset + buf.len() as u64;
    let mut rb = RunBuilder::new(geom.raid_disks());
    let mut pos = offset;
    while pos < end {
        let chunk_end = ((pos / stripe_length + 1) * stripe_length).min(end);
        let (off, dpos) = geom.raid0_offset(pos);
        let disk = geom.physical_disk(dpos, geom.parity_disk(pos));
        rb.push(disk, off, buf.split_to((chunk_end - pos) as usize));
        pos = chunk_end;
    }
    debug_assert!(buf.is_empty());
    rb.into_children()
}

/// Split a multi-chunk write into per-member child I/Os, computing
/// parity for every whole stripe of `[parity_offset, parity_offset +
/// parity_length)`.
///
/// Data chunks come from the caller's buffer for the entire request,
/// ragged edges included; parity chunks come from a single accumulation
/// buffer covering the aligned range.  Rows outside the aligned range
/// get no parity here; that is the partial-chunk store's job at the
/// next flush.
fn plan_write(geom: &Geometry, mut buf: IoVec, offset: u64,
              parity_offset: u64, parity_length: u64)
    -> Result<Vec<ChildIo<IoVec>>>
{
    let stripe_length = geom.stripe_length();
    let cs = stripe_length as usize;
    let full = geom.full_stripe();
    let end = offset + buf.len() as u64;
    debug_assert_eq!(parity_offset % full, 0);
    debug_assert_eq!(parity_length % full, 0);

    // Accumulate parity for the whole operation into one buffer, one
    // chunk per whole stripe.
    let nstripes = (parity_length / full) as usize;
    let mut pvec = Vec::new();
    pvec.try_reserve_exact(nstripes * cs)?;
    pvec.resize(nstripes * cs, 0);
    let pbase = (parity_offset - offset) as usize;
    for s in 0..nstripes {
        let pchunk = &mut pvec[s * cs..(s + 1) * cs];
        for d in 0..geom.data_disks() {
            let at = pbase + s * full as usize + d * cs;
            if d == 0 {
                pchunk.copy_from_slice(&buf[at..at + cs]);
            } else {
                xor::xor_into(pchunk, &buf[at..at + cs]);
            }
        }
    }
    let pshared = DivBufShared::from(pvec);
    let mut pbuf = pshared.try_const().unwrap();

    // Walk the request row by row.  Each member takes at most one chunk
    // per row, so runs stay contiguous across whole-stripe rows and
    // split only at the ragged edges.
    let mut rb = RunBuilder::new(geom.raid_disks());
    let mut pos = offset;
    while pos < end {
        let row = pos / full;
        let row_end = ((row + 1) * full).min(end);
        let q = geom.parity_disk(pos);
        while pos < row_end {
            let chunk_end =
                ((pos / stripe_length + 1) * stripe_length).min(row_end);
            let (off, dpos) = geom.raid0_offset(pos);
            let disk = geom.physical_disk(dpos, q);
            rb.push(disk, off, buf.split_to((chunk_end - pos) as usize));
            pos = chunk_end;
        }
        let aligned = row * full >= parity_offset &&
            (row + 1) * full <= parity_offset + parity_length;
        if aligned {
            rb.push(q, row * stripe_length, pbuf.split_to(cs));
        }
    }
    debug_assert!(buf.is_empty());
    debug_assert!(pbuf.is_empty());
    Ok(rb.into_children())
}

/// Await every dispatched child; never abandon one in flight.
///
/// The request succeeds iff every child did.  Otherwise the last
/// observed failure becomes the request's status.
async fn await_all<F>(futs: FuturesUnordered<F>) -> Result<()>
    where F: Future<Output = Result<()>>
{
    let results: Vec<Result<()>> = futs.collect().await;
    let mut status = Ok(());
    for r in results {
        if let Err(e) = r {
            tracing::warn!(error = %e, "child I/O failed");
            status = Err(e);
        }
    }
    status
}

/// `Raid45`: the request engine of a RAID 4/5 array
///
/// Translates logical byte-addressed reads and writes into parallel
/// per-member I/O, maintains XOR parity, and stages ragged write edges
/// in the partial-chunk store until flush.
///
/// Every member must be present and healthy; degraded operation belongs
/// to a higher layer.
pub struct Raid45 {
    uuid: Uuid,
    level: RaidLevel,

    /// Raw layout code; validated on every request
    layout: u32,

    /// Chunk size in sectors
    chunksize: u64,

    /// Member disks.  Order is important!
    members: Box<[Member]>,

    /// Stripes whose parity is deferred to the next flush
    partial: PartialChunkStore,

    /// Held shared for the duration of every request; the exclusive
    /// side belongs to whoever reconfigures the array.
    lock: RwLock<()>,
}

impl Raid45 {
    /// Assemble a new array from its member disks.
    ///
    /// * `level`:      RAID personality.  RAID 4 ignores `layout`.
    /// * `layout`:     Parity placement rule for RAID 5.
    /// * `chunksize`:  Chunk size in sectors.  `chunksize * 512` must be
    ///                 a whole number of pages.
    /// * `members`:    Opened member disks, in array order.
    pub fn create(level: RaidLevel, layout: ParityLayout, chunksize: u64,
                  members: Vec<Member>)
        -> Self
    {
        assert!(members.len() >= 3, "RAID 4/5 needs at least 3 members");
        Raid45::new(Uuid::new_v4(), level, layout.to_raw(), chunksize,
                    members.into_boxed_slice())
    }

    /// Reassemble an existing array from its label.
    ///
    /// `members` must match `label.raid_disks` and be in label order;
    /// matching members to label slots is the discovery layer's job.
    pub fn open(label: Label, members: Vec<Member>) -> Self {
        assert_eq!(members.len(), label.raid_disks as usize,
                   "missing member devices");
        Raid45::new(label.uuid, label.level, label.layout, label.chunksize,
                    members.into_boxed_slice())
    }

    fn new(uuid: Uuid, level: RaidLevel, layout: u32, chunksize: u64,
           members: Box<[Member]>)
        -> Self
    {
        Raid45 {
            uuid,
            level,
            layout,
            chunksize,
            members,
            partial: PartialChunkStore::new(),
            lock: RwLock::new(()),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn label(&self) -> Label {
        Label {
            uuid: self.uuid,
            level: self.level,
            layout: self.layout,
            chunksize: self.chunksize,
            raid_disks: self.members.len() as u32,
        }
    }

    /// The array's partial-chunk store.
    pub fn partial_chunks(&self) -> &PartialChunkStore {
        &self.partial
    }

    /// Usable logical length of the array in bytes.
    ///
    /// The smallest member bounds every row; partial trailing chunks
    /// are unusable.
    pub fn size(&self) -> u64 {
        let chunk_bytes = self.chunksize * BYTES_PER_SECTOR as u64;
        let per_disk = self.members.iter().map(|m| m.size()).min().unwrap();
        (per_disk / chunk_bytes) * chunk_bytes *
            (self.members.len() - 1) as u64
    }

    /// Take the exclusive side of the request lock.
    ///
    /// While the returned guard lives, no new request makes progress.
    /// This is the hook for the component that owns reconfiguration.
    pub fn quiesce(&self) -> impl Future<Output = RwLockWriteGuard<()>> {
        self.lock.write()
    }

    fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.level, self.layout, self.members.len(),
                      self.chunksize)
    }

    /// Read `buf.len()` bytes from logical byte `offset` into `buf`.
    ///
    /// Members scatter directly into the caller's buffer; parity is
    /// never read.  A read confined to one chunk forwards the caller's
    /// buffer to that member unchanged, with no post-processing by the
    /// engine.
    pub fn read_at(self: Arc<Self>, buf: IoVecMut, offset: u64)
        -> BoxRaidFut
    {
        Box::pin(async move {
            assert!(!buf.is_empty());
            let _l = self.lock.read().await;
            let geom = self.geometry()?;
            let len = buf.len() as u64;
            tracing::debug!(offset, len, "read");

            let stripe_length = geom.stripe_length();
            if offset / stripe_length == (offset + len - 1) / stripe_length
            {
                let (off, dpos) = geom.raid0_offset(offset);
                let disk =
                    geom.physical_disk(dpos, geom.parity_disk(offset));
                return self.members[disk].read_at(buf, off).await;
            }

            let futs = plan_read(&geom, buf, offset).into_iter()
                .map(|c| self.members[c.disk].readv_at(c.sglist, c.start))
                .collect::<FuturesUnordered<BoxMemberFut>>();
            await_all(futs).await
        })
    }

    /// Write `buf` at logical byte `offset`.
    ///
    /// `offset` and `buf.len()` must be sector-aligned.  Parity is
    /// computed inline for every whole stripe covered.  Ragged head and
    /// tail bytes still go to the data members immediately, but their
    /// parity is staged in the partial-chunk store until the next
    /// flush.  A write confined to one chunk forwards the caller's
    /// buffer to that member unchanged.
    pub fn write_at(self: Arc<Self>, buf: IoVec, offset: u64) -> BoxRaidFut
    {
        Box::pin(async move {
            assert!(!buf.is_empty());
            let _l = self.lock.read().await;
            let geom = self.geometry()?;
            let len = buf.len() as u64;
            if offset % BYTES_PER_SECTOR as u64 != 0 ||
                len % BYTES_PER_SECTOR as u64 != 0
            {
                return Err(Error::InvalidParameter);
            }
            tracing::debug!(offset, len, "write");

            // Carve the ragged edges off the parity-producing range,
            // staging them for deferred parity.
            let full = geom.full_stripe();
            let mut parity_offset = offset;
            let mut parity_length = len;
            if offset % full != 0 {
                let head_ragged = (full - offset % full).min(len);
                self.partial.add(full, offset,
                                 &buf[..head_ragged as usize])?;
                parity_offset += head_ragged;
                parity_length -= head_ragged;
            }
            if parity_length % full != 0 {
                let tail_ragged = parity_length % full;
                let tail_off = parity_offset + parity_length - tail_ragged;
                let at = (tail_off - offset) as usize;
                self.partial.add(full, tail_off,
                                 &buf[at..at + tail_ragged as usize])?;
                parity_length -= tail_ragged;
            }

            let stripe_length = geom.stripe_length();
            if offset / stripe_length == (offset + len - 1) / stripe_length
            {
                // A single-chunk write never produces inline parity;
                // the whole payload was staged above.
                debug_assert_eq!(parity_length, 0);
                let (off, dpos) = geom.raid0_offset(offset);
                let disk =
                    geom.physical_disk(dpos, geom.parity_disk(offset));
                return self.members[disk].write_at(buf, off).await;
            }

            let children = plan_write(&geom, buf, offset, parity_offset,
                                      parity_length)?;
            let futs = children.into_iter()
                .map(|c| self.members[c.disk].writev_at(c.sglist, c.start))
                .collect::<FuturesUnordered<BoxMemberFut>>();
            await_all(futs).await
        })
    }

    /// Compute and write parity for one staged stripe.
    ///
    /// For each maximal run of populated sectors, parity over the data
    /// chunks accumulates into the first chunk's live bytes (destroying
    /// them), and only those sector runs are written, to the parity
    /// member alone, in parallel.
    pub fn flush_partial_chunk(self: Arc<Self>, pc: PartialChunk)
        -> BoxRaidFut
    {
        Box::pin(async move {
            let _l = self.lock.read().await;
            let geom = self.geometry()?;
            let cs = geom.stripe_length() as usize;
            let runs = pc.parity_sector_runs(cs / BYTES_PER_SECTOR);
            let (stripe_base, mut data, _valid) = pc.into_parts();
            tracing::debug!(stripe_base, nruns = runs.len(),
                            "flush partial chunk");
            let q = geom.parity_disk(stripe_base);

            let (acc, rest) = data.split_at_mut(cs);
            for &(sector, nsectors) in &runs {
                let at = sector * BYTES_PER_SECTOR;
                let len = nsectors * BYTES_PER_SECTOR;
                for d in 1..geom.data_disks() {
                    let chunk = &rest[(d - 1) * cs..d * cs];
                    xor::xor_into(&mut acc[at..at + len],
                                  &chunk[at..at + len]);
                }
            }

            let dbs = DivBufShared::from(data);
            let db = dbs.try_const().unwrap();
            let member_base = stripe_base / geom.data_disks() as u64;
            let futs = runs.iter()
                .map(|&(sector, nsectors)| {
                    let at = sector * BYTES_PER_SECTOR;
                    let len = nsectors * BYTES_PER_SECTOR;
                    self.members[q].write_at(db.slice(at, at + len),
                                             member_base + at as u64)
                }).collect::<FuturesUnordered<BoxMemberFut>>();
            await_all(futs).await
        })
    }

    /// Flush every staged partial chunk.
    pub fn flush_partials(self: Arc<Self>) -> BoxRaidFut {
        Box::pin(async move {
            let futs = self.partial.take_all().into_iter()
                .map(|pc| self.clone().flush_partial_chunk(pc))
                .collect::<FuturesUnordered<BoxRaidFut>>();
            await_all(futs).await
        })
    }

    /// Flush all members to stable storage.
    pub fn sync_all(&self) -> BoxRaidFut {
        debug_assert!(self.partial.is_empty(),
                      "Must flush partial chunks before sync_all");
        let futs = self.members.iter()
            .map(|m| m.sync_all())
            .collect::<FuturesUnordered<BoxMemberFut>>();
        Box::pin(await_all(futs))
    }
}
