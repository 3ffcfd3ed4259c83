// vim: tw=80
//! Member disks
//!
//! A `Member` is one component disk of an array.  It accepts positioned,
//! possibly vectored I/O against its data area and adds its own data
//! offset before anything reaches the underlying device, so the engine
//! above it works purely in member-relative byte offsets.
//!
//! Each operation becomes one future; creating the future issues the I/O
//! and awaiting it observes the completion status.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
    pin::Pin,
    sync::Arc,
};

use futures::Future;
#[cfg(test)] use mockall::mock;
use tokio::task;

use crate::{
    types::*,
    util::*,
};

/// Future representing one child I/O on a member disk.
pub type BoxMemberFut =
    Pin<Box<dyn Future<Output = Result<()>> + Send + Sync>>;

/// One component disk of an array.
pub struct Member {
    file: Arc<File>,

    /// Offset of this member's data area, in sectors
    data_offset: u64,

    /// Length of the data area, in bytes
    size: u64,
}

impl Member {
    /// Open a member disk backed by a file or block device.
    ///
    /// `data_offset` is in sectors; everything before it belongs to the
    /// superblock and is never touched by this layer.
    pub fn open<P: AsRef<Path>>(path: P, data_offset: u64)
        -> io::Result<Self>
    {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let size = len.saturating_sub(data_offset * BYTES_PER_SECTOR as u64);
        Ok(Member { file: Arc::new(file), data_offset, size })
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Length of the data area in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    fn resolve(&self, off: u64) -> u64 {
        off + self.data_offset * BYTES_PER_SECTOR as u64
    }

    /// Asynchronously read a contiguous range into `buf`.
    pub fn read_at(&self, mut buf: IoVecMut, off: u64) -> BoxMemberFut {
        let file = self.file.clone();
        let pos = self.resolve(off);
        run_blocking(move || file.read_exact_at(&mut buf[..], pos))
    }

    /// Asynchronously read a contiguous range, scattering into `bufs`.
    #[tracing::instrument(skip(self, bufs))]
    pub fn readv_at(&self, mut bufs: SGListMut, off: u64) -> BoxMemberFut {
        let file = self.file.clone();
        let mut pos = self.resolve(off);
        run_blocking(move || {
            for buf in bufs.iter_mut() {
                file.read_exact_at(&mut buf[..], pos)?;
                pos += buf.len() as u64;
            }
            Ok(())
        })
    }

    /// Asynchronously write a contiguous range from `buf`.
    pub fn write_at(&self, buf: IoVec, off: u64) -> BoxMemberFut {
        let file = self.file.clone();
        let pos = self.resolve(off);
        run_blocking(move || file.write_all_at(&buf[..], pos))
    }

    /// Asynchronously write a contiguous range, gathering from `bufs`.
    #[tracing::instrument(skip(self, bufs))]
    pub fn writev_at(&self, bufs: SGList, off: u64) -> BoxMemberFut {
        let file = self.file.clone();
        let mut pos = self.resolve(off);
        run_blocking(move || {
            for buf in bufs.iter() {
                file.write_all_at(&buf[..], pos)?;
                pos += buf.len() as u64;
            }
            Ok(())
        })
    }

    /// Flush this member's written data to stable storage.
    pub fn sync_all(&self) -> BoxMemberFut {
        let file = self.file.clone();
        run_blocking(move || file.sync_data())
    }
}

/// Run one positioned I/O on the blocking pool and adapt its status.
fn run_blocking<F>(f: F) -> BoxMemberFut
    where F: FnOnce() -> io::Result<()> + Send + 'static
{
    let jh = task::spawn_blocking(f);
    Box::pin(async move {
        match jh.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::from(e)),
            // The blocking task can only die if the runtime is shutting
            // down.
            Err(_) => Err(Error::InternalError),
        }
    })
}

// LCOV_EXCL_START
#[cfg(test)]
mock! {
    pub Member {
        pub fn data_offset(&self) -> u64;
        pub fn size(&self) -> u64;
        pub fn read_at(&self, buf: IoVecMut, off: u64) -> BoxMemberFut;
        pub fn readv_at(&self, bufs: SGListMut, off: u64) -> BoxMemberFut;
        pub fn write_at(&self, buf: IoVec, off: u64) -> BoxMemberFut;
        pub fn writev_at(&self, bufs: SGList, off: u64) -> BoxMemberFut;
        pub fn sync_all(&self) -> BoxMemberFut;
    }
}
// LCOV_EXCL_STOP
