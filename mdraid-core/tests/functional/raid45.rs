// vim: tw=80
//! Functional tests against real files

use std::{
    fs,
    os::unix::fs::FileExt,
    path::PathBuf,
    sync::Arc,
};

use divbuf::DivBufShared;
use mdraid_core::{
    member::Member,
    raid::{ParityLayout, Raid45, RaidLevel},
};
use pretty_assertions::assert_eq;
use rand::{Rng, thread_rng};
use rstest::rstest;
use tempfile::{Builder, TempDir};

/// 8 sector chunks: 4096 byte chunks
const CHUNKSIZE: u64 = 8;
const CS: usize = 4096;

/// Superblock space skipped on every member, in sectors
const DATA_OFFSET: u64 = 16;

struct Harness {
    vdev: Arc<Raid45>,
    paths: Vec<PathBuf>,
    n: usize,
    _tempdir: TempDir,
}

fn harness(n: usize, level: RaidLevel, layout: ParityLayout) -> Harness {
    let len = 1 << 26;  // 64 MB
    let tempdir = t!(Builder::new().prefix("test_raid45").tempdir());
    let mut paths = Vec::new();
    let members = (0..n).map(|i| {
        let mut fname = PathBuf::from(tempdir.path());
        fname.push(format!("member.{i}"));
        let file = t!(fs::File::create(&fname));
        t!(file.set_len(len));
        paths.push(fname.clone());
        t!(Member::open(&fname, DATA_OFFSET))
    }).collect::<Vec<_>>();
    let vdev = Arc::new(Raid45::create(level, layout, CHUNKSIZE, members));
    Harness { vdev, paths, n, _tempdir: tempdir }
}

/// One whole stripe of user data, in bytes
fn full_stripe(h: &Harness) -> usize {
    CS * (h.n - 1)
}

fn random_buf(len: usize) -> DivBufShared {
    let mut rng = thread_rng();
    let mut v = vec![0u8; len];
    for x in &mut v {
        *x = rng.gen();
    }
    DivBufShared::from(v)
}

async fn write_read(h: &Harness, wbuf: DivBufShared, offset: u64)
    -> DivBufShared
{
    let len = wbuf.len();
    t!(h.vdev.clone().write_at(wbuf.try_const().unwrap(), offset).await);
    let rbuf = DivBufShared::from(vec![0u8; len]);
    t!(h.vdev.clone().read_at(rbuf.try_mut().unwrap(), offset).await);
    rbuf
}

/// XOR every member's raw bytes over `[member_off, member_off + len)`;
/// an all-zero result means the parity there is consistent.
fn assert_parity(h: &Harness, member_off: u64, len: usize) {
    let mut acc = vec![0u8; len];
    for path in h.paths.iter() {
        let f = t!(fs::File::open(path));
        let mut buf = vec![0u8; len];
        t!(f.read_exact_at(&mut buf, member_off + DATA_OFFSET * 512));
        for (a, b) in acc.iter_mut().zip(buf.iter()) {
            *a ^= *b;
        }
    }
    assert!(acc.iter().all(|b| *b == 0),
            "parity mismatch at member offset {member_off}");
}

#[rstest]
#[case::left_sym(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric)]
#[case::right_sym(3, RaidLevel::Raid5, ParityLayout::RightSymmetric)]
#[case::left_asym(3, RaidLevel::Raid5, ParityLayout::LeftAsymmetric)]
#[case::right_asym(3, RaidLevel::Raid5, ParityLayout::RightAsymmetric)]
#[case::raid4(3, RaidLevel::Raid4, ParityLayout::LeftSymmetric)]
#[case::five_disks(5, RaidLevel::Raid5, ParityLayout::LeftSymmetric)]
#[tokio::test]
async fn write_read_one_stripe(#[case] n: usize, #[case] level: RaidLevel,
                               #[case] layout: ParityLayout)
{
    let h = harness(n, level, layout);
    let wbuf = random_buf(full_stripe(&h));
    let expected = wbuf.try_const().unwrap();
    let rbuf = write_read(&h, wbuf, 0).await;
    assert_eq!(expected[..], rbuf.try_const().unwrap()[..]);
    assert_parity(&h, 0, CS);
}

#[rstest]
#[case::left_sym(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric)]
#[case::right_asym(3, RaidLevel::Raid5, ParityLayout::RightAsymmetric)]
#[case::raid4(3, RaidLevel::Raid4, ParityLayout::LeftSymmetric)]
#[case::five_disks(5, RaidLevel::Raid5, ParityLayout::RightSymmetric)]
#[tokio::test]
async fn write_read_many_stripes(#[case] n: usize, #[case] level: RaidLevel,
                                 #[case] layout: ParityLayout)
{
    // Enough rows for the parity to rotate all the way around
    let stripes = n + 2;
    let h = harness(n, level, layout);
    let wbuf = random_buf(stripes * full_stripe(&h));
    let expected = wbuf.try_const().unwrap();
    let rbuf = write_read(&h, wbuf, 0).await;
    assert_eq!(expected[..], rbuf.try_const().unwrap()[..]);
    assert_parity(&h, 0, stripes * CS);
}

// Sector-aligned but not stripe-aligned: the ragged edges reach the
// data members immediately and their parity appears after a flush.
#[rstest]
#[case::left_sym(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric)]
#[case::left_asym(3, RaidLevel::Raid5, ParityLayout::LeftAsymmetric)]
#[case::raid4(3, RaidLevel::Raid4, ParityLayout::LeftSymmetric)]
#[tokio::test]
async fn write_read_unaligned(#[case] n: usize, #[case] level: RaidLevel,
                              #[case] layout: ParityLayout)
{
    let h = harness(n, level, layout);
    let full = full_stripe(&h);
    let offset = 512;
    let len = 2 * full;
    let wbuf = random_buf(len);
    let expected = wbuf.try_const().unwrap();
    let rbuf = write_read(&h, wbuf, offset).await;
    assert_eq!(expected[..], rbuf.try_const().unwrap()[..]);

    t!(h.vdev.clone().flush_partials().await);
    assert!(h.vdev.partial_chunks().is_empty());
    assert_parity(&h, 0, 3 * CS);
}

// A single-sector write takes the fast path; its parity materializes at
// flush (over otherwise untouched, all-zero stripes).
#[tokio::test]
async fn sector_write_then_flush() {
    let h = harness(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric);
    let wbuf = random_buf(512);
    let expected = wbuf.try_const().unwrap();
    let rbuf = write_read(&h, wbuf, 0).await;
    assert_eq!(expected[..], rbuf.try_const().unwrap()[..]);

    t!(h.vdev.clone().flush_partials().await);
    assert_parity(&h, 0, CS);
}

// A small read within one chunk reuses the caller's buffer directly
#[tokio::test]
async fn read_fast_path() {
    let h = harness(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric);
    let wbuf = random_buf(full_stripe(&h));
    let expected = wbuf.try_const().unwrap();
    t!(h.vdev.clone().write_at(wbuf.try_const().unwrap(), 0).await);

    let rbuf = DivBufShared::from(vec![0u8; 512]);
    t!(h.vdev.clone().read_at(rbuf.try_mut().unwrap(), 1024).await);
    assert_eq!(expected[1024..1536], rbuf.try_const().unwrap()[..]);
}

// Writes spanning several requests still leave a consistent array
#[tokio::test]
async fn interleaved_requests() {
    let h = harness(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric);
    let full = full_stripe(&h);
    let wbuf0 = random_buf(full);
    let wbuf1 = random_buf(full);
    let e0 = wbuf0.try_const().unwrap();
    let e1 = wbuf1.try_const().unwrap();
    let fut0 = h.vdev.clone().write_at(wbuf0.try_const().unwrap(), 0);
    let fut1 = h.vdev.clone()
        .write_at(wbuf1.try_const().unwrap(), full as u64);
    let (r0, r1) = futures::join!(fut0, fut1);
    t!(r0);
    t!(r1);

    let rbuf = DivBufShared::from(vec![0u8; 2 * full]);
    t!(h.vdev.clone().read_at(rbuf.try_mut().unwrap(), 0).await);
    let rb = rbuf.try_const().unwrap();
    assert_eq!(e0[..], rb[..full]);
    assert_eq!(e1[..], rb[full..]);
    assert_parity(&h, 0, 2 * CS);
}

#[tokio::test]
async fn sync_all() {
    let h = harness(3, RaidLevel::Raid5, ParityLayout::LeftSymmetric);
    let wbuf = random_buf(full_stripe(&h));
    t!(h.vdev.clone().write_at(wbuf.try_const().unwrap(), 0).await);
    t!(h.vdev.sync_all().await);
}
