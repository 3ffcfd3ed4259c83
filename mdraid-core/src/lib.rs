// vim: tw=80
//! mdraid: the request engine of a software RAID 4/5 virtual block device
//!
//! Upstream software issues byte-addressed reads and writes against a
//! single logical volume.  This crate translates each request into a
//! coordinated set of per-member I/Os, maintains XOR parity across
//! stripes, and scatters directly into the caller's buffers wherever
//! possible.
//!
//! The crate assumes a healthy array: every member present and working.
//! Degraded operation and rebuild belong to a higher layer, as do device
//! discovery, superblock parsing, and routing requests by RAID level.

pub mod member;
pub mod raid;
pub mod types;
pub mod util;

pub use crate::types::*;
pub use crate::util::*;
