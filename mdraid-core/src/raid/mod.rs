// vim: tw=80
//! mdraid RAID 4/5 layer
//!
//! The request engine proper: stripe geometry, the XOR parity kernel,
//! the partial-chunk store, and the planner/executor that turns logical
//! reads and writes into parallel per-member I/O.

mod layout;
mod partial;
mod raid45;
mod xor;

pub use self::layout::{Geometry, ParityLayout, RaidLevel};
pub use self::partial::{PartialChunk, PartialChunkStore};
pub use self::raid45::{BoxRaidFut, Label, Raid45};
