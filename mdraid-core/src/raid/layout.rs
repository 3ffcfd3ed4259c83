// vim: tw=80
//! Stripe geometry for RAID 4/5 arrays
//!
//! Pure mapping from logical byte offsets to `(member, member offset)`
//! pairs, covering the four RAID 5 parity rotations plus RAID 4's fixed
//! parity disk.  Nothing here touches I/O; the request planner drives
//! these functions.

use serde_derive::{Deserialize, Serialize};

use crate::{
    types::*,
    util::*,
};

/// RAID personality of an array
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RaidLevel {
    /// Dedicated parity on the last member
    Raid4,
    /// Rotating parity
    Raid5,
}

/// Parity placement rule for RAID 5
///
/// The discriminants are the layout codes used by md-format superblocks,
/// which is also how an array's label stores its layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ParityLayout {
    LeftAsymmetric = 0,
    RightAsymmetric = 1,
    LeftSymmetric = 2,
    RightSymmetric = 3,
}

impl ParityLayout {
    /// Decode an on-disk layout code.
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(ParityLayout::LeftAsymmetric),
            1 => Ok(ParityLayout::RightAsymmetric),
            2 => Ok(ParityLayout::LeftSymmetric),
            3 => Ok(ParityLayout::RightSymmetric),
            _ => Err(Error::InvalidDeviceRequest),
        }
    }

    pub fn to_raw(self) -> u32 {
        self as u32
    }

    fn is_left(self) -> bool {
        matches!(self,
                 ParityLayout::LeftAsymmetric | ParityLayout::LeftSymmetric)
    }

    fn is_symmetric(self) -> bool {
        matches!(self,
                 ParityLayout::LeftSymmetric | ParityLayout::RightSymmetric)
    }
}

/// Pure stripe-to-member mapping for one array
///
/// Constructed per request from the array's raw label fields, so that a
/// bad configuration surfaces as a request status rather than a panic.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    level: RaidLevel,
    layout: ParityLayout,
    raid_disks: usize,

    /// Length of one chunk in bytes
    stripe_length: u64,
}

impl Geometry {
    /// Validate an array's geometry.
    ///
    /// `chunksize` is in sectors and must describe a whole number of
    /// pages.  RAID 4 ignores the layout code; RAID 5 rejects codes it
    /// doesn't recognize.
    pub fn new(level: RaidLevel, raw_layout: u32, raid_disks: usize,
               chunksize: u64)
        -> Result<Self>
    {
        let layout = match level {
            RaidLevel::Raid5 => ParityLayout::from_raw(raw_layout)?,
            RaidLevel::Raid4 => ParityLayout::from_raw(raw_layout)
                .unwrap_or(ParityLayout::LeftSymmetric),
        };
        if chunksize == 0 ||
            (chunksize * BYTES_PER_SECTOR as u64) % PAGE_SIZE as u64 != 0
        {
            return Err(Error::InternalError);
        }
        debug_assert!(raid_disks >= 3);
        Ok(Geometry {
            level,
            layout,
            raid_disks,
            stripe_length: chunksize * BYTES_PER_SECTOR as u64,
        })
    }

    /// Length of one chunk in bytes
    pub fn stripe_length(&self) -> u64 {
        self.stripe_length
    }

    pub fn raid_disks(&self) -> usize {
        self.raid_disks
    }

    pub fn data_disks(&self) -> usize {
        self.raid_disks - 1
    }

    /// Logical bytes covered by one whole stripe
    pub fn full_stripe(&self) -> u64 {
        self.stripe_length * self.data_disks() as u64
    }

    /// Classic RAID 0 division over the data members: the member-relative
    /// byte offset and the data position within the stripe for logical
    /// byte `lbyte`.
    pub fn raid0_offset(&self, lbyte: u64) -> (u64, usize) {
        let chunk = lbyte / self.stripe_length;
        let pos = (chunk % self.data_disks() as u64) as usize;
        let off = (chunk / self.data_disks() as u64) * self.stripe_length
            + lbyte % self.stripe_length;
        (off, pos)
    }

    /// Member holding the parity chunk of the stripe containing `lbyte`.
    pub fn parity_disk(&self, lbyte: u64) -> usize {
        match self.level {
            RaidLevel::Raid4 => self.raid_disks - 1,
            RaidLevel::Raid5 => {
                let n = self.raid_disks as u64;
                let stripe = lbyte / self.full_stripe();
                if self.layout.is_left() {
                    (n - 1 - stripe % n) as usize
                } else {
                    (stripe % n) as usize
                }
            }
        }
    }

    /// Member holding data position `pos` of a stripe whose parity member
    /// is `parity`.
    ///
    /// Symmetric layouts rotate the data members starting just after the
    /// parity member; asymmetric layouts number them in member order,
    /// skipping the parity member.  RAID 4 uses the rotation, which with
    /// a fixed last-member parity degenerates to the identity.
    pub fn physical_disk(&self, pos: usize, parity: usize) -> usize {
        debug_assert!(pos < self.data_disks());
        debug_assert!(parity < self.raid_disks);
        let asymmetric = self.level == RaidLevel::Raid5 &&
            !self.layout.is_symmetric();
        if asymmetric {
            if pos < parity { pos } else { pos + 1 }
        } else {
            (parity + 1 + pos) % self.raid_disks
        }
    }
}

// LCOV_EXCL_STOP
