// vim: tw=80
//! XOR parity kernel
//!
//! Single-redundancy arrays need nothing stronger than XOR, so this is
//! the whole codec.  Accumulation starts with a plain copy of the first
//! data column; every further column is folded in here.

/// `dst[i] ^= src[i]` for every byte.
///
/// The slices must be the same length.  Works in u64 lanes where the
/// length allows, one byte at a time for the tail.
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    let mut dchunks = dst.chunks_exact_mut(8);
    let mut schunks = src.chunks_exact(8);
    for (d, s) in (&mut dchunks).zip(&mut schunks) {
        let x = u64::from_ne_bytes(<[u8; 8]>::try_from(&*d).unwrap())
            ^ u64::from_ne_bytes(<[u8; 8]>::try_from(s).unwrap());
        d.copy_from_slice(&x.to_ne_bytes());
    }
    for (d, s) in dchunks.into_remainder().iter_mut()
        .zip(schunks.remainder())
    {
        *d ^= *s;
    }
}

// LCOV_EXCL_STOP
