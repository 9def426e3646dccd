// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Pre-sieving: segments are not zeroed but initialized from a
//! precomputed tile in which the multiples of all primes up to the
//! pre-sieve limit are already crossed off. The tile period is the
//! primorial of the limit divided by 30 (one byte per 30 numbers), so a
//! rotated copy aligns it with any 30-aligned segment base.
//!
//! The tile also crosses off the pre-sieve primes themselves (7 is a
//! multiple of 7): the engine restores them in the first segment when
//! start is small enough for them to be in range.

use crate::wheel;
use crate::SieveError;

/// Primes eligible for pre-sieving; 2, 3, 5 are handled by the wheel.
const PRE_PRIMES: [u64; 6] = [7, 11, 13, 17, 19, 23];

pub struct PreSieve {
    limit: u32,
    tile: Vec<u8>,
}

impl PreSieve {
    /// Builds the tile for all primes <= limit, limit in [13, 23].
    /// Tile sizes are 1001 bytes (13) up to ~7.1 MiB (23).
    pub fn new(limit: u32) -> Result<PreSieve, SieveError> {
        if !(13..=23).contains(&limit) {
            return Err(SieveError::PreSieveOutOfBounds(limit));
        }
        let primes: Vec<u64> = PRE_PRIMES
            .iter()
            .copied()
            .filter(|&p| p <= limit as u64)
            .collect();
        let len = primes.iter().product::<u64>() as usize;
        let mut tile = Vec::new();
        tile.try_reserve_exact(len)
            .map_err(|_| SieveError::AllocationFailed)?;
        tile.resize(len, 0xffu8);
        let span = 30 * len as u64;
        // Gaps of the coprime-to-30 sequence starting at 1
        // (1, 7, 11, 13, 17, 19, 23, 29, 31, 37, ...).
        const QGAPS: [u64; 8] = [6, 4, 2, 4, 2, 4, 6, 2];
        for &p in &primes {
            // Cross off p*q for every q coprime to 30, q = 1 included:
            // the tile is aligned on a multiple of the primorial, so
            // position p stands for a number divisible by p.
            let mut q = 1u64;
            let mut gi = 0;
            loop {
                let m = p * q;
                if m >= span {
                    break;
                }
                let r = wheel::byte_remainder(m);
                tile[((m - r) / 30) as usize] &= !(1u8 << wheel::bit_index(r));
                q += QGAPS[gi];
                gi = (gi + 1) & 7;
            }
        }
        Ok(PreSieve { limit, tile })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Overwrites the segment with the tile, rotated so that byte 0
    /// matches segment_low.
    pub fn apply(&self, sieve: &mut [u8], segment_low: u64) {
        debug_assert!(segment_low % 30 == 0);
        let tlen = self.tile.len();
        let mut off = ((segment_low / 30) % tlen as u64) as usize;
        let mut i = 0;
        while i < sieve.len() {
            let n = (tlen - off).min(sieve.len() - i);
            sieve[i..i + n].copy_from_slice(&self.tile[off..off + n]);
            i += n;
            off = 0;
        }
    }
}

#[test]
fn test_tile_13() {
    use crate::wheel::BIT_VALUES;

    let ps = PreSieve::new(13).unwrap();
    assert_eq!(ps.tile.len(), 7 * 11 * 13);
    // Bit (i, b) must be clear iff 30*i + BIT_VALUES[b] is divisible
    // by 7, 11 or 13.
    for (i, &byte) in ps.tile.iter().enumerate() {
        for (b, &v) in BIT_VALUES.iter().enumerate() {
            let n = 30 * i as u64 + v;
            let composite = n % 7 == 0 || n % 11 == 0 || n % 13 == 0;
            assert_eq!(
                byte & (1 << b) == 0,
                composite,
                "n={} byte={} bit={}",
                n,
                i,
                b
            );
        }
    }
}

#[test]
fn test_apply_rotation() {
    let ps = PreSieve::new(13).unwrap();
    let mut seg = vec![0u8; 256];
    // Rotation by a full tile period is the identity.
    ps.apply(&mut seg, 0);
    let plain = seg.clone();
    ps.apply(&mut seg, 30 * 1001);
    assert_eq!(seg, plain);
    // Rotation by one byte shifts the pattern.
    ps.apply(&mut seg, 30);
    assert_eq!(seg[..255], plain[1..256]);
}

#[test]
fn test_limits() {
    assert!(PreSieve::new(12).is_err());
    assert!(PreSieve::new(24).is_err());
    for limit in [13, 17, 19, 23] {
        let ps = PreSieve::new(limit).unwrap();
        assert_eq!(ps.limit(), limit);
    }
}
