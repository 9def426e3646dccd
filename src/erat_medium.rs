// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Crossing off multiples of medium sieving primes
//! (sieve_size * FACTOR_ERATSMALL < p <= sieve_size * FACTOR_ERATMEDIUM).
//!
//! A medium prime hits a segment a handful of times, so unrolling
//! whole rotations buys nothing: each multiple is crossed off with a
//! single wheel-table dispatch.

use crate::wheel::{WheelPrime, WHEEL30};

pub struct EratMedium {
    limit: u64,
    primes: Vec<WheelPrime>,
}

impl EratMedium {
    pub fn new(limit: u64) -> EratMedium {
        EratMedium {
            limit,
            primes: Vec::new(),
        }
    }

    pub fn add(&mut self, p: u64, multiple_index: u64, wheel_index: usize) {
        debug_assert!(p <= self.limit);
        self.primes
            .push(WheelPrime::new(p, multiple_index as usize, wheel_index));
    }

    pub fn cross_off(&mut self, sieve: &mut [u8]) {
        let slen = sieve.len();
        for wp in self.primes.iter_mut() {
            let t = wp.div30 as usize;
            let mut off = wp.multiple_index();
            let mut wi = wp.wheel_index();
            while off < slen {
                let e = &WHEEL30[wi];
                unsafe {
                    *sieve.get_unchecked_mut(off) &= e.unset_bit;
                }
                off += e.factor as usize * t + e.correct as usize;
                wi = e.next as usize;
            }
            wp.update(off - slen, wi);
        }
    }
}

#[test]
fn test_cross_off_segments() {
    use crate::erat_small::naive_segment;
    use crate::wheel;

    // Primes close to the segment length: 0 to 2 hits per segment.
    let primes = [311u64, 1013];
    let mut erat = EratMedium::new(2000);
    for &p in &primes {
        let (byte, wi) = wheel::first_multiple(p, 0);
        erat.add(p, byte, wi);
    }
    for seg in 0..200u64 {
        let low = seg * 30 * 256;
        let mut sieve = vec![0xffu8; 256];
        erat.cross_off(&mut sieve);
        let expect = naive_segment(low, 256, &primes);
        assert_eq!(sieve, expect, "segment {}", seg);
    }
}
