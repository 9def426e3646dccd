// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The segmented sieve engine.
//!
//! The engine owns one segment buffer and processes [start, stop] one
//! segment at a time: the pre-sieve tile resets the bitmap, the three
//! size-class crossers remove the remaining composites, and the
//! finished bitmap is handed to the consumer callback.
//!
//! Sieving primes are pushed by the consumer in increasing order.
//! Segments are sieved lazily: a prime is only needed once the window
//! reaches its square, so add_sieving_prime first flushes all segments
//! below p^2. This keeps every first multiple within the bucket ring
//! of the big-prime crosser.

use num_integer::Roots;

use crate::erat_big::EratBig;
use crate::erat_medium::EratMedium;
use crate::erat_small::EratSmall;
use crate::presieve::PreSieve;
use crate::wheel::{self, byte_remainder, BIT_VALUES, NUMBERS_PER_BYTE};
use crate::{max_stop, params, SieveError};

/// Segmented sieve of Eratosthenes over [start, stop].
///
/// The callback receives each processed segment bitmap and its
/// segment_low; returning false stops the scan cleanly.
pub struct SieveEngine<F: FnMut(&[u8], u64) -> bool> {
    start: u64,
    stop: u64,
    sqrt_stop: u64,
    sieve_size: usize,
    segment_low: u64,
    segment_high: u64,
    sieve: Vec<u8>,
    pre_sieve: PreSieve,
    limit_small: u64,
    limit_medium: u64,
    small: Option<EratSmall>,
    medium: Option<EratMedium>,
    big: Option<EratBig>,
    callback: F,
    stopped: bool,
    finished: bool,
}

impl<F: FnMut(&[u8], u64) -> bool> SieveEngine<F> {
    /// sieve_size_kb is rounded down to a power of two and clamped to
    /// [1, 4096] KiB; pre_sieve_limit must lie in [13, 23].
    pub fn new(
        start: u64,
        stop: u64,
        sieve_size_kb: u32,
        pre_sieve_limit: u32,
        callback: F,
    ) -> Result<SieveEngine<F>, SieveError> {
        if start < 7 || start > stop {
            return Err(SieveError::InvalidRange { start, stop });
        }
        if stop > max_stop() {
            return Err(SieveError::StopTooLarge(stop));
        }
        if sieve_size_kb == 0 {
            return Err(SieveError::SieveSizeOutOfBounds(0));
        }
        let kb = (1u32 << (31 - sieve_size_kb.leading_zeros()))
            .clamp(params::MIN_SIEVE_KB, params::MAX_SIEVE_KB);
        let sieve_size = kb as usize * 1024;
        let sqrt_stop = stop.sqrt();
        // All children are built before any segment is sieved; a
        // failure here drops the ones already built.
        let pre_sieve = PreSieve::new(pre_sieve_limit)?;
        let mut sieve = Vec::new();
        sieve
            .try_reserve_exact(sieve_size)
            .map_err(|_| SieveError::AllocationFailed)?;
        sieve.resize(sieve_size, 0);
        let segment_low = start - byte_remainder(start);
        let segment_high = segment_low + NUMBERS_PER_BYTE * sieve_size as u64 + 1;
        let limit_small = (sieve_size as f64 * params::FACTOR_ERATSMALL) as u64;
        let limit_medium = (sieve_size as f64 * params::FACTOR_ERATMEDIUM) as u64;
        let small = (sqrt_stop > pre_sieve_limit as u64).then(|| EratSmall::new(limit_small));
        let medium = (sqrt_stop > limit_small).then(|| EratMedium::new(limit_medium));
        let big = if sqrt_stop > limit_medium {
            Some(EratBig::new(sieve_size, sqrt_stop)?)
        } else {
            None
        };
        Ok(SieveEngine {
            start,
            stop,
            sqrt_stop,
            sieve_size,
            segment_low,
            segment_high,
            sieve,
            pre_sieve,
            limit_small,
            limit_medium,
            small,
            medium,
            big,
            callback,
            stopped: false,
            finished: false,
        })
    }

    /// Upper bound for sieving primes: isqrt(stop).
    pub fn sqrt_stop(&self) -> u64 {
        self.sqrt_stop
    }

    /// Primes up to this limit are handled by pre-sieving and must not
    /// be added as sieving primes.
    pub fn pre_sieve_limit(&self) -> u32 {
        self.pre_sieve.limit()
    }

    /// Normalized segment buffer size in bytes.
    pub fn sieve_size(&self) -> usize {
        self.sieve_size
    }

    /// Registers the next sieving prime, in increasing order, with
    /// pre_sieve_limit() < p <= sqrt_stop(). Segments that no longer
    /// need p are sieved first.
    pub fn add_sieving_prime(&mut self, p: u64) -> Result<(), SieveError> {
        debug_assert!(p > self.pre_sieve.limit() as u64);
        debug_assert!(p <= self.sqrt_stop);
        if self.stopped {
            return Ok(());
        }
        let square = p * p;
        while self.segment_high < square {
            self.sieve_segment()?;
            if self.stopped {
                return Ok(());
            }
        }
        let (byte, wi) = wheel::first_multiple(p, self.segment_low);
        if p <= self.limit_small {
            debug_assert!(self.small.is_some());
            if let Some(small) = &mut self.small {
                small.add(p, byte, wi);
            }
        } else if p <= self.limit_medium {
            debug_assert!(self.medium.is_some());
            if let Some(medium) = &mut self.medium {
                medium.add(p, byte, wi);
            }
        } else {
            debug_assert!(self.big.is_some());
            if let Some(big) = &mut self.big {
                big.add(p, byte, wi)?;
            }
        }
        Ok(())
    }

    /// Sieves the remaining segments, truncating the last one at stop.
    /// All sieving primes up to sqrt_stop() must have been added.
    pub fn finish(&mut self) -> Result<(), SieveError> {
        if self.finished || self.stopped {
            return Ok(());
        }
        while self.segment_high < self.stop {
            self.sieve_segment()?;
            if self.stopped {
                return Ok(());
            }
        }
        // Last segment: shrink to the byte holding stop, clear the
        // bits above stop, and zero up to an 8 byte boundary so that
        // consumers can scan whole words.
        let r = byte_remainder(self.stop);
        let len = ((self.stop - r - self.segment_low) / NUMBERS_PER_BYTE) as usize + 1;
        debug_assert!(len <= self.sieve_size);
        self.pre_sieve_segment();
        self.cross_off()?;
        let mut i = 0;
        while i < 8 && BIT_VALUES[i] <= r {
            i += 1;
        }
        self.sieve[len - 1] &= !(0xffu16 << i) as u8;
        let padded = (len + 7) & !7;
        for b in &mut self.sieve[len..padded] {
            *b = 0;
        }
        self.finished = true;
        if !(self.callback)(&self.sieve[..padded], self.segment_low) {
            self.stopped = true;
        }
        Ok(())
    }

    /// Whether the consumer callback asked to stop.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    fn sieve_segment(&mut self) -> Result<(), SieveError> {
        self.pre_sieve_segment();
        self.cross_off()?;
        if !(self.callback)(&self.sieve[..], self.segment_low) {
            self.stopped = true;
        }
        self.segment_low += NUMBERS_PER_BYTE * self.sieve_size as u64;
        self.segment_high += NUMBERS_PER_BYTE * self.sieve_size as u64;
        Ok(())
    }

    fn cross_off(&mut self) -> Result<(), SieveError> {
        if let Some(small) = &mut self.small {
            small.cross_off(&mut self.sieve);
        }
        if let Some(medium) = &mut self.medium {
            medium.cross_off(&mut self.sieve);
        }
        if let Some(big) = &mut self.big {
            big.cross_off(&mut self.sieve)?;
        }
        Ok(())
    }

    fn pre_sieve_segment(&mut self) {
        self.pre_sieve.apply(&mut self.sieve, self.segment_low);
        if self.segment_low <= self.start {
            // First segment: the tile crossed off the pre-sieve primes
            // themselves, restore them if they are in range, then mask
            // the candidates below start.
            if self.start <= self.pre_sieve.limit() as u64 {
                self.sieve[0] = 0xff;
            }
            let r = byte_remainder(self.start);
            let mut i = 0;
            while BIT_VALUES[i] < r {
                i += 1;
            }
            self.sieve[0] &= 0xff << i;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_range(
        start: u64,
        stop: u64,
        sieve_kb: u32,
        pre: u32,
        sieving: &[u64],
    ) -> Vec<u64> {
        let mut found = vec![];
        let mut engine = SieveEngine::new(start, stop, sieve_kb, pre, |seg: &[u8], low: u64| {
            for (i, &byte) in seg.iter().enumerate() {
                for (b, &v) in BIT_VALUES.iter().enumerate() {
                    if byte & (1 << b) != 0 {
                        found.push(low + 30 * i as u64 + v);
                    }
                }
            }
            true
        })
        .unwrap();
        for &p in sieving {
            engine.add_sieving_prime(p).unwrap();
        }
        engine.finish().unwrap();
        found
    }

    fn naive_primes(lo: u64, hi: u64) -> Vec<u64> {
        (lo..=hi)
            .filter(|&n| n >= 2 && (2..n).take_while(|d| d * d <= n).all(|d| n % d != 0))
            .collect()
    }

    #[test]
    fn test_construction_errors() {
        let cb = |_: &[u8], _: u64| true;
        assert!(matches!(
            SieveEngine::new(5, 100, 32, 13, cb),
            Err(SieveError::InvalidRange { .. })
        ));
        assert!(matches!(
            SieveEngine::new(100, 7, 32, 13, cb),
            Err(SieveError::InvalidRange { .. })
        ));
        assert!(matches!(
            SieveEngine::new(7, max_stop() + 1, 32, 13, cb),
            Err(SieveError::StopTooLarge(_))
        ));
        assert!(matches!(
            SieveEngine::new(7, 100, 0, 13, cb),
            Err(SieveError::SieveSizeOutOfBounds(0))
        ));
        assert!(matches!(
            SieveEngine::new(7, 100, 32, 11, cb),
            Err(SieveError::PreSieveOutOfBounds(11))
        ));
        assert!(matches!(
            SieveEngine::new(7, 100, 32, 29, cb),
            Err(SieveError::PreSieveOutOfBounds(29))
        ));
    }

    #[test]
    fn test_sieve_size_normalization() {
        let cb = |_: &[u8], _: u64| true;
        let engine = SieveEngine::new(7, 100, 100, 13, cb).unwrap();
        // 100 KiB rounds down to 64 KiB.
        assert_eq!(engine.sieve_size(), 64 * 1024);
        let engine = SieveEngine::new(7, 100, 1 << 20, 13, cb).unwrap();
        assert_eq!(engine.sieve_size(), 4096 * 1024);
    }

    #[test]
    fn test_small_range() {
        // sqrt(1000) = 31; 17..31 remain after pre-sieving with 13.
        let found = collect_range(7, 1000, 1, 13, &[17, 19, 23, 29, 31]);
        assert_eq!(found, naive_primes(7, 1000));
    }

    #[test]
    fn test_start_masking() {
        // start inside the pre-sieve range: 7, 11, 13 must survive,
        // anything below start must not appear.
        let found = collect_range(11, 300, 1, 13, &[17]);
        assert_eq!(found, naive_primes(11, 300));
    }

    #[test]
    fn test_single_number() {
        let found = collect_range(7, 7, 1, 13, &[]);
        assert_eq!(found, vec![7]);
    }

    #[test]
    fn test_segment_geometry() {
        let mut lows = vec![];
        let mut engine = SieveEngine::new(7, 200_000, 1, 13, |seg: &[u8], low: u64| {
            lows.push((low, seg.len()));
            true
        })
        .unwrap();
        for p in [17u64, 19, 23, 29, 31, 37, 41, 43] {
            engine.add_sieving_prime(p).unwrap();
        }
        engine.finish().unwrap();
        drop(engine);
        for (i, &(low, len)) in lows.iter().enumerate() {
            assert_eq!(low % 30, 0);
            assert_eq!(low, i as u64 * 30 * 1024);
            if i + 1 < lows.len() {
                assert_eq!(len, 1024);
            } else {
                assert_eq!(len % 8, 0);
            }
        }
    }

    #[test]
    fn test_early_stop() {
        let mut segments = 0;
        let mut engine = SieveEngine::new(7, 10_000_000, 1, 13, |_: &[u8], _: u64| {
            segments += 1;
            segments < 3
        })
        .unwrap();
        for p in [17u64, 19, 23] {
            engine.add_sieving_prime(p).unwrap();
        }
        engine.finish().unwrap();
        assert!(engine.stopped());
        drop(engine);
        assert_eq!(segments, 3);
    }
}
