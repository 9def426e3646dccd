// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! High level prime generation on top of the segmented sieve engine.
//!
//! This module supplies the two collaborators the engine expects: a
//! source of sieving primes up to sqrt(stop), and a consumer decoding
//! the published segment bitmaps back into prime values.
//!
//! The prime source is self-hosted. Bounds below 2^16 come from one
//! flat wheel-30 bitmap. Above that, a nested engine sieves
//! [7, sqrt(stop)] and its finished segments are decoded straight into
//! add_sieving_prime calls on the main engine, so both levels run the
//! same wheel machinery and the source never materializes more than a
//! segment of primes at a time.
//!
//! Bitmaps are decoded 64 bits at a time: a sieve word spans 240
//! numbers and the value of bit k is 30*(k/8) + BIT_VALUES[k%8] past
//! the word base, so set bits are walked with trailing_zeros and a
//! 64-entry offset table.

use num_integer::Roots;

use crate::cpuinfo::CpuInfo;
use crate::sieve::SieveEngine;
use crate::wheel::{self, BIT_VALUES, WHEEL30};
use crate::{params, Preferences, SieveError, Verbosity};

/// Value offsets of the 64 bits of a sieve word.
const WORD_OFFSETS: [u64; 64] = {
    let mut table = [0u64; 64];
    let mut k = 0;
    while k < 64 {
        table[k] = 30 * (k as u64 / 8) + BIT_VALUES[k % 8];
        k += 1;
    }
    table
};

/// Walks the set bits of a published segment in increasing value
/// order; returns false as soon as f does.
fn each_prime<F: FnMut(u64) -> bool>(seg: &[u8], low: u64, f: &mut F) -> bool {
    for (w, bytes) in seg.chunks_exact(8).enumerate() {
        let mut word = u64::from_le_bytes(bytes.try_into().unwrap());
        let base = low + 240 * w as u64;
        while word != 0 {
            let k = word.trailing_zeros() as usize;
            if !f(base + WORD_OFFSETS[k]) {
                return false;
            }
            word &= word - 1;
        }
    }
    true
}

/// Primes in [7, limit] from one flat wheel-30 bitmap, crossing off
/// with the same tables the segmented engines use. Meant for bootstrap
/// bounds (a 2^16 limit is a 2185-byte bitmap).
fn wheel_primes(limit: u64) -> Vec<u64> {
    let len = (limit / 30) as usize + 1;
    let mut bitmap = vec![0xffu8; len];
    'cross: for i in 0..len {
        for b in 0..8 {
            let p = 30 * i as u64 + BIT_VALUES[b];
            if p * p > limit {
                break 'cross;
            }
            // Still set means prime: all smaller primes already
            // crossed their multiples.
            if bitmap[i] & (1 << b) == 0 {
                continue;
            }
            let (byte, first) = wheel::first_multiple(p, 0);
            let t = ((p - BIT_VALUES[first / 8]) / 30) as usize;
            let mut off = byte as usize;
            let mut wi = first;
            while off < len {
                let e = &WHEEL30[wi];
                bitmap[off] &= e.unset_bit;
                off += e.factor as usize * t + e.correct as usize;
                wi = e.next as usize;
            }
        }
    }
    let mut res = vec![];
    for (i, &byte) in bitmap.iter().enumerate() {
        for (b, &v) in BIT_VALUES.iter().enumerate() {
            let p = 30 * i as u64 + v;
            if p <= limit && byte & (1 << b) != 0 {
                res.push(p);
            }
        }
    }
    res
}

/// Feeds the engine every sieving prime in (pre_sieve_limit,
/// sqrt_stop], in increasing order, and returns how many were fed.
///
/// Small bounds come straight from the flat bootstrap bitmap. Larger
/// bounds are sieved by a nested engine over [7, sqrt_stop] whose
/// segments are decoded and pushed upward as they complete; the nested
/// engine itself only ever needs the bootstrap (its own prime bound is
/// at most 2^16).
fn feed_sieving_primes<F>(engine: &mut SieveEngine<F>) -> Result<u64, SieveError>
where
    F: FnMut(&[u8], u64) -> bool,
{
    let sqrt_stop = engine.sqrt_stop();
    let pre_limit = engine.pre_sieve_limit() as u64;
    if sqrt_stop <= pre_limit {
        return Ok(0);
    }
    let mut fed = 0u64;
    if sqrt_stop < 1 << 16 {
        for p in wheel_primes(sqrt_stop) {
            if p > pre_limit {
                engine.add_sieving_prime(p)?;
                fed += 1;
                if engine.stopped() {
                    break;
                }
            }
        }
        return Ok(fed);
    }
    let roots = wheel_primes(sqrt_stop.sqrt());
    let mut failed = None;
    {
        let mut push = |p: u64| {
            if p <= pre_limit {
                return true;
            }
            match engine.add_sieving_prime(p) {
                Ok(()) => {
                    fed += 1;
                    !engine.stopped()
                }
                Err(e) => {
                    failed = Some(e);
                    false
                }
            }
        };
        // 64 KiB segments keep the nested engine on the small/medium
        // paths: its prime bound is below 6 * 65536.
        let mut inner = SieveEngine::new(7, sqrt_stop, 64, 13, |seg: &[u8], low: u64| {
            each_prime(seg, low, &mut push)
        })?;
        for &p in &roots {
            if p > 13 {
                inner.add_sieving_prime(p)?;
            }
        }
        inner.finish()?;
    }
    match failed {
        Some(e) => Err(e),
        None => Ok(fed),
    }
}

fn resolve(start: u64, stop: u64, prefs: &Preferences) -> (u32, u32) {
    let kb = prefs
        .sieve_size_kb
        .unwrap_or_else(|| params::sieve_size_kb(stop, &CpuInfo::detect()));
    let pre = prefs
        .pre_sieve
        .unwrap_or_else(|| params::pre_sieve_limit(start, stop));
    (kb, pre)
}

/// Runs one engine over [start, stop] (start >= 7): builds it, feeds
/// the sieving primes in increasing order and flushes the segments.
fn run_engine<F>(start: u64, stop: u64, prefs: &Preferences, callback: F) -> Result<(), SieveError>
where
    F: FnMut(&[u8], u64) -> bool,
{
    debug_assert!(start >= 7);
    let (kb, pre) = resolve(start, stop, prefs);
    let mut engine = SieveEngine::new(start, stop, kb, pre, callback)?;
    if prefs.verbose(Verbosity::Verbose) {
        eprintln!(
            "Sieve size {} KiB, pre-sieved primes <= {}",
            engine.sieve_size() / 1024,
            engine.pre_sieve_limit()
        );
    }
    let fed = feed_sieving_primes(&mut engine)?;
    if prefs.verbose(Verbosity::Verbose) {
        eprintln!("{} sieving primes <= {}", fed, engine.sqrt_stop());
    }
    engine.finish()
}

/// Calls f for every prime in [start, stop] in increasing order.
/// f returns whether to continue; returning false stops the scan
/// (the function still returns Ok).
pub fn sieve_range<F>(start: u64, stop: u64, prefs: &Preferences, mut f: F) -> Result<(), SieveError>
where
    F: FnMut(u64) -> bool,
{
    if start > stop {
        return Err(SieveError::InvalidRange { start, stop });
    }
    // The wheel starts at 7; the first three primes are special.
    for p in [2u64, 3, 5] {
        if start <= p && p <= stop && !f(p) {
            return Ok(());
        }
    }
    let lo = std::cmp::max(start, 7);
    if lo > stop {
        return Ok(());
    }
    run_engine(lo, stop, prefs, |seg, low| each_prime(seg, low, &mut f))
}

/// Number of primes in [start, stop]. Counting never materializes the
/// primes: segments are popcounted word by word.
pub fn count_primes(start: u64, stop: u64, prefs: &Preferences) -> Result<u64, SieveError> {
    if start > stop {
        return Err(SieveError::InvalidRange { start, stop });
    }
    let mut count = [2u64, 3, 5]
        .iter()
        .filter(|&&p| start <= p && p <= stop)
        .count() as u64;
    let lo = std::cmp::max(start, 7);
    if lo <= stop {
        run_engine(lo, stop, prefs, |seg, _| {
            count += seg
                .chunks_exact(8)
                .map(|b| u64::from_le_bytes(b.try_into().unwrap()).count_ones() as u64)
                .sum::<u64>();
            true
        })?;
    }
    Ok(count)
}

/// The primes of [start, stop] as a vector.
pub fn primes(start: u64, stop: u64) -> Result<Vec<u64>, SieveError> {
    let mut res = vec![];
    sieve_range(start, stop, &Preferences::default(), |p| {
        res.push(p);
        true
    })?;
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::max_stop;

    /// Plain reference sieve.
    fn simple_sieve(limit: u64) -> Vec<u64> {
        let n = limit as usize;
        let mut composite = vec![false; n + 1];
        let mut res = vec![];
        for i in 2..=n {
            if !composite[i] {
                res.push(i as u64);
                let mut k = i * i;
                while k <= n {
                    composite[k] = true;
                    k += i;
                }
            }
        }
        res
    }

    #[test]
    fn test_wheel_primes() {
        let reference: Vec<u64> = simple_sieve(65535)
            .into_iter()
            .filter(|&p| p >= 7)
            .collect();
        assert_eq!(wheel_primes(65535), reference);
        assert_eq!(wheel_primes(30), vec![7, 11, 13, 17, 19, 23, 29]);
        assert_eq!(wheel_primes(7), vec![7]);
        assert!(wheel_primes(6).is_empty());
    }

    #[test]
    fn test_nested_prime_source() {
        // stop just above 2^32 forces the nested sieving-prime engine
        // (sqrt_stop = 65536). Cross-check by trial division.
        let start = 1u64 << 32;
        let stop = start + 30_000;
        let ps = primes(start, stop).unwrap();
        let roots = wheel_primes(65536);
        let mut expect = vec![];
        'n: for n in start..=stop {
            if n % 2 == 0 || n % 3 == 0 || n % 5 == 0 {
                continue;
            }
            for &p in &roots {
                if p * p > n {
                    break;
                }
                if n % p == 0 {
                    continue 'n;
                }
            }
            expect.push(n);
        }
        assert_eq!(ps, expect);
    }

    #[test]
    fn test_scenarios_small() {
        // pi(100) = 25 including 2, 3, 5.
        let ps = primes(7, 100).unwrap();
        assert_eq!(ps.len(), 22);
        assert_eq!(&ps[..3], &[7, 11, 13]);
        assert_eq!(*ps.last().unwrap(), 97);

        // pi(1000) = 168.
        let ps = primes(7, 1000).unwrap();
        assert_eq!(ps.len(), 165);
        assert_eq!(&ps[..3], &[7, 11, 13]);
        assert_eq!(*ps.last().unwrap(), 997);

        assert_eq!(primes(7, 7).unwrap(), vec![7]);
    }

    #[test]
    fn test_scenario_million() {
        let ps = primes(1_000_000, 1_100_000).unwrap();
        assert_eq!(ps.len(), 7216);
        assert_eq!(&ps[..3], &[1_000_003, 1_000_033, 1_000_037]);
        assert_eq!(*ps.last().unwrap(), 1_099_987);
    }

    #[test]
    fn test_scenario_ten_million() {
        // pi(1e7) = 664579 including 2, 3, 5.
        let prefs = Preferences::default();
        assert_eq!(count_primes(7, 10_000_000, &prefs).unwrap(), 664_576);
        assert_eq!(count_primes(2, 10_000_000, &prefs).unwrap(), 664_579);
        let mut last = 0;
        sieve_range(9_999_900, 10_000_000, &prefs, |p| {
            last = p;
            true
        })
        .unwrap();
        assert_eq!(last, 9_999_991);
    }

    #[test]
    fn test_scenario_trillion() {
        let ps = primes(1_000_000_000_000, 1_000_000_000_000 + 100_000).unwrap();
        assert_eq!(ps.len(), 3614);
        assert_eq!(
            &ps[..3],
            &[1_000_000_000_039, 1_000_000_000_061, 1_000_000_000_063]
        );
    }

    #[test]
    fn test_start_equals_stop_all_residues() {
        let prefs = Preferences::default();
        // One number per wheel residue, 49 = 7*7 among them.
        for (n, expect) in [
            (37u64, 1u64),
            (41, 1),
            (43, 1),
            (47, 1),
            (49, 0),
            (53, 1),
            (59, 1),
            (61, 1),
        ] {
            assert_eq!(count_primes(n, n, &prefs).unwrap(), expect, "n={}", n);
        }
    }

    #[test]
    fn test_small_starts() {
        assert_eq!(primes(1, 10).unwrap(), vec![2, 3, 5, 7]);
        assert_eq!(primes(2, 2).unwrap(), vec![2]);
        assert_eq!(primes(3, 6).unwrap(), vec![3, 5]);
        assert_eq!(primes(6, 6).unwrap(), Vec::<u64>::new());
        assert!(primes(10, 5).is_err());
    }

    #[test]
    fn test_sieve_size_sweep() {
        // pi(2e6) = 148933 including 2, 3, 5; identical counts from
        // the minimum to the maximum segment size.
        let mut prefs = Preferences::default();
        for kb in [1u32, 16, 4096] {
            prefs.sieve_size_kb = Some(kb);
            assert_eq!(
                count_primes(7, 2_000_000, &prefs).unwrap(),
                148_930,
                "sieve size {} KiB",
                kb
            );
        }
    }

    #[test]
    fn test_pre_sieve_sweep() {
        // pi(1e6) = 78498 including 2, 3, 5.
        let mut prefs = Preferences::default();
        for pre in [13u32, 17, 19, 23] {
            prefs.pre_sieve = Some(pre);
            assert_eq!(
                count_primes(7, 1_000_000, &prefs).unwrap(),
                78_495,
                "pre-sieve {}",
                pre
            );
        }
    }

    #[test]
    fn test_random_ranges() {
        use rand::Rng;

        let reference = simple_sieve(1_000_000);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let a = rng.gen_range(1..1_000_000u64);
            let b = rng.gen_range(a..=1_000_000u64);
            let got = primes(a, b).unwrap();
            let expect: Vec<u64> = reference
                .iter()
                .copied()
                .filter(|&p| a <= p && p <= b)
                .collect();
            assert_eq!(got, expect, "range [{}, {}]", a, b);
        }
    }

    #[test]
    fn test_early_termination() {
        let mut seen = vec![];
        sieve_range(7, 10_000_000, &Preferences::default(), |p| {
            seen.push(p);
            seen.len() < 10
        })
        .unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[9], 41);
    }

    // Slow: sieving primes up to 2^32 are generated. Run in release
    // mode (cargo test -r -- --ignored).
    #[test]
    #[ignore]
    fn test_top_of_range() {
        let mut prefs = Preferences::default();
        let top = max_stop();
        let mut counts = vec![];
        for kb in [256u32, 1024] {
            prefs.sieve_size_kb = Some(kb);
            counts.push(count_primes(top - 1_000_000, top, &prefs).unwrap());
        }
        assert_eq!(counts[0], counts[1]);
        // Density near 2^64 is about 1/ln(2^64) = 1/44.4.
        assert!(counts[0] > 15_000 && counts[0] < 30_000, "{}", counts[0]);
    }
}
