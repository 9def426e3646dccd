// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Count or print the primes of an interval.
//!
//! The sieve engine itself is single-threaded; with --threads N the
//! interval is split into N disjoint subintervals, each sieved by an
//! independent engine.

use std::str::FromStr;
use std::time::Instant;

use rayon::prelude::*;

use erato::{count_primes, sieve_range, Preferences, SieveError, Verbosity};

fn main() {
    let arg = arguments::parse(std::env::args()).unwrap();
    if arg.get::<bool>("help").is_some() || arg.orphans.is_empty() || arg.orphans.len() > 2 {
        eprintln!("Usage: erato [OPTIONS] [START] STOP");
        eprintln!("");
        eprintln!("Counts (default) or prints the primes in [START, STOP].");
        eprintln!("START defaults to 1.");
        eprintln!("");
        eprintln!("Options:");
        eprintln!("  --help                 show this help");
        eprintln!("  --print                print the primes instead of counting");
        eprintln!("  --threads N            sieve N subintervals in parallel");
        eprintln!("  --sieve-size KB        segment size in KiB (1..4096, power of two)");
        eprintln!("  --pre-sieve N          pre-sieve primes <= N (13..23)");
        eprintln!("  --verbose              print progress details");
        return;
    }
    let (start, stop) = match parse_range(&arg.orphans) {
        Some(r) => r,
        None => {
            eprintln!("erato: invalid range argument");
            std::process::exit(1);
        }
    };
    let prefs = Preferences {
        sieve_size_kb: arg.get::<u32>("sieve-size"),
        pre_sieve: arg.get::<u32>("pre-sieve"),
        threads: arg.get::<usize>("threads"),
        verbosity: if arg.get::<bool>("verbose").is_some() {
            Verbosity::Verbose
        } else {
            Verbosity::Info
        },
    };
    let print = arg.get::<bool>("print").is_some();
    let t0 = Instant::now();
    let result = if print {
        // Printing is ordered, hence single-threaded.
        sieve_range(start, stop, &prefs, |p| {
            println!("{}", p);
            true
        })
        .map(|_| None)
    } else {
        let threads = prefs.threads.unwrap_or(1);
        let counted = if threads > 1 {
            parallel_count(start, stop, threads, &prefs)
        } else {
            count_primes(start, stop, &prefs)
        };
        counted.map(Some)
    };
    match result {
        Ok(Some(n)) => {
            if prefs.verbose(Verbosity::Verbose) {
                eprintln!("Elapsed {:.3}s", t0.elapsed().as_secs_f64());
            }
            println!("{}", n);
        }
        Ok(None) => {
            if prefs.verbose(Verbosity::Verbose) {
                eprintln!("Elapsed {:.3}s", t0.elapsed().as_secs_f64());
            }
        }
        Err(e) => {
            eprintln!("erato: {}", e);
            std::process::exit(1);
        }
    }
}

fn parse_range(orphans: &[String]) -> Option<(u64, u64)> {
    match orphans {
        [stop] => Some((1, u64::from_str(stop).ok()?)),
        [start, stop] => Some((u64::from_str(start).ok()?, u64::from_str(stop).ok()?)),
        _ => None,
    }
}

/// Splits [start, stop] into disjoint subintervals, one independent
/// engine each. Counts are additive across a partition.
fn parallel_count(
    start: u64,
    stop: u64,
    threads: usize,
    prefs: &Preferences,
) -> Result<u64, SieveError> {
    if start > stop {
        return Err(SieveError::InvalidRange { start, stop });
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("cannot create thread pool");
    let chunk = (stop - start) / threads as u64 + 1;
    let ranges: Vec<(u64, u64)> = (0..threads as u64)
        .map(|i| {
            let lo = start.saturating_add(i.saturating_mul(chunk));
            (lo, stop.min(lo.saturating_add(chunk - 1)))
        })
        .filter(|&(lo, hi)| lo <= hi && lo <= stop)
        .collect();
    if prefs.verbose(Verbosity::Verbose) {
        eprintln!("Parallel sieving over {} subintervals", ranges.len());
    }
    let counts = pool.install(|| {
        ranges
            .par_iter()
            .map(|&(lo, hi)| count_primes(lo, hi, prefs))
            .collect::<Result<Vec<u64>, SieveError>>()
    })?;
    Ok(counts.iter().sum())
}
