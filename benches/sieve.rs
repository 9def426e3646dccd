use brunch::Bench;

use erato::{count_primes, Preferences};

brunch::benches! {
    // Dense ranges near the origin.
    Bench::new("count primes < 1e6")
    .run_seeded(1_000_000u64, |n| count_primes(1, n, &Preferences::default()).unwrap()),
    Bench::new("count primes < 1e7")
    .run_seeded(10_000_000u64, |n| count_primes(1, n, &Preferences::default()).unwrap()),
    // Sparse range far from the origin: dominated by EratBig.
    Bench::new("count primes in [1e12, 1e12+1e7]")
    .run_seeded(1_000_000_000_000u64, |n| {
        count_primes(n, n + 10_000_000, &Preferences::default()).unwrap()
    }),
    // Segment size sensitivity.
    {
        let prefs = Preferences {
            sieve_size_kb: Some(1),
            ..Preferences::default()
        };
        Bench::new("count primes < 1e7, 1 KiB segments")
        .run_seeded(10_000_000u64, move |n| count_primes(1, n, &prefs).unwrap())
    },
    // Pre-sieving depth.
    {
        let prefs = Preferences {
            pre_sieve: Some(19),
            ..Preferences::default()
        };
        Bench::new("count primes < 1e7, pre-sieve 19")
        .run_seeded(10_000_000u64, move |n| count_primes(1, n, &prefs).unwrap())
    },
}
