// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Crossing off multiples of big sieving primes
//! (p > sieve_size * FACTOR_ERATMEDIUM, up to sqrt(stop)).
//!
//! A big prime has zero or one multiple in most segments, so replaying
//! a flat list every segment would touch every descriptor for nothing.
//! Descriptors are instead bucket-sorted by the segment their next
//! multiple falls in: a ring of buckets covers the upcoming segments,
//! and each segment only drains its own bucket, crossing off and
//! re-filing every descriptor into the bucket of its next multiple.
//!
//! Buckets are singly linked chunks of 1024 descriptors living in a
//! pooled arena; chunks are recycled through an intrusive free list so
//! the hot path never allocates. Chunk links and list heads are u32
//! indexes into the arena rather than pointers.

use crate::wheel::{WheelPrime, WHEEL30};
use crate::SieveError;

/// Descriptors per bucket chunk.
const CHUNK: usize = 1024;

/// Null chunk index.
const NONE: u32 = u32::MAX;

struct Chunk {
    len: u32,
    next: u32,
    primes: [WheelPrime; CHUNK],
}

impl Chunk {
    fn new() -> Chunk {
        Chunk {
            len: 0,
            next: NONE,
            primes: [WheelPrime::ZERO; CHUNK],
        }
    }
}

pub struct EratBig {
    arena: Vec<Chunk>,
    /// Head of the free chunk list.
    free: u32,
    /// Ring of bucket heads; slot cur holds the current segment.
    buckets: Vec<u32>,
    cur: usize,
    log2_sieve: u32,
    modulo_sieve: usize,
}

impl EratBig {
    /// sieve_size in bytes, a power of two. The ring must cover the
    /// largest possible jump past the current segment: one wheel step
    /// of the largest sieving prime, landing at most
    /// 6 * (sqrt_stop / 30) + 7 bytes ahead.
    pub fn new(sieve_size: usize, sqrt_stop: u64) -> Result<EratBig, SieveError> {
        debug_assert!(sieve_size.is_power_of_two());
        let log2_sieve = sieve_size.trailing_zeros();
        let max_advance = 6 * (sqrt_stop as usize / 30 + 2);
        let max_index = sieve_size - 1 + max_advance;
        let ring = ((max_index >> log2_sieve) + 1).next_power_of_two();
        Ok(EratBig {
            arena: Vec::new(),
            free: NONE,
            buckets: vec![NONE; ring],
            cur: 0,
            log2_sieve,
            modulo_sieve: sieve_size - 1,
        })
    }

    /// Files a new sieving prime into the bucket of the segment holding
    /// its first multiple. byte is relative to the current segment; the
    /// caller must have advanced segments so that p^2 is at most one
    /// segment ahead (the engine sieves lazily before adding), keeping
    /// the target inside the ring.
    pub fn add(&mut self, p: u64, byte: u64, wheel_index: usize) -> Result<(), SieveError> {
        let seg = (byte >> self.log2_sieve) as usize;
        let idx = byte as usize & self.modulo_sieve;
        debug_assert!(seg < self.buckets.len());
        let slot = (self.cur + seg) & (self.buckets.len() - 1);
        self.push(slot, WheelPrime::new(p, idx, wheel_index))
    }

    /// Drains the current segment's bucket: crosses off every multiple
    /// falling in this segment and re-files each descriptor. On return
    /// the drained bucket is empty and every descriptor sits in a slot
    /// at least one segment ahead.
    pub fn cross_off(&mut self, sieve: &mut [u8]) -> Result<(), SieveError> {
        let slen = sieve.len();
        debug_assert_eq!(slen, self.modulo_sieve + 1);
        let mut list = self.buckets[self.cur];
        self.buckets[self.cur] = NONE;
        while list != NONE {
            let li = list as usize;
            let count = self.arena[li].len as usize;
            let next = self.arena[li].next;
            for i in 0..count {
                let wp = self.arena[li].primes[i];
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
                let seg = off >> self.log2_sieve;
                debug_assert!(seg >= 1 && seg < self.buckets.len());
                let slot = (self.cur + seg) & (self.buckets.len() - 1);
                let mut wp = wp;
                wp.update(off & self.modulo_sieve, wi);
                self.push(slot, wp)?;
            }
            let chunk = &mut self.arena[li];
            chunk.len = 0;
            chunk.next = self.free;
            self.free = list;
            list = next;
        }
        self.cur = (self.cur + 1) & (self.buckets.len() - 1);
        Ok(())
    }

    fn push(&mut self, slot: usize, wp: WheelPrime) -> Result<(), SieveError> {
        let head = self.buckets[slot];
        if head == NONE || self.arena[head as usize].len as usize == CHUNK {
            let c = self.alloc_chunk()?;
            self.arena[c as usize].next = head;
            self.buckets[slot] = c;
        }
        let chunk = &mut self.arena[self.buckets[slot] as usize];
        chunk.primes[chunk.len as usize] = wp;
        chunk.len += 1;
        Ok(())
    }

    fn alloc_chunk(&mut self) -> Result<u32, SieveError> {
        if self.free != NONE {
            let c = self.free;
            let chunk = &mut self.arena[c as usize];
            self.free = chunk.next;
            chunk.len = 0;
            chunk.next = NONE;
            Ok(c)
        } else {
            self.arena
                .try_reserve(1)
                .map_err(|_| SieveError::AllocationFailed)?;
            self.arena.push(Chunk::new());
            Ok((self.arena.len() - 1) as u32)
        }
    }

    #[cfg(test)]
    fn current_bucket_len(&self) -> usize {
        let mut n = 0;
        let mut list = self.buckets[self.cur];
        while list != NONE {
            let chunk = &self.arena[list as usize];
            n += chunk.len as usize;
            list = chunk.next;
        }
        n
    }
}

#[test]
fn test_cross_off_segments() {
    use crate::erat_small::naive_segment;
    use crate::wheel;

    // Mimic the engine: a prime is added once segment_high reaches its
    // square, with its offset relative to the current segment.
    let sieve_size = 256usize;
    let span = 30 * sieve_size as u64;
    let primes = [1571u64, 1601, 1733];
    let mut erat = EratBig::new(sieve_size, 2000).unwrap();
    let mut low = 0u64;
    let mut pi = 0;
    for seg in 0..460u64 {
        let high = low + span + 1;
        while pi < primes.len() && primes[pi] * primes[pi] <= high {
            let p = primes[pi];
            let (byte, wi) = wheel::first_multiple(p, low);
            erat.add(p, byte, wi).unwrap();
            pi += 1;
        }
        let mut sieve = vec![0xffu8; sieve_size];
        erat.cross_off(&mut sieve).unwrap();
        let expect = naive_segment(low, sieve_size, &primes[..pi]);
        assert_eq!(sieve, expect, "segment {}", seg);
        low += span;
    }
    assert_eq!(pi, primes.len());
}

#[test]
fn test_bucket_drained() {
    use crate::wheel;

    let sieve_size = 256usize;
    let mut erat = EratBig::new(sieve_size, 2000).unwrap();
    let p = 1571u64;
    // Place the prime as the engine would, right at its square.
    let low = p * p - (p * p) % 30;
    let (byte, wi) = wheel::first_multiple(p, low);
    erat.add(p, byte, wi).unwrap();
    for _ in 0..32 {
        let mut sieve = vec![0xffu8; sieve_size];
        erat.cross_off(&mut sieve).unwrap();
        // The drained slot holds the next segment now; it may receive
        // the descriptor again, but never keeps a stale one: the
        // descriptor always lands at least one segment ahead of the
        // slot it was drained from.
        assert!(erat.current_bucket_len() <= 1);
    }
}
