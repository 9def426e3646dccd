// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! CPU cache sizes, used to pick a segment size that stays in L1/L2.
//!
//! On Linux the sizes are read from sysfs. Only cpu0 is probed: a
//! heuristic that ignores heterogeneous topologies, which is fine for
//! a tuning input (a wrong size costs speed, not correctness). On
//! other systems no data is reported and callers fall back to a
//! conservative default.

/// Plain value type; construct once and query.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuInfo {
    l1_cache: Option<usize>,
    l2_cache: Option<usize>,
}

impl CpuInfo {
    pub fn detect() -> CpuInfo {
        detect_impl()
    }

    /// No cache information, as on unsupported systems.
    pub fn none() -> CpuInfo {
        CpuInfo::default()
    }

    /// L1 data cache size in bytes, if known.
    pub fn l1_cache_size(&self) -> Option<usize> {
        self.l1_cache
    }

    /// L2 cache size in bytes, if known.
    pub fn l2_cache_size(&self) -> Option<usize> {
        self.l2_cache
    }
}

/// Parses sysfs cache sizes: a number with an optional K/M/G suffix.
fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit());
    let value: usize = digits.parse().ok()?;
    let mult = match s[digits.len()..].trim() {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(value * mult)
}

#[cfg(target_os = "linux")]
fn detect_impl() -> CpuInfo {
    use std::fs;

    let mut info = CpuInfo::default();
    // cpu0 only; index0..4 covers L1d/L1i/L2/L3 on common layouts.
    for index in 0..=4 {
        let dir = format!("/sys/devices/system/cpu/cpu0/cache/index{}", index);
        let level = match fs::read_to_string(format!("{}/level", dir)) {
            Ok(s) => s.trim().parse::<u32>().unwrap_or(0),
            Err(_) => continue,
        };
        let typ = fs::read_to_string(format!("{}/type", dir)).unwrap_or_default();
        let typ = typ.trim();
        if typ != "Data" && typ != "Unified" {
            continue;
        }
        let size = fs::read_to_string(format!("{}/size", dir))
            .ok()
            .and_then(|s| parse_size(&s));
        match level {
            1 => info.l1_cache = size,
            2 => info.l2_cache = size,
            _ => {}
        }
    }
    info
}

#[cfg(not(target_os = "linux"))]
fn detect_impl() -> CpuInfo {
    CpuInfo::default()
}

#[test]
fn test_parse_size() {
    assert_eq!(parse_size("32K"), Some(32 * 1024));
    assert_eq!(parse_size("32K\n"), Some(32 * 1024));
    assert_eq!(parse_size("1M"), Some(1024 * 1024));
    assert_eq!(parse_size("1G"), Some(1 << 30));
    assert_eq!(parse_size("512"), Some(512));
    assert_eq!(parse_size("x"), None);
    assert_eq!(parse_size(""), None);
}

#[test]
fn test_detect_no_panic() {
    // Whatever the host, detection must not fail, only report None.
    let cpu = CpuInfo::detect();
    if let Some(l1) = cpu.l1_cache_size() {
        assert!(l1 >= 1024);
    }
}
