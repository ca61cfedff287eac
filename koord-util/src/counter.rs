// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Thread-safe error/event counters.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Counts occurrences per site. Configuration errors are rejected but
/// counted so that a misbehaving workload is visible in a snapshot.
#[derive(Debug, Default)]
pub struct ErrorCounter {
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl ErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for a site. Returns the new count.
    pub fn incr(&self, site: &'static str) -> u64 {
        let mut counts = self.counts.lock();
        let count = counts.entry(site).or_insert(0);
        *count += 1;
        *count
    }

    /// Current count for a site (0 if never seen).
    pub fn get(&self, site: &'static str) -> u64 {
        self.counts.lock().get(site).copied().unwrap_or(0)
    }

    /// Total across all sites.
    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// Snapshot of all counters.
    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counts.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_and_get() {
        let counter = ErrorCounter::new();
        assert_eq!(counter.get("gang_init"), 0);
        assert_eq!(counter.incr("gang_init"), 1);
        assert_eq!(counter.incr("gang_init"), 2);
        assert_eq!(counter.incr("quota_spec"), 1);
        assert_eq!(counter.get("gang_init"), 2);
        assert_eq!(counter.total(), 3);
    }

    #[test]
    fn test_snapshot() {
        let counter = ErrorCounter::new();
        counter.incr("a");
        counter.incr("b");
        let snap = counter.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["a"], 1);
    }
}
