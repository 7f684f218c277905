//! Rolling window of recent record fingerprints.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    ttl: Duration,
    recent: VecDeque<(u64, Instant)>,
}

impl DedupWindow {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            recent: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// True if `raw` was not seen inside the window; records it either way.
    pub fn admit(&mut self, raw: &str) -> bool {
        self.admit_at(raw, Instant::now())
    }

    fn admit_at(&mut self, raw: &str, now: Instant) -> bool {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return true;
        }
        while let Some((_, seen)) = self.recent.front() {
            if now.duration_since(*seen) > self.ttl {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        let fingerprint = fingerprint(trimmed);
        if self.recent.iter().any(|(fp, _)| *fp == fingerprint) {
            return false;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back((fingerprint, now));
        true
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

fn fingerprint(raw: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}
