//! Kernel Pool (C4): pre-warmed idle instances keyed by (mode, language).

use crate::driver::{InterruptChannel, KernelTypeKey};
use crate::kernel::instance::KernelInstance;
use std::collections::{HashMap, VecDeque};

/// A pooled instance alongside the interrupt channel the manager keeps
/// outside any per-instance lock.
pub type PooledEntry = (KernelInstance, Option<InterruptChannel>);

/// Per-key availability/cap, as returned by `poolStats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolKeyStats {
    pub available: usize,
    pub cap: usize,
}

#[derive(Debug)]
pub struct Pool {
    entries: HashMap<KernelTypeKey, VecDeque<PooledEntry>>,
    size_per_key: usize,
}

impl Pool {
    pub fn new(size_per_key: usize) -> Self {
        Self {
            entries: HashMap::new(),
            size_per_key,
        }
    }

    pub fn size_per_key(&self) -> usize {
        self.size_per_key
    }

    /// O(1) head removal. `None` on a miss — caller falls back to cold start.
    pub fn take(&mut self, key: &KernelTypeKey) -> Option<PooledEntry> {
        self.entries.get_mut(key).and_then(|q| q.pop_front())
    }

    /// Insert at the tail if below the per-key cap. Returns the entry back
    /// to the caller when the key is already full — the caller is
    /// responsible for destroying it rather than blocking on that here.
    pub fn put(&mut self, key: KernelTypeKey, entry: PooledEntry) -> Result<(), PooledEntry> {
        let queue = self.entries.entry(key).or_default();
        if queue.len() >= self.size_per_key {
            return Err(entry);
        }
        queue.push_back(entry);
        Ok(())
    }

    pub fn available(&self, key: &KernelTypeKey) -> usize {
        self.entries.get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// How many more instances `key` can accept before `put` starts
    /// rejecting — used to size a `refill` batch.
    pub fn deficit(&self, key: &KernelTypeKey) -> usize {
        self.size_per_key.saturating_sub(self.available(key))
    }

    pub fn stats(&self) -> HashMap<KernelTypeKey, PoolKeyStats> {
        self.entries
            .iter()
            .map(|(key, queue)| {
                (
                    *key,
                    PoolKeyStats {
                        available: queue.len(),
                        cap: self.size_per_key,
                    },
                )
            })
            .collect()
    }

    /// Drain every instance for teardown (`destroyAll`), returning ownership
    /// so the caller can call `destroy()` on each outside of any lock this
    /// pool might otherwise need.
    pub fn drain_all(&mut self) -> Vec<PooledEntry> {
        self.entries
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{KernelMode, Language};

    fn key() -> KernelTypeKey {
        KernelTypeKey {
            mode: KernelMode::Sandboxed,
            language: Language::Python,
        }
    }

    #[test]
    fn take_on_empty_pool_is_a_miss() {
        let mut pool = Pool::new(2);
        assert!(pool.take(&key()).is_none());
    }

    #[test]
    fn deficit_reflects_cap_minus_available() {
        let pool = Pool::new(3);
        assert_eq!(pool.deficit(&key()), 3);
    }

    #[test]
    fn stats_reports_per_key_cap() {
        let pool = Pool::new(5);
        assert!(pool.stats().is_empty());
        assert_eq!(pool.size_per_key(), 5);
    }
}
