//! Round-robin replica selection

use std::sync::atomic::{AtomicU64, Ordering};

/// Picks the physical connection that serves the next read
///
/// Index 0 is the master. With replicas present the selector cycles over
/// `1..n`; with only a master it always returns 0. Each call is a single
/// `fetch_add`, so concurrent callers never share a counter value, but their
/// interleaving can make the observed sequence only approximately
/// round-robin.
#[derive(Debug, Default)]
pub struct ReplicaSelector {
    count: AtomicU64,
}

impl ReplicaSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector whose counter starts at `count`
    pub fn starting_at(count: u64) -> Self {
        Self {
            count: AtomicU64::new(count),
        }
    }

    /// Index of the connection to read from among `n` connections
    pub fn next(&self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        let count = self.count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        1 + (count % (n as u64 - 1)) as usize
    }

    /// Number of selections made so far (wrapping)
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_single_connection_always_master() {
        let selector = ReplicaSelector::new();
        for _ in 0..100 {
            assert_eq!(selector.next(1), 0);
            assert_eq!(selector.next(0), 0);
        }
        assert_eq!(selector.count(), 0);
    }

    #[test]
    fn test_indices_stay_in_range_and_never_repeat() {
        let selector = ReplicaSelector::new();
        for n in 2..40usize {
            let mut last = None;
            for _ in 0..(3 * n) {
                let index = selector.next(n);
                assert!(index >= 1 && index < n, "index {} out of range for n={}", index, n);
                if n > 2 {
                    assert_ne!(Some(index), last, "repeated index for n={}", n);
                }
                last = Some(index);
            }
        }
    }

    #[test]
    fn test_cycles_over_every_replica() {
        let selector = ReplicaSelector::new();
        let seen: Vec<usize> = (0..8).map(|_| selector.next(5)).collect();
        assert_eq!(seen, vec![2, 3, 4, 1, 2, 3, 4, 1]);
    }

    #[test]
    fn test_counter_wraps_without_leaving_range() {
        let selector = ReplicaSelector::starting_at(u64::MAX - 3);
        for _ in 0..10 {
            let index = selector.next(4);
            assert!((1..4).contains(&index));
        }
        assert!(selector.count() < 10);
    }

    #[test]
    fn test_concurrent_selection_uses_unique_counter_values() {
        let selector = Arc::new(ReplicaSelector::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let selector = Arc::clone(&selector);
                std::thread::spawn(move || {
                    (0..1000).map(|_| selector.next(3)).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut picks = Vec::new();
        for t in threads {
            picks.extend(t.join().unwrap());
        }

        assert_eq!(selector.count(), 8000);
        assert!(picks.iter().all(|i| *i == 1 || *i == 2));
        let distinct: HashSet<_> = picks.into_iter().collect();
        assert_eq!(distinct.len(), 2);
    }
}
