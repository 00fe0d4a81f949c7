//! Process-wide sequence registry.
//!
//! Sequence ids are monotonic across every receiver instance in the
//! process, so the counter cannot belong to any one channel. It lives here
//! behind a single access point instead of an implicit mutable global.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence-id source. Ids start at 1 and never repeat.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    /// Claim the next id. Safe from any thread.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

static SEQUENCER: Sequencer = Sequencer::new();

/// The sequencer shared by all capture loops in this process.
pub fn sequencer() -> &'static Sequencer {
    &SEQUENCER
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ids_increase_strictly() {
        let seq = Sequencer::new();
        let a = seq.next_id();
        let b = seq.next_id();
        assert!(b > a);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let seq = Sequencer::new();
        let ids: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..1000).map(|_| seq.next_id()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 4000, "duplicate sequence ids handed out");
    }

    #[test]
    fn process_wide_sequencer_is_shared() {
        let first = sequencer().next_id();
        let second = sequencer().next_id();
        assert!(second > first);
    }
}
