use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts client connections currently being relayed
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicUsize,
    total: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; the count drops again when the guard does
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        let id = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        ConnectionGuard {
            tracker: Arc::clone(self),
            id,
            released: false,
        }
    }

    /// Connections currently open
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Connections accepted since startup
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// RAII guard to ensure the active count is decremented exactly once
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
    id: u64,
    released: bool,
}

impl ConnectionGuard {
    /// Sequence number of this connection, for log correlation
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Manually release the slot before the guard goes out of scope
    pub fn release(&mut self) {
        if !self.released {
            self.tracker.active.fetch_sub(1, Ordering::AcqRel);
            self.released = true;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard() {
        let tracker = Arc::new(ConnectionTracker::new());

        {
            let _guard = tracker.track();
            assert_eq!(tracker.active(), 1);
        }

        // Guard should automatically decrement on drop
        assert_eq!(tracker.active(), 0);
        assert_eq!(tracker.total(), 1);
    }

    #[test]
    fn test_connection_guard_manual_release() {
        let tracker = Arc::new(ConnectionTracker::new());

        {
            let mut guard = tracker.track();
            assert_eq!(tracker.active(), 1);

            guard.release();
            assert_eq!(tracker.active(), 0);

            // Second release should be no-op
            guard.release();
            assert_eq!(tracker.active(), 0);
        }

        // Drop should not decrement again
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn test_guard_ids_are_sequential() {
        let tracker = Arc::new(ConnectionTracker::new());

        let first = tracker.track();
        let second = tracker.track();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(tracker.active(), 2);

        drop(first);
        assert_eq!(tracker.active(), 1);
        assert_eq!(tracker.total(), 2);
    }
}
