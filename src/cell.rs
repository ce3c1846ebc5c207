//! Active Configuration Cell: an atomic pointer to an immutable,
//! reference-counted snapshot. Replaces the source system's
//! double-buffered value with `arc_swap::ArcSwap`, per the mapping this
//! system's design notes call out explicitly — readers never block
//! writers and vice versa, and a retiring snapshot is freed only once the
//! last holder of its `Arc` drops it.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Holds the currently published snapshot of type `T`.
///
/// `load()` is the read-lease: it returns a cloned `Arc<T>` the caller may
/// hold for as long as it needs, independent of later `store` calls.
/// `store()` is serialized against other writers by `publish_lock` so that
/// read-modify-publish sequences (parse new snapshot, then swap it in)
/// never race each other, while `load()` itself never takes that lock.
pub struct ConfigCell<T> {
    current: ArcSwap<T>,
    publish_lock: Mutex<()>,
}

impl<T> ConfigCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            publish_lock: Mutex::new(()),
        }
    }

    /// Acquire a read-lease on the current snapshot.
    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Publish a new snapshot, serialized against concurrent publishers.
    /// Prior readers keep their existing `Arc` alive until they drop it.
    pub fn store(&self, snapshot: T) {
        let _guard = self.publish_lock.lock();
        self.current.store(Arc::new(snapshot));
    }

    /// Publish a final snapshot and block until every outstanding lease on
    /// the snapshot it replaces has been dropped. Called once, from
    /// `Scheduler::stop()`, after the running flag is cleared so no worker
    /// can acquire a fresh lease during the drain.
    pub fn destroy(&self, last: T) {
        let previous = {
            let _guard = self.publish_lock.lock();
            self.current.swap(Arc::new(last))
        };
        while Arc::strong_count(&previous) > 1 {
            std::thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }
}
