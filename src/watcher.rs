//! Filesystem-backed hot-reload subscription, watching a single scheduler
//! config file and invoking a callback once per debounced burst of
//! changes — adapted from an etcd-watch-driven reload loop to a plain
//! filesystem watch via the `notify` crate, since this system's config
//! lives on disk, not in an external KV store.
//!
//! Runs on its own `std::thread`, polling the `notify` channel with a
//! timeout so it can also observe an unsubscribe signal without an extra
//! channel library. A short debounce window collapses a burst of events
//! from a single editor save (write + rename) into one reload.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, warn};

use crate::error::RelayError;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);
const DEBOUNCE: Duration = Duration::from_millis(300);

/// An armed subscription on one config file path. Dropping or calling
/// `unsubscribe()` stops the background thread; `unsubscribe()` blocks
/// until it has exited, matching the unsubscribe-before-joining-workers
/// ordering in `Scheduler::stop`.
pub struct HotReloadWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    // Kept alive for the lifetime of the subscription; dropping it stops
    // the underlying OS-level watch.
    _watcher: RecommendedWatcher,
}

impl HotReloadWatcher {
    /// Watch `path` and invoke `on_change` (on the watcher's own thread)
    /// once per debounced burst of filesystem events. `on_change` is
    /// expected to re-parse and publish its own snapshot and to log its own
    /// success/failure; this module only decides *when* to call it.
    pub fn spawn<F>(path: &Path, on_change: F) -> Result<Self, RelayError>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| RelayError::dependency_init(format!("creating file watcher: {}", e)))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                RelayError::dependency_init(format!("watching {}: {}", path.display(), e))
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let path_owned: PathBuf = path.to_path_buf();

        let handle = thread::spawn(move || {
            run_debounce_loop(&path_owned, &rx, &stop_for_thread, &on_change)
        });

        Ok(Self {
            stop,
            handle: Some(handle),
            _watcher: watcher,
        })
    }

    /// Stop watching and wait for the background thread to exit. Safe to
    /// call even if the thread already exited on its own.
    pub fn unsubscribe(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HotReloadWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_debounce_loop(
    path: &Path,
    rx: &mpsc::Receiver<notify::Result<Event>>,
    stop: &Arc<AtomicBool>,
    on_change: &dyn Fn(),
) {
    let mut pending_since: Option<Instant> = None;

    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_TIMEOUT) {
            Ok(Ok(_event)) => {
                pending_since.get_or_insert_with(Instant::now);
            }
            Ok(Err(e)) => {
                error!(path = %path.display(), error = %e, "hot reload: filesystem watcher error");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!(path = %path.display(), "hot reload: watcher channel closed, stopping");
                return;
            }
        }

        if let Some(first_seen) = pending_since {
            if first_seen.elapsed() >= DEBOUNCE {
                pending_since = None;
                on_change();
            }
        }
    }
}
