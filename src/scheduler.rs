//! The core engine: one scheduler instance owns a config cell, a worker
//! pool, and a hot-reload subscription. Grounded on the source system's
//! `RocketMQDelayScheduler::init/start/stop` and `worker_thread_func`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::broker::{Consumer, InMemoryBroker, Message, Producer};
use crate::cell::ConfigCell;
use crate::config::types::SchedulerConfig;
use crate::config::window::{validate_time_windows, ValidatedWindow};
use crate::error::RelayError;
use crate::ratelimit::{self, RateLimiter};
use crate::registry::Registry;
use crate::watcher::HotReloadWatcher;

/// One fully-resolved, immutable window: inclusive `[start, end]` in
/// `hour*100+minute`, an optional rate limiter, and whether forwarding is
/// currently permitted at all.
pub struct TimeWindow {
    pub id: String,
    pub start: u16,
    pub end: u16,
    pub enabled: bool,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
}

/// The published unit: broker handles and the window table, rotated
/// together so a reload atomically swaps both configuration and
/// connections.
pub struct SchedulerSnapshot {
    pub worker_threads: usize,
    pub scheduler_interval: Duration,
    pub batch_size: u32,
    pub invisible_duration: Duration,
    pub consumer: Arc<dyn Consumer>,
    pub producer: Arc<dyn Producer>,
    pub time_windows: Vec<TimeWindow>,
}

impl SchedulerSnapshot {
    /// The final snapshot published by `Scheduler::stop()`: zero worker
    /// threads and an empty window table, keeping `previous`'s broker
    /// handles alive only as long as this snapshot itself is.
    fn empty_from(previous: &SchedulerSnapshot) -> Self {
        Self {
            worker_threads: 0,
            scheduler_interval: previous.scheduler_interval,
            batch_size: previous.batch_size,
            invisible_duration: previous.invisible_duration,
            consumer: previous.consumer.clone(),
            producer: previous.producer.clone(),
            time_windows: Vec::new(),
        }
    }
}

fn resolve_worker_threads(configured: u32) -> usize {
    if configured == 0 {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        configured as usize
    }
}

/// Build a snapshot from a parsed+validated config. `broker` supplies the
/// in-memory consumer/producer pair for this scheduler's two topics — see
/// `crate::broker` for why this is the shipped concrete realization of an
/// otherwise out-of-scope wire client.
pub fn build_snapshot(
    scheduler_name: &str,
    config: &SchedulerConfig,
    registry: &Registry<Arc<dyn RateLimiter>>,
    broker: &Arc<InMemoryBroker>,
) -> Result<SchedulerSnapshot, RelayError> {
    config.validate()?;

    let validated: Vec<ValidatedWindow> = validate_time_windows(&config.time_windows)?;

    let mut time_windows = Vec::with_capacity(validated.len());
    for w in validated {
        let rate_limiter = ratelimit::build_for_window(
            registry,
            &w.rate_limiter_type,
            w.rate_limiter_config.as_deref(),
            scheduler_name,
            &w.id,
        )?;
        time_windows.push(TimeWindow {
            id: w.id,
            start: w.start,
            end: w.end,
            enabled: w.enabled,
            rate_limiter: Some(rate_limiter),
        });
    }

    let consumer =
        Arc::new(broker.consumer(&config.rocketmq.buffer_consumer_topic)) as Arc<dyn Consumer>;
    let producer =
        Arc::new(broker.producer(&config.rocketmq.target_producer_topic)) as Arc<dyn Producer>;

    Ok(SchedulerSnapshot {
        worker_threads: resolve_worker_threads(config.worker_threads),
        scheduler_interval: Duration::from_secs(config.scheduler_interval_seconds),
        batch_size: config.rocketmq.buffer_consumer_batch_size,
        invisible_duration: Duration::from_secs(config.rocketmq.buffer_consumer_invisible_duration),
        consumer,
        producer,
        time_windows,
    })
}

/// Current wall-clock time of day as `hour*100+minute`, local time.
fn now_short() -> u16 {
    use chrono::Timelike;
    let now = chrono::Local::now();
    now.hour() as u16 * 100 + now.minute() as u16
}

pub struct Scheduler {
    name: String,
    cell: Arc<ConfigCell<SchedulerSnapshot>>,
    running: Arc<AtomicBool>,
    generation: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watcher: Mutex<Option<HotReloadWatcher>>,
}

impl Scheduler {
    pub fn init(
        name: String,
        config: SchedulerConfig,
        registry: Arc<Registry<Arc<dyn RateLimiter>>>,
        broker: Arc<InMemoryBroker>,
    ) -> Result<Arc<Self>, RelayError> {
        let snapshot = build_snapshot(&name, &config, &registry, &broker)?;
        let cell = Arc::new(ConfigCell::new(snapshot));

        Ok(Arc::new(Self {
            name,
            cell,
            running: Arc::new(AtomicBool::new(false)),
            generation: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-parse `config_path` and publish a new snapshot if it validates.
    /// Failures are logged and the cell is left
    /// unchanged.
    pub fn reload_from_file(
        &self,
        config_path: &std::path::Path,
        registry: &Registry<Arc<dyn RateLimiter>>,
        broker: &Arc<InMemoryBroker>,
    ) {
        match SchedulerConfig::load(config_path) {
            Ok(config) => match build_snapshot(&self.name, &config, registry, broker) {
                Ok(snapshot) => {
                    self.cell.store(snapshot);
                    info!(scheduler = %self.name, "hot reload: published new snapshot");
                }
                Err(e) => warn!(scheduler = %self.name, error = %e, "hot reload: snapshot build failed, keeping previous config"),
            },
            Err(e) => warn!(scheduler = %self.name, error = %e, "hot reload: parse failed, keeping previous config"),
        }
    }

    pub fn config_cell(&self) -> Arc<ConfigCell<SchedulerSnapshot>> {
        self.cell.clone()
    }

    /// Spawn the worker pool and (if a watcher was armed via
    /// `arm_hot_reload`) start watching for file changes. A second call
    /// while already running is a no-op, logged as a warning.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(scheduler = %self.name, "start called while already running, ignoring");
            return;
        }

        let snapshot = self.cell.load();
        let worker_threads = snapshot.worker_threads;
        drop(snapshot);

        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..worker_threads {
            let cell = self.cell.clone();
            let running = self.running.clone();
            let name = self.name.clone();
            workers.push(thread::spawn(move || {
                worker_loop(&name, worker_id, cell, running)
            }));
        }

        info!(scheduler = %self.name, worker_threads, "started");
    }

    pub fn arm_hot_reload(&self, watcher: HotReloadWatcher) {
        *self.watcher.lock().unwrap() = Some(watcher);
    }

    /// Unsubscribe hot-reload *before* joining workers, then clear the
    /// running flag and join. A second call while already stopped is a
    /// no-op. Destruction implies `stop()`.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.unsubscribe();
        }

        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }

        let previous = self.cell.load();
        let empty = SchedulerSnapshot::empty_from(&previous);
        drop(previous);
        self.cell.destroy(empty);

        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(scheduler = %self.name, "stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

const PACE_INTERVAL: Duration = Duration::from_millis(200);

fn worker_loop(
    scheduler_name: &str,
    worker_id: usize,
    cell: Arc<ConfigCell<SchedulerSnapshot>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        // 1. Snapshot: lease, copy what's needed, release immediately.
        let snapshot = cell.load();
        let now = now_short();

        // 2. Clock check: first enabled window containing `now`, inclusive.
        let selected = snapshot
            .time_windows
            .iter()
            .find(|w| w.enabled && w.start <= now && now <= w.end);

        let Some(window) = selected else {
            thread::sleep(snapshot.scheduler_interval);
            continue;
        };

        // 3. Rate-limit check.
        if let Some(limiter) = &window.rate_limiter {
            if !limiter.allowed() {
                thread::sleep(PACE_INTERVAL);
                continue;
            }
        }

        let consumer = snapshot.consumer.clone();
        let producer = snapshot.producer.clone();
        let scheduler_interval = snapshot.scheduler_interval;
        let invisible_duration = snapshot.invisible_duration;
        let batch_size = snapshot.batch_size;
        drop(snapshot);

        // 4. Receive.
        let batch = match consumer.receive(batch_size, invisible_duration) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(scheduler = scheduler_name, worker_id, error = %e, "receive failed");
                thread::sleep(scheduler_interval);
                continue;
            }
        };

        if batch.is_empty() {
            thread::sleep(scheduler_interval);
            continue;
        }

        // 5 & 6. Forward, then ack iff send succeeded.
        for message in &batch {
            forward_and_ack(scheduler_name, worker_id, &producer, &*consumer, message);
        }

        // 7. Pace after a processed batch.
        thread::sleep(PACE_INTERVAL);
    }
}

fn forward_and_ack(
    scheduler_name: &str,
    worker_id: usize,
    producer: &Arc<dyn Producer>,
    consumer: &dyn Consumer,
    message: &Message,
) {
    let forwarded = message.to_forwarded();
    match producer.send(&forwarded) {
        Ok(()) => {
            if let Err(e) = consumer.ack(message) {
                // Ack failure never blocks progress; the next upstream
                // redelivery will produce a duplicate downstream send,
                // which is the intended at-least-once behavior.
                warn!(scheduler = scheduler_name, worker_id, error = %e, "ack failed, duplicate possible on redelivery");
            }
        }
        Err(e) => {
            // No ack on send failure: upstream redelivery retries after
            // the invisibility window expires.
            warn!(scheduler = scheduler_name, worker_id, error = %e, "send failed, message left unacked");
        }
    }
}
