//! Thin fan-out over zero or more named `Scheduler` instances, loaded
//! from a top-level manifest. Grounded on
//! `examples/original_source/src/scheduler_manager.cpp`: duplicate
//! scheduler names abort the whole load before any scheduler is
//! constructed, but once the manifest itself is valid, one instance
//! failing to initialize or start is logged and does not prevent the
//! others from running.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::broker::InMemoryBroker;
use crate::config::types::{ManagerManifest, SchedulerEntry};
use crate::config::SchedulerConfig;
use crate::error::RelayError;
use crate::ratelimit::RateLimiter;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::watcher::HotReloadWatcher;

/// Resolves a scheduler `type` string from the manifest against the set
/// of scheduler implementations this crate registers. There is exactly
/// one today (`"default_scheduler"`); the registry exists so a second
/// implementation could be added without changing the manifest format,
/// mirroring the rate-limiter Extension Registry in `crate::ratelimit`.
fn scheduler_type_registry() -> Registry<()> {
    let mut registry = Registry::new();
    registry.register("default_scheduler", || ());
    registry
}

/// Read `path` and decide whether it is a manager manifest (top-level
/// `schedulers:` key) or a single per-scheduler YAML file.
fn is_manifest(path: &Path) -> Result<bool, RelayError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RelayError::config(format!("reading {}: {}", path.display(), e)))?;

    let value: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| RelayError::config(format!("parsing {}: {}", path.display(), e)))?;

    Ok(matches!(value, serde_yaml::Value::Mapping(ref m)
        if m.contains_key(serde_yaml::Value::String("schedulers".to_string()))))
}

pub struct Manager {
    entries: Vec<SchedulerEntry>,
    base_dir: PathBuf,
    rate_limiter_registry: Arc<Registry<Arc<dyn RateLimiter>>>,
    broker: Arc<InMemoryBroker>,
    schedulers: Mutex<Vec<Arc<Scheduler>>>,
}

impl Manager {
    /// Parse `path` (manifest or single-scheduler file) and validate its
    /// structure — but do not yet construct any scheduler. Construction
    /// happens in `start_all()`, where a single entry's failure can be
    /// logged and skipped without taking the whole process down.
    pub fn load(
        path: &Path,
        rate_limiter_registry: Arc<Registry<Arc<dyn RateLimiter>>>,
        broker: Arc<InMemoryBroker>,
    ) -> Result<Self, RelayError> {
        let entries = if is_manifest(path)? {
            let manifest = ManagerManifest::load(path)?;
            let scheduler_types = scheduler_type_registry();
            for entry in &manifest.schedulers {
                scheduler_types.create(&entry.scheduler_type).map_err(|_| {
                    RelayError::config(format!(
                        "scheduler '{}': unknown type '{}'",
                        entry.name, entry.scheduler_type
                    ))
                })?;
            }
            manifest.schedulers
        } else {
            vec![SchedulerEntry {
                name: "default".to_string(),
                enabled: true,
                scheduler_type: "default_scheduler".to_string(),
                config_file: path.to_path_buf(),
            }]
        };

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(Self {
            entries,
            base_dir,
            rate_limiter_registry,
            broker,
            schedulers: Mutex::new(Vec::new()),
        })
    }

    fn resolve_config_path(&self, entry: &SchedulerEntry) -> PathBuf {
        if entry.config_file.is_absolute() {
            entry.config_file.clone()
        } else {
            self.base_dir.join(&entry.config_file)
        }
    }

    /// Initialize and start every enabled entry. A single entry's parse,
    /// init, or hot-reload-arm failure is logged and does not stop the
    /// rest from starting, per the source manager's per-instance
    /// try/log/continue fan-out. If at least one entry was enabled but
    /// none of them managed to start, that is a `FatalStartupError`: a
    /// fan-out with zero running schedulers is indistinguishable from the
    /// single-scheduler case where the only snapshot build failed.
    pub fn start_all(&self) -> Result<(), RelayError> {
        let mut schedulers = self.schedulers.lock().unwrap();
        let enabled_count = self.entries.iter().filter(|e| e.enabled).count();

        for entry in &self.entries {
            if !entry.enabled {
                info!(scheduler = %entry.name, "skipping disabled scheduler entry");
                continue;
            }

            let config_path = self.resolve_config_path(entry);

            let config = match SchedulerConfig::load(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(scheduler = %entry.name, error = %e, "failed to load scheduler config, skipping");
                    continue;
                }
            };

            let scheduler = match Scheduler::init(
                entry.name.clone(),
                config,
                self.rate_limiter_registry.clone(),
                self.broker.clone(),
            ) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    warn!(scheduler = %entry.name, error = %e, "failed to initialize scheduler, skipping");
                    continue;
                }
            };

            let watcher_scheduler = scheduler.clone();
            let watcher_registry = self.rate_limiter_registry.clone();
            let watcher_broker = self.broker.clone();
            let watcher_path = config_path.clone();
            match HotReloadWatcher::spawn(&config_path, move || {
                watcher_scheduler.reload_from_file(&watcher_path, &watcher_registry, &watcher_broker)
            }) {
                Ok(watcher) => scheduler.arm_hot_reload(watcher),
                Err(e) => warn!(scheduler = %entry.name, error = %e, "failed to arm hot reload, continuing without it"),
            }

            scheduler.start();
            schedulers.push(scheduler);
        }

        info!(started = schedulers.len(), total = self.entries.len(), "manager: scheduler startup complete");

        if enabled_count > 0 && schedulers.is_empty() {
            return Err(RelayError::FatalStartup(format!(
                "none of the {} enabled scheduler entr{} could be started",
                enabled_count,
                if enabled_count == 1 { "y" } else { "ies" }
            )));
        }

        Ok(())
    }

    /// Stop every scheduler this manager started. Order is unspecified;
    /// each `Scheduler::stop()` already unsubscribes its own hot reload
    /// before joining its own workers.
    pub fn stop_all(&self) {
        let mut schedulers = self.schedulers.lock().unwrap();
        for scheduler in schedulers.drain(..) {
            scheduler.stop();
        }
    }
}
