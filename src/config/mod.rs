pub mod types;
pub mod window;

pub use types::*;

use crate::error::RelayError;
use std::path::Path;

impl SchedulerConfig {
    /// Load and structurally validate a single scheduler's YAML file.
    ///
    /// Unlike the infrastructure config this crate's ancestry loads
    /// elsewhere, a missing file is not a valid empty configuration here —
    /// the caller is expected to treat the resulting error as fatal startup
    /// failure (see `crate::error::RelayError::FatalStartup`).
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("reading {}: {}", path.display(), e))
        })?;

        let config: SchedulerConfig = serde_yaml::from_str(&content)
            .map_err(|e| RelayError::config(format!("parsing {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.scheduler_interval_seconds < 1 {
            return Err(RelayError::config(
                "scheduler_interval_seconds must be >= 1",
            ));
        }
        if self.rocketmq.buffer_consumer_await_duration < 1 {
            return Err(RelayError::config(
                "buffer_consumer_await_duration must be >= 1",
            ));
        }
        if self.rocketmq.buffer_consumer_batch_size < 1 {
            return Err(RelayError::config("buffer_consumer_batch_size must be >= 1"));
        }
        if self.rocketmq.buffer_consumer_invisible_duration <= 10 {
            return Err(RelayError::config(
                "buffer_consumer_invisible_duration must be > 10",
            ));
        }

        // Validates sort order, overlap/adjacency, and unique ids as a
        // side effect — errors propagate, the parsed windows are discarded
        // here (the scheduler re-derives them when building a snapshot).
        window::validate_time_windows(&self.time_windows)?;

        Ok(())
    }
}

impl ManagerManifest {
    /// Load the top-level manifest. Duplicate scheduler names abort the
    /// whole load before any scheduler is constructed, mirroring the
    /// source system's all-or-nothing manifest parse.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("reading {}: {}", path.display(), e))
        })?;

        let manifest: ManagerManifest = serde_yaml::from_str(&content)
            .map_err(|e| RelayError::config(format!("parsing {}: {}", path.display(), e)))?;

        let mut seen = std::collections::HashSet::new();
        for entry in &manifest.schedulers {
            if !seen.insert(entry.name.clone()) {
                return Err(RelayError::config(format!(
                    "duplicate scheduler name '{}'",
                    entry.name
                )));
            }
        }

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    fn valid_scheduler_yaml() -> &'static str {
        r#"
scheduler_interval_seconds: 5
rocketmq:
  buffer_consumer_group: relay-group
  buffer_consumer_access_point: 127.0.0.1:9876
  buffer_consumer_topic: buffer-topic
  buffer_consumer_await_duration: 3
  buffer_consumer_batch_size: 32
  buffer_consumer_invisible_duration: 30
  target_producer_access_point: 127.0.0.1:9876
  target_producer_topic: target-topic
time_windows:
  - id: morning
    start: "09:00"
    end: "17:00"
    enable: true
"#
    }

    #[test]
    fn loads_valid_scheduler_config() {
        let f = write_temp(valid_scheduler_yaml());
        let cfg = SchedulerConfig::load(f.path()).unwrap();
        assert_eq!(cfg.time_windows.len(), 1);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = SchedulerConfig::load(Path::new("/nonexistent/path.yaml")).unwrap_err();
        match err {
            RelayError::Config(_) => {}
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_invisible_duration_at_boundary() {
        let yaml = valid_scheduler_yaml().replace(
            "buffer_consumer_invisible_duration: 30",
            "buffer_consumer_invisible_duration: 10",
        );
        let f = write_temp(&yaml);
        assert!(SchedulerConfig::load(f.path()).is_err());
    }

    #[test]
    fn manager_manifest_rejects_duplicate_names() {
        let yaml = r#"
schedulers:
  - name: primary
    config_file: a.yaml
  - name: primary
    config_file: b.yaml
"#;
        let f = write_temp(yaml);
        assert!(ManagerManifest::load(f.path()).is_err());
    }

    #[test]
    fn manager_manifest_loads_distinct_names() {
        let yaml = r#"
schedulers:
  - name: primary
    config_file: a.yaml
  - name: secondary
    config_file: b.yaml
    enabled: false
"#;
        let f = write_temp(yaml);
        let manifest = ManagerManifest::load(f.path()).unwrap();
        assert_eq!(manifest.schedulers.len(), 2);
    }
}
