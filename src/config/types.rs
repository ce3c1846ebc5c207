use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Deserialize a `T` that implements `Default` — treats JSON/YAML `null` the
/// same as a missing field (returns `T::default()`). Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_scheduler_type() -> String {
    "default_scheduler".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rate_limiter_type() -> String {
    "local".to_string()
}

/// Top-level manifest: zero or more named scheduler instances, each backed
/// by its own per-scheduler YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerManifest {
    #[serde(default)]
    pub schedulers: Vec<SchedulerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerEntry {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "type", default = "default_scheduler_type")]
    pub scheduler_type: String,

    pub config_file: PathBuf,
}

/// A single scheduler's configuration, as read from its per-scheduler YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 0 means "resolve to hardware concurrency" at snapshot-build time.
    #[serde(default)]
    pub worker_threads: u32,

    pub scheduler_interval_seconds: u64,

    pub rocketmq: BrokerConfig,

    #[serde(default)]
    pub time_windows: Vec<TimeWindowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub buffer_consumer_group: String,
    pub buffer_consumer_access_point: String,
    pub buffer_consumer_topic: String,
    pub buffer_consumer_await_duration: u64,
    pub buffer_consumer_batch_size: u32,
    pub buffer_consumer_invisible_duration: u64,
    pub target_producer_access_point: String,
    pub target_producer_topic: String,
}

/// A window `id` as written in YAML — either a bare string or an integer,
/// both stringified for internal use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowId {
    Text(String),
    Number(i64),
}

impl WindowId {
    pub fn as_str(&self) -> String {
        match self {
            WindowId::Text(s) => s.clone(),
            WindowId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowConfig {
    pub id: WindowId,

    /// Wall-clock "HH:MM", inclusive lower bound.
    pub start: String,

    /// Wall-clock "HH:MM", inclusive upper bound.
    pub end: String,

    pub enable: bool,

    #[serde(default = "default_rate_limiter_type")]
    pub rate_limiter_type: String,

    /// Raw JSON document, shape depends on `rate_limiter_type` — see
    /// `crate::ratelimit`.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rate_limiter_config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scheduler_yaml() -> &'static str {
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
    rate_limiter_type: local
    rate_limiter_config: '{"rate": 10, "burst": 10}'
"#
    }

    #[test]
    fn parses_minimal_scheduler_config() {
        let cfg: SchedulerConfig = serde_yaml::from_str(sample_scheduler_yaml()).unwrap();
        assert_eq!(cfg.scheduler_interval_seconds, 5);
        assert_eq!(cfg.worker_threads, 0);
        assert_eq!(cfg.time_windows.len(), 1);
        assert_eq!(cfg.time_windows[0].id.as_str(), "morning");
    }

    #[test]
    fn window_id_accepts_integer() {
        let yaml = r#"
id: 7
start: "00:00"
end: "01:00"
enable: true
"#;
        let w: TimeWindowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(w.id.as_str(), "7");
        assert_eq!(w.rate_limiter_type, "local");
        assert!(w.rate_limiter_config.is_none());
    }

    #[test]
    fn rate_limiter_config_null_is_none() {
        let yaml = r#"
id: a
start: "00:00"
end: "01:00"
enable: true
rate_limiter_config: null
"#;
        let w: TimeWindowConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(w.rate_limiter_config.is_none());
    }

    #[test]
    fn manager_manifest_defaults() {
        let yaml = r#"
schedulers:
  - name: primary
    config_file: schedulers/primary.yaml
"#;
        let manifest: ManagerManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.schedulers.len(), 1);
        assert!(manifest.schedulers[0].enabled);
        assert_eq!(manifest.schedulers[0].scheduler_type, "default_scheduler");
    }

    #[test]
    fn manager_manifest_explicit_fields() {
        let yaml = r#"
schedulers:
  - name: off-hours
    enabled: false
    type: default_scheduler
    config_file: schedulers/off-hours.yaml
"#;
        let manifest: ManagerManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(!manifest.schedulers[0].enabled);
    }
}
