//! Configuration for the relay.
//!
//! Sources, later wins: built-in defaults, the TOML file, environment
//! variables, command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ipid_core::covert::DEFAULT_MARKER;
use ipid_core::detect::detector::{DEFAULT_BUCKET_SECONDS, DEFAULT_WINDOW_SIZE, MIN_BUCKET};
use ipid_core::detect::feature::DEFAULT_RATIO_THRESHOLD;
use ipid_core::forward::DEFAULT_MEAN_DELAY_MS;
use ipid_core::{
    ConnectionInfo, DetectorConfig, FeatureStrategy, IpidError, LabelMode, PipelineConfig,
    SinkFormat, StrategyKind, Timing, TimingMode, Topics,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bus connection.
    pub bus: BusConfig,
    /// Inbound and outbound topic names.
    pub topics: Topics,
    /// Delay/forward stage.
    pub forward: ForwardConfig,
    /// Sliding-window detector.
    pub detector: DetectorSection,
    /// Identification reseeding.
    pub mitigation: MitigationConfig,
    /// Initial ground-truth label.
    pub ground_truth: GroundTruthConfig,
    /// Metrics output.
    pub metrics: MetricsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker address, `host:port`.
    pub address: String,
    /// Give up connecting after this long.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Upper bound of the uniform per-frame delay.
    pub mean_delay_ms: u64,
    /// How long shutdown waits for delayed frames.
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub window_size: usize,
    /// Marker looked for in payloads by the marker strategy.
    pub marker: String,
    pub strategy: StrategyKind,
    /// Minimum printable share for the ratio strategy.
    pub ratio_threshold: f64,
    pub timing: TimingMode,
    /// Bucket length for bucketed timing.
    pub window_seconds: f64,
    /// Bucket step; defaults to `window_seconds`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_seconds: Option<f64>,
    pub label_mode: LabelMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MitigationConfig {
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthConfig {
    /// Whether covert traffic is being injected when the relay starts.
    pub covert_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Each run writes into a timestamped subdirectory of this.
    pub results_dir: PathBuf,
    pub format: SinkFormat,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4222".into(),
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            mean_delay_ms: DEFAULT_MEAN_DELAY_MS,
            drain_timeout_ms: 2000,
        }
    }
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            marker: String::from_utf8_lossy(DEFAULT_MARKER).into_owned(),
            strategy: StrategyKind::Marker,
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            timing: TimingMode::Event,
            window_seconds: DEFAULT_BUCKET_SECONDS,
            step_seconds: None,
            label_mode: LabelMode::External,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            format: SinkFormat::Csv,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RelayConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, IpidError> {
        toml::from_str(text).map_err(|e| IpidError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, IpidError> {
        toml::to_string_pretty(self).map_err(|e| IpidError::Config(e.to_string()))
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), IpidError> {
        std::fs::write(path, Self::default().to_toml()?)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), IpidError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value when set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), IpidError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BUS_ADDR") {
            self.bus.address = v;
        }
        if let Some(v) = lookup("BUS_CONNECT_TIMEOUT_MS") {
            self.bus.connect_timeout_ms = parse_num("BUS_CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MEAN_DELAY_MS") {
            self.forward.mean_delay_ms = parse_num("MEAN_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("WINDOW_SIZE") {
            self.detector.window_size = parse_num("WINDOW_SIZE", &v)?;
        }
        if let Some(v) = lookup("DETECTION_MARKER") {
            self.detector.marker = v;
        }
        if let Some(v) = lookup("DETECTION_STRATEGY") {
            self.detector.strategy = v.parse()?;
        }
        if let Some(v) = lookup("RATIO_THRESHOLD") {
            self.detector.ratio_threshold = parse_num("RATIO_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("DETECTION_TIMING") {
            self.detector.timing = v.parse()?;
        }
        if let Some(v) = lookup("DETECTION_WINDOW_SECONDS") {
            self.detector.window_seconds = parse_num("DETECTION_WINDOW_SECONDS", &v)?;
        }
        if let Some(v) = lookup("DETECTION_STEP_SECONDS") {
            self.detector.step_seconds = Some(parse_num("DETECTION_STEP_SECONDS", &v)?);
        }
        if let Some(v) = lookup("LABEL_MODE") {
            self.detector.label_mode = v.parse()?;
        }
        if let Some(v) = lookup("MITIGATE_ACTIVE") {
            self.mitigation.active = parse_bool("MITIGATE_ACTIVE", &v)?;
        }
        if let Some(v) = lookup("COVERT_ACTIVE") {
            self.ground_truth.covert_active = parse_bool("COVERT_ACTIVE", &v)?;
        }
        if let Some(v) = lookup("RESULTS_DIR") {
            self.metrics.results_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), IpidError> {
        if self.detector.window_size == 0 {
            return Err(IpidError::Config("detector.window_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.detector.ratio_threshold) {
            return Err(IpidError::Config(format!(
                "detector.ratio_threshold {} outside [0, 1]",
                self.detector.ratio_threshold
            )));
        }
        seconds("detector.window_seconds", self.detector.window_seconds)?;
        if let Some(step) = self.detector.step_seconds {
            seconds("detector.step_seconds", step)?;
        }
        if self.detector.strategy == StrategyKind::Marker && self.detector.marker.is_empty() {
            return Err(IpidError::Config("detector.marker must not be empty".into()));
        }
        self.topics.validate()?;
        self.connection_info()?;
        Ok(())
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo, IpidError> {
        ConnectionInfo::parse(&self.bus.address)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.forward.drain_timeout_ms)
    }

    pub fn to_detector_config(&self) -> Result<DetectorConfig, IpidError> {
        let d = &self.detector;
        let strategy = match d.strategy {
            StrategyKind::Marker => FeatureStrategy::marker(d.marker.as_bytes()),
            StrategyKind::Ratio => FeatureStrategy::printable_ratio(d.ratio_threshold)?,
        };
        let timing = match d.timing {
            TimingMode::Event => Timing::EventDriven,
            TimingMode::Bucketed => Timing::Bucketed {
                length: seconds("detector.window_seconds", d.window_seconds)?,
                step: seconds(
                    "detector.step_seconds",
                    d.step_seconds.unwrap_or(d.window_seconds),
                )?,
            },
        };
        Ok(DetectorConfig {
            window_size: d.window_size,
            strategy,
            timing,
            label_mode: d.label_mode,
        })
    }

    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, IpidError> {
        Ok(PipelineConfig {
            topics: self.topics.clone(),
            detector: self.to_detector_config()?,
            mitigate: self.mitigation.active,
            mean_delay_ms: self.forward.mean_delay_ms,
        })
    }
}

/// Bucket lengths must be representable and at least [`MIN_BUCKET`].
fn seconds(key: &str, value: f64) -> Result<Duration, IpidError> {
    let duration = Duration::try_from_secs_f64(value)
        .map_err(|e| IpidError::Config(format!("{key} = {value}: {e}")))?;
    if duration < MIN_BUCKET {
        return Err(IpidError::Config(format!(
            "{key} must be at least {:?}, got {value}",
            MIN_BUCKET
        )));
    }
    Ok(duration)
}

fn parse_num<T>(key: &str, value: &str) -> Result<T, IpidError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| IpidError::Config(format!("{key}={value:?}: {e}")))
}

pub fn parse_bool(key: &str, value: &str) -> Result<bool, IpidError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(IpidError::Config(format!("{key}={value:?} is not a boolean"))),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.bus.address, "127.0.0.1:4222");
        assert_eq!(cfg.forward.mean_delay_ms, 200);
        assert_eq!(cfg.detector.window_size, 20);
        assert_eq!(cfg.detector.marker, "CovertChannel");
        assert!(!cfg.mitigation.active);
        assert!(!cfg.ground_truth.covert_active);
        assert_eq!(cfg.topics.from_segment_a, "inpktsec");
        cfg.validate().unwrap();
    }

    #[test]
    fn roundtrip_config() {
        let cfg = RelayConfig::default();
        let text = cfg.to_toml().unwrap();
        assert!(text.contains("mean_delay_ms"));
        assert!(text.contains("[detector]"));
        let parsed = RelayConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = RelayConfig::from_toml(
            r#"
            [detector]
            window_size = 8
            strategy = "ratio"
            timing = "bucketed"
            window_seconds = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detector.window_size, 8);
        assert_eq!(cfg.detector.strategy, StrategyKind::Ratio);
        assert_eq!(cfg.forward.mean_delay_ms, 200);

        let det = cfg.to_detector_config().unwrap();
        assert_eq!(det.timing, Timing::bucketed(Duration::from_secs(5)));
        assert_eq!(det.strategy, FeatureStrategy::PrintableRatio { threshold: 0.8 });
    }

    #[test]
    fn environment_overrides_file() {
        let mut cfg = RelayConfig::default();
        cfg.apply_env(env(&[
            ("MEAN_DELAY_MS", "0"),
            ("WINDOW_SIZE", "4"),
            ("MITIGATE_ACTIVE", "yes"),
            ("COVERT_ACTIVE", "1"),
            ("DETECTION_TIMING", "bucketed"),
            ("DETECTION_WINDOW_SECONDS", "2.5"),
            ("DETECTION_STEP_SECONDS", "1"),
            ("LABEL_MODE", "self-consistent"),
            ("BUS_ADDR", "nats://broker:4222"),
        ]))
        .unwrap();
        assert_eq!(cfg.forward.mean_delay_ms, 0);
        assert_eq!(cfg.detector.window_size, 4);
        assert!(cfg.mitigation.active);
        assert!(cfg.ground_truth.covert_active);
        assert_eq!(cfg.detector.label_mode, LabelMode::SelfConsistent);
        let info = cfg.connection_info().unwrap();
        assert_eq!((info.host(), info.port()), ("broker", 4222));

        let det = cfg.to_detector_config().unwrap();
        assert_eq!(
            det.timing,
            Timing::Bucketed {
                length: Duration::from_millis(2500),
                step: Duration::from_secs(1),
            }
        );
    }

    #[test]
    fn bad_environment_values_are_errors() {
        let mut cfg = RelayConfig::default();
        assert!(cfg.apply_env(env(&[("WINDOW_SIZE", "many")])).is_err());
        assert!(cfg.apply_env(env(&[("MITIGATE_ACTIVE", "maybe")])).is_err());
        assert!(cfg.apply_env(env(&[("DETECTION_STRATEGY", "vibes")])).is_err());
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let mut cfg = RelayConfig::default();
        cfg.detector.window_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.detector.ratio_threshold = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.detector.step_seconds = Some(0.0);
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.bus.address = "no-port".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bucket_lengths_must_be_representable() {
        // Rounds to 0ns.
        let mut cfg = RelayConfig::default();
        cfg.apply_env(env(&[
            ("DETECTION_TIMING", "bucketed"),
            ("DETECTION_WINDOW_SECONDS", "1e-10"),
        ]))
        .unwrap();
        assert!(cfg.validate().is_err());
        assert!(cfg.to_detector_config().is_err());

        // Too big for a Duration.
        let mut cfg = RelayConfig::default();
        cfg.detector.timing = TimingMode::Bucketed;
        cfg.detector.window_seconds = 1e20;
        assert!(cfg.validate().is_err());
        assert!(cfg.to_detector_config().is_err());

        let mut cfg = RelayConfig::default();
        cfg.detector.timing = TimingMode::Bucketed;
        cfg.detector.step_seconds = Some(1e20);
        assert!(cfg.validate().is_err());
        assert!(cfg.to_pipeline_config().is_err());

        let mut cfg = RelayConfig::default();
        cfg.detector.timing = TimingMode::Bucketed;
        cfg.detector.window_seconds = 0.5;
        cfg.validate().unwrap();
        assert_eq!(
            cfg.to_detector_config().unwrap().timing,
            Timing::bucketed(Duration::from_millis(500))
        );
    }

    #[test]
    fn booleans() {
        for t in ["1", "true", "TRUE", "yes", "on"] {
            assert!(parse_bool("X", t).unwrap());
        }
        for f in ["0", "false", "No", "off"] {
            assert!(!parse_bool("X", f).unwrap());
        }
    }

    #[test]
    fn write_default_creates_loadable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.toml");
        RelayConfig::write_default(&path).unwrap();
        assert_eq!(RelayConfig::load(&path), RelayConfig::default());
    }
}
