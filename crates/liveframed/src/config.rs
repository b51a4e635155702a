use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use liveframe_core::{LivenessThresholds, PipelineConfig, SpoofPolicy, SpoofThresholds};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `LIVEFRAME_CONFIG` (if
/// set), then `LIVEFRAME_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Socket address the HTTP server binds to (default: 0.0.0.0:8000).
    pub listen: String,
    /// Number of engine threads, each with its own model instances.
    pub workers: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Check model checksums against the manifest at startup.
    pub verify_models: bool,
    /// Largest batch accepted per request.
    pub max_frames: usize,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
    /// Expected upper bound of one embedding call in milliseconds. Slower
    /// calls are logged; the frame is kept. Also pads the reply timeout,
    /// since the frame in flight at the batch deadline runs to completion.
    /// 0 disables.
    pub frame_timeout_ms: u64,
    /// Per-batch budget in milliseconds (0 disables).
    pub batch_timeout_ms: u64,
    /// Whether spoof heuristics gate the liveness verdict.
    pub spoof_policy: SpoofPolicy,
    pub spoof: SpoofThresholds,
    pub liveness: LivenessThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            workers: 1,
            model_dir: liveframe_models::default_model_dir(),
            verify_models: true,
            max_frames: 10,
            max_body_bytes: 16 * 1024 * 1024,
            frame_timeout_ms: 2_000,
            batch_timeout_ms: 8_000,
            spoof_policy: SpoofPolicy::LogOnly,
            spoof: SpoofThresholds::default(),
            liveness: LivenessThresholds::default(),
        }
    }
}

impl Config {
    /// Load configuration from the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("LIVEFRAME_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `LIVEFRAME_*` values. Unparseable values keep the current setting.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("LIVEFRAME_LISTEN") {
            self.listen = listen;
        }
        if let Some(dir) = lookup("LIVEFRAME_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("LIVEFRAME_VERIFY_MODELS") {
            self.verify_models = v != "0";
        }

        let lookup = &lookup;
        override_parsed(lookup, "LIVEFRAME_WORKERS", &mut self.workers);
        override_parsed(lookup, "LIVEFRAME_MAX_FRAMES", &mut self.max_frames);
        override_parsed(lookup, "LIVEFRAME_MAX_BODY_BYTES", &mut self.max_body_bytes);
        override_parsed(lookup, "LIVEFRAME_FRAME_TIMEOUT_MS", &mut self.frame_timeout_ms);
        override_parsed(lookup, "LIVEFRAME_BATCH_TIMEOUT_MS", &mut self.batch_timeout_ms);
        override_parsed(lookup, "LIVEFRAME_SPOOF_POLICY", &mut self.spoof_policy);
        override_parsed(lookup, "LIVEFRAME_MIN_SHARPNESS", &mut self.spoof.min_sharpness);
        override_parsed(lookup, "LIVEFRAME_MAX_SHARPNESS", &mut self.spoof.max_sharpness);
        override_parsed(lookup, "LIVEFRAME_BRIGHT_LEVEL", &mut self.spoof.bright_level);
        override_parsed(lookup, "LIVEFRAME_MAX_BRIGHT_RATIO", &mut self.spoof.max_bright_ratio);
        override_parsed(
            lookup,
            "LIVEFRAME_MIN_MEAN_DISTANCE",
            &mut self.liveness.min_mean_distance,
        );
        override_parsed(
            lookup,
            "LIVEFRAME_MAX_MEAN_DISTANCE",
            &mut self.liveness.max_mean_distance,
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if self.max_frames == 0 {
            return invalid("max_frames must be at least 1".into());
        }
        let spoof = &self.spoof;
        if !(spoof.min_sharpness < spoof.max_sharpness) {
            return invalid(format!(
                "min_sharpness ({}) must be below max_sharpness ({})",
                spoof.min_sharpness, spoof.max_sharpness
            ));
        }
        if !(0.0..=1.0).contains(&spoof.max_bright_ratio) {
            return invalid(format!(
                "max_bright_ratio ({}) must be within [0, 1]",
                spoof.max_bright_ratio
            ));
        }
        let liveness = &self.liveness;
        if !(liveness.min_mean_distance >= 0.0
            && liveness.min_mean_distance < liveness.max_mean_distance)
        {
            return invalid(format!(
                "liveness band [{}, {}] is empty or negative",
                liveness.min_mean_distance, liveness.max_mean_distance
            ));
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        (self.frame_timeout_ms > 0).then(|| Duration::from_millis(self.frame_timeout_ms))
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_ms > 0).then(|| Duration::from_millis(self.batch_timeout_ms))
    }

    /// How long a request waits for its engine reply: the batch deadline
    /// plus one frame budget. `None` when both are disabled.
    pub fn reply_timeout(&self) -> Option<Duration> {
        match (self.frame_timeout(), self.batch_timeout()) {
            (None, None) => None,
            (frame, batch) => Some(frame.unwrap_or_default() + batch.unwrap_or_default()),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            spoof: self.spoof,
            liveness: self.liveness,
            spoof_policy: self.spoof_policy,
            slow_frame: self.frame_timeout(),
            batch_timeout: self.batch_timeout(),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_path(liveframe_models::DETECTOR.name)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_path(liveframe_models::RECOGNIZER.name)
    }

    fn model_path(&self, name: &str) -> String {
        self.model_dir.join(name).to_string_lossy().into_owned()
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable setting"),
    }
}
