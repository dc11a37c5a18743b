use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::encode::EncoderKind;
use crate::foundation::core::{Fps, MIN_FRAME_SECS};
use crate::foundation::error::{ReelError, ReelResult};

/// Endpoint of the public sign-generation service.
pub const DEFAULT_ENDPOINT: &str = "https://sing-lang-creation-backend.onrender.com/get_frames";

/// Environment variable that overrides [`GeneratorConfig::endpoint`].
pub const ENDPOINT_ENV: &str = "SIGNREEL_ENDPOINT";

/// Settings for one generation pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub request_timeout_secs: u64,
    /// Surface samples per second taken by the recorder.
    pub capture_fps: u32,
    /// Extra delay past the declared total before the stop timer fires.
    pub stop_margin_ms: u64,
    pub min_frame_secs: f64,
    pub encoder: EncoderKind,
    pub jpeg_quality: u8,
    /// Background used to flatten alpha before encoding (straight RGBA8).
    pub background_rgba: [u8; 4],
    /// File stem for exported downloads; the extension comes from the encoder.
    pub download_stem: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_secs: 60,
            capture_fps: 30,
            stop_margin_ms: 100,
            min_frame_secs: MIN_FRAME_SECS,
            encoder: EncoderKind::Mjpeg,
            jpeg_quality: 85,
            background_rgba: [0, 0, 0, 255],
            download_stem: "sign_language".to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> ReelResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ReelError::validation("endpoint must be non-empty"));
        }
        if self.capture_fps == 0 {
            return Err(ReelError::validation("capture fps must be non-zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ReelError::validation("request timeout must be non-zero"));
        }
        if !(self.min_frame_secs.is_finite() && self.min_frame_secs > 0.0) {
            return Err(ReelError::validation(
                "min frame duration must be a positive number of seconds",
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ReelError::validation("jpeg quality must be within 1..=100"));
        }
        if self.download_stem.trim().is_empty() {
            return Err(ReelError::validation("download stem must be non-empty"));
        }
        Ok(())
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_path(path: &Path) -> ReelResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ReelError::validation(format!("config '{}': {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `SIGNREEL_ENDPOINT` when it is set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV)
            && !endpoint.trim().is_empty()
        {
            self.endpoint = endpoint;
        }
        self
    }

    pub fn fps(&self) -> ReelResult<Fps> {
        Fps::new(self.capture_fps, 1)
    }

    pub fn stop_margin(&self) -> Duration {
        Duration::from_millis(self.stop_margin_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Download filename for an artifact whose container uses `extension`.
    pub fn download_filename(&self, extension: &str) -> String {
        format!("{}.{}", self.download_stem, extension)
    }
}
