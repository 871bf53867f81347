use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Defaults, overlaid by an optional JSON file, then by command-line flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoothConfig {
    /// Endpoint issuing presigned upload URLs
    pub presign_url: String,
    /// Workflow trigger endpoint called after upload
    pub job_url: String,
    /// Realtime push endpoint
    pub ws_url: String,
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub game: GameConfig,
    pub wait: WaitConfig,
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            presign_url: "http://localhost:3000/presign".to_string(),
            job_url: "http://localhost:3000/jobs".to_string(),
            ws_url: "ws://localhost:3001".to_string(),
            camera: CameraConfig::default(),
            capture: CaptureConfig::default(),
            game: GameConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index used for the front (user-facing) camera
    pub front_device: u32,
    /// Device index used for the back (environment-facing) camera
    pub back_device: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            front_device: 0,
            back_device: 0,
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Larger side of a captured image never exceeds this
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    /// Where `save` writes photos
    pub output_dir: PathBuf,
    /// Image captured instead of a live frame when no camera is open
    pub fallback_image: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1280,
            jpeg_quality: 92,
            output_dir: PathBuf::from("."),
            fallback_image: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub enabled: bool,
    pub spin_ms: u64,
    pub tick_ms: u64,
    pub reveal_ms: u64,
    pub window_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spin_ms: 3000,
            tick_ms: 100,
            reveal_ms: 1500,
            window_ms: 5000,
        }
    }
}

impl GameConfig {
    pub fn spin(&self) -> Duration {
        Duration::from_millis(self.spin_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn reveal(&self) -> Duration {
        Duration::from_millis(self.reveal_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaitConfig {
    pub timeout_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl WaitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BoothConfig {
    /// Read a JSON config file; missing keys keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: BoothConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.max_dimension == 0 {
            bail!("capture.max_dimension must be greater than zero");
        }
        if self.game.tick_ms == 0 {
            bail!("game.tick_ms must be greater than zero");
        }
        if self.wait.timeout_secs == 0 {
            bail!("wait.timeout_secs must be greater than zero");
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            bail!("ws_url must be a ws:// or wss:// URL, got {}", self.ws_url);
        }
        Ok(())
    }
}
