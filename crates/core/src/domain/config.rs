//! Configuration management for Triode
//!
//! This module provides:
//! - Configuration structs for the audio stream, DSP and diagnostics
//! - TOML persistence under the user config directory
//! - Hot-reload notifications for the external coefficient file

use crate::domain::audio::{ChannelCount, StreamConfig, SampleRate};
use crate::domain::dsp::params;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Stream settings requested from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Buffer size in frames
    pub buffer_size: u32,

    /// Channel count (1 or 2)
    pub channels: u16,

    /// Capacity of the capture -> render hand-off in frames (0 = 8 buffers)
    pub ring_buffer_frames: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            channels: 2,
            ring_buffer_frames: 0,
        }
    }
}

impl AudioSettings {
    pub fn channel_count(&self) -> ChannelCount {
        ChannelCount::clamped(self.channels)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: SampleRate::from_hz(self.sample_rate),
            channels: self.channel_count(),
            buffer_size: self.buffer_size,
        }
    }

    /// Ring capacity in frames, defaulting to eight host buffers
    pub fn ring_frames(&self) -> usize {
        if self.ring_buffer_frames == 0 {
            self.buffer_size as usize * 8
        } else {
            self.ring_buffer_frames as usize
        }
    }
}

/// Signal chain settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspSettings {
    /// Start with processing bypassed
    pub bypass: bool,

    /// Tube output trim in dB
    pub output_gain_db: f32,

    /// Run the pre/post biquad banks around the tube stage
    pub filter_banks: bool,

    /// Raw little-endian f64 coefficient file replacing the built-in banks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficient_file: Option<PathBuf>,
}

impl Default for DspSettings {
    fn default() -> Self {
        Self {
            bypass: false,
            output_gain_db: 0.0,
            filter_banks: false,
            coefficient_file: None,
        }
    }
}

/// Snapshot cadence, in callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Publish levels every N callbacks
    pub level_interval: u32,

    /// Publish dry/wet waveforms every N callbacks
    pub waveform_interval: u32,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            level_interval: 4,
            waveform_interval: 2,
        }
    }
}

/// Complete Triode configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriodeConfig {
    pub audio: AudioSettings,
    pub dsp: DspSettings,
    pub diagnostics: DiagnosticsSettings,
}

impl TriodeConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config.normalized())
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Reject values that cannot be clamped into something meaningful
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".to_string()));
        }
        if self.audio.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".to_string()));
        }
        if !self.dsp.output_gain_db.is_finite() {
            return Err(ConfigError::Invalid("output_gain_db must be finite".to_string()));
        }
        if self.diagnostics.level_interval == 0 || self.diagnostics.waveform_interval == 0 {
            return Err(ConfigError::Invalid("diagnostic intervals must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Clamp ranged fields into their supported bounds
    pub fn normalized(mut self) -> Self {
        let channels = ChannelCount::clamped(self.audio.channels).count();
        if channels != self.audio.channels {
            warn!(requested = self.audio.channels, using = channels, "Channel count clamped");
            self.audio.channels = channels;
        }

        let gain = self
            .dsp
            .output_gain_db
            .clamp(params::OUTPUT_GAIN_DB_MIN, params::OUTPUT_GAIN_DB_MAX);
        if gain != self.dsp.output_gain_db {
            warn!(requested = self.dsp.output_gain_db, using = gain, "Output gain clamped");
            self.dsp.output_gain_db = gain;
        }

        if !SampleRate::from_hz(self.audio.sample_rate).is_supported() {
            warn!(
                sample_rate = self.audio.sample_rate,
                "Sample rate has no dedicated tube coefficients, nearest set will be used"
            );
        }

        self
    }
}

/// Configuration manager for the main Triode config
///
/// Manages the configuration file at `~/.config/triode/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/triode` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("triode"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields (and persists) the factory default. A corrupt
    /// file is backed up to `config.toml.corrupt` and the default is used.
    #[instrument(skip(self))]
    pub async fn load(&self) -> TriodeConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = TriodeConfig::default();
            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match TriodeConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                TriodeConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &TriodeConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

/// Watches the external coefficient file for hot reload
///
/// The parent directory is watched so that editors replacing the file
/// atomically are still noticed.
pub struct CoefficientWatcher {
    _watcher: notify::RecommendedWatcher,
    path: PathBuf,
    change_tx: broadcast::Sender<PathBuf>,
}

impl CoefficientWatcher {
    pub async fn new(path: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| ConfigError::Invalid(format!("Not a file path: {}", path.display())))?
            .to_os_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await?;

        let (change_tx, _change_rx) = broadcast::channel(16);

        let tx_clone = change_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                    ) {
                        return;
                    }
                    for changed in event.paths {
                        if changed.file_name() == Some(file_name.as_os_str()) {
                            // No receivers just means nobody is listening yet
                            let _ = tx_clone.send(changed);
                        }
                    }
                }
                Err(e) => error!(error = %e, "Coefficient watch error"),
            }
        })?;

        watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), "Coefficient watcher started");

        Ok(Self {
            _watcher: watcher,
            path,
            change_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to change events for the watched file
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.change_tx.subscribe()
    }
}
