//! Stream descriptors and file-based configuration
//!
//! [`StreamParameters`] and [`StreamOptions`] are built by the caller before a
//! stream is opened and never modified by the library. [`AudioConfig`] holds
//! defaults loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::Api;
use crate::constants::{DEFAULT_BUFFER_FRAMES, DEFAULT_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::format::SampleFormat;

/// Per-direction device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParameters {
    /// Device index as reported by the backend
    pub device_id: usize,
    /// Channels exchanged with the callback
    pub channel_count: u32,
    /// First device channel used (0-based)
    pub first_channel: u32,
}

impl StreamParameters {
    pub fn new(device_id: usize, channel_count: u32) -> Self {
        Self {
            device_id,
            channel_count,
            first_channel: 0,
        }
    }

    #[must_use]
    pub fn with_first_channel(mut self, first_channel: u32) -> Self {
        self.first_channel = first_channel;
        self
    }
}

/// A single stream behaviour flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamFlag {
    /// User buffers hold each channel in its own contiguous run
    NonInterleaved,
    /// Use the minimum number of periods
    MinimizeLatency,
    /// Open the device for exclusive, unconverted access
    ExclusiveDevice,
    /// Run the callback thread with realtime scheduling
    ScheduleRealtime,
    /// Open the system default device for device 0
    DefaultDevice,
}

impl StreamFlag {
    const fn bit(self) -> u32 {
        match self {
            Self::NonInterleaved => 0x1,
            Self::MinimizeLatency => 0x2,
            Self::ExclusiveDevice => 0x4,
            Self::ScheduleRealtime => 0x8,
            Self::DefaultDevice => 0x10,
        }
    }
}

/// Set of [`StreamFlag`]s
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamFlags(u32);

impl StreamFlags {
    pub const NONE: StreamFlags = StreamFlags(0);

    pub const fn contains(self, flag: StreamFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: StreamFlag) {
        self.0 |= flag.bit();
    }

    #[must_use]
    pub fn with(mut self, flag: StreamFlag) -> Self {
        self.insert(flag);
        self
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<StreamFlag> for StreamFlags {
    fn from(flag: StreamFlag) -> Self {
        StreamFlags::NONE.with(flag)
    }
}

impl FromIterator<StreamFlag> for StreamFlags {
    fn from_iter<I: IntoIterator<Item = StreamFlag>>(iter: I) -> Self {
        iter.into_iter()
            .fold(StreamFlags::NONE, |flags, flag| flags.with(flag))
    }
}

impl std::ops::BitOr<StreamFlag> for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, flag: StreamFlag) -> StreamFlags {
        self.with(flag)
    }
}

/// Optional stream behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub flags: StreamFlags,
    /// Requested number of periods; values below 2 select the backend default
    pub number_of_buffers: u32,
    /// Used to name the callback thread
    pub stream_name: String,
    /// Scheduling priority when [`StreamFlag::ScheduleRealtime`] is set
    pub priority: i32,
}

impl StreamOptions {
    pub fn has(&self, flag: StreamFlag) -> bool {
        self.flags.contains(flag)
    }
}

/// Default stream settings read from the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDefaults {
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub format: SampleFormat,
    pub number_of_buffers: u32,
    pub flags: Vec<StreamFlag>,
    pub priority: i32,
    pub name: String,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            format: SampleFormat::Float32,
            number_of_buffers: 0,
            flags: Vec::new(),
            priority: 0,
            name: "realtime-audio".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Library configuration
///
/// ```toml
/// api = "linux-alsa"
///
/// [stream]
/// sample_rate = 44100
/// buffer_frames = 256
/// format = "float32"
/// flags = ["minimize-latency"]
///
/// [logging]
/// filter = "realtime_audio=debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub api: Api,
    pub stream: StreamDefaults,
    pub logging: LoggingConfig,
}

impl AudioConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize configuration to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Write configuration to a file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Per-user configuration file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "realtime-audio")
            .map(|dirs| dirs.config_dir().join("audio.toml"))
    }

    /// Load the per-user configuration, falling back to defaults when the
    /// file does not exist
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Build stream options from the configured defaults
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            flags: self.stream.flags.iter().copied().collect(),
            number_of_buffers: self.stream.number_of_buffers,
            stream_name: self.stream.name.clone(),
            priority: self.stream.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = StreamFlags::NONE | StreamFlag::NonInterleaved | StreamFlag::MinimizeLatency;
        assert!(flags.contains(StreamFlag::NonInterleaved));
        assert!(flags.contains(StreamFlag::MinimizeLatency));
        assert!(!flags.contains(StreamFlag::ExclusiveDevice));
        assert!(StreamFlags::default().is_empty());
    }

    #[test]
    fn test_parameters_builder() {
        let params = StreamParameters::new(1, 2).with_first_channel(4);
        assert_eq!(params.device_id, 1);
        assert_eq!(params.channel_count, 2);
        assert_eq!(params.first_channel, 4);
    }

    #[test]
    fn test_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.api, Api::Unspecified);
        assert_eq!(config.stream.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.stream.buffer_frames, DEFAULT_BUFFER_FRAMES);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_config_from_toml() {
        let config = AudioConfig::from_toml_str(
            r#"
            api = "simulated"

            [stream]
            sample_rate = 44100
            format = "sint16"
            flags = ["non-interleaved", "schedule-realtime"]
            priority = 70
            "#,
        )
        .unwrap();

        assert_eq!(config.api, Api::Simulated);
        assert_eq!(config.stream.sample_rate, 44100);
        assert_eq!(config.stream.buffer_frames, DEFAULT_BUFFER_FRAMES);
        assert_eq!(config.stream.format, SampleFormat::Sint16);

        let options = config.stream_options();
        assert!(options.has(StreamFlag::NonInterleaved));
        assert!(options.has(StreamFlag::ScheduleRealtime));
        assert_eq!(options.priority, 70);
    }

    #[test]
    fn test_config_rejects_unknown_format() {
        let err = AudioConfig::from_toml_str("[stream]\nformat = \"sint12\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let mut config = AudioConfig::default();
        config.stream.flags = vec![StreamFlag::DefaultDevice];
        let text = config.to_toml_string().unwrap();
        assert_eq!(AudioConfig::from_toml_str(&text).unwrap(), config);
    }
}
