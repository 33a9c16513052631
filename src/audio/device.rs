//! Device probe results

use serde::{Deserialize, Serialize};

use crate::format::NativeFormats;

/// Sample rates checked when probing a device
pub const SAMPLE_RATES: [u32; 14] = [
    4000, 5512, 8000, 9600, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400,
    192000,
];

/// Snapshot of a device's capabilities
///
/// Created fresh by every probe and never updated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Whether the device could be queried; the other capability fields are
    /// meaningless when `false`
    pub probed: bool,
    /// Human-readable device name
    pub name: String,
    pub output_channels: u32,
    pub input_channels: u32,
    /// Channels usable when input and output run together
    pub duplex_channels: u32,
    pub is_default_output: bool,
    pub is_default_input: bool,
    /// Supported rates, ascending
    pub sample_rates: Vec<u32>,
    pub preferred_sample_rate: u32,
    pub native_formats: NativeFormats,
}

impl DeviceInfo {
    /// An unprobed entry, used when a device is listed but cannot be opened
    pub fn unprobed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn supports_sample_rate(&self, rate: u32) -> bool {
        self.sample_rates.contains(&rate)
    }
}

/// Pick the supported rate closest to `requested`; ties go to the higher rate
pub fn nearest_sample_rate(rates: &[u32], requested: u32) -> Option<u32> {
    rates
        .iter()
        .copied()
        .min_by_key(|rate| (rate.abs_diff(requested), u32::MAX - rate))
}

/// Preferred rate for a device: 48 kHz if available, else 44.1 kHz, else the
/// highest supported rate
pub fn preferred_sample_rate(rates: &[u32]) -> u32 {
    [48000, 44100]
        .into_iter()
        .find(|rate| rates.contains(rate))
        .or_else(|| rates.iter().copied().max())
        .unwrap_or(0)
}
