//! Native audio APIs
//!
//! Every API is reached through [`AudioArchitecture`]. PCM-style APIs share
//! [`PcmBackend`] and differ only in their [`pcm::PcmDriver`].

#[cfg(all(target_os = "linux", feature = "alsa"))]
pub mod alsa;
pub mod dummy;
pub mod engine;
pub mod pcm;
pub mod pcm_backend;
pub mod simulated;
pub mod sync;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::architecture::AudioArchitecture;

pub use dummy::DummyBackend;
pub use pcm_backend::PcmBackend;
pub use simulated::{Fault, SimulatedDevice, SimulatedDriver, SimulatedTap};

/// Audio API identifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    /// Pick the first compiled hardware API with devices
    #[default]
    Unspecified,
    LinuxAlsa,
    /// In-memory devices, never picked automatically
    Simulated,
    /// No devices
    Dummy,
}

impl Api {
    /// Whether the API talks to real sound hardware
    pub fn is_hardware(self) -> bool {
        matches!(self, Api::LinuxAlsa)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Api::Unspecified => "Unspecified",
            Api::LinuxAlsa => "ALSA",
            Api::Simulated => "Simulated",
            Api::Dummy => "Dummy",
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// APIs built into this binary, hardware APIs first
pub fn compiled_apis() -> Vec<Api> {
    let mut apis = Vec::new();
    #[cfg(all(target_os = "linux", feature = "alsa"))]
    apis.push(Api::LinuxAlsa);
    apis.push(Api::Simulated);
    apis.push(Api::Dummy);
    apis
}

/// Instantiate `api`, or `None` if it is not compiled in
pub fn create_backend(api: Api) -> Option<Box<dyn AudioArchitecture>> {
    match api {
        #[cfg(all(target_os = "linux", feature = "alsa"))]
        Api::LinuxAlsa => Some(Box::new(PcmBackend::new(self::alsa::AlsaDriver::new()))),
        Api::Simulated => Some(Box::new(PcmBackend::new(SimulatedDriver::default()))),
        Api::Dummy => Some(Box::new(DummyBackend::new())),
        _ => None,
    }
}
