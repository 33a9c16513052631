//! # Realtime Audio
//!
//! Fixed-period, bidirectional audio I/O against native sound devices.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CALLER THREAD                                  │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                    Audio facade (audio::host)                      │  │
//! │  └─────────────────────────────────┬─────────────────────────────────┘  │
//! │                                    ▼                                    │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │        AudioArchitecture (audio::architecture)                     │  │
//! │  │   validation · open/start/stop/close policy · fault surfacing      │  │
//! │  └─────────────────────────────────┬─────────────────────────────────┘  │
//! │                                    ▼                                    │
//! │  ┌──────────────────────────┐    ┌──────────────────────────────────┐   │
//! │  │ PcmBackend (negotiation) │    │ DummyBackend (no devices)        │   │
//! │  └────────────┬─────────────┘    └──────────────────────────────────┘   │
//! │               │ PcmDriver: AlsaDriver | SimulatedDriver                 │
//! └───────────────┼─────────────────────────────────────────────────────────┘
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │        SharedStream (backend::sync): one lock + one condvar             │
//! │        AudioStream record · native handles · xrun flags                 │
//! └───────────────┬─────────────────────────────────────────────────────────┘
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CALLBACK THREAD (backend::engine)                    │
//! │                                                                         │
//! │   read input ─► byte swap ─► convert ─► user callback ─► convert ─►     │
//! │   byte swap ─► write output ─► tick stream time ─► unlock fairly        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;

pub use audio::{
    per_frame, Audio, AudioArchitecture, CallbackBuffers, CallbackResult, DeviceInfo,
    StreamCallback, StreamStatus,
};
pub use backend::Api;
pub use config::{AudioConfig, StreamFlag, StreamFlags, StreamOptions, StreamParameters};
pub use error::{Error, ErrorKind, Result};
pub use format::{Sample, SampleFormat};

/// Library-wide constants
pub mod constants {
    /// Default sample rate for new streams
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default period size in frames
    pub const DEFAULT_BUFFER_FRAMES: u32 = 512;

    /// Periods used when the caller asks for fewer than [`MIN_PERIODS`]
    pub const DEFAULT_PERIODS: u32 = 4;

    /// Smallest usable period count, also used for minimum latency
    pub const MIN_PERIODS: u32 = 2;
}
