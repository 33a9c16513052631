//! Native PCM handle contract
//!
//! A [`PcmDriver`] lists devices and opens [`PcmHandle`]s; the generic
//! backend drives handles through negotiation and the callback thread
//! without knowing which driver produced them.

use thiserror::Error;

use crate::audio::stream::Direction;
use crate::backend::Api;
use crate::config::StreamOptions;
use crate::error::Error;
use crate::format::{Endian, NativeFormats, SampleFormat};

/// Native handle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    XRun,
    Draining,
    Paused,
    Suspended,
    Disconnected,
}

/// Errors reported by a native handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    /// Underrun or overrun; the handle must be re-prepared
    #[error("buffer underrun or overrun")]
    Xrun,

    #[error("{context}: {message} (errno {errno})")]
    Io {
        context: &'static str,
        errno: i32,
        message: String,
    },

    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

impl PcmError {
    /// Whether re-preparing the handle recovers from this error
    pub fn is_transient(&self) -> bool {
        matches!(self, PcmError::Xrun)
    }
}

impl From<PcmError> for Error {
    fn from(err: PcmError) -> Self {
        let (context, message) = match err {
            PcmError::Io {
                context,
                errno,
                message,
            } => (context, format!("{} (errno {})", message, errno)),
            PcmError::Xrun => ("pcm", "buffer underrun or overrun".to_string()),
            PcmError::Unsupported(message) => ("pcm configuration", message),
        };
        Error::driver(context, message)
    }
}

/// A device as listed by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmDevice {
    /// Driver-level identifier, e.g. `hw:0,0`
    pub id: String,
    /// Human-readable name
    pub name: String,
}

/// What a handle can be configured to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwCapabilities {
    pub min_channels: u32,
    pub max_channels: u32,
    /// Formats available in host byte order
    pub native: NativeFormats,
    /// Formats available only in the opposite byte order
    pub foreign: NativeFormats,
    /// Supported rates from the standard table, ascending
    pub sample_rates: Vec<u32>,
}

/// Hardware configuration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRequest {
    pub format: SampleFormat,
    pub endian: Endian,
    pub channels: u32,
    pub sample_rate: u32,
    pub period_frames: u32,
    pub periods: u32,
}

/// Configuration the hardware settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwConfig {
    pub sample_rate: u32,
    pub period_frames: u32,
    pub periods: u32,
}

/// One open native stream direction
///
/// Buffers passed to [`write`](PcmHandle::write) and
/// [`read`](PcmHandle::read) hold whole interleaved frames in the
/// configured format.
pub trait PcmHandle: Send {
    fn capabilities(&mut self) -> Result<HwCapabilities, PcmError>;

    fn configure(&mut self, request: &HwRequest) -> Result<HwConfig, PcmError>;

    /// Start and stop together with `other`
    fn link(&mut self, other: &Self) -> Result<(), PcmError>;

    fn prepare(&mut self) -> Result<(), PcmError>;

    fn state(&self) -> PcmState;

    /// Write frames, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, PcmError>;

    /// Read frames, returning how many were filled
    fn read(&mut self, data: &mut [u8]) -> Result<usize, PcmError>;

    /// Stop, discarding pending frames
    fn drop_pending(&mut self) -> Result<(), PcmError>;

    /// Stop after pending frames have played
    fn drain(&mut self) -> Result<(), PcmError>;

    /// Frames between the application and the hardware
    fn delay(&self) -> Result<i64, PcmError>;
}

/// Source of devices and handles for one native API
pub trait PcmDriver: Send + 'static {
    type Handle: PcmHandle + 'static;

    fn api(&self) -> Api;

    fn devices(&mut self) -> Vec<PcmDevice>;

    /// Open `device` for `direction`; `index` is its position in
    /// [`devices`](PcmDriver::devices)
    fn open(
        &mut self,
        device: &PcmDevice,
        index: usize,
        direction: Direction,
        options: &StreamOptions,
    ) -> Result<Self::Handle, PcmError>;

    fn default_device(&mut self, _direction: Direction) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_transient() {
        assert!(PcmError::Xrun.is_transient());
        assert!(!PcmError::Unsupported("S24_3LE".into()).is_transient());
    }

    #[test]
    fn test_into_error() {
        let err: Error = PcmError::Io {
            context: "pcm write",
            errno: 5,
            message: "Input/output error".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert_eq!(
            err.to_string(),
            "Device error: pcm write: Input/output error (errno 5)"
        );
    }
}
