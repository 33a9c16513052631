//! Error types for realtime audio streams
//!
//! Every error carries an [`ErrorKind`] so callers can tell a misuse of the
//! API apart from a failing driver or a stream that can no longer run.

use thiserror::Error;

use crate::logging::Severity;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream lifecycle errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("a stream is already open")]
    AlreadyOpen,

    #[error("no stream is open")]
    NotOpen,

    #[error("invalid stream parameter: {0}")]
    InvalidParameter(String),

    #[error("output underflow and input overflow in the same period")]
    UnderflowOrOverflow,

    #[error("audio callback thread is no longer running")]
    ThreadExited,

    #[error("the stream callback panicked")]
    CallbackPanicked,

    #[error("native handle teardown mismatch: {0}")]
    HandleMismatch(String),
}

/// Device and driver errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("invalid device id {id} ({count} devices available)")]
    InvalidDevice { id: usize, count: usize },

    #[error("device probe failed: {0}")]
    ProbeFailed(#[from] ProbeFailure),

    #[error("{context}: {message}")]
    Driver { context: &'static str, message: String },
}

/// Sample conversion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("{side} buffer too small: {needed} bytes needed, {actual} available")]
    BufferTooSmall {
        side: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// Reason a backend could not open or launch a stream direction.
///
/// Probing reports failure by value; the device abstraction turns it into a
/// [`DeviceError::ProbeFailed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProbeFailure(pub String);

impl ProbeFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Classification of an error by how it propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Logged and swallowed, the operation is a no-op
    Warning,
    /// The caller violated a precondition
    InvalidUse,
    /// A native negotiation or hardware call failed
    SystemError,
    /// The stream cannot continue
    Fatal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Stream(StreamError::AlreadyOpen)
            | Self::Stream(StreamError::NotOpen)
            | Self::Stream(StreamError::InvalidParameter(_))
            | Self::Device(DeviceError::InvalidDevice { .. })
            | Self::Convert(_)
            | Self::Config(_) => ErrorKind::InvalidUse,
            Self::Stream(StreamError::UnderflowOrOverflow)
            | Self::Stream(StreamError::ThreadExited)
            | Self::Stream(StreamError::CallbackPanicked)
            | Self::Stream(StreamError::HandleMismatch(_)) => ErrorKind::Fatal,
            Self::Device(DeviceError::ProbeFailed(_))
            | Self::Device(DeviceError::Driver { .. })
            | Self::Io(_) => ErrorKind::SystemError,
        }
    }

    /// Log level used when this error is reported
    pub fn severity(&self) -> Severity {
        match self.kind() {
            ErrorKind::Warning => Severity::Warning,
            ErrorKind::InvalidUse | ErrorKind::SystemError => Severity::Error,
            ErrorKind::Fatal => Severity::Severe,
        }
    }

    pub(crate) fn driver(context: &'static str, message: impl Into<String>) -> Self {
        Self::Device(DeviceError::Driver {
            context,
            message: message.into(),
        })
    }

    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::Stream(StreamError::InvalidParameter(message.into()))
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
