//! Audio subsystem module

pub mod architecture;
pub mod buffer;
pub mod callback;
pub mod convert;
pub mod device;
pub mod host;
pub mod stream;

pub use architecture::{AudioArchitecture, Backend, ProbeRequest};
pub use buffer::SampleBuffer;
pub use callback::{per_frame, CallbackBuffers, CallbackResult, StreamCallback, StreamStatus};
pub use convert::{byte_swap_buffer, convert_buffer, ConvertInfo, Layout};
pub use device::{DeviceInfo, SAMPLE_RATES};
pub use host::Audio;
pub use stream::{AudioStream, Direction, StreamMode, StreamState};
