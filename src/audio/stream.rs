//! Shared state of an open stream
//!
//! There is one [`AudioStream`] per backend. It is populated by the open
//! operation, updated by the callback thread once per period and reset on
//! close. Backends keep it behind the single stream lock together with their
//! native handles (see [`crate::backend::sync`]).

use crate::audio::buffer::SampleBuffer;
use crate::audio::convert::{ConvertInfo, Layout};
use crate::error::ProbeFailure;
use crate::format::SampleFormat;

/// Stream direction; also the index into per-direction arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Output = 0,
    Input = 1,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Output, Direction::Input];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Output => f.write_str("output"),
            Direction::Input => f.write_str("input"),
        }
    }
}

/// Directions carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Output,
    Input,
    Duplex,
    Uninitialized,
}

impl StreamMode {
    pub fn has(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (StreamMode::Duplex, _)
                | (StreamMode::Output, Direction::Output)
                | (StreamMode::Input, Direction::Input)
        )
    }

    /// Mode after adding `direction` to a stream in this mode
    fn add(self, direction: Direction) -> StreamMode {
        match (self, direction) {
            (StreamMode::Uninitialized, Direction::Output) => StreamMode::Output,
            (StreamMode::Uninitialized, Direction::Input) => StreamMode::Input,
            (StreamMode::Output, Direction::Output) => StreamMode::Output,
            (StreamMode::Input, Direction::Input) => StreamMode::Input,
            _ => StreamMode::Duplex,
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Stopped,
    Running,
}

/// Negotiated configuration of one direction, as reported by a backend probe
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionSetup {
    pub device_id: usize,
    pub user_channels: u32,
    pub device_channels: u32,
    pub first_channel: u32,
    pub user_format: SampleFormat,
    pub device_format: SampleFormat,
    pub user_interleaved: bool,
    pub device_interleaved: bool,
    pub byte_swap: bool,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub periods: u32,
}

/// The stream record
#[derive(Debug)]
pub struct AudioStream {
    pub mode: StreamMode,
    pub state: StreamState,

    pub device_id: [usize; 2],
    pub user_channels: [u32; 2],
    pub device_channels: [u32; 2],
    pub channel_offset: [u32; 2],
    pub device_format: [SampleFormat; 2],
    pub device_interleaved: [bool; 2],
    pub do_byte_swap: [bool; 2],
    pub do_convert_buffer: [bool; 2],
    /// Frames between the callback and the hardware, per direction
    pub latency: [u64; 2],
    pub convert_info: [ConvertInfo; 2],

    pub user_format: SampleFormat,
    pub user_interleaved: bool,
    pub sample_rate: u32,
    /// Period size in frames
    pub buffer_size: u32,
    pub n_buffers: u32,

    pub user_buffer: [SampleBuffer; 2],
    /// Scratch buffer in device layout, shared by both directions
    pub device_buffer: SampleBuffer,

    /// Seconds of audio processed since open
    pub stream_time: f64,
}

impl Default for AudioStream {
    fn default() -> Self {
        Self {
            mode: StreamMode::Uninitialized,
            state: StreamState::Closed,
            device_id: [0; 2],
            user_channels: [0; 2],
            device_channels: [0; 2],
            channel_offset: [0; 2],
            device_format: [SampleFormat::Float64; 2],
            device_interleaved: [true; 2],
            do_byte_swap: [false; 2],
            do_convert_buffer: [false; 2],
            latency: [0; 2],
            convert_info: [ConvertInfo::default(), ConvertInfo::default()],
            user_format: SampleFormat::Float64,
            user_interleaved: true,
            sample_rate: 0,
            buffer_size: 0,
            n_buffers: 0,
            user_buffer: [SampleBuffer::default(), SampleBuffer::default()],
            device_buffer: SampleBuffer::default(),
            stream_time: 0.0,
        }
    }
}

impl AudioStream {
    pub fn is_open(&self) -> bool {
        self.state != StreamState::Closed
    }

    pub fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    /// Directions that have been configured
    pub fn directions(&self) -> impl Iterator<Item = Direction> {
        let mode = self.mode;
        Direction::ALL.into_iter().filter(move |d| mode.has(*d))
    }

    /// Drop all buffers and return to `Closed/Uninitialized`
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a negotiated direction, allocate its buffers and build its
    /// conversion tables
    ///
    /// A second direction must agree with the first on sample rate and
    /// period size.
    pub fn configure_direction(
        &mut self,
        direction: Direction,
        setup: &DirectionSetup,
    ) -> Result<(), ProbeFailure> {
        let other = match direction {
            Direction::Output => Direction::Input,
            Direction::Input => Direction::Output,
        };
        if self.mode.has(other) {
            if setup.buffer_size != self.buffer_size {
                return Err(ProbeFailure::new(format!(
                    "{} period size {} differs from {} period size {}",
                    direction, setup.buffer_size, other, self.buffer_size
                )));
            }
            if setup.sample_rate != self.sample_rate {
                return Err(ProbeFailure::new(format!(
                    "{} sample rate {} differs from {} sample rate {}",
                    direction, setup.sample_rate, other, self.sample_rate
                )));
            }
        }

        let i = direction.index();
        self.device_id[i] = setup.device_id;
        self.user_channels[i] = setup.user_channels;
        self.device_channels[i] = setup.device_channels;
        self.channel_offset[i] = setup.first_channel;
        self.device_format[i] = setup.device_format;
        self.device_interleaved[i] = setup.device_interleaved;
        self.do_byte_swap[i] = setup.byte_swap;
        self.latency[i] = u64::from(setup.buffer_size) * u64::from(setup.periods);

        self.user_format = setup.user_format;
        self.user_interleaved = setup.user_interleaved;
        self.sample_rate = setup.sample_rate;
        self.buffer_size = setup.buffer_size;
        self.n_buffers = setup.periods;

        // Interleaving only matters with more than one channel
        self.do_convert_buffer[i] = setup.user_format != setup.device_format
            || setup.user_channels < setup.device_channels
            || (setup.user_interleaved != setup.device_interleaved && setup.user_channels > 1);

        let frames = setup.buffer_size as usize;
        self.user_buffer[i] = SampleBuffer::new(
            frames * setup.user_channels as usize * setup.user_format.byte_width(),
        );

        if self.do_convert_buffer[i] {
            self.device_buffer.ensure_len(
                frames * setup.device_channels as usize * setup.device_format.byte_width(),
            );
            self.set_convert_info(direction, setup.first_channel);
        }

        self.mode = self.mode.add(direction);
        Ok(())
    }

    /// Build the conversion tables for `direction` from the recorded layout
    pub fn set_convert_info(&mut self, direction: Direction, first_channel: u32) {
        let i = direction.index();
        let user = Layout {
            channels: self.user_channels[i] as usize,
            format: self.user_format,
            interleaved: self.user_interleaved,
        };
        let device = Layout {
            channels: self.device_channels[i] as usize,
            format: self.device_format[i],
            interleaved: self.device_interleaved[i],
        };
        self.convert_info[i] = ConvertInfo::new(
            direction,
            user,
            device,
            self.buffer_size as usize,
            first_channel as usize,
        );
    }

    /// Advance the stream clock by one period
    pub fn tick(&mut self) {
        if self.sample_rate > 0 {
            self.stream_time += f64::from(self.buffer_size) / f64::from(self.sample_rate);
        }
    }

    /// Total latency of the configured directions in frames
    pub fn total_latency(&self) -> u64 {
        self.directions().map(|d| self.latency[d.index()]).sum()
    }
}
