//! In-memory PCM driver
//!
//! Simulated devices accept and produce frames without hardware, so the full
//! open/start/callback/stop path can run anywhere. A [`SimulatedTap`] shared
//! with every handle counts what the engine did and injects faults into the
//! next write or read.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::stream::Direction;
use crate::backend::pcm::{
    HwCapabilities, HwConfig, HwRequest, PcmDevice, PcmDriver, PcmError, PcmHandle, PcmState,
};
use crate::backend::Api;
use crate::config::StreamOptions;
use crate::format::{NativeFormats, SampleFormat};

const ENODEV: i32 = 19;
const EINVAL: i32 = 22;

/// A fault applied to the next write or read of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Accept at most this many frames
    Short(usize),
    /// Report an underrun or overrun
    Xrun,
    /// Fail with this errno
    Io(i32),
}

/// Description of a simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub name: String,
    pub output_channels: u32,
    pub input_channels: u32,
    pub min_channels: u32,
    /// Formats in host byte order
    pub native: NativeFormats,
    /// Formats only in the opposite byte order
    pub foreign: NativeFormats,
    pub sample_rates: Vec<u32>,
    /// Whether handles on this device can be linked
    pub linkable: bool,
}

impl SimulatedDevice {
    /// A stereo duplex device with float and common integer formats
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_channels: 2,
            input_channels: 2,
            min_channels: 1,
            native: [
                SampleFormat::Sint16,
                SampleFormat::Sint32,
                SampleFormat::Float32,
                SampleFormat::Float64,
            ]
            .into_iter()
            .collect(),
            foreign: NativeFormats::NONE,
            sample_rates: vec![44100, 48000, 96000],
            linkable: true,
        }
    }

    #[must_use]
    pub fn with_channels(mut self, output: u32, input: u32) -> Self {
        self.output_channels = output;
        self.input_channels = input;
        self
    }

    #[must_use]
    pub fn with_min_channels(mut self, min: u32) -> Self {
        self.min_channels = min;
        self
    }

    #[must_use]
    pub fn with_formats(mut self, native: NativeFormats) -> Self {
        self.native = native;
        self
    }

    #[must_use]
    pub fn with_foreign_formats(mut self, foreign: NativeFormats) -> Self {
        self.foreign = foreign;
        self
    }

    #[must_use]
    pub fn with_sample_rates(mut self, rates: &[u32]) -> Self {
        self.sample_rates = rates.to_vec();
        self
    }

    #[must_use]
    pub fn unlinkable(mut self) -> Self {
        self.linkable = false;
        self
    }

    fn channels(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Output => self.output_channels,
            Direction::Input => self.input_channels,
        }
    }
}

#[derive(Debug, Default)]
struct TapState {
    frames: [u64; 2],
    calls: [u64; 2],
    prepares: u64,
    drains: u64,
    drops: u64,
    links: u64,
    last_write: Vec<u8>,
    input: Vec<u8>,
    faults: [VecDeque<Fault>; 2],
    configured: [Option<HwRequest>; 2],
}

/// Counters and fault injection shared by a driver and its handles
#[derive(Debug, Clone, Default)]
pub struct SimulatedTap(Arc<Mutex<TapState>>);

impl SimulatedTap {
    pub fn frames_written(&self) -> u64 {
        self.0.lock().frames[Direction::Output.index()]
    }

    pub fn frames_read(&self) -> u64 {
        self.0.lock().frames[Direction::Input.index()]
    }

    /// Successful write calls
    pub fn writes(&self) -> u64 {
        self.0.lock().calls[Direction::Output.index()]
    }

    /// Successful read calls
    pub fn reads(&self) -> u64 {
        self.0.lock().calls[Direction::Input.index()]
    }

    pub fn prepares(&self) -> u64 {
        self.0.lock().prepares
    }

    pub fn drains(&self) -> u64 {
        self.0.lock().drains
    }

    pub fn drops(&self) -> u64 {
        self.0.lock().drops
    }

    pub fn links(&self) -> u64 {
        self.0.lock().links
    }

    /// Bytes accepted by the most recent write
    pub fn last_write(&self) -> Vec<u8> {
        self.0.lock().last_write.clone()
    }

    /// Hardware request most recently applied for `direction`
    pub fn configured(&self, direction: Direction) -> Option<HwRequest> {
        self.0.lock().configured[direction.index()]
    }

    /// Queue a fault for the next write (output) or read (input)
    pub fn inject(&self, direction: Direction, fault: Fault) {
        self.0.lock().faults[direction.index()].push_back(fault);
    }

    /// Device-format bytes repeated into every read
    pub fn set_input(&self, bytes: Vec<u8>) {
        self.0.lock().input = bytes;
    }
}

/// Driver over a fixed list of simulated devices
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    devices: Vec<SimulatedDevice>,
    tap: SimulatedTap,
    paced: bool,
}

impl SimulatedDriver {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            tap: SimulatedTap::default(),
            paced: false,
        }
    }

    /// Make writes and reads take as long as the frames they move
    #[must_use]
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn tap(&self) -> SimulatedTap {
        self.tap.clone()
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(vec![SimulatedDevice::new("Simulated Device")])
    }
}

impl PcmDriver for SimulatedDriver {
    type Handle = SimulatedHandle;

    fn api(&self) -> Api {
        Api::Simulated
    }

    fn devices(&mut self) -> Vec<PcmDevice> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, device)| PcmDevice {
                id: format!("sim:{}", i),
                name: device.name.clone(),
            })
            .collect()
    }

    fn open(
        &mut self,
        _device: &PcmDevice,
        index: usize,
        direction: Direction,
        _options: &StreamOptions,
    ) -> Result<SimulatedHandle, PcmError> {
        let device = self.devices.get(index).cloned().ok_or(PcmError::Io {
            context: "pcm open",
            errno: ENODEV,
            message: "no such device".into(),
        })?;
        if device.channels(direction) == 0 {
            return Err(PcmError::Io {
                context: "pcm open",
                errno: ENODEV,
                message: format!("'{}' has no {} channels", device.name, direction),
            });
        }

        Ok(SimulatedHandle {
            device,
            direction,
            tap: self.tap.clone(),
            state: PcmState::Open,
            config: None,
            paced: self.paced,
        })
    }
}

/// One open direction of a simulated device
#[derive(Debug)]
pub struct SimulatedHandle {
    device: SimulatedDevice,
    direction: Direction,
    tap: SimulatedTap,
    state: PcmState,
    config: Option<HwRequest>,
    paced: bool,
}

impl SimulatedHandle {
    fn frame_bytes(&self) -> Result<usize, PcmError> {
        self.config
            .map(|c| c.channels as usize * c.format.byte_width())
            .ok_or_else(|| PcmError::Unsupported("handle is not configured".into()))
    }

    fn take_fault(&self) -> Option<Fault> {
        self.tap.0.lock().faults[self.direction.index()].pop_front()
    }

    fn io_error(context: &'static str, errno: i32) -> PcmError {
        PcmError::Io {
            context,
            errno,
            message: std::io::Error::from_raw_os_error(errno).to_string(),
        }
    }

    /// Frames to move for a buffer of `len` bytes, after any injected fault
    fn transfer(&mut self, len: usize, context: &'static str) -> Result<usize, PcmError> {
        let frame_bytes = self.frame_bytes()?;
        let mut frames = len / frame_bytes;
        match self.take_fault() {
            Some(Fault::Short(limit)) => frames = frames.min(limit),
            Some(Fault::Xrun) => {
                self.state = PcmState::XRun;
                return Err(PcmError::Xrun);
            }
            Some(Fault::Io(errno)) => return Err(Self::io_error(context, errno)),
            None => {}
        }
        if self.state == PcmState::Prepared {
            self.state = PcmState::Running;
        }
        if self.paced {
            if let Some(config) = self.config {
                std::thread::sleep(Duration::from_secs_f64(
                    frames as f64 / f64::from(config.sample_rate),
                ));
            }
        }
        Ok(frames)
    }
}

impl PcmHandle for SimulatedHandle {
    fn capabilities(&mut self) -> Result<HwCapabilities, PcmError> {
        Ok(HwCapabilities {
            min_channels: self.device.min_channels,
            max_channels: self.device.channels(self.direction),
            native: self.device.native,
            foreign: self.device.foreign,
            sample_rates: self.device.sample_rates.clone(),
        })
    }

    fn configure(&mut self, request: &HwRequest) -> Result<HwConfig, PcmError> {
        let formats = if request.endian.is_native() {
            self.device.native
        } else {
            self.device.foreign
        };
        if !formats.contains(request.format) {
            return Err(PcmError::Unsupported(format!(
                "{} {:?}-endian",
                request.format, request.endian
            )));
        }
        if request.channels < self.device.min_channels
            || request.channels > self.device.channels(self.direction)
        {
            return Err(PcmError::Unsupported(format!("{} channels", request.channels)));
        }
        if !self.device.sample_rates.contains(&request.sample_rate) {
            return Err(PcmError::Unsupported(format!("{} Hz", request.sample_rate)));
        }

        self.config = Some(*request);
        self.state = PcmState::Setup;
        self.tap.0.lock().configured[self.direction.index()] = Some(*request);
        Ok(HwConfig {
            sample_rate: request.sample_rate,
            period_frames: request.period_frames,
            periods: request.periods,
        })
    }

    fn link(&mut self, other: &Self) -> Result<(), PcmError> {
        if !(self.device.linkable && other.device.linkable) {
            return Err(Self::io_error("pcm link", EINVAL));
        }
        self.tap.0.lock().links += 1;
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        self.frame_bytes()?;
        self.state = PcmState::Prepared;
        self.tap.0.lock().prepares += 1;
        Ok(())
    }

    fn state(&self) -> PcmState {
        self.state
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, PcmError> {
        let frames = self.transfer(data.len(), "pcm write")?;
        let bytes = frames * self.frame_bytes()?;

        let mut tap = self.tap.0.lock();
        tap.frames[Direction::Output.index()] += frames as u64;
        tap.calls[Direction::Output.index()] += 1;
        tap.last_write = data[..bytes].to_vec();
        Ok(frames)
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, PcmError> {
        let frames = self.transfer(data.len(), "pcm read")?;
        let bytes = frames * self.frame_bytes()?;

        let mut tap = self.tap.0.lock();
        if tap.input.is_empty() {
            data[..bytes].fill(0);
        } else {
            for (dst, src) in data[..bytes].iter_mut().zip(tap.input.iter().cycle()) {
                *dst = *src;
            }
        }
        tap.frames[Direction::Input.index()] += frames as u64;
        tap.calls[Direction::Input.index()] += 1;
        Ok(frames)
    }

    fn drop_pending(&mut self) -> Result<(), PcmError> {
        self.state = PcmState::Setup;
        self.tap.0.lock().drops += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        self.state = PcmState::Setup;
        self.tap.0.lock().drains += 1;
        Ok(())
    }

    fn delay(&self) -> Result<i64, PcmError> {
        Ok(self
            .config
            .map(|c| i64::from(c.period_frames) * i64::from(c.periods))
            .unwrap_or(0))
    }
}
