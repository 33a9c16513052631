//! Backend over any [`PcmDriver`]
//!
//! Negotiates each direction against the handle's capabilities, records the
//! result in the shared stream and runs the callback thread from
//! [`engine`](crate::backend::engine).

use std::sync::Arc;

use crate::audio::architecture::{Backend, ProbeRequest};
use crate::audio::callback::StreamCallback;
use crate::audio::device::{nearest_sample_rate, preferred_sample_rate, DeviceInfo};
use crate::audio::stream::{AudioStream, Direction, DirectionSetup, StreamState};
use crate::backend::engine::{self, CallbackThread};
use crate::backend::pcm::{HwCapabilities, HwRequest, PcmDriver, PcmHandle};
use crate::backend::sync::SharedStream;
use crate::backend::Api;
use crate::config::{StreamFlag, StreamOptions};
use crate::constants::{DEFAULT_PERIODS, MIN_PERIODS};
use crate::error::{Error, ProbeFailure, Result};
use crate::format::{Endian, SampleFormat};

/// A backend driving native handles from `D`
pub struct PcmBackend<D: PcmDriver> {
    driver: D,
    shared: Arc<SharedStream<D::Handle>>,
    thread: Option<CallbackThread>,
}

impl<D: PcmDriver> PcmBackend<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            shared: Arc::new(SharedStream::new()),
            thread: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: PcmDriver> Drop for PcmBackend<D> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.close_device() {
                tracing::error!("Failed to close stream on drop: {}", e);
            }
        }
    }
}

/// Periods to request for the given options
pub fn period_count(options: &StreamOptions) -> u32 {
    if options.has(StreamFlag::MinimizeLatency) {
        MIN_PERIODS
    } else if options.number_of_buffers < MIN_PERIODS {
        DEFAULT_PERIODS
    } else {
        options.number_of_buffers
    }
}

/// Pick the device format and byte order for a requested user format
///
/// The user format wins when the device has it; otherwise the first format
/// in [`SampleFormat::PREFERENCE`]. Host byte order is taken over the
/// opposite one.
pub fn choose_format(requested: SampleFormat, caps: &HwCapabilities) -> Option<(SampleFormat, Endian)> {
    std::iter::once(requested)
        .chain(SampleFormat::PREFERENCE)
        .find_map(|format| {
            if caps.native.contains(format) {
                Some((format, Endian::NATIVE))
            } else if caps.foreign.contains(format) {
                Some((format, Endian::NATIVE.opposite()))
            } else {
                None
            }
        })
}

impl<D: PcmDriver> Backend for PcmBackend<D> {
    fn api(&self) -> Api {
        self.driver.api()
    }

    fn native_device_count(&mut self) -> usize {
        self.driver.devices().len()
    }

    fn native_device_info(&mut self, id: usize) -> DeviceInfo {
        let devices = self.driver.devices();
        let Some(device) = devices.get(id) else {
            return DeviceInfo::default();
        };

        let mut info = DeviceInfo::unprobed(device.name.clone());
        let options = StreamOptions::default();
        let mut rates: Option<Vec<u32>> = None;

        for direction in Direction::ALL {
            let caps = match self
                .driver
                .open(device, id, direction, &options)
                .and_then(|mut pcm| pcm.capabilities())
            {
                Ok(caps) => caps,
                Err(e) => {
                    tracing::debug!("{} '{}' not available: {}", direction, device.id, e);
                    continue;
                }
            };

            match direction {
                Direction::Output => info.output_channels = caps.max_channels,
                Direction::Input => info.input_channels = caps.max_channels,
            }
            info.native_formats = caps
                .native
                .iter()
                .chain(caps.foreign.iter())
                .chain(info.native_formats.iter())
                .collect();
            rates = Some(match rates {
                // Rates usable in both directions
                Some(known) => known
                    .into_iter()
                    .filter(|r| caps.sample_rates.contains(r))
                    .collect(),
                None => caps.sample_rates.clone(),
            });
            info.probed = true;
        }

        info.duplex_channels = info.output_channels.min(info.input_channels);
        info.sample_rates = rates.unwrap_or_default();
        info.preferred_sample_rate = preferred_sample_rate(&info.sample_rates);
        info.is_default_output = self.driver.default_device(Direction::Output) == id;
        info.is_default_input = self.driver.default_device(Direction::Input) == id;
        info
    }

    fn native_default_output(&mut self) -> usize {
        self.driver.default_device(Direction::Output)
    }

    fn native_default_input(&mut self) -> usize {
        self.driver.default_device(Direction::Input)
    }

    fn with_stream<R>(&self, f: impl FnOnce(&AudioStream) -> R) -> R {
        f(&self.shared.lock().stream)
    }

    fn probe_device_open(
        &mut self,
        request: &ProbeRequest<'_>,
    ) -> std::result::Result<(), ProbeFailure> {
        let direction = request.direction;
        let devices = self.driver.devices();
        let device = devices.get(request.device_id).ok_or_else(|| {
            ProbeFailure::new(format!("device {} disappeared", request.device_id))
        })?;

        let mut pcm = self
            .driver
            .open(device, request.device_id, direction, request.options)
            .map_err(|e| {
                ProbeFailure::new(format!(
                    "unable to open {} device '{}': {}",
                    direction, device.id, e
                ))
            })?;
        let caps = pcm.capabilities().map_err(|e| {
            ProbeFailure::new(format!("unable to query '{}': {}", device.id, e))
        })?;

        let needed = request
            .channels
            .checked_add(request.first_channel)
            .ok_or_else(|| {
                ProbeFailure::new(format!(
                    "{} channels from channel {} is out of range",
                    request.channels, request.first_channel
                ))
            })?;
        if needed > caps.max_channels {
            return Err(ProbeFailure::new(format!(
                "'{}' has {} {} channels, {} requested from channel {}",
                device.id, caps.max_channels, direction, request.channels, request.first_channel
            )));
        }
        let device_channels = needed.max(caps.min_channels);

        let (format, endian) = choose_format(request.format, &caps).ok_or_else(|| {
            ProbeFailure::new(format!("'{}' supports no known sample format", device.id))
        })?;
        let sample_rate = nearest_sample_rate(&caps.sample_rates, request.sample_rate)
            .ok_or_else(|| ProbeFailure::new(format!("'{}' reports no sample rates", device.id)))?;

        let hw = pcm
            .configure(&HwRequest {
                format,
                endian,
                channels: device_channels,
                sample_rate,
                period_frames: request.buffer_frames,
                periods: period_count(request.options),
            })
            .map_err(|e| {
                ProbeFailure::new(format!("unable to configure '{}': {}", device.id, e))
            })?;

        tracing::debug!(
            "{} '{}': {} {:?}-endian, {} channels, {} Hz, {} x {} frames",
            direction,
            device.id,
            format,
            endian,
            device_channels,
            hw.sample_rate,
            hw.periods,
            hw.period_frames
        );

        let setup = DirectionSetup {
            device_id: request.device_id,
            user_channels: request.channels,
            device_channels,
            first_channel: request.first_channel,
            user_format: request.format,
            device_format: format,
            user_interleaved: !request.options.has(StreamFlag::NonInterleaved),
            device_interleaved: true,
            byte_swap: !endian.is_native(),
            sample_rate: hw.sample_rate,
            buffer_size: hw.period_frames,
            periods: hw.periods,
        };

        let mut guard = self.shared.lock();
        let slot = &mut *guard;
        slot.stream.configure_direction(direction, &setup)?;

        if direction == Direction::Input {
            if let Some(output) = slot.handle.pcm[Direction::Output.index()].as_ref() {
                match pcm.link(output) {
                    Ok(()) => slot.handle.synchronized = true,
                    Err(e) => {
                        tracing::warn!("unable to link input to output, running unsynchronized: {}", e)
                    }
                }
            }
        }
        slot.handle.pcm[direction.index()] = Some(pcm);
        Ok(())
    }

    fn launch(
        &mut self,
        callback: StreamCallback,
        options: &StreamOptions,
    ) -> std::result::Result<(), ProbeFailure> {
        let thread = CallbackThread::spawn(Arc::clone(&self.shared), callback, options)?;
        self.thread = Some(thread);

        let mut slot = self.shared.lock();
        slot.stream.state = StreamState::Stopped;
        slot.stream.stream_time = 0.0;
        Ok(())
    }

    fn release(&mut self) {
        let mut slot = self.shared.lock();
        slot.handle.release();
        slot.stream.reset();
    }

    fn close_device(&mut self) -> Result<()> {
        {
            let mut guard = self.shared.lock();
            let slot = &mut *guard;
            if slot.stream.state == StreamState::Running {
                if let Err(e) = engine::halt(&mut slot.stream, &mut slot.handle, false) {
                    tracing::warn!("error stopping stream on close: {}", e);
                }
            }
            slot.handle.alive = false;
        }
        self.shared.notify();

        let joined = match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        };

        self.release();
        tracing::info!("stream closed");
        joined
    }

    fn start_device(&mut self) -> Result<()> {
        engine::start(&self.shared)
    }

    fn stop_device(&mut self, drain: bool) -> Result<()> {
        let mut guard = self.shared.lock();
        let slot = &mut *guard;
        engine::halt(&mut slot.stream, &mut slot.handle, drain)
    }

    fn take_fault(&mut self) -> Option<Error> {
        self.thread.as_ref().and_then(CallbackThread::take_fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::architecture::AudioArchitecture;
    use crate::audio::callback::CallbackResult;
    use crate::backend::simulated::{SimulatedDevice, SimulatedDriver};
    use crate::config::StreamParameters;
    use crate::error::{DeviceError, ErrorKind};
    use crate::format::NativeFormats;
    use tracing_test::traced_test;

    fn caps(native: &[SampleFormat], foreign: &[SampleFormat]) -> HwCapabilities {
        HwCapabilities {
            min_channels: 1,
            max_channels: 2,
            native: native.iter().copied().collect(),
            foreign: foreign.iter().copied().collect(),
            sample_rates: vec![48000],
        }
    }

    fn silence() -> StreamCallback {
        Box::new(|_| CallbackResult::Continue)
    }

    #[test]
    fn test_period_count() {
        let mut options = StreamOptions::default();
        assert_eq!(period_count(&options), DEFAULT_PERIODS);
        options.number_of_buffers = 1;
        assert_eq!(period_count(&options), DEFAULT_PERIODS);
        options.number_of_buffers = 8;
        assert_eq!(period_count(&options), 8);
        options.flags.insert(StreamFlag::MinimizeLatency);
        assert_eq!(period_count(&options), MIN_PERIODS);
    }

    #[test]
    fn test_choose_format_order() {
        let c = caps(&[SampleFormat::Sint16, SampleFormat::Float32], &[]);
        assert_eq!(
            choose_format(SampleFormat::Sint16, &c),
            Some((SampleFormat::Sint16, Endian::NATIVE))
        );
        assert_eq!(
            choose_format(SampleFormat::Float64, &c),
            Some((SampleFormat::Float32, Endian::NATIVE))
        );

        let c = caps(&[SampleFormat::Sint16], &[SampleFormat::Float64]);
        assert_eq!(
            choose_format(SampleFormat::Sint8, &c),
            Some((SampleFormat::Float64, Endian::NATIVE.opposite()))
        );
        assert_eq!(choose_format(SampleFormat::Sint8, &caps(&[], &[])), None);
    }

    #[test]
    fn test_channel_compensation() {
        let driver = SimulatedDriver::new(vec![SimulatedDevice::new("sim")
            .with_channels(8, 0)
            .with_min_channels(4)]);
        let tap = driver.tap();
        let mut backend = PcmBackend::new(driver);

        backend
            .open_stream(
                Some(&StreamParameters::new(0, 1).with_first_channel(1)),
                None,
                SampleFormat::Float32,
                48000,
                128,
                silence(),
                None,
            )
            .unwrap();

        assert_eq!(tap.configured(Direction::Output).unwrap().channels, 4);
        backend.with_stream(|s| {
            assert_eq!(s.device_channels[0], 4);
            assert!(s.do_convert_buffer[0]);
            assert_eq!(s.convert_info[0].out_offset, vec![1]);
        });
        backend.close_stream().unwrap();
    }

    #[test]
    fn test_too_many_channels_fails_cleanly() {
        let mut backend = PcmBackend::new(SimulatedDriver::default());
        let err = backend
            .open_stream(
                Some(&StreamParameters::new(0, 2).with_first_channel(1)),
                None,
                SampleFormat::Float32,
                48000,
                128,
                silence(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::ProbeFailed(_))));
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert!(!backend.is_stream_open());
        backend.with_stream(|s| assert!(s.user_buffer[0].is_empty()));
    }

    #[test]
    fn test_first_channel_overflow_fails_cleanly() {
        let mut backend = PcmBackend::new(SimulatedDriver::default());
        let err = backend
            .open_stream(
                Some(&StreamParameters::new(0, 2).with_first_channel(u32::MAX)),
                None,
                SampleFormat::Float32,
                48000,
                128,
                silence(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::ProbeFailed(_))));
        assert!(!backend.is_stream_open());
    }

    #[test]
    fn test_foreign_endian_sets_byte_swap() {
        let driver = SimulatedDriver::new(vec![SimulatedDevice::new("be")
            .with_formats(NativeFormats::NONE)
            .with_foreign_formats(NativeFormats::NONE.with(SampleFormat::Sint32))]);
        let mut backend = PcmBackend::new(driver);
        backend
            .open_stream(
                Some(&StreamParameters::new(0, 2)),
                None,
                SampleFormat::Float32,
                48000,
                64,
                silence(),
                None,
            )
            .unwrap();
        backend.with_stream(|s| {
            assert!(s.do_byte_swap[0]);
            assert_eq!(s.device_format[0], SampleFormat::Sint32);
        });
    }

    #[test]
    fn test_duplex_links_handles() {
        let driver = SimulatedDriver::default();
        let tap = driver.tap();
        let mut backend = PcmBackend::new(driver);
        let params = StreamParameters::new(0, 2);
        backend
            .open_stream(
                Some(&params),
                Some(&params),
                SampleFormat::Float32,
                44100,
                256,
                silence(),
                None,
            )
            .unwrap();
        assert_eq!(tap.links(), 1);
        assert!(backend.shared.lock().handle.synchronized);
        assert_eq!(backend.stream_latency().unwrap(), 2 * 256 * DEFAULT_PERIODS as u64);
    }

    #[test]
    #[traced_test]
    fn test_unlinkable_duplex_warns() {
        let driver = SimulatedDriver::new(vec![SimulatedDevice::new("loose").unlinkable()]);
        let mut backend = PcmBackend::new(driver);
        let params = StreamParameters::new(0, 2);
        backend
            .open_stream(
                Some(&params),
                Some(&params),
                SampleFormat::Float32,
                44100,
                256,
                silence(),
                None,
            )
            .unwrap();
        assert!(!backend.shared.lock().handle.synchronized);
        assert!(logs_contain("unable to link input to output"));
    }

    #[test]
    fn test_device_info_snapshot() {
        let driver = SimulatedDriver::new(vec![SimulatedDevice::new("usb")
            .with_channels(2, 1)
            .with_sample_rates(&[22050, 44100])]);
        let mut backend = PcmBackend::new(driver);
        let info = backend.device_info(0).unwrap();

        assert!(info.probed);
        assert_eq!(info.name, "usb");
        assert_eq!(info.output_channels, 2);
        assert_eq!(info.input_channels, 1);
        assert_eq!(info.duplex_channels, 1);
        assert_eq!(info.sample_rates, vec![22050, 44100]);
        assert_eq!(info.preferred_sample_rate, 44100);
        assert!(info.native_formats.contains(SampleFormat::Float64));
    }
}
