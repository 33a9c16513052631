//! Device abstraction
//!
//! Backends implement [`Backend`]: device enumeration, per-direction
//! probing and the native start/stop/close primitives. Callers use
//! [`AudioArchitecture`], which every backend gets through a blanket
//! implementation carrying the policy shared by all of them:
//!
//! - parameter validation and the single-open-stream rule
//! - output probed before input; a failed probe releases what was opened
//! - redundant start/stop/close requests are warnings, not errors
//! - faults raised on the audio thread surface on the next control call

use crate::audio::callback::StreamCallback;
use crate::audio::device::DeviceInfo;
use crate::audio::stream::{AudioStream, Direction, StreamState};
use crate::backend::Api;
use crate::config::{StreamOptions, StreamParameters};
use crate::error::{DeviceError, Error, ProbeFailure, Result, StreamError};
use crate::format::SampleFormat;
use crate::logging;

/// Everything a backend needs to open one stream direction
#[derive(Debug, Clone)]
pub struct ProbeRequest<'a> {
    pub direction: Direction,
    pub device_id: usize,
    pub channels: u32,
    pub first_channel: u32,
    pub format: SampleFormat,
    pub sample_rate: u32,
    /// Period size hint in frames
    pub buffer_frames: u32,
    pub options: &'a StreamOptions,
}

/// Implementor side of a native audio API
pub trait Backend: Send {
    fn api(&self) -> Api;

    fn native_device_count(&mut self) -> usize;

    /// Probe device `id`, which is known to be in range
    fn native_device_info(&mut self, id: usize) -> DeviceInfo;

    fn native_default_output(&mut self) -> usize {
        0
    }

    fn native_default_input(&mut self) -> usize {
        0
    }

    /// Run `f` against the stream record
    fn with_stream<R>(&self, f: impl FnOnce(&AudioStream) -> R) -> R;

    /// Open and configure one direction, recording it in the stream
    fn probe_device_open(
        &mut self,
        request: &ProbeRequest<'_>,
    ) -> std::result::Result<(), ProbeFailure>;

    /// Spawn the callback thread once every direction is probed, leaving the
    /// stream `Stopped` at stream time 0
    fn launch(
        &mut self,
        callback: StreamCallback,
        options: &StreamOptions,
    ) -> std::result::Result<(), ProbeFailure>;

    /// Undo a partially opened stream
    fn release(&mut self);

    /// Stop the callback thread, release native handles and reset the stream
    fn close_device(&mut self) -> Result<()>;

    fn start_device(&mut self) -> Result<()>;

    /// Stop a running stream, draining pending output if `drain` is set
    fn stop_device(&mut self, drain: bool) -> Result<()>;

    /// A fatal error raised on the audio thread since the last call
    fn take_fault(&mut self) -> Option<Error> {
        None
    }
}

/// Caller side of an audio API
pub trait AudioArchitecture: Send {
    fn current_api(&self) -> Api;

    fn device_count(&mut self) -> usize;

    fn device_info(&mut self, id: usize) -> Result<DeviceInfo>;

    fn default_output_device(&mut self) -> usize;

    fn default_input_device(&mut self) -> usize;

    /// Open a stream and return the negotiated period size in frames
    ///
    /// At least one of `output` and `input` must be given. The stream is
    /// left stopped.
    #[allow(clippy::too_many_arguments)]
    fn open_stream(
        &mut self,
        output: Option<&StreamParameters>,
        input: Option<&StreamParameters>,
        format: SampleFormat,
        sample_rate: u32,
        buffer_frames: u32,
        callback: StreamCallback,
        options: Option<&StreamOptions>,
    ) -> Result<u32>;

    fn close_stream(&mut self) -> Result<()>;

    fn start_stream(&mut self) -> Result<()>;

    /// Stop after pending output has played
    fn stop_stream(&mut self) -> Result<()>;

    /// Stop immediately, discarding pending output
    fn abort_stream(&mut self) -> Result<()>;

    fn is_stream_open(&self) -> bool;

    fn is_stream_running(&self) -> bool;

    /// Sum of the per-direction latencies in frames
    fn stream_latency(&self) -> Result<u64>;

    /// Seconds of audio processed since open
    fn stream_time(&self) -> Result<f64>;

    fn stream_sample_rate(&self) -> Result<u32>;
}

/// Log an error the way its kind demands and hand it back
fn report(err: impl Into<Error>) -> Error {
    let err = err.into();
    logging::log(err.severity(), &err.to_string());
    err
}

fn validate(params: &StreamParameters, direction: Direction, device_count: usize) -> Result<()> {
    if params.channel_count == 0 {
        return Err(report(Error::invalid_parameter(format!(
            "{} channel count must be at least 1",
            direction
        ))));
    }
    if params.device_id >= device_count {
        return Err(report(DeviceError::InvalidDevice {
            id: params.device_id,
            count: device_count,
        }));
    }
    Ok(())
}

impl<B: Backend> AudioArchitecture for B {
    fn current_api(&self) -> Api {
        self.api()
    }

    fn device_count(&mut self) -> usize {
        self.native_device_count()
    }

    fn device_info(&mut self, id: usize) -> Result<DeviceInfo> {
        let count = self.native_device_count();
        if id >= count {
            return Err(report(DeviceError::InvalidDevice { id, count }));
        }
        Ok(self.native_device_info(id))
    }

    fn default_output_device(&mut self) -> usize {
        self.native_default_output()
    }

    fn default_input_device(&mut self) -> usize {
        self.native_default_input()
    }

    fn open_stream(
        &mut self,
        output: Option<&StreamParameters>,
        input: Option<&StreamParameters>,
        format: SampleFormat,
        sample_rate: u32,
        buffer_frames: u32,
        callback: StreamCallback,
        options: Option<&StreamOptions>,
    ) -> Result<u32> {
        if self.is_stream_open() {
            return Err(report(StreamError::AlreadyOpen));
        }
        if output.is_none() && input.is_none() {
            return Err(report(Error::invalid_parameter(
                "at least one of output and input parameters is required",
            )));
        }
        if sample_rate == 0 {
            return Err(report(Error::invalid_parameter("sample rate must be non-zero")));
        }
        if buffer_frames == 0 {
            return Err(report(Error::invalid_parameter("buffer size must be non-zero")));
        }

        let count = self.native_device_count();
        if let Some(params) = output {
            validate(params, Direction::Output, count)?;
        }
        if let Some(params) = input {
            validate(params, Direction::Input, count)?;
        }

        let defaults = StreamOptions::default();
        let options = options.unwrap_or(&defaults);

        let mut sample_rate = sample_rate;
        let mut buffer_frames = buffer_frames;
        for (direction, params) in [(Direction::Output, output), (Direction::Input, input)] {
            let Some(params) = params else { continue };
            let request = ProbeRequest {
                direction,
                device_id: params.device_id,
                channels: params.channel_count,
                first_channel: params.first_channel,
                format,
                sample_rate,
                buffer_frames,
                options,
            };
            if let Err(failure) = self.probe_device_open(&request) {
                self.release();
                return Err(report(DeviceError::ProbeFailed(failure)));
            }
            // Input negotiates against what the output settled on
            (sample_rate, buffer_frames) = self.with_stream(|s| (s.sample_rate, s.buffer_size));
        }

        if let Err(failure) = self.launch(callback, options) {
            self.release();
            return Err(report(DeviceError::ProbeFailed(failure)));
        }

        tracing::info!(
            "{} stream open: {} Hz, {} frames per period",
            self.api(),
            sample_rate,
            buffer_frames
        );
        Ok(buffer_frames)
    }

    fn close_stream(&mut self) -> Result<()> {
        if !self.is_stream_open() {
            tracing::warn!("close_stream: no open stream to close");
            return Ok(());
        }
        let result = self.close_device();
        // A fault from the final period has nowhere left to go
        if let Some(fault) = self.take_fault() {
            tracing::debug!("discarding fault on close: {}", fault);
        }
        result.map_err(report)
    }

    fn start_stream(&mut self) -> Result<()> {
        verify(self)?;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        if self.is_stream_running() {
            tracing::warn!("start_stream: the stream is already running");
            return Ok(());
        }
        self.start_device().map_err(report)
    }

    fn stop_stream(&mut self) -> Result<()> {
        verify(self)?;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        if !self.is_stream_running() {
            tracing::warn!("stop_stream: the stream is already stopped");
            return Ok(());
        }
        self.stop_device(true).map_err(report)
    }

    fn abort_stream(&mut self) -> Result<()> {
        verify(self)?;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        if !self.is_stream_running() {
            tracing::warn!("abort_stream: the stream is already stopped");
            return Ok(());
        }
        self.stop_device(false).map_err(report)
    }

    fn is_stream_open(&self) -> bool {
        self.with_stream(AudioStream::is_open)
    }

    fn is_stream_running(&self) -> bool {
        self.with_stream(|s| s.state == StreamState::Running)
    }

    fn stream_latency(&self) -> Result<u64> {
        verify(self)?;
        Ok(self.with_stream(AudioStream::total_latency))
    }

    fn stream_time(&self) -> Result<f64> {
        verify(self)?;
        Ok(self.with_stream(|s| s.stream_time))
    }

    fn stream_sample_rate(&self) -> Result<u32> {
        verify(self)?;
        Ok(self.with_stream(|s| s.sample_rate))
    }
}

/// Fail with `NotOpen` unless a stream is open
fn verify<B: Backend>(backend: &B) -> Result<()> {
    if backend.with_stream(AudioStream::is_open) {
        Ok(())
    } else {
        Err(report(StreamError::NotOpen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::callback::CallbackResult;
    use crate::audio::stream::DirectionSetup;
    use crate::error::ErrorKind;
    use tracing_test::traced_test;

    /// Backend that records the order of hook calls
    #[derive(Default)]
    struct Recorder {
        stream: AudioStream,
        calls: Vec<String>,
        fail_input: bool,
        fault: Option<Error>,
    }

    impl Backend for Recorder {
        fn api(&self) -> Api {
            Api::Dummy
        }

        fn native_device_count(&mut self) -> usize {
            2
        }

        fn native_device_info(&mut self, id: usize) -> DeviceInfo {
            DeviceInfo::unprobed(format!("recorder {}", id))
        }

        fn with_stream<R>(&self, f: impl FnOnce(&AudioStream) -> R) -> R {
            f(&self.stream)
        }

        fn probe_device_open(
            &mut self,
            request: &ProbeRequest<'_>,
        ) -> std::result::Result<(), ProbeFailure> {
            self.calls.push(format!("probe {}", request.direction));
            if self.fail_input && request.direction == Direction::Input {
                return Err(ProbeFailure::new("input busy"));
            }
            let setup = DirectionSetup {
                device_id: request.device_id,
                user_channels: request.channels,
                device_channels: request.channels,
                first_channel: 0,
                user_format: request.format,
                device_format: request.format,
                user_interleaved: true,
                device_interleaved: true,
                byte_swap: false,
                sample_rate: request.sample_rate,
                buffer_size: 256,
                periods: 2,
            };
            self.stream.configure_direction(request.direction, &setup)?;
            self.stream.state = StreamState::Stopped;
            Ok(())
        }

        fn launch(
            &mut self,
            _callback: StreamCallback,
            _options: &StreamOptions,
        ) -> std::result::Result<(), ProbeFailure> {
            self.calls.push("launch".into());
            Ok(())
        }

        fn release(&mut self) {
            self.calls.push("release".into());
            self.stream.reset();
        }

        fn close_device(&mut self) -> Result<()> {
            self.calls.push("close".into());
            self.stream.reset();
            Ok(())
        }

        fn start_device(&mut self) -> Result<()> {
            self.calls.push("start".into());
            self.stream.state = StreamState::Running;
            Ok(())
        }

        fn stop_device(&mut self, drain: bool) -> Result<()> {
            self.calls.push(format!("stop drain={}", drain));
            self.stream.state = StreamState::Stopped;
            Ok(())
        }

        fn take_fault(&mut self) -> Option<Error> {
            self.fault.take()
        }
    }

    fn silence() -> StreamCallback {
        Box::new(|_| CallbackResult::Continue)
    }

    fn open_duplex(backend: &mut Recorder) -> Result<u32> {
        let params = StreamParameters::new(0, 2);
        backend.open_stream(
            Some(&params),
            Some(&params),
            SampleFormat::Float32,
            48000,
            512,
            silence(),
            None,
        )
    }

    #[test]
    fn test_open_probes_output_first() {
        let mut backend = Recorder::default();
        assert_eq!(open_duplex(&mut backend).unwrap(), 256);
        assert_eq!(backend.calls, ["probe output", "probe input", "launch"]);
        assert!(backend.is_stream_open());
        assert!(!backend.is_stream_running());
        assert_eq!(backend.stream_time().unwrap(), 0.0);
    }

    #[test]
    fn test_input_probe_failure_releases_output() {
        let mut backend = Recorder {
            fail_input: true,
            ..Recorder::default()
        };
        let err = open_duplex(&mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert_eq!(backend.calls, ["probe output", "probe input", "release"]);
        assert!(!backend.is_stream_open());
    }

    #[test]
    fn test_second_open_is_rejected() {
        let mut backend = Recorder::default();
        open_duplex(&mut backend).unwrap();
        let err = open_duplex(&mut backend).unwrap_err();
        assert!(matches!(err, Error::Stream(StreamError::AlreadyOpen)));
        assert_eq!(err.kind(), ErrorKind::InvalidUse);
        assert!(backend.is_stream_open());
        assert_eq!(backend.stream_sample_rate().unwrap(), 48000);
    }

    #[test]
    fn test_parameter_validation() {
        let mut backend = Recorder::default();
        let err = backend
            .open_stream(None, None, SampleFormat::Float32, 48000, 512, silence(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Stream(StreamError::InvalidParameter(_))));

        let err = backend
            .open_stream(
                Some(&StreamParameters::new(5, 2)),
                None,
                SampleFormat::Float32,
                48000,
                512,
                silence(),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Device(DeviceError::InvalidDevice { id: 5, count: 2 })
        ));

        let err = backend
            .open_stream(
                Some(&StreamParameters::new(0, 0)),
                None,
                SampleFormat::Float32,
                48000,
                512,
                silence(),
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUse);
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn test_operations_need_open_stream() {
        let mut backend = Recorder::default();
        assert!(matches!(
            backend.start_stream(),
            Err(Error::Stream(StreamError::NotOpen))
        ));
        assert!(backend.stop_stream().is_err());
        assert!(backend.abort_stream().is_err());
        assert!(backend.stream_latency().is_err());
        assert!(backend.device_info(7).is_err());
    }

    #[test]
    #[traced_test]
    fn test_redundant_requests_warn() {
        let mut backend = Recorder::default();
        backend.close_stream().unwrap();
        assert!(logs_contain("no open stream to close"));

        open_duplex(&mut backend).unwrap();
        backend.stop_stream().unwrap();
        assert!(logs_contain("already stopped"));

        backend.start_stream().unwrap();
        backend.start_stream().unwrap();
        assert!(logs_contain("already running"));
        assert_eq!(
            backend.calls.iter().filter(|c| c.as_str() == "start").count(),
            1
        );

        backend.abort_stream().unwrap();
        assert_eq!(backend.calls.last().unwrap(), "stop drain=false");
        backend.close_stream().unwrap();
        assert!(!backend.is_stream_open());
    }

    #[test]
    fn test_fault_surfaces_on_next_call() {
        let mut backend = Recorder::default();
        open_duplex(&mut backend).unwrap();
        backend.fault = Some(StreamError::UnderflowOrOverflow.into());

        let err = backend.start_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        backend.start_stream().unwrap();
    }
}
