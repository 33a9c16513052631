//! Backend used when no audio API is available
//!
//! Reports no devices; every open fails.

use crate::audio::architecture::{Backend, ProbeRequest};
use crate::audio::callback::StreamCallback;
use crate::audio::device::DeviceInfo;
use crate::audio::stream::AudioStream;
use crate::backend::Api;
use crate::config::StreamOptions;
use crate::error::{ProbeFailure, Result};

#[derive(Debug, Default)]
pub struct DummyBackend {
    stream: AudioStream,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for DummyBackend {
    fn api(&self) -> Api {
        Api::Dummy
    }

    fn native_device_count(&mut self) -> usize {
        0
    }

    fn native_device_info(&mut self, _id: usize) -> DeviceInfo {
        DeviceInfo::default()
    }

    fn with_stream<R>(&self, f: impl FnOnce(&AudioStream) -> R) -> R {
        f(&self.stream)
    }

    fn probe_device_open(
        &mut self,
        _request: &ProbeRequest<'_>,
    ) -> std::result::Result<(), ProbeFailure> {
        Err(ProbeFailure::new("the dummy backend has no devices"))
    }

    fn launch(
        &mut self,
        _callback: StreamCallback,
        _options: &StreamOptions,
    ) -> std::result::Result<(), ProbeFailure> {
        Err(ProbeFailure::new("the dummy backend cannot run streams"))
    }

    fn release(&mut self) {
        self.stream.reset();
    }

    fn close_device(&mut self) -> Result<()> {
        self.stream.reset();
        Ok(())
    }

    fn start_device(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop_device(&mut self, _drain: bool) -> Result<()> {
        Ok(())
    }
}
