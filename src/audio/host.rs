//! The `Audio` facade
//!
//! Selects a backend once and forwards every call to it.

use crate::audio::architecture::AudioArchitecture;
use crate::audio::callback::StreamCallback;
use crate::audio::device::DeviceInfo;
use crate::backend::{compiled_apis, create_backend, Api, DummyBackend};
use crate::config::{AudioConfig, StreamOptions, StreamParameters};
use crate::error::Result;
use crate::format::SampleFormat;

/// Entry point for device queries and stream control
pub struct Audio {
    backend: Box<dyn AudioArchitecture>,
}

impl Audio {
    /// Use the first compiled hardware API that has devices
    pub fn new() -> Self {
        Self::with_api(Api::Unspecified)
    }

    /// Use `api` if it is compiled in, otherwise select automatically
    pub fn with_api(api: Api) -> Self {
        if api != Api::Unspecified {
            if let Some(backend) = create_backend(api) {
                tracing::info!("using {} audio API", api);
                return Self { backend };
            }
            tracing::warn!("{} support is not compiled in, selecting automatically", api);
        }

        for api in compiled_apis().into_iter().filter(|api| api.is_hardware()) {
            let Some(mut backend) = create_backend(api) else {
                continue;
            };
            if backend.device_count() > 0 {
                tracing::info!("using {} audio API", api);
                return Self { backend };
            }
            tracing::debug!("{} has no devices", api);
        }

        tracing::warn!("no compiled audio API has devices, using the dummy backend");
        Self {
            backend: Box::new(DummyBackend::new()),
        }
    }

    /// Select the API named in `config`
    pub fn from_config(config: &AudioConfig) -> Self {
        Self::with_api(config.api)
    }

    /// Wrap an already constructed backend
    pub fn from_architecture(backend: Box<dyn AudioArchitecture>) -> Self {
        Self { backend }
    }

    pub fn current_api(&self) -> Api {
        self.backend.current_api()
    }

    pub fn device_count(&mut self) -> usize {
        self.backend.device_count()
    }

    pub fn device_info(&mut self, id: usize) -> Result<DeviceInfo> {
        self.backend.device_info(id)
    }

    /// Snapshots of every device
    pub fn devices(&mut self) -> Vec<DeviceInfo> {
        (0..self.device_count())
            .filter_map(|id| self.backend.device_info(id).ok())
            .collect()
    }

    pub fn default_output_device(&mut self) -> usize {
        self.backend.default_output_device()
    }

    pub fn default_input_device(&mut self) -> usize {
        self.backend.default_input_device()
    }

    /// Open a stream; see [`AudioArchitecture::open_stream`]
    #[allow(clippy::too_many_arguments)]
    pub fn open_stream(
        &mut self,
        output: Option<&StreamParameters>,
        input: Option<&StreamParameters>,
        format: SampleFormat,
        sample_rate: u32,
        buffer_frames: u32,
        callback: StreamCallback,
        options: Option<&StreamOptions>,
    ) -> Result<u32> {
        self.backend.open_stream(
            output,
            input,
            format,
            sample_rate,
            buffer_frames,
            callback,
            options,
        )
    }

    /// Open a stream with the rate, period size, format and options of
    /// `config`
    pub fn open_stream_with_config(
        &mut self,
        output: Option<&StreamParameters>,
        input: Option<&StreamParameters>,
        config: &AudioConfig,
        callback: StreamCallback,
    ) -> Result<u32> {
        let options = config.stream_options();
        self.backend.open_stream(
            output,
            input,
            config.stream.format,
            config.stream.sample_rate,
            config.stream.buffer_frames,
            callback,
            Some(&options),
        )
    }

    pub fn close_stream(&mut self) -> Result<()> {
        self.backend.close_stream()
    }

    pub fn start_stream(&mut self) -> Result<()> {
        self.backend.start_stream()
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        self.backend.stop_stream()
    }

    pub fn abort_stream(&mut self) -> Result<()> {
        self.backend.abort_stream()
    }

    pub fn is_stream_open(&self) -> bool {
        self.backend.is_stream_open()
    }

    pub fn is_stream_running(&self) -> bool {
        self.backend.is_stream_running()
    }

    pub fn stream_latency(&self) -> Result<u64> {
        self.backend.stream_latency()
    }

    pub fn stream_time(&self) -> Result<f64> {
        self.backend.stream_time()
    }

    pub fn stream_sample_rate(&self) -> Result<u32> {
        self.backend.stream_sample_rate()
    }
}

impl Default for Audio {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Audio {
    fn drop(&mut self) {
        if self.backend.is_stream_open() {
            if let Err(e) = self.backend.close_stream() {
                tracing::error!("Failed to close stream on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_api() {
        let audio = Audio::with_api(Api::Simulated);
        assert_eq!(audio.current_api(), Api::Simulated);
        assert!(!audio.is_stream_open());
    }

    #[test]
    fn test_automatic_selection_never_picks_simulated() {
        let audio = Audio::new();
        assert_ne!(audio.current_api(), Api::Simulated);
    }

    #[test]
    fn test_from_config() {
        let config = AudioConfig::from_toml_str("api = \"dummy\"").unwrap();
        let mut audio = Audio::from_config(&config);
        assert_eq!(audio.current_api(), Api::Dummy);
        assert_eq!(audio.device_count(), 0);
        assert!(audio.devices().is_empty());
    }

    #[test]
    fn test_simulated_devices() {
        let mut audio = Audio::with_api(Api::Simulated);
        let devices = audio.devices();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].probed);
        assert_eq!(devices[0].duplex_channels, 2);
        assert_eq!(devices[0].preferred_sample_rate, 48000);
        assert!(devices[0].is_default_output);
    }
}
