//! Linux ALSA driver
//!
//! Devices are the PCM devices of every sound card, listed as `hw:C,D`.
//! Streams open through the `plughw:` plug layer unless exclusive access is
//! requested; device 0 opens the `default` PCM when asked to.

use alsa::card;
use alsa::ctl::{Ctl, DeviceIter};
use alsa::pcm::{Access, Format, Frames, HwParams, State, PCM};
use alsa::{Direction as AlsaDirection, ValueOr};

use crate::audio::device::SAMPLE_RATES;
use crate::audio::stream::Direction;
use crate::backend::pcm::{
    HwCapabilities, HwConfig, HwRequest, PcmDevice, PcmDriver, PcmError, PcmHandle, PcmState,
};
use crate::backend::Api;
use crate::config::{StreamFlag, StreamOptions};
use crate::format::{Endian, NativeFormats, SampleFormat};

/// Map an ALSA error, turning broken-pipe into an xrun
fn pcm_error(context: &'static str, err: alsa::Error) -> PcmError {
    let errno = err.errno();
    if errno == libc::EPIPE {
        PcmError::Xrun
    } else {
        PcmError::Io {
            context,
            errno,
            message: err.to_string(),
        }
    }
}

fn alsa_direction(direction: Direction) -> AlsaDirection {
    match direction {
        Direction::Output => AlsaDirection::Playback,
        Direction::Input => AlsaDirection::Capture,
    }
}

fn alsa_format(format: SampleFormat, endian: Endian) -> Format {
    match (format, endian) {
        (SampleFormat::Sint8, _) => Format::S8,
        (SampleFormat::Sint16, Endian::Little) => Format::S16LE,
        (SampleFormat::Sint16, Endian::Big) => Format::S16BE,
        (SampleFormat::Sint24, Endian::Little) => Format::S24LE,
        (SampleFormat::Sint24, Endian::Big) => Format::S24BE,
        (SampleFormat::Sint32, Endian::Little) => Format::S32LE,
        (SampleFormat::Sint32, Endian::Big) => Format::S32BE,
        (SampleFormat::Float32, Endian::Little) => Format::FloatLE,
        (SampleFormat::Float32, Endian::Big) => Format::FloatBE,
        (SampleFormat::Float64, Endian::Little) => Format::Float64LE,
        (SampleFormat::Float64, Endian::Big) => Format::Float64BE,
    }
}

/// Driver enumerating ALSA sound cards
#[derive(Debug, Default)]
pub struct AlsaDriver;

impl AlsaDriver {
    pub fn new() -> Self {
        Self
    }
}

impl PcmDriver for AlsaDriver {
    type Handle = AlsaHandle;

    fn api(&self) -> Api {
        Api::LinuxAlsa
    }

    fn devices(&mut self) -> Vec<PcmDevice> {
        let mut devices = Vec::new();

        for card in card::Iter::new() {
            let card = match card {
                Ok(card) => card,
                Err(e) => {
                    tracing::warn!("unable to enumerate sound card: {}", e);
                    continue;
                }
            };
            let index = card.get_index();
            let card_name = card.get_name().unwrap_or_else(|_| format!("card {}", index));

            let ctl = match Ctl::from_card(&card, false) {
                Ok(ctl) => ctl,
                Err(e) => {
                    tracing::warn!("unable to open control for card {}: {}", index, e);
                    continue;
                }
            };

            for device in DeviceIter::new(&ctl) {
                let pcm_name = [AlsaDirection::Playback, AlsaDirection::Capture]
                    .into_iter()
                    .find_map(|dir| {
                        let info = ctl.pcm_info(device as u32, 0, dir).ok()?;
                        info.get_name().ok().map(str::to_string)
                    })
                    .unwrap_or_default();

                devices.push(PcmDevice {
                    id: format!("hw:{},{}", index, device),
                    name: if pcm_name.is_empty() {
                        card_name.clone()
                    } else {
                        format!("{} ({})", card_name, pcm_name)
                    },
                });
            }
        }

        devices
    }

    fn open(
        &mut self,
        device: &PcmDevice,
        index: usize,
        direction: Direction,
        options: &StreamOptions,
    ) -> Result<AlsaHandle, PcmError> {
        let name = if index == 0 && options.has(StreamFlag::DefaultDevice) {
            "default".to_string()
        } else if options.has(StreamFlag::ExclusiveDevice) {
            device.id.clone()
        } else {
            format!("plug{}", device.id)
        };

        tracing::debug!("opening {} pcm '{}'", direction, name);
        let pcm = PCM::new(&name, alsa_direction(direction), false)
            .map_err(|e| pcm_error("pcm open", e))?;
        Ok(AlsaHandle { pcm })
    }
}

/// An open ALSA PCM
pub struct AlsaHandle {
    pcm: PCM,
}

impl AlsaHandle {
    fn configure_hw(&self, request: &HwRequest) -> alsa::Result<()> {
        let hwp = HwParams::any(&self.pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(alsa_format(request.format, request.endian))?;
        hwp.set_channels(request.channels)?;
        hwp.set_rate_near(request.sample_rate, ValueOr::Nearest)?;
        hwp.set_period_size_near(request.period_frames as Frames, ValueOr::Nearest)?;
        if let Err(e) = hwp.set_periods(request.periods, ValueOr::Nearest) {
            tracing::debug!("period count {} not settable: {}", request.periods, e);
        }
        self.pcm.hw_params(&hwp)
    }

    fn configure_sw(&self, period_frames: Frames) -> alsa::Result<()> {
        let swp = self.pcm.sw_params_current()?;
        // Start as soon as one period is queued
        swp.set_start_threshold(period_frames)?;
        self.pcm.sw_params(&swp)
    }
}

impl PcmHandle for AlsaHandle {
    fn capabilities(&mut self) -> Result<HwCapabilities, PcmError> {
        let hwp = HwParams::any(&self.pcm).map_err(|e| pcm_error("hw params", e))?;
        // The plug layer only converts interleaved data for us
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| pcm_error("hw params access", e))?;

        let min_channels = hwp
            .get_channels_min()
            .map_err(|e| pcm_error("hw params channels", e))?;
        let max_channels = hwp
            .get_channels_max()
            .map_err(|e| pcm_error("hw params channels", e))?;

        let supported = |endian: Endian| -> NativeFormats {
            SampleFormat::ALL
                .into_iter()
                .filter(|f| hwp.test_format(alsa_format(*f, endian)).is_ok())
                .collect()
        };
        let native = supported(Endian::NATIVE);
        let foreign: NativeFormats = supported(Endian::NATIVE.opposite())
            .iter()
            .filter(|f| *f != SampleFormat::Sint8)
            .collect();

        let sample_rates = SAMPLE_RATES
            .into_iter()
            .filter(|rate| hwp.test_rate(*rate).is_ok())
            .collect();

        Ok(HwCapabilities {
            min_channels,
            max_channels,
            native,
            foreign,
            sample_rates,
        })
    }

    fn configure(&mut self, request: &HwRequest) -> Result<HwConfig, PcmError> {
        self.configure_hw(request)
            .map_err(|e| pcm_error("hw params", e))?;

        let current = self
            .pcm
            .hw_params_current()
            .map_err(|e| pcm_error("hw params", e))?;
        let sample_rate = current.get_rate().map_err(|e| pcm_error("hw params rate", e))?;
        let period_frames = current
            .get_period_size()
            .map_err(|e| pcm_error("hw params period size", e))?;
        let periods = current
            .get_periods()
            .map_err(|e| pcm_error("hw params periods", e))?;
        drop(current);

        self.configure_sw(period_frames)
            .map_err(|e| pcm_error("sw params", e))?;

        Ok(HwConfig {
            sample_rate,
            period_frames: period_frames as u32,
            periods,
        })
    }

    fn link(&mut self, other: &Self) -> Result<(), PcmError> {
        self.pcm.link(&other.pcm).map_err(|e| pcm_error("pcm link", e))
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        self.pcm.prepare().map_err(|e| pcm_error("pcm prepare", e))
    }

    fn state(&self) -> PcmState {
        #[allow(unreachable_patterns)]
        match self.pcm.state() {
            State::Open => PcmState::Open,
            State::Setup => PcmState::Setup,
            State::Prepared => PcmState::Prepared,
            State::Running => PcmState::Running,
            State::XRun => PcmState::XRun,
            State::Draining => PcmState::Draining,
            State::Paused => PcmState::Paused,
            State::Suspended => PcmState::Suspended,
            State::Disconnected => PcmState::Disconnected,
            _ => PcmState::Disconnected,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, PcmError> {
        self.pcm
            .io_bytes()
            .writei(data)
            .map_err(|e| pcm_error("pcm write", e))
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, PcmError> {
        self.pcm
            .io_bytes()
            .readi(data)
            .map_err(|e| pcm_error("pcm read", e))
    }

    fn drop_pending(&mut self) -> Result<(), PcmError> {
        self.pcm.drop().map_err(|e| pcm_error("pcm drop", e))
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        self.pcm.drain().map_err(|e| pcm_error("pcm drain", e))
    }

    fn delay(&self) -> Result<i64, PcmError> {
        self.pcm
            .delay()
            .map(|frames| frames as i64)
            .map_err(|e| pcm_error("pcm delay", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(alsa_format(SampleFormat::Sint8, Endian::Big), Format::S8);
        assert_eq!(alsa_format(SampleFormat::Sint24, Endian::Little), Format::S24LE);
        assert_eq!(alsa_format(SampleFormat::Float64, Endian::Big), Format::Float64BE);
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(alsa_direction(Direction::Output), AlsaDirection::Playback);
        assert_eq!(alsa_direction(Direction::Input), AlsaDirection::Capture);
    }
}
