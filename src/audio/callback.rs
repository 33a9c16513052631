//! Per-period callback contract
//!
//! The callback thread calls the user's [`StreamCallback`] exactly once per
//! hardware period with a [`CallbackBuffers`] view of the user buffers. The
//! callback fills the output and reads the input in the user format; all
//! device-side conversion happens around it.

use crate::format::{Sample, SampleFormat};

/// The function driven by the audio thread
pub type StreamCallback = Box<dyn FnMut(&mut CallbackBuffers<'_>) -> CallbackResult + Send>;

/// Xrun conditions detected since the previous period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    /// The output ran dry and the device was re-prepared
    pub output_underflow: bool,
    /// The input overran and the device was re-prepared
    pub input_overflow: bool,
}

impl StreamStatus {
    pub fn is_clean(&self) -> bool {
        !self.output_underflow && !self.input_overflow
    }
}

/// What the audio thread does after the callback returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackResult {
    /// Keep streaming
    #[default]
    Continue,
    /// Play out what has been written, then stop
    Stop,
    /// Stop immediately, discarding pending output
    Abort,
}

/// Views of one period of user buffers
pub struct CallbackBuffers<'a> {
    output: Option<&'a mut [u8]>,
    input: Option<&'a [u8]>,
    format: SampleFormat,
    frames: usize,
    output_channels: usize,
    input_channels: usize,
    interleaved: bool,
    stream_time: f64,
    status: StreamStatus,
}

impl<'a> CallbackBuffers<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        output: Option<&'a mut [u8]>,
        input: Option<&'a [u8]>,
        format: SampleFormat,
        frames: usize,
        output_channels: usize,
        input_channels: usize,
        interleaved: bool,
        stream_time: f64,
        status: StreamStatus,
    ) -> Self {
        let output_channels = if output.is_some() { output_channels } else { 0 };
        let input_channels = if input.is_some() { input_channels } else { 0 };
        Self {
            output,
            input,
            format,
            frames,
            output_channels,
            input_channels,
            interleaved,
            stream_time,
            status,
        }
    }

    /// Output samples, `None` for input-only streams or when `T` does not
    /// match the stream format
    pub fn output<T: Sample>(&mut self) -> Option<&mut [T]> {
        if !T::accepts(self.format) {
            return None;
        }
        bytemuck::try_cast_slice_mut(self.output.as_deref_mut()?).ok()
    }

    /// Input samples, `None` for output-only streams or when `T` does not
    /// match the stream format
    pub fn input<T: Sample>(&self) -> Option<&[T]> {
        if !T::accepts(self.format) {
            return None;
        }
        bytemuck::try_cast_slice(self.input?).ok()
    }

    /// Output and input views at once, for duplex processing
    pub fn split<T: Sample>(&mut self) -> (Option<&mut [T]>, Option<&[T]>) {
        if !T::accepts(self.format) {
            return (None, None);
        }
        let output = self
            .output
            .as_deref_mut()
            .and_then(|bytes| bytemuck::try_cast_slice_mut(bytes).ok());
        let input = self
            .input
            .and_then(|bytes| bytemuck::try_cast_slice(bytes).ok());
        (output, input)
    }

    pub fn output_bytes(&mut self) -> Option<&mut [u8]> {
        self.output.as_deref_mut()
    }

    pub fn input_bytes(&self) -> Option<&[u8]> {
        self.input
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Frames in this period
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Whether user buffers hold frames of interleaved channels
    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// Seconds of audio processed before this period
    pub fn stream_time(&self) -> f64 {
        self.stream_time
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }
}

/// Adapt a per-frame function into a [`StreamCallback`]
///
/// `f` is called once per frame with one sample per channel. In duplex
/// streams the slice holds the input frame on entry; whatever `f` leaves in
/// it is written to the output. Planar user buffers are gathered and
/// scattered so `f` always sees a single frame.
pub fn per_frame<T, F>(mut f: F) -> StreamCallback
where
    T: Sample,
    F: FnMut(&mut [T]) + Send + 'static,
{
    let mut frame: Vec<T> = Vec::new();

    Box::new(move |buffers| {
        let frames = buffers.frames();
        let out_channels = buffers.output_channels();
        let in_channels = buffers.input_channels();
        let interleaved = buffers.is_interleaved();
        frame.resize(out_channels.max(in_channels), T::default());

        let index = |frame_index: usize, channel: usize, channels: usize| {
            if interleaved {
                frame_index * channels + channel
            } else {
                channel * frames + frame_index
            }
        };

        let (mut output, input) = buffers.split::<T>();
        for i in 0..frames {
            frame.fill(T::default());
            if let Some(input) = input {
                for c in 0..in_channels {
                    frame[c] = input[index(i, c, in_channels)];
                }
            }

            f(&mut frame);

            if let Some(output) = output.as_deref_mut() {
                for c in 0..out_channels {
                    output[index(i, c, out_channels)] = frame[c];
                }
            }
        }

        CallbackResult::Continue
    })
}
