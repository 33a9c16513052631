//! Sample format and channel layout conversion
//!
//! A [`ConvertInfo`] is computed once when a stream direction opens. It
//! describes where every copied channel lives in the source and destination
//! buffers, so the per-period conversion is a plain table walk: for frame `i`
//! and channel `j` the source sample is `i * in_jump + in_offset[j]` and the
//! destination sample is `i * out_jump + out_offset[j]`.

use crate::audio::stream::Direction;
use crate::error::ConvertError;
use crate::format::SampleFormat;

/// Layout of one side of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub channels: usize,
    pub format: SampleFormat,
    pub interleaved: bool,
}

/// Precomputed mapping between user and device buffer layouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertInfo {
    /// Channels copied per frame
    pub channels: usize,
    /// Source samples to advance per frame
    pub in_jump: usize,
    /// Destination samples to advance per frame
    pub out_jump: usize,
    pub in_format: SampleFormat,
    pub out_format: SampleFormat,
    /// Source sample offset of each copied channel
    pub in_offset: Vec<usize>,
    /// Destination sample offset of each copied channel
    pub out_offset: Vec<usize>,
    /// The destination has channels that are never written
    pub clear_output: bool,
}

impl Default for ConvertInfo {
    fn default() -> Self {
        Self {
            channels: 0,
            in_jump: 0,
            out_jump: 0,
            in_format: SampleFormat::Float64,
            out_format: SampleFormat::Float64,
            in_offset: Vec::new(),
            out_offset: Vec::new(),
            clear_output: false,
        }
    }
}

impl ConvertInfo {
    /// Build the tables for one stream direction
    ///
    /// Output streams convert user → device, input streams device → user.
    /// `first_channel` shifts the device side only.
    pub fn new(
        direction: Direction,
        user: Layout,
        device: Layout,
        buffer_size: usize,
        first_channel: usize,
    ) -> Self {
        let (input, output) = match direction {
            Direction::Output => (user, device),
            Direction::Input => (device, user),
        };

        let mut in_jump = input.channels;
        let mut out_jump = output.channels;
        let channels = in_jump.min(out_jump);

        let mut in_offset = Vec::with_capacity(channels);
        let mut out_offset = Vec::with_capacity(channels);

        if input.interleaved != output.interleaved {
            if output.interleaved {
                for k in 0..channels {
                    in_offset.push(k * buffer_size);
                    out_offset.push(k);
                }
                in_jump = 1;
            } else {
                for k in 0..channels {
                    in_offset.push(k);
                    out_offset.push(k * buffer_size);
                }
                out_jump = 1;
            }
        } else if input.interleaved {
            for k in 0..channels {
                in_offset.push(k);
                out_offset.push(k);
            }
        } else {
            for k in 0..channels {
                in_offset.push(k * buffer_size);
                out_offset.push(k * buffer_size);
            }
            in_jump = 1;
            out_jump = 1;
        }

        if first_channel > 0 {
            let shift = if device.interleaved {
                first_channel
            } else {
                first_channel * buffer_size
            };
            let device_offsets = match direction {
                Direction::Output => &mut out_offset,
                Direction::Input => &mut in_offset,
            };
            for offset in device_offsets.iter_mut() {
                *offset += shift;
            }
        }

        Self {
            channels,
            in_jump,
            out_jump,
            in_format: input.format,
            out_format: output.format,
            in_offset,
            out_offset,
            clear_output: output.channels > channels,
        }
    }

    /// Bytes touched in the source buffer for `frames` frames
    pub fn input_bytes(&self, frames: usize) -> usize {
        span(frames, self.in_jump, &self.in_offset) * self.in_format.byte_width()
    }

    /// Bytes touched in the destination buffer for `frames` frames
    pub fn output_bytes(&self, frames: usize) -> usize {
        span(frames, self.out_jump, &self.out_offset) * self.out_format.byte_width()
    }
}

fn span(frames: usize, jump: usize, offsets: &[usize]) -> usize {
    match offsets.iter().max() {
        Some(max) if frames > 0 => (frames - 1) * jump + max + 1,
        _ => 0,
    }
}

/// Convert one period from `input` into `output` as described by `info`
///
/// Destination channels that are not copied are zeroed. Both buffers are
/// checked before any sample is touched.
pub fn convert_buffer(
    output: &mut [u8],
    input: &[u8],
    info: &ConvertInfo,
    frames: usize,
) -> Result<(), ConvertError> {
    let needed = info.input_bytes(frames);
    if input.len() < needed {
        return Err(ConvertError::BufferTooSmall {
            side: "input",
            needed,
            actual: input.len(),
        });
    }
    let needed = info.output_bytes(frames);
    if output.len() < needed {
        return Err(ConvertError::BufferTooSmall {
            side: "output",
            needed,
            actual: output.len(),
        });
    }

    if info.clear_output {
        output.fill(0);
    }

    let (from, to) = (info.in_format, info.out_format);
    if from == to {
        walk(output, input, info, frames, |src, dst| dst.copy_from_slice(src));
    } else if from.is_float() || to.is_float() {
        walk(output, input, info, frames, |src, dst| {
            write_float(read_float(src, from), to, dst)
        });
    } else {
        let up = to.bits().saturating_sub(from.bits());
        let down = from.bits().saturating_sub(to.bits());
        walk(output, input, info, frames, |src, dst| {
            let value = read_int(src, from);
            write_int((value << up) >> down, to, dst)
        });
    }

    Ok(())
}

/// Apply `convert` to every mapped sample pair
#[inline]
fn walk<F>(output: &mut [u8], input: &[u8], info: &ConvertInfo, frames: usize, convert: F)
where
    F: Fn(&[u8], &mut [u8]),
{
    let in_width = info.in_format.byte_width();
    let out_width = info.out_format.byte_width();
    let offsets = info.in_offset.iter().zip(&info.out_offset);

    let mut in_base = 0;
    let mut out_base = 0;
    for _ in 0..frames {
        for (in_offset, out_offset) in offsets.clone() {
            let src = (in_base + in_offset) * in_width;
            let dst = (out_base + out_offset) * out_width;
            convert(&input[src..src + in_width], &mut output[dst..dst + out_width]);
        }
        in_base += info.in_jump;
        out_base += info.out_jump;
    }
}

/// Read an integer sample as its native-width signed value
#[inline]
fn read_int(bytes: &[u8], format: SampleFormat) -> i32 {
    match format {
        SampleFormat::Sint8 => i8::from_ne_bytes([bytes[0]]) as i32,
        SampleFormat::Sint16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as i32,
        SampleFormat::Sint24 => {
            let raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x00FF_FFFF;
            ((raw << 8) as i32) >> 8
        }
        SampleFormat::Sint32 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleFormat::Float32 | SampleFormat::Float64 => read_float(bytes, format) as i32,
    }
}

/// Write a native-width signed value, which must already be in range
#[inline]
fn write_int(value: i32, format: SampleFormat, bytes: &mut [u8]) {
    match format {
        SampleFormat::Sint8 => bytes.copy_from_slice(&(value as i8).to_ne_bytes()),
        SampleFormat::Sint16 => bytes.copy_from_slice(&(value as i16).to_ne_bytes()),
        SampleFormat::Sint24 => {
            bytes.copy_from_slice(&((value as u32) & 0x00FF_FFFF).to_ne_bytes())
        }
        SampleFormat::Sint32 => bytes.copy_from_slice(&value.to_ne_bytes()),
        SampleFormat::Float32 | SampleFormat::Float64 => write_float(value as f64, format, bytes),
    }
}

/// Read any sample as a float; integers are normalised to [-1.0, 1.0]
#[inline]
fn read_float(bytes: &[u8], format: SampleFormat) -> f64 {
    match format {
        SampleFormat::Float32 => {
            f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        SampleFormat::Float64 => f64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        _ => (read_int(bytes, format) as f64 + 0.5) / format.scale(),
    }
}

/// Write a float into any format; integers saturate at full scale
#[inline]
fn write_float(value: f64, format: SampleFormat, bytes: &mut [u8]) {
    match format {
        SampleFormat::Float32 => bytes.copy_from_slice(&(value as f32).to_ne_bytes()),
        SampleFormat::Float64 => bytes.copy_from_slice(&value.to_ne_bytes()),
        _ => {
            // v * scale - 0.5, rounded half up
            let max = ((1i64 << (format.bits() - 1)) - 1) as f64;
            let scaled = (value * format.scale()).floor().clamp(-max - 1.0, max);
            write_int(scaled as i32, format, bytes)
        }
    }
}

/// Reverse the byte order of every sample in `buffer`
///
/// 24-bit samples swap their whole 32-bit container. 8-bit buffers are left
/// untouched.
pub fn byte_swap_buffer(buffer: &mut [u8], format: SampleFormat) {
    let width = format.byte_width();
    if width < 2 {
        return;
    }
    for sample in buffer.chunks_exact_mut(width) {
        sample.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout(channels: usize, format: SampleFormat, interleaved: bool) -> Layout {
        Layout {
            channels,
            format,
            interleaved,
        }
    }

    fn bytes_of<T: bytemuck::Pod>(samples: &[T]) -> Vec<u8> {
        bytemuck::cast_slice(samples).to_vec()
    }

    fn samples_of<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
        bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    #[test]
    fn test_interleaved_tables() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(2, SampleFormat::Float64, true),
            layout(4, SampleFormat::Sint16, true),
            256,
            0,
        );
        assert_eq!(info.channels, 2);
        assert_eq!(info.in_jump, 2);
        assert_eq!(info.out_jump, 4);
        assert_eq!(info.in_offset, vec![0, 1]);
        assert_eq!(info.out_offset, vec![0, 1]);
        assert!(info.clear_output);
    }

    #[test]
    fn test_deinterleave_tables() {
        // Output: user planar, device interleaved
        let info = ConvertInfo::new(
            Direction::Output,
            layout(3, SampleFormat::Float32, false),
            layout(3, SampleFormat::Float32, true),
            100,
            0,
        );
        assert_eq!(info.in_offset, vec![0, 100, 200]);
        assert_eq!(info.out_offset, vec![0, 1, 2]);
        assert_eq!(info.in_jump, 1);
        assert_eq!(info.out_jump, 3);

        // Input: device interleaved, user planar
        let info = ConvertInfo::new(
            Direction::Input,
            layout(2, SampleFormat::Float32, false),
            layout(2, SampleFormat::Sint32, true),
            64,
            0,
        );
        assert_eq!(info.in_offset, vec![0, 1]);
        assert_eq!(info.out_offset, vec![0, 64]);
        assert_eq!(info.in_jump, 2);
        assert_eq!(info.out_jump, 1);
        assert_eq!(info.in_format, SampleFormat::Sint32);
        assert_eq!(info.out_format, SampleFormat::Float32);
    }

    #[test]
    fn test_first_channel_shifts_device_side() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(2, SampleFormat::Float32, true),
            layout(6, SampleFormat::Float32, true),
            32,
            4,
        );
        assert_eq!(info.in_offset, vec![0, 1]);
        assert_eq!(info.out_offset, vec![4, 5]);

        let info = ConvertInfo::new(
            Direction::Input,
            layout(2, SampleFormat::Float32, false),
            layout(4, SampleFormat::Float32, false),
            32,
            2,
        );
        assert_eq!(info.in_offset, vec![64, 96]);
        assert_eq!(info.out_offset, vec![0, 32]);
    }

    #[test]
    fn test_full_scale_float_to_sint16() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(1, SampleFormat::Float64, true),
            layout(1, SampleFormat::Sint16, true),
            4,
            0,
        );
        let input = bytes_of(&[1.0f64, -1.0, 0.0, 0.5]);
        let mut output = vec![0u8; 8];
        convert_buffer(&mut output, &input, &info, 4).unwrap();
        assert_eq!(samples_of::<i16>(&output), vec![32767, -32768, 0, 16383]);
    }

    #[test]
    fn test_float_saturates() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(1, SampleFormat::Float32, true),
            layout(1, SampleFormat::Sint8, true),
            2,
            0,
        );
        let input = bytes_of(&[4.0f32, -4.0]);
        let mut output = vec![0u8; 2];
        convert_buffer(&mut output, &input, &info, 2).unwrap();
        assert_eq!(samples_of::<i8>(&output), vec![127, -128]);
    }

    #[test]
    fn test_sint16_to_float() {
        let info = ConvertInfo::new(
            Direction::Input,
            layout(1, SampleFormat::Float64, true),
            layout(1, SampleFormat::Sint16, true),
            2,
            0,
        );
        let input = bytes_of(&[32767i16, -32768]);
        let mut output = vec![0u8; 16];
        convert_buffer(&mut output, &input, &info, 2).unwrap();
        assert_eq!(samples_of::<f64>(&output), vec![1.0, -1.0]);
    }

    #[test]
    fn test_sint24_sign_and_mask() {
        let info = ConvertInfo::new(
            Direction::Input,
            layout(1, SampleFormat::Sint32, true),
            layout(1, SampleFormat::Sint24, true),
            3,
            0,
        );
        // Upper container byte is garbage and must be ignored
        let input = bytes_of(&[0x7F00_0001u32, 0x00FF_FFFF, 0x0080_0000]);
        let mut output = vec![0u8; 12];
        convert_buffer(&mut output, &input, &info, 3).unwrap();
        assert_eq!(samples_of::<i32>(&output), vec![1 << 8, -1 << 8, i32::MIN]);
    }

    #[test]
    fn test_sint24_written_to_low_bytes() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(1, SampleFormat::Sint16, true),
            layout(1, SampleFormat::Sint24, true),
            1,
            0,
        );
        let input = bytes_of(&[-1i16]);
        let mut output = vec![0u8; 4];
        convert_buffer(&mut output, &input, &info, 1).unwrap();
        assert_eq!(samples_of::<u32>(&output), vec![0x00FF_FF00]);
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        let widen = ConvertInfo::new(
            Direction::Output,
            layout(1, SampleFormat::Sint8, true),
            layout(1, SampleFormat::Sint32, true),
            1,
            0,
        );
        let mut output = vec![0u8; 4];
        convert_buffer(&mut output, &bytes_of(&[-2i8]), &widen, 1).unwrap();
        assert_eq!(samples_of::<i32>(&output), vec![-2 << 24]);

        let narrow = ConvertInfo::new(
            Direction::Output,
            layout(1, SampleFormat::Sint32, true),
            layout(1, SampleFormat::Sint16, true),
            1,
            0,
        );
        let mut output = vec![0u8; 2];
        convert_buffer(&mut output, &bytes_of(&[0x1234_5678i32]), &narrow, 1).unwrap();
        assert_eq!(samples_of::<i16>(&output), vec![0x1234]);
    }

    #[test]
    fn test_channel_compensation_zeroes_extra_channels() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(1, SampleFormat::Float32, true),
            layout(3, SampleFormat::Float32, true),
            2,
            1,
        );
        let input = bytes_of(&[0.25f32, 0.75]);
        let mut output = bytes_of(&[9.0f32; 6]);
        convert_buffer(&mut output, &input, &info, 2).unwrap();
        assert_eq!(
            samples_of::<f32>(&output),
            vec![0.0, 0.25, 0.0, 0.0, 0.75, 0.0]
        );
    }

    #[test]
    fn test_interleave_planar_user_buffer() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(2, SampleFormat::Sint16, false),
            layout(2, SampleFormat::Sint16, true),
            3,
            0,
        );
        let input = bytes_of(&[1i16, 2, 3, 10, 20, 30]);
        let mut output = vec![0u8; 12];
        convert_buffer(&mut output, &input, &info, 3).unwrap();
        assert_eq!(samples_of::<i16>(&output), vec![1, 10, 2, 20, 3, 30]);
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let info = ConvertInfo::new(
            Direction::Output,
            layout(2, SampleFormat::Float32, true),
            layout(2, SampleFormat::Sint16, true),
            8,
            0,
        );
        let input = vec![0u8; 8 * 2 * 4];
        let mut output = vec![0u8; 8 * 2 * 2 - 1];
        let err = convert_buffer(&mut output, &input, &info, 8).unwrap_err();
        assert_eq!(
            err,
            ConvertError::BufferTooSmall {
                side: "output",
                needed: 32,
                actual: 31
            }
        );

        let err = convert_buffer(&mut output, &input[..10], &info, 8).unwrap_err();
        assert!(matches!(err, ConvertError::BufferTooSmall { side: "input", .. }));
    }

    #[test]
    fn test_byte_swap_sample_widths() {
        let mut buffer = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        byte_swap_buffer(&mut buffer, SampleFormat::Sint16);
        assert_eq!(buffer, vec![2, 1, 4, 3, 6, 5, 8, 7]);

        let mut buffer = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        byte_swap_buffer(&mut buffer, SampleFormat::Sint24);
        assert_eq!(buffer, vec![4, 3, 2, 1, 8, 7, 6, 5]);

        let mut buffer = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        byte_swap_buffer(&mut buffer, SampleFormat::Float64);
        assert_eq!(buffer, vec![8, 7, 6, 5, 4, 3, 2, 1]);

        let mut buffer = vec![1u8, 2];
        byte_swap_buffer(&mut buffer, SampleFormat::Sint8);
        assert_eq!(buffer, vec![1, 2]);
    }

    fn any_format() -> impl Strategy<Value = SampleFormat> {
        prop::sample::select(SampleFormat::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_same_format_is_identity(
            format in any_format(),
            channels in 1usize..6,
            frames in 1usize..48,
            interleaved in any::<bool>(),
            seed in prop::collection::vec(any::<u8>(), 8 * 6 * 48),
        ) {
            let side = layout(channels, format, interleaved);
            let info = ConvertInfo::new(Direction::Output, side, side, frames, 0);
            let len = channels * frames * format.byte_width();
            let input = &seed[..len];
            let mut output = vec![0u8; len];
            convert_buffer(&mut output, input, &info, frames).unwrap();
            prop_assert_eq!(&output[..], input);
        }

        #[test]
        fn prop_byte_swap_twice_restores(
            format in any_format(),
            mut bytes in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let original = bytes.clone();
            byte_swap_buffer(&mut bytes, format);
            byte_swap_buffer(&mut bytes, format);
            prop_assert_eq!(bytes, original);
        }

        #[test]
        fn prop_offset_tables(
            direction in prop::sample::select(vec![Direction::Output, Direction::Input]),
            user_channels in 1usize..8,
            extra in 0usize..4,
            first_channel in 0usize..4,
            user_interleaved in any::<bool>(),
            device_interleaved in any::<bool>(),
            buffer_size in 1usize..512,
        ) {
            let device_channels = user_channels + first_channel + extra;
            let user = layout(user_channels, SampleFormat::Float32, user_interleaved);
            let device = layout(device_channels, SampleFormat::Sint16, device_interleaved);

            let shifted = ConvertInfo::new(direction, user, device, buffer_size, first_channel);
            let base = ConvertInfo::new(direction, user, device, buffer_size, 0);

            prop_assert_eq!(shifted.channels, user_channels);
            prop_assert_eq!(shifted.in_offset.len(), user_channels);
            prop_assert_eq!(shifted.out_offset.len(), user_channels);

            let shift = if device_interleaved { first_channel } else { first_channel * buffer_size };
            let (user_side, device_side, base_user, base_device) = match direction {
                Direction::Output => (&shifted.in_offset, &shifted.out_offset, &base.in_offset, &base.out_offset),
                Direction::Input => (&shifted.out_offset, &shifted.in_offset, &base.out_offset, &base.in_offset),
            };
            prop_assert_eq!(user_side, base_user);
            for (moved, original) in device_side.iter().zip(base_device) {
                prop_assert_eq!(*moved, original + shift);
            }
        }
    }
}
