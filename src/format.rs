//! Sample encodings and typed sample access

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encodings understood by the conversion engine
///
/// `Sint24` samples occupy the low three bytes of a 32-bit container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Sint8,
    Sint16,
    Sint24,
    Sint32,
    Float32,
    Float64,
}

impl SampleFormat {
    /// All formats, narrowest integer first
    pub const ALL: [SampleFormat; 6] = [
        SampleFormat::Sint8,
        SampleFormat::Sint16,
        SampleFormat::Sint24,
        SampleFormat::Sint32,
        SampleFormat::Float32,
        SampleFormat::Float64,
    ];

    /// Order in which device formats are tried when the user format is not
    /// available natively
    pub const PREFERENCE: [SampleFormat; 6] = [
        SampleFormat::Float64,
        SampleFormat::Float32,
        SampleFormat::Sint32,
        SampleFormat::Sint24,
        SampleFormat::Sint16,
        SampleFormat::Sint8,
    ];

    /// Bytes occupied by one sample in a buffer
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Sint8 => 1,
            Self::Sint16 => 2,
            Self::Sint24 | Self::Sint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Significant bits of an integer format
    pub const fn bits(self) -> u32 {
        match self {
            Self::Sint8 => 8,
            Self::Sint16 => 16,
            Self::Sint24 => 24,
            Self::Sint32 | Self::Float32 => 32,
            Self::Float64 => 64,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Full-scale normalisation constant for integer formats
    ///
    /// Integer `v` maps to `(v + 0.5) / scale`, so the asymmetric integer
    /// range covers exactly `[-1.0, 1.0]`.
    pub const fn scale(self) -> f64 {
        match self {
            Self::Sint8 => 127.5,
            Self::Sint16 => 32767.5,
            Self::Sint24 => 8388607.5,
            Self::Sint32 => 2147483647.5,
            Self::Float32 | Self::Float64 => 1.0,
        }
    }

    const fn bit(self) -> u32 {
        match self {
            Self::Sint8 => 0x1,
            Self::Sint16 => 0x2,
            Self::Sint24 => 0x4,
            Self::Sint32 => 0x8,
            Self::Float32 => 0x10,
            Self::Float64 => 0x20,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sint8 => "sint8",
            Self::Sint16 => "sint16",
            Self::Sint24 => "sint24",
            Self::Sint32 => "sint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Bitmask of sample formats a device handles natively
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeFormats(u32);

impl NativeFormats {
    pub const NONE: NativeFormats = NativeFormats(0);

    pub const fn contains(self, format: SampleFormat) -> bool {
        self.0 & format.bit() != 0
    }

    pub fn insert(&mut self, format: SampleFormat) {
        self.0 |= format.bit();
    }

    #[must_use]
    pub fn with(mut self, format: SampleFormat) -> Self {
        self.insert(format);
        self
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Formats in the set, narrowest first
    pub fn iter(self) -> impl Iterator<Item = SampleFormat> {
        SampleFormat::ALL
            .into_iter()
            .filter(move |format| self.contains(*format))
    }
}

impl FromIterator<SampleFormat> for NativeFormats {
    fn from_iter<I: IntoIterator<Item = SampleFormat>>(iter: I) -> Self {
        iter.into_iter()
            .fold(NativeFormats::NONE, |set, format| set.with(format))
    }
}

/// Byte order of device samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;

    pub const fn is_native(self) -> bool {
        matches!(
            (self, Self::NATIVE),
            (Endian::Little, Endian::Little) | (Endian::Big, Endian::Big)
        )
    }

    pub const fn opposite(self) -> Endian {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }
}

/// A Rust type that can view a user buffer of some [`SampleFormat`]
///
/// `i32` views both `Sint32` and `Sint24` buffers.
pub trait Sample: bytemuck::Pod + Default + Send + 'static {
    const FORMAT: SampleFormat;

    /// Whether a buffer in `format` can be viewed as `[Self]`
    fn accepts(format: SampleFormat) -> bool {
        format == Self::FORMAT
    }
}

impl Sample for i8 {
    const FORMAT: SampleFormat = SampleFormat::Sint8;
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::Sint16;
}

impl Sample for i32 {
    const FORMAT: SampleFormat = SampleFormat::Sint32;

    fn accepts(format: SampleFormat) -> bool {
        matches!(format, SampleFormat::Sint32 | SampleFormat::Sint24)
    }
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::Float32;
}

impl Sample for f64 {
    const FORMAT: SampleFormat = SampleFormat::Float64;
}
