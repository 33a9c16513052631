//! Raw sample storage for user and device buffers
//!
//! Buffers hold samples of any [`SampleFormat`](crate::format::SampleFormat)
//! as bytes. Storage is 8-byte aligned so the same bytes can be viewed as a
//! typed slice of any [`Sample`] type without copying.

use crate::format::Sample;

/// Aligned byte buffer holding one period of samples
#[derive(Clone, Default)]
pub struct SampleBuffer {
    /// Backing storage, u64 for alignment
    words: Vec<u64>,
    /// Length in bytes
    len: usize,
}

impl SampleBuffer {
    /// Create a zeroed buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// View the contents as samples of type `T`
    ///
    /// Returns `None` if the byte length is not a whole number of samples.
    pub fn as_slice<T: Sample>(&self) -> Option<&[T]> {
        bytemuck::try_cast_slice(self.as_bytes()).ok()
    }

    /// Mutable view of the contents as samples of type `T`
    pub fn as_slice_mut<T: Sample>(&mut self) -> Option<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.as_bytes_mut()).ok()
    }

    /// Grow to at least `len` bytes
    ///
    /// Existing contents are discarded when the buffer grows; a buffer that is
    /// already large enough keeps its length.
    pub fn ensure_len(&mut self, len: usize) {
        if len > self.len {
            *self = Self::new(len);
        }
    }

    /// Zero every byte
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Release the storage
    pub fn release(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer").field("len", &self.len).finish()
    }
}
