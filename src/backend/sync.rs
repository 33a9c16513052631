//! Stream lock shared between the caller and the callback thread
//!
//! The stream record and the native handles live under one mutex. The
//! callback thread holds it for a whole period and waits on the condition
//! variable while the stream is stopped.

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::audio::stream::{AudioStream, Direction};

/// Native handles and thread control flags
#[derive(Debug)]
pub struct StreamHandle<H> {
    /// Per-direction handles, indexed by [`Direction::index`]
    pub pcm: [Option<H>; 2],
    /// Input is linked to output and starts/stops with it
    pub synchronized: bool,
    /// The callback thread may process periods
    pub runnable: bool,
    /// The callback thread keeps running; cleared to make it exit
    pub alive: bool,
    /// Xrun seen since the last period boundary
    pub xrun: [bool; 2],
}

impl<H> Default for StreamHandle<H> {
    fn default() -> Self {
        Self {
            pcm: [None, None],
            synchronized: false,
            runnable: false,
            alive: false,
            xrun: [false; 2],
        }
    }
}

impl<H> StreamHandle<H> {
    pub fn pcm_mut(&mut self, direction: Direction) -> Option<&mut H> {
        self.pcm[direction.index()].as_mut()
    }

    /// Read and clear the xrun flag of `direction`
    pub fn take_xrun(&mut self, direction: Direction) -> bool {
        std::mem::take(&mut self.xrun[direction.index()])
    }

    /// Close both handles and clear every flag
    pub fn release(&mut self) {
        *self = Self::default();
    }
}

/// Everything guarded by the stream lock
#[derive(Debug)]
pub struct StreamSlot<H> {
    pub stream: AudioStream,
    pub handle: StreamHandle<H>,
}

/// The stream lock and the condition the callback thread waits on
pub struct SharedStream<H> {
    slot: Mutex<StreamSlot<H>>,
    wake: Condvar,
}

impl<H> SharedStream<H> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(StreamSlot {
                stream: AudioStream::default(),
                handle: StreamHandle::default(),
            }),
            wake: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StreamSlot<H>> {
        self.slot.lock()
    }

    /// Block until notified, releasing the lock meanwhile
    pub fn wait(&self, guard: &mut MutexGuard<'_, StreamSlot<H>>) {
        self.wake.wait(guard);
    }

    /// Wake the callback thread
    pub fn notify(&self) {
        self.wake.notify_one();
    }
}

impl<H> Default for SharedStream<H> {
    fn default() -> Self {
        Self::new()
    }
}
