//! Audio callback thread
//!
//! One thread per open stream moves one period per iteration:
//!
//! ```text
//!   wait while stopped ──► read input ──► convert ──► user callback
//!          ▲                                              │
//!          └──── tick ◄── write output ◄── convert ◄──────┘
//! ```
//!
//! The whole period runs under the stream lock, which is released fairly at
//! the end so control calls from other threads get in between periods.
//! Transient xruns re-prepare the handle and are reported to the callback on
//! the next period. Anything else stops the thread and is handed back to the
//! caller through a channel.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::MutexGuard;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::callback::{CallbackBuffers, CallbackResult, StreamCallback, StreamStatus};
use crate::audio::convert::{byte_swap_buffer, convert_buffer};
use crate::audio::stream::{AudioStream, Direction, StreamState};
use crate::backend::pcm::{PcmError, PcmHandle, PcmState};
use crate::backend::sync::{SharedStream, StreamHandle, StreamSlot};
use crate::config::{StreamFlag, StreamOptions};
use crate::error::{Error, ProbeFailure, Result, StreamError};
use crate::logging;

/// Handle to a running callback thread
pub struct CallbackThread {
    thread: Option<JoinHandle<()>>,
    faults: Receiver<Error>,
}

impl CallbackThread {
    /// Spawn the callback thread for an opened stream
    ///
    /// The thread starts out waiting; [`start`] lets it run.
    pub fn spawn<H: PcmHandle + 'static>(
        shared: Arc<SharedStream<H>>,
        callback: StreamCallback,
        options: &StreamOptions,
    ) -> std::result::Result<Self, ProbeFailure> {
        let (fault_tx, faults) = bounded::<Error>(1);

        {
            let mut slot = shared.lock();
            slot.handle.alive = true;
            slot.handle.runnable = false;
        }

        let name = if options.stream_name.is_empty() {
            "audio-callback".to_string()
        } else {
            format!("audio-{}", options.stream_name)
        };
        let realtime = options.has(StreamFlag::ScheduleRealtime).then_some(options.priority);
        let thread_shared = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                if let Some(priority) = realtime {
                    set_realtime_priority(priority);
                }
                run(&thread_shared, callback, fault_tx);
            })
            .map_err(|e| {
                shared.lock().handle.alive = false;
                ProbeFailure::new(format!("unable to spawn the callback thread: {}", e))
            })?;

        Ok(Self {
            thread: Some(thread),
            faults,
        })
    }

    /// The fault that stopped the thread, if it has not been collected yet
    pub fn take_fault(&self) -> Option<Error> {
        self.faults.try_recv().ok()
    }

    /// Wait for the thread to exit
    ///
    /// The thread must already have been told to exit.
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                Error::from(StreamError::HandleMismatch(
                    "the callback thread panicked".into(),
                ))
            }),
            None => Ok(()),
        }
    }
}

fn run<H: PcmHandle>(shared: &SharedStream<H>, mut callback: StreamCallback, faults: Sender<Error>) {
    tracing::debug!("callback thread started");

    loop {
        let mut slot = shared.lock();
        while !slot.handle.runnable && slot.handle.alive {
            shared.wait(&mut slot);
        }
        if !slot.handle.alive {
            break;
        }

        // A panicking callback stops the thread like any other fault
        let period = panic::catch_unwind(AssertUnwindSafe(|| {
            process_period(&mut slot, &mut callback)
        }))
        .unwrap_or_else(|_| Err(StreamError::CallbackPanicked.into()));

        if let Err(e) = period {
            logging::log(e.severity(), &format!("callback thread stopping: {}", e));
            slot.handle.alive = false;
            slot.handle.runnable = false;
            slot.stream.state = StreamState::Stopped;
            let _ = faults.try_send(e);
            break;
        }

        MutexGuard::unlock_fair(slot);
    }

    tracing::debug!("callback thread exiting");
}

/// Move one period through the handles and the user callback
pub(crate) fn process_period<H: PcmHandle>(
    slot: &mut StreamSlot<H>,
    callback: &mut StreamCallback,
) -> Result<()> {
    let StreamSlot { stream, handle } = slot;

    let status = StreamStatus {
        output_underflow: handle.take_xrun(Direction::Output),
        input_overflow: handle.take_xrun(Direction::Input),
    };
    if status.output_underflow && status.input_overflow {
        return Err(StreamError::UnderflowOrOverflow.into());
    }

    let frames = stream.buffer_size as usize;

    if stream.mode.has(Direction::Input) {
        read_input(stream, handle, frames)?;
    }

    let result = {
        let has_output = stream.mode.has(Direction::Output);
        let has_input = stream.mode.has(Direction::Input);
        let [out, inp] = &mut stream.user_buffer;
        let mut buffers = CallbackBuffers::new(
            if has_output { Some(out.as_bytes_mut()) } else { None },
            if has_input { Some(inp.as_bytes()) } else { None },
            stream.user_format,
            frames,
            stream.user_channels[Direction::Output.index()] as usize,
            stream.user_channels[Direction::Input.index()] as usize,
            stream.user_interleaved,
            stream.stream_time,
            status,
        );
        callback(&mut buffers)
    };

    if stream.mode.has(Direction::Output) {
        write_output(stream, handle, frames)?;
    }

    stream.tick();

    match result {
        CallbackResult::Continue => Ok(()),
        CallbackResult::Stop => {
            tracing::debug!("callback requested stop");
            halt(stream, handle, true)
        }
        CallbackResult::Abort => {
            tracing::debug!("callback requested abort");
            halt(stream, handle, false)
        }
    }
}

fn missing(direction: Direction) -> Error {
    StreamError::HandleMismatch(format!("no {} handle for an open {} direction", direction, direction))
        .into()
}

/// Bytes of one device-side period for `direction`
fn device_period_bytes(stream: &AudioStream, direction: Direction, frames: usize) -> usize {
    let i = direction.index();
    frames * stream.device_channels[i] as usize * stream.device_format[i].byte_width()
}

fn read_input<H: PcmHandle>(
    stream: &mut AudioStream,
    handle: &mut StreamHandle<H>,
    frames: usize,
) -> Result<()> {
    let i = Direction::Input.index();
    let period_bytes = device_period_bytes(stream, Direction::Input, frames);
    let frame_bytes = period_bytes / frames.max(1);
    let convert = stream.do_convert_buffer[i];

    let pcm = handle.pcm[i].as_mut().ok_or_else(|| missing(Direction::Input))?;
    let data = if convert {
        &mut stream.device_buffer.as_bytes_mut()[..period_bytes]
    } else {
        &mut stream.user_buffer[i].as_bytes_mut()[..period_bytes]
    };

    let mut offset = 0;
    while offset < period_bytes {
        match pcm.read(&mut data[offset..]) {
            Ok(0) => {
                tracing::warn!("input returned no frames, dropping the rest of the period");
                handle.xrun[i] = true;
                break;
            }
            Ok(n) => offset += n * frame_bytes,
            Err(PcmError::Xrun) => {
                tracing::warn!("input overrun, re-preparing");
                handle.xrun[i] = true;
                pcm.prepare()?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if stream.do_byte_swap[i] {
        byte_swap_buffer(data, stream.device_format[i]);
    }
    if convert {
        convert_buffer(
            stream.user_buffer[i].as_bytes_mut(),
            stream.device_buffer.as_bytes(),
            &stream.convert_info[i],
            frames,
        )?;
    }

    if let Ok(delay) = pcm.delay() {
        stream.latency[i] = delay.max(0) as u64;
    }
    Ok(())
}

fn write_output<H: PcmHandle>(
    stream: &mut AudioStream,
    handle: &mut StreamHandle<H>,
    frames: usize,
) -> Result<()> {
    let i = Direction::Output.index();
    let period_bytes = device_period_bytes(stream, Direction::Output, frames);
    let frame_bytes = period_bytes / frames.max(1);
    let convert = stream.do_convert_buffer[i];

    if convert {
        convert_buffer(
            stream.device_buffer.as_bytes_mut(),
            stream.user_buffer[i].as_bytes(),
            &stream.convert_info[i],
            frames,
        )?;
    }
    let data = if convert {
        &mut stream.device_buffer.as_bytes_mut()[..period_bytes]
    } else {
        &mut stream.user_buffer[i].as_bytes_mut()[..period_bytes]
    };
    if stream.do_byte_swap[i] {
        byte_swap_buffer(data, stream.device_format[i]);
    }

    let pcm = handle.pcm[i].as_mut().ok_or_else(|| missing(Direction::Output))?;
    let mut offset = 0;
    while offset < period_bytes {
        match pcm.write(&data[offset..]) {
            Ok(0) => {
                tracing::warn!("output accepted no frames, dropping the rest of the period");
                handle.xrun[i] = true;
                break;
            }
            Ok(n) => offset += n * frame_bytes,
            Err(PcmError::Xrun) => {
                // The rest of this period is lost
                tracing::warn!("output underrun, re-preparing");
                handle.xrun[i] = true;
                pcm.prepare()?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Ok(delay) = pcm.delay() {
        stream.latency[i] = delay.max(0) as u64;
    }
    Ok(())
}

/// Prepare the handles and let the callback thread run
pub(crate) fn start<H: PcmHandle>(shared: &SharedStream<H>) -> Result<()> {
    let mut guard = shared.lock();
    let StreamSlot { stream, handle } = &mut *guard;
    if !handle.alive {
        return Err(StreamError::ThreadExited.into());
    }

    for direction in stream.directions() {
        // A linked input is prepared along with the output
        if direction == Direction::Input && handle.synchronized {
            continue;
        }
        let pcm = handle.pcm_mut(direction).ok_or_else(|| missing(direction))?;
        if pcm.state() != PcmState::Prepared {
            pcm.prepare()?;
        }
    }
    handle.xrun = [false; 2];

    stream.state = StreamState::Running;
    handle.runnable = true;
    drop(guard);
    shared.notify();

    tracing::info!("stream started");
    Ok(())
}

/// Stop the handles; the callback thread goes back to waiting
///
/// With `drain` set pending output plays out first, except on a linked pair
/// where dropping the output stops both.
pub(crate) fn halt<H: PcmHandle>(
    stream: &mut AudioStream,
    handle: &mut StreamHandle<H>,
    drain: bool,
) -> Result<()> {
    stream.state = StreamState::Stopped;
    handle.runnable = false;

    let synchronized = handle.synchronized;
    if let Some(pcm) = handle.pcm_mut(Direction::Output) {
        if drain && !synchronized {
            pcm.drain()?;
        } else {
            pcm.drop_pending()?;
        }
    }
    if !synchronized {
        if let Some(pcm) = handle.pcm_mut(Direction::Input) {
            pcm.drop_pending()?;
        }
    }

    tracing::info!("stream stopped");
    Ok(())
}

#[cfg(all(target_os = "linux", feature = "alsa"))]
fn set_realtime_priority(priority: i32) {
    // SAFETY: both calls only read a constant policy identifier
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_RR),
            libc::sched_get_priority_max(libc::SCHED_RR),
        )
    };
    let param = libc::sched_param {
        sched_priority: priority.clamp(min, max),
    };
    // SAFETY: pthread_self is always a valid thread and param outlives the call
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc == 0 {
        tracing::debug!("callback thread scheduled SCHED_RR at priority {}", param.sched_priority);
    } else {
        tracing::warn!(
            "unable to set realtime scheduling: {}",
            std::io::Error::from_raw_os_error(rc)
        );
    }
}

#[cfg(not(all(target_os = "linux", feature = "alsa")))]
fn set_realtime_priority(_priority: i32) {
    tracing::warn!("realtime scheduling is not available in this build");
}
