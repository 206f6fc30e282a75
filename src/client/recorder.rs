//! # Recording Controller
//!
//! Captures one bounded recording per start/stop cycle.
//!
//! The controller owns the capture device for exactly the lifetime of one recording.
//! `stop()`, `cancel()` and dropping the controller all release it. `start()` while
//! recording and `stop()` while idle are no-ops.

use crate::audio::buffer::ChunkBuffer;
use crate::audio::processor::{encode_wav, PcmSpec};
use crate::error::{ClientError, ClientResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A capture device held open for one recording. Releasing it stops capture.
pub trait CaptureDevice {
    fn release(self: Box<Self>);
}

/// An open capture stream.
pub struct Capture {
    /// Chunks in capture order.
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Set when chunks are raw 16-bit PCM that needs a WAV header.
    pub pcm: Option<PcmSpec>,
    pub device: Box<dyn CaptureDevice>,
}

/// Source of recordings. `open` fails with `PermissionDenied` when the device
/// cannot be acquired.
pub trait Microphone {
    fn open(&mut self) -> ClientResult<Capture>;
}

impl Microphone for Box<dyn Microphone> {
    fn open(&mut self) -> ClientResult<Capture> {
        (**self).open()
    }
}

struct ActiveRecording {
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pcm: Option<PcmSpec>,
    device: Box<dyn CaptureDevice>,
}

pub struct RecordingController<M: Microphone> {
    microphone: M,
    buffer: ChunkBuffer,
    active: Option<ActiveRecording>,
    overflow_warned: bool,
}

impl<M: Microphone> RecordingController<M> {
    pub fn new(microphone: M, max_bytes: usize) -> Self {
        Self {
            microphone,
            buffer: ChunkBuffer::new(max_bytes),
            active: None,
            overflow_warned: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Begin capturing. Returns `Ok(false)` if a recording is already running.
    pub fn start(&mut self) -> ClientResult<bool> {
        if self.active.is_some() {
            debug!("start() while recording ignored");
            return Ok(false);
        }

        let capture = self.microphone.open()?;
        self.buffer.clear();
        self.overflow_warned = false;
        self.active = Some(ActiveRecording {
            chunks: capture.chunks,
            pcm: capture.pcm,
            device: capture.device,
        });
        info!("Recording started");
        Ok(true)
    }

    /// Move every chunk that has arrived so far into the buffer.
    pub fn pump(&mut self) -> usize {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };

        let mut moved = 0;
        while let Ok(chunk) = active.chunks.try_recv() {
            moved += 1;
            if !self.buffer.push(chunk) && !self.overflow_warned {
                warn!(
                    limit = self.buffer.len(),
                    "Recording reached its size limit; further audio is dropped"
                );
                self.overflow_warned = true;
            }
        }
        moved
    }

    /// Stop capturing and return the finished audio unit.
    ///
    /// Returns `Ok(None)` when nothing was being recorded. The device is released
    /// before the unit is assembled, so it is released even if assembly fails.
    pub fn stop(&mut self) -> ClientResult<Option<Vec<u8>>> {
        if self.active.is_none() {
            debug!("stop() while idle ignored");
            return Ok(None);
        }

        // Collect what is already queued, release, then collect the tail.
        self.pump();
        let Some(ActiveRecording {
            mut chunks,
            pcm,
            device,
        }) = self.active.take()
        else {
            return Ok(None);
        };
        device.release();
        while let Ok(chunk) = chunks.try_recv() {
            self.buffer.push(chunk);
        }

        let dropped = self.buffer.dropped_bytes();
        let raw = self.buffer.take();
        if dropped > 0 {
            warn!(dropped_bytes = dropped, "Recording was truncated");
        }

        let unit = match pcm {
            Some(spec) if !raw.is_empty() => encode_wav(&raw, spec)
                .map_err(|e| ClientError::Recording(format!("WAV encoding failed: {}", e)))?,
            _ => raw,
        };

        info!(bytes = unit.len(), "Recording stopped");
        Ok(Some(unit))
    }

    /// Abandon the current recording, discarding anything captured.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                active.device.release();
                self.buffer.clear();
                info!("Recording cancelled");
                true
            }
            None => false,
        }
    }
}

impl<M: Microphone> Drop for RecordingController<M> {
    fn drop(&mut self) {
        self.cancel();
    }
}
