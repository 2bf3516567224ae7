//! Audio callback that plays published output tables.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::backend::OutputCallback;
use crate::handoff::TableHandoff;

/// Attenuation applied to the mixed output.
pub const DEFAULT_GAIN: f32 = 0.1;

/// Flags the callback raises for the thread that owns the stream.
#[derive(Debug, Default)]
pub struct SinkStatus {
    finished: AtomicBool,
    underflow: AtomicBool,
    failed: AtomicBool,
    frames: AtomicU64,
    tables: AtomicU64,
}

impl SinkStatus {
    /// Creates a status with every flag down.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stream ran out of tables after the handoff was closed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// The stream ran out of tables while the handoff was still open.
    pub fn is_underflow(&self) -> bool {
        self.underflow.load(Ordering::Acquire)
    }

    /// The backend reported a stream error.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Records a backend stream error.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Device frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Tables the callback has played from.
    pub fn tables(&self) -> u64 {
        self.tables.load(Ordering::Relaxed)
    }

    /// True once any flag that ends the stream is raised.
    pub fn is_done(&self) -> bool {
        self.is_finished() || self.is_underflow() || self.is_failed()
    }
}

/// Fills device buffers from the latest table.
///
/// The selected sinks are summed into one mono buffer, scaled by the gain
/// and copied to every device channel. A device buffer may span several
/// tables or part of one. When no table is ready the rest of the device
/// buffer is zeroed, and either `finished` (handoff closed) or `underflow`
/// (handoff open) is raised. Once either is raised the sink only writes
/// silence. Mixed tables are retired to the handoff, never dropped here.
pub struct AudioSink {
    handoff: Arc<TableHandoff>,
    status: Arc<SinkStatus>,
    outputs: Vec<String>,
    gain: f32,
    channels: usize,
    mix: Vec<f32>,
    cursor: usize,
}

impl std::fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSink")
            .field("outputs", &self.outputs)
            .field("gain", &self.gain)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl AudioSink {
    /// Creates a sink for tables of `frame_count` frames.
    ///
    /// An empty `outputs` list plays every sink.
    pub fn new(
        handoff: Arc<TableHandoff>,
        status: Arc<SinkStatus>,
        outputs: Vec<String>,
        gain: f32,
        channels: u16,
        frame_count: usize,
    ) -> Self {
        let mix = vec![0.0; frame_count];
        Self {
            handoff,
            status,
            outputs,
            gain,
            channels: usize::from(channels.max(1)),
            cursor: mix.len(),
            mix,
        }
    }

    /// Fills one interleaved device buffer.
    pub fn fill(&mut self, out: &mut [f32]) {
        let mut frames = out.chunks_mut(self.channels);
        for frame in frames.by_ref() {
            if self.cursor == self.mix.len() && !self.next_table() {
                frame.fill(0.0);
                break;
            }
            frame.fill(self.mix[self.cursor] * self.gain);
            self.cursor += 1;
            self.status.frames.fetch_add(1, Ordering::Relaxed);
        }
        for frame in frames {
            frame.fill(0.0);
        }
    }

    fn next_table(&mut self) -> bool {
        if self.status.is_done() {
            return false;
        }
        match self.handoff.take() {
            Some(table) => {
                table.mixdown_into(&self.outputs, &mut self.mix);
                self.handoff.retire(table);
                self.cursor = 0;
                self.status.tables.fetch_add(1, Ordering::Relaxed);
                !self.mix.is_empty()
            }
            None if self.handoff.is_closed() => {
                self.status.finished.store(true, Ordering::Release);
                false
            }
            None => {
                self.status.underflow.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Boxes the sink as a backend output callback.
    pub fn into_callback(mut self) -> OutputCallback {
        Box::new(move |out: &mut [f32]| self.fill(out))
    }
}
