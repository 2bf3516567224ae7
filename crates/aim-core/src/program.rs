//! Compiled program and its per-buffer output table.

use std::collections::BTreeMap;

use crate::compiler::{Frame, ProcessOp, SetupOp};
use crate::content::{Content, Signal, Store};
use crate::telemetry::{Message, Telemetry};
use crate::voice::VoiceAllocator;

/// Named outputs of one buffer, keyed by sink name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTable {
    entries: BTreeMap<String, Content>,
}

impl OutputTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content published under `name`.
    pub fn insert(&mut self, name: String, content: Content) {
        self.entries.insert(name, content);
    }

    /// Content published under `name`.
    pub fn get(&self, name: &str) -> Option<&Content> {
        self.entries.get(name)
    }

    /// Signal published under `name`, if that sink carries one.
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.get(name).and_then(Content::as_signal)
    }

    /// Sink names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every entry in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Content)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was published.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sums every signal voice of the selected sinks into one mono buffer.
    ///
    /// An empty selection means every sink. MIDI sinks and unknown names
    /// contribute nothing.
    pub fn mixdown(&self, selected: &[String], frame_count: usize) -> Vec<f32> {
        let mut out = vec![0.0; frame_count];
        self.mixdown_into(selected, &mut out);
        out
    }

    /// [`mixdown`](Self::mixdown) into an existing buffer, without allocating.
    ///
    /// `out` is cleared first and its length is the frame count.
    pub fn mixdown_into(&self, selected: &[String], out: &mut [f32]) {
        out.fill(0.0);
        let chosen = self
            .entries
            .iter()
            .filter(|(name, _)| selected.is_empty() || selected.contains(*name));
        for (_, content) in chosen {
            if let Content::Signal(signal) = content {
                for block in signal.voices.values() {
                    for (o, s) in out.iter_mut().zip(block) {
                        *o += *s;
                    }
                }
            }
        }
    }
}

/// A compiled network, ready to produce buffers.
///
/// Owns every piece of state the node rules set up: outlet contents, phase
/// accumulators, decoder state, capture windows and the voice allocator.
pub struct Program {
    setup: Vec<SetupOp>,
    process: Vec<ProcessOp>,
    store: Store,
    voices: VoiceAllocator,
    frame_count: usize,
    sample_rate: u32,
    buffers: u64,
    sinks: Vec<String>,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("process_ops", &self.process.len())
            .field("frame_count", &self.frame_count)
            .field("sample_rate", &self.sample_rate)
            .field("buffers", &self.buffers)
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}

impl Program {
    pub(crate) fn new(
        setup: Vec<SetupOp>,
        process: Vec<ProcessOp>,
        store: Store,
        frame_count: usize,
        sample_rate: u32,
        sinks: Vec<String>,
    ) -> Self {
        Self {
            setup,
            process,
            store,
            voices: VoiceAllocator::new(),
            frame_count,
            sample_rate,
            buffers: 0,
            sinks,
        }
    }

    /// Produces the next buffer.
    ///
    /// Setup runs before the first buffer only. Messages the nodes emit go to
    /// `telemetry` in node order, followed by one heartbeat.
    pub fn process(&mut self, telemetry: &mut dyn Telemetry) -> OutputTable {
        let mut outputs = OutputTable::new();
        let time = self.buffers as f64 * self.frame_count as f64 / f64::from(self.sample_rate);
        let mut frame = Frame {
            store: &mut self.store,
            voices: &mut self.voices,
            telemetry: &mut *telemetry,
            outputs: &mut outputs,
            time,
        };
        for op in std::mem::take(&mut self.setup) {
            op(&mut frame);
        }
        for op in &mut self.process {
            op(&mut frame);
        }
        self.buffers += 1;
        telemetry.send(Message::HEARTBEAT);
        outputs
    }

    /// Frames per buffer.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Frames per second.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Names of the `out` sinks, in execution order.
    pub fn sink_names(&self) -> &[String] {
        &self.sinks
    }

    /// Buffers produced so far.
    pub fn buffers_processed(&self) -> u64 {
        self.buffers
    }

    /// Voice ids handed out so far.
    pub fn voices_allocated(&self) -> u64 {
        self.voices.allocated()
    }
}
