//! `oscilloscope`: edge-triggered trace capture.
//!
//! Each voice runs the same cycle. After an optional hold-off, the capture
//! waits for a sample below `trigger_low`, then for a sample at or above
//! `trigger`. From that sample on, `time_div` seconds of input are collected.
//! A full trace is sent as a payload and the voice holds off until the next
//! display frame is due. A voice that disappears sends an empty trace so the
//! listener can drop it.
//!
//! The input passes through unchanged as the node's output.

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::CompileError;
use crate::node::{Input, Node};
use crate::telemetry::Message;
use crate::voice::VoiceId;

use super::{Compiler, Source};

/// Display refresh rate the hold-off is derived from.
const FRAMES_PER_SECOND: f64 = 30.0;

#[derive(Debug)]
struct Capture {
    /// Stream sample index before which nothing is searched.
    resume_at: u64,
    armed: bool,
    trace: Option<Vec<f32>>,
}

impl Capture {
    fn new(resume_at: u64) -> Self {
        Self {
            resume_at,
            armed: false,
            trace: None,
        }
    }
}

struct Window {
    length: usize,
    holdoff: u64,
    trigger: f32,
    trigger_low: f32,
}

impl Window {
    /// Feeds one sample; returns a finished trace.
    fn step(&self, capture: &mut Capture, at: u64, x: f32) -> Option<Vec<f32>> {
        if at < capture.resume_at {
            return None;
        }
        if let Some(trace) = capture.trace.as_mut() {
            trace.push(x);
            if trace.len() < self.length {
                return None;
            }
            capture.armed = false;
            capture.resume_at = at + 1 + self.holdoff;
            return capture.trace.take();
        }
        if !capture.armed {
            capture.armed = x < self.trigger_low;
        } else if x >= self.trigger {
            let mut trace = Vec::with_capacity(self.length);
            trace.push(x);
            if self.length <= 1 {
                capture.armed = false;
                capture.resume_at = at + 1 + self.holdoff;
                return Some(trace);
            }
            capture.trace = Some(trace);
        }
        None
    }
}

fn literal(c: &Compiler<'_>, node: &Node, input: &Input) -> Result<Option<f64>, CompileError> {
    match c.source(input)? {
        Source::Literal(v) => Ok(Some(v)),
        Source::Unset => Ok(None),
        Source::Signal(_) | Source::Midi(_) => Err(c.unsupported(node)),
    }
}

pub(super) fn oscilloscope(
    c: &mut Compiler<'_>,
    node: &Node,
    value: &Input,
    time_div: &Input,
    trigger: &Input,
    trigger_low: &Input,
) -> Result<(), CompileError> {
    let Source::Signal(in_slot) = c.source(value)? else {
        return Err(c.unsupported(node));
    };
    let sr = c.sample_rate();
    let time_div = literal(c, node, time_div)?.unwrap_or(0.01).clamp(1e-4, 1.0);
    let trigger = literal(c, node, trigger)?.unwrap_or(0.1);
    let trigger_low = literal(c, node, trigger_low)?.unwrap_or(trigger);

    let length = ((sr * time_div) as usize).max(1);
    let window = Window {
        length,
        holdoff: (sr / FRAMES_PER_SECOND - length as f64).round().max(0.0) as u64,
        trigger: trigger as f32,
        trigger_low: trigger_low as f32,
    };
    c.alias_outlet(0, Source::Signal(in_slot));

    let id = node.id();
    let name = node.type_name();
    let n = c.frame_count() as u64;
    let mut captures: BTreeMap<VoiceId, Capture> = BTreeMap::new();
    let mut clock: u64 = 0;

    c.on_process(move |frame| {
        let input = frame.store.signal(in_slot);

        let dead: Vec<VoiceId> = captures
            .keys()
            .filter(|v| !input.voices.contains_key(*v))
            .copied()
            .collect();
        for voice in dead {
            captures.remove(&voice);
            frame.telemetry.send(Message::payload(
                id,
                name,
                json!({"voice_id": voice.0, "samples": []}),
            ));
        }

        for (&voice, samples) in &input.voices {
            let capture = captures.entry(voice).or_insert_with(|| Capture::new(clock));
            for (i, &x) in samples.iter().enumerate() {
                if let Some(trace) = window.step(capture, clock + i as u64, x) {
                    frame.telemetry.send(Message::payload(
                        id,
                        name,
                        json!({"voice_id": voice.0, "samples": trace}),
                    ));
                }
            }
        }
        clock += n;
    });
    Ok(())
}
