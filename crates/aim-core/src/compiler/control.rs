//! Control-rate helpers: `trigger`, `time`, `frequency`, `one`.

use std::collections::BTreeMap;

use crate::content::Signal;
use crate::error::CompileError;
use crate::node::{Input, Node};
use crate::voice::{VoiceId, retain_live};

use super::math::elementwise;
use super::midi::{MessageParser, Note, NoteDecoder, note_to_hz};
use super::{Compiler, Source, aux, aux_block};

/// Hysteresis gate, evaluated per sample.
///
/// A sample at or above `on` latches the voice high; a sample below `off`
/// latches it low; anything between keeps the previous state.
pub(super) fn trigger(
    c: &mut Compiler<'_>,
    node: &Node,
    value: &Input,
    on: &Input,
    off: &Input,
) -> Result<(), CompileError> {
    let Source::Signal(in_slot) = c.source(value)? else {
        return Err(c.unsupported(node));
    };
    let (on_src, on_const) = aux(c, node, on, 0.5)?;
    let (off_src, off_const) = aux(c, node, off, 0.5)?;
    let n = c.frame_count();
    let slot = c.signal_outlet(0, Signal::new());
    let mut latched: BTreeMap<VoiceId, bool> = BTreeMap::new();

    c.on_process(move |frame| {
        let mut out = frame.store.take_signal(slot);
        let input = frame.store.signal(in_slot);
        retain_live(&mut out.voices, &input.voices);
        retain_live(&mut latched, &input.voices);
        for (&voice, samples) in &input.voices {
            let on = aux_block(frame.store, on_src, voice, &on_const);
            let off = aux_block(frame.store, off_src, voice, &off_const);
            let state = latched.entry(voice).or_insert(false);
            let block = out.voice_mut(voice, n);
            for (i, (o, &x)) in block.iter_mut().zip(samples).enumerate() {
                if x >= on[i] {
                    *state = true;
                } else if x < off[i] {
                    *state = false;
                }
                *o = if *state { 1.0 } else { 0.0 };
            }
        }
        frame.store.put_signal(slot, out);
    });
    Ok(())
}

/// Seconds since each voice started, scaled by `speed`.
///
/// A literal `voice_trigger` runs one clock at voice 0 from the start of the
/// stream. A signal restarts a voice's clock at every sample where it rises
/// above 0. A MIDI stream restarts it at every note-on.
pub(super) fn time(
    c: &mut Compiler<'_>,
    node: &Node,
    voice_trigger: &Input,
    speed: &Input,
) -> Result<(), CompileError> {
    let (speed_src, speed_const) = aux(c, node, speed, 1.0)?;
    let n = c.frame_count();
    let dt = 1.0 / c.sample_rate();
    let trigger = c.source(voice_trigger)?;
    let slot = c.signal_outlet(0, Signal::new());

    match trigger {
        Source::Literal(_) | Source::Unset => {
            let mut clock = 0.0f64;
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let speed = aux_block(frame.store, speed_src, VoiceId::DEFAULT, &speed_const);
                for (o, &s) in out.voice_mut(VoiceId::DEFAULT, n).iter_mut().zip(speed) {
                    *o = clock as f32;
                    clock += f64::from(s) * dt;
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Signal(in_slot) => {
            // (clock, previous sample)
            let mut clocks: BTreeMap<VoiceId, (f64, f32)> = BTreeMap::new();
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let input = frame.store.signal(in_slot);
                retain_live(&mut out.voices, &input.voices);
                retain_live(&mut clocks, &input.voices);
                for (&voice, samples) in &input.voices {
                    let speed = aux_block(frame.store, speed_src, voice, &speed_const);
                    let (clock, prev) = clocks.entry(voice).or_insert((0.0, 0.0));
                    let block = out.voice_mut(voice, n);
                    for (i, (o, &x)) in block.iter_mut().zip(samples).enumerate() {
                        if *prev <= 0.0 && x > 0.0 {
                            *clock = 0.0;
                        }
                        *prev = x;
                        *o = *clock as f32;
                        *clock += f64::from(speed[i]) * dt;
                    }
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Midi(in_slot) => {
            let mut clocks: BTreeMap<VoiceId, (f64, MessageParser)> = BTreeMap::new();
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let midi = frame.store.midi(in_slot);
                retain_live(&mut out.voices, &midi.voices);
                retain_live(&mut clocks, &midi.voices);
                for (&voice, events) in &midi.voices {
                    let speed = aux_block(frame.store, speed_src, voice, &speed_const);
                    let (clock, parser) = clocks
                        .entry(voice)
                        .or_insert_with(|| (0.0, MessageParser::default()));
                    let mut resets: Vec<usize> = events
                        .iter()
                        .filter_map(|&e| {
                            let message = parser.feed(e)?;
                            matches!(Note::classify(&message), Note::On { .. })
                                .then_some(e.frame as usize)
                        })
                        .collect();
                    resets.reverse();
                    let block = out.voice_mut(voice, n);
                    for (i, o) in block.iter_mut().enumerate() {
                        while resets.last().is_some_and(|&at| at <= i) {
                            resets.pop();
                            *clock = 0.0;
                        }
                        *o = *clock as f32;
                        *clock += f64::from(speed[i]) * dt;
                    }
                }
                frame.store.put_signal(slot, out);
            });
        }
    }
    Ok(())
}

/// Note numbers to Hz. A MIDI input holds the frequency of each voice's
/// latest note-on for the whole buffer.
pub(super) fn frequency(c: &mut Compiler<'_>, node: &Node, input: &Input) -> Result<(), CompileError> {
    let Source::Midi(in_slot) = c.source(input)? else {
        return elementwise(c, node, [input], |[key]| note_to_hz(key));
    };
    let n = c.frame_count();
    let slot = c.signal_outlet(0, Signal::new());
    let mut decoders: BTreeMap<VoiceId, NoteDecoder> = BTreeMap::new();
    c.on_process(move |frame| {
        let mut out = frame.store.take_signal(slot);
        let midi = frame.store.midi(in_slot);
        retain_live(&mut out.voices, &midi.voices);
        retain_live(&mut decoders, &midi.voices);
        for (&voice, events) in &midi.voices {
            let decoder = decoders.entry(voice).or_default();
            for &event in events {
                decoder.feed(event);
            }
            out.voice_mut(voice, n).fill(decoder.frequency() as f32);
        }
        frame.store.put_signal(slot, out);
    });
    Ok(())
}

/// Ones for every voice of the input; a scalar 1 without one.
pub(super) fn one(c: &mut Compiler<'_>, input: &Input) -> Result<(), CompileError> {
    let n = c.frame_count();
    match c.source(input)? {
        Source::Unset | Source::Literal(_) => {
            c.signal_outlet(0, Signal::constant(n, 1.0));
        }
        Source::Signal(in_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let input = frame.store.signal(in_slot);
                retain_live(&mut out.voices, &input.voices);
                for &voice in input.voices.keys() {
                    out.voices.entry(voice).or_insert_with(|| vec![1.0; n]);
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Midi(in_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let input = frame.store.midi(in_slot);
                retain_live(&mut out.voices, &input.voices);
                for &voice in input.voices.keys() {
                    out.voices.entry(voice).or_insert_with(|| vec![1.0; n]);
                }
                frame.store.put_signal(slot, out);
            });
        }
    }
    Ok(())
}
