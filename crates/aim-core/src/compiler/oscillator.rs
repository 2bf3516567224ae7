//! `sine`, `saw` and `square`.
//!
//! Each voice owns a phase accumulator in `[0, 1)`. A sample is shaped from
//! the current phase, then the phase advances by `frequency / sample_rate`.
//! A literal frequency runs one accumulator at voice 0; a signal frequency
//! runs one per voice of that signal; a MIDI frequency runs one per voice of
//! the MIDI stream, with pitch and amplitude taken from its notes.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use crate::content::Signal;
use crate::error::CompileError;
use crate::node::{Input, Node, Waveform};
use crate::voice::{VoiceId, retain_live};

use super::midi::NoteDecoder;
use super::{AuxSource, Compiler, Source, aux, aux_block};

fn shape(waveform: Waveform, phase: f64, duty: f64) -> f32 {
    match waveform {
        Waveform::Sine => (TAU * phase).sin() as f32,
        Waveform::Saw => (phase * 2.0 - 1.0) as f32,
        Waveform::Square => {
            if phase >= duty {
                1.0
            } else {
                -1.0
            }
        }
    }
}

/// Fills one voice's block and advances its phase.
fn render(
    waveform: Waveform,
    block: &mut [f32],
    phase: &mut f64,
    step: impl Fn(usize) -> f64,
    duty: &[f32],
    amplitude: f32,
) {
    for (i, sample) in block.iter_mut().enumerate() {
        let d = duty.get(i).copied().map_or(0.5, f64::from);
        *sample = shape(waveform, *phase, d) * amplitude;
        *phase = (*phase + step(i)).rem_euclid(1.0);
    }
}

pub(super) fn oscillator(
    c: &mut Compiler<'_>,
    node: &Node,
    waveform: Waveform,
    frequency: &Input,
    phase: &Input,
    duty: &Input,
) -> Result<(), CompileError> {
    let n = c.frame_count();
    let sr = c.sample_rate();
    let initial = match c.source(phase)? {
        Source::Literal(p) => p.rem_euclid(1.0),
        Source::Unset => 0.0,
        Source::Signal(_) | Source::Midi(_) => return Err(c.unsupported(node)),
    };
    let (duty_src, duty_const) = if waveform == Waveform::Square {
        aux(c, node, duty, 0.5)?
    } else {
        (AuxSource::Constant, vec![0.5; n])
    };

    match c.source(frequency)? {
        Source::Literal(hz) => {
            let slot = c.signal_outlet(0, Signal::constant(n, 0.0));
            let step = hz / sr;
            let mut clock = initial;
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let duty = aux_block(frame.store, duty_src, VoiceId::DEFAULT, &duty_const);
                let block = out.voice_mut(VoiceId::DEFAULT, n);
                render(waveform, block, &mut clock, |_| step, duty, 1.0);
                frame.store.put_signal(slot, out);
            });
        }
        Source::Signal(freq_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            let mut clocks: BTreeMap<VoiceId, f64> = BTreeMap::new();
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let freq = frame.store.signal(freq_slot);
                retain_live(&mut out.voices, &freq.voices);
                retain_live(&mut clocks, &freq.voices);
                for (&voice, hz) in &freq.voices {
                    let clock = clocks.entry(voice).or_insert(initial);
                    let duty = aux_block(frame.store, duty_src, voice, &duty_const);
                    let step = |i: usize| hz.get(i).copied().map_or(0.0, f64::from) / sr;
                    render(waveform, out.voice_mut(voice, n), clock, step, duty, 1.0);
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Midi(midi_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            let mut voices: BTreeMap<VoiceId, (NoteDecoder, f64)> = BTreeMap::new();
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let midi = frame.store.midi(midi_slot);
                retain_live(&mut out.voices, &midi.voices);
                retain_live(&mut voices, &midi.voices);
                for (&voice, events) in &midi.voices {
                    let (decoder, clock) = voices
                        .entry(voice)
                        .or_insert_with(|| (NoteDecoder::default(), initial));
                    for &event in events {
                        decoder.feed(event);
                    }
                    let step = decoder.frequency() / sr;
                    let amplitude = decoder.amplitude();
                    let duty = aux_block(frame.store, duty_src, voice, &duty_const);
                    render(waveform, out.voice_mut(voice, n), clock, |_| step, duty, amplitude);
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Unset => return Err(c.unsupported(node)),
    }
    Ok(())
}
