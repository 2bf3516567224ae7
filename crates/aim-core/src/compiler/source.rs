//! Generators: `noise`, `random`, `audiofile`.

use std::sync::Arc;

use crate::content::Signal;
use crate::error::CompileError;
use crate::node::{AudioClip, Input, Node};
use crate::voice::{VoiceId, retain_live};

use super::{Compiler, Source};

/// White noise in `[-1, 1)`, one independent stream per voice of `voices`.
pub(super) fn noise(c: &mut Compiler<'_>, voices: &Input) -> Result<(), CompileError> {
    let n = c.frame_count();
    let mut rng = c.rng();
    let source = c.source(voices)?;
    let slot = c.signal_outlet(0, Signal::new());

    let fill = move |rng: &mut fastrand::Rng, block: &mut [f32]| {
        for s in block {
            *s = rng.f32() * 2.0 - 1.0;
        }
    };

    match source {
        Source::Unset | Source::Literal(_) => {
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                fill(&mut rng, out.voice_mut(VoiceId::DEFAULT, n));
                frame.store.put_signal(slot, out);
            });
        }
        Source::Signal(in_slot) => {
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let live = &frame.store.signal(in_slot).voices;
                retain_live(&mut out.voices, live);
                for &voice in live.keys() {
                    fill(&mut rng, out.voice_mut(voice, n));
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Midi(in_slot) => {
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let live = &frame.store.midi(in_slot).voices;
                retain_live(&mut out.voices, live);
                for &voice in live.keys() {
                    fill(&mut rng, out.voice_mut(voice, n));
                }
                frame.store.put_signal(slot, out);
            });
        }
    }
    Ok(())
}

/// One value in `[0, 1)` per voice, drawn when the voice first appears and
/// held for its lifetime.
pub(super) fn random(c: &mut Compiler<'_>, input: &Input) -> Result<(), CompileError> {
    let n = c.frame_count();
    let mut rng = c.rng();
    match c.source(input)? {
        Source::Unset | Source::Literal(_) => {
            c.signal_outlet(0, Signal::constant(n, rng.f32()));
        }
        Source::Signal(in_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let live = &frame.store.signal(in_slot).voices;
                retain_live(&mut out.voices, live);
                for &voice in live.keys() {
                    out.voices.entry(voice).or_insert_with(|| vec![rng.f32(); n]);
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Midi(in_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let live = &frame.store.midi(in_slot).voices;
                retain_live(&mut out.voices, live);
                for &voice in live.keys() {
                    out.voices.entry(voice).or_insert_with(|| vec![rng.f32(); n]);
                }
                frame.store.put_signal(slot, out);
            });
        }
    }
    Ok(())
}

/// Plays a clip once, one voice per channel.
///
/// Voices are allocated at setup in channel order. Playback steps through the
/// clip at `speed * clip_rate / sample_rate` frames per output frame with
/// linear interpolation; the buffer that runs past the end is zero-padded and
/// every voice is gone from the next one.
pub(super) fn audiofile(
    c: &mut Compiler<'_>,
    node: &Node,
    speed: &Input,
    clip: &Option<Arc<AudioClip>>,
) -> Result<(), CompileError> {
    let (Some(clip), Source::Literal(speed)) = (clip.clone(), c.source(speed)?) else {
        return Err(c.unsupported(node));
    };
    let n = c.frame_count();
    let step = speed * f64::from(clip.sample_rate) / c.sample_rate();
    let frames = clip.frames();
    let slot = c.signal_outlet(0, Signal::new());
    tracing::debug!(node = %node.id(), channels = clip.channels.len(), frames, step, "audio clip loaded");

    let channels = clip.channels.len();
    c.on_setup(move |frame| {
        let mut out = frame.store.take_signal(slot);
        for _ in 0..channels {
            out.voices.insert(frame.voices.allocate(), vec![0.0; n]);
        }
        frame.store.put_signal(slot, out);
    });

    let mut position = 0.0f64;
    c.on_process(move |frame| {
        let mut out = frame.store.take_signal(slot);
        if position >= frames as f64 || step <= 0.0 {
            out.voices.clear();
        }
        for (block, channel) in out.voices.values_mut().zip(&clip.channels) {
            for (i, s) in block.iter_mut().enumerate() {
                *s = interpolate(channel, position + i as f64 * step);
            }
        }
        position += n as f64 * step;
        frame.store.put_signal(slot, out);
    });
    Ok(())
}

fn interpolate(channel: &[f32], at: f64) -> f32 {
    let index = at.floor();
    let frac = (at - index) as f32;
    let index = index as usize;
    let a = channel.get(index).copied().unwrap_or(0.0);
    let b = channel.get(index + 1).copied().unwrap_or(0.0);
    a + (b - a) * frac
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::interpolate;
    use crate::compiler::CompileEnv;
    use crate::compiler::testing::{program, run};
    use crate::node::AudioClip;
    use crate::patch::Patch;

    #[test]
    fn interpolation_pads_with_silence() {
        let ch = [0.0, 1.0];
        assert_eq!(interpolate(&ch, 0.5), 0.5);
        assert_eq!(interpolate(&ch, 1.0), 1.0);
        assert_eq!(interpolate(&ch, 1.5), 0.5);
        assert_eq!(interpolate(&ch, 3.0), 0.0);
    }

    #[test]
    fn noise_stays_in_range() {
        let patch = Patch::new();
        patch.out_named(patch.noise(crate::patch::Value::Unset), "n");
        let env = CompileEnv::new(48000, 256).with_seed(1);
        let (table, _) = run(&mut program(patch, &env));
        let block = table.signal("n").unwrap().voice(crate::VoiceId::DEFAULT).unwrap();
        assert!(block.iter().all(|s| (-1.0..1.0).contains(s)));
    }

    #[test]
    fn random_is_held_across_buffers() {
        let patch = Patch::new();
        patch.out_named(patch.random(patch.sine(3.0)), "r");
        let mut p = program(patch, &CompileEnv::new(48000, 4).with_seed(3));
        let (a, _) = run(&mut p);
        let (b, _) = run(&mut p);
        assert_eq!(a.signal("r"), b.signal("r"));
    }

    #[test]
    fn audiofile_voices_are_channels_and_die_at_end() {
        let clip = AudioClip::from_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3], 2, 48000);
        let patch = Patch::new();
        patch.out_named(patch.audiofile(Some(Arc::new(clip))), "f");
        let mut p = program(patch, &CompileEnv::new(48000, 2));

        let (first, _) = run(&mut p);
        let s = first.signal("f").unwrap();
        assert_eq!(s.len(), 2);
        let blocks: Vec<&Vec<f32>> = s.voices.values().collect();
        assert_eq!(blocks[0], &vec![0.1, 0.2]);
        assert_eq!(blocks[1], &vec![-0.1, -0.2]);

        let (second, _) = run(&mut p);
        let blocks: Vec<&Vec<f32>> = second.signal("f").unwrap().voices.values().collect();
        assert_eq!(blocks[0], &vec![0.3, 0.0]);

        let (third, _) = run(&mut p);
        assert!(third.signal("f").unwrap().is_empty());
    }
}
