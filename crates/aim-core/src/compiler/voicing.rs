//! Voice creators: `spawn` and `unison`.

use std::collections::BTreeMap;

use crate::content::{Midi, Signal};
use crate::error::CompileError;
use crate::node::{Input, Node};
use crate::voice::{VoiceAllocator, VoiceId};

use super::{Compiler, Source};

/// Spawns a voice each time voice 0 of the input rises above 0.
///
/// The voice carries the input samples and is held while the input stays
/// above 0. A new rise retires the held voice. A voice whose input falls
/// during a buffer is still present in that buffer and gone from the next.
pub(super) fn spawn(c: &mut Compiler<'_>, node: &Node, input: &Input) -> Result<(), CompileError> {
    let Source::Signal(in_slot) = c.source(input)? else {
        return Err(c.unsupported(node));
    };
    let n = c.frame_count();
    let slot = c.signal_outlet(0, Signal::new());
    let mut held: Option<VoiceId> = None;
    let mut previous = 0.0f32;

    c.on_process(move |frame| {
        let mut out = frame.store.take_signal(slot);
        let gate = frame.store.signal(in_slot).voice(VoiceId::DEFAULT);
        let mut shown = held;
        for &x in gate.unwrap_or(&[]) {
            if previous <= 0.0 && x > 0.0 {
                let voice = frame.voices.allocate();
                held = Some(voice);
                shown = Some(voice);
            }
            previous = x;
        }
        if gate.is_none() {
            previous = 0.0;
        }
        if previous <= 0.0 {
            held = None;
        }

        out.voices.clear();
        if let Some(voice) = shown {
            let block = gate.map_or_else(|| vec![0.0; n], <[f32]>::to_vec);
            out.voices.insert(voice, block);
        }
        frame.store.put_signal(slot, out);
    });
    Ok(())
}

/// `per_voice` fresh copies of every source voice, capped at `max_voices`
/// copies alive in total. Hitting the cap retires the oldest copies.
#[derive(Debug)]
struct Copies {
    per_voice: usize,
    max_voices: usize,
    map: BTreeMap<VoiceId, Vec<VoiceId>>,
}

impl Copies {
    fn new(per_voice: usize, max_voices: usize) -> Self {
        Self {
            per_voice,
            max_voices,
            map: BTreeMap::new(),
        }
    }

    /// Retires copies of departed source voices, allocates copies for new
    /// ones, then retires the oldest copies past the cap.
    fn follow<T>(&mut self, live: &BTreeMap<VoiceId, T>, voices: &mut VoiceAllocator) {
        self.map.retain(|source, _| live.contains_key(source));
        let fresh = self.per_voice.min(self.max_voices);
        for &source in live.keys() {
            self.map
                .entry(source)
                .or_insert_with(|| (0..fresh).map(|_| voices.allocate()).collect());
        }

        let total: usize = self.map.values().map(Vec::len).sum();
        let excess = total.saturating_sub(self.max_voices);
        if excess == 0 {
            return;
        }
        // Ids are allocated in increasing order, so the smallest are oldest.
        let mut ids: Vec<VoiceId> = self.map.values().flatten().copied().collect();
        ids.sort_unstable();
        let Some(&newest_retired) = ids.get(excess - 1) else {
            return;
        };
        for copies in self.map.values_mut() {
            copies.retain(|&id| id > newest_retired);
        }
    }
}

/// Replicates voices.
///
/// A literal input creates `voices` copies of the literal at setup. A signal
/// or MIDI input gets `voices` copies of each source voice, created and
/// retired with it; the output takes the input's type.
pub(super) fn unison(
    c: &mut Compiler<'_>,
    node: &Node,
    input: &Input,
    voices: usize,
    max_voices: usize,
) -> Result<(), CompileError> {
    let n = c.frame_count();
    let mut copies = Copies::new(voices, max_voices);

    match c.source(input)? {
        Source::Literal(v) => {
            let slot = c.signal_outlet(0, Signal::new());
            let count = voices.min(max_voices);
            c.on_setup(move |frame| {
                let mut out = frame.store.take_signal(slot);
                for _ in 0..count {
                    out.voices.insert(frame.voices.allocate(), vec![v as f32; n]);
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Signal(in_slot) => {
            let slot = c.signal_outlet(0, Signal::new());
            c.on_process(move |frame| {
                let mut out = frame.store.take_signal(slot);
                let input = frame.store.signal(in_slot);
                copies.follow(&input.voices, frame.voices);
                out.voices.clear();
                for (source, ids) in &copies.map {
                    let Some(block) = input.voices.get(source) else {
                        continue;
                    };
                    for &id in ids {
                        out.voices.insert(id, block.clone());
                    }
                }
                frame.store.put_signal(slot, out);
            });
        }
        Source::Midi(in_slot) => {
            let slot = c.midi_outlet(0, Midi::new());
            c.on_process(move |frame| {
                let mut out = frame.store.take_midi(slot);
                let input = frame.store.midi(in_slot);
                copies.follow(&input.voices, frame.voices);
                out.voices.clear();
                out.raw.clone_from(&input.raw);
                for (source, ids) in &copies.map {
                    let Some(events) = input.voices.get(source) else {
                        continue;
                    };
                    for &id in ids {
                        out.voices.insert(id, events.clone());
                    }
                }
                frame.store.put_midi(slot, out);
            });
        }
        Source::Unset => return Err(c.unsupported(node)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileEnv;
    use crate::compiler::testing::{program, run};
    use crate::patch::Patch;

    fn live(ids: &[u64]) -> BTreeMap<VoiceId, ()> {
        ids.iter().map(|&i| (VoiceId(i), ())).collect()
    }

    #[test]
    fn copies_follow_their_source_and_respect_the_cap() {
        let mut alloc = VoiceAllocator::new();
        let mut copies = Copies::new(2, 8);
        copies.follow(&live(&[10, 20]), &mut alloc);
        assert_eq!(copies.map[&VoiceId(10)].len(), 2);
        assert_eq!(copies.map[&VoiceId(20)].len(), 2);

        let kept = copies.map[&VoiceId(20)].clone();
        copies.follow(&live(&[20]), &mut alloc);
        assert!(!copies.map.contains_key(&VoiceId(10)));
        assert_eq!(copies.map[&VoiceId(20)], kept);
    }

    #[test]
    fn copies_past_the_cap_retire_the_oldest() {
        let mut alloc = VoiceAllocator::new();
        let mut copies = Copies::new(3, 4);
        copies.follow(&live(&[10]), &mut alloc);
        assert_eq!(copies.map[&VoiceId(10)], [VoiceId(1), VoiceId(2), VoiceId(3)]);

        copies.follow(&live(&[10, 20]), &mut alloc);
        assert_eq!(copies.map[&VoiceId(10)], [VoiceId(3)]);
        assert_eq!(
            copies.map[&VoiceId(20)],
            [VoiceId(4), VoiceId(5), VoiceId(6)]
        );

        // A source whose copies were all retired is not re-copied.
        copies.follow(&live(&[10, 20, 30]), &mut alloc);
        assert!(copies.map[&VoiceId(10)].is_empty());
        assert_eq!(copies.map[&VoiceId(20)], [VoiceId(6)]);
        assert_eq!(
            copies.map[&VoiceId(30)],
            [VoiceId(7), VoiceId(8), VoiceId(9)]
        );
    }

    #[test]
    fn literal_unison_creates_voices_once() {
        let patch = Patch::new();
        patch.out_named(patch.unison(0.5, 3, 32), "u");
        let mut p = program(patch, &CompileEnv::new(48000, 4));
        let (a, _) = run(&mut p);
        let (b, _) = run(&mut p);
        let a = a.signal("u").unwrap();
        assert_eq!(a.len(), 3);
        assert!(a.voices.keys().all(|v| v.0 > 0));
        assert_eq!(Some(a), b.signal("u"));
    }

    #[test]
    fn spawn_creates_a_voice_per_rise() {
        // Square at 1 Hz over 4 frames per buffer: -1 -1 +1 +1.
        let patch = Patch::new();
        patch.out_named(patch.spawn(patch.square(1.0, 0.5)), "s");
        let mut p = program(patch, &CompileEnv::new(4, 4));
        let (a, _) = run(&mut p);
        let (b, _) = run(&mut p);
        let first: Vec<_> = a.signal("s").unwrap().voices.keys().copied().collect();
        let second: Vec<_> = b.signal("s").unwrap().voices.keys().copied().collect();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);
    }
}
