//! Outlet content: voice-keyed signal blocks and MIDI event lists.

use std::collections::BTreeMap;

use crate::voice::VoiceId;

/// Voice-keyed sample blocks. Every block is one buffer long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal {
    /// Live voices and their samples for the current buffer.
    pub voices: BTreeMap<VoiceId, Vec<f32>>,
}

impl Signal {
    /// A signal with no voices.
    pub const fn new() -> Self {
        Self {
            voices: BTreeMap::new(),
        }
    }

    /// A scalar signal: voice 0 filled with `value`.
    pub fn constant(frame_count: usize, value: f32) -> Self {
        let mut voices = BTreeMap::new();
        voices.insert(VoiceId::DEFAULT, vec![value; frame_count]);
        Self { voices }
    }

    /// Samples for one voice.
    pub fn voice(&self, voice: VoiceId) -> Option<&[f32]> {
        self.voices.get(&voice).map(Vec::as_slice)
    }

    /// Mutable block for `voice`, created zeroed if missing.
    pub fn voice_mut(&mut self, voice: VoiceId, frame_count: usize) -> &mut [f32] {
        let block = self
            .voices
            .entry(voice)
            .or_insert_with(|| vec![0.0; frame_count]);
        block.resize(frame_count, 0.0);
        block
    }

    /// Number of live voices.
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// True when no voice is alive.
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Sum of every voice, one buffer long.
    pub fn sum(&self, frame_count: usize) -> Vec<f32> {
        let mut out = vec![0.0; frame_count];
        for block in self.voices.values() {
            for (o, s) in out.iter_mut().zip(block) {
                *o += *s;
            }
        }
        out
    }
}

/// One MIDI byte and the frame it arrived at within the buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    /// Frame offset inside the buffer.
    pub frame: u32,
    /// Raw byte; bit 7 marks a status byte.
    pub byte: u8,
}

impl MidiEvent {
    /// Creates an event.
    pub const fn new(frame: u32, byte: u8) -> Self {
        Self { frame, byte }
    }

    /// True for status bytes.
    pub fn is_status(self) -> bool {
        self.byte & 0x80 != 0
    }
}

/// Voice-keyed MIDI event lists plus the unsplit raw stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Midi {
    /// Events per voice for the current buffer.
    pub voices: BTreeMap<VoiceId, Vec<MidiEvent>>,
    /// Every byte of the source stream, for consumers that want controller
    /// data regardless of voicing.
    pub raw: Vec<MidiEvent>,
}

impl Midi {
    /// A MIDI stream with no voices.
    pub const fn new() -> Self {
        Self {
            voices: BTreeMap::new(),
            raw: Vec::new(),
        }
    }
}

/// Content of one outlet for one buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Sample blocks.
    Signal(Signal),
    /// MIDI events.
    Midi(Midi),
}

impl Content {
    /// Number of live voices.
    pub fn voice_count(&self) -> usize {
        match self {
            Self::Signal(s) => s.voices.len(),
            Self::Midi(m) => m.voices.len(),
        }
    }

    /// The signal, if this is one.
    pub fn as_signal(&self) -> Option<&Signal> {
        match self {
            Self::Signal(s) => Some(s),
            Self::Midi(_) => None,
        }
    }

    /// The MIDI stream, if this is one.
    pub fn as_midi(&self) -> Option<&Midi> {
        match self {
            Self::Midi(m) => Some(m),
            Self::Signal(_) => None,
        }
    }
}

static EMPTY_SIGNAL: Signal = Signal::new();
static EMPTY_MIDI: Midi = Midi::new();

/// Index of an outlet's content inside the [`Store`].
pub(crate) type Slot = usize;

/// Outlet contents of a compiled program, one slot per outlet.
///
/// Slot types are fixed at compile time. A rule writing an outlet takes the
/// content out, fills it while reading its inputs, and puts it back.
#[derive(Debug, Default)]
pub(crate) struct Store {
    slots: Vec<Content>,
}

impl Store {
    pub(crate) fn push(&mut self, content: Content) -> Slot {
        self.slots.push(content);
        self.slots.len() - 1
    }

    pub(crate) fn content(&self, slot: Slot) -> Option<&Content> {
        self.slots.get(slot)
    }

    pub(crate) fn signal(&self, slot: Slot) -> &Signal {
        match self.slots.get(slot) {
            Some(Content::Signal(s)) => s,
            _ => &EMPTY_SIGNAL,
        }
    }

    pub(crate) fn midi(&self, slot: Slot) -> &Midi {
        match self.slots.get(slot) {
            Some(Content::Midi(m)) => m,
            _ => &EMPTY_MIDI,
        }
    }

    pub(crate) fn take_signal(&mut self, slot: Slot) -> Signal {
        match self.slots.get_mut(slot) {
            Some(Content::Signal(s)) => std::mem::take(s),
            _ => Signal::new(),
        }
    }

    pub(crate) fn put_signal(&mut self, slot: Slot, signal: Signal) {
        if let Some(content) = self.slots.get_mut(slot) {
            *content = Content::Signal(signal);
        }
    }

    pub(crate) fn take_midi(&mut self, slot: Slot) -> Midi {
        match self.slots.get_mut(slot) {
            Some(Content::Midi(m)) => std::mem::take(m),
            _ => Midi::new(),
        }
    }

    pub(crate) fn put_midi(&mut self, slot: Slot, midi: Midi) {
        if let Some(content) = self.slots.get_mut(slot) {
            *content = Content::Midi(midi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_is_scalar() {
        let s = Signal::constant(4, 2.5);
        assert_eq!(s.voice(VoiceId::DEFAULT), Some(&[2.5; 4][..]));
        assert!(crate::voice::is_scalar(&s.voices));
    }

    #[test]
    fn sum_adds_every_voice() {
        let mut s = Signal::new();
        s.voices.insert(VoiceId(1), vec![1.0, 2.0]);
        s.voices.insert(VoiceId(2), vec![0.5, 0.5]);
        assert_eq!(s.sum(2), [1.5, 2.5]);
    }

    #[test]
    fn take_and_put_round_trip_through_a_slot() {
        let mut store = Store::default();
        let slot = store.push(Content::Signal(Signal::constant(2, 1.0)));
        let mut s = store.take_signal(slot);
        assert!(store.signal(slot).is_empty());
        s.voice_mut(VoiceId(3), 2)[1] = 4.0;
        store.put_signal(slot, s);
        assert_eq!(store.signal(slot).voice(VoiceId(3)), Some(&[0.0, 4.0][..]));
    }

    #[test]
    fn mismatched_slot_reads_as_empty() {
        let mut store = Store::default();
        let slot = store.push(Content::Midi(Midi::new()));
        assert!(store.signal(slot).is_empty());
        assert!(store.midi(99).voices.is_empty());
    }
}
