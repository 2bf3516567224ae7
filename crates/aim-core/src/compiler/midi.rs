//! MIDI decoding and the `midi` and `polyphonic` rules.

use std::collections::BTreeMap;

use crate::content::{Midi, MidiEvent};
use crate::error::CompileError;
use crate::node::{Input, Node};
use crate::voice::VoiceId;

use super::{Compiler, Source};

/// Assembles three-byte channel messages from a byte stream.
///
/// A status byte starts a new message. Data bytes arriving before any
/// status, or after a message is complete, are discarded. Shorter messages
/// (program change, channel pressure) never complete and are dropped when the
/// next status byte arrives.
#[derive(Debug, Default, Clone)]
pub(crate) struct MessageParser {
    packet: [MidiEvent; 3],
    len: usize,
}

impl MessageParser {
    pub(crate) fn feed(&mut self, event: MidiEvent) -> Option<[MidiEvent; 3]> {
        if event.is_status() {
            self.len = 0;
        } else if self.len == 0 || self.len >= 3 {
            return None;
        }
        self.packet[self.len] = event;
        self.len += 1;
        (self.len == 3).then_some(self.packet)
    }
}

/// What a complete message means to the voice rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Note {
    On { key: u8, velocity: u8 },
    Off { key: u8 },
    Other,
}

impl Note {
    /// Any channel is accepted. Note-on with velocity 0 is a note-off.
    pub(crate) fn classify(message: &[MidiEvent; 3]) -> Self {
        let key = message[1].byte;
        let velocity = message[2].byte;
        match message[0].byte & 0xF0 {
            0x90 if velocity > 0 => Self::On { key, velocity },
            0x90 | 0x80 => Self::Off { key },
            _ => Self::Other,
        }
    }
}

/// Equal-tempered frequency of a note number, A4 = 69 = 440 Hz.
pub(crate) fn note_to_hz(key: f64) -> f64 {
    440.0 * 2f64.powf((key - 69.0) / 12.0)
}

/// Monophonic note state: frequency of the last note-on and an amplitude
/// that drops to zero when that same key is released.
#[derive(Debug, Default, Clone)]
pub(crate) struct NoteDecoder {
    parser: MessageParser,
    key: Option<u8>,
    frequency: f64,
    amplitude: f32,
}

impl NoteDecoder {
    pub(crate) fn feed(&mut self, event: MidiEvent) -> Option<Note> {
        let message = self.parser.feed(event)?;
        let note = Note::classify(&message);
        match note {
            Note::On { key, velocity } => {
                self.key = Some(key);
                self.frequency = note_to_hz(f64::from(key));
                self.amplitude = f32::from(velocity) / 127.0;
            }
            Note::Off { key } if self.key == Some(key) => self.amplitude = 0.0,
            _ => {}
        }
        Some(note)
    }

    pub(crate) fn frequency(&self) -> f64 {
        self.frequency
    }

    pub(crate) fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

/// Drains the named byte port into voice 0 at frame 0.
///
/// Every `midi` node naming the same port shares the first one's outlet, so
/// each of them sees every byte.
pub(super) fn device(c: &mut Compiler<'_>, device: &str) {
    if let Some(reader) = c.midi_device(device) {
        c.alias_outlet(0, reader);
        return;
    }
    let slot = c.midi_outlet(0, Midi::new());
    c.share_midi_device(device, Source::Midi(slot));
    let port = c.env().midi_ports.get(device).cloned();
    if port.is_none() {
        tracing::warn!(device, "no MIDI port registered under this name, node is silent");
    }

    c.on_process(move |frame| {
        let mut midi = frame.store.take_midi(slot);
        midi.voices.clear();
        let events = midi.voices.entry(VoiceId::DEFAULT).or_default();
        if let Some(port) = &port {
            while let Ok(byte) = port.try_recv() {
                events.push(MidiEvent::new(0, byte));
            }
        }
        midi.raw.clone_from(events);
        frame.store.put_midi(slot, midi);
    });
}

/// Splits voice 0 of a MIDI stream into one voice per held key.
///
/// Voices live from note-on until the matching note-off and carry every
/// non-note message that arrives while they are held. A new voice starts with
/// the latest controller and pitch-bend state so late notes sound like early
/// ones. Note-ons beyond `max_voices` held notes are dropped.
pub(super) fn polyphonic(
    c: &mut Compiler<'_>,
    node: &Node,
    input: &Input,
    max_voices: usize,
) -> Result<(), CompileError> {
    let Source::Midi(in_slot) = c.source(input)? else {
        return Err(c.unsupported(node));
    };
    let slot = c.midi_outlet(0, Midi::new());
    let id = node.id();

    let mut parser = MessageParser::default();
    let mut keys: BTreeMap<u8, VoiceId> = BTreeMap::new();
    // Latest message per (status, first data byte).
    let mut states: BTreeMap<(u8, u8), [MidiEvent; 3]> = BTreeMap::new();

    c.on_process(move |frame| {
        let mut out = frame.store.take_midi(slot);
        let source = frame.store.midi(in_slot);
        out.raw.clone_from(&source.raw);
        for events in out.voices.values_mut() {
            events.clear();
        }

        let incoming = source.voices.get(&VoiceId::DEFAULT).map_or(&[][..], Vec::as_slice);
        for &event in incoming {
            let Some(message) = parser.feed(event) else {
                continue;
            };
            match Note::classify(&message) {
                Note::On { key, .. } => {
                    if let Some(old) = keys.remove(&key) {
                        out.voices.remove(&old);
                    }
                    if out.voices.len() >= max_voices {
                        tracing::debug!(node = %id, key, max_voices, "voice limit reached");
                        continue;
                    }
                    let voice = frame.voices.allocate();
                    let mut events: Vec<MidiEvent> = states
                        .values()
                        .flatten()
                        .map(|e| MidiEvent::new(event.frame, e.byte))
                        .collect();
                    events.extend_from_slice(&message);
                    out.voices.insert(voice, events);
                    keys.insert(key, voice);
                }
                Note::Off { key } => {
                    if let Some(voice) = keys.remove(&key) {
                        out.voices.remove(&voice);
                    }
                }
                Note::Other => {
                    states.insert((message[0].byte, message[1].byte), message);
                    for events in out.voices.values_mut() {
                        events.extend_from_slice(&message);
                    }
                }
            }
        }

        frame.store.put_midi(slot, out);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut MessageParser, bytes: &[u8]) -> Vec<[u8; 3]> {
        bytes
            .iter()
            .filter_map(|&b| parser.feed(MidiEvent::new(0, b)))
            .map(|m| [m[0].byte, m[1].byte, m[2].byte])
            .collect()
    }

    #[test]
    fn parser_discards_stray_and_surplus_data_bytes() {
        let mut parser = MessageParser::default();
        let got = feed_all(&mut parser, &[0x40, 0x90, 60, 100, 7, 0x80, 60, 0]);
        assert_eq!(got, [[0x90, 60, 100], [0x80, 60, 0]]);
    }

    #[test]
    fn short_message_is_dropped_by_next_status() {
        let mut parser = MessageParser::default();
        let got = feed_all(&mut parser, &[0xC0, 5, 0x91, 64, 90]);
        assert_eq!(got, [[0x91, 64, 90]]);
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let msg = [
            MidiEvent::new(0, 0x93),
            MidiEvent::new(0, 61),
            MidiEvent::new(0, 0),
        ];
        assert_eq!(Note::classify(&msg), Note::Off { key: 61 });
    }

    #[test]
    fn a4_is_440() {
        assert!((note_to_hz(69.0) - 440.0).abs() < 1e-9);
        assert!((note_to_hz(81.0) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn decoder_silences_only_on_matching_release() {
        let mut decoder = NoteDecoder::default();
        for b in [0x90, 69, 127, 0x80, 70, 0] {
            decoder.feed(MidiEvent::new(0, b));
        }
        assert_eq!(decoder.amplitude(), 1.0);
        assert!((decoder.frequency() - 440.0).abs() < 1e-9);
        for b in [0x80, 69, 0] {
            decoder.feed(MidiEvent::new(0, b));
        }
        assert_eq!(decoder.amplitude(), 0.0);
    }

    #[test]
    fn nodes_on_one_port_each_see_every_byte() {
        use crate::compiler::CompileEnv;
        use crate::compiler::testing::{program, run};
        use crate::patch::Patch;
        use crate::telemetry::Message;

        let (tx, rx) = crossbeam_channel::unbounded();
        let patch = Patch::new();
        let first = patch.print(patch.midi("keys")).id();
        let second = patch.print(patch.midi("keys")).id();
        let env = CompileEnv::new(48000, 4).with_midi_port("keys", rx);
        let mut p = program(patch, &env);
        for b in [0x90, 60, 100] {
            tx.send(b).unwrap();
        }
        let (_, messages) = run(&mut p);
        let lines_from = |id: crate::NodeId| {
            messages
                .iter()
                .filter(|m| matches!(m, Message::Debug { node, .. } if *node == id.index()))
                .count()
        };
        assert_eq!(lines_from(first), 3);
        assert_eq!(lines_from(second), 3);
    }
}
