//! Terminal rules: `out` and `print`.

use crate::content::{Content, Signal};
use crate::error::CompileError;
use crate::node::{Input, Node};
use crate::telemetry::Message;

use super::{Compiler, Source};

/// Publishes the input under `name` in every buffer's output table.
pub(super) fn out(
    c: &mut Compiler<'_>,
    node: &Node,
    input: &Input,
    name: &str,
) -> Result<(), CompileError> {
    let name = name.to_string();
    match c.source(input)? {
        Source::Literal(v) => {
            let constant = Content::Signal(Signal::constant(c.frame_count(), v as f32));
            c.on_process(move |frame| {
                frame.outputs.insert(name.clone(), constant.clone());
            });
        }
        Source::Signal(slot) | Source::Midi(slot) => {
            c.on_process(move |frame| {
                if let Some(content) = frame.store.content(slot) {
                    frame.outputs.insert(name.clone(), content.clone());
                }
            });
        }
        Source::Unset => return Err(c.unsupported(node)),
    }
    Ok(())
}

/// Debug output: one line per MIDI event, or a line whenever the number of
/// signal voices changes.
pub(super) fn print(c: &mut Compiler<'_>, node: &Node, input: &Input) -> Result<(), CompileError> {
    let id = node.id();
    let name = node.type_name();
    match c.source(input)? {
        Source::Midi(slot) => {
            c.on_process(move |frame| {
                let midi = frame.store.midi(slot);
                for (voice, events) in &midi.voices {
                    for event in events {
                        let text = format!("voice={voice} frame={} byte={}", event.frame, event.byte);
                        frame.telemetry.send(Message::debug(id, name, frame.time, text));
                    }
                }
            });
        }
        Source::Signal(slot) => {
            let mut last: Option<usize> = None;
            c.on_process(move |frame| {
                let count = frame.store.signal(slot).len();
                if last != Some(count) {
                    last = Some(count);
                    let text = format!("voices={count}");
                    frame.telemetry.send(Message::debug(id, name, frame.time, text));
                }
            });
        }
        Source::Literal(_) | Source::Unset => return Err(c.unsupported(node)),
    }
    Ok(())
}
