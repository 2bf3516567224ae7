//! Telemetry transport: JSON lines out of the worker, messages into the
//! controller.
//!
//! The producing side writes one JSON object per line ([`JsonLines`]). The
//! consuming side reads lines on a dedicated thread ([`TelemetryReader`]),
//! classifies them with [`parse_line`] and forwards [`Message`]s over a
//! crossbeam channel in the order they were read.
//!
//! A line that is not a JSON object ends the reader. A JSON object of an
//! unknown shape is logged and skipped. Neither affects audio playback,
//! which never reads from this path.

use std::io::{BufRead, Write};
use std::thread::JoinHandle;

use aim_core::{Message, Telemetry};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::Value;

use crate::{Error, Result};

/// Writes each message as one JSON line, flushing after every heartbeat.
///
/// After the first write error the sink goes quiet and
/// [`is_broken`](Self::is_broken) reports it.
pub struct JsonLines<W: Write> {
    writer: W,
    broken: bool,
}

impl<W: Write> JsonLines<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            broken: false,
        }
    }

    /// True once a write has failed.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Unwraps the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, message: &Message) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        if matches!(message, Message::Status { .. }) {
            self.writer.flush()?;
        }
        Ok(())
    }
}

impl<W: Write> Telemetry for JsonLines<W> {
    fn send(&mut self, message: Message) {
        if self.broken {
            return;
        }
        if let Err(e) = self.write(&message) {
            tracing::error!(error = %e, "telemetry output failed, dropping further messages");
            self.broken = true;
        }
    }
}

/// Forwards messages over a channel, for in-process runs.
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: Sender<Message>,
}

impl ChannelTelemetry {
    /// Creates the sink and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<Message>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Wraps an existing sender.
    pub fn from_sender(tx: Sender<Message>) -> Self {
        Self { tx }
    }
}

impl Telemetry for ChannelTelemetry {
    fn send(&mut self, message: Message) {
        // A dropped receiver means nobody is listening.
        let _ = self.tx.send(message);
    }
}

/// One classified telemetry line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// A heartbeat, debug message or listener payload.
    Message(Message),
    /// A JSON object of no known shape.
    Unknown(Value),
}

/// Classifies one line of worker output.
///
/// Anything that is not a single JSON object is an error.
pub fn parse_line(line: &str) -> Result<Line> {
    let value: Value = serde_json::from_str(line).map_err(|e| Error::Telemetry(e.to_string()))?;
    if !value.is_object() {
        return Err(Error::Telemetry(format!("expected a JSON object, got {line}")));
    }
    Ok(match serde_json::from_value::<Message>(value.clone()) {
        Ok(message) => Line::Message(message),
        Err(_) => Line::Unknown(value),
    })
}

/// Why a telemetry reader stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The producer closed its end.
    Eof,
    /// A line could not be parsed. Carries the parse error.
    Malformed(String),
    /// Reading failed.
    Io(String),
    /// The consumer dropped its receiver.
    Disconnected,
    /// The reader thread panicked.
    Panicked,
}

/// Reads `reader` line by line, forwarding every message in order, until
/// the end of input or the first malformed line.
pub fn forward_lines<R: BufRead>(reader: &mut R, tx: &Sender<Message>) -> ReaderExit {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => return ReaderExit::Io(e.to_string()),
        };
        match parse_line(&line) {
            Ok(Line::Message(message)) => {
                if tx.send(message).is_err() {
                    return ReaderExit::Disconnected;
                }
            }
            Ok(Line::Unknown(value)) => {
                tracing::warn!(%value, "skipping telemetry object of unknown shape");
            }
            Err(e) => {
                tracing::error!(error = %e, "telemetry stream ended by malformed line");
                return ReaderExit::Malformed(e.to_string());
            }
        }
    }
    ReaderExit::Eof
}

/// Dedicated thread that turns lines into messages.
#[derive(Debug)]
pub struct TelemetryReader {
    thread: Option<JoinHandle<ReaderExit>>,
}

impl TelemetryReader {
    /// Starts reading `reader` on a new thread.
    ///
    /// Once forwarding stops early the channel is closed and the rest of the
    /// input is read and discarded, so a producer writing into a pipe never
    /// blocks on it.
    pub fn spawn<R: BufRead + Send + 'static>(mut reader: R, tx: Sender<Message>) -> Result<Self> {
        let thread = std::thread::Builder::new()
            .name("aim-telemetry".into())
            .spawn(move || {
                let exit = forward_lines(&mut reader, &tx);
                tracing::debug!(?exit, "telemetry reader stopped");
                if matches!(exit, ReaderExit::Malformed(_) | ReaderExit::Disconnected) {
                    drop(tx);
                    let _ = std::io::copy(&mut reader, &mut std::io::sink());
                }
                exit
            })?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    /// True once the thread has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the thread and reports why it stopped.
    pub fn join(mut self) -> ReaderExit {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => ReaderExit::Panicked,
            None => ReaderExit::Eof,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_core::NodeId;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn lines_are_flushed_per_heartbeat() {
        let mut sink = JsonLines::new(Vec::new());
        sink.send(Message::debug(NodeId::new(2), "print", 0.0, "voices=1"));
        sink.send(Message::HEARTBEAT);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], r#"{"status":0}"#);
        assert!(lines[0].contains(r#""debug":true"#));
    }

    #[test]
    fn parse_classifies_each_shape() {
        assert_eq!(parse_line(r#"{"status":0}"#).unwrap(), Line::Message(Message::HEARTBEAT));
        assert!(matches!(
            parse_line(r#"{"node_id":4,"name":"oscilloscope","data":{"voice_id":0,"samples":[]}}"#)
                .unwrap(),
            Line::Message(Message::Payload { node_id: 4, .. })
        ));
        assert_eq!(
            parse_line(r#"{"hello":1}"#).unwrap(),
            Line::Unknown(json!({"hello": 1}))
        );
        assert!(parse_line("[1, 2]").is_err());
        assert!(parse_line("not json").is_err());
        assert!(parse_line("").is_err());
    }

    #[test]
    fn malformed_line_ends_forwarding_after_earlier_messages() {
        let input = "{\"status\":0}\n{\"what\":true}\n{\"status\":0}\n{oops\n{\"status\":0}\n";
        let (tx, rx) = unbounded();
        let exit = forward_lines(&mut Cursor::new(input), &tx);
        assert!(matches!(exit, ReaderExit::Malformed(_)));
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, [Message::HEARTBEAT, Message::HEARTBEAT]);
    }

    #[test]
    fn reader_thread_reports_eof() {
        let (tx, rx) = unbounded();
        let reader = TelemetryReader::spawn(Cursor::new("{\"status\":0}\n"), tx).unwrap();
        assert_eq!(reader.join(), ReaderExit::Eof);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn channel_telemetry_survives_a_dropped_receiver() {
        let (mut sink, rx) = ChannelTelemetry::new();
        drop(rx);
        sink.send(Message::HEARTBEAT);
    }
}
