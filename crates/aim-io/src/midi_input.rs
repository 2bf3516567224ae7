//! MIDI device input feeding `midi` nodes.
//!
//! A [`MidiInput`] connects one hardware port and pushes every incoming byte
//! into a crossbeam queue. The receiving end is registered in the
//! [`CompileEnv`](aim_core::CompileEnv) under the name a `midi` node uses as
//! its `device`.

use crossbeam_channel::{Receiver, unbounded};
use midir::{Ignore, MidiInputConnection};

use crate::{Error, Result};

const CLIENT: &str = "aim";

/// Names of every MIDI input port on the system.
pub fn midi_port_names() -> Result<Vec<String>> {
    let midi_in = midir::MidiInput::new(CLIENT).map_err(|e| Error::Midi(e.to_string()))?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// An open MIDI input port. Dropping it closes the port.
pub struct MidiInput {
    name: String,
    _connection: MidiInputConnection<()>,
}

impl std::fmt::Debug for MidiInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiInput")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MidiInput {
    /// Opens the first input port whose name contains `device`
    /// (case-insensitive). Sysex and timing messages are filtered out.
    ///
    /// Returns the port and the queue its bytes arrive on.
    pub fn connect(device: &str) -> Result<(Self, Receiver<u8>)> {
        let mut midi_in = midir::MidiInput::new(CLIENT).map_err(|e| Error::Midi(e.to_string()))?;
        let search = device.to_lowercase();
        let ports = midi_in.ports();
        let (port, name) = ports
            .iter()
            .find_map(|p| {
                let name = midi_in.port_name(p).ok()?;
                name.to_lowercase().contains(&search).then(|| (p.clone(), name))
            })
            .ok_or_else(|| Error::DeviceNotFound(format!("no MIDI input matching '{}'", device)))?;

        midi_in.ignore(Ignore::Sysex | Ignore::Time);
        let (tx, rx) = unbounded();
        let connection = midi_in
            .connect(
                &port,
                "aim-input",
                move |_timestamp, message, _| {
                    for &byte in message {
                        // The program owning the receiver may already be gone.
                        let _ = tx.send(byte);
                    }
                },
                (),
            )
            .map_err(|e| Error::Midi(e.to_string()))?;

        tracing::info!(port = %name, "MIDI input connected");
        Ok((
            Self {
                name,
                _connection: connection,
            },
            rx,
        ))
    }

    /// Name of the connected port.
    pub fn name(&self) -> &str {
        &self.name
    }
}
