//! Runtime plumbing for compiled aim programs.
//!
//! This crate provides:
//!
//! - **Audio output**: the [`AudioBackend`] trait, a cpal implementation
//!   ([`CpalBackend`]) and a paced [`NullBackend`] for headless runs
//! - **Handoff**: [`TableHandoff`], the pointer swap that carries each
//!   [`OutputTable`](aim_core::OutputTable) from the compute thread to the
//!   audio callback, and [`AudioSink`], the callback itself
//! - **Telemetry**: [`JsonLines`] on the producing side, [`TelemetryReader`]
//!   and [`Dispatcher`] on the consuming side
//! - **Drivers**: [`Driver`] for in-process runs and [`Worker`] for runs in a
//!   separate `aim worker` process
//! - **Files and devices**: [`render_wav`], [`read_clip`] and [`MidiInput`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aim_io::{CpalBackend, Driver, DriverOptions, ChannelTelemetry};
//!
//! let program = aim_core::compile_network(&network, &env)?;
//! let (telemetry, messages) = ChannelTelemetry::new();
//! let driver = Driver::new(stop_flag);
//! let report = driver.run(&CpalBackend::new(), program, &DriverOptions::default(), telemetry, || {})?;
//! ```

pub mod backend;
pub mod cpal_backend;
pub mod driver;
pub mod handoff;
pub mod listener;
pub mod midi_input;
pub mod null_backend;
pub mod playback;
pub mod telemetry;
pub mod wav;
pub mod worker;

pub use backend::{AudioBackend, AudioDevice, BackendStreamConfig, StreamHandle};
pub use cpal_backend::CpalBackend;
pub use driver::{Driver, DriverOptions, RunReport};
pub use handoff::TableHandoff;
pub use listener::{DispatchStats, Dispatcher, Listener, ListenerRegistry, ScopeListener};
pub use midi_input::{MidiInput, midi_port_names};
pub use null_backend::NullBackend;
pub use playback::{AudioSink, DEFAULT_GAIN, SinkStatus};
pub use telemetry::{
    ChannelTelemetry, JsonLines, Line, ReaderExit, TelemetryReader, forward_lines, parse_line,
};
pub use wav::{WavSpec, read_clip, read_wav, render_wav, write_wav};
pub use worker::{Worker, WorkerExit};

/// Error types for runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// The audio callback ran out of buffers while the stream was live.
    #[error("Audio underflow after {0} buffers")]
    Underflow(u64),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested sample format is not supported.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// MIDI port setup failed.
    #[error("MIDI error: {0}")]
    Midi(String),

    /// A telemetry line could not be understood.
    #[error("Malformed telemetry line: {0}")]
    Telemetry(String),

    /// The worker process could not be started or failed.
    #[error("Worker error: {0}")]
    Worker(String),

    /// The network failed to build or compile.
    #[error(transparent)]
    Program(#[from] aim_core::Error),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
