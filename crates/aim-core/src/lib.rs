//! aim core: node graph model, scheduler and buffer compiler.
//!
//! A synthesizer patch is described as typed nodes wired through outlets,
//! compiled into a [`Program`] and then driven one buffer at a time.
//!
//! # Pipeline
//!
//! - [`Patch`] - build context: owns the nodes while a network is described
//! - [`build_graph`] - discovers every node reachable from the sinks
//! - [`execution_order`] - orders them so each node follows its dependencies
//! - [`compile`] - turns the ordered nodes into setup and per-buffer steps
//! - [`Program::process`] - produces one [`OutputTable`] per call
//!
//! # Voices
//!
//! Outlet content is keyed by [`VoiceId`]. Nodes such as `polyphonic`,
//! `unison` and `spawn` create voices at runtime; every other node follows
//! the voices of its inputs. See [`voice`] for the rules every node obeys.
//!
//! # Telemetry
//!
//! Nodes that report to the outside world (`print`, `oscilloscope`) push
//! [`Message`]s into a [`Telemetry`] sink while a buffer is processed.
//!
//! # Example
//!
//! ```rust
//! use aim_core::{CompileEnv, Discard, Patch, compile_network};
//!
//! let patch = Patch::new();
//! let tone = patch.sine(440.0) * 0.5;
//! patch.out_named(tone, "main");
//!
//! let network = patch.finish()?;
//! let mut program = compile_network(&network, &CompileEnv::new(48000, 256))?;
//! let table = program.process(&mut Discard);
//! assert_eq!(table.mixdown(&[], 256).len(), 256);
//! # Ok::<(), aim_core::Error>(())
//! ```

mod compiler;
pub mod content;
pub mod error;
pub mod graph;
pub mod node;
pub mod patch;
mod program;
pub mod schedule;
pub mod telemetry;
pub mod voice;

pub use compiler::{CompileEnv, compile};
pub use content::{Content, Midi, MidiEvent, Signal};
pub use error::{BuildError, CompileError, Error, GraphError, Result};
pub use graph::{DependencyGraph, build_graph};
pub use node::{
    AudioClip, DataType, Input, MathOp, Node, NodeId, NodeKind, Outlet, TYPE_NAMES, Waveform,
};
pub use patch::{Handle, Network, Patch, Port, Value};
pub use program::{OutputTable, Program};
pub use schedule::execution_order;
pub use telemetry::{Discard, Message, Telemetry};
pub use voice::{VoiceAllocator, VoiceId};

/// Discovers, orders and compiles `network` in one step.
pub fn compile_network(network: &Network, env: &CompileEnv) -> Result<Program> {
    let graph = build_graph(network)?;
    let order = execution_order(&graph);
    Ok(compile(network, &order, env)?)
}
