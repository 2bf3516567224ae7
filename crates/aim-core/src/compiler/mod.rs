//! Node compiler.
//!
//! Nodes are visited in execution order. Each node kind has a rule that looks
//! at what every inlet currently holds (a literal, a signal outlet, a MIDI
//! outlet, or nothing) and appends closures to two lists:
//!
//! - **setup**: run once, before the first buffer
//! - **process**: run once per buffer, in execution order across all nodes
//!
//! Outlet contents live in a slot [`Store`] allocated here; a rule captures the
//! slot indices it reads and writes. A combination of inlet kinds that no rule
//! handles is a [`CompileError::Unsupported`], and compilation stops there.

mod control;
mod math;
mod midi;
mod oscillator;
mod scope;
mod sink;
mod source;
mod voicing;

use std::collections::BTreeMap;

use crossbeam_channel::Receiver;

use crate::content::{Content, Midi, Signal, Slot, Store};
use crate::error::CompileError;
use crate::node::{DataType, Input, Node, NodeId, NodeKind};
use crate::patch::Network;
use crate::program::{OutputTable, Program};
use crate::telemetry::Telemetry;
use crate::voice::VoiceAllocator;

/// Settings a network is compiled against.
#[derive(Debug, Clone)]
pub struct CompileEnv {
    /// Frames per second.
    pub sample_rate: u32,
    /// Frames per buffer.
    pub frame_count: usize,
    /// Seed for noise and random nodes. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// MIDI byte streams that `midi` nodes can open by name.
    pub midi_ports: BTreeMap<String, Receiver<u8>>,
}

impl Default for CompileEnv {
    fn default() -> Self {
        Self::new(48000, 512)
    }
}

impl CompileEnv {
    /// Environment with no seed and no MIDI ports.
    pub fn new(sample_rate: u32, frame_count: usize) -> Self {
        Self {
            sample_rate,
            frame_count,
            seed: None,
            midi_ports: BTreeMap::new(),
        }
    }

    /// Makes noise and random nodes reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Registers a MIDI byte stream under `name`.
    pub fn with_midi_port(mut self, name: impl Into<String>, port: Receiver<u8>) -> Self {
        self.midi_ports.insert(name.into(), port);
        self
    }
}

/// Everything a setup or process closure may touch during one buffer.
pub(crate) struct Frame<'a> {
    pub(crate) store: &'a mut Store,
    pub(crate) voices: &'a mut VoiceAllocator,
    pub(crate) telemetry: &'a mut dyn Telemetry,
    pub(crate) outputs: &'a mut OutputTable,
    /// Stream time in seconds at the first frame of this buffer.
    pub(crate) time: f64,
}

pub(crate) type SetupOp = Box<dyn FnOnce(&mut Frame<'_>) + Send>;
pub(crate) type ProcessOp = Box<dyn FnMut(&mut Frame<'_>) + Send>;

/// What an inlet resolves to at compile time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Source {
    Unset,
    Literal(f64),
    Signal(Slot),
    Midi(Slot),
}

impl Source {
    pub(crate) fn datatype(self) -> Option<DataType> {
        match self {
            Self::Signal(_) => Some(DataType::Signal),
            Self::Midi(_) => Some(DataType::Midi),
            _ => None,
        }
    }
}

pub(crate) struct Compiler<'n> {
    network: &'n Network,
    env: &'n CompileEnv,
    outlets: BTreeMap<(NodeId, usize), Source>,
    devices: BTreeMap<String, Source>,
    store: Store,
    setup: Vec<SetupOp>,
    process: Vec<ProcessOp>,
    current: NodeId,
}

impl<'n> Compiler<'n> {
    fn new(network: &'n Network, env: &'n CompileEnv) -> Self {
        Self {
            network,
            env,
            outlets: BTreeMap::new(),
            devices: BTreeMap::new(),
            store: Store::default(),
            setup: Vec::new(),
            process: Vec::new(),
            current: NodeId::new(0),
        }
    }

    pub(crate) fn frame_count(&self) -> usize {
        self.env.frame_count
    }

    pub(crate) fn sample_rate(&self) -> f64 {
        f64::from(self.env.sample_rate)
    }

    pub(crate) fn env(&self) -> &CompileEnv {
        self.env
    }

    /// Resolves an inlet against the outlets compiled so far.
    pub(crate) fn source(&self, input: &Input) -> Result<Source, CompileError> {
        match input {
            Input::Unset => Ok(Source::Unset),
            Input::Number(v) => Ok(Source::Literal(*v)),
            Input::Outlet(outlet) => match self.outlets.get(&(outlet.node, outlet.index)) {
                Some(source) => Ok(*source),
                None if self.network.node(outlet.node).is_some() => {
                    Err(CompileError::OutOfOrder {
                        node: self.current,
                        dependency: outlet.node,
                    })
                }
                None => Err(CompileError::UnknownNode(outlet.node)),
            },
        }
    }

    /// Allocates a signal slot for outlet `index` of the current node.
    pub(crate) fn signal_outlet(&mut self, index: usize, initial: Signal) -> Slot {
        let slot = self.store.push(Content::Signal(initial));
        self.register(index, Source::Signal(slot));
        slot
    }

    /// Allocates a MIDI slot for outlet `index` of the current node.
    pub(crate) fn midi_outlet(&mut self, index: usize, initial: Midi) -> Slot {
        let slot = self.store.push(Content::Midi(initial));
        self.register(index, Source::Midi(slot));
        slot
    }

    /// Exposes an existing source as outlet `index` of the current node.
    pub(crate) fn alias_outlet(&mut self, index: usize, source: Source) {
        self.register(index, source);
    }

    /// The outlet already reading MIDI port `name`, if any.
    pub(crate) fn midi_device(&self, name: &str) -> Option<Source> {
        self.devices.get(name).copied()
    }

    /// Records `source` as the reader of MIDI port `name`.
    pub(crate) fn share_midi_device(&mut self, name: &str, source: Source) {
        self.devices.insert(name.to_string(), source);
    }

    fn register(&mut self, index: usize, source: Source) {
        self.outlets.insert((self.current, index), source);
    }

    pub(crate) fn on_setup(&mut self, op: impl FnOnce(&mut Frame<'_>) + Send + 'static) {
        self.setup.push(Box::new(op));
    }

    pub(crate) fn on_process(&mut self, op: impl FnMut(&mut Frame<'_>) + Send + 'static) {
        self.process.push(Box::new(op));
    }

    pub(crate) fn unsupported(&self, node: &Node) -> CompileError {
        CompileError::Unsupported {
            node: node.id(),
            kind: node.type_name(),
            inlets: node.describe_inlets(),
        }
    }

    /// Random generator for the current node.
    pub(crate) fn rng(&self) -> fastrand::Rng {
        match self.env.seed {
            Some(seed) => {
                let salt = u64::from(self.current.index()).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                fastrand::Rng::with_seed(seed ^ salt)
            }
            None => fastrand::Rng::new(),
        }
    }
}

/// Compiles `network` in the given execution order.
///
/// `order` must list every node the sinks depend on, each after its
/// dependencies; [`execution_order`](crate::execution_order) produces one.
pub fn compile(
    network: &Network,
    order: &[NodeId],
    env: &CompileEnv,
) -> Result<Program, CompileError> {
    if env.frame_count == 0 || env.sample_rate == 0 {
        return Err(CompileError::InvalidEnvironment(format!(
            "frame_count={} sample_rate={}",
            env.frame_count, env.sample_rate
        )));
    }

    let mut c = Compiler::new(network, env);
    let mut sinks = Vec::new();

    for &id in order {
        let node = network.node(id).ok_or(CompileError::UnknownNode(id))?;
        c.current = id;
        tracing::debug!(node = %id, kind = node.type_name(), "compiling node");

        match node.kind() {
            NodeKind::Out { input, name } => {
                sink::out(&mut c, node, input, name)?;
                sinks.push(name.clone());
            }
            NodeKind::Print { input } => sink::print(&mut c, node, input)?,
            NodeKind::Oscilloscope {
                value,
                time_div,
                trigger,
                trigger_low,
            } => scope::oscilloscope(&mut c, node, value, time_div, trigger, trigger_low)?,
            NodeKind::Midi { device } => midi::device(&mut c, device),
            NodeKind::Math { op, in0, in1 } => math::binary(&mut c, node, *op, in0, in1)?,
            NodeKind::Mix { in0, in1, fac } => math::mix(&mut c, node, in0, in1, fac)?,
            NodeKind::Downmix { input } => math::downmix(&mut c, node, input)?,
            NodeKind::Clip {
                value,
                minimum,
                maximum,
            } => math::clip(&mut c, node, value, minimum, maximum)?,
            NodeKind::Db { decibel } => math::db(&mut c, node, decibel)?,
            NodeKind::Oscillator {
                waveform,
                frequency,
                phase,
                duty,
            } => oscillator::oscillator(&mut c, node, *waveform, frequency, phase, duty)?,
            NodeKind::Noise { voices } => source::noise(&mut c, voices)?,
            NodeKind::Random { input } => source::random(&mut c, input)?,
            NodeKind::AudioFile { speed, clip } => source::audiofile(&mut c, node, speed, clip)?,
            NodeKind::Trigger { value, on, off } => control::trigger(&mut c, node, value, on, off)?,
            NodeKind::Time {
                voice_trigger,
                speed,
            } => control::time(&mut c, node, voice_trigger, speed)?,
            NodeKind::Frequency { input } => control::frequency(&mut c, node, input)?,
            NodeKind::One { input } => control::one(&mut c, input)?,
            NodeKind::Spawn { input } => voicing::spawn(&mut c, node, input)?,
            NodeKind::Polyphonic { input, max_voices } => {
                midi::polyphonic(&mut c, node, input, *max_voices)?;
            }
            NodeKind::Unison {
                input,
                voices,
                max_voices,
            } => voicing::unison(&mut c, node, input, *voices, *max_voices)?,
        }
    }

    tracing::debug!(
        setup = c.setup.len(),
        process = c.process.len(),
        "compiled program"
    );

    Ok(Program::new(
        c.setup,
        c.process,
        c.store,
        env.frame_count,
        env.sample_rate,
        sinks,
    ))
}

/// Per-voice buffer for a literal or a signal auxiliary inlet.
///
/// Literals read as a constant block. Signals read the matching voice, or
/// voice 0 when the signal is a scalar, or `fallback` when neither exists.
pub(crate) fn aux_block<'a>(
    store: &'a Store,
    source: AuxSource,
    voice: crate::VoiceId,
    constant: &'a [f32],
) -> &'a [f32] {
    match source {
        AuxSource::Constant => constant,
        AuxSource::Signal(slot) => {
            crate::voice::lookup(&store.signal(slot).voices, voice).map_or(constant, Vec::as_slice)
        }
    }
}

/// An auxiliary inlet reduced to either a constant block or a signal slot.
#[derive(Clone, Copy, Debug)]
pub(crate) enum AuxSource {
    Constant,
    Signal(Slot),
}

/// Reduces an inlet that may be a literal or a signal to an [`AuxSource`],
/// returning the constant block to use alongside it.
///
/// `default` fills in for an unset inlet and for signal voices that are
/// missing.
pub(crate) fn aux(
    c: &Compiler<'_>,
    node: &Node,
    input: &Input,
    default: f64,
) -> Result<(AuxSource, Vec<f32>), CompileError> {
    let n = c.frame_count();
    match c.source(input)? {
        Source::Literal(v) => Ok((AuxSource::Constant, vec![v as f32; n])),
        Source::Unset => Ok((AuxSource::Constant, vec![default as f32; n])),
        Source::Signal(slot) => Ok((AuxSource::Signal(slot), vec![default as f32; n])),
        Source::Midi(_) => Err(c.unsupported(node)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for rule tests: compile a patch and run buffers.

    use super::*;
    use crate::telemetry::Message;
    use crate::{Patch, build_graph, execution_order};

    pub(crate) fn program(patch: Patch, env: &CompileEnv) -> Program {
        let network = patch.finish().unwrap();
        let order = execution_order(&build_graph(&network).unwrap());
        compile(&network, &order, env).unwrap()
    }

    pub(crate) fn run(program: &mut Program) -> (OutputTable, Vec<Message>) {
        let mut messages: Vec<Message> = Vec::new();
        let table = program.process(&mut messages);
        (table, messages)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::Patch;
    use crate::{build_graph, execution_order};

    #[test]
    fn zero_frame_count_is_rejected() {
        let patch = Patch::new();
        patch.out(1.0);
        let network = patch.finish().unwrap();
        let order = execution_order(&build_graph(&network).unwrap());
        let err = compile(&network, &order, &CompileEnv::new(48000, 0)).unwrap_err();
        assert!(matches!(err, CompileError::InvalidEnvironment(_)));
    }

    #[test]
    fn out_of_order_dependency_is_reported() {
        let patch = Patch::new();
        let osc = patch.sine(1.0);
        let out = patch.out(osc);
        let (osc, out) = (osc.id(), out.id());
        let network = patch.finish().unwrap();
        let err = compile(&network, &[out, osc], &CompileEnv::default()).unwrap_err();
        assert_eq!(
            err,
            CompileError::OutOfOrder {
                node: out,
                dependency: osc
            }
        );
    }

    #[test]
    fn unset_sink_input_is_unsupported() {
        let patch = Patch::new();
        patch.out(Value::Unset);
        let network = patch.finish().unwrap();
        let order = execution_order(&build_graph(&network).unwrap());
        let err = compile(&network, &order, &CompileEnv::default()).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { kind: "out", .. }));
    }

    #[test]
    fn seeded_environment_is_reproducible() {
        let build = || {
            let patch = Patch::new();
            patch.out(patch.noise(Value::Unset));
            program(patch, &CompileEnv::new(48000, 16).with_seed(7))
        };
        let (a, _) = run(&mut build());
        let (b, _) = run(&mut build());
        assert_eq!(a, b);
    }

    use crate::patch::Value;
}
