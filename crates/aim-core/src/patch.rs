//! Patch: the explicit build context that owns nodes while a network is
//! described.
//!
//! A [`Patch`] hands out copyable [`Handle`]s. Handles combine with `+ - * /`
//! like numbers, so a front-end can mirror an expression tree directly:
//!
//! ```rust
//! use aim_core::Patch;
//!
//! let patch = Patch::new();
//! let lfo = patch.sine(2.0);
//! let tone = patch.sine(440.0) * (lfo * 0.5 + 0.5);
//! patch.out(tone);
//! let network = patch.finish().unwrap();
//! assert_eq!(network.terminals().len(), 1);
//! ```
//!
//! Mistakes are recorded as they happen and the first one is returned by
//! [`Patch::finish`], so builder calls stay chainable.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use crate::error::BuildError;
use crate::node::{AudioClip, Input, MathOp, Node, NodeId, NodeKind, Outlet, Waveform};

/// A node created by a [`Patch`].
#[derive(Clone, Copy)]
pub struct Handle<'p> {
    patch: &'p Patch,
    id: NodeId,
}

impl std::fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.id).finish()
    }
}

impl<'p> Handle<'p> {
    /// The node's identity.
    pub fn id(self) -> NodeId {
        self.id
    }

    /// A specific outlet of this node, by name.
    pub fn port(self, outlet: &str) -> Port<'p> {
        Port {
            patch: self.patch,
            node: self.id,
            outlet: outlet.to_string(),
        }
    }

    /// `1.0` where `self > rhs`.
    pub fn gt(self, rhs: impl Into<Value<'p>>) -> Handle<'p> {
        self.patch.math(MathOp::Gt, self, rhs)
    }

    /// `1.0` where `self < rhs`.
    pub fn lt(self, rhs: impl Into<Value<'p>>) -> Handle<'p> {
        self.patch.math(MathOp::Lt, self, rhs)
    }
}

/// A named outlet of a node, for nodes whose default outlet is not wanted.
#[derive(Clone, Debug)]
pub struct Port<'p> {
    patch: &'p Patch,
    node: NodeId,
    outlet: String,
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patch")
            .field("nodes", &self.nodes.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Anything that can be handed to an inlet.
#[derive(Clone, Debug)]
pub enum Value<'p> {
    /// Leave the inlet unconnected.
    Unset,
    /// A literal.
    Number(f64),
    /// A node, meaning its default outlet.
    Node(Handle<'p>),
    /// A named outlet.
    Port(Port<'p>),
}

impl From<f64> for Value<'_> {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value<'_> {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl<'p> From<Handle<'p>> for Value<'p> {
    fn from(h: Handle<'p>) -> Self {
        Self::Node(h)
    }
}

impl<'p> From<Port<'p>> for Value<'p> {
    fn from(p: Port<'p>) -> Self {
        Self::Port(p)
    }
}

impl<'p> From<Option<Handle<'p>>> for Value<'p> {
    fn from(h: Option<Handle<'p>>) -> Self {
        h.map_or(Self::Unset, Self::Node)
    }
}

/// Build context for one network.
///
/// Owns the node arena, the list of terminal nodes and the counter used to
/// name unnamed sinks (`unnamed_0`, `unnamed_1`, ...). Two patches never share
/// state, so independent networks can be described side by side.
pub struct Patch {
    nodes: RefCell<Vec<Node>>,
    terminals: RefCell<Vec<NodeId>>,
    unnamed: Cell<usize>,
    errors: RefCell<Vec<BuildError>>,
}

impl Default for Patch {
    fn default() -> Self {
        Self::new()
    }
}

impl Patch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(Vec::new()),
            terminals: RefCell::new(Vec::new()),
            unnamed: Cell::new(0),
            errors: RefCell::new(Vec::new()),
        }
    }

    /// Number of nodes created so far.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// True before the first node is created.
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    fn record(&self, error: BuildError) {
        self.errors.borrow_mut().push(error);
    }

    /// Converts a builder value into an inlet value, recording any error.
    fn resolve(&self, value: Value<'_>) -> Input {
        match value {
            Value::Unset => Input::Unset,
            Value::Number(v) => Input::Number(v),
            Value::Node(h) => {
                if !std::ptr::eq(h.patch, self) {
                    self.record(BuildError::IdentityCollision(h.id));
                    return Input::Unset;
                }
                let outlet = self
                    .nodes
                    .borrow()
                    .get(h.id.index() as usize)
                    .map(Node::default_outlet);
                match outlet {
                    Some(Some(outlet)) => Input::Outlet(outlet),
                    Some(None) => {
                        let kind = self.type_name(h.id);
                        self.record(BuildError::NoOutlets { node: h.id, kind });
                        Input::Unset
                    }
                    None => {
                        self.record(BuildError::IdentityCollision(h.id));
                        Input::Unset
                    }
                }
            }
            Value::Port(p) => {
                if !std::ptr::eq(p.patch, self) {
                    self.record(BuildError::IdentityCollision(p.node));
                    return Input::Unset;
                }
                let found = self
                    .nodes
                    .borrow()
                    .get(p.node.index() as usize)
                    .and_then(|n| n.outlet(&p.outlet));
                match found {
                    Some(outlet) => Input::Outlet(outlet),
                    None => {
                        let kind = self.type_name(p.node);
                        self.record(BuildError::UnknownOutlet {
                            node: p.node,
                            kind,
                            outlet: p.outlet,
                        });
                        Input::Unset
                    }
                }
            }
        }
    }

    fn type_name(&self, id: NodeId) -> &'static str {
        self.nodes
            .borrow()
            .get(id.index() as usize)
            .map_or("unknown", Node::type_name)
    }

    /// Inserts a node of any kind.
    ///
    /// Terminal kinds are registered as sinks. An `out` node with an empty
    /// name is given the next `unnamed_N` name.
    pub fn insert(&self, mut kind: NodeKind) -> Handle<'_> {
        if let NodeKind::Out { name, .. } = &mut kind
            && name.is_empty()
        {
            let n = self.unnamed.get();
            self.unnamed.set(n + 1);
            *name = format!("unnamed_{n}");
        }
        let terminal = kind.is_terminal();
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId::new(nodes.len() as u32);
        nodes.push(Node { id, kind });
        drop(nodes);
        if terminal {
            self.terminals.borrow_mut().push(id);
        }
        Handle { patch: self, id }
    }

    /// Creates a node from its type name with default inlets.
    pub fn create(&self, type_name: &str) -> Option<Handle<'_>> {
        NodeKind::from_type_name(type_name).map(|kind| self.insert(kind))
    }

    /// Rewires one inlet of an existing node.
    ///
    /// This is how forward references are resolved, so it is also the one
    /// place a node can be pointed at its own outlet. That is recorded as a
    /// [`BuildError::SelfDependency`].
    pub fn set_input<'p>(&'p self, node: Handle<'p>, inlet: &str, value: impl Into<Value<'p>>) {
        if !std::ptr::eq(node.patch, self) {
            self.record(BuildError::IdentityCollision(node.id));
            return;
        }
        let input = self.resolve(value.into());
        if input.outlet().is_some_and(|o| o.node == node.id) {
            self.record(BuildError::SelfDependency(node.id));
            return;
        }
        let kind = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(target) = nodes.get_mut(node.id.index() as usize) else {
                return;
            };
            let kind = target.type_name();
            if let Some(slot) = target.kind.inlet_mut(inlet) {
                *slot = input;
                return;
            }
            kind
        };
        self.record(BuildError::UnknownInlet {
            node: node.id,
            kind,
            inlet: inlet.to_string(),
        });
    }

    /// Validates the patch and hands over its nodes.
    pub fn finish(self) -> Result<Network, BuildError> {
        if let Some(error) = self.errors.into_inner().into_iter().next() {
            return Err(error);
        }
        let nodes = self.nodes.into_inner();
        let mut names = BTreeSet::new();
        for node in &nodes {
            if node.inlets().iter().any(|(_, v)| v.outlet().is_some_and(|o| o.node == node.id)) {
                return Err(BuildError::SelfDependency(node.id));
            }
            if let NodeKind::Out { name, .. } = &node.kind
                && !names.insert(name.clone())
            {
                return Err(BuildError::DuplicateSinkName(name.clone()));
            }
        }
        Ok(Network {
            nodes,
            terminals: self.terminals.into_inner(),
        })
    }

    // ------------------------------------------------------------------
    // Node builders
    // ------------------------------------------------------------------

    /// Program output, named `unnamed_N`.
    pub fn out<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        self.out_named(input, "")
    }

    /// Program output with an explicit sink name.
    pub fn out_named<'p>(&'p self, input: impl Into<Value<'p>>, name: &str) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Out {
            input,
            name: name.to_string(),
        })
    }

    /// Debug printer.
    pub fn print<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Print { input })
    }

    /// Oscilloscope capturing `value` over `time_div` seconds.
    pub fn oscilloscope<'p>(
        &'p self,
        value: impl Into<Value<'p>>,
        time_div: impl Into<Value<'p>>,
    ) -> Handle<'p> {
        let value = self.resolve(value.into());
        let time_div = self.resolve(time_div.into());
        self.insert(NodeKind::Oscilloscope {
            value,
            time_div,
            trigger: Input::Number(0.1),
            trigger_low: Input::Unset,
        })
    }

    /// MIDI input port.
    pub fn midi(&self, device: &str) -> Handle<'_> {
        self.insert(NodeKind::Midi {
            device: device.to_string(),
        })
    }

    /// Binary operator node.
    pub fn math<'p>(
        &'p self,
        op: MathOp,
        in0: impl Into<Value<'p>>,
        in1: impl Into<Value<'p>>,
    ) -> Handle<'p> {
        let in0 = self.resolve(in0.into());
        let in1 = self.resolve(in1.into());
        self.insert(NodeKind::Math { op, in0, in1 })
    }

    /// `in0 + in1`
    pub fn add<'p>(&'p self, in0: impl Into<Value<'p>>, in1: impl Into<Value<'p>>) -> Handle<'p> {
        self.math(MathOp::Add, in0, in1)
    }

    /// `in0 - in1`
    pub fn sub<'p>(&'p self, in0: impl Into<Value<'p>>, in1: impl Into<Value<'p>>) -> Handle<'p> {
        self.math(MathOp::Sub, in0, in1)
    }

    /// `in0 * in1`
    pub fn mul<'p>(&'p self, in0: impl Into<Value<'p>>, in1: impl Into<Value<'p>>) -> Handle<'p> {
        self.math(MathOp::Mul, in0, in1)
    }

    /// `in0 / in1`
    pub fn div<'p>(&'p self, in0: impl Into<Value<'p>>, in1: impl Into<Value<'p>>) -> Handle<'p> {
        self.math(MathOp::Div, in0, in1)
    }

    /// Crossfade.
    pub fn mix<'p>(
        &'p self,
        in0: impl Into<Value<'p>>,
        in1: impl Into<Value<'p>>,
        fac: impl Into<Value<'p>>,
    ) -> Handle<'p> {
        let in0 = self.resolve(in0.into());
        let in1 = self.resolve(in1.into());
        let fac = self.resolve(fac.into());
        self.insert(NodeKind::Mix { in0, in1, fac })
    }

    /// Sum of all voices.
    pub fn downmix<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Downmix { input })
    }

    fn oscillator<'p>(
        &'p self,
        waveform: Waveform,
        frequency: Value<'p>,
        duty: Value<'p>,
    ) -> Handle<'p> {
        let frequency = self.resolve(frequency);
        let duty = self.resolve(duty);
        self.insert(NodeKind::Oscillator {
            waveform,
            frequency,
            phase: Input::Number(0.0),
            duty,
        })
    }

    /// Sine oscillator.
    pub fn sine<'p>(&'p self, frequency: impl Into<Value<'p>>) -> Handle<'p> {
        self.oscillator(Waveform::Sine, frequency.into(), Value::Number(0.5))
    }

    /// Saw oscillator.
    pub fn saw<'p>(&'p self, frequency: impl Into<Value<'p>>) -> Handle<'p> {
        self.oscillator(Waveform::Saw, frequency.into(), Value::Number(0.5))
    }

    /// Square oscillator.
    pub fn square<'p>(
        &'p self,
        frequency: impl Into<Value<'p>>,
        duty: impl Into<Value<'p>>,
    ) -> Handle<'p> {
        self.oscillator(Waveform::Square, frequency.into(), duty.into())
    }

    /// White noise following the voices of `voices`.
    pub fn noise<'p>(&'p self, voices: impl Into<Value<'p>>) -> Handle<'p> {
        let voices = self.resolve(voices.into());
        self.insert(NodeKind::Noise { voices })
    }

    /// Held random value per voice.
    pub fn random<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Random { input })
    }

    /// Hysteresis trigger.
    pub fn trigger<'p>(
        &'p self,
        value: impl Into<Value<'p>>,
        on: impl Into<Value<'p>>,
        off: impl Into<Value<'p>>,
    ) -> Handle<'p> {
        let value = self.resolve(value.into());
        let on = self.resolve(on.into());
        let off = self.resolve(off.into());
        self.insert(NodeKind::Trigger { value, on, off })
    }

    /// Seconds since the last trigger.
    pub fn time<'p>(&'p self, voice_trigger: impl Into<Value<'p>>) -> Handle<'p> {
        let voice_trigger = self.resolve(voice_trigger.into());
        self.insert(NodeKind::Time {
            voice_trigger,
            speed: Input::Number(1.0),
        })
    }

    /// Clamp.
    pub fn clip<'p>(
        &'p self,
        value: impl Into<Value<'p>>,
        minimum: impl Into<Value<'p>>,
        maximum: impl Into<Value<'p>>,
    ) -> Handle<'p> {
        let value = self.resolve(value.into());
        let minimum = self.resolve(minimum.into());
        let maximum = self.resolve(maximum.into());
        self.insert(NodeKind::Clip {
            value,
            minimum,
            maximum,
        })
    }

    /// Note number or MIDI stream to Hz.
    pub fn frequency<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Frequency { input })
    }

    /// Ones for each voice.
    pub fn one<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::One { input })
    }

    /// Decibels to gain.
    pub fn db<'p>(&'p self, decibel: impl Into<Value<'p>>) -> Handle<'p> {
        let decibel = self.resolve(decibel.into());
        self.insert(NodeKind::Db { decibel })
    }

    /// Voice splitter.
    pub fn polyphonic<'p>(&'p self, input: impl Into<Value<'p>>, max_voices: usize) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Polyphonic { input, max_voices })
    }

    /// `voices` copies of every input voice, at most `max_voices` alive.
    pub fn unison<'p>(
        &'p self,
        input: impl Into<Value<'p>>,
        voices: usize,
        max_voices: usize,
    ) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Unison {
            input,
            voices,
            max_voices,
        })
    }

    /// Gate-driven voice spawner.
    pub fn spawn<'p>(&'p self, input: impl Into<Value<'p>>) -> Handle<'p> {
        let input = self.resolve(input.into());
        self.insert(NodeKind::Spawn { input })
    }

    /// Audio player.
    pub fn audiofile(&self, clip: Option<Arc<AudioClip>>) -> Handle<'_> {
        self.insert(NodeKind::AudioFile {
            speed: Input::Number(1.0),
            clip,
        })
    }
}

/// A finished, validated set of nodes plus the sinks that seed discovery.
#[derive(Debug, Clone)]
pub struct Network {
    nodes: Vec<Node>,
    terminals: Vec<NodeId>,
}

impl Network {
    /// Node by identity.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index() as usize)
    }

    /// Every node created by the patch, reachable or not.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Terminal nodes in creation order.
    pub fn terminals(&self) -> &[NodeId] {
        &self.terminals
    }
}

// ----------------------------------------------------------------------
// Operators
// ----------------------------------------------------------------------

macro_rules! handle_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<'p, R: Into<Value<'p>>> $trait<R> for Handle<'p> {
            type Output = Handle<'p>;

            fn $method(self, rhs: R) -> Handle<'p> {
                self.patch.math($op, self, rhs)
            }
        }

        impl<'p> $trait<Handle<'p>> for f64 {
            type Output = Handle<'p>;

            fn $method(self, rhs: Handle<'p>) -> Handle<'p> {
                rhs.patch.math($op, self, rhs)
            }
        }
    };
}

handle_op!(Add, add, MathOp::Add);
handle_op!(Sub, sub, MathOp::Sub);
handle_op!(Mul, mul, MathOp::Mul);
handle_op!(Div, div, MathOp::Div);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DataType;

    #[test]
    fn bare_node_input_becomes_default_outlet() {
        let patch = Patch::new();
        let osc = patch.sine(440.0);
        let out = patch.out(osc);
        let (osc, out) = (osc.id(), out.id());
        let network = patch.finish().unwrap();
        let node = network.node(out).unwrap();
        assert_eq!(
            node.inlets()[0].1,
            &Input::Outlet(Outlet {
                node: osc,
                index: 0,
                datatype: DataType::Signal,
            })
        );
    }

    #[test]
    fn resolved_outlets_carry_their_datatype() {
        let patch = Patch::new();
        let voices = patch.polyphonic(patch.midi("keys"), 4);
        let pitch = patch.frequency(voices);
        let tone = patch.sine(pitch);
        let copies = patch.unison(tone, 2, 8);
        let out = patch.out(copies);
        let (pitch, tone, copies, out) = (pitch.id(), tone.id(), copies.id(), out.id());
        let network = patch.finish().unwrap();

        let feed = |id: NodeId| network.node(id).unwrap().inlets()[0].1.outlet().unwrap();
        assert_eq!(feed(pitch).datatype, DataType::Midi);
        assert_eq!(feed(tone).datatype, DataType::Signal);
        assert_eq!(feed(copies).datatype, DataType::Signal);
        assert_eq!(feed(out).datatype, DataType::None);
    }

    #[test]
    fn unnamed_sinks_count_up() {
        let patch = Patch::new();
        patch.out(1.0);
        patch.out(2.0);
        patch.out_named(3.0, "main");
        let network = patch.finish().unwrap();
        let names: Vec<_> = network
            .nodes()
            .iter()
            .filter_map(|n| match n.kind() {
                NodeKind::Out { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["unnamed_0", "unnamed_1", "main"]);
    }

    #[test]
    fn operators_build_math_nodes() {
        let patch = Patch::new();
        let a = patch.sine(1.0);
        let sum = a + 5.0;
        let scaled = 2.0 * sum;
        let cmp = a.gt(scaled);
        assert_eq!(patch.len(), 4);
        let (sum, scaled, cmp) = (sum.id(), scaled.id(), cmp.id());
        let network = patch.finish().unwrap();
        assert_eq!(network.node(sum).unwrap().type_name(), "add");
        assert_eq!(network.node(scaled).unwrap().type_name(), "mul");
        assert_eq!(network.node(cmp).unwrap().type_name(), "gt");
        match network.node(scaled).unwrap().kind() {
            NodeKind::Math { in0, .. } => assert_eq!(in0, &Input::Number(2.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sink_as_input_is_rejected() {
        let patch = Patch::new();
        let inner = patch.out(1.0);
        patch.out(inner);
        let err = patch.finish().unwrap_err();
        assert!(matches!(err, BuildError::NoOutlets { kind: "out", .. }));
    }

    #[test]
    fn duplicate_sink_names_are_rejected() {
        let patch = Patch::new();
        patch.out_named(1.0, "a");
        patch.out_named(2.0, "a");
        assert_eq!(
            patch.finish().unwrap_err(),
            BuildError::DuplicateSinkName("a".into())
        );
    }

    #[test]
    fn self_reference_is_rejected() {
        let patch = Patch::new();
        let a = patch.add(1.0, 2.0);
        patch.set_input(a, "in1", a);
        patch.out(a);
        let a = a.id();
        assert_eq!(
            patch.finish().unwrap_err(),
            BuildError::SelfDependency(a)
        );
    }

    #[test]
    fn handles_from_another_patch_collide() {
        let first = Patch::new();
        let second = Patch::new();
        let foreign = first.sine(1.0);
        second.out(foreign);
        assert!(matches!(
            second.finish().unwrap_err(),
            BuildError::IdentityCollision(_)
        ));
    }

    #[test]
    fn unknown_inlet_is_reported() {
        let patch = Patch::new();
        let osc = patch.sine(1.0);
        patch.set_input(osc, "duty", 0.2);
        assert!(matches!(
            patch.finish().unwrap_err(),
            BuildError::UnknownInlet { kind: "sine", .. }
        ));
    }

    #[test]
    fn named_port_resolves_to_that_outlet() {
        let patch = Patch::new();
        let poly = patch.polyphonic(patch.midi("keys"), 8);
        let osc = patch.sine(poly.port("midi"));
        let bad = patch.sine(poly.port("output"));
        let _ = (osc, bad);
        assert!(matches!(
            patch.finish().unwrap_err(),
            BuildError::UnknownOutlet { kind: "polyphonic", .. }
        ));
    }
}
