//! Node vocabulary: identities, outlets, inlet values and the closed set of
//! node kinds.
//!
//! Every node kind declares its inlets and outlets as data. The graph builder
//! walks [`Node::inlets`], the compiler destructures the [`NodeKind`] variant
//! directly, and the config front-end rewires inlets by name through
//! [`Node::inlet_mut`]. Nothing is discovered by inspecting object shape.

use std::fmt;
use std::sync::Arc;

/// Unique identifier for a node within one patch.
///
/// Assigned sequentially by the [`Patch`](crate::Patch) that created the node
/// and never reused. Also used as the `node_id` field of telemetry payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Wraps a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of content an outlet carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// Voice-keyed blocks of `f32` samples.
    Signal,
    /// Voice-keyed lists of timestamped MIDI bytes.
    Midi,
    /// Decided when the node is compiled, from whatever feeds it.
    None,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Signal => "SIGNAL",
            Self::Midi => "MIDI",
            Self::None => "NONE",
        })
    }
}

/// Reference to one outlet of a node.
///
/// This is a back-reference only: the outlet's content is owned by the
/// compiled program, not by whoever holds this value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Outlet {
    /// Node that owns the outlet.
    pub node: NodeId,
    /// Position in the owner's declared outlet list.
    pub index: usize,
    /// Declared datatype. [`DataType::None`] outlets take the type of
    /// whatever feeds their node once it is compiled.
    pub datatype: DataType,
}

/// Value held by an inlet.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Input {
    /// Nothing connected.
    #[default]
    Unset,
    /// A literal number.
    Number(f64),
    /// Another node's outlet.
    Outlet(Outlet),
}

impl Input {
    /// Returns the referenced outlet, if any.
    pub fn outlet(&self) -> Option<Outlet> {
        match self {
            Self::Outlet(o) => Some(*o),
            _ => None,
        }
    }
}

impl From<f64> for Input {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<Outlet> for Input {
    fn from(o: Outlet) -> Self {
        Self::Outlet(o)
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("unset"),
            Self::Number(v) => write!(f, "{v}"),
            Self::Outlet(o) => write!(f, "{}[{}]", o.node, o.index),
        }
    }
}

/// Binary arithmetic and comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MathOp {
    /// `in0 + in1`
    Add,
    /// `in0 - in1`
    Sub,
    /// `in0 * in1`
    Mul,
    /// `in0 / in1`
    Div,
    /// `1.0` where `in0 > in1`, else `0.0`
    Gt,
    /// `1.0` where `in0 < in1`, else `0.0`
    Lt,
}

impl MathOp {
    /// Applies the operator to one pair of samples.
    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Gt => f64::from(u8::from(a > b)),
            Self::Lt => f64::from(u8::from(a < b)),
        }
    }

    /// Node type name for this operator.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Gt => "gt",
            Self::Lt => "lt",
        }
    }
}

/// Decoded audio held in memory for an `audiofile` node.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioClip {
    /// Sample rate the clip was recorded at.
    pub sample_rate: u32,
    /// One buffer per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl AudioClip {
    /// Splits interleaved samples into channels.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut out = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (channel, sample) in out.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self {
            sample_rate,
            channels: out,
        }
    }

    /// Number of frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Oscillator wave shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Waveform {
    /// `sin(2πp)`
    Sine,
    /// Rising ramp from -1 to 1.
    Saw,
    /// `+1` once the phase reaches the duty cycle, else `-1`.
    Square,
}

/// The closed set of node types, each with its own inlet schema.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Named program output.
    Out {
        /// Content to publish.
        input: Input,
        /// Sink name in the output table.
        name: String,
    },
    /// Debug printer for MIDI events or voice-count changes.
    Print {
        /// Watched outlet.
        input: Input,
    },
    /// Edge-triggered capture that streams traces to a listener.
    Oscilloscope {
        /// Signal to capture. Passed through unchanged.
        value: Input,
        /// Capture window in seconds.
        time_div: Input,
        /// Level the signal must reach to start a capture.
        trigger: Input,
        /// Level the signal must drop below before re-arming.
        trigger_low: Input,
    },
    /// MIDI bytes from a registered input port.
    Midi {
        /// Port name.
        device: String,
    },
    /// Arithmetic or comparison.
    Math {
        /// Operator.
        op: MathOp,
        /// Left operand.
        in0: Input,
        /// Right operand.
        in1: Input,
    },
    /// Crossfade between two inputs.
    Mix {
        /// Heard at `fac = -1`.
        in0: Input,
        /// Heard at `fac = 1`.
        in1: Input,
        /// Balance in `[-1, 1]`.
        fac: Input,
    },
    /// Sum of all voices into voice 0.
    Downmix {
        /// Source signal.
        input: Input,
    },
    /// Band-unlimited oscillator.
    Oscillator {
        /// Wave shape.
        waveform: Waveform,
        /// Hz, or a MIDI stream to follow.
        frequency: Input,
        /// Start phase in cycles.
        phase: Input,
        /// Duty cycle. Only read by squares.
        duty: Input,
    },
    /// White noise.
    Noise {
        /// Voice layout to follow. No samples are read.
        voices: Input,
    },
    /// One held random value per voice.
    Random {
        /// Voice layout to follow. No samples are read.
        input: Input,
    },
    /// Hysteresis trigger.
    Trigger {
        /// Watched signal.
        value: Input,
        /// Output rises to 1 at or above this level.
        on: Input,
        /// Output falls to 0 below this level.
        off: Input,
    },
    /// Seconds since the voice was (re)triggered.
    Time {
        /// Rising edges (signal) or note-ons (MIDI) reset the clock.
        voice_trigger: Input,
        /// Rate at which time passes.
        speed: Input,
    },
    /// Clamp.
    Clip {
        /// Signal to clamp.
        value: Input,
        /// Lower bound.
        minimum: Input,
        /// Upper bound.
        maximum: Input,
    },
    /// MIDI note to Hz.
    Frequency {
        /// Note number (literal or signal) or MIDI stream.
        input: Input,
    },
    /// Ones for every voice of the input.
    One {
        /// Voice layout to follow.
        input: Input,
    },
    /// Decibels to linear gain.
    Db {
        /// Level in dB.
        decibel: Input,
    },
    /// Splits a MIDI stream into one voice per held key.
    Polyphonic {
        /// MIDI stream. Only voice 0 is read.
        input: Input,
        /// Limit of simultaneously held voices.
        max_voices: usize,
    },
    /// Replicates each incoming voice.
    Unison {
        /// Literal or outlet to copy.
        input: Input,
        /// Copies per source voice.
        voices: usize,
        /// Limit of live output voices.
        max_voices: usize,
    },
    /// Spawns a voice while voice 0 of the input stays above zero.
    Spawn {
        /// Gate signal.
        input: Input,
    },
    /// In-memory audio player.
    AudioFile {
        /// Playback speed. Negative plays backwards.
        speed: Input,
        /// Decoded audio, if any.
        clip: Option<Arc<AudioClip>>,
    },
}

const SIGNAL_OUT: &[(&str, DataType)] = &[("output", DataType::Signal)];
const MIDI_OUT: &[(&str, DataType)] = &[("midi", DataType::Midi)];
const DYNAMIC_OUT: &[(&str, DataType)] = &[("output", DataType::None)];
const NO_OUT: &[(&str, DataType)] = &[];

/// Every type name accepted by [`NodeKind::from_type_name`].
pub const TYPE_NAMES: &[&str] = &[
    "out",
    "print",
    "oscilloscope",
    "midi",
    "add",
    "sub",
    "mul",
    "div",
    "gt",
    "lt",
    "mix",
    "downmix",
    "sine",
    "saw",
    "square",
    "noise",
    "random",
    "trigger",
    "time",
    "clip",
    "frequency",
    "one",
    "db",
    "polyphonic",
    "unison",
    "spawn",
    "audiofile",
];

impl NodeKind {
    /// Creates a node of the given type with every inlet at its default.
    ///
    /// Sink names are left empty; the patch assigns one when the node is
    /// inserted.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let num = Input::Number;
        let math = |op| Self::Math {
            op,
            in0: Input::Unset,
            in1: Input::Unset,
        };
        let osc = |waveform| Self::Oscillator {
            waveform,
            frequency: num(440.0),
            phase: num(0.0),
            duty: num(0.5),
        };
        Some(match name {
            "out" => Self::Out {
                input: Input::Unset,
                name: String::new(),
            },
            "print" => Self::Print {
                input: Input::Unset,
            },
            "oscilloscope" => Self::Oscilloscope {
                value: num(0.0),
                time_div: num(0.01),
                trigger: num(0.1),
                trigger_low: Input::Unset,
            },
            "midi" => Self::Midi {
                device: "default".to_string(),
            },
            "add" => math(MathOp::Add),
            "sub" => math(MathOp::Sub),
            "mul" => math(MathOp::Mul),
            "div" => math(MathOp::Div),
            "gt" => math(MathOp::Gt),
            "lt" => math(MathOp::Lt),
            "mix" => Self::Mix {
                in0: Input::Unset,
                in1: Input::Unset,
                fac: num(0.5),
            },
            "downmix" => Self::Downmix {
                input: Input::Unset,
            },
            "sine" => osc(Waveform::Sine),
            "saw" => osc(Waveform::Saw),
            "square" => osc(Waveform::Square),
            "noise" => Self::Noise {
                voices: Input::Unset,
            },
            "random" => Self::Random {
                input: Input::Unset,
            },
            "trigger" => Self::Trigger {
                value: num(0.0),
                on: num(0.5),
                off: num(0.5),
            },
            "time" => Self::Time {
                voice_trigger: num(0.0),
                speed: num(1.0),
            },
            "clip" => Self::Clip {
                value: num(0.0),
                minimum: num(-1.0),
                maximum: num(1.0),
            },
            "frequency" => Self::Frequency { input: num(0.0) },
            "one" => Self::One {
                input: Input::Unset,
            },
            "db" => Self::Db { decibel: num(0.0) },
            "polyphonic" => Self::Polyphonic {
                input: Input::Unset,
                max_voices: 32,
            },
            "unison" => Self::Unison {
                input: num(0.0),
                voices: 1,
                max_voices: 32,
            },
            "spawn" => Self::Spawn {
                input: Input::Unset,
            },
            "audiofile" => Self::AudioFile {
                speed: num(1.0),
                clip: None,
            },
            _ => return None,
        })
    }

    /// Stable type name, as used in patch files and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Out { .. } => "out",
            Self::Print { .. } => "print",
            Self::Oscilloscope { .. } => "oscilloscope",
            Self::Midi { .. } => "midi",
            Self::Math { op, .. } => op.type_name(),
            Self::Mix { .. } => "mix",
            Self::Downmix { .. } => "downmix",
            Self::Oscillator { waveform, .. } => match waveform {
                Waveform::Sine => "sine",
                Waveform::Saw => "saw",
                Waveform::Square => "square",
            },
            Self::Noise { .. } => "noise",
            Self::Random { .. } => "random",
            Self::Trigger { .. } => "trigger",
            Self::Time { .. } => "time",
            Self::Clip { .. } => "clip",
            Self::Frequency { .. } => "frequency",
            Self::One { .. } => "one",
            Self::Db { .. } => "db",
            Self::Polyphonic { .. } => "polyphonic",
            Self::Unison { .. } => "unison",
            Self::Spawn { .. } => "spawn",
            Self::AudioFile { .. } => "audiofile",
        }
    }

    /// Declared outlets in ordinal order.
    pub fn outlets(&self) -> &'static [(&'static str, DataType)] {
        match self {
            Self::Out { .. } | Self::Print { .. } => NO_OUT,
            Self::Midi { .. } | Self::Polyphonic { .. } => MIDI_OUT,
            Self::Unison { .. } => DYNAMIC_OUT,
            _ => SIGNAL_OUT,
        }
    }

    /// Whether nodes of this kind seed graph discovery.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Out { .. } | Self::Print { .. } | Self::Oscilloscope { .. }
        )
    }

    /// Inlets in declaration order.
    pub fn inlets(&self) -> Vec<(&'static str, &Input)> {
        match self {
            Self::Out { input, .. }
            | Self::Print { input }
            | Self::Downmix { input }
            | Self::Random { input }
            | Self::Frequency { input }
            | Self::One { input }
            | Self::Polyphonic { input, .. }
            | Self::Spawn { input } => vec![("input", input)],
            Self::Unison { input, .. } => vec![("input", input)],
            Self::Oscilloscope {
                value,
                time_div,
                trigger,
                trigger_low,
            } => vec![
                ("value", value),
                ("time_div", time_div),
                ("trigger", trigger),
                ("trigger_low", trigger_low),
            ],
            Self::Midi { .. } => Vec::new(),
            Self::Math { in0, in1, .. } => vec![("in0", in0), ("in1", in1)],
            Self::Mix { in0, in1, fac } => vec![("in0", in0), ("in1", in1), ("fac", fac)],
            Self::Oscillator {
                waveform: Waveform::Square,
                frequency,
                phase,
                duty,
            } => vec![("frequency", frequency), ("duty", duty), ("phase", phase)],
            Self::Oscillator {
                frequency, phase, ..
            } => vec![("frequency", frequency), ("phase", phase)],
            Self::Noise { voices } => vec![("voices", voices)],
            Self::Trigger { value, on, off } => vec![("value", value), ("on", on), ("off", off)],
            Self::Time {
                voice_trigger,
                speed,
            } => vec![("voice_trigger", voice_trigger), ("speed", speed)],
            Self::Clip {
                value,
                minimum,
                maximum,
            } => vec![("value", value), ("minimum", minimum), ("maximum", maximum)],
            Self::Db { decibel } => vec![("decibel", decibel)],
            Self::AudioFile { speed, .. } => vec![("speed", speed)],
        }
    }

    /// Mutable access to one inlet by name.
    pub fn inlet_mut(&mut self, name: &str) -> Option<&mut Input> {
        match (self, name) {
            (
                Self::Out { input, .. }
                | Self::Print { input }
                | Self::Downmix { input }
                | Self::Random { input }
                | Self::Frequency { input }
                | Self::One { input }
                | Self::Polyphonic { input, .. }
                | Self::Unison { input, .. }
                | Self::Spawn { input },
                "input",
            ) => Some(input),
            (Self::Oscilloscope { value, .. }, "value") => Some(value),
            (Self::Oscilloscope { time_div, .. }, "time_div") => Some(time_div),
            (Self::Oscilloscope { trigger, .. }, "trigger") => Some(trigger),
            (Self::Oscilloscope { trigger_low, .. }, "trigger_low") => Some(trigger_low),
            (Self::Math { in0, .. } | Self::Mix { in0, .. }, "in0") => Some(in0),
            (Self::Math { in1, .. } | Self::Mix { in1, .. }, "in1") => Some(in1),
            (Self::Mix { fac, .. }, "fac") => Some(fac),
            (Self::Oscillator { frequency, .. }, "frequency") => Some(frequency),
            (Self::Oscillator { phase, .. }, "phase") => Some(phase),
            (
                Self::Oscillator {
                    waveform: Waveform::Square,
                    duty,
                    ..
                },
                "duty",
            ) => Some(duty),
            (Self::Noise { voices }, "voices") => Some(voices),
            (Self::Trigger { value, .. } | Self::Clip { value, .. }, "value") => Some(value),
            (Self::Trigger { on, .. }, "on") => Some(on),
            (Self::Trigger { off, .. }, "off") => Some(off),
            (Self::Time { voice_trigger, .. }, "voice_trigger") => Some(voice_trigger),
            (Self::Time { speed, .. } | Self::AudioFile { speed, .. }, "speed") => Some(speed),
            (Self::Clip { minimum, .. }, "minimum") => Some(minimum),
            (Self::Clip { maximum, .. }, "maximum") => Some(maximum),
            (Self::Db { decibel }, "decibel") => Some(decibel),
            _ => None,
        }
    }
}

/// A node: identity plus kind.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// This node's identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// This node's kind and inlet values.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Stable type name.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Inlets in declaration order.
    pub fn inlets(&self) -> Vec<(&'static str, &Input)> {
        self.kind.inlets()
    }

    /// Declared outlets in ordinal order.
    pub fn outlets(&self) -> &'static [(&'static str, DataType)] {
        self.kind.outlets()
    }

    /// The first declared outlet, used when the bare node is an input.
    pub fn default_outlet(&self) -> Option<Outlet> {
        self.outlets().first().map(|&(_, datatype)| Outlet {
            node: self.id,
            index: 0,
            datatype,
        })
    }

    /// Outlet by name.
    pub fn outlet(&self, name: &str) -> Option<Outlet> {
        self.outlets()
            .iter()
            .enumerate()
            .find(|(_, (n, _))| *n == name)
            .map(|(index, &(_, datatype))| Outlet {
                node: self.id,
                index,
                datatype,
            })
    }

    /// Declared datatype of one of this node's outlets.
    pub fn outlet_type(&self, index: usize) -> Option<DataType> {
        self.outlets().get(index).map(|(_, t)| *t)
    }

    /// `\tname: value` lines for every inlet, as used in compile errors.
    pub fn describe_inlets(&self) -> String {
        self.inlets()
            .iter()
            .map(|(name, value)| format!("\t{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
