//! Per-sample arithmetic: `add sub mul div gt lt`, `mix`, `clip`, `db`,
//! `downmix`.
//!
//! Every rule here is a pure function of its operands at each sample, so they
//! share one kernel, [`elementwise`]. Operands are literals or signals; when
//! all of them are literals the result is computed once into the store and no
//! per-buffer work is emitted.

use std::collections::{BTreeMap, BTreeSet};

use crate::content::{Signal, Slot, Store};
use crate::error::CompileError;
use crate::node::{Input, MathOp, Node};
use crate::voice::{self, VoiceId, is_scalar};

use super::{Compiler, Source};

#[derive(Clone, Copy, Debug)]
enum Operand {
    Constant(f64),
    Signal(Slot),
}

fn operand(c: &Compiler<'_>, node: &Node, input: &Input) -> Result<Operand, CompileError> {
    match c.source(input)? {
        Source::Literal(v) => Ok(Operand::Constant(v)),
        Source::Signal(slot) => Ok(Operand::Signal(slot)),
        Source::Unset | Source::Midi(_) => Err(c.unsupported(node)),
    }
}

/// Output voices for any number of signal operands.
///
/// Pairwise this is the broadcast rule: scalars broadcast over the others, and
/// the rest contribute the union of their voices.
fn broadcast_all(maps: &[&BTreeMap<VoiceId, Vec<f32>>]) -> BTreeSet<VoiceId> {
    let all_scalar = maps.iter().all(|m| is_scalar(*m));
    maps.iter()
        .copied()
        .filter(|m| all_scalar || !is_scalar(*m))
        .flat_map(|m| m.keys().copied())
        .collect()
}

fn signal_maps<'s, const N: usize>(
    store: &'s Store,
    operands: &[Operand; N],
) -> Vec<&'s BTreeMap<VoiceId, Vec<f32>>> {
    operands
        .iter()
        .filter_map(|op| match op {
            Operand::Signal(slot) => Some(&store.signal(*slot).voices),
            Operand::Constant(_) => None,
        })
        .collect()
}

/// Compiles a node whose output at each sample is `f` of its operands.
///
/// A voice missing from one signal operand reads as silence there.
pub(super) fn elementwise<const N: usize>(
    c: &mut Compiler<'_>,
    node: &Node,
    inputs: [&Input; N],
    f: impl Fn([f64; N]) -> f64 + Send + 'static,
) -> Result<(), CompileError> {
    let mut operands = [Operand::Constant(0.0); N];
    for (slot, input) in operands.iter_mut().zip(inputs) {
        *slot = operand(c, node, input)?;
    }
    let n = c.frame_count();

    if operands.iter().all(|op| matches!(op, Operand::Constant(_))) {
        let args = operands.map(|op| match op {
            Operand::Constant(v) => v,
            Operand::Signal(_) => 0.0,
        });
        c.signal_outlet(0, Signal::constant(n, f(args) as f32));
        return Ok(());
    }

    let slot = c.signal_outlet(0, Signal::new());
    c.on_process(move |frame| {
        let mut out = frame.store.take_signal(slot);
        let store = &*frame.store;
        let live = broadcast_all(&signal_maps(store, &operands));
        out.voices.retain(|v, _| live.contains(v));

        for &voice in &live {
            let rows = operands.map(|op| match op {
                Operand::Signal(s) => voice::lookup(&store.signal(s).voices, voice).map(Vec::as_slice),
                Operand::Constant(_) => None,
            });
            let block = out.voice_mut(voice, n);
            for (i, sample) in block.iter_mut().enumerate() {
                let mut args = [0.0; N];
                for (k, arg) in args.iter_mut().enumerate() {
                    *arg = match (operands[k], rows[k]) {
                        (Operand::Constant(v), _) => v,
                        (Operand::Signal(_), Some(row)) => row.get(i).copied().map_or(0.0, f64::from),
                        (Operand::Signal(_), None) => 0.0,
                    };
                }
                *sample = f(args) as f32;
            }
        }
        frame.store.put_signal(slot, out);
    });
    Ok(())
}

/// `add sub mul div gt lt`.
pub(super) fn binary(
    c: &mut Compiler<'_>,
    node: &Node,
    op: MathOp,
    in0: &Input,
    in1: &Input,
) -> Result<(), CompileError> {
    elementwise(c, node, [in0, in1], move |[a, b]| op.apply(a, b))
}

/// Crossfade from `in0` to `in1`. `fac` runs from -1 (all `in0`) to 1 (all
/// `in1`) and is clamped to that range.
pub(super) fn mix(
    c: &mut Compiler<'_>,
    node: &Node,
    in0: &Input,
    in1: &Input,
    fac: &Input,
) -> Result<(), CompileError> {
    elementwise(c, node, [in0, in1, fac], |[a, b, fac]| {
        let t = (fac.clamp(-1.0, 1.0) + 1.0) / 2.0;
        a * (1.0 - t) + b * t
    })
}

/// Clamps `value` to `[minimum, maximum]`.
pub(super) fn clip(
    c: &mut Compiler<'_>,
    node: &Node,
    value: &Input,
    minimum: &Input,
    maximum: &Input,
) -> Result<(), CompileError> {
    elementwise(c, node, [value, minimum, maximum], |[v, lo, hi]| {
        v.max(lo).min(hi)
    })
}

/// Decibels to linear gain.
pub(super) fn db(c: &mut Compiler<'_>, node: &Node, decibel: &Input) -> Result<(), CompileError> {
    elementwise(c, node, [decibel], |[db]| 10f64.powf(db / 20.0))
}

/// Sum of every voice into voice 0.
pub(super) fn downmix(c: &mut Compiler<'_>, node: &Node, input: &Input) -> Result<(), CompileError> {
    let n = c.frame_count();
    match c.source(input)? {
        Source::Literal(v) => {
            c.signal_outlet(0, Signal::constant(n, v as f32));
        }
        Source::Signal(in_slot) => {
            let slot = c.signal_outlet(0, Signal::constant(n, 0.0));
            c.on_process(move |frame| {
                let mixed = frame.store.signal(in_slot).sum(n);
                let mut out = frame.store.take_signal(slot);
                out.voices.clear();
                out.voices.insert(VoiceId::DEFAULT, mixed);
                frame.store.put_signal(slot, out);
            });
        }
        Source::Unset | Source::Midi(_) => return Err(c.unsupported(node)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::compiler::CompileEnv;
    use crate::compiler::testing::{program, run};
    use crate::patch::{Patch, Value};
    use crate::voice::VoiceId;

    fn env() -> CompileEnv {
        CompileEnv::new(48000, 8)
    }

    #[test]
    fn literal_pair_is_constant_on_every_call() {
        let patch = Patch::new();
        patch.out_named(patch.mul(3.0, 4.0), "a");
        let mut p = program(patch, &env());
        for _ in 0..3 {
            let (table, _) = run(&mut p);
            let s = table.signal("a").unwrap();
            assert_eq!(s.voice(VoiceId::DEFAULT), Some(&[12.0; 8][..]));
        }
    }

    #[test]
    fn comparison_yields_one_or_zero() {
        let patch = Patch::new();
        patch.out_named(patch.add(2.0, 0.0).gt(1.0), "gt");
        patch.out_named(patch.add(2.0, 0.0).lt(1.0), "lt");
        let (table, _) = run(&mut program(patch, &env()));
        assert_eq!(table.signal("gt").unwrap().voice(VoiceId::DEFAULT), Some(&[1.0; 8][..]));
        assert_eq!(table.signal("lt").unwrap().voice(VoiceId::DEFAULT), Some(&[0.0; 8][..]));
    }

    #[test]
    fn mix_maps_fac_from_signed_range() {
        let patch = Patch::new();
        patch.out_named(patch.mix(0.0, 1.0, -1.0), "left");
        patch.out_named(patch.mix(0.0, 1.0, 1.0), "right");
        patch.out_named(patch.mix(0.0, 1.0, 0.0), "mid");
        patch.out_named(patch.mix(0.0, 1.0, 7.0), "clamped");
        let (table, _) = run(&mut program(patch, &env()));
        let first = |name: &str| table.signal(name).unwrap().voice(VoiceId::DEFAULT).unwrap()[0];
        assert_eq!(first("left"), 0.0);
        assert_eq!(first("right"), 1.0);
        assert_eq!(first("mid"), 0.5);
        assert_eq!(first("clamped"), 1.0);
    }

    #[test]
    fn clip_and_db() {
        let patch = Patch::new();
        patch.out_named(patch.clip(patch.add(5.0, 0.0), -1.0, 1.0), "clip");
        patch.out_named(patch.db(-20.0), "db");
        let (table, _) = run(&mut program(patch, &env()));
        assert_eq!(table.signal("clip").unwrap().voice(VoiceId::DEFAULT).unwrap()[3], 1.0);
        let db = table.signal("db").unwrap().voice(VoiceId::DEFAULT).unwrap()[0];
        assert!((db - 0.1).abs() < 1e-6);
    }

    #[test]
    fn midi_operand_is_unsupported() {
        let patch = Patch::new();
        let m = patch.midi("default");
        patch.out(patch.add(m, 1.0));
        let network = patch.finish().unwrap();
        let order = crate::execution_order(&crate::build_graph(&network).unwrap());
        let err = crate::compile(&network, &order, &env()).unwrap_err();
        assert!(matches!(err, crate::CompileError::Unsupported { kind: "add", .. }));
    }

    #[test]
    fn unset_operand_is_unsupported() {
        let patch = Patch::new();
        patch.out(patch.add(Value::Unset, 1.0));
        let network = patch.finish().unwrap();
        let order = crate::execution_order(&crate::build_graph(&network).unwrap());
        assert!(crate::compile(&network, &order, &env()).is_err());
    }
}
