//! Integration tests for aim-io: programs driven end to end with listeners.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use aim_core::{CompileEnv, Patch, Program, VoiceId, build_graph, compile_network, execution_order};
use aim_io::{
    ChannelTelemetry, Dispatcher, Driver, DriverOptions, JsonLines, ListenerRegistry, NullBackend,
    ReaderExit, forward_lines,
};
use crossbeam_channel::unbounded;

const SAMPLE_RATE: u32 = 8000;
const FRAMES: usize = 256;

/// A 100 Hz saw watched by one oscilloscope, plus a plain output.
fn scoped_program() -> (Program, ListenerRegistry) {
    let patch = Patch::new();
    let saw = patch.saw(100.0);
    let scope = patch.oscilloscope(saw, 0.01);
    patch.out_named(scope * 0.5, "main");
    let network = patch.finish().unwrap();
    let order = execution_order(&build_graph(&network).unwrap());
    let registry = ListenerRegistry::for_schedule(&network, &order);
    let program = compile_network(&network, &CompileEnv::new(SAMPLE_RATE, FRAMES)).unwrap();
    (program, registry)
}

#[test]
fn in_process_run_delivers_scope_traces() {
    let (program, registry) = scoped_program();
    assert_eq!(registry.len(), 1);
    let (telemetry, rx) = ChannelTelemetry::new();
    let mut dispatcher = Dispatcher::new(registry, rx);
    let driver = Driver::new(Arc::new(AtomicBool::new(false)));
    let options = DriverOptions {
        buffers: Some(6),
        outputs: vec!["main".into()],
        ..DriverOptions::default()
    };

    let report = driver
        .run(&NullBackend::new(), program, &options, telemetry, || {
            dispatcher.drain();
        })
        .unwrap();

    assert_eq!(report.buffers, 6);
    let stats = dispatcher.stats();
    assert_eq!(stats.heartbeats, 6);
    assert!(stats.delivered > 0);
    assert_eq!(stats.unrouted, 0);

    let node = dispatcher.registry().nodes().next().unwrap();
    let snapshot = dispatcher.registry().get(node).unwrap().snapshot();
    // 10 ms at 8 kHz.
    assert_eq!(snapshot["voices"][VoiceId::DEFAULT.0.to_string()], 80);
}

#[test]
fn json_lines_carry_the_same_messages_as_the_channel() {
    let (mut program, registry) = scoped_program();
    let mut lines = JsonLines::new(Vec::new());
    for _ in 0..4 {
        program.process(&mut lines);
    }
    assert!(!lines.is_broken());
    let bytes = lines.into_inner();

    let (tx, rx) = unbounded();
    assert_eq!(forward_lines(&mut bytes.as_slice(), &tx), ReaderExit::Eof);
    drop(tx);
    let mut dispatcher = Dispatcher::new(registry, rx);
    dispatcher.drain();

    let (mut twin, _) = scoped_program();
    let mut direct: Vec<aim_core::Message> = Vec::new();
    for _ in 0..4 {
        twin.process(&mut direct);
    }
    let payloads = direct
        .iter()
        .filter(|m| matches!(m, aim_core::Message::Payload { .. }))
        .count() as u64;
    assert_eq!(dispatcher.stats().heartbeats, 4);
    assert_eq!(dispatcher.stats().delivered, payloads);
}

#[test]
fn malformed_telemetry_leaves_the_program_running() {
    let (mut program, _) = scoped_program();
    let mut lines = JsonLines::new(Vec::new());
    program.process(&mut lines);
    let mut bytes = lines.into_inner();
    bytes.extend_from_slice(b"{truncated\n");

    let (tx, rx) = unbounded();
    let exit = forward_lines(&mut bytes.as_slice(), &tx);
    assert!(matches!(exit, ReaderExit::Malformed(_)));
    assert!(rx.try_iter().count() >= 1);

    // The producing side is unaffected.
    let table = program.process(&mut aim_core::Discard);
    assert_eq!(table.mixdown(&[], FRAMES).len(), FRAMES);
    assert_eq!(program.buffers_processed(), 2);
}
