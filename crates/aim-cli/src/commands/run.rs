//! Play a patch in this process or in an isolated worker.

use std::ffi::OsString;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use aim_io::{ChannelTelemetry, Dispatcher, Driver, ListenerRegistry, ReaderExit, Worker};
use clap::Args;
use crossbeam_channel::unbounded;

use super::common::{LoadedPatch, PatchArgs, PlaybackArgs, load_patch, stop_on_ctrl_c};

const POLL: Duration = Duration::from_millis(20);
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    patch: PatchArgs,

    #[command(flatten)]
    playback: PlaybackArgs,

    /// Compute and play in a separate `aim worker` process
    #[arg(long)]
    isolated: bool,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let loaded = load_patch(&args.patch)?;
    let registry = ListenerRegistry::for_schedule(&loaded.network, &loaded.order);

    println!("Playing '{}'", loaded.file.name);
    println!("  Sample rate: {} Hz", loaded.sample_rate);
    println!("  Buffer size: {} frames", loaded.frame_count);
    println!("  Listeners:   {}", registry.len());
    println!("\nPress Ctrl+C to stop...\n");

    if args.isolated {
        run_isolated(&args, registry)
    } else {
        run_in_process(&args, &loaded, registry)
    }
}

fn run_in_process(
    args: &RunArgs,
    loaded: &LoadedPatch,
    registry: ListenerRegistry,
) -> anyhow::Result<()> {
    let (program, _midi) = loaded.compile(true)?;
    let (telemetry, rx) = ChannelTelemetry::new();
    let mut dispatcher = Dispatcher::new(registry, rx);
    let driver = Driver::new(stop_on_ctrl_c()?);
    let backend = args.playback.backend.create();
    let options = loaded.driver_options(&args.playback);

    let report = driver.run(backend.as_ref(), program, &options, telemetry, || {
        dispatcher.drain();
    })?;

    let stats = dispatcher.stats();
    println!(
        "Played {} of {} buffers ({} telemetry messages)",
        report.played, report.buffers, stats.delivered
    );
    Ok(())
}

fn run_isolated(args: &RunArgs, registry: ListenerRegistry) -> anyhow::Result<()> {
    let stop = stop_on_ctrl_c()?;
    let mut worker_args: Vec<OsString> = vec!["worker".into()];
    worker_args.extend(args.patch.to_args());
    worker_args.extend(args.playback.to_args());

    let (tx, rx) = unbounded();
    let mut worker = Worker::spawn(std::env::current_exe()?, worker_args, tx)?;
    let mut dispatcher = Dispatcher::new(registry, rx);

    // The channel closes at end of output or at the first malformed line.
    while dispatcher.run_for(POLL) {
        if stop.load(Ordering::SeqCst) || worker.try_wait()?.is_some() {
            break;
        }
    }
    if !stop.load(Ordering::SeqCst) && worker.telemetry_finished() {
        let deadline = Instant::now() + EXIT_GRACE;
        while worker.try_wait()?.is_none() && Instant::now() < deadline {
            std::thread::sleep(POLL);
        }
    }
    let exit = worker.stop()?;
    dispatcher.drain();

    let stats = dispatcher.stats();
    println!(
        "Worker finished after {} buffers ({} telemetry messages)",
        stats.heartbeats, stats.delivered
    );
    match exit.telemetry {
        ReaderExit::Eof => {}
        ReaderExit::Malformed(line) => {
            anyhow::bail!("worker sent malformed telemetry: {line}");
        }
        other => tracing::warn!(reader = ?other, "telemetry reader ended early"),
    }
    if !exit.killed && !exit.status.success() {
        anyhow::bail!("worker exited with {}", exit.status);
    }
    Ok(())
}
