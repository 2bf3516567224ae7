//! Worker side of an isolated run: play the patch, stream telemetry on stdout.

use aim_io::{Driver, JsonLines};
use clap::Args;

use super::common::{PatchArgs, PlaybackArgs, load_patch, stop_on_ctrl_c};

#[derive(Args)]
pub struct WorkerArgs {
    #[command(flatten)]
    patch: PatchArgs,

    #[command(flatten)]
    playback: PlaybackArgs,
}

pub fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let loaded = load_patch(&args.patch)?;
    let (program, _midi) = loaded.compile(true)?;
    let driver = Driver::new(stop_on_ctrl_c()?);
    let backend = args.playback.backend.create();
    let options = loaded.driver_options(&args.playback);

    let telemetry = JsonLines::new(std::io::stdout());
    let report = driver.run(backend.as_ref(), program, &options, telemetry, || {})?;
    tracing::info!(
        buffers = report.buffers,
        played = report.played,
        interrupted = report.interrupted,
        "worker done"
    );
    Ok(())
}
