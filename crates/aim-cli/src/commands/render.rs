//! Offline rendering to a WAV file.

use std::path::PathBuf;

use aim_io::render_wav;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::common::{PatchArgs, load_patch};

#[derive(Args)]
pub struct RenderArgs {
    #[command(flatten)]
    patch: PatchArgs,

    /// Output WAV file
    #[arg(short = 'o', long = "out")]
    out: PathBuf,

    /// Length of the render in seconds
    #[arg(long, default_value = "5.0")]
    seconds: f64,

    /// Output attenuation (overrides the patch settings)
    #[arg(long)]
    gain: Option<f32>,

    /// Sink to render; repeat to mix several (default: every sink)
    #[arg(long = "output", value_name = "NAME")]
    outputs: Vec<String>,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        anyhow::bail!("--seconds must be positive, got {}", args.seconds);
    }
    let loaded = load_patch(&args.patch)?;
    let (mut program, _) = loaded.compile(false)?;
    let outputs = loaded.outputs(&args.outputs);
    let gain = args.gain.unwrap_or(loaded.file.settings.gain);

    let frames = (args.seconds * f64::from(loaded.sample_rate)).ceil() as u64;
    let buffers = frames.div_ceil(loaded.frame_count as u64);

    println!("Rendering '{}'", loaded.file.name);
    println!("  Output:   {}", args.out.display());
    println!("  Duration: {:.2}s ({} buffers)", args.seconds, buffers);

    let pb = ProgressBar::new(buffers);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let written = render_wav(
        &mut program,
        &args.out,
        buffers,
        &outputs,
        gain,
        &mut aim_core::Discard,
        |done| pb.set_position(done),
    )?;
    pb.finish_with_message("done");

    println!(
        "Wrote {} frames ({:.2}s)",
        written,
        written as f64 / f64::from(loaded.sample_rate)
    );
    Ok(())
}
