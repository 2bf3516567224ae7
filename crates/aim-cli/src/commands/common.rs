//! Shared CLI helpers used across multiple commands.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aim_config::PatchFile;
use aim_core::{CompileEnv, Network, NodeId, NodeKind, Program, build_graph, compile, execution_order};
use aim_io::{AudioBackend, CpalBackend, DriverOptions, MidiInput, NullBackend};
use clap::{Args, ValueEnum};

/// Patch file plus the settings flags that override it.
#[derive(Args, Clone, Debug)]
pub struct PatchArgs {
    /// Patch file (TOML)
    pub patch: PathBuf,

    /// Sample rate in Hz (overrides the patch settings)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Frames per buffer (overrides the patch settings)
    #[arg(long)]
    pub frame_count: Option<usize>,

    /// Seed for noise and random nodes
    #[arg(long)]
    pub seed: Option<u64>,
}

impl PatchArgs {
    /// The same flags as command-line arguments, for a worker process.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = vec![self.patch.clone().into_os_string()];
        if let Some(sr) = self.sample_rate {
            args.extend(["--sample-rate".into(), sr.to_string().into()]);
        }
        if let Some(fc) = self.frame_count {
            args.extend(["--frame-count".into(), fc.to_string().into()]);
        }
        if let Some(seed) = self.seed {
            args.extend(["--seed".into(), seed.to_string().into()]);
        }
        args
    }
}

/// Audio backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// The system audio host
    Cpal,
    /// No device; buffers are consumed in real time and discarded
    Null,
}

impl BackendKind {
    /// Create the backend.
    pub fn create(self) -> Box<dyn AudioBackend> {
        match self {
            Self::Cpal => Box::new(CpalBackend::new()),
            Self::Null => Box::new(NullBackend::new()),
        }
    }

    fn as_arg(self) -> &'static str {
        match self {
            Self::Cpal => "cpal",
            Self::Null => "null",
        }
    }
}

/// Playback flags shared by `run` and `worker`.
#[derive(Args, Clone, Debug)]
pub struct PlaybackArgs {
    /// Output device name (partial match)
    #[arg(long)]
    pub device: Option<String>,

    /// Output attenuation (overrides the patch settings)
    #[arg(long)]
    pub gain: Option<f32>,

    /// Sink to play; repeat to mix several (default: every sink)
    #[arg(long = "output", value_name = "NAME")]
    pub outputs: Vec<String>,

    /// Stop after this many buffers
    #[arg(long)]
    pub buffers: Option<u64>,

    /// Audio backend
    #[arg(long, value_enum, default_value_t = BackendKind::Cpal)]
    pub backend: BackendKind,
}

impl PlaybackArgs {
    /// The same flags as command-line arguments, for a worker process.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(device) = &self.device {
            args.extend(["--device".into(), device.into()]);
        }
        if let Some(gain) = self.gain {
            args.extend(["--gain".into(), gain.to_string().into()]);
        }
        for output in &self.outputs {
            args.extend(["--output".into(), output.into()]);
        }
        if let Some(buffers) = self.buffers {
            args.extend(["--buffers".into(), buffers.to_string().into()]);
        }
        args.extend(["--backend".into(), self.backend.as_arg().into()]);
        args
    }
}

/// A patch file that has been built and scheduled.
pub struct LoadedPatch {
    /// The file as loaded.
    pub file: PatchFile,
    /// The constructed network.
    pub network: Network,
    /// Execution order of every reachable node.
    pub order: Vec<NodeId>,
    /// Effective sample rate.
    pub sample_rate: u32,
    /// Effective frames per buffer.
    pub frame_count: usize,
    /// Effective seed.
    pub seed: Option<u64>,
}

/// Load, build and schedule a patch, applying flag overrides.
pub fn load_patch(args: &PatchArgs) -> anyhow::Result<LoadedPatch> {
    let file = PatchFile::load(&args.patch)?;
    let network = file.build_with(&mut |path: &std::path::Path| {
        aim_io::read_clip(path)
            .map(Arc::new)
            .map_err(|e| e.to_string())
    })?;
    let graph = build_graph(&network)?;
    let order = execution_order(&graph);
    tracing::debug!(patch = %file.name, nodes = order.len(), "patch scheduled");

    let sample_rate = args.sample_rate.unwrap_or(file.settings.sample_rate);
    let frame_count = args.frame_count.unwrap_or(file.settings.frame_count);
    let seed = args.seed.or(file.settings.seed);
    Ok(LoadedPatch {
        file,
        network,
        order,
        sample_rate,
        frame_count,
        seed,
    })
}

impl LoadedPatch {
    /// Device names of every scheduled `midi` node, without repeats.
    pub fn midi_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .order
            .iter()
            .filter_map(|&id| match self.network.node(id)?.kind() {
                NodeKind::Midi { device } => Some(device.clone()),
                _ => None,
            })
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }

    /// Compile the scheduled network.
    ///
    /// With `connect_midi`, every `midi` node's device is opened first. A
    /// device that cannot be opened is reported and its nodes stay silent.
    pub fn compile(&self, connect_midi: bool) -> anyhow::Result<(Program, Vec<MidiInput>)> {
        let mut env = CompileEnv::new(self.sample_rate, self.frame_count);
        if let Some(seed) = self.seed {
            env = env.with_seed(seed);
        }
        let mut inputs = Vec::new();
        if connect_midi {
            for device in self.midi_devices() {
                match MidiInput::connect(&device) {
                    Ok((input, port)) => {
                        env = env.with_midi_port(device, port);
                        inputs.push(input);
                    }
                    Err(e) => tracing::warn!(device = %device, error = %e, "MIDI input unavailable"),
                }
            }
        }
        let program = compile(&self.network, &self.order, &env)?;
        tracing::info!(
            patch = %self.file.name,
            nodes = self.order.len(),
            sample_rate = self.sample_rate,
            frame_count = self.frame_count,
            "patch compiled"
        );
        Ok((program, inputs))
    }

    /// Sinks to play: the flags when given, else the patch settings.
    pub fn outputs(&self, flags: &[String]) -> Vec<String> {
        if flags.is_empty() {
            self.file.settings.outputs.clone()
        } else {
            flags.to_vec()
        }
    }

    /// Driver options for `playback`.
    pub fn driver_options(&self, playback: &PlaybackArgs) -> DriverOptions {
        DriverOptions {
            device: playback.device.clone(),
            gain: playback.gain.unwrap_or(self.file.settings.gain),
            outputs: self.outputs(&playback.outputs),
            buffers: playback.buffers,
            ..DriverOptions::default()
        }
    }
}

/// Install a Ctrl+C handler that raises the returned flag.
pub fn stop_on_ctrl_c() -> anyhow::Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let s = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        s.store(true, Ordering::SeqCst);
    })?;
    Ok(stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_arguments_carry_every_override() {
        let patch = PatchArgs {
            patch: PathBuf::from("song.toml"),
            sample_rate: Some(44100),
            frame_count: None,
            seed: Some(9),
        };
        let playback = PlaybackArgs {
            device: None,
            gain: Some(0.5),
            outputs: vec!["a".into(), "b".into()],
            buffers: Some(10),
            backend: BackendKind::Null,
        };
        let mut args = patch.to_args();
        args.extend(playback.to_args());
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "song.toml",
                "--sample-rate",
                "44100",
                "--seed",
                "9",
                "--gain",
                "0.5",
                "--output",
                "a",
                "--output",
                "b",
                "--buffers",
                "10",
                "--backend",
                "null",
            ]
        );
    }
}
