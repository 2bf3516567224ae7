//! WAV reading for `audiofile` nodes and offline rendering of programs.

use std::path::Path;

use aim_core::{AudioClip, Program, Telemetry};
use hound::{SampleFormat, WavReader, WavWriter};

use crate::Result;

/// WAV file specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Number of audio channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample. 32 is written as float.
    pub bits_per_sample: u16,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
        }
    }
}

impl From<hound::WavSpec> for WavSpec {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

impl From<WavSpec> for hound::WavSpec {
    fn from(spec: WavSpec) -> Self {
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: if spec.bits_per_sample == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }
}

/// Reads a WAV file as interleaved f32 samples in `[-1, 1]`.
///
/// Integer samples are scaled by `2^(bits - 1)`.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, WavSpec)> {
    let reader = WavReader::open(path)?;
    let spec = WavSpec::from(reader.spec());

    let samples: Vec<f32> = match reader.spec().sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok((samples, spec))
}

/// Reads a WAV file into an [`AudioClip`], one buffer per channel.
pub fn read_clip<P: AsRef<Path>>(path: P) -> Result<AudioClip> {
    let path = path.as_ref();
    let (samples, spec) = read_wav(path)?;
    let clip = AudioClip::from_interleaved(&samples, usize::from(spec.channels), spec.sample_rate);
    tracing::debug!(
        path = %path.display(),
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        frames = clip.frames(),
        "audio clip read"
    );
    Ok(clip)
}

/// Writes interleaved samples to a WAV file.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], spec: WavSpec) -> Result<()> {
    let mut writer = WavWriter::create(path, hound::WavSpec::from(spec))?;

    if spec.bits_per_sample == 32 {
        for &sample in samples {
            writer.write_sample(sample)?;
        }
    } else {
        let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
        for &sample in samples {
            let int_sample = (sample * max_val).clamp(-max_val, max_val - 1.0) as i32;
            writer.write_sample(int_sample)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Runs `program` for `buffers` buffers and writes the mono mix of the
/// selected sinks (all when `outputs` is empty) to a float WAV file.
///
/// `progress` is called with the number of buffers written so far. Returns
/// the number of frames written.
pub fn render_wav<P: AsRef<Path>>(
    program: &mut Program,
    path: P,
    buffers: u64,
    outputs: &[String],
    gain: f32,
    telemetry: &mut dyn Telemetry,
    mut progress: impl FnMut(u64),
) -> Result<u64> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: program.sample_rate(),
        bits_per_sample: 32,
    };
    let mut writer = WavWriter::create(path.as_ref(), hound::WavSpec::from(spec))?;
    let mut mix = vec![0.0; program.frame_count()];
    let mut frames = 0u64;

    for done in 1..=buffers {
        let table = program.process(telemetry);
        table.mixdown_into(outputs, &mut mix);
        for &sample in &mix {
            writer.write_sample(sample * gain)?;
        }
        frames += mix.len() as u64;
        progress(done);
    }

    writer.finalize()?;
    tracing::info!(path = %path.as_ref().display(), frames, buffers, "render finished");
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_core::{CompileEnv, Discard, Patch, compile_network};
    use tempfile::NamedTempFile;

    #[test]
    fn sixteen_bit_samples_are_scaled_to_unit_range() {
        let file = NamedTempFile::new().unwrap();
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
        };
        write_wav(file.path(), &[0.5, -0.5, 0.25, -1.0], spec).unwrap();

        let clip = read_clip(file.path()).unwrap();
        assert_eq!(clip.sample_rate, 22050);
        assert_eq!(clip.channels.len(), 2);
        assert_eq!(clip.channels[0], [0.5, 0.25]);
        assert_eq!(clip.channels[1], [-0.5, -1.0]);
    }

    #[test]
    fn render_writes_every_buffer() {
        let patch = Patch::new();
        patch.out_named(0.5, "main");
        patch.out_named(0.25, "quiet");
        let network = patch.finish().unwrap();
        let mut program = compile_network(&network, &CompileEnv::new(8000, 100)).unwrap();
        let file = NamedTempFile::new().unwrap();
        let mut seen = Vec::new();

        let frames = render_wav(
            &mut program,
            file.path(),
            3,
            &["main".to_string()],
            0.5,
            &mut Discard,
            |n| seen.push(n),
        )
        .unwrap();

        assert_eq!(frames, 300);
        assert_eq!(seen, [1, 2, 3]);
        let (samples, spec) = read_wav(file.path()).unwrap();
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(samples.len(), 300);
        assert!(samples.iter().all(|&s| s == 0.25));
    }
}
