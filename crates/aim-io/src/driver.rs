//! In-process runtime driver.
//!
//! [`Driver::run`] plays a compiled [`Program`] through an [`AudioBackend`]:
//!
//! ```text
//! compute thread:  process() -> TableHandoff::publish -> telemetry sink
//! audio callback:  TableHandoff::take -> AudioSink -> TableHandoff::retire
//! calling thread:  polls the stop flag and sink status, runs `on_idle`
//! ```
//!
//! The run ends when the stop flag is raised, when a buffer limit is reached
//! and the last table has played, or on a fatal stream condition (underflow
//! or backend error). In every case the stream is stopped explicitly and the
//! compute thread is joined before `run` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aim_core::{Program, Telemetry};

use crate::backend::{AudioBackend, BackendStreamConfig};
use crate::handoff::TableHandoff;
use crate::playback::{AudioSink, DEFAULT_GAIN, SinkStatus};
use crate::{Error, Result};

const POLL: Duration = Duration::from_millis(5);

/// Settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// Output device name filter, `None` for the default device.
    pub device: Option<String>,
    /// Device channel count. The mono mix is copied to each.
    pub channels: u16,
    /// Attenuation applied to the mix.
    pub gain: f32,
    /// Sinks to play. Empty plays every sink.
    pub outputs: Vec<String>,
    /// Stop after this many buffers. `None` runs until stopped.
    pub buffers: Option<u64>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            device: None,
            channels: 2,
            gain: DEFAULT_GAIN,
            outputs: Vec::new(),
            buffers: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Buffers the program produced.
    pub buffers: u64,
    /// Tables the audio callback played from.
    pub played: u64,
    /// True when the stop flag ended the run.
    pub interrupted: bool,
}

/// Plays programs until done or stopped.
#[derive(Debug, Clone)]
pub struct Driver {
    stop: Arc<AtomicBool>,
}

impl Driver {
    /// Creates a driver that watches `stop`.
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }

    /// The stop flag this driver watches.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Runs `program` to completion.
    ///
    /// The first buffer is computed before the stream starts. `telemetry`
    /// receives every message on the compute thread. `on_idle` runs on the
    /// calling thread between status polls and once more after shutdown,
    /// which is where a caller drains its [`Dispatcher`](crate::Dispatcher).
    pub fn run<T, F>(
        &self,
        backend: &dyn AudioBackend,
        mut program: Program,
        options: &DriverOptions,
        mut telemetry: T,
        mut on_idle: F,
    ) -> Result<RunReport>
    where
        T: Telemetry + Send + 'static,
        F: FnMut(),
    {
        let handoff = Arc::new(TableHandoff::new());
        let status = Arc::new(SinkStatus::new());
        let halt = Arc::new(AtomicBool::new(false));
        let frame_count = program.frame_count();
        let config = BackendStreamConfig {
            sample_rate: program.sample_rate(),
            buffer_size: frame_count as u32,
            channels: options.channels,
            device_name: options.device.clone(),
        };

        let first = program.process(&mut telemetry);
        if handoff.publish(first).is_err() {
            return Err(Error::Stream("handoff rejected the first buffer".into()));
        }
        let limit = options.buffers;
        if limit.is_some_and(|n| program.buffers_processed() >= n) {
            handoff.close();
        }

        let compute = {
            let handoff = Arc::clone(&handoff);
            let halt = Arc::clone(&halt);
            std::thread::Builder::new()
                .name("aim-compute".into())
                .spawn(move || {
                    while !halt.load(Ordering::SeqCst) && !handoff.is_closed() {
                        handoff.reclaim();
                        if !handoff.wait_for_room(POLL * 4) {
                            continue;
                        }
                        let table = program.process(&mut telemetry);
                        if handoff.publish(table).is_err() {
                            break;
                        }
                        if limit.is_some_and(|n| program.buffers_processed() >= n) {
                            handoff.close();
                        }
                    }
                    program.buffers_processed()
                })?
        };

        let sink = AudioSink::new(
            Arc::clone(&handoff),
            Arc::clone(&status),
            options.outputs.clone(),
            options.gain,
            options.channels,
            frame_count,
        );
        let error_status = Arc::clone(&status);
        let stream = backend.build_output_stream(
            &config,
            sink.into_callback(),
            Box::new(move |message| {
                tracing::error!(error = message, "output stream error");
                error_status.fail();
            }),
        );
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                halt.store(true, Ordering::SeqCst);
                let _ = compute.join();
                return Err(e);
            }
        };
        tracing::info!(
            backend = backend.name(),
            frame_count,
            sample_rate = config.sample_rate,
            "playback started"
        );

        let mut interrupted = false;
        loop {
            on_idle();
            if self.stop.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            if status.is_done() {
                break;
            }
            std::thread::sleep(POLL);
        }

        halt.store(true, Ordering::SeqCst);
        stream.stop();
        tracing::debug!("output stream stopped");
        let buffers = compute
            .join()
            .map_err(|_| Error::Stream("compute thread panicked".into()))?;
        on_idle();

        let report = RunReport {
            buffers,
            played: status.tables(),
            interrupted,
        };
        tracing::info!(buffers, played = report.played, interrupted, "playback finished");

        if status.is_failed() {
            return Err(Error::Stream("the output stream reported an error".into()));
        }
        if status.is_underflow() && !interrupted {
            tracing::error!(played = report.played, "audio underflow");
            return Err(Error::Underflow(report.played));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullBackend;
    use crate::backend::{ErrorCallback, OutputCallback, StreamHandle};
    use aim_core::{CompileEnv, Discard, Message, Patch, compile_network};

    fn program(frame_count: usize) -> Program {
        let patch = Patch::new();
        patch.out_named(1.0, "main");
        let network = patch.finish().unwrap();
        compile_network(&network, &CompileEnv::new(8000, frame_count)).unwrap()
    }

    /// Backend whose streams never open.
    struct FailingBackend;

    impl AudioBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }
        fn list_devices(&self) -> Result<Vec<crate::AudioDevice>> {
            Ok(Vec::new())
        }
        fn default_output_device(&self) -> Result<Option<crate::AudioDevice>> {
            Ok(None)
        }
        fn build_output_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: OutputCallback,
            _error_callback: ErrorCallback,
        ) -> Result<StreamHandle> {
            Err(Error::NoDevice)
        }
    }

    #[test]
    fn limited_run_plays_every_buffer_then_finishes() {
        let driver = Driver::new(Arc::new(AtomicBool::new(false)));
        let options = DriverOptions {
            buffers: Some(4),
            ..DriverOptions::default()
        };
        let report = driver
            .run(&NullBackend::new(), program(256), &options, Discard, || {})
            .unwrap();
        assert_eq!(report.buffers, 4);
        assert_eq!(report.played, 4);
        assert!(!report.interrupted);
    }

    #[test]
    fn stop_flag_interrupts_an_endless_run() {
        let stop = Arc::new(AtomicBool::new(false));
        let driver = Driver::new(Arc::clone(&stop));
        let mut polls = 0;
        let report = driver
            .run(&NullBackend::new(), program(256), &DriverOptions::default(), Discard, || {
                polls += 1;
                if polls == 3 {
                    stop.store(true, Ordering::SeqCst);
                }
            })
            .unwrap();
        assert!(report.interrupted);
        assert!(report.buffers >= 1);
    }

    #[test]
    fn telemetry_reaches_the_sink_from_the_compute_thread() {
        let driver = Driver::new(Arc::new(AtomicBool::new(false)));
        let options = DriverOptions {
            buffers: Some(3),
            ..DriverOptions::default()
        };
        let (telemetry, rx) = crate::ChannelTelemetry::new();
        driver
            .run(&NullBackend::new(), program(256), &options, telemetry, || {})
            .unwrap();
        let heartbeats = rx.try_iter().filter(|m| *m == Message::HEARTBEAT).count();
        assert_eq!(heartbeats, 3);
    }

    #[test]
    fn stream_failure_is_returned_after_joining() {
        let driver = Driver::new(Arc::new(AtomicBool::new(false)));
        let err = driver
            .run(&FailingBackend, program(64), &DriverOptions::default(), Discard, || {})
            .unwrap_err();
        assert!(matches!(err, Error::NoDevice));
    }
}
