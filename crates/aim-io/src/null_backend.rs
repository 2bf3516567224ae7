//! Output backend without hardware.
//!
//! A [`NullBackend`] stream is a thread that invokes the output callback once
//! per buffer period and throws the samples away, so a program runs at its
//! real sample rate on machines without a sound card.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::{AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle};
use crate::{Error, Result};

const DEVICE_NAME: &str = "null";

/// Paced, silent output backend.
#[derive(Debug, Default, Clone)]
pub struct NullBackend {
    callbacks: Arc<AtomicU64>,
}

impl NullBackend {
    /// Creates the backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output callbacks invoked so far, across every stream of this backend.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }
}

struct NullStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("null output thread panicked");
        }
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(self.default_output_device()?.into_iter().collect())
    }

    fn default_output_device(&self) -> Result<Option<AudioDevice>> {
        Ok(Some(AudioDevice {
            name: DEVICE_NAME.to_string(),
            default_sample_rate: 48000,
            channels: 2,
        }))
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: OutputCallback,
        _error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        if let Some(name) = &config.device_name
            && !DEVICE_NAME.contains(name.to_lowercase().as_str())
        {
            return Err(Error::DeviceNotFound(format!(
                "no output device matching '{}'",
                name
            )));
        }
        if config.sample_rate == 0 || config.buffer_size == 0 || config.channels == 0 {
            return Err(Error::Stream(format!("invalid stream config {config:?}")));
        }

        let period = Duration::from_secs_f64(f64::from(config.buffer_size) / f64::from(config.sample_rate));
        let mut buffer = vec![0.0f32; config.buffer_size as usize * usize::from(config.channels)];
        let stop = Arc::new(AtomicBool::new(false));
        let counter = Arc::clone(&self.callbacks);

        let thread = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("aim-null-output".into())
                .spawn(move || {
                    let mut next = Instant::now();
                    while !stop.load(Ordering::SeqCst) {
                        callback(&mut buffer);
                        counter.fetch_add(1, Ordering::Relaxed);
                        next += period;
                        if let Some(wait) = next.checked_duration_since(Instant::now()) {
                            std::thread::sleep(wait);
                        }
                    }
                })?
        };

        tracing::info!(
            channels = config.channels,
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            "null output stream started"
        );
        Ok(StreamHandle::new(NullStream {
            stop,
            thread: Some(thread),
        }))
    }
}
