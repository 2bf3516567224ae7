//! Pluggable audio output abstraction.
//!
//! The [`AudioBackend`] trait keeps the runtime driver independent of any
//! particular platform audio API. Two implementations ship with the crate:
//!
//! - [`CpalBackend`](crate::CpalBackend) - ALSA, CoreAudio, WASAPI via cpal
//! - [`NullBackend`](crate::NullBackend) - a timer thread that discards the
//!   samples, for headless runs and tests
//!
//! Callbacks are boxed closures so the trait stays object-safe and a backend
//! can be picked at runtime. Streams come back as a type-erased
//! [`StreamHandle`]; dropping the handle stops the stream.

use crate::Result;

/// An output device as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
    /// Default output channel count.
    pub channels: u16,
}

/// Configuration for building an output stream.
///
/// ## Fields
///
/// - `sample_rate`: Requested sample rate in Hz (default: 48000)
/// - `buffer_size`: Preferred buffer size in frames (default: 512)
/// - `channels`: Number of device channels (default: 2)
/// - `device_name`: Optional device name filter (uses default device if `None`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size in frames.
    pub buffer_size: u32,
    /// Number of audio channels.
    pub channels: u16,
    /// Optional device name (uses system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            channels: 2,
            device_name: None,
        }
    }
}

/// Type-erased audio stream handle.
///
/// The stream is active while this handle exists; dropping it stops playback.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until the
    /// handle is dropped.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }

    /// Stops the stream now.
    pub fn stop(self) {
        drop(self);
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Audio output callback.
///
/// Runs on the backend's real-time thread and must fill the interleaved
/// buffer (`[L0, R0, L1, R1, ...]` for stereo) without blocking.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Called with a human-readable message when the stream reports an error.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Pluggable audio output backend.
pub trait AudioBackend: Send {
    /// Human-readable name of this backend (e.g. "cpal", "null").
    fn name(&self) -> &str;

    /// Every output device the backend can open.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// The system default output device, if any.
    fn default_output_device(&self) -> Result<Option<AudioDevice>>;

    /// Builds and starts an output stream.
    ///
    /// The returned [`StreamHandle`] keeps the stream alive. Dropping it stops
    /// playback.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;
}
