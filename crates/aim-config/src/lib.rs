//! Patch files for the aim synthesizer.
//!
//! A patch file is a TOML document listing nodes by id. Parameters are either
//! literal numbers, references to other nodes, or (for a few parameters)
//! plain text:
//!
//! ```toml
//! name = "wobble"
//!
//! [settings]
//! sample_rate = 44100
//! outputs = ["main"]
//!
//! [[nodes]]
//! id = "lfo"
//! type = "sine"
//! frequency = 2
//!
//! [[nodes]]
//! id = "tone"
//! type = "saw"
//! frequency = "pitch"
//!
//! [[nodes]]
//! id = "pitch"
//! type = "mix"
//! in0 = 110
//! in1 = 220
//! fac = "lfo"
//!
//! [[nodes]]
//! id = "main"
//! type = "out"
//! input = "tone"
//! name = "main"
//! ```
//!
//! References may point forward. `"keys.midi"` selects a named outlet.
//!
//! ```rust
//! use aim_config::PatchFile;
//!
//! let file = PatchFile::from_toml(r#"
//!     [[nodes]]
//!     id = "tone"
//!     type = "sine"
//!     frequency = 440
//!
//!     [[nodes]]
//!     id = "main"
//!     type = "out"
//!     input = "tone"
//! "#)?;
//! let network = file.build()?;
//! assert_eq!(network.terminals().len(), 1);
//! # Ok::<(), aim_config::ConfigError>(())
//! ```

mod build;
pub mod error;
pub mod patch_file;
pub mod validation;

pub use build::ClipLoader;
pub use error::ConfigError;
pub use patch_file::{NodeConfig, ParamValue, PatchFile, Settings};
pub use validation::{ParamKind, param_kind, split_reference, validate};
