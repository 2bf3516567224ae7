//! CLI command implementations.

pub mod common;
pub mod devices;
pub mod nodes;
pub mod order;
pub mod render;
pub mod run;
pub mod worker;
