//! Core types shared by both gates
//!
//! - `GateError` / `GateResult` - Error types
//! - `GateConfig` - JSON-loadable configuration

pub mod config;
pub mod error;

pub use config::GateConfig;
pub use error::{GateError, GateResult};
