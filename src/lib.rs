pub mod core;
pub mod memory;
pub mod permissions;
pub mod storage;

// Optional components
pub mod logging;

pub use crate::core::{GateConfig, GateError, GateResult};
pub use memory::{MemoryConfig, MemoryController, ProgressEvent, Summarizer};
pub use permissions::{Approver, PermissionGate, PermissionRules, ToolCategory};
pub use storage::{FileStore, InMemoryStore, StateStore};
