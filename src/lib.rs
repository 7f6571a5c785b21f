//! Eval Engine - Reconciles a visual dataflow graph against a live runtime
//!
//! This crate provides the evaluation engine behind a dataflow-graph editor:
//! the snapshot data model, the remote runtime seam, topology resolution
//! and the debounced evaluation service.

pub mod core;
pub mod remote;
pub mod runtime;
mod tests;

// Re-export commonly used types
pub use crate::core::{BlockInfo, EngineConfig, EvalError, GraphSnapshot, HostProcPair, Uid};
pub use crate::remote::{InMemoryRuntime, Runtime};
pub use crate::runtime::{EngineEvent, EvalEngine, EvalHandle, EvalService, Watchdog};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
