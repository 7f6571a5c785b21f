//! Evaluation engine
//!
//! This module reconciles submitted graph snapshots against a remote
//! runtime: topology resolution, the per-entity evaluations (environment,
//! thread pool, block, topology), the orchestrator that drives them in
//! dependency order, and the service task that debounces submissions.

pub mod block;
pub mod dot;
pub mod engine;
pub mod environment;
pub mod service;
pub mod thread_pool;
pub mod topology;
pub mod traversal;
pub mod watchdog;

pub use block::{BlockChange, BlockEval, BlockStatus};
pub use dot::{DotConfig, DotMode, PortMode};
pub use engine::{EngineEvent, EvalEngine};
pub use environment::{EnvironmentEval, EnvironmentState, Environments};
pub use service::{EvalHandle, EvalService};
pub use thread_pool::{ThreadPoolEval, ThreadPools};
pub use topology::{ActivationState, CommittedBlock, CommittedTopology, TopologyEval, TopologyStatus};
pub use traversal::resolve_connections;
pub use watchdog::Watchdog;
