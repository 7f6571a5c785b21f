//! Remote runtime interface
//!
//! The evaluation engine never talks to execution processes directly. Every
//! remote object (environment, thread pool, block instance, topology) is
//! created and driven through the [`Runtime`] trait, which a transport layer
//! implements on top of its own proxy machinery. All calls may be slow or
//! fail; errors are opaque and converted to [`EvalError`](crate::core::EvalError)
//! kinds by the engine.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

use crate::core::{HostProcPair, Properties};

pub use memory::{InMemoryRuntime, RuntimeCall};

/// Result of a remote call
pub type RemoteResult<T> = anyhow::Result<T>;

/// Opaque handle to a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// Generate a new random handle
    pub fn new() -> Self {
        ObjectId(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Handle to a remote execution context
pub type EnvironmentId = ObjectId;
/// Handle to a remote thread pool
pub type ThreadPoolId = ObjectId;
/// Handle to a remote block instance
pub type BlockInstanceId = ObjectId;
/// Handle to a remote topology
pub type TopologyId = ObjectId;

/// The execution runtime the engine reconciles against
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Launch a server process for a local environment
    ///
    /// Called once per key, before the first creation of a local environment
    /// that is not the in-editor one.
    async fn launch_server(&self, _key: &HostProcPair) -> RemoteResult<()> {
        Ok(())
    }

    /// Connect to (or create) the execution context for a host/process pair
    async fn create_environment(&self, key: &HostProcPair) -> RemoteResult<EnvironmentId>;

    /// Release an execution context
    async fn destroy_environment(&self, env: EnvironmentId) -> RemoteResult<()>;

    /// Is the execution context still reachable?
    async fn environment_alive(&self, _env: EnvironmentId) -> bool {
        true
    }

    /// Create a thread pool inside an environment
    async fn create_thread_pool(
        &self,
        env: EnvironmentId,
        config: &JsonValue,
    ) -> RemoteResult<ThreadPoolId>;

    async fn destroy_thread_pool(&self, pool: ThreadPoolId) -> RemoteResult<()>;

    /// Construct a block instance from its factory path and initial properties
    async fn create_block(
        &self,
        env: EnvironmentId,
        path: &str,
        properties: &Properties,
    ) -> RemoteResult<BlockInstanceId>;

    async fn destroy_block(&self, block: BlockInstanceId) -> RemoteResult<()>;

    /// Update one property of a live block instance
    async fn set_property(
        &self,
        block: BlockInstanceId,
        name: &str,
        value: &JsonValue,
    ) -> RemoteResult<()>;

    /// Move a block onto a thread pool, or back to the default pool
    async fn set_thread_pool(
        &self,
        block: BlockInstanceId,
        pool: Option<ThreadPoolId>,
    ) -> RemoteResult<()>;

    async fn create_topology(&self) -> RemoteResult<TopologyId>;

    async fn destroy_topology(&self, topology: TopologyId) -> RemoteResult<()>;

    async fn connect(
        &self,
        topology: TopologyId,
        src: BlockInstanceId,
        src_port: &str,
        dst: BlockInstanceId,
        dst_port: &str,
    ) -> RemoteResult<()>;

    async fn disconnect(
        &self,
        topology: TopologyId,
        src: BlockInstanceId,
        src_port: &str,
        dst: BlockInstanceId,
        dst_port: &str,
    ) -> RemoteResult<()>;

    /// Apply pending connect/disconnect calls
    async fn commit(&self, topology: TopologyId) -> RemoteResult<()>;

    /// Start every block in the topology
    async fn activate(&self, topology: TopologyId) -> RemoteResult<()>;

    /// Stop every block in the topology
    async fn deactivate(&self, topology: TopologyId) -> RemoteResult<()>;

    /// Can block instances be swapped while the topology is active?
    fn supports_hot_swap(&self) -> bool {
        false
    }

    /// Runtime statistics for an active topology
    async fn topology_stats(&self, topology: TopologyId) -> RemoteResult<JsonValue>;
}
