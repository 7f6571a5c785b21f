//! Block evaluation
//!
//! Each graph block owns at most one remote instance. A sync compares the new
//! snapshot with what was last applied and picks the cheapest action:
//! nothing, individual property updates, or a full reconstruction when the
//! factory path or hosting environment changed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::{BlockInfo, EvalError, HostProcPair, Uid};
use crate::remote::{BlockInstanceId, EnvironmentId, Runtime, ThreadPoolId};

use super::environment::Environments;
use super::thread_pool::ThreadPools;

/// Display status of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// Not evaluated yet
    Pending,
    /// Live with every property applied
    Ready,
    /// Live, but some property updates were rejected; previous values kept
    Degraded(Vec<EvalError>),
    /// No live instance
    Failed(EvalError),
}

impl BlockStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, BlockStatus::Ready | BlockStatus::Degraded(_))
    }
}

/// What a sync did to the remote instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockChange {
    Unchanged,
    Mutated,
    Reconstructed,
    Failed,
}

/// Evaluation state for one block UID
pub struct BlockEval {
    uid: Uid,
    runtime: Arc<dyn Runtime>,
    /// Snapshot as last applied; property values are the accepted ones
    applied: Option<BlockInfo>,
    env_key: Option<HostProcPair>,
    env_id: Option<EnvironmentId>,
    pool: Option<ThreadPoolId>,
    instance: Option<BlockInstanceId>,
    retired: Vec<BlockInstanceId>,
    status: BlockStatus,
}

impl BlockEval {
    pub fn new(uid: Uid, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            uid,
            runtime,
            applied: None,
            env_key: None,
            env_id: None,
            pool: None,
            instance: None,
            retired: Vec::new(),
            status: BlockStatus::Pending,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn status(&self) -> &BlockStatus {
        &self.status
    }

    pub fn instance(&self) -> Option<BlockInstanceId> {
        self.instance
    }

    pub fn applied(&self) -> Option<&BlockInfo> {
        self.applied.as_ref()
    }

    pub fn env_key(&self) -> Option<&HostProcPair> {
        self.env_key.as_ref()
    }

    /// Reconcile the remote instance with `info`
    ///
    /// `zone` is the thread pool zone the block should run on. With `force`
    /// every property is applied again even when unchanged.
    pub async fn sync(
        &mut self,
        info: &BlockInfo,
        env_key: &HostProcPair,
        zone: Option<&str>,
        envs: &mut Environments,
        pools: &ThreadPools,
        force: bool,
    ) -> BlockChange {
        if self.env_key.as_ref() != Some(env_key) {
            envs.acquire(env_key);
            if let Some(old) = self.env_key.replace(env_key.clone()) {
                envs.release(&old);
            }
        }

        let env_id = match envs.handle(env_key) {
            Ok(id) => id,
            Err(e) => return self.fail(e),
        };
        let pool = match zone.map(|z| pools.handle(z)).transpose() {
            Ok(pool) => pool,
            Err(e) => return self.fail(e),
        };

        let rebuild = match (&self.applied, self.instance) {
            (Some(applied), Some(_)) => applied.path != info.path || self.env_id != Some(env_id),
            _ => true,
        };
        if rebuild {
            self.construct(info, env_id, pool).await
        } else {
            self.mutate(info, pool, force).await
        }
    }

    async fn construct(
        &mut self,
        info: &BlockInfo,
        env_id: EnvironmentId,
        pool: Option<ThreadPoolId>,
    ) -> BlockChange {
        self.retire();
        let instance = match self.runtime.create_block(env_id, &info.path, &info.properties).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(uid = %self.uid, path = %info.path, error = %e, "block construction failed");
                return self.fail(EvalError::construction(&info.path, &e));
            }
        };
        self.instance = Some(instance);
        if let Some(pool) = pool {
            if let Err(e) = self.runtime.set_thread_pool(instance, Some(pool)).await {
                warn!(uid = %self.uid, error = %e, "thread pool binding failed");
                return self.fail(EvalError::construction(&info.path, &e));
            }
        }

        info!(uid = %self.uid, path = %info.path, "block constructed");
        self.applied = Some(info.clone());
        self.env_id = Some(env_id);
        self.pool = pool;
        self.status = BlockStatus::Ready;
        BlockChange::Reconstructed
    }

    async fn mutate(&mut self, info: &BlockInfo, pool: Option<ThreadPoolId>, force: bool) -> BlockChange {
        let (Some(instance), Some(applied)) = (self.instance, self.applied.as_mut()) else {
            return BlockChange::Unchanged;
        };
        let mut changed = false;

        if self.pool != pool {
            debug!(uid = %self.uid, "rebinding thread pool");
            changed = true;
            if let Err(e) = self.runtime.set_thread_pool(instance, pool).await {
                warn!(uid = %self.uid, error = %e, "thread pool binding failed");
                return self.fail(EvalError::construction(&info.path, &e));
            }
            self.pool = pool;
        }

        let mut rejected = Vec::new();
        for (name, value) in &info.properties {
            if !force && applied.properties.get(name) == Some(value) {
                continue;
            }
            changed = true;
            match self.runtime.set_property(instance, name, value).await {
                Ok(()) => {
                    applied.properties.insert(name.clone(), value.clone());
                }
                Err(e) => {
                    warn!(uid = %self.uid, property = %name, error = %e, "property rejected");
                    rejected.push(EvalError::PropertyRejected {
                        name: name.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        applied.id = info.id.clone();
        applied.affinity_zone = info.affinity_zone.clone();
        applied.input_ports = info.input_ports.clone();
        applied.output_ports = info.output_ports.clone();

        self.status = if rejected.is_empty() {
            BlockStatus::Ready
        } else {
            BlockStatus::Degraded(rejected)
        };
        if changed {
            BlockChange::Mutated
        } else {
            BlockChange::Unchanged
        }
    }

    fn fail(&mut self, error: EvalError) -> BlockChange {
        debug!(uid = %self.uid, error = %error, "block failed");
        self.retire();
        self.status = BlockStatus::Failed(error);
        BlockChange::Failed
    }

    /// Move the live instance to the retired list
    fn retire(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.retired.push(instance);
        }
        self.applied = None;
        self.env_id = None;
        self.pool = None;
    }

    /// Instances that must be destroyed once the topology no longer uses them
    pub fn take_retired(&mut self) -> Vec<BlockInstanceId> {
        std::mem::take(&mut self.retired)
    }

    /// Give up the instance and the environment reference for good
    pub fn remove(mut self, envs: &mut Environments) -> Vec<BlockInstanceId> {
        self.retire();
        if let Some(key) = self.env_key.take() {
            envs.release(&key);
        }
        self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRuntime;
    use serde_json::json;

    fn key() -> HostProcPair {
        HostProcPair::new("tcp://localhost", "")
    }

    async fn setup() -> (Arc<InMemoryRuntime>, Environments, ThreadPools) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let mut envs = Environments::new(runtime.clone());
        envs.ensure(&key()).await.unwrap();
        let pools = ThreadPools::new(runtime.clone());
        (runtime, envs, pools)
    }

    #[tokio::test]
    async fn test_property_change_mutates_in_place() {
        let (runtime, mut envs, pools) = setup().await;
        let mut eval = BlockEval::new(Uid(1), runtime.clone());
        let info = BlockInfo::new(1u64, "gain", "/math/gain").with_property("k", 1);

        let change = eval.sync(&info, &key(), None, &mut envs, &pools, false).await;
        assert_eq!(change, BlockChange::Reconstructed);

        let info = info.with_property("k", 2);
        let change = eval.sync(&info, &key(), None, &mut envs, &pools, false).await;
        assert_eq!(change, BlockChange::Mutated);
        assert_eq!(runtime.block_constructions(), 1);
        assert_eq!(runtime.block_property("/math/gain", "k"), Some(json!(2)));

        let change = eval.sync(&info, &key(), None, &mut envs, &pools, false).await;
        assert_eq!(change, BlockChange::Unchanged);
    }

    #[tokio::test]
    async fn test_rejected_property_keeps_block_live() {
        let (runtime, mut envs, pools) = setup().await;
        let mut eval = BlockEval::new(Uid(1), runtime.clone());
        let info = BlockInfo::new(1u64, "gain", "/math/gain").with_property("k", 1);
        eval.sync(&info, &key(), None, &mut envs, &pools, false).await;

        runtime.reject_property("k", true);
        let info = info.with_property("k", 99);
        eval.sync(&info, &key(), None, &mut envs, &pools, false).await;

        assert!(eval.status().is_live());
        assert!(matches!(eval.status(), BlockStatus::Degraded(errors) if errors.len() == 1));
        assert_eq!(eval.applied().unwrap().properties["k"], json!(1));
        assert!(eval.instance().is_some());
    }

    #[tokio::test]
    async fn test_missing_pool_is_dependency_unavailable() {
        let (runtime, mut envs, pools) = setup().await;
        let mut eval = BlockEval::new(Uid(1), runtime.clone());
        let info = BlockInfo::new(1u64, "gain", "/math/gain").with_zone("fast");

        let change = eval
            .sync(&info, &key(), Some("fast"), &mut envs, &pools, false)
            .await;
        assert_eq!(change, BlockChange::Failed);
        assert!(matches!(
            eval.status(),
            BlockStatus::Failed(EvalError::DependencyUnavailable(_))
        ));
        assert_eq!(runtime.block_constructions(), 0);
    }
}
