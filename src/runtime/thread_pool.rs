//! Thread pool evaluation
//!
//! One remote thread pool per zone. Pools are immutable once constructed, so
//! a changed zone document means destroy and recreate. Old pools are only
//! retired during sync and destroyed after the blocks have been moved off
//! them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::core::{BlockInfo, EngineConfig, EvalError, HostProcPair, ZoneInfos};
use crate::remote::{EnvironmentId, Runtime, ThreadPoolId};

use super::environment::Environments;

/// The zone whose thread pool a block runs on, if any
///
/// Only named zones other than the gui zone with a submitted configuration
/// get a pool; every other block runs on the environment's default pool.
pub fn pool_zone<'a>(info: &'a BlockInfo, zones: &ZoneInfos, config: &EngineConfig) -> Option<&'a str> {
    info.zone()
        .filter(|zone| *zone != config.gui_zone)
        .filter(|zone| zones.contains_key(*zone))
}

/// Evaluation state for one zone
#[derive(Debug, Clone)]
pub struct ThreadPoolEval {
    zone: String,
    env_key: HostProcPair,
    config: JsonValue,
    env_id: Option<EnvironmentId>,
    result: Result<ThreadPoolId, EvalError>,
}

impl ThreadPoolEval {
    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn env_key(&self) -> &HostProcPair {
        &self.env_key
    }

    pub fn handle(&self) -> Result<ThreadPoolId, EvalError> {
        self.result.clone()
    }

    /// Is the live pool still valid for this configuration and environment?
    fn matches(&self, config: &JsonValue, env_key: &HostProcPair, env_id: Option<EnvironmentId>) -> bool {
        self.result.is_ok() && self.config == *config && self.env_key == *env_key && self.env_id == env_id
    }
}

/// Every thread pool known to the engine, keyed by zone name
pub struct ThreadPools {
    runtime: Arc<dyn Runtime>,
    evals: BTreeMap<String, ThreadPoolEval>,
    retired: Vec<ThreadPoolId>,
}

impl ThreadPools {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            evals: BTreeMap::new(),
            retired: Vec::new(),
        }
    }

    /// Bring the pools in line with the zones blocks currently use
    ///
    /// `wanted` maps each zone in use to the environment that should host
    /// its pool. Unchanged pools are left untouched.
    pub async fn sync(
        &mut self,
        zones: &ZoneInfos,
        wanted: &BTreeMap<String, HostProcPair>,
        envs: &mut Environments,
    ) {
        let unused: Vec<String> = self
            .evals
            .keys()
            .filter(|zone| !wanted.contains_key(*zone))
            .cloned()
            .collect();
        for zone in unused {
            if let Some(eval) = self.evals.remove(&zone) {
                debug!(zone = %zone, "thread pool no longer used");
                self.retire(eval, envs);
            }
        }

        for (zone, env_key) in wanted {
            let Some(config) = zones.get(zone) else {
                warn!(zone = %zone, "no configuration for zone");
                continue;
            };
            let env = envs.handle(env_key);
            let env_id = env.as_ref().ok().copied();
            if let Some(eval) = self.evals.get(zone) {
                if eval.matches(config, env_key, env_id) {
                    continue;
                }
            }
            if let Some(old) = self.evals.remove(zone) {
                info!(zone = %zone, "recreating thread pool");
                self.retire(old, envs);
            }

            envs.acquire(env_key);
            let result = match env {
                Ok(env_id) => match self.runtime.create_thread_pool(env_id, config).await {
                    Ok(id) => {
                        debug!(zone = %zone, env = %env_key, "thread pool created");
                        Ok(id)
                    }
                    Err(e) => {
                        warn!(zone = %zone, error = %e, "thread pool creation failed");
                        Err(EvalError::construction(format!("thread pool '{}'", zone), &e))
                    }
                },
                Err(e) => Err(e),
            };
            self.evals.insert(
                zone.clone(),
                ThreadPoolEval {
                    zone: zone.clone(),
                    env_key: env_key.clone(),
                    config: config.clone(),
                    env_id,
                    result,
                },
            );
        }
    }

    fn retire(&mut self, eval: ThreadPoolEval, envs: &mut Environments) {
        if let Ok(id) = eval.result {
            self.retired.push(id);
        }
        envs.release(&eval.env_key);
    }

    /// The pool blocks in `zone` should be bound to
    pub fn handle(&self, zone: &str) -> Result<ThreadPoolId, EvalError> {
        match self.evals.get(zone) {
            Some(eval) => eval.result.clone().map_err(|e| {
                EvalError::DependencyUnavailable(format!("thread pool '{}': {}", zone, e))
            }),
            None => Err(EvalError::DependencyUnavailable(format!(
                "thread pool '{}' not created",
                zone
            ))),
        }
    }

    /// Destroy pools replaced or dropped during the last sync
    pub async fn destroy_retired(&mut self) {
        for id in std::mem::take(&mut self.retired) {
            if let Err(e) = self.runtime.destroy_thread_pool(id).await {
                warn!(pool = %id, error = %e, "thread pool teardown failed");
            }
        }
    }

    /// Destroy every pool and release its environment
    pub async fn teardown_all(&mut self, envs: &mut Environments) {
        let evals = std::mem::take(&mut self.evals);
        for eval in evals.into_values() {
            self.retire(eval, envs);
        }
        self.destroy_retired().await;
    }

    pub fn get(&self, zone: &str) -> Option<&ThreadPoolEval> {
        self.evals.get(zone)
    }

    pub fn len(&self) -> usize {
        self.evals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evals.is_empty()
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

    fn setup() -> (Arc<InMemoryRuntime>, Environments, ThreadPools) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let envs = Environments::new(runtime.clone());
        let pools = ThreadPools::new(runtime.clone());
        (runtime, envs, pools)
    }

    #[test]
    fn test_pool_zone_eligibility() {
        let config = EngineConfig::default();
        let mut zones = ZoneInfos::new();
        zones.insert("fast".into(), json!({"numThreads": 4}));
        zones.insert("gui".into(), json!({}));

        let fast = BlockInfo::new(1u64, "a", "/a").with_zone("fast");
        let gui = BlockInfo::new(2u64, "b", "/b").with_zone("gui");
        let unknown = BlockInfo::new(3u64, "c", "/c").with_zone("slow");
        let none = BlockInfo::new(4u64, "d", "/d");

        assert_eq!(pool_zone(&fast, &zones, &config), Some("fast"));
        assert_eq!(pool_zone(&gui, &zones, &config), None);
        assert_eq!(pool_zone(&unknown, &zones, &config), None);
        assert_eq!(pool_zone(&none, &zones, &config), None);
    }

    #[tokio::test]
    async fn test_config_change_recreates_pool() {
        let (runtime, mut envs, mut pools) = setup();
        envs.ensure(&key()).await.unwrap();
        let wanted = BTreeMap::from([("fast".to_string(), key())]);

        let mut zones = ZoneInfos::new();
        zones.insert("fast".into(), json!({"numThreads": 2}));
        pools.sync(&zones, &wanted, &mut envs).await;
        let first = pools.handle("fast").unwrap();

        pools.sync(&zones, &wanted, &mut envs).await;
        assert_eq!(pools.handle("fast").unwrap(), first);

        zones.insert("fast".into(), json!({"numThreads": 8}));
        pools.sync(&zones, &wanted, &mut envs).await;
        assert_ne!(pools.handle("fast").unwrap(), first);
        assert_eq!(runtime.live_thread_pools(), 2);

        pools.destroy_retired().await;
        assert_eq!(runtime.live_thread_pools(), 1);
    }

    #[tokio::test]
    async fn test_failed_environment_fails_pool() {
        let (runtime, mut envs, mut pools) = setup();
        runtime.set_unreachable(&key(), true);
        let _ = envs.ensure(&key()).await;

        let wanted = BTreeMap::from([("fast".to_string(), key())]);
        let zones = ZoneInfos::from([("fast".to_string(), json!({"numThreads": 2}))]);
        pools.sync(&zones, &wanted, &mut envs).await;

        assert!(matches!(
            pools.handle("fast"),
            Err(EvalError::DependencyUnavailable(_))
        ));
        assert_eq!(runtime.live_thread_pools(), 0);
    }
}
