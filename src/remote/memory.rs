//! In-process runtime
//!
//! A complete [`Runtime`] that keeps every remote object in memory. Each
//! mutating call is recorded so callers can assert exactly which remote
//! operations an evaluation pass performed, and faults can be injected to
//! exercise failure paths (unreachable environments, rejected factories,
//! rejected properties and connections, partial activation, lost processes).

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::{
    BlockInstanceId, EnvironmentId, ObjectId, RemoteResult, Runtime, ThreadPoolId, TopologyId,
};
use crate::core::{HostProcPair, Properties};

/// One recorded mutating call
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    LaunchServer(HostProcPair),
    CreateEnvironment(HostProcPair),
    DestroyEnvironment(HostProcPair),
    CreateThreadPool { env: HostProcPair, config: JsonValue },
    DestroyThreadPool(ThreadPoolId),
    CreateBlock { block: BlockInstanceId, path: String },
    DestroyBlock { block: BlockInstanceId, path: String },
    SetProperty { path: String, name: String, value: JsonValue },
    SetThreadPool { path: String, pool: Option<ThreadPoolId> },
    CreateTopology,
    DestroyTopology,
    Connect { src_port: String, dst_port: String },
    Disconnect { src_port: String, dst_port: String },
    Commit,
    Activate,
    Deactivate,
}

/// Injected failures
#[derive(Debug, Default)]
struct Faults {
    unreachable: HashSet<HostProcPair>,
    rejected_paths: HashSet<String>,
    rejected_properties: HashSet<String>,
    rejected_ports: HashSet<String>,
    thread_pools: bool,
    activation: bool,
    commits: usize,
    hot_swap: bool,
}

#[derive(Debug)]
struct BlockInstance {
    env: EnvironmentId,
    path: String,
    properties: Properties,
    pool: Option<ThreadPoolId>,
    running: bool,
}

type Link = (BlockInstanceId, String, BlockInstanceId, String);

#[derive(Debug, Default)]
struct TopologyState {
    pending: BTreeSet<Link>,
    committed: BTreeSet<Link>,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    environments: HashMap<EnvironmentId, HostProcPair>,
    lost: HashSet<EnvironmentId>,
    thread_pools: HashMap<ThreadPoolId, (EnvironmentId, JsonValue)>,
    blocks: HashMap<BlockInstanceId, BlockInstance>,
    topologies: HashMap<TopologyId, TopologyState>,
    calls: Vec<RuntimeCall>,
    faults: Faults,
}

impl State {
    fn live_environment(&self, env: EnvironmentId) -> RemoteResult<&HostProcPair> {
        if self.lost.contains(&env) {
            bail!("environment {} is unreachable", env);
        }
        self.environments
            .get(&env)
            .ok_or_else(|| anyhow!("environment {} not found", env))
    }

    fn block(&self, block: BlockInstanceId) -> RemoteResult<&BlockInstance> {
        let instance = self
            .blocks
            .get(&block)
            .ok_or_else(|| anyhow!("block {} not found", block))?;
        self.live_environment(instance.env)?;
        Ok(instance)
    }

    fn topology(&mut self, topology: TopologyId) -> RemoteResult<&mut TopologyState> {
        self.topologies
            .get_mut(&topology)
            .ok_or_else(|| anyhow!("topology {} not found", topology))
    }
}

/// Runtime keeping every remote object in process memory
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Recorded calls ─────────────────────────────────────────────────

    /// Every mutating call so far, in order
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of recorded calls matching a predicate
    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of block constructions recorded
    pub fn block_constructions(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::CreateBlock { .. }))
    }

    // ── Inspection ─────────────────────────────────────────────────────

    pub fn live_environments(&self) -> usize {
        self.state.lock().environments.len()
    }

    pub fn live_thread_pools(&self) -> usize {
        self.state.lock().thread_pools.len()
    }

    pub fn live_blocks(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Current property value of the live instance with the given factory path
    pub fn block_property(&self, path: &str, name: &str) -> Option<JsonValue> {
        let state = self.state.lock();
        state
            .blocks
            .values()
            .find(|b| b.path == path)
            .and_then(|b| b.properties.get(name).cloned())
    }

    /// Number of live instances that were given a thread pool
    pub fn pooled_blocks(&self) -> usize {
        self.state.lock().blocks.values().filter(|b| b.pool.is_some()).count()
    }

    /// Committed links of every topology, as (src path, src port, dst path, dst port)
    pub fn committed_links(&self) -> Vec<(String, String, String, String)> {
        let state = self.state.lock();
        let path_of = |id: &BlockInstanceId| {
            state
                .blocks
                .get(id)
                .map(|b| b.path.clone())
                .unwrap_or_else(|| format!("<destroyed {}>", id))
        };
        let mut links: Vec<_> = state
            .topologies
            .values()
            .flat_map(|t| t.committed.iter())
            .map(|(src, sp, dst, dp)| (path_of(src), sp.clone(), path_of(dst), dp.clone()))
            .collect();
        links.sort();
        links
    }

    /// Is any topology active?
    pub fn is_active(&self) -> bool {
        self.state.lock().topologies.values().any(|t| t.active)
    }

    /// Number of block instances currently running
    pub fn running_blocks(&self) -> usize {
        self.state.lock().blocks.values().filter(|b| b.running).count()
    }

    // ── Fault injection ────────────────────────────────────────────────

    /// Refuse to create environments for this key
    pub fn set_unreachable(&self, key: &HostProcPair, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.faults.unreachable.insert(key.clone());
        } else {
            state.faults.unreachable.remove(key);
        }
    }

    /// Simulate the process behind an existing environment dying
    pub fn lose_environment(&self, key: &HostProcPair) {
        let mut state = self.state.lock();
        let lost: Vec<EnvironmentId> = state
            .environments
            .iter()
            .filter(|(_, k)| *k == key)
            .map(|(id, _)| *id)
            .collect();
        state.lost.extend(lost);
    }

    /// Refuse to construct blocks from this factory path
    pub fn reject_path(&self, path: &str, rejected: bool) {
        let mut state = self.state.lock();
        if rejected {
            state.faults.rejected_paths.insert(path.to_string());
        } else {
            state.faults.rejected_paths.remove(path);
        }
    }

    /// Refuse every update of this property name
    pub fn reject_property(&self, name: &str, rejected: bool) {
        let mut state = self.state.lock();
        if rejected {
            state.faults.rejected_properties.insert(name.to_string());
        } else {
            state.faults.rejected_properties.remove(name);
        }
    }

    /// Refuse connections into this destination port
    pub fn reject_port(&self, port: &str, rejected: bool) {
        let mut state = self.state.lock();
        if rejected {
            state.faults.rejected_ports.insert(port.to_string());
        } else {
            state.faults.rejected_ports.remove(port);
        }
    }

    pub fn fail_thread_pools(&self, fail: bool) {
        self.state.lock().faults.thread_pools = fail;
    }

    /// Make activation start only part of the blocks and then fail
    pub fn fail_activation(&self, fail: bool) {
        self.state.lock().faults.activation = fail;
    }

    /// Fail the next `times` topology commits
    pub fn fail_commits(&self, times: usize) {
        self.state.lock().faults.commits = times;
    }

    pub fn set_hot_swap(&self, supported: bool) {
        self.state.lock().faults.hot_swap = supported;
    }
}

#[async_trait]
impl Runtime for InMemoryRuntime {
    async fn launch_server(&self, key: &HostProcPair) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::LaunchServer(key.clone()));
        Ok(())
    }

    async fn create_environment(&self, key: &HostProcPair) -> RemoteResult<EnvironmentId> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::CreateEnvironment(key.clone()));
        if state.faults.unreachable.contains(key) {
            bail!("cannot reach {}", key);
        }
        let id = ObjectId::new();
        state.environments.insert(id, key.clone());
        Ok(id)
    }

    async fn destroy_environment(&self, env: EnvironmentId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        let key = state
            .environments
            .remove(&env)
            .ok_or_else(|| anyhow!("environment {} not found", env))?;
        state.lost.remove(&env);
        state.calls.push(RuntimeCall::DestroyEnvironment(key));
        Ok(())
    }

    async fn environment_alive(&self, env: EnvironmentId) -> bool {
        let state = self.state.lock();
        state.environments.contains_key(&env) && !state.lost.contains(&env)
    }

    async fn create_thread_pool(
        &self,
        env: EnvironmentId,
        config: &JsonValue,
    ) -> RemoteResult<ThreadPoolId> {
        let mut state = self.state.lock();
        let key = state.live_environment(env)?.clone();
        state.calls.push(RuntimeCall::CreateThreadPool {
            env: key,
            config: config.clone(),
        });
        if state.faults.thread_pools {
            bail!("thread pool rejected configuration {}", config);
        }
        if let Some(threads) = config.get("numThreads") {
            if threads.as_u64().map_or(true, |n| n == 0) {
                bail!("numThreads must be a positive integer, got {}", threads);
            }
        }
        let id = ObjectId::new();
        state.thread_pools.insert(id, (env, config.clone()));
        Ok(id)
    }

    async fn destroy_thread_pool(&self, pool: ThreadPoolId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state
            .thread_pools
            .remove(&pool)
            .ok_or_else(|| anyhow!("thread pool {} not found", pool))?;
        state.calls.push(RuntimeCall::DestroyThreadPool(pool));
        Ok(())
    }

    async fn create_block(
        &self,
        env: EnvironmentId,
        path: &str,
        properties: &Properties,
    ) -> RemoteResult<BlockInstanceId> {
        let mut state = self.state.lock();
        state.live_environment(env)?;
        let id = ObjectId::new();
        state.calls.push(RuntimeCall::CreateBlock {
            block: id,
            path: path.to_string(),
        });
        if state.faults.rejected_paths.contains(path) {
            bail!("no factory registered at {}", path);
        }
        if let Some(name) = properties
            .keys()
            .find(|name| state.faults.rejected_properties.contains(*name))
        {
            bail!("initial value of '{}' rejected", name);
        }
        state.blocks.insert(
            id,
            BlockInstance {
                env,
                path: path.to_string(),
                properties: properties.clone(),
                pool: None,
                running: false,
            },
        );
        Ok(id)
    }

    async fn destroy_block(&self, block: BlockInstanceId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        let instance = state
            .blocks
            .remove(&block)
            .ok_or_else(|| anyhow!("block {} not found", block))?;
        state.calls.push(RuntimeCall::DestroyBlock {
            block,
            path: instance.path,
        });
        Ok(())
    }

    async fn set_property(
        &self,
        block: BlockInstanceId,
        name: &str,
        value: &JsonValue,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock();
        let path = state.block(block)?.path.clone();
        state.calls.push(RuntimeCall::SetProperty {
            path,
            name: name.to_string(),
            value: value.clone(),
        });
        if state.faults.rejected_properties.contains(name) {
            bail!("value {} rejected", value);
        }
        if let Some(instance) = state.blocks.get_mut(&block) {
            instance.properties.insert(name.to_string(), value.clone());
        }
        Ok(())
    }

    async fn set_thread_pool(
        &self,
        block: BlockInstanceId,
        pool: Option<ThreadPoolId>,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock();
        let path = state.block(block)?.path.clone();
        if let Some(pool) = pool {
            if !state.thread_pools.contains_key(&pool) {
                bail!("thread pool {} not found", pool);
            }
        }
        state.calls.push(RuntimeCall::SetThreadPool { path, pool });
        if let Some(instance) = state.blocks.get_mut(&block) {
            instance.pool = pool;
        }
        Ok(())
    }

    async fn create_topology(&self) -> RemoteResult<TopologyId> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::CreateTopology);
        let id = ObjectId::new();
        state.topologies.insert(id, TopologyState::default());
        Ok(id)
    }

    async fn destroy_topology(&self, topology: TopologyId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state
            .topologies
            .remove(&topology)
            .ok_or_else(|| anyhow!("topology {} not found", topology))?;
        state.calls.push(RuntimeCall::DestroyTopology);
        Ok(())
    }

    async fn connect(
        &self,
        topology: TopologyId,
        src: BlockInstanceId,
        src_port: &str,
        dst: BlockInstanceId,
        dst_port: &str,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.block(src)?;
        state.block(dst)?;
        state.calls.push(RuntimeCall::Connect {
            src_port: src_port.to_string(),
            dst_port: dst_port.to_string(),
        });
        if state.faults.rejected_ports.contains(dst_port) {
            bail!("port '{}' does not accept connections", dst_port);
        }
        let link = (src, src_port.to_string(), dst, dst_port.to_string());
        state.topology(topology)?.pending.insert(link);
        Ok(())
    }

    async fn disconnect(
        &self,
        topology: TopologyId,
        src: BlockInstanceId,
        src_port: &str,
        dst: BlockInstanceId,
        dst_port: &str,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Disconnect {
            src_port: src_port.to_string(),
            dst_port: dst_port.to_string(),
        });
        let link = (src, src_port.to_string(), dst, dst_port.to_string());
        let topo = state.topology(topology)?;
        if !topo.pending.remove(&link) {
            bail!("{}:{} -> {}:{} is not connected", src, src_port, dst, dst_port);
        }
        Ok(())
    }

    async fn commit(&self, topology: TopologyId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Commit);
        if state.faults.commits > 0 {
            state.faults.commits -= 1;
            bail!("transient commit failure");
        }
        let pending = state.topology(topology)?.pending.clone();
        let missing = pending
            .iter()
            .flat_map(|(src, _, dst, _)| [src, dst])
            .find(|id| !state.blocks.contains_key(*id))
            .copied();
        if let Some(id) = missing {
            bail!("cannot commit, block {} no longer exists", id);
        }
        let members: HashSet<BlockInstanceId> = pending
            .iter()
            .flat_map(|(src, _, dst, _)| [*src, *dst])
            .collect();
        let topo = state.topology(topology)?;
        topo.committed = pending;
        if topo.active {
            for (id, block) in state.blocks.iter_mut() {
                block.running = members.contains(id);
            }
        }
        Ok(())
    }

    async fn activate(&self, topology: TopologyId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Activate);
        let members: Vec<BlockInstanceId> = state
            .topology(topology)?
            .committed
            .iter()
            .flat_map(|(src, _, dst, _)| [*src, *dst])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if state.faults.activation {
            let started = members.len() / 2;
            for id in &members[..started] {
                if let Some(block) = state.blocks.get_mut(id) {
                    block.running = true;
                }
            }
            bail!("{} of {} blocks started", started, members.len());
        }
        for id in &members {
            if let Some(block) = state.blocks.get_mut(id) {
                block.running = true;
            }
        }
        state.topology(topology)?.active = true;
        Ok(())
    }

    async fn deactivate(&self, topology: TopologyId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Deactivate);
        state.topology(topology)?.active = false;
        for block in state.blocks.values_mut() {
            block.running = false;
        }
        Ok(())
    }

    fn supports_hot_swap(&self) -> bool {
        self.state.lock().faults.hot_swap
    }

    async fn topology_stats(&self, topology: TopologyId) -> RemoteResult<JsonValue> {
        let mut state = self.state.lock();
        if !state.topology(topology)?.active {
            bail!("topology {} is not active", topology);
        }
        let committed = state.topology(topology)?.committed.clone();
        let mut stats = serde_json::Map::new();
        for (src, _, dst, _) in &committed {
            for id in [src, dst] {
                if let Some(block) = state.blocks.get(id) {
                    stats.insert(
                        id.to_string(),
                        json!({
                            "blockName": block.path,
                            "running": block.running,
                            "properties": block.properties.len(),
                        }),
                    );
                }
            }
        }
        Ok(JsonValue::Object(stats))
    }
}
