//! Evaluation orchestrator
//!
//! Holds the latest submitted snapshots and the four evaluation maps. Every
//! submission only records state and marks the engine dirty; a monitor tick
//! runs at most one evaluation pass, so a burst of edits between two ticks
//! is coalesced into a single pass over the last snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::core::{
    BlockInfo, EngineConfig, GraphSnapshot, HostProcPair, Uid, ZoneInfos,
};
use crate::remote::{BlockInstanceId, Runtime};

use super::block::{BlockChange, BlockEval, BlockStatus};
use super::dot::{self, DotConfig};
use super::environment::Environments;
use super::thread_pool::{pool_zone, ThreadPools};
use super::topology::{CommittedTopology, TopologyEval, TopologyStatus};
use super::traversal::resolve_connections;

// ── Events ──────────────────────────────────────────────────────────────────

/// Signals sent to the engine's collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One monitor tick completed
    HeartBeat,
    /// A failure forced the topology inactive
    DeactivateDesign,
    /// An evaluation pass finished
    Evaluated { pass: u64 },
    /// A block's status changed
    BlockStatus { uid: Uid, status: BlockStatus },
    /// The topology status changed
    TopologyStatus(TopologyStatus),
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// The evaluation engine
pub struct EvalEngine {
    runtime: Arc<dyn Runtime>,
    config: EngineConfig,
    events: UnboundedSender<EngineEvent>,

    // Submitted state
    graph: GraphSnapshot,
    zones: ZoneInfos,
    reeval: BTreeSet<Uid>,
    pending_activation: Option<bool>,
    dirty: bool,

    // Evaluation state
    environments: Environments,
    thread_pools: ThreadPools,
    blocks: BTreeMap<Uid, BlockEval>,
    topology: TopologyEval,

    reported: BTreeMap<Uid, BlockStatus>,
    reported_topology: Option<TopologyStatus>,
    passes: u64,
    shut_down: bool,
}

impl EvalEngine {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        config: EngineConfig,
        events: UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            environments: Environments::new(runtime.clone()),
            thread_pools: ThreadPools::new(runtime.clone()),
            topology: TopologyEval::new(runtime.clone()),
            runtime,
            config,
            events,
            graph: GraphSnapshot::default(),
            zones: ZoneInfos::new(),
            reeval: BTreeSet::new(),
            pending_activation: None,
            dirty: false,
            blocks: BTreeMap::new(),
            reported: BTreeMap::new(),
            reported_topology: None,
            passes: 0,
            shut_down: false,
        }
    }

    // ── Submissions ─────────────────────────────────────────────────────

    /// Replace the whole visual graph
    pub fn submit_topology(&mut self, graph: GraphSnapshot) {
        self.graph = graph;
        self.mark_dirty();
    }

    /// Replace one block's snapshot
    pub fn submit_block(&mut self, info: BlockInfo) {
        self.graph.patch_block(info);
        self.mark_dirty();
    }

    /// Re-apply the given blocks even if their snapshots did not change
    pub fn submit_reeval(&mut self, uids: impl IntoIterator<Item = Uid>) {
        self.reeval.extend(uids);
        self.mark_dirty();
    }

    /// Replace the zone configuration
    pub fn submit_zone_info(&mut self, zones: ZoneInfos) {
        self.zones = zones;
        self.mark_dirty();
    }

    /// Request activation or deactivation at the next pass
    pub fn submit_activate_topology(&mut self, enable: bool) {
        self.pending_activation = Some(enable);
        self.mark_dirty();
    }

    fn mark_dirty(&mut self) {
        if self.shut_down {
            debug!("submission ignored after cleanup");
            return;
        }
        self.dirty = true;
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Graphviz markup of the last committed topology
    pub fn topology_dot_markup(&self, config: &str) -> String {
        dot::render(self.topology.committed(), &DotConfig::parse(config))
    }

    /// Runtime statistics of the active topology
    pub async fn topology_json_stats(&self) -> Option<JsonValue> {
        self.topology.stats().await
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn block_status(&self, uid: Uid) -> Option<&BlockStatus> {
        self.blocks.get(&uid).map(BlockEval::status)
    }

    pub fn topology_status(&self) -> TopologyStatus {
        self.topology.status()
    }

    pub fn committed(&self) -> &CommittedTopology {
        self.topology.committed()
    }

    pub fn environment_count(&self) -> usize {
        self.environments.len()
    }

    pub fn thread_pool_count(&self) -> usize {
        self.thread_pools.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Monitor ─────────────────────────────────────────────────────────

    /// One monitor cycle: health probe, a pass if dirty, then a heartbeat
    ///
    /// Returns whether a pass ran.
    pub async fn tick(&mut self) -> bool {
        if self.shut_down {
            return false;
        }
        self.probe().await;
        let ran = self.dirty;
        if ran {
            self.evaluate().await;
        }
        self.emit(EngineEvent::HeartBeat);
        ran
    }

    async fn probe(&mut self) {
        let lost = self.environments.probe().await;
        if lost.is_empty() {
            return;
        }
        self.dirty = true;
        if self.topology.force_down().await {
            warn!(lost = lost.len(), "environment lost while active");
            self.emit(EngineEvent::DeactivateDesign);
            self.report_topology();
        }
    }

    // ── Evaluation pass ─────────────────────────────────────────────────

    /// Run one evaluation pass over the latest snapshots
    pub async fn evaluate(&mut self) {
        self.dirty = false;
        self.passes += 1;
        let force = std::mem::take(&mut self.reeval);
        let mut forced_down = false;

        // Step 1: Resolve the logical graph.
        let infos = self.graph.enabled_blocks();
        let connections = resolve_connections(self.graph.objects());
        debug!(pass = self.passes, blocks = infos.len(), connections = connections.len(), "evaluating");

        let placement: BTreeMap<Uid, (HostProcPair, Option<String>)> = infos
            .iter()
            .map(|(uid, info)| {
                let key = HostProcPair::for_zone(info.zone(), &self.zones, &self.config);
                let zone = pool_zone(info, &self.zones, &self.config).map(str::to_string);
                (*uid, (key, zone))
            })
            .collect();
        for (uid, info) in &infos {
            if let Some(zone) = info.zone() {
                if zone != self.config.gui_zone && !self.zones.contains_key(zone) {
                    warn!(uid = %uid, zone = %zone, "zone has no configuration, using default pool");
                }
            }
        }

        // Step 2: Environments for every referenced key.
        let keys: BTreeSet<&HostProcPair> = placement.values().map(|(key, _)| key).collect();
        for key in keys {
            let _ = self.environments.ensure(key).await;
        }

        // Step 3: Thread pools.
        let wanted: BTreeMap<String, HostProcPair> = placement
            .values()
            .filter_map(|(key, zone)| Some((zone.clone()?, key.clone())))
            .collect();
        self.thread_pools
            .sync(&self.zones, &wanted, &mut self.environments)
            .await;

        // Step 4: Blocks.
        let mut retired: Vec<BlockInstanceId> = Vec::new();
        let removed: Vec<Uid> = self
            .blocks
            .keys()
            .filter(|uid| !infos.contains_key(uid))
            .copied()
            .collect();
        for uid in removed {
            if let Some(eval) = self.blocks.remove(&uid) {
                debug!(uid = %uid, "block removed");
                retired.extend(eval.remove(&mut self.environments));
            }
            self.reported.remove(&uid);
        }

        let mut reconstructed = false;
        for (uid, info) in &infos {
            let Some((key, zone)) = placement.get(uid) else {
                continue;
            };
            let eval = self
                .blocks
                .entry(*uid)
                .or_insert_with(|| BlockEval::new(*uid, self.runtime.clone()));
            let change = eval
                .sync(
                    info,
                    key,
                    zone.as_deref(),
                    &mut self.environments,
                    &self.thread_pools,
                    force.contains(uid),
                )
                .await;
            reconstructed |= change == BlockChange::Reconstructed;
            retired.extend(eval.take_retired());
        }

        // Step 5: Wire and commit the topology.
        if let Err(e) = self
            .topology
            .commit(&self.blocks, &connections, reconstructed)
            .await
        {
            warn!(error = %e, "topology forced down during commit");
            forced_down = true;
        }

        // Step 6: Destroy what nothing uses anymore.
        for instance in retired {
            if let Err(e) = self.runtime.destroy_block(instance).await {
                warn!(instance = %instance, error = %e, "block teardown failed");
            }
        }
        self.thread_pools.destroy_retired().await;
        self.environments.collect().await;

        // Step 7: Pending activation request.
        if let Some(enable) = self.pending_activation.take() {
            if let Err(e) = self.topology.activate(enable).await {
                warn!(error = %e, "activation failed");
                forced_down = true;
            }
        }

        if forced_down {
            self.emit(EngineEvent::DeactivateDesign);
        }
        self.report_blocks();
        self.report_topology();
        info!(pass = self.passes, "evaluation pass complete");
        self.emit(EngineEvent::Evaluated { pass: self.passes });
    }

    fn report_blocks(&mut self) {
        let changed: Vec<(Uid, BlockStatus)> = self
            .blocks
            .iter()
            .filter(|(uid, eval)| self.reported.get(*uid) != Some(eval.status()))
            .map(|(uid, eval)| (*uid, eval.status().clone()))
            .collect();
        for (uid, status) in changed {
            self.reported.insert(uid, status.clone());
            self.emit(EngineEvent::BlockStatus { uid, status });
        }
    }

    fn report_topology(&mut self) {
        let status = self.topology.status();
        if self.reported_topology.as_ref() != Some(&status) {
            self.reported_topology = Some(status.clone());
            self.emit(EngineEvent::TopologyStatus(status));
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Orderly shutdown
    ///
    /// Deactivates and destroys the topology, then tears down blocks, thread
    /// pools and environments in that order. Later submissions are ignored.
    pub async fn cleanup(&mut self) {
        if self.shut_down {
            return;
        }
        info!("cleaning up evaluation engine");
        self.shut_down = true;
        self.dirty = false;
        self.pending_activation = None;

        self.topology.teardown().await;

        let blocks = std::mem::take(&mut self.blocks);
        for eval in blocks.into_values() {
            for instance in eval.remove(&mut self.environments) {
                if let Err(e) = self.runtime.destroy_block(instance).await {
                    warn!(instance = %instance, error = %e, "block teardown failed");
                }
            }
        }
        self.thread_pools.teardown_all(&mut self.environments).await;
        self.environments.teardown_all().await;
        self.reported.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRuntime;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_tick_without_submission_only_beats() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = EvalEngine::new(runtime.clone(), EngineConfig::default(), tx);

        assert!(!engine.tick().await);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::HeartBeat);
        assert!(rx.try_recv().is_err());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submission_marks_dirty_until_tick() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = EvalEngine::new(runtime.clone(), EngineConfig::default(), tx);

        engine.submit_block(BlockInfo::new(1u64, "src", "/blocks/source"));
        assert!(engine.is_dirty());
        assert_eq!(runtime.live_blocks(), 0);

        assert!(engine.tick().await);
        assert!(!engine.is_dirty());
        assert_eq!(engine.passes(), 1);
        assert_eq!(engine.block_status(Uid(1)), Some(&BlockStatus::Ready));
    }

    #[tokio::test]
    async fn test_cleanup_ignores_later_submissions() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = EvalEngine::new(runtime.clone(), EngineConfig::default(), tx);

        engine.submit_block(BlockInfo::new(1u64, "src", "/blocks/source"));
        engine.tick().await;
        engine.cleanup().await;
        assert_eq!(runtime.live_blocks(), 0);
        assert_eq!(runtime.live_environments(), 0);

        engine.submit_block(BlockInfo::new(2u64, "sink", "/blocks/sink"));
        assert!(!engine.tick().await);
        assert_eq!(runtime.live_blocks(), 0);
    }
}
