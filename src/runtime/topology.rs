//! Topology evaluation
//!
//! Owns the aggregate remote topology. Wiring is diffed against what is
//! already connected, keyed by the resolved endpoint 4-tuple and the block
//! instances on either end, so only stale links are disconnected and only
//! new ones connected. The last committed wiring is kept as a snapshot for
//! read-only queries.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::core::{ConnectionInfo, EvalError, HostProcPair, Uid};
use crate::remote::{BlockInstanceId, Runtime, TopologyId};

use super::block::BlockEval;

/// Activation state of the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Active,
    Failed,
}

/// Display status of the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyStatus {
    pub state: ActivationState,
    /// Failures from the last commit or activation
    pub errors: Vec<EvalError>,
}

/// A block as it was when the topology was last committed
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedBlock {
    pub uid: Uid,
    pub id: String,
    pub path: String,
    pub env: HostProcPair,
    pub input_ports: Vec<String>,
    pub output_ports: Vec<String>,
}

/// The last successfully committed topology
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommittedTopology {
    pub blocks: BTreeMap<Uid, CommittedBlock>,
    pub connections: Vec<ConnectionInfo>,
}

type Wire = (BlockInstanceId, BlockInstanceId);

pub struct TopologyEval {
    runtime: Arc<dyn Runtime>,
    id: Option<TopologyId>,
    wired: BTreeMap<ConnectionInfo, Wire>,
    /// Wiring changed since the last successful remote commit
    commit_pending: bool,
    state: ActivationState,
    errors: Vec<EvalError>,
    committed: CommittedTopology,
}

impl TopologyEval {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            id: None,
            wired: BTreeMap::new(),
            commit_pending: false,
            state: ActivationState::Inactive,
            errors: Vec::new(),
            committed: CommittedTopology::default(),
        }
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    pub fn status(&self) -> TopologyStatus {
        TopologyStatus {
            state: self.state,
            errors: self.errors.clone(),
        }
    }

    pub fn committed(&self) -> &CommittedTopology {
        &self.committed
    }

    // ── Wiring ──────────────────────────────────────────────────────────

    /// Rewire the topology for the live blocks and resolved connections
    ///
    /// Connections touching a block without a live instance are left out.
    /// When `reconstructed` is set while active and the runtime cannot swap
    /// instances in place, the topology is stopped around the rewiring and
    /// started again. A failed restart is an `ActivationFailed`, returned
    /// after the topology has been forced down.
    pub async fn commit(
        &mut self,
        blocks: &BTreeMap<Uid, BlockEval>,
        connections: &[ConnectionInfo],
        reconstructed: bool,
    ) -> Result<(), EvalError> {
        self.errors.retain(|e| matches!(e, EvalError::ActivationFailed(_)));
        let topology = match self.id {
            Some(id) => id,
            None => match self.runtime.create_topology().await {
                Ok(id) => *self.id.insert(id),
                Err(e) => {
                    warn!(error = %e, "topology creation failed");
                    self.errors.push(EvalError::construction("topology", &e));
                    return Ok(());
                }
            },
        };

        let desired: Vec<(ConnectionInfo, Wire)> = connections
            .iter()
            .filter_map(|conn| {
                let src = blocks.get(&conn.src_block)?.instance()?;
                let dst = blocks.get(&conn.dst_block)?.instance()?;
                Some((conn.clone(), (src, dst)))
            })
            .collect();
        let keep: HashSet<(&ConnectionInfo, &Wire)> = desired.iter().map(|(c, w)| (c, w)).collect();
        let stale: Vec<(ConnectionInfo, Wire)> = self
            .wired
            .iter()
            .filter(|(c, w)| !keep.contains(&(*c, *w)))
            .map(|(c, w)| (c.clone(), *w))
            .collect();
        let fresh: Vec<&(ConnectionInfo, Wire)> = desired
            .iter()
            .filter(|(c, w)| self.wired.get(c) != Some(w))
            .collect();

        let cycle = self.state == ActivationState::Active
            && reconstructed
            && !self.runtime.supports_hot_swap();
        if cycle {
            info!("stopping topology to swap block instances");
            if let Err(e) = self.runtime.deactivate(topology).await {
                warn!(error = %e, "deactivation before rewiring failed");
            }
        }

        let mut changed = false;
        for (conn, (src, dst)) in stale {
            changed = true;
            self.wired.remove(&conn);
            if let Err(e) = self
                .runtime
                .disconnect(topology, src, &conn.src_port, dst, &conn.dst_port)
                .await
            {
                warn!(connection = %conn, error = %e, "disconnect failed");
            }
        }
        for (conn, (src, dst)) in fresh {
            match self
                .runtime
                .connect(topology, *src, &conn.src_port, *dst, &conn.dst_port)
                .await
            {
                Ok(()) => {
                    changed = true;
                    self.wired.insert(conn.clone(), (*src, *dst));
                }
                Err(e) => {
                    warn!(connection = %conn, error = %e, "connect failed");
                    self.errors
                        .push(EvalError::ConnectionFailed(format!("{}: {:#}", conn, e)));
                }
            }
        }

        self.commit_pending |= changed;
        let committed = if self.commit_pending {
            match self.runtime.commit(topology).await {
                Ok(()) => {
                    self.commit_pending = false;
                    true
                }
                Err(e) => {
                    warn!(error = %e, "topology commit failed");
                    self.errors
                        .push(EvalError::ConnectionFailed(format!("commit: {:#}", e)));
                    false
                }
            }
        } else {
            true
        };
        if committed {
            debug!(connections = self.wired.len(), "topology committed");
            self.snapshot(blocks, &desired);
        }

        if cycle {
            if let Err(e) = self.runtime.activate(topology).await {
                return Err(self.force_failed(topology, &e).await);
            }
        }
        Ok(())
    }

    fn snapshot(&mut self, blocks: &BTreeMap<Uid, BlockEval>, desired: &[(ConnectionInfo, Wire)]) {
        let blocks = blocks
            .values()
            .filter_map(|eval| {
                eval.instance()?;
                let info = eval.applied()?;
                Some((
                    eval.uid(),
                    CommittedBlock {
                        uid: eval.uid(),
                        id: info.id.clone(),
                        path: info.path.clone(),
                        env: eval.env_key()?.clone(),
                        input_ports: info.input_ports.clone(),
                        output_ports: info.output_ports.clone(),
                    },
                ))
            })
            .collect();
        let connections = desired
            .iter()
            .filter(|(c, _)| self.wired.contains_key(c))
            .map(|(c, _)| c.clone())
            .collect();
        self.committed = CommittedTopology { blocks, connections };
    }

    // ── Activation ──────────────────────────────────────────────────────

    /// Start or stop the topology
    ///
    /// A failed start leaves the topology Failed and already forced down.
    pub async fn activate(&mut self, enable: bool) -> Result<(), EvalError> {
        if !enable {
            if self.state == ActivationState::Active {
                self.deactivate().await;
            }
            return Ok(());
        }
        if self.state == ActivationState::Active {
            return Ok(());
        }
        let Some(topology) = self.id else {
            self.state = ActivationState::Failed;
            let error = EvalError::ActivationFailed("topology was never created".into());
            self.errors.push(error.clone());
            return Err(error);
        };

        self.errors.retain(|e| !matches!(e, EvalError::ActivationFailed(_)));
        match self.runtime.activate(topology).await {
            Ok(()) => {
                info!(connections = self.wired.len(), "topology active");
                self.state = ActivationState::Active;
                Ok(())
            }
            Err(e) => Err(self.force_failed(topology, &e).await),
        }
    }

    async fn force_failed(&mut self, topology: TopologyId, cause: &anyhow::Error) -> EvalError {
        warn!(error = %cause, "activation failed, forcing deactivation");
        if let Err(e) = self.runtime.deactivate(topology).await {
            warn!(error = %e, "forced deactivation failed");
        }
        self.state = ActivationState::Failed;
        let error = EvalError::ActivationFailed(format!("{:#}", cause));
        self.errors.push(error.clone());
        error
    }

    async fn deactivate(&mut self) {
        if let Some(topology) = self.id {
            if let Err(e) = self.runtime.deactivate(topology).await {
                warn!(error = %e, "deactivation failed");
            }
        }
        info!("topology inactive");
        self.state = ActivationState::Inactive;
    }

    /// Stop an active topology after a dependency was lost
    ///
    /// Returns whether the topology was active.
    pub async fn force_down(&mut self) -> bool {
        if self.state != ActivationState::Active {
            return false;
        }
        self.deactivate().await;
        true
    }

    /// Runtime statistics while active
    pub async fn stats(&self) -> Option<JsonValue> {
        if self.state != ActivationState::Active {
            return None;
        }
        let topology = self.id?;
        match self.runtime.topology_stats(topology).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "topology stats query failed");
                None
            }
        }
    }

    /// Stop and destroy the remote topology
    pub async fn teardown(&mut self) {
        self.force_down().await;
        if let Some(topology) = self.id.take() {
            if let Err(e) = self.runtime.destroy_topology(topology).await {
                warn!(error = %e, "topology teardown failed");
            }
        }
        self.wired.clear();
        self.commit_pending = false;
        self.errors.clear();
        self.state = ActivationState::Inactive;
        self.committed = CommittedTopology::default();
    }
}
