//! Environment evaluation
//!
//! One remote execution context per [`HostProcPair`]. Blocks and thread pools
//! take a reference on the key they live in; the context is created the
//! first time a pass needs it and torn down at the end of the first pass in
//! which nobody references it. A failed creation is retried on the next pass.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::{EvalError, HostProcPair};
use crate::remote::{EnvironmentId, Runtime};

/// Lifecycle of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    Created(EnvironmentId),
    Failed(EvalError),
}

/// Evaluation state for one host/process pair
#[derive(Debug, Clone)]
pub struct EnvironmentEval {
    key: HostProcPair,
    state: EnvironmentState,
    refs: usize,
}

impl EnvironmentEval {
    fn new(key: HostProcPair) -> Self {
        Self {
            key,
            state: EnvironmentState::Uninitialized,
            refs: 0,
        }
    }

    pub fn key(&self) -> &HostProcPair {
        &self.key
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    /// Number of blocks and thread pools referencing this environment
    pub fn refs(&self) -> usize {
        self.refs
    }
}

/// Every environment known to the engine, keyed by host/process pair
pub struct Environments {
    runtime: Arc<dyn Runtime>,
    evals: BTreeMap<HostProcPair, EnvironmentEval>,
    launched: HashSet<HostProcPair>,
}

impl Environments {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            evals: BTreeMap::new(),
            launched: HashSet::new(),
        }
    }

    /// Make sure the environment for `key` exists, creating it if needed
    ///
    /// Returns the existing handle when already created. A previous failure
    /// is retried once per call, so callers invoke this once per pass.
    pub async fn ensure(&mut self, key: &HostProcPair) -> Result<EnvironmentId, EvalError> {
        let eval = self
            .evals
            .entry(key.clone())
            .or_insert_with(|| EnvironmentEval::new(key.clone()));
        if let EnvironmentState::Created(id) = eval.state {
            return Ok(id);
        }

        if key.is_local() && !key.is_gui() && self.launched.insert(key.clone()) {
            info!(env = %key, "launching local server");
            if let Err(e) = self.runtime.launch_server(key).await {
                warn!(env = %key, error = %e, "failed to launch local server");
                self.launched.remove(key);
            }
        }

        let state = match self.runtime.create_environment(key).await {
            Ok(id) => {
                debug!(env = %key, %id, "environment created");
                EnvironmentState::Created(id)
            }
            Err(e) => {
                warn!(env = %key, error = %e, "environment creation failed");
                EnvironmentState::Failed(EvalError::construction(key, &e))
            }
        };
        let eval = self
            .evals
            .entry(key.clone())
            .or_insert_with(|| EnvironmentEval::new(key.clone()));
        eval.state = state.clone();
        match state {
            EnvironmentState::Created(id) => Ok(id),
            EnvironmentState::Failed(e) => Err(e),
            EnvironmentState::Uninitialized => Err(Self::unavailable(key, "not created")),
        }
    }

    /// The live handle for `key`, without touching the runtime
    pub fn handle(&self, key: &HostProcPair) -> Result<EnvironmentId, EvalError> {
        match self.evals.get(key).map(|eval| &eval.state) {
            Some(EnvironmentState::Created(id)) => Ok(*id),
            Some(EnvironmentState::Failed(e)) => Err(Self::unavailable(key, e)),
            _ => Err(Self::unavailable(key, "not created")),
        }
    }

    fn unavailable(key: &HostProcPair, reason: impl std::fmt::Display) -> EvalError {
        EvalError::DependencyUnavailable(format!("environment {}: {}", key, reason))
    }

    /// Take a reference on `key`
    pub fn acquire(&mut self, key: &HostProcPair) {
        self.evals
            .entry(key.clone())
            .or_insert_with(|| EnvironmentEval::new(key.clone()))
            .refs += 1;
    }

    /// Drop a reference on `key`; teardown happens in [`Environments::collect`]
    pub fn release(&mut self, key: &HostProcPair) {
        if let Some(eval) = self.evals.get_mut(key) {
            eval.refs = eval.refs.saturating_sub(1);
        }
    }

    /// Tear down every environment nobody references
    pub async fn collect(&mut self) {
        let unused: Vec<HostProcPair> = self
            .evals
            .values()
            .filter(|eval| eval.refs == 0)
            .map(|eval| eval.key.clone())
            .collect();
        for key in unused {
            if let Some(eval) = self.evals.remove(&key) {
                self.destroy(eval).await;
            }
        }
    }

    /// Check every created environment is still reachable
    ///
    /// Lost environments are released, marked failed and their keys
    /// returned.
    pub async fn probe(&mut self) -> Vec<HostProcPair> {
        let mut lost = Vec::new();
        for eval in self.evals.values_mut() {
            if let EnvironmentState::Created(id) = eval.state {
                if !self.runtime.environment_alive(id).await {
                    warn!(env = %eval.key, %id, "environment lost");
                    if let Err(e) = self.runtime.destroy_environment(id).await {
                        warn!(env = %eval.key, error = %e, "releasing lost environment failed");
                    }
                    eval.state = EnvironmentState::Failed(Self::unavailable(&eval.key, "lost"));
                    lost.push(eval.key.clone());
                }
            }
        }
        lost
    }

    /// Tear down every environment regardless of references
    pub async fn teardown_all(&mut self) {
        let evals = std::mem::take(&mut self.evals);
        for eval in evals.into_values() {
            self.destroy(eval).await;
        }
    }

    async fn destroy(&self, eval: EnvironmentEval) {
        if let EnvironmentState::Created(id) = eval.state {
            match self.runtime.destroy_environment(id).await {
                Ok(()) => debug!(env = %eval.key, "environment destroyed"),
                Err(e) => warn!(env = %eval.key, error = %e, "environment teardown failed"),
            }
        }
    }

    pub fn get(&self, key: &HostProcPair) -> Option<&EnvironmentEval> {
        self.evals.get(key)
    }

    pub fn len(&self) -> usize {
        self.evals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evals.is_empty()
    }
}
