//! Evaluation service
//!
//! Runs an [`EvalEngine`] on its own tokio task. Submissions arrive over a
//! command channel and only update state; a periodic monitor tick runs at
//! most one evaluation pass. Commands are drained before a tick, so edits
//! that arrive between two ticks are coalesced; a long backlog is drained in
//! bounded batches so heartbeats keep flowing. A pass is never interrupted:
//! a cleanup request waits for the pass in progress and is the last thing
//! the task does.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::core::{BlockInfo, EngineConfig, EvalError, GraphSnapshot, Uid, ZoneInfos};
use crate::remote::Runtime;

use super::engine::{EngineEvent, EvalEngine};

/// Requests sent from handles to the service task
#[derive(Debug)]
enum Command {
    Topology(GraphSnapshot),
    Block(BlockInfo),
    Reeval(Vec<Uid>),
    Zones(ZoneInfos),
    Activate(bool),
    DotMarkup {
        config: String,
        reply: oneshot::Sender<String>,
    },
    Stats {
        reply: oneshot::Sender<Option<JsonValue>>,
    },
    Cleanup {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle used by the editor to talk to the service
#[derive(Debug, Clone)]
pub struct EvalHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl EvalHandle {
    fn send(&self, command: Command) -> Result<(), EvalError> {
        self.commands.send(command).map_err(|_| EvalError::Stopped)
    }

    pub fn submit_topology(&self, graph: GraphSnapshot) -> Result<(), EvalError> {
        self.send(Command::Topology(graph))
    }

    pub fn submit_block(&self, info: BlockInfo) -> Result<(), EvalError> {
        self.send(Command::Block(info))
    }

    pub fn submit_reeval(&self, uids: Vec<Uid>) -> Result<(), EvalError> {
        self.send(Command::Reeval(uids))
    }

    pub fn submit_zone_info(&self, zones: ZoneInfos) -> Result<(), EvalError> {
        self.send(Command::Zones(zones))
    }

    pub fn submit_activate_topology(&self, enable: bool) -> Result<(), EvalError> {
        self.send(Command::Activate(enable))
    }

    /// Graphviz markup of the committed topology; never triggers a pass
    pub async fn topology_dot_markup(&self, config: &str) -> Result<String, EvalError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DotMarkup {
            config: config.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| EvalError::Stopped)
    }

    pub async fn topology_json_stats(&self) -> Result<Option<JsonValue>, EvalError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| EvalError::Stopped)
    }

    /// Tear everything down and stop the service
    ///
    /// Resolves once the remote objects are gone.
    pub async fn cleanup(&self) -> Result<(), EvalError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cleanup { reply })?;
        rx.await.map_err(|_| EvalError::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Spawns the evaluation task
pub struct EvalService;

impl EvalService {
    /// Start the service on the current tokio runtime
    ///
    /// Returns the submission handle, the event stream and the task handle.
    pub fn spawn(
        runtime: Arc<dyn Runtime>,
        config: EngineConfig,
    ) -> (EvalHandle, mpsc::UnboundedReceiver<EngineEvent>, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let engine = EvalEngine::new(runtime, config, events);
        let task = tokio::spawn(run(engine, command_rx));
        (EvalHandle { commands }, event_rx, task)
    }
}

/// Commands handled before the monitor tick must get a turn
const MAX_COMMANDS_PER_TICK: usize = 256;

async fn run(mut engine: EvalEngine, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut ticker = tokio::time::interval(engine.config().monitor_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = engine.config().monitor_interval_ms, "evaluation service started");

    let mut handled = 0;
    loop {
        tokio::select! {
            biased;

            command = commands.recv(), if handled < MAX_COMMANDS_PER_TICK => {
                handled += 1;
                let Some(command) = command else {
                    debug!("all handles dropped");
                    engine.cleanup().await;
                    break;
                };
                if handle(&mut engine, command).await.is_break() {
                    break;
                }
            }

            _ = ticker.tick() => {
                handled = 0;
                engine.tick().await;
            }
        }
    }

    info!(passes = engine.passes(), "evaluation service stopped");
}

async fn handle(engine: &mut EvalEngine, command: Command) -> ControlFlow<()> {
    match command {
        Command::Topology(graph) => engine.submit_topology(graph),
        Command::Block(info) => engine.submit_block(info),
        Command::Reeval(uids) => engine.submit_reeval(uids),
        Command::Zones(zones) => engine.submit_zone_info(zones),
        Command::Activate(enable) => engine.submit_activate_topology(enable),
        Command::DotMarkup { config, reply } => {
            let _ = reply.send(engine.topology_dot_markup(&config));
        }
        Command::Stats { reply } => {
            let _ = reply.send(engine.topology_json_stats().await);
        }
        Command::Cleanup { reply } => {
            engine.cleanup().await;
            let _ = reply.send(());
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}
