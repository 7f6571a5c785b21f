//! Graph snapshot types
//!
//! The editor describes its canvas as a flat list of [`GraphObject`]s. Blocks
//! carry a full [`BlockInfo`] snapshot; breakers, connections and groups carry
//! only what the topology resolver needs. Snapshots are immutable values: a
//! new edit produces a new snapshot that replaces the old one wholesale.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::Uid;

/// Block properties, ordered by name so diffs are stable
pub type Properties = BTreeMap<String, JsonValue>;

/// Latest block snapshots keyed by UID
pub type BlockInfos = BTreeMap<Uid, BlockInfo>;

/// Zone name to thread pool configuration document
pub type ZoneInfos = BTreeMap<String, JsonValue>;

/// Snapshot of one graph block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Stable identity
    pub uid: Uid,
    /// Display id shown on the canvas
    pub id: String,
    /// Factory path used to construct the runtime instance
    pub path: String,
    /// Property values by name
    pub properties: Properties,
    /// Disabled blocks are never instantiated
    pub enabled: bool,
    /// Zone (thread pool configuration) this block opted into
    pub affinity_zone: Option<String>,
    /// Declared input port names
    pub input_ports: Vec<String>,
    /// Declared output port names
    pub output_ports: Vec<String>,
}

impl BlockInfo {
    /// Create an enabled block with no properties, zone or ports
    pub fn new(uid: impl Into<Uid>, id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            id: id.into(),
            path: path.into(),
            properties: Properties::new(),
            enabled: true,
            affinity_zone: None,
            input_ports: Vec::new(),
            output_ports: Vec::new(),
        }
    }

    /// Set a property value
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Opt into an affinity zone
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.affinity_zone = Some(zone.into());
        self
    }

    /// Declare input and output ports
    pub fn with_ports(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.input_ports = inputs.iter().map(|p| p.to_string()).collect();
        self.output_ports = outputs.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Mark the block enabled or disabled
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The zone name, treating an empty string as no zone
    pub fn zone(&self) -> Option<&str> {
        self.affinity_zone.as_deref().filter(|z| !z.is_empty())
    }
}

/// A virtual join point; all breakers with the same node name form one junction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breaker {
    pub uid: Uid,
    pub node_name: String,
    /// Direction mode: input breakers receive, output breakers emit
    pub is_input: bool,
    pub enabled: bool,
}

impl Breaker {
    pub fn new(uid: impl Into<Uid>, node_name: impl Into<String>, is_input: bool) -> Self {
        Self {
            uid: uid.into(),
            node_name: node_name.into(),
            is_input,
            enabled: true,
        }
    }
}

/// One side of a visual connection: an object and a port key on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub object: Uid,
    pub port: String,
}

impl Endpoint {
    pub fn new(object: impl Into<Uid>, port: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            port: port.into(),
        }
    }
}

/// A connection as drawn on the canvas (may start or end at a breaker)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub uid: Uid,
    /// The emitting side
    pub output: Endpoint,
    /// The receiving side
    pub input: Endpoint,
    pub enabled: bool,
    /// Signal/slot pairs carried by a signal-slot connection
    pub sig_slot_pairs: Vec<(String, String)>,
}

impl Connection {
    /// Create a new enabled connection
    pub fn new(uid: impl Into<Uid>, output: Endpoint, input: Endpoint) -> Self {
        Self {
            uid: uid.into(),
            output,
            input,
            enabled: true,
            sig_slot_pairs: Vec::new(),
        }
    }

    /// Carry signal/slot pairs instead of a single port pair
    pub fn with_sig_slots(mut self, pairs: &[(&str, &str)]) -> Self {
        self.sig_slot_pairs = pairs
            .iter()
            .map(|(sig, slot)| (sig.to_string(), slot.to_string()))
            .collect();
        self
    }

    /// Every (output, input) endpoint pair this connection represents
    ///
    /// A plain connection is one pair. A signal/slot connection is one pair
    /// per signal/slot entry, all between the same two objects.
    pub fn endpoint_pairs(&self) -> Vec<(Endpoint, Endpoint)> {
        if self.sig_slot_pairs.is_empty() {
            return vec![(self.output.clone(), self.input.clone())];
        }
        self.sig_slot_pairs
            .iter()
            .map(|(signal, slot)| {
                (
                    Endpoint::new(self.output.object, signal.clone()),
                    Endpoint::new(self.input.object, slot.clone()),
                )
            })
            .collect()
    }
}

/// A named visual grouping of objects; no effect on evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub uid: Uid,
    pub name: String,
    pub enabled: bool,
    pub members: Vec<Uid>,
}

/// Every kind of object that can sit on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum GraphObject {
    Block(BlockInfo),
    Breaker(Breaker),
    Connection(Connection),
    Group(Group),
}

impl GraphObject {
    pub fn uid(&self) -> Uid {
        match self {
            GraphObject::Block(b) => b.uid,
            GraphObject::Breaker(b) => b.uid,
            GraphObject::Connection(c) => c.uid,
            GraphObject::Group(g) => g.uid,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            GraphObject::Block(b) => b.enabled,
            GraphObject::Breaker(b) => b.enabled,
            GraphObject::Connection(c) => c.enabled,
            GraphObject::Group(g) => g.enabled,
        }
    }

    /// Endpoint pairs for connections, empty for everything else
    pub fn endpoint_pairs(&self) -> Vec<(Endpoint, Endpoint)> {
        match self {
            GraphObject::Connection(c) => c.endpoint_pairs(),
            _ => Vec::new(),
        }
    }
}

impl From<BlockInfo> for GraphObject {
    fn from(info: BlockInfo) -> Self {
        GraphObject::Block(info)
    }
}

impl From<Breaker> for GraphObject {
    fn from(breaker: Breaker) -> Self {
        GraphObject::Breaker(breaker)
    }
}

impl From<Connection> for GraphObject {
    fn from(connection: Connection) -> Self {
        GraphObject::Connection(connection)
    }
}

impl From<Group> for GraphObject {
    fn from(group: Group) -> Self {
        GraphObject::Group(group)
    }
}

/// The full visual graph as last submitted by the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    objects: Vec<GraphObject>,
}

impl GraphSnapshot {
    pub fn new(objects: Vec<GraphObject>) -> Self {
        Self { objects }
    }

    /// Build a snapshot from the blocks and the visual wiring separately
    pub fn from_parts(
        blocks: impl IntoIterator<Item = BlockInfo>,
        wiring: impl IntoIterator<Item = GraphObject>,
    ) -> Self {
        let mut objects: Vec<GraphObject> = blocks.into_iter().map(GraphObject::Block).collect();
        objects.extend(wiring);
        Self { objects }
    }

    pub fn objects(&self) -> &[GraphObject] {
        &self.objects
    }

    /// Snapshots of every enabled block
    pub fn enabled_blocks(&self) -> BlockInfos {
        self.objects
            .iter()
            .filter_map(|obj| match obj {
                GraphObject::Block(info) if info.enabled => Some((info.uid, info.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn block(&self, uid: Uid) -> Option<&BlockInfo> {
        self.objects.iter().find_map(|obj| match obj {
            GraphObject::Block(info) if info.uid == uid => Some(info),
            _ => None,
        })
    }

    /// Replace the snapshot of one block, appending it when unknown
    pub fn patch_block(&mut self, info: BlockInfo) {
        let position = self
            .objects
            .iter()
            .position(|obj| matches!(obj, GraphObject::Block(current) if current.uid == info.uid));
        match position {
            Some(index) => self.objects[index] = GraphObject::Block(info),
            None => self.objects.push(GraphObject::Block(info)),
        }
    }
}

/// A resolved, breaker-free link between two block ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub src_block: Uid,
    pub src_port: String,
    pub dst_block: Uid,
    pub dst_port: String,
}

impl ConnectionInfo {
    pub fn new(
        src_block: impl Into<Uid>,
        src_port: impl Into<String>,
        dst_block: impl Into<Uid>,
        dst_port: impl Into<String>,
    ) -> Self {
        Self {
            src_block: src_block.into(),
            src_port: src_port.into(),
            dst_block: dst_block.into(),
            dst_port: dst_port.into(),
        }
    }

    /// Does either end touch the given block?
    pub fn touches(&self, uid: Uid) -> bool {
        self.src_block == uid || self.dst_block == uid
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_block, self.src_port, self.dst_block, self.dst_port
        )
    }
}
