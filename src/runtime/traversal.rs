//! Topology resolution
//!
//! Collapses the visual graph into direct block-to-block links. A breaker is
//! a named junction: every enabled breaker sharing a node name is one logical
//! point, so a connection into a breaker continues out of each of its
//! siblings. Traversal starts only at connections whose output side is a
//! block; connections leaving a breaker are reached through their siblings.

use std::collections::{HashMap, HashSet};

use crate::core::{ConnectionInfo, Endpoint, GraphObject, Uid};

// ── Graph index ─────────────────────────────────────────────────────────────

/// What an endpoint's object turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node<'a> {
    Block { enabled: bool },
    Breaker { enabled: bool, name: &'a str },
    Other,
}

/// Lookup tables built once per resolution
struct GraphIndex<'a> {
    nodes: HashMap<Uid, Node<'a>>,
    /// Enabled breakers by node name, in snapshot order
    junctions: HashMap<&'a str, Vec<Uid>>,
    /// Input endpoints of enabled connections leaving each breaker
    leaving: HashMap<Uid, Vec<Endpoint>>,
}

impl<'a> GraphIndex<'a> {
    fn new(objects: &'a [GraphObject]) -> Self {
        let mut nodes = HashMap::new();
        let mut junctions: HashMap<&str, Vec<Uid>> = HashMap::new();
        for obj in objects {
            let node = match obj {
                GraphObject::Block(b) => Node::Block { enabled: b.enabled },
                GraphObject::Breaker(b) => {
                    if b.enabled {
                        junctions.entry(b.node_name.as_str()).or_default().push(b.uid);
                    }
                    Node::Breaker {
                        enabled: b.enabled,
                        name: b.node_name.as_str(),
                    }
                }
                _ => Node::Other,
            };
            nodes.insert(obj.uid(), node);
        }

        let mut index = Self {
            nodes,
            junctions,
            leaving: HashMap::new(),
        };
        for (output, input) in index.enabled_pairs(objects) {
            if matches!(index.node(output.object), Node::Breaker { .. }) {
                index.leaving.entry(output.object).or_default().push(input);
            }
        }
        index
    }

    fn node(&self, uid: Uid) -> Node<'a> {
        self.nodes.get(&uid).copied().unwrap_or(Node::Other)
    }

    /// Endpoint pairs of every enabled connection
    fn enabled_pairs(&self, objects: &[GraphObject]) -> Vec<(Endpoint, Endpoint)> {
        objects
            .iter()
            .filter(|obj| matches!(obj, GraphObject::Connection(c) if c.enabled))
            .flat_map(GraphObject::endpoint_pairs)
            .collect()
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// Resolve the visual graph into breaker-free connections
///
/// Output is in discovery order and holds each endpoint 4-tuple once.
/// Disabled blocks, breakers and connections contribute nothing; an endpoint
/// already visited from the same entry connection is dropped silently, which
/// terminates breaker cycles.
pub fn resolve_connections(objects: &[GraphObject]) -> Vec<ConnectionInfo> {
    let index = GraphIndex::new(objects);
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for (output, input) in index.enabled_pairs(objects) {
        match index.node(output.object) {
            Node::Block { enabled: true } => {}
            _ => continue,
        }
        for dst in traverse_inputs(&index, input) {
            let info = ConnectionInfo::new(output.object, output.port.clone(), dst.object, dst.port);
            if seen.insert(info.clone()) {
                resolved.push(info);
            }
        }
    }
    resolved
}

/// Every block input endpoint reachable from `start` through breakers
fn traverse_inputs(index: &GraphIndex<'_>, start: Endpoint) -> Vec<Endpoint> {
    let mut found = Vec::new();
    let mut visited: HashSet<Endpoint> = HashSet::new();
    let mut stack = vec![start];

    while let Some(ep) = stack.pop() {
        let name = match index.node(ep.object) {
            Node::Block { enabled: true } => {
                if visited.insert(ep.clone()) {
                    found.push(ep);
                }
                continue;
            }
            Node::Breaker { enabled: true, name } => name,
            _ => continue,
        };
        if !visited.insert(ep.clone()) {
            continue;
        }

        let siblings = index.junctions.get(name).map(Vec::as_slice).unwrap_or_default();
        let mut next: Vec<&Endpoint> = siblings
            .iter()
            .filter(|uid| **uid != ep.object)
            .filter_map(|uid| index.leaving.get(uid))
            .flatten()
            .collect();
        // Reversed so the first sibling's endpoints are visited first
        next.reverse();
        stack.extend(next.into_iter().cloned());
    }
    found
}
