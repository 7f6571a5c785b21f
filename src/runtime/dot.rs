//! Graphviz markup of the committed topology
//!
//! The query takes a free-form JSON document:
//!
//! ```json
//! { "mode": "top" | "flat" | "rendered", "port": "connected" | "all" }
//! ```
//!
//! - `top`: one record node per block
//! - `flat`: blocks grouped into one cluster per environment
//! - `rendered`: clusters, factory paths in labels, and dashed edges where a
//!   connection crosses environments
//!
//! Missing or malformed settings fall back to `top` / `connected`.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{HostProcPair, Uid};

use super::topology::{CommittedBlock, CommittedTopology};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotMode {
    #[default]
    Top,
    Flat,
    Rendered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    #[default]
    Connected,
    All,
}

/// Rendering options for [`render`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DotConfig {
    pub mode: DotMode,
    pub port: PortMode,
}

impl DotConfig {
    /// Parse the query document, falling back to defaults
    pub fn parse(document: &str) -> Self {
        if document.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(document).unwrap_or_else(|e| {
            warn!(error = %e, "malformed markup config, using defaults");
            Self::default()
        })
    }
}

/// Ports drawn on one node
struct NodePorts {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl NodePorts {
    fn for_block(block: &CommittedBlock, topology: &CommittedTopology, mode: PortMode) -> Self {
        let used_in = topology
            .connections
            .iter()
            .filter(|c| c.dst_block == block.uid)
            .map(|c| c.dst_port.as_str());
        let used_out = topology
            .connections
            .iter()
            .filter(|c| c.src_block == block.uid)
            .map(|c| c.src_port.as_str());
        Self {
            inputs: Self::merge(&block.input_ports, used_in, mode),
            outputs: Self::merge(&block.output_ports, used_out, mode),
        }
    }

    /// Declared ports first, then any connected ports not declared
    fn merge<'a>(
        declared: &[String],
        used: impl Iterator<Item = &'a str>,
        mode: PortMode,
    ) -> Vec<String> {
        let used: Vec<&str> = used.collect();
        let mut ports: Vec<String> = declared
            .iter()
            .filter(|p| mode == PortMode::All || used.contains(&p.as_str()))
            .cloned()
            .collect();
        for port in used {
            if !ports.iter().any(|p| p == port) {
                ports.push(port.to_string());
            }
        }
        ports
    }

    fn input_index(&self, port: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p == port)
    }

    fn output_index(&self, port: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p == port)
    }
}

/// Escape text for use inside a quoted record label
pub fn escape_label(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' | '\\' | '{' | '}' | '|' | '<' | '>' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn node_name(uid: Uid) -> String {
    format!("b{}", uid.0)
}

/// Render the committed topology as a Graphviz digraph
pub fn render(topology: &CommittedTopology, config: &DotConfig) -> String {
    let ports: BTreeMap<Uid, NodePorts> = topology
        .blocks
        .values()
        .map(|b| (b.uid, NodePorts::for_block(b, topology, config.port)))
        .collect();

    let mut out = String::new();
    out.push_str("digraph topology {\n");
    out.push_str("    rankdir=LR;\n");
    out.push_str("    node [shape=record, fontsize=10];\n");

    let node = |out: &mut String, block: &CommittedBlock, indent: &str| {
        let Some(ports) = ports.get(&block.uid) else {
            return;
        };
        let inputs: Vec<String> = ports
            .inputs
            .iter()
            .enumerate()
            .map(|(i, p)| format!("<i{}> {}", i, escape_label(p)))
            .collect();
        let outputs: Vec<String> = ports
            .outputs
            .iter()
            .enumerate()
            .map(|(i, p)| format!("<o{}> {}", i, escape_label(p)))
            .collect();
        let mut title = escape_label(&block.id);
        if config.mode == DotMode::Rendered {
            title.push_str("\\n");
            title.push_str(&escape_label(&block.path));
        }
        let _ = writeln!(
            out,
            "{}{} [label=\"{{{{{}}}|{}|{{{}}}}}\"];",
            indent,
            node_name(block.uid),
            inputs.join("|"),
            title,
            outputs.join("|")
        );
    };

    match config.mode {
        DotMode::Top => {
            for block in topology.blocks.values() {
                node(&mut out, block, "    ");
            }
        }
        DotMode::Flat | DotMode::Rendered => {
            let mut clusters: BTreeMap<&HostProcPair, Vec<&CommittedBlock>> = BTreeMap::new();
            for block in topology.blocks.values() {
                clusters.entry(&block.env).or_default().push(block);
            }
            for (i, (env, blocks)) in clusters.into_iter().enumerate() {
                let _ = writeln!(out, "    subgraph cluster_{} {{", i);
                let _ = writeln!(out, "        label=\"{}\";", escape_label(&env.to_string()));
                for block in blocks {
                    node(&mut out, block, "        ");
                }
                out.push_str("    }\n");
            }
        }
    }

    for conn in &topology.connections {
        let (Some(src), Some(dst)) = (ports.get(&conn.src_block), ports.get(&conn.dst_block)) else {
            continue;
        };
        let (Some(o), Some(i)) = (src.output_index(&conn.src_port), dst.input_index(&conn.dst_port)) else {
            continue;
        };
        let crosses = config.mode == DotMode::Rendered
            && topology.blocks.get(&conn.src_block).map(|b| &b.env)
                != topology.blocks.get(&conn.dst_block).map(|b| &b.env);
        let _ = writeln!(
            out,
            "    {}:o{} -> {}:i{}{};",
            node_name(conn.src_block),
            o,
            node_name(conn.dst_block),
            i,
            if crosses { " [style=dashed]" } else { "" }
        );
    }

    out.push_str("}\n");
    out
}
