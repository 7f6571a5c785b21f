//! Core graph abstractions and types
//!
//! This module defines the snapshot types the editor submits (blocks,
//! breakers, connections, zones), the identities the evaluation engine keys
//! its state by, and the error and configuration types shared by the crate.

pub mod config;
pub mod error;
pub mod graph;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

pub use config::EngineConfig;
pub use error::EvalError;
pub use graph::{
    BlockInfo, BlockInfos, Breaker, Connection, ConnectionInfo, Endpoint, GraphObject,
    GraphSnapshot, Group, Properties, ZoneInfos,
};

/// Stable identity of a graph object
///
/// Assigned by the editor once per object and never reused, so the engine
/// can track an object across snapshots even when everything else about it
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid(value)
    }
}

/// Identity of one remote execution context: a host and a process on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostProcPair {
    /// Host URI, e.g. `tcp://localhost`
    pub host: String,
    /// Process name on that host (empty for the default process)
    pub process: String,
}

impl HostProcPair {
    /// Create a new host/process pair
    pub fn new(host: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            process: process.into(),
        }
    }

    /// The environment living inside the editor process
    pub fn gui() -> Self {
        Self::new("gui", "gui")
    }

    /// Is this the in-editor environment?
    pub fn is_gui(&self) -> bool {
        self.host == "gui"
    }

    /// Does the host URI point at this machine?
    pub fn is_local(&self) -> bool {
        if self.is_gui() {
            return true;
        }
        let authority = self
            .host
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(self.host.as_str());
        let hostname = authority.split(':').next().unwrap_or_default();
        self.host.starts_with("inproc://")
            || authority.starts_with("[::1]")
            || matches!(hostname, "localhost" | "127.0.0.1")
    }

    /// Resolve the environment key of a zone
    ///
    /// The configured gui zone always maps to [`HostProcPair::gui`]. Other
    /// zones read `hostUri` and `processName` from their configuration
    /// document, falling back to the engine defaults for anything missing
    /// (including blocks that name no zone at all).
    pub fn for_zone(zone: Option<&str>, zones: &ZoneInfos, config: &EngineConfig) -> Self {
        if zone == Some(config.gui_zone.as_str()) {
            return Self::gui();
        }
        let document = zone.and_then(|z| zones.get(z));
        let lookup = |key: &str| -> Option<String> {
            document
                .and_then(|doc| doc.get(key))
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            host: lookup("hostUri").unwrap_or_else(|| config.default_host_uri.clone()),
            process: lookup("processName").unwrap_or_else(|| config.default_process_name.clone()),
        }
    }
}

impl fmt::Display for HostProcPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.process.is_empty() {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}/{}", self.host, self.process)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gui_zone_maps_to_gui_environment() {
        let config = EngineConfig::default();
        let key = HostProcPair::for_zone(Some("gui"), &ZoneInfos::new(), &config);
        assert_eq!(key, HostProcPair::gui());
        assert!(key.is_local());
    }

    #[test]
    fn test_zone_document_overrides_defaults() {
        let config = EngineConfig::default();
        let mut zones = ZoneInfos::new();
        zones.insert(
            "remote".into(),
            json!({"hostUri": "tcp://10.0.0.7:16415", "processName": "worker"}),
        );
        zones.insert("partial".into(), json!({"numThreads": 2}));

        let remote = HostProcPair::for_zone(Some("remote"), &zones, &config);
        assert_eq!(remote, HostProcPair::new("tcp://10.0.0.7:16415", "worker"));
        assert!(!remote.is_local());

        let partial = HostProcPair::for_zone(Some("partial"), &zones, &config);
        assert_eq!(partial.host, config.default_host_uri);
        assert!(partial.is_local());

        let unzoned = HostProcPair::for_zone(None, &zones, &config);
        assert_eq!(unzoned, partial);
    }

    #[test]
    fn test_local_detection() {
        assert!(HostProcPair::new("tcp://127.0.0.1:1234", "").is_local());
        assert!(HostProcPair::new("inproc://", "").is_local());
        assert!(!HostProcPair::new("tcp://build-farm", "").is_local());
    }
}
