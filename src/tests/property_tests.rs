//! Property-based tests using proptest.
//!
//! These tests verify resolver invariants that must hold for *any* graph,
//! catching edge cases that hand-written tests miss.

use std::collections::HashSet;

use proptest::prelude::*;

use crate::core::{ConnectionInfo, GraphObject, Uid};
use crate::runtime::resolve_connections;

use super::fixtures::{block, breaker, breaker_chain, disable, wire};

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

const BLOCKS: u64 = 6;
const BREAKERS: u64 = 6;

/// Uids 1..=BLOCKS are blocks, 100.. are breakers
fn endpoint() -> impl Strategy<Value = u64> {
    prop_oneof![1..=BLOCKS, 100..100 + BREAKERS]
}

/// A random visual graph: blocks, breakers over a few junction names, and
/// connections between any two objects
fn random_graph() -> impl Strategy<Value = Vec<GraphObject>> {
    (
        prop::collection::vec(0..3usize, BREAKERS as usize),
        prop::collection::vec((endpoint(), endpoint()), 0..20),
    )
        .prop_map(|(names, links)| {
            let mut objects: Vec<GraphObject> =
                (1..=BLOCKS).map(|uid| block(uid, &format!("b{}", uid)).into()).collect();
            for (i, name) in names.iter().enumerate() {
                objects.push(breaker(100 + i as u64, &format!("n{}", name), i % 2 == 0));
            }
            for (i, (src, dst)) in links.iter().enumerate() {
                objects.push(wire(1_000 + i as u64, *src, "out", *dst, "in"));
            }
            objects
        })
}

fn is_block(uid: Uid) -> bool {
    (1..=BLOCKS).contains(&uid.0)
}

// ---------------------------------------------------------------------------
// Resolver properties
// ---------------------------------------------------------------------------

proptest! {
    /// Without breakers the resolver returns the connections as drawn,
    /// minus exact duplicates.
    #[test]
    fn plain_graph_resolves_to_itself(links in prop::collection::vec((1..=BLOCKS, 1..=BLOCKS), 0..30)) {
        let mut objects: Vec<GraphObject> =
            (1..=BLOCKS).map(|uid| block(uid, "b").into()).collect();
        let mut expected = Vec::new();
        let mut seen = HashSet::new();
        for (i, (src, dst)) in links.iter().enumerate() {
            objects.push(wire(1_000 + i as u64, *src, "out", *dst, "in"));
            let info = ConnectionInfo::new(*src, "out", *dst, "in");
            if seen.insert(info.clone()) {
                expected.push(info);
            }
        }
        prop_assert_eq!(resolve_connections(&objects), expected);
    }

    /// Any breaker chain collapses to exactly one link.
    #[test]
    fn breaker_chain_collapses(hops in 0..60u64, shared in any::<bool>()) {
        let resolved = resolve_connections(&breaker_chain(hops, shared));
        prop_assert_eq!(resolved, vec![ConnectionInfo::new(1u64, "out", 2u64, "in")]);
    }

    /// Resolution terminates on arbitrary graphs, only links blocks, never
    /// repeats a link and is deterministic.
    #[test]
    fn resolved_links_are_unique_block_links(objects in random_graph()) {
        let resolved = resolve_connections(&objects);
        let unique: HashSet<&ConnectionInfo> = resolved.iter().collect();
        prop_assert_eq!(unique.len(), resolved.len());
        for link in &resolved {
            prop_assert!(is_block(link.src_block));
            prop_assert!(is_block(link.dst_block));
        }
        prop_assert_eq!(resolve_connections(&objects), resolved);
    }

    /// Disabling an object never adds links, and removes every link that
    /// touches a disabled block.
    #[test]
    fn disabling_only_removes(objects in random_graph(), victim in endpoint()) {
        let before: HashSet<ConnectionInfo> = resolve_connections(&objects).into_iter().collect();
        let mut disabled = objects.clone();
        disable(&mut disabled, victim);
        let after = resolve_connections(&disabled);
        for link in &after {
            prop_assert!(before.contains(link));
            prop_assert!(!link.touches(Uid(victim)));
        }
    }
}
