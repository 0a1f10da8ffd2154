//! Convergence properties over random connected topologies.
//!
//! For every generated graph the converged election must satisfy:
//!
//! - every node's root is the minimum id;
//! - every node's hop count is its BFS distance to that root;
//! - upstream edges form a spanning tree (N-1 edges, no cycles);
//! - among equal-length paths the smaller neighbor is upstream;
//! - every link outside the tree has exactly one blocked side.
//!
//! The same holds per component after links and nodes are removed from a
//! running election.

use std::collections::BTreeSet;

use proptest::prelude::*;
use proptest::sample::Index;
use proptest::test_runner::TestCaseError;
use stp_election::{Election, ElectionConfig, ElectionResult};
use stp_topology::{Link, NodeId, Topology};

/// Removal edits: `true` drops a link, `false` deletes a node.
fn arb_removals() -> impl Strategy<Value = Vec<(bool, Index)>> {
    prop::collection::vec((any::<bool>(), any::<Index>()), 1..=3)
}

/// Random connected graph: a random spanning tree over shuffled ids plus
/// extra edges.
fn arb_connected() -> impl Strategy<Value = (Vec<u32>, Vec<(usize, usize)>)> {
    prop::collection::btree_set(1u32..500, 1..12)
        .prop_flat_map(|ids| {
            let n = ids.len();
            let ids: Vec<u32> = ids.into_iter().collect();
            (
                Just(ids).prop_shuffle(),
                prop::collection::vec(any::<Index>(), n),
                prop::collection::vec((0..n, 0..n), 0..=n * 2),
            )
        })
        .prop_map(|(ids, parents, extras)| {
            let mut edges: Vec<(usize, usize)> = (1..ids.len())
                .map(|i| (parents[i].index(i), i))
                .collect();
            edges.extend(extras.into_iter().filter(|(a, b)| a != b));
            (ids, edges)
        })
}

fn build(ids: &[u32], edges: &[(usize, usize)]) -> Topology {
    let mut topo = Topology::new();
    for id in ids {
        topo.insert_node(NodeId(*id), 0.0, 0.0).unwrap();
    }
    for (a, b) in edges {
        topo.create_link(NodeId(ids[*a]), NodeId(ids[*b])).unwrap();
    }
    topo
}

/// Check every component of `topo` against the converged `result`.
fn check_components(topo: &Topology, result: &ElectionResult) -> Result<(), TestCaseError> {
    let components = topo.components();
    prop_assert_eq!(result.nodes.len(), topo.node_count());

    for component in &components {
        let root = *component.iter().next().unwrap();
        let distances = topo.hop_distances(root);
        for id in component {
            let node = result.node(*id).unwrap();
            prop_assert_eq!(node.root_id, root, "node {}", id);
            prop_assert_eq!(node.hop_count, distances[id], "node {}", id);
            match node.upstream {
                Some(up) => {
                    prop_assert!(topo.has_link(*id, up));
                    prop_assert_eq!(distances[&up] + 1, node.hop_count);
                }
                None => prop_assert_eq!(*id, root),
            }
        }
    }

    let tree = result.tree_edges();
    prop_assert_eq!(tree.len(), topo.node_count() - components.len());
    prop_assert!(result.is_loop_free());
    for link in topo.links() {
        let expected = if tree.contains(link) { 0 } else { 1 };
        prop_assert_eq!(result.blocked_sides(*link), expected, "link {:?}", link);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn converges_to_minimum_id_spanning_tree((ids, edges) in arb_connected()) {
        let topo = build(&ids, &edges);
        let root = topo.node_ids().min().unwrap();
        let distances = topo.hop_distances(root);
        prop_assert_eq!(distances.len(), topo.node_count());

        let mut election = Election::start(&topo, ElectionConfig::fast()).unwrap();
        election.run_until_converged(50_000).unwrap();
        let result = election.result();

        for (id, node) in &result.nodes {
            prop_assert_eq!(node.root_id, root);
            prop_assert_eq!(node.hop_count, distances[id]);
            prop_assert_eq!(node.next_hop, root);
            prop_assert!(!node.degraded);

            if let Some(up) = node.upstream {
                prop_assert!(topo.has_link(*id, up));
                prop_assert_eq!(distances[&up] + 1, node.hop_count);
                let smallest = topo
                    .neighbors(*id)
                    .unwrap()
                    .into_iter()
                    .filter(|n| distances[n] + 1 == node.hop_count)
                    .min();
                prop_assert_eq!(Some(up), smallest);
            } else {
                prop_assert_eq!(*id, root);
            }
        }

        let tree = result.tree_edges();
        prop_assert_eq!(tree.len(), topo.node_count() - 1);
        prop_assert!(result.is_loop_free());

        let links: BTreeSet<Link> = topo.links().copied().collect();
        for link in &links {
            let expected = if tree.contains(link) { 0 } else { 1 };
            prop_assert_eq!(result.blocked_sides(*link), expected, "link {:?}", link);
        }
    }

    #[test]
    fn each_component_elects_its_own_minimum(
        (left, left_edges) in arb_connected(),
        (right, right_edges) in arb_connected(),
    ) {
        // Keep the two id ranges apart so the components never share ids.
        let right: Vec<u32> = right.into_iter().map(|id| id + 1_000).collect();
        let mut ids = left.clone();
        ids.extend(&right);
        let offset = left.len();
        let mut edges = left_edges;
        edges.extend(right_edges.into_iter().map(|(a, b)| (a + offset, b + offset)));

        let topo = build(&ids, &edges);
        let mut election = Election::start(&topo, ElectionConfig::fast()).unwrap();
        election.run_until_converged(50_000).unwrap();
        let result = election.result();

        let left_root = NodeId(*left.iter().min().unwrap());
        let right_root = NodeId(*right.iter().min().unwrap());
        prop_assert_eq!(result.root_nodes(), vec![left_root, right_root]);
        for id in &left {
            prop_assert_eq!(result.node(NodeId(*id)).unwrap().root_id, left_root);
        }
        for id in &right {
            prop_assert_eq!(result.node(NodeId(*id)).unwrap().root_id, right_root);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reconverges_after_removals(
        (ids, edges) in arb_connected(),
        removals in arb_removals(),
    ) {
        let mut topo = build(&ids, &edges);
        // Ghost roots drain within one re-election interval.
        let config = ElectionConfig::fast();
        let window = config.reelection_interval * 3;
        let mut election = Election::start(&topo, config.with_quiescence_window(window)).unwrap();
        election.run_until_converged(200_000).unwrap();

        for (drop_link, pick) in removals {
            let change = if drop_link && topo.link_count() > 0 {
                let link = *pick.get(&topo.links().copied().collect::<Vec<_>>());
                topo.remove_link(link.source, link.target).unwrap()
            } else if topo.node_count() > 1 {
                let id = *pick.get(&topo.node_ids().collect::<Vec<_>>());
                Some(topo.delete_node(id).unwrap())
            } else {
                None
            };
            let Some(change) = change else { continue };

            election.apply(&change);
            election.run_until_converged(200_000).unwrap();
            check_components(&topo, &election.result())?;
        }
    }
}
