//! Switch topology and delay-weighted routing.
//!
//! The topology is an undirected weighted graph over network switches.
//! Shortest paths (weighted by link delay) are memoised by unordered
//! endpoint pair and reused for the lifetime of the run; link delays never
//! change after scenario load.

use std::collections::BTreeMap;

use petgraph::algo::astar;
use petgraph::graph::NodeIndex;
use petgraph::Undirected;
use trustedge_types::{LinkId, SwitchId};

use crate::error::SimError;

type SwitchGraph = petgraph::Graph<SwitchId, (LinkId, f64), Undirected>;

/// The wired network: switches, links, and a memoised router.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    graph: SwitchGraph,
    node_of: BTreeMap<SwitchId, NodeIndex>,
    link_between: BTreeMap<(SwitchId, SwitchId), LinkId>,
    delay_between: BTreeMap<(SwitchId, SwitchId), f64>,
    path_cache: BTreeMap<(SwitchId, SwitchId), Option<Vec<SwitchId>>>,
}

fn pair_key(a: SwitchId, b: SwitchId) -> (SwitchId, SwitchId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Topology {
    pub fn add_switch(&mut self, switch: SwitchId) {
        if !self.node_of.contains_key(&switch) {
            let node = self.graph.add_node(switch);
            self.node_of.insert(switch, node);
        }
    }

    pub fn add_link(&mut self, link: LinkId, a: SwitchId, b: SwitchId, delay_ms: f64) {
        self.add_switch(a);
        self.add_switch(b);
        self.graph
            .add_edge(self.node_of[&a], self.node_of[&b], (link, delay_ms));
        self.link_between.insert(pair_key(a, b), link);
        self.delay_between.insert(pair_key(a, b), delay_ms);
        self.path_cache.clear();
    }

    /// The link directly connecting two switches, if any.
    pub fn link_between(&self, a: SwitchId, b: SwitchId) -> Option<LinkId> {
        self.link_between.get(&pair_key(a, b)).copied()
    }

    /// Delay-weighted shortest path between two switches, memoised by
    /// unordered endpoint pair. The returned path includes both
    /// endpoints; a self-path is the single endpoint.
    pub fn shortest_path(
        &mut self,
        source: SwitchId,
        target: SwitchId,
    ) -> Result<Vec<SwitchId>, SimError> {
        if source == target {
            return Ok(vec![source]);
        }
        let key = pair_key(source, target);
        let cached = match self.path_cache.get(&key) {
            Some(entry) => entry.clone(),
            None => {
                let found = self.compute_path(key.0, key.1);
                self.path_cache.insert(key, found.clone());
                found
            }
        };
        match cached {
            Some(mut path) => {
                // The cache stores the path in normalised key order.
                if path.first() != Some(&source) {
                    path.reverse();
                }
                Ok(path)
            }
            None => Err(SimError::RoutingUnavailable {
                source_switch: source,
                target,
            }),
        }
    }

    fn compute_path(&self, source: SwitchId, target: SwitchId) -> Option<Vec<SwitchId>> {
        let (start, goal) = (*self.node_of.get(&source)?, *self.node_of.get(&target)?);
        let (_, nodes) = astar(
            &self.graph,
            start,
            |node| node == goal,
            |edge| edge.weight().1,
            |_| 0.0,
        )?;
        Some(nodes.into_iter().map(|node| self.graph[node]).collect())
    }

    /// Sum of link delays along a path of switches.
    pub fn path_delay(&self, path: &[SwitchId]) -> f64 {
        path.windows(2)
            .map(|pair| {
                self.delay_between
                    .get(&pair_key(pair[0], pair[1]))
                    .copied()
                    .unwrap_or(0.0)
            })
            .sum()
    }

    /// Links along a path of switches, in order. Panics on a pair of
    /// switches with no direct link (the path did not come from this
    /// topology).
    pub fn path_links(&self, path: &[SwitchId]) -> Vec<LinkId> {
        path.windows(2)
            .map(|pair| {
                self.link_between(pair[0], pair[1]).unwrap_or_else(|| {
                    panic!("no link between switches {} and {}", pair[0], pair[1])
                })
            })
            .collect()
    }

    pub fn switch_count(&self) -> usize {
        self.node_of.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A small diamond: 1 -2ms- 2 -2ms- 4, and 1 -10ms- 3 -10ms- 4.
    fn diamond() -> Topology {
        let mut topology = Topology::default();
        topology.add_link(LinkId::new(1), SwitchId::new(1), SwitchId::new(2), 2.0);
        topology.add_link(LinkId::new(2), SwitchId::new(2), SwitchId::new(4), 2.0);
        topology.add_link(LinkId::new(3), SwitchId::new(1), SwitchId::new(3), 10.0);
        topology.add_link(LinkId::new(4), SwitchId::new(3), SwitchId::new(4), 10.0);
        topology
    }

    #[test]
    fn picks_lowest_delay_path() {
        let mut topology = diamond();
        let path = topology
            .shortest_path(SwitchId::new(1), SwitchId::new(4))
            .unwrap();
        assert_eq!(
            path,
            vec![SwitchId::new(1), SwitchId::new(2), SwitchId::new(4)]
        );
        assert!((topology.path_delay(&path) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memoised_paths_are_direction_aware() {
        let mut topology = diamond();
        let forward = topology
            .shortest_path(SwitchId::new(1), SwitchId::new(4))
            .unwrap();
        let backward = topology
            .shortest_path(SwitchId::new(4), SwitchId::new(1))
            .unwrap();
        assert_eq!(
            forward,
            backward.iter().rev().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn self_path_is_trivial() {
        let mut topology = diamond();
        let path = topology
            .shortest_path(SwitchId::new(2), SwitchId::new(2))
            .unwrap();
        assert_eq!(path, vec![SwitchId::new(2)]);
        assert!(topology.path_delay(&path).abs() < f64::EPSILON);
    }

    #[test]
    fn disconnected_switches_report_routing_unavailable() {
        let mut topology = diamond();
        topology.add_switch(SwitchId::new(9));
        let err = topology
            .shortest_path(SwitchId::new(1), SwitchId::new(9))
            .unwrap_err();
        assert!(matches!(err, SimError::RoutingUnavailable { .. }));
    }

    #[test]
    fn path_links_follow_the_route() {
        let mut topology = diamond();
        let path = topology
            .shortest_path(SwitchId::new(1), SwitchId::new(4))
            .unwrap();
        assert_eq!(topology.path_links(&path), vec![LinkId::new(1), LinkId::new(2)]);
    }
}
