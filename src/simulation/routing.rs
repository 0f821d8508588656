//! Routing collaborator.
//!
//! The link layer only needs to know, per node, which next hop leads to each
//! destination and how far away it is. `StaticRouting` answers that with
//! hop-count shortest paths over the in-range connectivity graph, computed once.

use std::collections::VecDeque;

use super::geometry::{Point, within_range};
use super::types::NodeId;

/// One route known at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RoutingEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    /// Hop count to the destination.
    pub distance: u32,
}

pub trait RoutingProvider {
    /// Every destination reachable from `node`.
    fn routing_entries(&self, node: NodeId) -> Vec<RoutingEntry>;

    /// Neighbour to forward to when sending from `node` towards `destination`.
    fn next_hop(&self, node: NodeId, destination: NodeId) -> Option<NodeId>;
}

/// Shortest-path routes over a fixed topology.
#[derive(Debug, Clone)]
pub struct StaticRouting {
    /// `tables[node][destination]`, `None` when unreachable or `destination == node`.
    tables: Vec<Vec<Option<RoutingEntry>>>,
}

impl StaticRouting {
    /// Build routes for nodes that can hear each other within `max_range`.
    pub fn from_positions(positions: &[Point], max_range: f64) -> Self {
        let n = positions.len();
        let neighbours: Vec<Vec<NodeId>> = (0..n)
            .map(|a| (0..n).filter(|&b| b != a && within_range(&positions[a], &positions[b], max_range)).collect())
            .collect();
        Self::from_neighbours(&neighbours)
    }

    /// Build routes from an adjacency list. Neighbours are explored in list order.
    pub fn from_neighbours(neighbours: &[Vec<NodeId>]) -> Self {
        let n = neighbours.len();
        let tables = (0..n).map(|source| Self::bfs(source, neighbours)).collect();
        Self { tables }
    }

    fn bfs(source: NodeId, neighbours: &[Vec<NodeId>]) -> Vec<Option<RoutingEntry>> {
        let n = neighbours.len();
        let mut table: Vec<Option<RoutingEntry>> = vec![None; n];
        let mut visited = vec![false; n];
        let mut frontier = VecDeque::new();
        visited[source] = true;

        for &hop in &neighbours[source] {
            if hop < n && !visited[hop] {
                visited[hop] = true;
                table[hop] = Some(RoutingEntry {
                    destination: hop,
                    next_hop: hop,
                    distance: 1,
                });
                frontier.push_back(hop);
            }
        }

        while let Some(node) = frontier.pop_front() {
            let Some(via) = table[node] else { continue };
            for &next in &neighbours[node] {
                if next < n && !visited[next] {
                    visited[next] = true;
                    table[next] = Some(RoutingEntry {
                        destination: next,
                        next_hop: via.next_hop,
                        distance: via.distance + 1,
                    });
                    frontier.push_back(next);
                }
            }
        }
        table
    }
}

impl RoutingProvider for StaticRouting {
    fn routing_entries(&self, node: NodeId) -> Vec<RoutingEntry> {
        self.tables
            .get(node)
            .map(|table| table.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    fn next_hop(&self, node: NodeId, destination: NodeId) -> Option<NodeId> {
        self.tables.get(node)?.get(destination)?.as_ref().map(|entry| entry.next_hop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_topology_routes_through_neighbours() {
        let positions: Vec<Point> = (0..4).map(|i| Point::new(i as f64 * 100.0, 0.0)).collect();
        let routing = StaticRouting::from_positions(&positions, 150.0);

        assert_eq!(routing.next_hop(0, 3), Some(1));
        assert_eq!(routing.next_hop(3, 0), Some(2));
        assert_eq!(routing.next_hop(1, 2), Some(2));
        assert_eq!(routing.next_hop(2, 2), None);

        let entries = routing.routing_entries(0);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[2],
            RoutingEntry {
                destination: 3,
                next_hop: 1,
                distance: 3
            }
        );
    }

    #[test]
    fn disconnected_nodes_have_no_routes() {
        let positions = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(1000.0, 0.0)];
        let routing = StaticRouting::from_positions(&positions, 250.0);
        assert_eq!(routing.next_hop(0, 2), None);
        assert!(routing.routing_entries(2).is_empty());
        assert_eq!(routing.routing_entries(0).len(), 1);
        assert!(routing.routing_entries(7).is_empty());
    }

    #[test]
    fn first_listed_neighbour_wins_equal_paths() {
        // 0 reaches 3 via 1 or 2, both two hops.
        let neighbours = vec![vec![1, 2], vec![0, 3], vec![0, 3], vec![1, 2]];
        let routing = StaticRouting::from_neighbours(&neighbours);
        assert_eq!(routing.next_hop(0, 3), Some(1));
        assert_eq!(routing.next_hop(3, 0), Some(1));
    }
}
