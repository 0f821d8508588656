//! Node placement and distance calculations.
//!
//! Contains helpers for:
//! - Euclidean distance between positions (metres)
//! - Range checks used by the channel and the routing graph
//! - The mobility collaborator interface and its static implementation

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::config::SimulationConfig;
use super::types::NodeId;

/// A position in the simulated plane, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Squared Euclidean distance (avoids a sqrt when only comparing).
fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Euclidean distance in metres.
pub fn distance(a: &Point, b: &Point) -> f64 {
    distance2(a, b).sqrt()
}

/// Whether two points are within `max_range` metres of each other (boundary inclusive).
pub fn within_range(a: &Point, b: &Point, max_range: f64) -> bool {
    distance2(a, b) <= max_range * max_range
}

/// Supplies node positions for distance computation.
///
/// The link layer never moves nodes itself; it only asks where they are at the
/// moment of a transmission.
pub trait MobilityModel {
    /// Current position of `node`, or `None` if the node is unknown.
    fn position(&self, node: NodeId) -> Option<Point>;

    /// Number of nodes with a position.
    fn node_count(&self) -> usize;
}

/// Fixed positions for the whole run.
#[derive(Debug, Clone)]
pub struct StaticMobility {
    positions: Vec<Point>,
}

impl StaticMobility {
    pub fn new(positions: Vec<Point>) -> Self {
        Self { positions }
    }

    /// Build positions from configuration.
    ///
    /// Uses the explicit node list when present; otherwise places
    /// `placement.node_count` nodes uniformly at random in the configured area.
    ///
    /// # Parameters
    ///
    /// * `config` - Validated simulation configuration
    /// * `rng` - Seeded generator so placements are reproducible
    pub fn from_config(config: &SimulationConfig, rng: &mut StdRng) -> Self {
        if !config.nodes.is_empty() {
            return Self::new(config.nodes.clone());
        }
        let placement = &config.placement;
        let positions = (0..placement.node_count)
            .map(|_| Point::new(random_coordinate(rng, placement.width_m), random_coordinate(rng, placement.height_m)))
            .collect();
        Self::new(positions)
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }
}

fn random_coordinate(rng: &mut StdRng, extent: f64) -> f64 {
    if extent > 0.0 { rng.gen_range(0.0..extent) } else { 0.0 }
}

impl MobilityModel for StaticMobility {
    fn position(&self, node: NodeId) -> Option<Point> {
        self.positions.get(node).copied()
    }

    fn node_count(&self) -> usize {
        self.positions.len()
    }
}
