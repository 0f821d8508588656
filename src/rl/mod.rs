//! Reinforcement-learning side of the simulator.
//!
//! The environment samples one node per control slot, turns the scheduler and
//! queue state into an [`Observation`], hands a [`Step`] to an [`Agent`] and feeds
//! the returned slot choices back into the reservation protocol.
//!
//! ## Module Organization
//!
//! - `env`: Observation building, reward draining and action application
//! - `agent`: The `Agent` trait and the built-in random agent
//! - `client`: Agent backed by an external learner over HTTP

pub mod agent;
pub mod client;
pub mod env;

use serde::Serialize;

use crate::simulation::types::NodeId;

pub use agent::{Agent, RandomAgent};
pub use client::HttpAgent;
pub use env::Environment;

/// Action entry meaning "no slot".
pub const NO_SLOT: i32 = -1;

/// Data slot indices chosen by the agent, padded with [`NO_SLOT`].
pub type Action = Vec<i32>;

/// Bounded integer vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxSpace {
    pub low: i64,
    pub high: i64,
    pub shape: Vec<usize>,
}

/// Observation layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationSpace {
    /// One usage code per data slot.
    pub usage: BoxSpace,
    /// Queued bytes of the top destinations.
    pub top_k_bytes: BoxSpace,
}

/// Shapes announced to the agent before the first step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spaces {
    pub action: BoxSpace,
    pub observation: ObservationSpace,
}

/// What a node sees at its control opportunity.
///
/// Usage codes per data slot:
/// - `0`: nobody claims the slot
/// - `1..=k`: the claimant is the next hop towards the k-th largest backlog
/// - `-1`: any other claimant, including the node itself
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub usage: Vec<i32>,
    /// Bytes waiting in the node's data queue.
    pub queued_bytes: u64,
    /// Backlog per top destination, largest first, zero padded.
    pub top_k_bytes: Vec<u64>,
}

impl Observation {
    /// Data slots nobody claims.
    pub fn free_slots(&self) -> Vec<usize> {
        self.usage
            .iter()
            .enumerate()
            .filter(|(_, code)| **code == 0)
            .map(|(slot, _)| slot)
            .collect()
    }
}

/// Diagnostics sent with every step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInfo {
    pub node: NodeId,
    pub time_ns: u64,
    /// Per-action reward entries drained for this step.
    pub rewards: Vec<f32>,
    pub throughput_bps: f64,
    pub average_delay_ms: f64,
}

/// One environment transition as seen by the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub observation: Observation,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}
