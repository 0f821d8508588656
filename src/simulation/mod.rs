//! TDMA link-layer simulation core.
//!
//! This module provides a discrete-event simulation of a multi-hop wireless
//! network whose nodes share one channel by time division. It integrates:
//! - Configuration loading and validation
//! - An event queue with cancellable events and FIFO ordering at equal times
//! - A broadcast channel with propagation delay and pairwise collision detection
//! - Per-node control and data queues with capacity and age limits
//! - A frame scheduler with a distributed data-slot reservation protocol
//!
//! ## Module Organization
//!
//! - `types`: Core data structures (frames, addresses, slot claims)
//! - `config`: TOML configuration
//! - `event`: Event queue and event kinds
//! - `signal_calculations`: Propagation delay, transmission time and frame layout
//! - `geometry`: Positions and the mobility collaborator
//! - `routing`: Shortest-path next hops
//! - `channel`: Broadcast channel and collision handling
//! - `queue`: MAC queues and backlog summaries
//! - `used_table`: Two-generation slot claim table
//! - `reservation`: Status message codec
//! - `controller`: Frame scheduler and reservation protocol
//! - `mac`: TDMA MAC endpoint
//! - `traffic`: Poisson traffic generator
//! - `metrics`: Run counters and the final report
//! - `network`: Simulation engine tying everything together
//!
//! ## Public API
//!
//! The main entry point is `Simulation`, built from a `SimulationConfig` and
//! consumed by `Simulation::run`.

pub mod channel;
pub mod config;
pub mod controller;
pub mod event;
pub mod geometry;
pub mod mac;
pub mod metrics;
pub mod network;
pub mod queue;
pub mod reservation;
pub mod routing;
pub mod signal_calculations;
pub mod traffic;
pub mod types;
pub mod used_table;

// Re-export the engine for convenience
pub use network::Simulation;
pub use config::SimulationConfig;
