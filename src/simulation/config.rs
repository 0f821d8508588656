//! Simulation configuration.
//!
//! All runtime parameters live in one TOML file that is deserialized into an
//! immutable [`SimulationConfig`], validated once, and handed to each component
//! at construction. Every section has defaults, so a minimal file only needs a
//! node placement.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::geometry::Point;
use super::signal_calculations::{bytes_per_slot, frame_duration, guard_time_for_range};
use super::types::MAC_HEADER_BYTES;

/// Largest node id that fits the two-digit owner field of reservation messages.
const MAX_NODES: usize = 99;

/// Upper bound for configured run lengths and start times, in seconds (one year).
const MAX_SIMULATED_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for placement, traffic and the built-in agent.
    pub seed: u64,
    /// Simulated time after which the environment reports `done`.
    pub duration_secs: f64,
    pub frame: FrameConfig,
    pub channel: ChannelConfig,
    pub queue: QueueConfig,
    pub reservation: ReservationConfig,
    pub environment: EnvironmentConfig,
    pub traffic: TrafficConfig,
    pub placement: PlacementConfig,
    /// Explicit node positions. Takes precedence over `placement` when non-empty.
    pub nodes: Vec<Point>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            duration_secs: 10.0,
            frame: FrameConfig::default(),
            channel: ChannelConfig::default(),
            queue: QueueConfig::default(),
            reservation: ReservationConfig::default(),
            environment: EnvironmentConfig::default(),
            traffic: TrafficConfig::default(),
            placement: PlacementConfig::default(),
            nodes: Vec::new(),
        }
    }
}

/// TDMA frame layout and timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Duration of a data slot (µs).
    pub slot_time_us: u64,
    /// Duration of a control slot (µs).
    pub control_slot_time_us: u64,
    /// Idle time after every slot (µs).
    pub guard_time_us: u64,
    /// Idle time between the last slot of a frame and the next frame (µs).
    pub inter_frame_gap_us: u64,
    /// Number of contended data slots after the control region.
    pub data_slots: usize,
    /// Link data rate used to compute transmission times.
    pub data_rate_bps: u64,
    /// Re-derive the control slot permutation at every frame start.
    pub rotate_control_slots: bool,
    /// Replace `guard_time_us` with the light travel time over the channel range.
    pub guard_from_range: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            slot_time_us: 1200,
            control_slot_time_us: 500,
            guard_time_us: 0,
            inter_frame_gap_us: 0,
            data_slots: 32,
            data_rate_bps: 8_000_000,
            rotate_control_slots: false,
            guard_from_range: false,
        }
    }
}

impl FrameConfig {
    pub fn slot_time(&self) -> Duration {
        Duration::from_micros(self.slot_time_us)
    }

    pub fn control_slot_time(&self) -> Duration {
        Duration::from_micros(self.control_slot_time_us)
    }

    pub fn guard_time(&self) -> Duration {
        Duration::from_micros(self.guard_time_us)
    }

    pub fn inter_frame_gap(&self) -> Duration {
        Duration::from_micros(self.inter_frame_gap_us)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ChannelConfig {
    /// Maximum transmission range in metres. Receivers further away hear nothing.
    pub max_range_m: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { max_range_m: 250.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of each of the control and data queues.
    pub max_packets: usize,
    /// Items older than this are dropped on the next queue access (ms).
    pub max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_packets: 400,
            max_delay_ms: 10_000,
        }
    }
}

impl QueueConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ReservationConfig {
    /// Incoming claims with a priority at or above this value are ignored.
    pub priority_threshold: u8,
    /// Reward added when an agent claims a slot its node already sees as used.
    pub used_slot_penalty: f32,
    /// Maximum number of slots one action may claim; also the reward vector length.
    pub max_slots_per_action: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            priority_threshold: 3,
            used_slot_penalty: -10.0,
            max_slots_per_action: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct EnvironmentConfig {
    /// Number of top destinations summarised in the observation.
    pub top_k: usize,
    pub agent: AgentConfig,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            agent: AgentConfig::Random,
        }
    }
}

/// Which agent answers environment steps.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AgentConfig {
    /// Built-in heuristic agent picking random free slots.
    Random,
    /// External agent reached over HTTP.
    Http {
        url: String,
        #[serde(default = "default_agent_timeout")]
        timeout_secs: u64,
    },
}

fn default_agent_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub enabled: bool,
    /// Time at which nodes start generating packets (s).
    pub start_secs: f64,
    /// Payload size of generated packets (bytes).
    pub packet_size: usize,
    /// Mean Poisson arrival rate per node.
    pub packets_per_second: f64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_secs: 1.0,
            packet_size: 1000,
            packets_per_second: 5.0,
        }
    }
}

/// Uniform random placement used when no explicit node list is given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct PlacementConfig {
    pub node_count: usize,
    pub width_m: f64,
    pub height_m: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            node_count: 16,
            width_m: 500.0,
            height_m: 500.0,
        }
    }
}

impl SimulationConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: SimulationConfig = toml::from_str(content).context("Invalid TOML configuration")?;
        if config.frame.guard_from_range {
            config.frame.guard_time_us = guard_time_for_range(config.channel.max_range_m).as_micros() as u64;
        }
        config
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid simulation configuration")?;
        Ok(config)
    }

    /// Number of simulated nodes.
    pub fn node_count(&self) -> usize {
        if self.nodes.is_empty() { self.placement.node_count } else { self.nodes.len() }
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or_default()
    }

    pub fn traffic_start(&self) -> Duration {
        Duration::try_from_secs_f64(self.traffic.start_secs).unwrap_or_default()
    }

    /// Validate configuration to reject malformed inputs.
    ///
    /// Checks for issues that would make the frame structure or the reservation
    /// message format meaningless:
    /// - Node count outside 1..=99 (owner ids are two decimal digits)
    /// - Run length or traffic start that is not finite or exceeds the time ceiling
    /// - Zero slot durations, data slots or data rate
    /// - Non-positive transmission range
    /// - Priority threshold outside 1..=9 (priorities are one decimal digit)
    /// - Zero queue capacity, action width or top-K
    /// - Data packets that could never fit in a data slot
    ///
    /// # Returns
    ///
    /// `Ok(())` if validation passes, `Err(String)` with error description if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        let node_count = self.node_count();
        if node_count == 0 {
            return Err("Simulation must contain at least one node".to_string());
        }
        if node_count > MAX_NODES {
            return Err(format!("Node count {} exceeds maximum of {}", node_count, MAX_NODES));
        }
        if !(self.duration_secs > 0.0 && self.duration_secs <= MAX_SIMULATED_SECS) {
            return Err(format!(
                "Invalid duration_secs {}, must be positive and at most {}",
                self.duration_secs, MAX_SIMULATED_SECS
            ));
        }
        if !(self.traffic.start_secs >= 0.0 && self.traffic.start_secs <= MAX_SIMULATED_SECS) {
            return Err(format!(
                "Invalid traffic start_secs {}, must be between 0 and {}",
                self.traffic.start_secs, MAX_SIMULATED_SECS
            ));
        }

        let frame = &self.frame;
        if frame.data_slots == 0 {
            return Err("Invalid data_slots, must be positive".to_string());
        }
        if frame.slot_time_us == 0 || frame.control_slot_time_us == 0 {
            return Err("Slot durations must be positive".to_string());
        }
        if frame.data_rate_bps == 0 {
            return Err("Invalid data_rate_bps, must be positive".to_string());
        }

        if !(self.channel.max_range_m > 0.0) {
            return Err(format!("Invalid max_range_m {}, must be positive", self.channel.max_range_m));
        }

        if self.queue.max_packets == 0 {
            return Err("Invalid queue max_packets, must be positive".to_string());
        }

        let reservation = &self.reservation;
        if reservation.priority_threshold == 0 || reservation.priority_threshold > 9 {
            return Err(format!(
                "Invalid priority_threshold {}, must be 1-9",
                reservation.priority_threshold
            ));
        }
        if reservation.max_slots_per_action == 0 {
            return Err("Invalid max_slots_per_action, must be positive".to_string());
        }

        if self.environment.top_k == 0 {
            return Err("Invalid top_k, must be positive".to_string());
        }
        if let AgentConfig::Http { url, .. } = &self.environment.agent {
            if url.is_empty() {
                return Err("HTTP agent requires a url".to_string());
            }
        }

        if self.traffic.enabled {
            if !(self.traffic.packets_per_second > 0.0 && self.traffic.packets_per_second.is_finite()) {
                return Err(format!(
                    "Invalid packets_per_second {}, must be positive",
                    self.traffic.packets_per_second
                ));
            }
            let capacity = bytes_per_slot(frame.slot_time(), frame.data_rate_bps);
            if self.traffic.packet_size + MAC_HEADER_BYTES > capacity {
                return Err(format!(
                    "Packet size {} (+{} header) does not fit a data slot carrying {} bytes",
                    self.traffic.packet_size, MAC_HEADER_BYTES, capacity
                ));
            }
        }

        if self.nodes.is_empty() && !(self.placement.width_m >= 0.0 && self.placement.height_m >= 0.0) {
            return Err("Placement area must be non-negative".to_string());
        }

        log::debug!(
            "Validated configuration: {} nodes, frame duration {:?}",
            node_count,
            frame_duration(frame, node_count)
        );
        Ok(())
    }
}
