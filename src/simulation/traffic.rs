//! Application traffic generator.
//!
//! Every node produces fixed-size data packets with exponentially distributed
//! inter-arrival times (a Poisson process) towards a destination picked
//! uniformly among the destinations its routing table knows.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use std::time::Duration;

use super::config::TrafficConfig;
use super::event::{Event, EventQueue};
use super::mac::{MacContext, TdmaMac};
use super::types::NodeId;

pub struct TrafficSource {
    start: Duration,
    packet_size: usize,
    inter_arrival: Option<Exp<f64>>,
    rng: StdRng,
}

impl TrafficSource {
    pub fn new(config: &TrafficConfig, seed: u64) -> Self {
        let inter_arrival = if config.enabled {
            match Exp::new(config.packets_per_second) {
                Ok(exp) => Some(exp),
                Err(e) => {
                    log::warn!("Traffic disabled, invalid arrival rate {}: {:?}", config.packets_per_second, e);
                    None
                }
            }
        } else {
            None
        };
        Self {
            start: Duration::try_from_secs_f64(config.start_secs).unwrap_or_default(),
            packet_size: config.packet_size,
            inter_arrival,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_enabled(&self) -> bool {
        self.inter_arrival.is_some()
    }

    fn next_gap(&mut self) -> Option<Duration> {
        let exp = self.inter_arrival.as_ref()?;
        let secs: f64 = exp.sample(&mut self.rng);
        Duration::try_from_secs_f64(secs).ok()
    }

    /// Schedule the first arrival of every node.
    pub fn start(&mut self, node_count: usize, events: &mut EventQueue<Event>) {
        for node in 0..node_count {
            if let Some(gap) = self.next_gap() {
                events.schedule_at(self.start + gap, Event::TrafficArrival(node));
            }
        }
    }

    /// Generate one packet at `node` and schedule its next arrival.
    ///
    /// # Returns
    ///
    /// The chosen destination, or `None` if the node knows no destination.
    pub fn on_arrival(&mut self, node: NodeId, mac: &mut TdmaMac, ctx: &mut MacContext<'_>) -> Option<NodeId> {
        if let Some(gap) = self.next_gap() {
            ctx.events.schedule(gap, Event::TrafficArrival(node));
        }

        let entries = ctx.routing.routing_entries(node);
        if entries.is_empty() {
            log::trace!("Node {} has no destinations for traffic", node);
            return None;
        }
        let destination = entries[self.rng.gen_range(0..entries.len())].destination;
        ctx.stats.offered_data_bytes += self.packet_size as u64;
        if let Err(e) = mac.send(destination, self.packet_size, ctx) {
            log::debug!("Node {} dropped generated packet: {}", node, e);
        }
        Some(destination)
    }
}
