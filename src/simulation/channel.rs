//! Broadcast channel with range gating and collision detection.
//!
//! Every transmission is heard by each registered endpoint within range, after a
//! propagation delay proportional to distance. A receiver that already has a
//! delivery in flight from a different sender suffers a collision: the earlier
//! delivery is cancelled and so is the new one. Collisions are resolved pairwise
//! in send order; three overlapping senders produce two pairwise cancellations,
//! not one N-way resolution.

use super::event::{Event, EventId, EventQueue};
use super::geometry::{MobilityModel, distance};
use super::metrics::RunStats;
use super::signal_calculations::propagation_delay;
use super::types::{Frame, MacAddress, NodeId};

/// A registered receiver on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub node: NodeId,
    pub address: MacAddress,
}

/// A delivery scheduled on the channel, kept until its event fires.
///
/// Entries whose delivery was cancelled stay recorded until their delivery time
/// so that later senders still see the receiver as contended.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InFlightTransmission {
    pub delivery: EventId,
    pub sender: MacAddress,
    pub receiver: MacAddress,
}

/// Result of one `transmit` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitOutcome {
    /// Receivers within range.
    pub reached: usize,
    /// Receivers where this transmission collided.
    pub collisions: usize,
}

#[derive(Debug)]
pub struct BroadcastChannel {
    max_range: f64,
    endpoints: Vec<Endpoint>,
    in_flight: Vec<InFlightTransmission>,
}

impl BroadcastChannel {
    pub fn new(max_range: f64) -> Self {
        Self {
            max_range,
            endpoints: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    /// Make an endpoint reachable by transmissions from other endpoints.
    pub fn register_endpoint(&mut self, node: NodeId, address: MacAddress) {
        self.endpoints.push(Endpoint { node, address });
    }

    /// Broadcast `frame` from `sender` to every other endpoint in range.
    ///
    /// For each receiver within `max_range`, a `Deliver` event is scheduled after the
    /// propagation delay. Before scheduling, in-flight transmissions whose delivery
    /// has fired are pruned, and every remaining entry for the same receiver from a
    /// different sender is cancelled. If any such entry existed the new delivery is
    /// cancelled right after being scheduled, so the receiver gets neither frame.
    ///
    /// # Parameters
    ///
    /// * `sender` - Transmitting node
    /// * `frame` - Frame to deliver; each receiver gets its own copy
    /// * `events` - Event queue deliveries are scheduled on
    /// * `mobility` - Position source for distance computation
    /// * `stats` - Run counters (collisions, cancelled deliveries)
    pub fn transmit(
        &mut self,
        sender: NodeId,
        frame: &Frame,
        events: &mut EventQueue<Event>,
        mobility: &dyn MobilityModel,
        stats: &mut RunStats,
    ) -> TransmitOutcome {
        let mut outcome = TransmitOutcome::default();
        let Some(sender_endpoint) = self.endpoints.iter().find(|e| e.node == sender).copied() else {
            log::warn!("Node {} is not registered on the channel", sender);
            return outcome;
        };
        let Some(sender_pos) = mobility.position(sender) else {
            log::warn!("No position for node {}", sender);
            return outcome;
        };

        let mut sent: Vec<InFlightTransmission> = Vec::new();
        for receiver in &self.endpoints {
            if receiver.node == sender {
                continue;
            }
            let Some(receiver_pos) = mobility.position(receiver.node) else {
                continue;
            };
            let d = distance(&sender_pos, &receiver_pos);
            if d > self.max_range {
                continue;
            }
            outcome.reached += 1;
            let delay = propagation_delay(d);

            self.in_flight.retain(|t| !events.is_expired(t.delivery));

            let mut collided = false;
            for earlier in &self.in_flight {
                if earlier.receiver == receiver.address && earlier.sender != sender_endpoint.address {
                    log::debug!("Collision at node {}: node {} overlaps {}", receiver.node, sender, earlier.sender);
                    if events.cancel(earlier.delivery) {
                        stats.cancelled_deliveries += 1;
                    }
                    collided = true;
                }
            }

            let delivery = events.schedule(
                delay,
                Event::Deliver {
                    receiver: receiver.node,
                    frame: frame.clone(),
                },
            );
            if collided {
                events.cancel(delivery);
                stats.cancelled_deliveries += 1;
                stats.collisions += 1;
                outcome.collisions += 1;
            }
            sent.push(InFlightTransmission {
                delivery,
                sender: sender_endpoint.address,
                receiver: receiver.address,
            });
        }
        self.in_flight.extend(sent);
        outcome
    }

    /// Forget all in-flight transmissions. Used at simulation teardown.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> &[InFlightTransmission] {
        &self.in_flight
    }
}
