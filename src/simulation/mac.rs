//! TDMA MAC endpoint.
//!
//! A MAC only transmits when the controller hands it a slot. During the slot it
//! sends queued frames back to back for as long as the next frame still fits,
//! then goes quiet until its next slot. Control slots drain the control queue,
//! data slots drain the data queue.

use std::time::Duration;

use super::channel::BroadcastChannel;
use super::config::QueueConfig;
use super::event::{Event, EventQueue};
use super::geometry::MobilityModel;
use super::metrics::RunStats;
use super::queue::{DropReason, EnqueueError, MacQueue, QueueItem, QueueKind};
use super::reservation;
use super::routing::RoutingProvider;
use super::signal_calculations::tx_time;
use super::types::{Frame, FrameIds, FrameKind, MacAddress, MacHeader, NodeId};

/// Shared run state a MAC needs while transmitting or receiving.
pub struct MacContext<'a> {
    pub events: &'a mut EventQueue<Event>,
    pub channel: &'a mut BroadcastChannel,
    pub mobility: &'a dyn MobilityModel,
    pub routing: &'a dyn RoutingProvider,
    pub stats: &'a mut RunStats,
    pub uids: &'a mut FrameIds,
    pub data_rate_bps: u64,
}

impl MacContext<'_> {
    pub fn now(&self) -> Duration {
        self.events.now()
    }
}

/// A device the TDMA controller can schedule.
pub trait TdmaDevice {
    fn node_id(&self) -> NodeId;

    /// The device may transmit for `slot_duration` starting now.
    fn start_transmission(&mut self, slot_duration: Duration, is_control: bool, ctx: &mut MacContext<'_>);
}

/// What a MAC did with a delivered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Not addressed to this MAC.
    Ignored,
    /// Reservation status payload for the controller.
    Status(Vec<u8>),
    /// Data frame reached its final destination.
    Delivered,
    /// Data frame queued for the next hop.
    Forwarded,
    /// Data frame could not be queued for forwarding.
    Dropped,
    /// Control traffic with no link-layer handling.
    Control,
}

fn drop_counter(stats: &mut RunStats) -> impl FnMut(&QueueItem, DropReason) + '_ {
    move |_, reason| stats.record_queue_drop(reason)
}

pub struct TdmaMac {
    node: NodeId,
    address: MacAddress,
    queue: MacQueue,
}

impl TdmaMac {
    pub fn new(node: NodeId, queue: &QueueConfig) -> Self {
        Self {
            node,
            address: MacAddress::from_node(node),
            queue: MacQueue::new(queue.max_packets, queue.max_delay()),
        }
    }

    pub fn queue(&self) -> &MacQueue {
        &self.queue
    }

    /// Discard everything still queued.
    ///
    /// # Returns
    ///
    /// Data bytes that were left in the queue.
    pub fn flush(&mut self) -> usize {
        let left = self.queue.total_queued_bytes();
        self.queue.flush();
        left
    }

    /// Queue a frame for transmission. Rejections are counted as drops.
    pub fn enqueue(&mut self, frame: Frame, ctx: &mut MacContext<'_>) -> Result<QueueKind, EnqueueError> {
        let now = ctx.now();
        self.queue.enqueue(frame, now, &mut drop_counter(ctx.stats))
    }

    /// Create a data frame of `payload_size` bytes towards `destination` and queue it.
    pub fn send(&mut self, destination: NodeId, payload_size: usize, ctx: &mut MacContext<'_>) -> Result<QueueKind, EnqueueError> {
        let frame = Frame {
            header: MacHeader {
                uid: ctx.uids.next_uid(),
                kind: FrameKind::Data,
                transmitter: self.address,
                receiver: MacAddress::BROADCAST,
                source: self.node,
                destination,
                created_at: ctx.now(),
            },
            payload: vec![0; payload_size],
        };
        self.enqueue(frame, ctx)
    }

    /// Keep transmitting until `slot_end`.
    ///
    /// Sends the head of the queue if its transmission ends before `slot_end`, then
    /// schedules a continuation once the channel is free again. Data frames with no
    /// route to their destination are dropped.
    pub fn continue_slot(&mut self, slot_end: Duration, is_control: bool, ctx: &mut MacContext<'_>) {
        let kind = if is_control { QueueKind::Control } else { QueueKind::Data };
        loop {
            let now = ctx.now();
            let head = self
                .queue
                .peek(kind, now, &mut drop_counter(ctx.stats))
                .map(|item| (item.frame.size(), item.frame.header.destination, item.frame.header.uid));
            let Some((size, destination, uid)) = head else {
                return;
            };

            let receiver = if kind == QueueKind::Data {
                match ctx.routing.next_hop(self.node, destination) {
                    Some(hop) => MacAddress::from_node(hop),
                    None => {
                        log::debug!("Node {} has no route to {}, dropping frame {}", self.node, destination, uid);
                        self.queue.remove(kind, uid);
                        ctx.stats.no_route_drops += 1;
                        continue;
                    }
                }
            } else {
                MacAddress::BROADCAST
            };

            let duration = tx_time(size, ctx.data_rate_bps);
            if now + duration > slot_end {
                return;
            }
            let Some(item) = self.queue.dequeue(kind, now, &mut drop_counter(ctx.stats)) else {
                return;
            };
            let mut frame = item.frame;
            frame.header.transmitter = self.address;
            frame.header.receiver = receiver;

            ctx.stats.record_transmission(frame.size(), frame.is_data());
            log::trace!("Node {} sends frame {} ({} bytes) to {}", self.node, uid, frame.size(), receiver);
            ctx.channel.transmit(self.node, &frame, ctx.events, ctx.mobility, ctx.stats);
            ctx.events.schedule(
                duration,
                Event::ContinueSlot {
                    node: self.node,
                    slot_end,
                    is_control,
                },
            );
            return;
        }
    }

    /// Handle a frame delivered by the channel.
    ///
    /// Frames addressed elsewhere are ignored. Reservation payloads are handed back
    /// for the controller. Unicast data is counted as received; at its destination
    /// it is recorded as delivered, otherwise it is queued for the next hop.
    pub fn receive(&mut self, frame: Frame, ctx: &mut MacContext<'_>) -> Received {
        let header = &frame.header;
        if header.receiver != self.address && !header.receiver.is_broadcast() {
            return Received::Ignored;
        }
        if reservation::is_reservation(&frame.payload) {
            log::trace!("Node {} got reservation status from {}", self.node, header.source);
            return Received::Status(frame.payload);
        }
        if !frame.is_data() || header.receiver.is_broadcast() {
            return Received::Control;
        }

        ctx.stats.received_data_bytes += frame.size() as u64;
        if header.destination == self.node {
            let delay = ctx.now().saturating_sub(header.created_at);
            ctx.stats.record_delivery(frame.payload.len(), delay);
            return Received::Delivered;
        }
        match self.enqueue(frame, ctx) {
            Ok(_) => Received::Forwarded,
            Err(e) => {
                log::debug!("Node {} cannot forward: {}", self.node, e);
                Received::Dropped
            }
        }
    }
}

impl TdmaDevice for TdmaMac {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn start_transmission(&mut self, slot_duration: Duration, is_control: bool, ctx: &mut MacContext<'_>) {
        let slot_end = ctx.now() + slot_duration;
        self.continue_slot(slot_end, is_control, ctx);
    }
}
