//! TDMA slot scheduler and distributed reservation protocol.
//!
//! A frame consists of one control slot per node followed by `data_slots`
//! contended data slots. The controller walks the frame slot by slot, hands each
//! slot to the MACs entitled to it, and keeps every node's two-generation view of
//! data-slot claims up to date from the status messages nodes broadcast in their
//! control opportunity.
//!
//! ## Frame cadence
//!
//! `run_frame` clears all data-slot grants and runs slot 0. Each `run_slot`
//! schedules the next slot after `guard + slot duration`; the last slot schedules
//! the next frame after an additional inter-frame gap. At the first data slot the
//! claim generations rotate (current becomes previous, current is cleared).
//!
//! ## Reservation
//!
//! `reserve` marks the agent's chosen slots as own claims, broadcasts both
//! generations, and turns slots held in two consecutive frames into grants for
//! the node's MAC. `update` merges a received status message into the observer's
//! view; a neighbour's claim on a slot the observer holds retracts the observer's
//! grant.

use std::time::Duration;

use super::channel::TransmitOutcome;
use super::config::{FrameConfig, SimulationConfig};
use super::event::{Event, EventQueue};
use super::mac::{MacContext, TdmaDevice};
use super::metrics::RunStats;
use super::reservation::{self, ParseError};
use super::signal_calculations::{frame_duration, is_control_slot, slot_duration, total_slots};
use super::types::{Frame, FrameKind, MacAddress, MacHeader, NodeId, UsedEntry};
use super::used_table::{Generation, UsedTable};

/// Delay before the very first frame.
pub(crate) const FIRST_FRAME_DELAY: Duration = Duration::from_nanos(10);

/// Group sizes of the control slot interleave.
const ROTATION_SMALL: usize = 3;
const ROTATION_LARGE: usize = 7;

pub struct Controller {
    frame: FrameConfig,
    node_count: usize,
    priority_threshold: u8,
    used_slot_penalty: f32,
    max_slots_per_action: usize,

    started: bool,
    frame_index: u64,

    used: UsedTable,
    /// Nodes entitled to transmit in each slot of the frame.
    slot_map: Vec<Vec<NodeId>>,
    /// Control slot -> node.
    ctrl_slot_map: Vec<NodeId>,

    rl_action: Vec<usize>,
    rewards: Vec<Vec<f32>>,
}

impl Controller {
    pub fn new(config: &SimulationConfig) -> Self {
        let node_count = config.node_count();
        let frame = config.frame.clone();
        let slots = total_slots(&frame, node_count);
        let mut controller = Self {
            used: UsedTable::new(node_count, frame.data_slots),
            slot_map: vec![Vec::new(); slots],
            ctrl_slot_map: (0..node_count).collect(),
            rewards: vec![vec![0.0; config.reservation.max_slots_per_action]; node_count],
            frame,
            node_count,
            priority_threshold: config.reservation.priority_threshold,
            used_slot_penalty: config.reservation.used_slot_penalty,
            max_slots_per_action: config.reservation.max_slots_per_action,
            started: false,
            frame_index: 0,
            rl_action: Vec::new(),
        };
        controller.assign_control_slots();
        controller
    }

    pub fn frame_duration(&self) -> Duration {
        frame_duration(&self.frame, self.node_count)
    }

    /// Schedule the first frame. Later calls do nothing.
    ///
    /// # Returns
    ///
    /// `true` if this call started the scheduler.
    pub fn start(&mut self, events: &mut EventQueue<Event>) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        events.schedule(FIRST_FRAME_DELAY, Event::StartFrame);
        true
    }

    /// Begin a new frame.
    ///
    /// Clears every data-slot grant (control assignments persist), optionally
    /// advances the control slot rotation, then runs slot 0 immediately.
    pub fn run_frame<D: TdmaDevice>(&mut self, devices: &mut [D], ctx: &mut MacContext<'_>) {
        for slot in self.node_count..self.slot_map.len() {
            self.slot_map[slot].clear();
        }
        if self.frame.rotate_control_slots {
            self.advance_control_rotation();
        }
        self.frame_index += 1;
        ctx.stats.frames_completed = self.frame_index.saturating_sub(1);
        log::debug!("Frame {} starts at {:?}", self.frame_index, ctx.events.now());
        self.run_slot(0, devices, ctx);
    }

    /// Run one slot of the current frame.
    ///
    /// Every MAC assigned to the slot gets a transmission opportunity of the slot's
    /// duration. The first data slot rotates the claim generations before any MAC
    /// runs. The next slot (or the next frame after the last slot) is scheduled
    /// unconditionally.
    ///
    /// # Parameters
    ///
    /// * `slot` - Index within the frame; control slots come first
    /// * `devices` - All MACs, indexed by node id
    /// * `ctx` - Shared simulation state the MACs transmit through
    pub fn run_slot<D: TdmaDevice>(&mut self, slot: usize, devices: &mut [D], ctx: &mut MacContext<'_>) {
        let total = self.slot_map.len();
        if slot >= total {
            log::warn!("Slot {} outside frame of {} slots", slot, total);
            return;
        }
        let is_control = is_control_slot(slot, self.node_count);
        let duration = slot_duration(&self.frame, slot, self.node_count);

        if slot == self.node_count {
            self.used.rotate();
        }

        if self.slot_map[slot].is_empty() {
            log::trace!("No MAC assigned to slot {}", slot);
        }
        for &node in &self.slot_map[slot] {
            match devices.get_mut(node) {
                Some(device) => {
                    log::trace!("Node {} transmits in slot {} for {:?}", device.node_id(), slot, duration);
                    device.start_transmission(duration, is_control, ctx);
                }
                None => log::warn!("Slot {} assigned to unknown node {}", slot, node),
            }
        }

        let elapsed = self.frame.guard_time() + duration;
        if slot + 1 == total {
            ctx.events.schedule(elapsed + self.frame.inter_frame_gap(), Event::StartFrame);
        } else {
            ctx.events.schedule(elapsed, Event::RunSlot(slot + 1));
        }
    }

    /// Entitle `node` to transmit in `slot` for the rest of this frame.
    pub fn add_slot(&mut self, slot: usize, node: NodeId) {
        if let Some(nodes) = self.slot_map.get_mut(slot) {
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    }

    /// Withdraw `node`'s entitlement to `slot`.
    pub fn delete_slot(&mut self, slot: usize, node: NodeId) {
        if let Some(nodes) = self.slot_map.get_mut(slot) {
            nodes.retain(|&n| n != node);
        }
    }

    /// Queue a data slot chosen by the agent for the next `reserve` call.
    pub fn set_rl_action(&mut self, slot: usize) {
        self.rl_action.push(slot);
    }

    /// Run `node`'s reservation opportunity.
    ///
    /// Marks the pending action slots as own claims in the current generation
    /// (penalising the node's reward for each slot it already saw as used),
    /// broadcasts both generations as a status message, clears the action buffer,
    /// and grants the node every data slot it claims in both generations.
    pub fn reserve(&mut self, node: NodeId, ctx: &mut MacContext<'_>) -> TransmitOutcome {
        let data_slots = self.frame.data_slots;
        let mut chosen: Vec<usize> = std::mem::take(&mut self.rl_action)
            .into_iter()
            .filter(|&slot| slot < data_slots)
            .collect();
        chosen.sort_unstable();
        chosen.dedup();
        chosen.truncate(self.max_slots_per_action);

        for (counter, &slot) in chosen.iter().enumerate() {
            let Some(existing) = self.used.get(Generation::Current, node, slot) else {
                continue;
            };
            if existing.is_claimed() {
                if let Some(reward) = self.rewards.get_mut(node).and_then(|r| r.get_mut(counter)) {
                    *reward += self.used_slot_penalty;
                }
            }
            self.used.set(Generation::Current, node, slot, UsedEntry::new(1, node));
        }

        let (Some(previous), Some(current)) = (
            self.used.row(Generation::Previous, node),
            self.used.row(Generation::Current, node),
        ) else {
            log::warn!("Reservation requested for unknown node {}", node);
            return TransmitOutcome::default();
        };
        let advertise = |row: &[UsedEntry]| -> Vec<UsedEntry> { row.iter().map(|&e| reservation::advertised(e, node)).collect() };
        let message = reservation::encode(&advertise(previous), &advertise(current));
        let standing: Vec<usize> = (0..data_slots)
            .filter(|&s| {
                let own = |e: &UsedEntry| e.is_claimed() && e.owner == node;
                own(&previous[s]) && own(&current[s])
            })
            .collect();

        let frame = Frame {
            header: MacHeader {
                uid: ctx.uids.next_uid(),
                kind: FrameKind::Reservation,
                transmitter: MacAddress::from_node(node),
                receiver: MacAddress::BROADCAST,
                source: node,
                destination: node,
                created_at: ctx.events.now(),
            },
            payload: message.into_bytes(),
        };
        ctx.stats.record_transmission(frame.size(), false);
        ctx.stats.reservation_messages += 1;
        let outcome = ctx.channel.transmit(node, &frame, ctx.events, ctx.mobility, ctx.stats);

        for slot in standing {
            self.add_slot(self.node_count + slot, node);
        }
        outcome
    }

    /// Merge a received status message into `observer`'s view.
    ///
    /// Claims with priority zero or at/above the priority threshold are ignored. For
    /// every other claim, in both generations:
    /// - an unclaimed local entry adopts the claim;
    /// - a local entry owned by the observer but claimed by someone else is
    ///   overwritten, and the observer loses its grant for that slot;
    /// - a local entry owned by a third party is overwritten only by a strictly
    ///   closer (smaller) priority.
    ///
    /// # Returns
    ///
    /// The number of own claims lost to conflicts, or the parse error if the message
    /// was rejected as a whole (nothing is updated then).
    pub fn update(&mut self, message: &[u8], observer: NodeId, stats: &mut RunStats) -> Result<usize, ParseError> {
        let status = reservation::decode(message, self.frame.data_slots)?;
        let mut conflicts = 0;
        for (generation, claims) in [(Generation::Previous, &status.previous), (Generation::Current, &status.current)] {
            for (slot, incoming) in claims.iter().enumerate() {
                let Some(incoming) = *incoming else {
                    log::debug!("Node {} skipped unreadable claim for slot {}", observer, slot);
                    continue;
                };
                if !incoming.is_claimed() || incoming.priority >= self.priority_threshold {
                    continue;
                }
                let Some(local) = self.used.get(generation, observer, slot) else {
                    continue;
                };
                if !local.is_claimed() {
                    self.used.set(generation, observer, slot, incoming);
                } else if local.owner == observer && incoming.owner != observer {
                    self.used.set(generation, observer, slot, incoming);
                    self.delete_slot(self.node_count + slot, observer);
                    conflicts += 1;
                    log::debug!(
                        "Node {} lost data slot {} ({:?}) to node {}",
                        observer,
                        slot,
                        generation,
                        incoming.owner
                    );
                } else if local.owner != observer && local.priority > incoming.priority {
                    self.used.set(generation, observer, slot, incoming);
                }
            }
        }
        stats.reservation_conflicts += conflicts as u64;
        Ok(conflicts)
    }

    /// Current-generation claims as seen by `node`.
    pub fn usage_snapshot(&self, node: NodeId) -> Vec<UsedEntry> {
        self.used
            .row(Generation::Current, node)
            .map(<[UsedEntry]>::to_vec)
            .unwrap_or_default()
    }

    /// Drain `node`'s reward accumulator, leaving it zeroed.
    pub fn take_reward(&mut self, node: NodeId) -> Vec<f32> {
        match self.rewards.get_mut(node) {
            Some(rewards) => {
                let drained = rewards.clone();
                rewards.fill(0.0);
                drained
            }
            None => vec![0.0; self.max_slots_per_action],
        }
    }

    /// Shift the control slot permutation by one epoch.
    ///
    /// Slot 0 keeps its node. The remaining control slots are interleaved at three
    /// levels: each group of 3 rotates by one, each block of 7 groups rotates by one
    /// group, and the run of whole blocks rotates by one block.
    pub fn advance_control_rotation(&mut self) {
        if self.ctrl_slot_map.len() > 1 {
            let rotating = &mut self.ctrl_slot_map[1..];
            for group in rotating.chunks_mut(ROTATION_SMALL) {
                group.rotate_right(1);
            }
            let block = ROTATION_SMALL * ROTATION_LARGE;
            for chunk in rotating.chunks_mut(block) {
                let len = chunk.len();
                chunk.rotate_right(ROTATION_SMALL % len);
            }
            let span = (rotating.len() / block) * block;
            if span > block {
                rotating[..span].rotate_right(block);
            }
        }
        self.assign_control_slots();
    }

    fn assign_control_slots(&mut self) {
        for slot in 0..self.node_count {
            self.slot_map[slot] = vec![self.ctrl_slot_map[slot]];
        }
    }
}
