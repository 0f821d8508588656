//! Environment adapter between the TDMA scheduler and an agent.
//!
//! The simulation triggers one step per control slot. Node `counter mod N` is
//! sampled, so over a frame every node gets exactly one step, and the long data
//! phase separates the last step of a frame from the first step of the next.

use std::time::Duration;

use crate::simulation::channel::TransmitOutcome;
use crate::simulation::config::SimulationConfig;
use crate::simulation::controller::Controller;
use crate::simulation::mac::MacContext;
use crate::simulation::metrics::RunStats;
use crate::simulation::queue::MacQueue;
use crate::simulation::routing::RoutingProvider;
use crate::simulation::types::NodeId;

use super::{Action, BoxSpace, NO_SLOT, Observation, ObservationSpace, Spaces, Step, StepInfo};

pub struct Environment {
    node_count: usize,
    data_slots: usize,
    top_k: usize,
    max_slots: usize,
    horizon: Duration,
    counter: u64,
}

impl Environment {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            node_count: config.node_count(),
            data_slots: config.frame.data_slots,
            top_k: config.environment.top_k,
            max_slots: config.reservation.max_slots_per_action,
            horizon: config.duration(),
            counter: 0,
        }
    }

    /// Action and observation shapes for this configuration.
    pub fn spaces(&self) -> Spaces {
        Spaces {
            action: BoxSpace {
                low: NO_SLOT as i64,
                high: self.data_slots as i64 - 1,
                shape: vec![self.max_slots],
            },
            observation: ObservationSpace {
                usage: BoxSpace {
                    low: -1,
                    high: self.top_k as i64,
                    shape: vec![self.data_slots],
                },
                top_k_bytes: BoxSpace {
                    low: 0,
                    high: i64::MAX,
                    shape: vec![self.top_k],
                },
            },
        }
    }

    /// Steps taken so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Node sampled by the next step.
    pub fn current_node(&self) -> NodeId {
        if self.node_count == 0 {
            return 0;
        }
        (self.counter % self.node_count as u64) as NodeId
    }

    /// Move on to the next node.
    pub fn advance(&mut self) {
        self.counter += 1;
    }

    /// Build `node`'s observation.
    ///
    /// # Parameters
    ///
    /// * `node` - Sampled node
    /// * `controller` - Source of the node's current-generation usage view
    /// * `queue` - The node's MAC queue
    /// * `routing` - Maps top destinations to the neighbour that carries them
    ///
    /// # Returns
    ///
    /// The usage vector re-coded by top-K rank plus the node's backlog summary.
    /// Destinations without a route never match a claimant.
    pub fn observe(&self, node: NodeId, controller: &Controller, queue: &MacQueue, routing: &dyn RoutingProvider) -> Observation {
        let top = queue.top_k_by_destination(self.top_k);
        let next_hops: Vec<Option<NodeId>> = top.iter().map(|&(destination, _)| routing.next_hop(node, destination)).collect();

        let usage = controller
            .usage_snapshot(node)
            .iter()
            .map(|entry| {
                if !entry.is_claimed() {
                    return 0;
                }
                if entry.owner == node {
                    return -1;
                }
                next_hops
                    .iter()
                    .position(|hop| *hop == Some(entry.owner))
                    .map_or(-1, |rank| rank as i32 + 1)
            })
            .collect();

        let mut top_k_bytes: Vec<u64> = top.iter().map(|&(_, bytes)| bytes as u64).collect();
        top_k_bytes.resize(self.top_k, 0);

        Observation {
            usage,
            queued_bytes: queue.total_queued_bytes() as u64,
            top_k_bytes,
        }
    }

    /// Drain `node`'s reward accumulator.
    pub fn reward(&self, node: NodeId, controller: &mut Controller) -> Vec<f32> {
        controller.take_reward(node)
    }

    /// Apply the agent's choice for `node` and broadcast its reservation.
    ///
    /// Sentinel and out-of-range entries are skipped.
    pub fn apply_action(&self, node: NodeId, action: &[i32], controller: &mut Controller, ctx: &mut MacContext<'_>) -> TransmitOutcome {
        for &slot in action {
            if slot == NO_SLOT {
                continue;
            }
            match usize::try_from(slot) {
                Ok(slot) if slot < self.data_slots => controller.set_rl_action(slot),
                _ => log::debug!("Node {} ignored invalid slot choice {}", node, slot),
            }
        }
        controller.reserve(node, ctx)
    }

    /// Whether simulated time has passed the horizon.
    pub fn is_done(&self, now: Duration) -> bool {
        now > self.horizon
    }

    /// Assemble the transition handed to the agent.
    pub fn step(&self, node: NodeId, observation: Observation, rewards: Vec<f32>, done: bool, stats: &RunStats, now: Duration) -> Step {
        Step {
            observation,
            reward: rewards.iter().sum(),
            done,
            info: StepInfo {
                node,
                time_ns: now.as_nanos() as u64,
                rewards,
                throughput_bps: stats.throughput_bps(now),
                average_delay_ms: stats.average_delay().as_secs_f64() * 1000.0,
            },
        }
    }

    /// Empty action of the right length.
    pub fn idle_action(&self) -> Action {
        vec![NO_SLOT; self.max_slots]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::channel::BroadcastChannel;
    use crate::simulation::event::{Event, EventQueue};
    use crate::simulation::geometry::{Point, StaticMobility};
    use crate::simulation::queue::{DropReason, QueueItem};
    use crate::simulation::reservation;
    use crate::simulation::routing::StaticRouting;
    use crate::simulation::types::{Frame, FrameIds, FrameKind, MacAddress, MacHeader, UsedEntry};

    fn config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.nodes = (0..4).map(|i| Point::new(i as f64 * 100.0, 0.0)).collect();
        config.channel.max_range_m = 150.0;
        config.frame.data_slots = 6;
        config.duration_secs = 2.0;
        config
    }

    fn data_frame(uid: u64, destination: NodeId, payload: usize) -> Frame {
        Frame {
            header: MacHeader {
                uid,
                kind: FrameKind::Data,
                transmitter: MacAddress::from_node(1),
                receiver: MacAddress::BROADCAST,
                source: 1,
                destination,
                created_at: Duration::ZERO,
            },
            payload: vec![0; payload],
        }
    }

    fn status(node: NodeId, claims: &[(usize, UsedEntry)], slots: usize) -> Vec<u8> {
        let mut current = vec![UsedEntry::FREE; slots];
        for &(slot, entry) in claims {
            current[slot] = entry;
        }
        let advertised: Vec<UsedEntry> = current.iter().map(|&e| reservation::advertised(e, node)).collect();
        reservation::encode(&vec![UsedEntry::FREE; slots], &advertised).into_bytes()
    }

    #[test]
    fn spaces_follow_configuration() {
        let env = Environment::new(&config());
        let spaces = env.spaces();
        assert_eq!(spaces.action.shape, vec![3]);
        assert_eq!(spaces.action.high, 5);
        assert_eq!(spaces.observation.usage.shape, vec![6]);
        assert_eq!(spaces.observation.top_k_bytes.shape, vec![3]);
        assert_eq!(env.idle_action(), vec![NO_SLOT; 3]);
    }

    #[test]
    fn sampled_node_cycles_through_all_nodes() {
        let mut env = Environment::new(&config());
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(env.current_node());
            env.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 0, 1]);
        assert_eq!(env.counter(), 6);
    }

    #[test]
    fn observation_codes_claimants_by_backlog_rank() {
        let config = config();
        let env = Environment::new(&config);
        let mut controller = Controller::new(&config);
        let positions = config.nodes.clone();
        let routing = StaticRouting::from_positions(&positions, config.channel.max_range_m);
        let mut stats = RunStats::new();

        // Node 1 hears node 0 claim slot 1 and node 2 claim slot 3, and claims slot 5 itself.
        controller.update(&status(0, &[(1, UsedEntry::new(1, 0))], 6), 1, &mut stats).unwrap();
        controller.update(&status(2, &[(3, UsedEntry::new(1, 2))], 6), 1, &mut stats).unwrap();

        // Node 1's backlog: most bytes towards 3 (via 2), then towards 0 (via 0).
        let mut queue = MacQueue::new(50, Duration::from_secs(10));
        let mut ignore = |_: &QueueItem, _: DropReason| {};
        queue.enqueue(data_frame(1, 3, 800), Duration::ZERO, &mut ignore).unwrap();
        queue.enqueue(data_frame(2, 0, 300), Duration::ZERO, &mut ignore).unwrap();

        let observation = env.observe(1, &controller, &queue, &routing);
        assert_eq!(observation.usage, vec![0, 2, 0, 1, 0, 0]);
        assert_eq!(observation.top_k_bytes, vec![800, 300, 0]);
        assert_eq!(observation.queued_bytes, queue.total_queued_bytes() as u64);
        assert_eq!(observation.free_slots(), vec![0, 2, 4, 5]);
    }

    #[test]
    fn unrelated_and_own_claims_are_negative() {
        let config = config();
        let env = Environment::new(&config);
        let mut controller = Controller::new(&config);
        let routing = StaticRouting::from_positions(&config.nodes, config.channel.max_range_m);
        let mut stats = RunStats::new();
        controller.update(&status(2, &[(0, UsedEntry::new(1, 2))], 6), 1, &mut stats).unwrap();

        let queue = MacQueue::new(50, Duration::from_secs(10));
        let observation = env.observe(1, &controller, &queue, &routing);
        assert_eq!(observation.usage[0], -1);
        assert_eq!(observation.top_k_bytes, vec![0, 0, 0]);
        assert_eq!(observation.queued_bytes, 0);
    }

    #[test]
    fn action_is_applied_and_broadcast() {
        let config = config();
        let env = Environment::new(&config);
        let mut controller = Controller::new(&config);
        let mobility = StaticMobility::new(config.nodes.clone());
        let routing = StaticRouting::from_positions(&config.nodes, config.channel.max_range_m);
        let mut channel = BroadcastChannel::new(config.channel.max_range_m);
        for node in 0..config.node_count() {
            channel.register_endpoint(node, MacAddress::from_node(node));
        }
        let mut events: EventQueue<Event> = EventQueue::new();
        let mut stats = RunStats::new();
        let mut uids = FrameIds::new();
        let mut ctx = MacContext {
            events: &mut events,
            channel: &mut channel,
            mobility: &mobility,
            routing: &routing,
            stats: &mut stats,
            uids: &mut uids,
            data_rate_bps: config.frame.data_rate_bps,
        };

        let outcome = env.apply_action(1, &[4, NO_SLOT, 9, -7], &mut controller, &mut ctx);
        // Nodes 0 and 2 are in range of node 1.
        assert_eq!(outcome.reached, 2);
        assert_eq!(ctx.stats.reservation_messages, 1);
        let snapshot = controller.usage_snapshot(1);
        assert_eq!(snapshot[4], UsedEntry::new(1, 1));
        assert!(snapshot.iter().enumerate().all(|(slot, e)| slot == 4 || !e.is_claimed()));
    }

    #[test]
    fn reward_is_drained_once() {
        let config = config();
        let env = Environment::new(&config);
        let mut controller = Controller::new(&config);
        let mut stats = RunStats::new();
        controller.update(&status(0, &[(2, UsedEntry::new(1, 0))], 6), 1, &mut stats).unwrap();

        let mobility = StaticMobility::new(config.nodes.clone());
        let routing = StaticRouting::from_positions(&config.nodes, config.channel.max_range_m);
        let mut channel = BroadcastChannel::new(config.channel.max_range_m);
        for node in 0..config.node_count() {
            channel.register_endpoint(node, MacAddress::from_node(node));
        }
        let mut events: EventQueue<Event> = EventQueue::new();
        let mut uids = FrameIds::new();
        let mut ctx = MacContext {
            events: &mut events,
            channel: &mut channel,
            mobility: &mobility,
            routing: &routing,
            stats: &mut stats,
            uids: &mut uids,
            data_rate_bps: config.frame.data_rate_bps,
        };
        env.apply_action(1, &[2], &mut controller, &mut ctx);

        let rewards = env.reward(1, &mut controller);
        assert_eq!(rewards, vec![config.reservation.used_slot_penalty, 0.0, 0.0]);
        assert_eq!(env.reward(1, &mut controller), vec![0.0; 3]);

        let step = env.step(1, env.observe(1, &controller, &MacQueue::new(1, Duration::ZERO), &routing), rewards, false, ctx.stats, Duration::from_secs(1));
        assert_eq!(step.reward, config.reservation.used_slot_penalty);
        assert_eq!(step.info.node, 1);
    }

    #[test]
    fn done_after_horizon() {
        let env = Environment::new(&config());
        assert!(!env.is_done(Duration::from_secs(2)));
        assert!(env.is_done(Duration::from_millis(2001)));
    }
}
