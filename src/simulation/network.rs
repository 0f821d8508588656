//! Simulation engine.
//!
//! Owns every piece of run state and drives it from a single event queue:
//!
//! 1) The controller schedules frames and slots; MACs transmit in the slots they
//!    are entitled to and the channel schedules deliveries.
//! 2) After every control slot the environment samples one node, hands the step
//!    to the agent and applies the returned slot choices, which broadcasts the
//!    node's reservation status.
//! 3) Delivered status messages update the receiver's slot usage view; delivered
//!    data is counted or forwarded.
//! 4) The traffic source keeps the data queues fed.
//!
//! The loop stops once the next event lies past the configured duration. The
//! agent then receives a final `done` step and the channel and event queue are
//! cleared.

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;

use crate::rl::{Agent, Environment, HttpAgent, RandomAgent};

use super::channel::BroadcastChannel;
use super::config::{AgentConfig, SimulationConfig};
use super::controller::Controller;
use super::event::{Event, EventQueue};
use super::geometry::StaticMobility;
use super::mac::{MacContext, Received, TdmaMac};
use super::metrics::{RunReport, RunStats};
use super::routing::StaticRouting;
use super::signal_calculations::{bytes_per_slot, is_control_slot};
use super::traffic::TrafficSource;
use super::types::{FrameIds, MacAddress};

/// Build the agent selected in the configuration.
fn create_agent(config: &SimulationConfig) -> anyhow::Result<Box<dyn Agent>> {
    match &config.environment.agent {
        AgentConfig::Random => {
            let capacity = bytes_per_slot(config.frame.slot_time(), config.frame.data_rate_bps);
            Ok(Box::new(RandomAgent::new(
                config.seed.wrapping_add(2),
                capacity,
                config.reservation.max_slots_per_action,
            )))
        }
        AgentConfig::Http { url, timeout_secs } => {
            let agent = HttpAgent::new(url, Duration::from_secs(*timeout_secs))
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Failed to set up agent at {}", url))?;
            Ok(Box::new(agent))
        }
    }
}

pub struct Simulation {
    config: SimulationConfig,
    events: EventQueue<Event>,
    controller: Controller,
    channel: BroadcastChannel,
    macs: Vec<TdmaMac>,
    mobility: StaticMobility,
    routing: StaticRouting,
    environment: Environment,
    agent: Box<dyn Agent>,
    traffic: TrafficSource,
    stats: RunStats,
    uids: FrameIds,
    horizon: Duration,
}

impl Simulation {
    /// Set up a run with the agent named in the configuration.
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        let agent = create_agent(&config)?;
        Ok(Self::with_agent(config, agent))
    }

    /// Set up a run driven by `agent`.
    pub fn with_agent(config: SimulationConfig, agent: Box<dyn Agent>) -> Self {
        let mut placement_rng = StdRng::seed_from_u64(config.seed);
        let mobility = StaticMobility::from_config(&config, &mut placement_rng);
        let routing = StaticRouting::from_positions(mobility.positions(), config.channel.max_range_m);

        let node_count = config.node_count();
        let mut channel = BroadcastChannel::new(config.channel.max_range_m);
        let macs: Vec<TdmaMac> = (0..node_count).map(|node| TdmaMac::new(node, &config.queue)).collect();
        for node in 0..node_count {
            channel.register_endpoint(node, MacAddress::from_node(node));
        }

        log::info!(
            "Simulation set up: {} nodes, {} data slots, range {} m, horizon {:.3} s",
            node_count,
            config.frame.data_slots,
            config.channel.max_range_m,
            config.duration_secs
        );

        Self {
            events: EventQueue::new(),
            controller: Controller::new(&config),
            environment: Environment::new(&config),
            traffic: TrafficSource::new(&config.traffic, config.seed.wrapping_add(1)),
            stats: RunStats::new(),
            uids: FrameIds::new(),
            horizon: config.duration(),
            channel,
            macs,
            mobility,
            routing,
            agent,
            config,
        }
    }

    /// Run until the horizon and return the report.
    pub fn run(&mut self) -> RunReport {
        if let Err(e) = self.agent.begin(&self.environment.spaces()) {
            log::warn!("Agent failed to start: {}", e);
            self.stats.agent_errors += 1;
        }
        self.controller.start(&mut self.events);
        self.traffic.start(self.macs.len(), &mut self.events);

        while let Some(time) = self.events.peek_time() {
            if time > self.horizon {
                break;
            }
            let Some((_, event)) = self.events.pop() else {
                break;
            };
            self.dispatch(event);
        }

        self.finish();
        self.report()
    }

    /// Summary of the counters collected so far.
    pub fn report(&self) -> RunReport {
        let measured = self.horizon.saturating_sub(self.config.traffic_start());
        RunReport::new(
            &self.stats,
            self.config.seed,
            self.macs.len(),
            self.config.frame.data_slots,
            self.horizon,
            measured,
            self.controller.frame_duration(),
        )
    }

    fn dispatch(&mut self, event: Event) {
        let Simulation {
            config,
            events,
            controller,
            channel,
            macs,
            mobility,
            routing,
            environment,
            agent,
            traffic,
            stats,
            uids,
            ..
        } = self;
        let node_count = macs.len();
        let mut ctx = MacContext {
            events,
            channel,
            mobility: &*mobility,
            routing: &*routing,
            stats,
            uids,
            data_rate_bps: config.frame.data_rate_bps,
        };

        match event {
            Event::StartFrame => {
                controller.run_frame(macs.as_mut_slice(), &mut ctx);
                ctx.events.schedule(Duration::ZERO, Event::EnvStep);
            }
            Event::RunSlot(slot) => {
                controller.run_slot(slot, macs.as_mut_slice(), &mut ctx);
                if is_control_slot(slot, node_count) {
                    ctx.events.schedule(Duration::ZERO, Event::EnvStep);
                }
            }
            Event::ContinueSlot { node, slot_end, is_control } => match macs.get_mut(node) {
                Some(mac) => mac.continue_slot(slot_end, is_control, &mut ctx),
                None => log::warn!("Slot continuation for unknown node {}", node),
            },
            Event::Deliver { receiver, frame } => {
                let Some(mac) = macs.get_mut(receiver) else {
                    log::warn!("Delivery to unknown node {}", receiver);
                    return;
                };
                if let Received::Status(payload) = mac.receive(frame, &mut ctx) {
                    if let Err(e) = controller.update(&payload, receiver, ctx.stats) {
                        ctx.stats.malformed_reservations += 1;
                        log::debug!("Node {} discarded reservation message: {}", receiver, e);
                    }
                }
            }
            Event::EnvStep => Self::env_step(environment, &mut **agent, controller, macs, &mut ctx),
            Event::TrafficArrival(node) => match macs.get_mut(node) {
                Some(mac) => {
                    traffic.on_arrival(node, mac, &mut ctx);
                }
                None => log::warn!("Traffic arrival for unknown node {}", node),
            },
        }
    }

    /// Sample the next node, consult the agent and apply its action.
    fn env_step(environment: &mut Environment, agent: &mut dyn Agent, controller: &mut Controller, macs: &[TdmaMac], ctx: &mut MacContext<'_>) {
        let node = environment.current_node();
        let Some(mac) = macs.get(node) else {
            environment.advance();
            return;
        };
        let now = ctx.now();
        let observation = environment.observe(node, controller, mac.queue(), ctx.routing);
        let rewards = environment.reward(node, controller);
        let done = environment.is_done(now);
        let step = environment.step(node, observation, rewards, done, ctx.stats, now);
        if done {
            return;
        }

        let action = match agent.act(&step) {
            Ok(action) => action,
            Err(e) => {
                log::warn!("Agent failed at step {} (node {}): {}", environment.counter(), node, e);
                ctx.stats.agent_errors += 1;
                environment.idle_action()
            }
        };
        let outcome = environment.apply_action(node, &action, controller, ctx);
        log::trace!(
            "Step {}: node {} chose {:?}, status reached {} nodes ({} collisions)",
            environment.counter(),
            node,
            action,
            outcome.reached,
            outcome.collisions
        );
        ctx.stats.env_steps += 1;
        environment.advance();
    }

    /// Send the final step to the agent and tear the run down.
    fn finish(&mut self) {
        let node = self.environment.current_node();
        let now = self.events.now();
        if let Some(mac) = self.macs.get(node) {
            let observation = self.environment.observe(node, &self.controller, mac.queue(), &self.routing);
            let rewards = self.environment.reward(node, &mut self.controller);
            let step = self.environment.step(node, observation, rewards, true, &self.stats, now);
            if let Err(e) = self.agent.finish(&step) {
                log::warn!("Agent failed to finish: {}", e);
                self.stats.agent_errors += 1;
            }
        }

        let stranded: usize = self.macs.iter_mut().map(TdmaMac::flush).sum();
        let discarded = self.events.len();
        self.channel.clear();
        self.events.clear();
        log::debug!("Discarded {} pending events past the horizon", discarded);
        log::info!(
            "Simulation finished at {:?}: {} frames, {} steps, {} packets delivered, {} collisions, {} bytes left queued",
            now,
            self.stats.frames_completed,
            self.stats.env_steps,
            self.stats.delivered_packets,
            self.stats.collisions,
            stranded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::{Action, Spaces, Step};
    use crate::simulation::controller::FIRST_FRAME_DELAY;
    use crate::simulation::geometry::Point;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Claims a fixed slot per node and records every step it sees.
    struct ScriptedAgent {
        slots: Vec<i32>,
        seen: Rc<RefCell<Vec<Step>>>,
        finished: Rc<RefCell<Option<Step>>>,
    }

    impl Agent for ScriptedAgent {
        fn begin(&mut self, _spaces: &Spaces) -> Result<(), String> {
            Ok(())
        }

        fn act(&mut self, step: &Step) -> Result<Action, String> {
            self.seen.borrow_mut().push(step.clone());
            Ok(vec![self.slots[step.info.node]])
        }

        fn finish(&mut self, step: &Step) -> Result<(), String> {
            *self.finished.borrow_mut() = Some(step.clone());
            Ok(())
        }
    }

    struct FailingAgent;

    impl Agent for FailingAgent {
        fn begin(&mut self, _spaces: &Spaces) -> Result<(), String> {
            Ok(())
        }

        fn act(&mut self, _step: &Step) -> Result<Action, String> {
            Err("learner unavailable".to_string())
        }

        fn finish(&mut self, _step: &Step) -> Result<(), String> {
            Ok(())
        }
    }

    /// Three nodes on a line, 100 m apart; the ends cannot hear each other.
    fn line_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.nodes = (0..3).map(|i| Point::new(i as f64 * 100.0, 0.0)).collect();
        config.channel.max_range_m = 150.0;
        config.frame.data_slots = 4;
        config.duration_secs = 0.3;
        config.traffic.start_secs = 0.01;
        config.traffic.packet_size = 200;
        config.traffic.packets_per_second = 50.0;
        config
    }

    fn scripted(slots: Vec<i32>) -> (ScriptedAgent, Rc<RefCell<Vec<Step>>>, Rc<RefCell<Option<Step>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let finished = Rc::new(RefCell::new(None));
        let agent = ScriptedAgent {
            slots,
            seen: Rc::clone(&seen),
            finished: Rc::clone(&finished),
        };
        (agent, seen, finished)
    }

    #[test]
    fn disjoint_reservations_carry_traffic_without_collisions() {
        let (agent, seen, finished) = scripted(vec![0, 1, 2]);
        let mut sim = Simulation::with_agent(line_config(), Box::new(agent));
        let report = sim.run();

        let stats = &sim.stats;
        assert!(stats.frames_completed > 10);
        assert_eq!(stats.env_steps, stats.reservation_messages);
        assert_eq!(stats.collisions, 0);
        assert_eq!(stats.reservation_conflicts, 0);
        assert!(stats.delivered_packets > 0);
        assert!(report.throughput_bps > 0.0);

        let steps = seen.borrow();
        assert_eq!(steps.len() as u64, stats.env_steps);
        let nodes: Vec<usize> = steps.iter().take(6).map(|s| s.info.node).collect();
        assert_eq!(nodes, vec![0, 1, 2, 0, 1, 2]);
        assert!(steps.iter().all(|s| !s.done && s.observation.usage.len() == 4));
        assert!(steps.iter().all(|s| s.reward == 0.0));
        assert!(finished.borrow().as_ref().is_some_and(|s| s.done));
    }

    #[test]
    fn every_step_falls_on_a_control_slot() {
        let (agent, seen, _) = scripted(vec![0, 1, 2]);
        let config = line_config();
        let mut sim = Simulation::with_agent(config.clone(), Box::new(agent));
        sim.run();

        let frame = sim.controller.frame_duration();
        let control = config.frame.control_slot_time() + config.frame.guard_time();
        let first = FIRST_FRAME_DELAY;
        for (i, step) in seen.borrow().iter().enumerate() {
            let frame_index = (i / 3) as u32;
            let expected = first + frame * frame_index + control * (i % 3) as u32;
            assert_eq!(Duration::from_nanos(step.info.time_ns), expected);
        }
    }

    #[test]
    fn contended_slot_is_penalised() {
        // Everyone wants slot 0.
        let (agent, seen, _) = scripted(vec![0, 0, 0]);
        let mut sim = Simulation::with_agent(line_config(), Box::new(agent));
        sim.run();

        let penalty = line_config().reservation.used_slot_penalty;
        let steps = seen.borrow();
        assert!(steps.iter().any(|s| s.reward == penalty));
        assert!(steps.iter().filter(|s| s.info.node == 0).take(1).all(|s| s.reward == 0.0));
    }

    #[test]
    fn agent_errors_fall_back_to_empty_action() {
        let mut sim = Simulation::with_agent(line_config(), Box::new(FailingAgent));
        sim.run();
        let stats = &sim.stats;
        assert!(stats.env_steps > 0);
        assert_eq!(stats.agent_errors, stats.env_steps);
        assert_eq!(stats.reservation_messages, stats.env_steps);
        assert_eq!(stats.delivered_packets, 0);
    }

    #[test]
    fn teardown_clears_channel_and_respects_horizon() {
        let mut sim = Simulation::new(line_config()).unwrap();
        let report = sim.run();
        assert!(sim.channel.in_flight().is_empty());
        assert!(sim.macs.iter().all(|mac| mac.queue().total_queued_bytes() == 0));
        assert!(sim.events.now() <= Duration::from_millis(300));
        assert_eq!(report.node_count, 3);
        assert_eq!(report.data_slots, 4);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"frames_completed\""));
        assert!(json.contains("\"generated_at\""));
    }

    #[test]
    fn same_seed_reproduces_run() {
        let first = Simulation::new(line_config()).unwrap().run();
        let second = Simulation::new(line_config()).unwrap().run();
        assert_eq!(first.stats.delivered_packets, second.stats.delivered_packets);
        assert_eq!(first.stats.frames_sent, second.stats.frames_sent);
        assert_eq!(first.stats.offered_data_bytes, second.stats.offered_data_bytes);
    }
}
