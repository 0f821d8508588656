//! Agents answering environment steps.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::{Action, NO_SLOT, Spaces, Step};

/// Decision maker driving slot reservation.
///
/// Errors are reported as strings; the environment logs them and carries on
/// with an empty action.
pub trait Agent {
    /// Called once before the first step.
    fn begin(&mut self, spaces: &Spaces) -> Result<(), String>;

    /// Choose data slots for the node described by `step`.
    fn act(&mut self, step: &Step) -> Result<Action, String>;

    /// Called once with the final step of the run.
    fn finish(&mut self, step: &Step) -> Result<(), String>;
}

/// Requests as many random free slots as the backlog needs.
pub struct RandomAgent {
    rng: StdRng,
    bytes_per_slot: usize,
    max_slots: usize,
}

impl RandomAgent {
    pub fn new(seed: u64, bytes_per_slot: usize, max_slots: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            bytes_per_slot,
            max_slots,
        }
    }

    /// Number of slots worth requesting for `queued_bytes` when `free` slots are available.
    pub fn slots_wanted(&self, queued_bytes: u64, free: usize) -> usize {
        if queued_bytes == 0 {
            return 0;
        }
        let wanted = if self.bytes_per_slot == 0 {
            self.max_slots
        } else {
            let ratio = queued_bytes as f64 / self.bytes_per_slot as f64;
            (ratio - 0.3).trunc().max(0.0) as usize + 1
        };
        wanted.min(free).min(self.max_slots)
    }
}

impl Agent for RandomAgent {
    fn begin(&mut self, spaces: &Spaces) -> Result<(), String> {
        if let Some(&len) = spaces.action.shape.first() {
            self.max_slots = self.max_slots.min(len);
        }
        Ok(())
    }

    fn act(&mut self, step: &Step) -> Result<Action, String> {
        let free = step.observation.free_slots();
        let count = self.slots_wanted(step.observation.queued_bytes, free.len());
        let mut action: Action = free.choose_multiple(&mut self.rng, count).map(|&slot| slot as i32).collect();
        action.sort_unstable();
        action.resize(self.max_slots, NO_SLOT);
        Ok(action)
    }

    fn finish(&mut self, _step: &Step) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::{Observation, StepInfo};

    fn step(usage: Vec<i32>, queued_bytes: u64) -> Step {
        Step {
            observation: Observation {
                usage,
                queued_bytes,
                top_k_bytes: vec![queued_bytes, 0, 0],
            },
            reward: 0.0,
            done: false,
            info: StepInfo {
                node: 0,
                time_ns: 0,
                rewards: vec![0.0; 3],
                throughput_bps: 0.0,
                average_delay_ms: 0.0,
            },
        }
    }

    #[test]
    fn empty_queue_requests_nothing() {
        let mut agent = RandomAgent::new(1, 1000, 3);
        let action = agent.act(&step(vec![0; 8], 0)).unwrap();
        assert_eq!(action, vec![NO_SLOT; 3]);
    }

    #[test]
    fn backlog_sets_number_of_slots() {
        let agent = RandomAgent::new(1, 1000, 3);
        assert_eq!(agent.slots_wanted(100, 8), 1);
        assert_eq!(agent.slots_wanted(1200, 8), 1);
        assert_eq!(agent.slots_wanted(1400, 8), 2);
        assert_eq!(agent.slots_wanted(10_000, 8), 3);
        assert_eq!(agent.slots_wanted(10_000, 2), 2);
    }

    #[test]
    fn only_free_slots_are_chosen() {
        let mut agent = RandomAgent::new(7, 100, 3);
        let usage = vec![-1, 0, 2, 0, 1, -1, 0, 3];
        for _ in 0..20 {
            let action = agent.act(&step(usage.clone(), 10_000)).unwrap();
            assert_eq!(action.len(), 3);
            assert_eq!(action, vec![1, 3, 6]);
        }
    }

    #[test]
    fn action_shape_caps_slot_count() {
        let mut agent = RandomAgent::new(7, 100, 5);
        let spaces = Spaces {
            action: crate::rl::BoxSpace {
                low: -1,
                high: 7,
                shape: vec![2],
            },
            observation: crate::rl::ObservationSpace {
                usage: crate::rl::BoxSpace {
                    low: -1,
                    high: 3,
                    shape: vec![8],
                },
                top_k_bytes: crate::rl::BoxSpace {
                    low: 0,
                    high: i64::MAX,
                    shape: vec![3],
                },
            },
        };
        agent.begin(&spaces).unwrap();
        let action = agent.act(&step(vec![0; 8], 10_000)).unwrap();
        assert_eq!(action.len(), 2);
        assert!(action.iter().all(|&slot| (0..8).contains(&slot)));
    }
}
