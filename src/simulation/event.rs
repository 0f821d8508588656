//! Event types and priority queue for the discrete-event simulation.
//!
//! The queue is the only notion of time in the simulator. Every state transition
//! happens inside the handler of a popped event; "waiting" is expressed by
//! scheduling another event and returning.
//!
//! Ordering: events are popped by `(time, sequence number)`, so callbacks scheduled
//! for the same virtual instant run in the order they were scheduled. Collision
//! detection on the channel depends on this.
//!
//! Cancellation: a scheduled event may be cancelled any time before it fires. A
//! cancelled event is silently discarded when its time comes; cancelling after it
//! fired is a no-op.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use super::types::{Frame, NodeId};

/// Handle of a scheduled event, used for cancellation and status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

/// Events driving the TDMA simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Start a new TDMA frame.
    StartFrame,
    /// Run the given slot of the current frame.
    RunSlot(usize),
    /// A MAC finished sending a frame and may use the rest of its slot.
    ContinueSlot { node: NodeId, slot_end: Duration, is_control: bool },
    /// A frame arrives at a receiver after propagation.
    Deliver { receiver: NodeId, frame: Frame },
    /// The RL environment samples the system and applies the agent's action.
    EnvStep,
    /// The traffic source creates a packet at a node.
    TrafficArrival(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Pending,
    Cancelled,
}

struct ScheduledEvent<E> {
    time: Duration,
    seq: u64,
    event: E,
}

// Reverse ordering for min-heap (BinaryHeap is max-heap).
impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl<E> Eq for ScheduledEvent<E> {}

impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for ScheduledEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Virtual-time event queue with cancellable events.
pub struct EventQueue<E> {
    now: Duration,
    heap: BinaryHeap<ScheduledEvent<E>>,
    /// Events still in the heap, keyed by sequence number, with their time.
    live: HashMap<u64, (Duration, EventState)>,
    next_seq: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule an event `delay` after the current time.
    pub fn schedule(&mut self, delay: Duration, event: E) -> EventId {
        let time = self.now + delay;
        self.schedule_at(time, event)
    }

    /// Schedule an event at an absolute virtual time. Times in the past are clamped to now.
    pub fn schedule_at(&mut self, time: Duration, event: E) -> EventId {
        let time = time.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent { time, seq, event });
        self.live.insert(seq, (time, EventState::Pending));
        EventId(seq)
    }

    /// Cancel a scheduled event.
    ///
    /// Returns `true` if the event was pending. Cancelling an event that already fired,
    /// or was already cancelled, changes nothing and returns `false`.
    pub fn cancel(&mut self, id: EventId) -> bool {
        match self.live.get_mut(&id.0) {
            Some((_, state)) if *state == EventState::Pending => {
                *state = EventState::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Whether the event is scheduled and will still fire.
    #[cfg(test)]
    pub(crate) fn is_pending(&self, id: EventId) -> bool {
        matches!(self.live.get(&id.0), Some((_, EventState::Pending)))
    }

    /// Whether the event has been cancelled but its time has not been reached yet.
    #[cfg(test)]
    pub(crate) fn is_cancelled(&self, id: EventId) -> bool {
        matches!(self.live.get(&id.0), Some((_, EventState::Cancelled)))
    }

    /// Whether the event is gone from the queue: it fired, or it was cancelled and its
    /// time has been drained.
    pub fn is_expired(&self, id: EventId) -> bool {
        !self.live.contains_key(&id.0)
    }

    /// Time left until a pending event fires. `None` once fired or cancelled.
    #[cfg(test)]
    pub(crate) fn delay_left(&self, id: EventId) -> Option<Duration> {
        match self.live.get(&id.0) {
            Some((time, EventState::Pending)) => Some(time.saturating_sub(self.now)),
            _ => None,
        }
    }

    /// Time of the next event that will fire, skipping cancelled ones.
    pub fn peek_time(&mut self) -> Option<Duration> {
        self.drain_cancelled_head();
        self.heap.peek().map(|e| e.time)
    }

    /// Pop the next event, advancing the clock to its time.
    pub fn pop(&mut self) -> Option<(Duration, E)> {
        self.drain_cancelled_head();
        let scheduled = self.heap.pop()?;
        self.live.remove(&scheduled.seq);
        self.now = scheduled.time;
        Some((scheduled.time, scheduled.event))
    }

    /// Number of events that will still fire.
    pub fn len(&self) -> usize {
        self.live.values().filter(|(_, state)| *state == EventState::Pending).count()
    }

    /// Drop every scheduled event. Used at simulation teardown.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    fn drain_cancelled_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if !matches!(self.live.get(&head.seq), Some((_, EventState::Cancelled))) {
                break;
            }
            let seq = head.seq;
            self.heap.pop();
            self.live.remove(&seq);
        }
    }
}
