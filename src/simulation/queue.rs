//! Per-node MAC transmit queues.
//!
//! Each node has two bounded FIFO queues: one for link-layer control and routing
//! traffic, one for data. Items age out after a maximum delay; expired items are
//! pruned lazily on every access and reported through a drop callback.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use super::reservation::CONTROL_PREFIX;
use super::types::{Frame, FrameKind, NodeId};

/// Largest frame the queue accepts (bytes, including MAC overhead).
const MAX_FRAME_BYTES: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Control,
    Data,
}

impl QueueKind {
    /// Queue a frame belongs to: reservation/control payloads and routing traffic go to
    /// the control queue, everything else to the data queue.
    pub fn classify(frame: &Frame) -> Self {
        if frame.header.kind == FrameKind::Routing || frame.payload.starts_with(CONTROL_PREFIX) {
            QueueKind::Control
        } else {
            QueueKind::Data
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Expired,
    QueueFull,
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    QueueFull(QueueKind),
    TooLarge(usize),
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::QueueFull(kind) => write!(f, "{:?} queue is full", kind),
            EnqueueError::TooLarge(size) => write!(f, "frame of {} bytes exceeds {} bytes", size, MAX_FRAME_BYTES),
        }
    }
}

impl std::error::Error for EnqueueError {}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub frame: Frame,
    pub enqueued_at: Duration,
}

/// Callback notified once for every item the queue drops.
pub(crate) type DropCallback<'a> = &'a mut dyn FnMut(&QueueItem, DropReason);

#[derive(Debug)]
pub struct MacQueue {
    control: VecDeque<QueueItem>,
    data: VecDeque<QueueItem>,
    max_packets: usize,
    max_delay: Duration,
    /// Bytes currently held in the data queue.
    queued_bytes: usize,
}

impl MacQueue {
    pub fn new(max_packets: usize, max_delay: Duration) -> Self {
        Self {
            control: VecDeque::new(),
            data: VecDeque::new(),
            max_packets,
            max_delay,
            queued_bytes: 0,
        }
    }

    fn queue(&self, kind: QueueKind) -> &VecDeque<QueueItem> {
        match kind {
            QueueKind::Control => &self.control,
            QueueKind::Data => &self.data,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut VecDeque<QueueItem> {
        match kind {
            QueueKind::Control => &mut self.control,
            QueueKind::Data => &mut self.data,
        }
    }

    /// Add a frame to the queue its payload belongs to.
    ///
    /// Expired items are pruned first. A frame that does not fit (queue at capacity
    /// or oversized) is reported to `on_drop` and rejected.
    ///
    /// # Returns
    ///
    /// The queue the frame was placed in, or the reason it was rejected.
    pub fn enqueue(&mut self, frame: Frame, now: Duration, on_drop: DropCallback<'_>) -> Result<QueueKind, EnqueueError> {
        self.cleanup(QueueKind::Data, now, on_drop);
        self.cleanup(QueueKind::Control, now, on_drop);

        let kind = QueueKind::classify(&frame);
        let size = frame.size();
        let item = QueueItem { frame, enqueued_at: now };
        if size > MAX_FRAME_BYTES {
            on_drop(&item, DropReason::TooLarge);
            return Err(EnqueueError::TooLarge(size));
        }
        if self.queue(kind).len() >= self.max_packets {
            log::debug!("Dropping frame {}: {:?} queue full", item.frame.header.uid, kind);
            on_drop(&item, DropReason::QueueFull);
            return Err(EnqueueError::QueueFull(kind));
        }

        if kind == QueueKind::Data {
            self.queued_bytes += size;
        }
        self.queue_mut(kind).push_back(item);
        Ok(kind)
    }

    /// Drop every item of `kind` whose age reached the maximum delay.
    pub fn cleanup(&mut self, kind: QueueKind, now: Duration, on_drop: DropCallback<'_>) {
        let max_delay = self.max_delay;
        let mut removed_bytes = 0;
        self.queue_mut(kind).retain(|item| {
            if item.enqueued_at + max_delay > now {
                return true;
            }
            log::debug!(
                "Dropping frame {} after {:?} in queue",
                item.frame.header.uid,
                now.saturating_sub(item.enqueued_at)
            );
            on_drop(item, DropReason::Expired);
            removed_bytes += item.frame.size();
            false
        });
        if kind == QueueKind::Data {
            self.queued_bytes -= removed_bytes;
        }
    }

    /// Pop the oldest item of `kind`, pruning expired items of both queues first.
    pub fn dequeue(&mut self, kind: QueueKind, now: Duration, on_drop: DropCallback<'_>) -> Option<QueueItem> {
        self.cleanup(QueueKind::Control, now, on_drop);
        self.cleanup(QueueKind::Data, now, on_drop);
        let item = self.queue_mut(kind).pop_front()?;
        if kind == QueueKind::Data {
            self.queued_bytes -= item.frame.size();
        }
        Some(item)
    }

    /// Oldest item of `kind` without removing it. Prunes expired items first.
    pub fn peek(&mut self, kind: QueueKind, now: Duration, on_drop: DropCallback<'_>) -> Option<&QueueItem> {
        self.cleanup(QueueKind::Control, now, on_drop);
        self.cleanup(QueueKind::Data, now, on_drop);
        self.queue(kind).front()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&mut self, kind: QueueKind, now: Duration, on_drop: DropCallback<'_>) -> bool {
        self.cleanup(kind, now, on_drop);
        self.queue(kind).is_empty()
    }

    /// Number of items currently held, expired or not.
    #[cfg(test)]
    pub(crate) fn len(&self, kind: QueueKind) -> usize {
        self.queue(kind).len()
    }

    /// Remove the frame with the given uid. Returns `false` if it was not queued.
    pub fn remove(&mut self, kind: QueueKind, uid: u64) -> bool {
        let queue = self.queue_mut(kind);
        let Some(pos) = queue.iter().position(|item| item.frame.header.uid == uid) else {
            return false;
        };
        if let Some(item) = queue.remove(pos) {
            if kind == QueueKind::Data {
                self.queued_bytes -= item.frame.size();
            }
        }
        true
    }

    /// Empty both queues without notifying.
    pub fn flush(&mut self) {
        self.control.clear();
        self.data.clear();
        self.queued_bytes = 0;
    }

    /// The `k` destinations with the most queued payload bytes in the data queue.
    ///
    /// Sorted by bytes, descending; destinations with equal volume keep the order in
    /// which they first appear in the queue.
    pub fn top_k_by_destination(&self, k: usize) -> Vec<(NodeId, usize)> {
        let mut order: Vec<NodeId> = Vec::new();
        let mut totals: HashMap<NodeId, usize> = HashMap::new();
        for item in &self.data {
            let destination = item.frame.header.destination;
            let total = totals.entry(destination).or_insert_with(|| {
                order.push(destination);
                0
            });
            *total += item.frame.payload.len();
        }

        let mut ranked: Vec<(NodeId, usize)> = order.into_iter().map(|d| (d, totals[&d])).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(k);
        ranked
    }

    /// Running total of bytes held in the data queue.
    pub fn total_queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}
