//! Per-node slot usage history.
//!
//! Every node keeps its own view of who claims which data slot, in two
//! generations: the current frame and the previous frame. The table is sized
//! from configuration (`nodes × data_slots`) and all accessors are
//! bounds-checked.

use super::types::{NodeId, UsedEntry};

/// Which frame a row of claims belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Previous,
    Current,
}

#[derive(Debug, Clone)]
pub struct UsedTable {
    nodes: usize,
    slots: usize,
    previous: Vec<UsedEntry>,
    current: Vec<UsedEntry>,
}

impl UsedTable {
    pub fn new(nodes: usize, slots: usize) -> Self {
        Self {
            nodes,
            slots,
            previous: vec![UsedEntry::FREE; nodes * slots],
            current: vec![UsedEntry::FREE; nodes * slots],
        }
    }

    fn index(&self, node: NodeId, slot: usize) -> Option<usize> {
        (node < self.nodes && slot < self.slots).then(|| node * self.slots + slot)
    }

    fn generation(&self, generation: Generation) -> &[UsedEntry] {
        match generation {
            Generation::Previous => &self.previous,
            Generation::Current => &self.current,
        }
    }

    fn generation_mut(&mut self, generation: Generation) -> &mut [UsedEntry] {
        match generation {
            Generation::Previous => &mut self.previous,
            Generation::Current => &mut self.current,
        }
    }

    /// Claim recorded by `node` for `slot`. `None` if out of bounds.
    pub fn get(&self, generation: Generation, node: NodeId, slot: usize) -> Option<UsedEntry> {
        let idx = self.index(node, slot)?;
        Some(self.generation(generation)[idx])
    }

    /// Record a claim. Returns `false` (and changes nothing) if out of bounds.
    pub fn set(&mut self, generation: Generation, node: NodeId, slot: usize, entry: UsedEntry) -> bool {
        match self.index(node, slot) {
            Some(idx) => {
                self.generation_mut(generation)[idx] = entry;
                true
            }
            None => false,
        }
    }

    /// All claims `node` knows of in one generation.
    pub fn row(&self, generation: Generation, node: NodeId) -> Option<&[UsedEntry]> {
        if node >= self.nodes {
            return None;
        }
        let start = node * self.slots;
        Some(&self.generation(generation)[start..start + self.slots])
    }

    /// Move every node's current claims into the previous generation and clear the current one.
    pub fn rotate(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        self.current.fill(UsedEntry::FREE);
    }
}
