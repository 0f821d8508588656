//! Type definitions shared across the simulation.
//!
//! Contains the data structures used by every layer of the link model:
//! - Node identifiers and 48-bit MAC addresses
//! - MAC frames (header + payload) exchanged over the broadcast channel
//! - Slot claim records (`UsedEntry`) kept by the reservation protocol
//! - The frame uid allocator used for queue bookkeeping

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Node identifier. Nodes are numbered densely from zero.
pub type NodeId = usize;

/// Fixed MAC overhead added to every payload: 24-byte header plus 4-byte FCS trailer.
pub const MAC_HEADER_BYTES: usize = 28;

/// 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Address allocated to a node: `00:00:00:00:00:01` for node 0 and so on.
    pub fn from_node(node_id: NodeId) -> Self {
        let value = (node_id as u64 + 1).to_be_bytes();
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&value[2..]);
        MacAddress(bytes)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

/// What a frame carries. Decides which queue it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    /// Application payload, contended through data slots.
    Data,
    /// Reservation status broadcast (`#TDMAUSED#...`).
    Reservation,
    /// Routing-protocol control traffic.
    Routing,
}

#[derive(Debug, Clone)]
pub struct MacHeader {
    /// Unique id of this frame within the run.
    pub uid: u64,
    pub kind: FrameKind,
    /// Address of the station currently transmitting the frame.
    pub transmitter: MacAddress,
    /// Link-layer receiver (next hop) or broadcast.
    pub receiver: MacAddress,
    /// Originating node of the payload.
    pub source: NodeId,
    /// Final destination of the payload.
    pub destination: NodeId,
    /// Virtual time the payload was created at its source.
    pub created_at: Duration,
}

/// A MAC frame as it travels over the channel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MacHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Size on air in bytes, including the MAC header and trailer.
    pub fn size(&self) -> usize {
        self.payload.len() + MAC_HEADER_BYTES
    }

    pub fn is_data(&self) -> bool {
        self.header.kind == FrameKind::Data
    }
}

/// Monotonic frame uid allocator owned by the simulation run.
#[derive(Debug, Default)]
pub struct FrameIds {
    next: u64,
}

impl FrameIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_uid(&mut self) -> u64 {
        let uid = self.next;
        self.next += 1;
        uid
    }
}

/// One slot claim in a node's local view: `(priority, owner)`.
///
/// Priority `0` means free/unknown. Priority `1` is a claim the node observed first-hand
/// (its own, or a direct neighbour's own claim); larger values were relayed over more hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UsedEntry {
    pub priority: u8,
    pub owner: NodeId,
}

impl UsedEntry {
    pub const FREE: UsedEntry = UsedEntry { priority: 0, owner: 0 };

    pub fn new(priority: u8, owner: NodeId) -> Self {
        Self { priority, owner }
    }

    pub fn is_claimed(&self) -> bool {
        self.priority != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_addresses_are_derived_from_node_ids() {
        assert_eq!(MacAddress::from_node(0).to_string(), "00:00:00:00:00:01");
        assert_eq!(MacAddress::from_node(299).to_string(), "00:00:00:00:01:2c");
        assert_ne!(MacAddress::from_node(3), MacAddress::from_node(4));
        assert!(!MacAddress::from_node(0).is_broadcast());
        assert!(MacAddress::BROADCAST.is_broadcast());
    }

    #[test]
    fn frame_size_includes_mac_overhead() {
        let frame = Frame {
            header: MacHeader {
                uid: 0,
                kind: FrameKind::Data,
                transmitter: MacAddress::from_node(0),
                receiver: MacAddress::from_node(1),
                source: 0,
                destination: 1,
                created_at: Duration::ZERO,
            },
            payload: vec![0; 100],
        };
        assert_eq!(frame.size(), 100 + MAC_HEADER_BYTES);
        assert!(frame.is_data());
    }

    #[test]
    fn frame_ids_are_unique() {
        let mut ids = FrameIds::new();
        let a = ids.next_uid();
        let b = ids.next_uid();
        assert_ne!(a, b);
    }
}
