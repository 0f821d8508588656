//! Reservation status message codec.
//!
//! A status message is ASCII: the marker `#TDMAUSED#` followed by one 3-character
//! field per data slot for the previous generation, then one per data slot for the
//! current generation. Each field is `<priority digit><two-digit owner id>`, so
//! `103` means "priority 1, owned by node 3".
//!
//! Decoding never panics. A message with the wrong marker or length is rejected
//! as a whole; a field that is not numeric only invalidates its own slot.

use std::fmt;
use std::fmt::Write as _;

use super::types::{NodeId, UsedEntry};

const RESERVATION_MARKER: &str = "#TDMAUSED#";

/// Prefix shared by every link-layer control payload.
pub const CONTROL_PREFIX: &[u8] = b"#TDMA";

const FIELD_WIDTH: usize = 3;
const MAX_PRIORITY: u8 = 9;
const MAX_OWNER: NodeId = 99;

/// Decoded status message. `None` marks a slot whose field could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusMessage {
    pub previous: Vec<Option<UsedEntry>>,
    pub current: Vec<Option<UsedEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    NotUtf8,
    MissingMarker,
    WrongLength { expected: usize, actual: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotUtf8 => write!(f, "reservation message is not ASCII"),
            ParseError::MissingMarker => write!(f, "reservation marker missing"),
            ParseError::WrongLength { expected, actual } => {
                write!(f, "reservation body has {} bytes, expected {}", actual, expected)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Whether a payload is a reservation status message.
pub fn is_reservation(payload: &[u8]) -> bool {
    payload.starts_with(RESERVATION_MARKER.as_bytes())
}

/// How a node advertises one of its entries to neighbours.
///
/// Claims learned from others are relayed one hop further away (priority + 1,
/// saturating at 9); the node's own claims and free slots are sent unchanged.
pub fn advertised(entry: UsedEntry, self_id: NodeId) -> UsedEntry {
    if entry.is_claimed() && entry.owner != self_id {
        UsedEntry::new(entry.priority.saturating_add(1).min(MAX_PRIORITY), entry.owner)
    } else {
        entry
    }
}

/// Encode both generations into a status message.
///
/// The rows must have equal length; the decoder expects `2 × slots` fields.
pub fn encode(previous: &[UsedEntry], current: &[UsedEntry]) -> String {
    let mut msg = String::with_capacity(RESERVATION_MARKER.len() + FIELD_WIDTH * (previous.len() + current.len()));
    msg.push_str(RESERVATION_MARKER);
    for entry in previous.iter().chain(current) {
        let _ = write!(msg, "{}{:02}", entry.priority.min(MAX_PRIORITY), entry.owner.min(MAX_OWNER));
    }
    msg
}

/// Decode a status message carrying `slots` fields per generation.
pub fn decode(payload: &[u8], slots: usize) -> Result<StatusMessage, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::NotUtf8)?;
    let body = text.strip_prefix(RESERVATION_MARKER).ok_or(ParseError::MissingMarker)?;
    // Tolerate a C-style terminator.
    let body = body.trim_end_matches('\0');
    let expected = 2 * slots * FIELD_WIDTH;
    if body.len() != expected {
        return Err(ParseError::WrongLength {
            expected,
            actual: body.len(),
        });
    }

    let fields: Vec<Option<UsedEntry>> = body.as_bytes().chunks(FIELD_WIDTH).map(parse_field).collect();
    let (previous, current) = fields.split_at(slots);
    Ok(StatusMessage {
        previous: previous.to_vec(),
        current: current.to_vec(),
    })
}

fn parse_field(field: &[u8]) -> Option<UsedEntry> {
    if !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let priority = field[0] - b'0';
    let owner = ((field[1] - b'0') * 10 + (field[2] - b'0')) as NodeId;
    Some(UsedEntry::new(priority, owner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(u8, NodeId)]) -> Vec<UsedEntry> {
        entries.iter().map(|&(p, o)| UsedEntry::new(p, o)).collect()
    }

    #[test]
    fn encoded_message_has_fixed_layout() {
        let prev = table(&[(0, 0), (1, 3)]);
        let cur = table(&[(2, 12), (0, 0)]);
        let msg = encode(&prev, &cur);
        assert_eq!(msg, "#TDMAUSED#000103212000");
        assert!(is_reservation(msg.as_bytes()));
    }

    #[test]
    fn codec_round_trip_reproduces_entries() {
        let prev = table(&[(1, 0), (0, 0), (2, 7), (1, 98)]);
        let cur = table(&[(0, 0), (1, 5), (2, 5), (1, 42)]);
        let msg = encode(&prev, &cur);
        let decoded = decode(msg.as_bytes(), 4).unwrap();
        let unwrap = |v: &[Option<UsedEntry>]| v.iter().map(|e| e.unwrap()).collect::<Vec<_>>();
        assert_eq!(unwrap(&decoded.previous), prev);
        assert_eq!(unwrap(&decoded.current), cur);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let msg = encode(&table(&[(1, 1)]), &table(&[(1, 1)]));
        assert_eq!(
            decode(msg.as_bytes(), 2),
            Err(ParseError::WrongLength { expected: 12, actual: 6 })
        );
        assert_eq!(decode(b"hello", 1), Err(ParseError::MissingMarker));
        assert_eq!(decode(&[0xff, 0xfe], 1), Err(ParseError::NotUtf8));
    }

    #[test]
    fn non_numeric_field_only_invalidates_its_slot() {
        let decoded = decode(b"#TDMAUSED#1x2103000104", 2).unwrap();
        assert_eq!(decoded.previous, vec![None, Some(UsedEntry::new(1, 3))]);
        assert_eq!(decoded.current, vec![Some(UsedEntry::FREE), Some(UsedEntry::new(1, 4))]);
    }

    #[test]
    fn trailing_terminator_is_accepted() {
        let mut msg = encode(&table(&[(1, 2)]), &table(&[(0, 0)])).into_bytes();
        msg.push(0);
        assert!(decode(&msg, 1).is_ok());
    }

    #[test]
    fn relayed_claims_are_advertised_one_hop_further() {
        assert_eq!(advertised(UsedEntry::new(1, 4), 2), UsedEntry::new(2, 4));
        assert_eq!(advertised(UsedEntry::new(1, 2), 2), UsedEntry::new(1, 2));
        assert_eq!(advertised(UsedEntry::FREE, 2), UsedEntry::FREE);
        assert_eq!(advertised(UsedEntry::new(9, 4), 2), UsedEntry::new(9, 4));
    }
}
