//! Radio timing calculations.
//!
//! Contains helpers for:
//! - Propagation delay over a distance (speed-of-light approximation)
//! - Transmission time of a frame at the configured data rate
//! - Slot capacity in bytes
//! - Frame layout: slot durations and total frame duration
//!
//! Units:
//! - Distance: metres
//! - Time: `std::time::Duration` (nanosecond resolution)
//! - Data rate: bits per second

use std::time::Duration;

use super::config::FrameConfig;

/// Propagation delay per metre, in nanoseconds.
const NANOS_PER_METRE: f64 = 3.3;

/// Metres per second.
const SPEED_OF_LIGHT: f64 = 300_000_000.0;

/// Propagation delay over `distance_m` metres, truncated to whole nanoseconds.
pub fn propagation_delay(distance_m: f64) -> Duration {
    Duration::from_nanos((NANOS_PER_METRE * distance_m) as u64)
}

/// Light travel time over the whole channel range, used as a guard interval.
pub fn guard_time_for_range(max_range_m: f64) -> Duration {
    let nanos = (max_range_m * 1e9 / SPEED_OF_LIGHT).round().max(0.0);
    Duration::from_nanos(nanos as u64)
}

/// Time needed to put `bytes` on the air at `data_rate_bps`.
///
/// Rounded up to whole nanoseconds so a frame never appears shorter than it is.
pub fn tx_time(bytes: usize, data_rate_bps: u64) -> Duration {
    if data_rate_bps == 0 {
        return Duration::MAX;
    }
    let bits = bytes as u128 * 8;
    let nanos = (bits * 1_000_000_000).div_ceil(data_rate_bps as u128);
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Number of whole bytes that fit into a slot of the given length.
pub fn bytes_per_slot(slot: Duration, data_rate_bps: u64) -> usize {
    let bits = slot.as_nanos() * data_rate_bps as u128 / 1_000_000_000;
    (bits / 8) as usize
}

/// Total number of slots in a frame: one control slot per node plus the data region.
pub fn total_slots(frame: &FrameConfig, node_count: usize) -> usize {
    node_count + frame.data_slots
}

/// Whether `slot` lies in the control region.
pub fn is_control_slot(slot: usize, node_count: usize) -> bool {
    slot < node_count
}

/// Air time of `slot` (without guard time).
pub fn slot_duration(frame: &FrameConfig, slot: usize, node_count: usize) -> Duration {
    if is_control_slot(slot, node_count) { frame.control_slot_time() } else { frame.slot_time() }
}

/// Duration of a full frame.
///
/// # Parameters
///
/// * `frame` - Frame layout and timing
/// * `node_count` - Size of the control region
///
/// # Returns
///
/// `Σ(slot duration + guard time)` over all slots plus the inter-frame gap.
pub fn frame_duration(frame: &FrameConfig, node_count: usize) -> Duration {
    let guard = frame.guard_time();
    let control = (frame.control_slot_time() + guard) * node_count as u32;
    let data = (frame.slot_time() + guard) * frame.data_slots as u32;
    control + data + frame.inter_frame_gap()
}
