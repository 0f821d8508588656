//! Run accumulators and the end-of-run report.
//!
//! `RunStats` is owned by the simulation run and handed by `&mut` to whichever
//! component needs to count something. Nothing here is global.

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

use super::queue::DropReason;

/// Counters collected during one simulation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Frames put on the air by any MAC.
    pub frames_sent: u64,
    /// Bytes put on the air, including MAC overhead.
    pub total_bytes: u64,
    /// Bytes of reservation and routing frames put on the air.
    pub non_data_bytes: u64,
    /// Payload bytes generated by the traffic source.
    pub offered_data_bytes: u64,
    /// Data bytes received by any addressed MAC (per hop).
    pub received_data_bytes: u64,
    /// Packets that reached their final destination.
    pub delivered_packets: u64,
    /// Payload bytes that reached their final destination.
    pub delivered_bytes: u64,
    /// Sum of end-to-end delays of delivered packets, in nanoseconds.
    pub total_delay_ns: u64,
    /// Transmissions that hit a receiver with another delivery in flight.
    pub collisions: u64,
    /// Delivery events cancelled because of a collision.
    pub cancelled_deliveries: u64,
    pub expired_drops: u64,
    pub queue_full_drops: u64,
    pub oversized_drops: u64,
    /// Data frames dropped because no route to the destination was known.
    pub no_route_drops: u64,
    pub reservation_messages: u64,
    /// Reservation messages that could not be decoded.
    pub malformed_reservations: u64,
    /// Own claims overwritten by a neighbour's claim.
    pub reservation_conflicts: u64,
    pub frames_completed: u64,
    pub env_steps: u64,
    pub agent_errors: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transmission(&mut self, bytes: usize, is_data: bool) {
        self.frames_sent += 1;
        self.total_bytes += bytes as u64;
        if !is_data {
            self.non_data_bytes += bytes as u64;
        }
    }

    pub fn record_delivery(&mut self, payload_bytes: usize, delay: Duration) {
        self.delivered_packets += 1;
        self.delivered_bytes += payload_bytes as u64;
        self.total_delay_ns += delay.as_nanos() as u64;
    }

    pub fn record_queue_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Expired => self.expired_drops += 1,
            DropReason::QueueFull => self.queue_full_drops += 1,
            DropReason::TooLarge => self.oversized_drops += 1,
        }
    }

    /// Delivered payload throughput over `elapsed`, in bits per second.
    pub fn throughput_bps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 { 0.0 } else { self.delivered_bytes as f64 * 8.0 / secs }
    }

    /// Mean end-to-end delay of delivered packets. Zero when nothing was delivered.
    pub fn average_delay(&self) -> Duration {
        if self.delivered_packets == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_delay_ns / self.delivered_packets)
    }

    /// Fraction of offered payload bytes that reached their destination.
    pub fn delivery_ratio(&self) -> f64 {
        if self.offered_data_bytes == 0 { 0.0 } else { self.delivered_bytes as f64 / self.offered_data_bytes as f64 }
    }

    /// Fraction of transmitted bytes spent on reservation and routing frames.
    pub fn control_overhead(&self) -> f64 {
        if self.total_bytes == 0 { 0.0 } else { self.non_data_bytes as f64 / self.total_bytes as f64 }
    }
}

/// Serializable summary written at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// RFC 3339 timestamp of report creation.
    pub generated_at: String,
    pub seed: u64,
    pub node_count: usize,
    pub data_slots: usize,
    pub simulated_secs: f64,
    pub frame_duration_us: f64,
    pub throughput_bps: f64,
    pub average_delay_ms: f64,
    pub delivery_ratio: f64,
    pub control_overhead: f64,
    pub stats: RunStats,
}

impl RunReport {
    /// Build a report from the final counters.
    ///
    /// # Parameters
    ///
    /// * `stats` - Counters at the end of the run
    /// * `measured` - Interval throughput is averaged over (traffic start to end of run)
    pub fn new(
        stats: &RunStats,
        seed: u64,
        node_count: usize,
        data_slots: usize,
        simulated: Duration,
        measured: Duration,
        frame_duration: Duration,
    ) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            seed,
            node_count,
            data_slots,
            simulated_secs: simulated.as_secs_f64(),
            frame_duration_us: frame_duration.as_secs_f64() * 1e6,
            throughput_bps: stats.throughput_bps(measured),
            average_delay_ms: stats.average_delay().as_secs_f64() * 1e3,
            delivery_ratio: stats.delivery_ratio(),
            control_overhead: stats.control_overhead(),
            stats: stats.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_metrics_handle_empty_runs() {
        let stats = RunStats::new();
        assert_eq!(stats.throughput_bps(Duration::ZERO), 0.0);
        assert_eq!(stats.average_delay(), Duration::ZERO);
        assert_eq!(stats.delivery_ratio(), 0.0);
        assert_eq!(stats.control_overhead(), 0.0);
    }

    #[test]
    fn delivery_and_transmission_counters() {
        let mut stats = RunStats::new();
        stats.offered_data_bytes = 2000;
        stats.record_transmission(1028, true);
        stats.record_transmission(100, false);
        stats.record_delivery(1000, Duration::from_millis(2));
        stats.record_delivery(1000, Duration::from_millis(4));

        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.non_data_bytes, 100);
        assert_eq!(stats.average_delay(), Duration::from_millis(3));
        assert_eq!(stats.delivery_ratio(), 1.0);
        assert_eq!(stats.throughput_bps(Duration::from_secs(2)), 8000.0);
    }

    #[test]
    fn queue_drops_are_counted_by_reason() {
        let mut stats = RunStats::new();
        stats.record_queue_drop(DropReason::Expired);
        stats.record_queue_drop(DropReason::QueueFull);
        stats.record_queue_drop(DropReason::Expired);
        assert_eq!(stats.expired_drops, 2);
        assert_eq!(stats.queue_full_drops, 1);
    }

    #[test]
    fn report_serializes_to_json() {
        let mut stats = RunStats::new();
        stats.collisions = 4;
        let report = RunReport::new(
            &stats,
            42,
            3,
            2,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_micros(3500),
        );
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stats"]["collisions"], 4);
        assert_eq!(value["node_count"], 3);
        assert!(value["generated_at"].as_str().is_some());
    }
}
