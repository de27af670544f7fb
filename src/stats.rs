use std::time::{Duration, Instant};

/// Cumulative loss in percent. Nothing sent means nothing lost.
pub fn packet_loss(sent: u64, received: u64) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    sent.saturating_sub(received) as f64 / sent as f64 * 100.0
}

/// `None` if the clock ran backwards between the two readings.
pub fn round_trip_time(sent_at: Instant, received_at: Instant) -> Option<Duration> {
    received_at.checked_duration_since(sent_at)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    sent: u64,
    received: u64,
}

impl Counters {
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    pub fn record_received(&mut self) {
        debug_assert!(self.received < self.sent, "more replies than requests");
        self.received = (self.received + 1).min(self.sent);
    }

    pub fn packet_loss(&self) -> f64 {
        packet_loss(self.sent, self.received)
    }
}
