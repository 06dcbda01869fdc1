/// Feed statistics tracking
///
/// Plain counters updated by the facade as frames move through the
/// pipeline. Snapshot-style accessors only; rendering is the caller's
/// concern.

use crate::error::FeedError;

#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    frames_accepted: u64,
    bytes_accepted: u64,
    heartbeats: u64,
    sequence_resets: u64,
    product_basics: u64,
    snapshots: u64,
    updates: u64,
    stale_updates: u64,
    unknown_messages: u64,

    replays_dropped: u64,
    gap_events: u64,
    messages_missed: u64,
    recovery_requests: u64,
    frames_recovered: u64,

    checksum_errors: u64,
    length_errors: u64,
    parse_errors: u64,
    missing_product_info: u64,
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&mut self, size: usize) {
        self.frames_accepted += 1;
        self.bytes_accepted += size as u64;
    }

    pub fn record_heartbeat(&mut self) {
        self.heartbeats += 1;
    }

    pub fn record_sequence_reset(&mut self) {
        self.sequence_resets += 1;
    }

    pub fn record_product_basic(&mut self) {
        self.product_basics += 1;
    }

    pub fn record_snapshot(&mut self) {
        self.snapshots += 1;
    }

    pub fn record_update(&mut self) {
        self.updates += 1;
    }

    pub fn record_stale_update(&mut self) {
        self.stale_updates += 1;
    }

    pub fn record_unknown_message(&mut self) {
        self.unknown_messages += 1;
    }

    pub fn record_replay(&mut self) {
        self.replays_dropped += 1;
    }

    pub fn record_gap(&mut self, missed: u64) {
        self.gap_events += 1;
        self.messages_missed += missed;
    }

    pub fn record_recovery_request(&mut self) {
        self.recovery_requests += 1;
    }

    pub fn record_recovered_frame(&mut self) {
        self.frames_recovered += 1;
    }

    /// Bucket a dropped frame by the error that killed it.
    pub fn record_error(&mut self, err: &FeedError) {
        match err {
            FeedError::BadChecksum { .. } => self.checksum_errors += 1,
            FeedError::TooShort { .. } | FeedError::LengthMismatch { .. } => {
                self.length_errors += 1
            }
            FeedError::MissingProductInfo(_) => self.missing_product_info += 1,
            _ => self.parse_errors += 1,
        }
    }

    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    pub fn sequence_resets(&self) -> u64 {
        self.sequence_resets
    }

    pub fn product_basics(&self) -> u64 {
        self.product_basics
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn stale_updates(&self) -> u64 {
        self.stale_updates
    }

    pub fn unknown_messages(&self) -> u64 {
        self.unknown_messages
    }

    pub fn replays_dropped(&self) -> u64 {
        self.replays_dropped
    }

    pub fn gap_events(&self) -> u64 {
        self.gap_events
    }

    pub fn messages_missed(&self) -> u64 {
        self.messages_missed
    }

    pub fn recovery_requests(&self) -> u64 {
        self.recovery_requests
    }

    pub fn frames_recovered(&self) -> u64 {
        self.frames_recovered
    }

    pub fn checksum_errors(&self) -> u64 {
        self.checksum_errors
    }

    pub fn length_errors(&self) -> u64 {
        self.length_errors
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    pub fn missing_product_info(&self) -> u64 {
        self.missing_product_info
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_counters() {
        let mut stats = FeedStats::new();
        stats.record_accepted(48);
        stats.record_accepted(22);
        assert_eq!(stats.frames_accepted(), 2);
        assert_eq!(stats.bytes_accepted(), 70);
    }

    #[test]
    fn test_gap_accumulation() {
        let mut stats = FeedStats::new();
        stats.record_gap(2);
        stats.record_gap(5);
        assert_eq!(stats.gap_events(), 2);
        assert_eq!(stats.messages_missed(), 7);
    }

    #[test]
    fn test_error_bucketing() {
        let mut stats = FeedStats::new();
        stats.record_error(&FeedError::BadChecksum {
            computed: 1,
            carried: 2,
        });
        stats.record_error(&FeedError::TooShort { need: 22, have: 3 });
        stats.record_error(&FeedError::LengthMismatch {
            expected: 40,
            actual: 41,
        });
        stats.record_error(&FeedError::Parse("entry_count"));
        stats.record_error(&FeedError::MissingProductInfo("TXF".into()));
        assert_eq!(stats.checksum_errors(), 1);
        assert_eq!(stats.length_errors(), 2);
        assert_eq!(stats.parse_errors(), 1);
        assert_eq!(stats.missing_product_info(), 1);
    }

    #[test]
    fn test_reset() {
        let mut stats = FeedStats::new();
        stats.record_accepted(10);
        stats.record_replay();
        stats.reset();
        assert_eq!(stats.frames_accepted(), 0);
        assert_eq!(stats.replays_dropped(), 0);
    }
}
