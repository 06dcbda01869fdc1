/// Per-channel sequence tracking and gap detection
///
/// Each multicast channel carries its own monotonically increasing
/// CHANNEL-SEQ. The tracker classifies every observed sequence so the
/// facade can drop replays, forward in-order traffic, and kick off
/// retransmission for gaps.
///
/// Gaps are remembered as pending ranges: a sequence that lands inside
/// one is a retransmitted back-fill, not a replay, and is forwarded so
/// the book's own product-sequence check can judge it.

use std::collections::HashMap;

/// Classification of one observed sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqStatus {
    /// First observation on this channel; the sequence is adopted as-is.
    FirstSeen(u64),
    InOrder,
    /// Fills a previously reported gap; forwarded to the pipeline.
    GapFill,
    /// At or below the recorded sequence and not inside any pending gap;
    /// the frame is a duplicate.
    Replay,
    /// Sequences [expected, got) were missed. The tracker resyncs to
    /// `got`; recovering the hole is the caller's job.
    Gap { expected: u64, got: u64, count: u64 },
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    last_seq: u64,
    /// False right after a sequence reset: the next frame re-anchors the
    /// expected sequence instead of being measured against it.
    synced: bool,
    /// Inclusive ranges still awaiting retransmission.
    pending_gaps: Vec<(u64, u64)>,
}

impl ChannelState {
    /// Remove `seq` from the pending ranges; true when it was pending.
    fn take_pending(&mut self, seq: u64) -> bool {
        for i in 0..self.pending_gaps.len() {
            let (start, end) = self.pending_gaps[i];
            if seq < start || seq > end {
                continue;
            }
            if start == end {
                self.pending_gaps.swap_remove(i);
            } else if seq == start {
                self.pending_gaps[i] = (start + 1, end);
            } else if seq == end {
                self.pending_gaps[i] = (start, end - 1);
            } else {
                self.pending_gaps[i] = (start, seq - 1);
                self.pending_gaps.push((seq + 1, end));
            }
            return true;
        }
        false
    }
}

/// Tracks the expected sequence per channel id.
#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    channels: HashMap<u32, ChannelState>,
    gap_events: u64,
    total_missed: u64,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify sequence `seq` on `channel` and advance the tracker.
    pub fn observe(&mut self, channel: u32, seq: u64) -> SeqStatus {
        let state = self.channels.entry(channel).or_default();
        if !state.synced {
            state.last_seq = seq;
            state.synced = true;
            return SeqStatus::FirstSeen(seq);
        }

        let expected = state.last_seq + 1;
        if seq == expected {
            state.last_seq = seq;
            SeqStatus::InOrder
        } else if seq <= state.last_seq {
            if state.take_pending(seq) {
                SeqStatus::GapFill
            } else {
                SeqStatus::Replay
            }
        } else {
            let count = seq - expected;
            state.last_seq = seq;
            state.pending_gaps.push((expected, seq - 1));
            self.gap_events += 1;
            self.total_missed += count;
            SeqStatus::Gap {
                expected,
                got: seq,
                count,
            }
        }
    }

    /// Force the channel back to sequence 0, as mandated by a sequence
    /// reset. The next frame on the channel re-anchors without a gap,
    /// and gaps from the old numbering are forgotten.
    pub fn reset_channel(&mut self, channel: u32) {
        let state = self.channels.entry(channel).or_default();
        state.last_seq = 0;
        state.synced = false;
        state.pending_gaps.clear();
    }

    /// Last recorded sequence for a channel, if any was observed.
    pub fn last_seq(&self, channel: u32) -> Option<u64> {
        self.channels.get(&channel).map(|s| s.last_seq)
    }

    /// True while `seq` sits in a reported-but-unrecovered gap.
    pub fn is_pending(&self, channel: u32, seq: u64) -> bool {
        self.channels
            .get(&channel)
            .map(|s| {
                s.pending_gaps
                    .iter()
                    .any(|&(start, end)| seq >= start && seq <= end)
            })
            .unwrap_or(false)
    }

    pub fn gap_events(&self) -> u64 {
        self.gap_events
    }

    pub fn total_missed(&self) -> u64 {
        self.total_missed
    }
}
