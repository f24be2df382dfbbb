//! Per-peer, per-direction delivery bookkeeping: in-order release to the application, cumulative
//! acknowledgement of what's been sent, and selective-repeat loss detection. Owned exclusively by
//! its `Session` (spec §9) - nothing outside the session touches these maps.
use crate::wire::ConnectedPackage;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

struct ReceivedEntry {
    package: ConnectedPackage,
    last_asked_ts: Instant,
}

struct SentEntry {
    bytes: Vec<u8>,
    next_send_ts: Instant,
}

/// Tracks the send and receive windows for one direction of one peer.
pub struct AcknowledgeManager {
    awaiting_received: BTreeMap<u64, ReceivedEntry>,
    awaiting_approval: BTreeMap<u64, SentEntry>,
    last_delivered_seq: u64,
    ask_cooldown: Duration,
    retransmit_cooldown: Duration,
}

impl AcknowledgeManager {
    pub fn new(ask_cooldown: Duration, retransmit_cooldown: Duration) -> AcknowledgeManager {
        AcknowledgeManager {
            awaiting_received: BTreeMap::new(),
            awaiting_approval: BTreeMap::new(),
            last_delivered_seq: 0,
            ask_cooldown,
            retransmit_cooldown,
        }
    }

    #[inline]
    pub fn last_delivered_seq(&self) -> u64 {
        self.last_delivered_seq
    }

    /// Records a just-sent package's encoded bytes so it can be retransmitted if the peer NACKs
    /// it, until a cumulative ack covers it.
    pub fn register_sent(&mut self, sequence: u64, encoded: Vec<u8>, now: Instant) {
        self.awaiting_approval.insert(sequence, SentEntry { bytes: encoded, next_send_ts: now });
    }

    /// Buffers a received package for in-order release. Duplicates and anything already
    /// delivered (invariant 3) are ignored.
    pub fn register_received(&mut self, package: ConnectedPackage, now: Instant) {
        if package.sequence <= self.last_delivered_seq {
            return;
        }

        // Seed `last_asked_ts` as if the cooldown had already elapsed: this entry is what
        // `get_lost` checks the cooldown against for every *missing* sequence before it, and
        // those gaps have never been asked about yet, so they must be askable on the very next
        // `get_lost` call rather than waiting out a cooldown that never actually started.
        let never_asked = now.checked_sub(self.ask_cooldown).unwrap_or(now);
        self.awaiting_received
            .entry(package.sequence)
            .or_insert(ReceivedEntry { package: package.clone(), last_asked_ts: never_asked });
        // Idempotent on duplicate insert: contents of a given sequence number never change, so
        // an existing entry is left as-is rather than overwritten.
        let _ = package;
    }

    /// Releases every contiguous package starting at `last_delivered_seq + 1`, in order,
    /// stopping at the first gap (invariants 1 and 2).
    pub fn extract_available(&mut self) -> Vec<ConnectedPackage> {
        let mut delivered = Vec::new();

        loop {
            let next = self.last_delivered_seq + 1;
            match self.awaiting_received.remove(&next) {
                Some(entry) => {
                    self.last_delivered_seq = next;
                    delivered.push(entry.package);
                }
                None => break,
            }
        }

        delivered
    }

    /// Drops every unacknowledged sent package with sequence `<= ack` (invariant 4). Cumulative
    /// acks are monotone: an ack that regresses below what's already been approved is a no-op,
    /// since `BTreeMap::retain` below is already idempotent for that case.
    pub fn approve(&mut self, ack: u64) {
        self.awaiting_approval.retain(|&seq, _| seq > ack);
    }

    /// Walks the gaps in `awaiting_received` and returns every missing sequence number whose
    /// NACK cooldown has elapsed, refreshing `last_asked_ts` for each one returned.
    pub fn get_lost(&mut self, now: Instant) -> Vec<u64> {
        let mut lost = Vec::new();
        let mut cursor = self.last_delivered_seq + 1;

        for &seq in self.awaiting_received.keys() {
            while cursor < seq {
                lost.push(cursor);
                cursor += 1;
            }
            // `cursor == seq` now: that sequence is present, so it isn't lost, but we still may
            // need to keep asking for anything beyond it once the loop continues.
            cursor = seq + 1;
        }

        // Apply the cooldown against `last_asked_ts`, which lives on the entry immediately after
        // the gap it closes (or isn't tracked at all for a gap with nothing buffered past it yet -
        // those get asked every time since there's nothing to cool down).
        let mut result = Vec::with_capacity(lost.len());
        for seq in lost {
            let cooldown_entry = self.awaiting_received.range_mut(seq..).next();
            let due = match cooldown_entry {
                Some((_, entry)) => now.duration_since(entry.last_asked_ts) >= self.ask_cooldown,
                None => true,
            };

            if due {
                if let Some((_, entry)) = self.awaiting_received.range_mut(seq..).next() {
                    entry.last_asked_ts = now;
                }
                result.push(seq);
            }
        }

        result
    }

    /// For each sequence number the peer NACKed, rewrites its `acknowledge` field to
    /// `current_ack` and returns the re-encoded bytes, provided its retransmit cooldown has
    /// elapsed. Sequences no longer pending (already approved) are silently ignored - the caller
    /// already has what it asked for.
    pub fn packages_to_resend(&mut self, nack_list: &[u64], current_ack: u64, now: Instant) -> Vec<Vec<u8>> {
        let mut resend = Vec::new();

        for &seq in nack_list {
            if let Some(entry) = self.awaiting_approval.get_mut(&seq) {
                if now >= entry.next_send_ts {
                    ConnectedPackage::rewrite_acknowledge(&mut entry.bytes, current_ack);
                    resend.push(entry.bytes.clone());
                    entry.next_send_ts = now + self.retransmit_cooldown;
                }
            }
        }

        resend
    }

    /// Discards all received-side state. Used only after a peer explicitly requests a stream
    /// reset; `seq` becomes the new high-water mark, or the highest sequence ever buffered if
    /// none is supplied.
    pub fn reset(&mut self, seq: Option<u64>) {
        let high_water = seq.unwrap_or_else(|| {
            self.awaiting_received.keys().next_back().copied().unwrap_or(self.last_delivered_seq)
        });
        self.awaiting_received.clear();
        self.last_delivered_seq = high_water;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ConnectedCommand, EventUpdate};

    fn package(seq: u64, ack: u64) -> ConnectedPackage {
        ConnectedPackage {
            sequence: seq,
            acknowledge: ack,
            end_of_content: true,
            command: ConnectedCommand::SendEvent(EventUpdate { event_id: "x".into(), data: vec![] }),
        }
    }

    fn manager() -> AcknowledgeManager {
        AcknowledgeManager::new(Duration::from_millis(50), Duration::from_millis(50))
    }

    #[test]
    fn in_order_delivery_releases_immediately() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_received(package(1, 0), now);
        assert_eq!(ack.extract_available(), vec![package(1, 0)]);
        assert_eq!(ack.last_delivered_seq(), 1);
    }

    #[test]
    fn out_of_order_delivery_waits_for_the_gap() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_received(package(3, 0), now);
        ack.register_received(package(1, 0), now);
        assert!(ack.extract_available().is_empty()); // seq 2 still missing

        ack.register_received(package(2, 0), now);
        let delivered = ack.extract_available();
        assert_eq!(delivered.iter().map(|p| p.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_after_delivery_is_ignored() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_received(package(1, 0), now);
        ack.extract_available();

        ack.register_received(package(1, 0), now); // stale duplicate
        assert!(ack.extract_available().is_empty());
        assert_eq!(ack.last_delivered_seq(), 1);
    }

    #[test]
    fn approve_drops_everything_up_to_and_including_ack() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_sent(1, vec![1], now);
        ack.register_sent(2, vec![2], now);
        ack.register_sent(3, vec![3], now);

        ack.approve(2);

        let resend = ack.packages_to_resend(&[1, 2, 3], 0, now + Duration::from_secs(1));
        assert_eq!(resend, vec![vec![3]]);
    }

    #[test]
    fn get_lost_reports_gaps_and_respects_cooldown() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_received(package(3, 0), now);
        let lost = ack.get_lost(now);
        assert_eq!(lost, vec![1, 2]);

        // Immediately asking again is inside the cooldown window.
        assert!(ack.get_lost(now).is_empty());

        let later = now + Duration::from_millis(60);
        assert_eq!(ack.get_lost(later), vec![1, 2]);
    }

    #[test]
    fn packages_to_resend_ignores_unknown_and_already_approved_sequences() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_sent(5, vec![5], now);
        let resend = ack.packages_to_resend(&[1, 5, 99], 0, now);
        assert_eq!(resend, vec![vec![5]]);
    }

    #[test]
    fn packages_to_resend_respects_retransmit_cooldown() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_sent(1, vec![1], now);
        assert_eq!(ack.packages_to_resend(&[1], 0, now), vec![vec![1]]);
        assert!(ack.packages_to_resend(&[1], 0, now).is_empty());

        let later = now + Duration::from_millis(60);
        assert_eq!(ack.packages_to_resend(&[1], 0, later), vec![vec![1]]);
    }

    #[test]
    fn reset_clears_received_state_and_sets_high_water_mark() {
        let mut ack = manager();
        let now = Instant::now();

        ack.register_received(package(5, 0), now);
        ack.reset(None);

        assert_eq!(ack.last_delivered_seq(), 5);
        assert!(ack.extract_available().is_empty());
    }

    #[test]
    fn reset_to_explicit_sequence() {
        let mut ack = manager();
        ack.reset(Some(42));
        assert_eq!(ack.last_delivered_seq(), 42);
    }
}
