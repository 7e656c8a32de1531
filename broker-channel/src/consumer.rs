//! Consumer role: in-order delivery, reordering buffer, ACK/NACK ticks

use crate::{CumulativeAck, Event, Handshake, Nack, SequenceNumber};
use std::collections::VecDeque;

/// How a consumer delivers payloads and talks back to its producer.
pub trait ConsumerBackend<P> {
    /// Hand the next in-order payload to the owner.
    fn consume(&mut self, content: P);

    /// Send a cumulative acknowledgment to the producer.
    fn send_ack(&mut self, ack: CumulativeAck);

    /// Request retransmission of missing events.
    fn send_nack(&mut self, nack: Nack);
}

/// The consuming side of a channel.
///
/// Payloads reach the backend strictly in ascending sequence order, each
/// exactly once, starting at the handshake offset. Out-of-order arrivals
/// wait in a sequence-sorted buffer.
#[derive(Debug)]
pub struct Consumer<P> {
    /// Next sequence number to deliver; 0 until the handshake arrives.
    next_seq: SequenceNumber,
    /// Events received ahead of `next_seq`, sorted, without duplicates.
    buf: VecDeque<Event<P>>,
    /// Counts calls to `tick`.
    tick: u64,
    /// Value of `next_seq` at the previous tick.
    last_tick_seq: SequenceNumber,
    /// Ticks without progress.
    idle_ticks: u8,
    /// Emit an ACK every this many ticks. Never 0.
    ack_interval: u8,
    /// Ticks without progress before emitting a NACK. Never 0.
    nack_timeout: u8,
}

impl<P> Default for Consumer<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Consumer<P> {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            buf: VecDeque::new(),
            tick: 0,
            last_tick_seq: 0,
            idle_ticks: 0,
            ack_interval: 1,
            nack_timeout: 1,
        }
    }

    /// Adopt the producer's offset. Offsets below what was already
    /// reached are stale and ignored; otherwise the event numbered
    /// `first_seq` becomes the next one to deliver and anything older in
    /// the buffer is dropped.
    pub fn handle_handshake<B: ConsumerBackend<P>>(
        &mut self,
        backend: &mut B,
        handshake: Handshake,
    ) {
        if handshake.first_seq < self.next_seq {
            return;
        }
        self.next_seq = handshake.first_seq;
        while self.buf.front().is_some_and(|e| e.seq < self.next_seq) {
            self.buf.pop_front();
        }
        self.drain_buffer(backend);
    }

    /// Accept one event: deliver it if it is next in line, buffer it if
    /// it is ahead, drop it if it is a duplicate or already delivered.
    pub fn handle_event<B: ConsumerBackend<P>>(
        &mut self,
        backend: &mut B,
        seq: SequenceNumber,
        content: P,
    ) {
        if seq == self.next_seq {
            backend.consume(content);
            self.next_seq += 1;
            self.drain_buffer(backend);
        } else if seq > self.next_seq {
            // Insert sorted by sequence number; duplicates are dropped.
            match self.buf.iter().position(|e| e.seq >= seq) {
                None => self.buf.push_back(Event { seq, content }),
                Some(i) if self.buf[i].seq != seq => {
                    self.buf.insert(i, Event { seq, content });
                }
                Some(_) => {}
            }
        }
    }

    /// Periodic driver, called by the transport shim at a fixed cadence.
    /// Progress resets the idle counter and emits ACKs every
    /// `ack_interval` ticks; stalling with buffered events for
    /// `nack_timeout` ticks emits a NACK listing every missing sequence
    /// number.
    pub fn tick<B: ConsumerBackend<P>>(&mut self, backend: &mut B) {
        let progressed = self.next_seq > self.last_tick_seq;
        self.last_tick_seq = self.next_seq;
        self.tick += 1;
        if progressed {
            self.idle_ticks = 0;
            if self.tick % u64::from(self.ack_interval) == 0 {
                self.send_ack(backend);
            }
            return;
        }
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if !self.buf.is_empty() && self.idle_ticks >= self.nack_timeout {
            self.idle_ticks = 0;
            let mut seqs = Vec::new();
            let mut expected = self.next_seq;
            for e in &self.buf {
                while expected < e.seq {
                    seqs.push(expected);
                    expected += 1;
                }
                expected += 1;
            }
            backend.send_nack(Nack { seqs });
            return;
        }
        if self.tick % u64::from(self.ack_interval) == 0 {
            self.send_ack(backend);
        }
    }

    /// Forget all channel state, returning to the pre-handshake point.
    /// The owner calls this before requesting a fresh synchronization.
    pub fn reset(&mut self) {
        self.next_seq = 0;
        self.buf.clear();
        self.last_tick_seq = 0;
        self.idle_ticks = 0;
    }

    pub fn next_seq(&self) -> SequenceNumber {
        self.next_seq
    }

    pub fn buf(&self) -> &VecDeque<Event<P>> {
        &self.buf
    }

    pub fn idle_ticks(&self) -> u8 {
        self.idle_ticks
    }

    pub fn ack_interval(&self) -> u8 {
        self.ack_interval
    }

    /// Set the ACK cadence; clamped to at least one tick.
    pub fn set_ack_interval(&mut self, value: u8) {
        self.ack_interval = value.max(1);
    }

    pub fn nack_timeout(&self) -> u8 {
        self.nack_timeout
    }

    /// Set the NACK patience; clamped to at least one tick.
    pub fn set_nack_timeout(&mut self, value: u8) {
        self.nack_timeout = value.max(1);
    }

    fn drain_buffer<B: ConsumerBackend<P>>(&mut self, backend: &mut B) {
        while self.buf.front().is_some_and(|e| e.seq == self.next_seq) {
            if let Some(event) = self.buf.pop_front() {
                backend.consume(event.content);
                self.next_seq += 1;
            }
        }
    }

    fn send_ack<B: ConsumerBackend<P>>(&mut self, backend: &mut B) {
        let seq = self.next_seq.saturating_sub(1);
        backend.send_ack(CumulativeAck { seq });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        delivered: Vec<&'static str>,
        acks: Vec<SequenceNumber>,
        nacks: Vec<Vec<SequenceNumber>>,
    }

    impl ConsumerBackend<&'static str> for Recording {
        fn consume(&mut self, content: &'static str) {
            self.delivered.push(content);
        }

        fn send_ack(&mut self, ack: CumulativeAck) {
            self.acks.push(ack.seq);
        }

        fn send_nack(&mut self, nack: Nack) {
            self.nacks.push(nack.seqs);
        }
    }

    fn handshook(first_seq: SequenceNumber, backend: &mut Recording) -> Consumer<&'static str> {
        let mut consumer = Consumer::new();
        consumer.handle_handshake(backend, Handshake { first_seq });
        consumer
    }

    #[test]
    fn delivers_in_order_from_the_handshake_offset() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.handle_event(&mut backend, 1, "a");
        consumer.handle_event(&mut backend, 2, "b");
        assert_eq!(backend.delivered, vec!["a", "b"]);
        consumer.tick(&mut backend);
        assert_eq!(backend.acks, vec![2]);
    }

    #[test]
    fn buffers_ahead_and_drains_on_the_gap_filling() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.handle_event(&mut backend, 3, "c");
        consumer.handle_event(&mut backend, 2, "b");
        assert!(backend.delivered.is_empty());
        assert_eq!(consumer.buf().len(), 2);
        consumer.handle_event(&mut backend, 1, "a");
        assert_eq!(backend.delivered, vec!["a", "b", "c"]);
        assert!(consumer.buf().is_empty());
    }

    #[test]
    fn redelivery_is_idempotent() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.handle_event(&mut backend, 1, "a");
        consumer.handle_event(&mut backend, 1, "a");
        consumer.handle_event(&mut backend, 3, "c");
        consumer.handle_event(&mut backend, 3, "c");
        assert_eq!(backend.delivered, vec!["a"]);
        assert_eq!(consumer.buf().len(), 1);
    }

    #[test]
    fn stale_handshakes_are_ignored() {
        let mut backend = Recording::default();
        let mut consumer = handshook(5, &mut backend);
        consumer.handle_handshake(&mut backend, Handshake { first_seq: 2 });
        assert_eq!(consumer.next_seq(), 5);
    }

    #[test]
    fn handshake_jump_purges_superseded_buffer_entries() {
        let mut backend = Recording::default();
        let mut consumer = Consumer::new();
        consumer.handle_event(&mut backend, 2, "old");
        consumer.handle_event(&mut backend, 7, "keep");
        consumer.handle_handshake(&mut backend, Handshake { first_seq: 7 });
        assert_eq!(backend.delivered, vec!["keep"]);
        assert!(consumer.buf().is_empty());
        assert_eq!(consumer.next_seq(), 8);
    }

    #[test]
    fn acks_are_monotone() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.handle_event(&mut backend, 1, "a");
        consumer.tick(&mut backend);
        consumer.tick(&mut backend);
        consumer.handle_event(&mut backend, 2, "b");
        consumer.tick(&mut backend);
        for pair in backend.acks.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn pre_handshake_ack_is_zero() {
        let mut backend = Recording::default();
        let mut consumer = Consumer::<&'static str>::new();
        consumer.tick(&mut backend);
        assert_eq!(backend.acks, vec![0]);
    }

    #[test]
    fn idle_with_gaps_emits_the_missing_set() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.set_nack_timeout(2);
        consumer.handle_event(&mut backend, 1, "a");
        consumer.handle_event(&mut backend, 3, "c");
        consumer.handle_event(&mut backend, 6, "f");
        consumer.tick(&mut backend); // progress from the handshake drain
        consumer.tick(&mut backend); // idle 1
        assert!(backend.nacks.is_empty());
        consumer.tick(&mut backend); // idle 2 -> nack
        assert_eq!(backend.nacks, vec![vec![2, 4, 5]]);
        assert_eq!(consumer.idle_ticks(), 0);
    }

    #[test]
    fn lost_handshake_shows_up_as_a_nack_for_zero() {
        let mut backend = Recording::default();
        let mut consumer = Consumer::new();
        consumer.handle_event(&mut backend, 2, "b");
        consumer.handle_event(&mut backend, 3, "c");
        consumer.tick(&mut backend);
        assert_eq!(backend.nacks, vec![vec![0, 1]]);
    }

    #[test]
    fn ack_interval_spaces_out_acks() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.set_ack_interval(3);
        for i in 1..=6u64 {
            consumer.handle_event(&mut backend, i, "x");
            consumer.tick(&mut backend);
        }
        assert_eq!(backend.acks, vec![3, 6]);
    }

    #[test]
    fn tunables_clamp_to_one() {
        let mut consumer = Consumer::<&'static str>::new();
        consumer.set_ack_interval(0);
        consumer.set_nack_timeout(0);
        assert_eq!(consumer.ack_interval(), 1);
        assert_eq!(consumer.nack_timeout(), 1);
    }

    #[test]
    fn reset_returns_to_the_pre_handshake_state() {
        let mut backend = Recording::default();
        let mut consumer = handshook(1, &mut backend);
        consumer.handle_event(&mut backend, 1, "a");
        consumer.handle_event(&mut backend, 5, "e");
        consumer.reset();
        assert_eq!(consumer.next_seq(), 0);
        assert!(consumer.buf().is_empty());
        // A fresh handshake with a later offset is accepted again.
        consumer.handle_handshake(&mut backend, Handshake { first_seq: 9 });
        consumer.handle_event(&mut backend, 9, "i");
        assert_eq!(backend.delivered, vec!["a", "i"]);
    }
}
