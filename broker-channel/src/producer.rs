//! Producer role: sequence assignment, fan-out, retransmission

use crate::{ChannelError, Event, Handshake, RetransmitFailed, SequenceNumber};
use std::collections::VecDeque;

/// How a producer reaches its consumers. Supplied by the owning actor on
/// every operation; the producer itself never holds a transport.
pub trait ProducerBackend<H, P> {
    /// Deliver a freshly produced event to every path.
    fn broadcast_event(&mut self, paths: &[Path<H>], event: &Event<P>);

    /// Deliver a handshake to one consumer.
    fn send_handshake(&mut self, to: &H, handshake: Handshake);

    /// Re-deliver a buffered event to one consumer.
    fn resend_event(&mut self, to: &H, event: &Event<P>);

    /// Tell one consumer an event is gone for good.
    fn send_retransmit_failed(&mut self, to: &H, failed: RetransmitFailed);
}

/// Consumer handle, first sequence number after enrollment, and the last
/// cumulatively acknowledged sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path<H> {
    pub hdl: H,
    pub offset: SequenceNumber,
    pub acked: SequenceNumber,
}

/// The producing side of a channel.
#[derive(Debug)]
pub struct Producer<H, P> {
    /// Last assigned sequence number; 0 until the first `produce`.
    seq: SequenceNumber,
    /// Outgoing events retained until acknowledged by every path.
    buf: VecDeque<Event<P>>,
    /// Registered consumers.
    paths: Vec<Path<H>>,
}

impl<H: PartialEq + Clone, P: Clone> Default for Producer<H, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: PartialEq + Clone, P: Clone> Producer<H, P> {
    pub fn new() -> Self {
        Self { seq: 0, buf: VecDeque::new(), paths: Vec::new() }
    }

    /// Assign the next sequence number to `content`, buffer it, and fan
    /// it out to every registered consumer.
    pub fn produce<B: ProducerBackend<H, P>>(&mut self, backend: &mut B, content: P) {
        self.seq += 1;
        let event = Event { seq: self.seq, content };
        backend.broadcast_event(&self.paths, &event);
        self.buf.push_back(event);
    }

    /// Register a consumer and hand it its first sequence number.
    pub fn add<B: ProducerBackend<H, P>>(
        &mut self,
        backend: &mut B,
        hdl: H,
    ) -> Result<(), ChannelError> {
        if self.find_path(&hdl).is_some() {
            return Err(ChannelError::ConsumerExists);
        }
        let offset = self.seq + 1;
        self.paths.push(Path { hdl: hdl.clone(), offset, acked: self.seq });
        backend.send_handshake(&hdl, Handshake { first_seq: offset });
        Ok(())
    }

    /// Drop a consumer, releasing any buffer space only it was holding.
    /// Returns false if the handle was unknown.
    pub fn remove(&mut self, hdl: &H) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p.hdl != *hdl);
        if self.paths.len() == before {
            return false;
        }
        self.shrink_buf();
        true
    }

    /// Record a cumulative acknowledgment and evict events every path has
    /// seen. Acknowledgments beyond `seq` clamp; unknown handles are
    /// ignored.
    pub fn handle_ack(&mut self, hdl: &H, seq: SequenceNumber) {
        let seq = seq.min(self.seq);
        let mut acked = seq;
        let mut known = false;
        // One pass: update the path and find the minimum in one go.
        for p in &mut self.paths {
            if p.hdl == *hdl {
                p.acked = seq;
                known = true;
            } else {
                acked = acked.min(p.acked);
            }
        }
        if !known {
            return;
        }
        while self.buf.front().is_some_and(|e| e.seq <= acked) {
            self.buf.pop_front();
        }
    }

    /// Serve a retransmission request. `seqs` is ascending; everything
    /// before the first entry counts as acknowledged. A leading 0 means
    /// the consumer lost synchronization and needs the handshake again.
    pub fn handle_nack<B: ProducerBackend<H, P>>(
        &mut self,
        backend: &mut B,
        hdl: &H,
        seqs: &[SequenceNumber],
    ) {
        let Some(&first) = seqs.first() else {
            return;
        };
        let Some(path) = self.find_path(hdl) else {
            return;
        };
        if first == 0 {
            let handshake = Handshake { first_seq: path.offset };
            backend.send_handshake(hdl, handshake);
            return;
        }
        self.handle_ack(hdl, first - 1);
        for &seq in seqs {
            match self.find_event(seq) {
                Some(event) => backend.resend_event(hdl, event),
                None => backend.send_retransmit_failed(hdl, RetransmitFailed { seq }),
            }
        }
    }

    /// True iff every path has acknowledged everything produced so far.
    pub fn idle(&self) -> bool {
        self.paths.iter().all(|p| p.acked == self.seq)
    }

    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    pub fn buf(&self) -> &VecDeque<Event<P>> {
        &self.buf
    }

    pub fn paths(&self) -> &[Path<H>] {
        &self.paths
    }

    pub fn find_path(&self, hdl: &H) -> Option<&Path<H>> {
        self.paths.iter().find(|p| p.hdl == *hdl)
    }

    fn find_event(&self, seq: SequenceNumber) -> Option<&Event<P>> {
        self.buf.iter().find(|e| e.seq == seq)
    }

    fn shrink_buf(&mut self) {
        let Some(min_acked) = self.paths.iter().map(|p| p.acked).min() else {
            self.buf.clear();
            return;
        };
        while self.buf.front().is_some_and(|e| e.seq <= min_acked) {
            self.buf.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Hdl = &'static str;

    #[derive(Default)]
    struct Recording {
        broadcasts: Vec<Event<u32>>,
        handshakes: Vec<(Hdl, Handshake)>,
        resends: Vec<(Hdl, Event<u32>)>,
        failed: Vec<(Hdl, RetransmitFailed)>,
    }

    impl ProducerBackend<Hdl, u32> for Recording {
        fn broadcast_event(&mut self, _paths: &[Path<Hdl>], event: &Event<u32>) {
            self.broadcasts.push(event.clone());
        }

        fn send_handshake(&mut self, to: &Hdl, handshake: Handshake) {
            self.handshakes.push((to, handshake));
        }

        fn resend_event(&mut self, to: &Hdl, event: &Event<u32>) {
            self.resends.push((to, event.clone()));
        }

        fn send_retransmit_failed(&mut self, to: &Hdl, failed: RetransmitFailed) {
            self.failed.push((to, failed));
        }
    }

    #[test]
    fn sequence_numbers_increase_by_one() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        for i in 0..50u32 {
            producer.produce(&mut backend, i);
        }
        assert_eq!(producer.seq(), 50);
        for (i, pair) in backend.broadcasts.windows(2).enumerate() {
            assert_eq!(pair[1].seq, pair[0].seq + 1, "at index {}", i);
        }
        assert_eq!(backend.broadcasts.first().map(|e| e.seq), Some(1));
    }

    #[test]
    fn add_sends_handshake_at_next_seq() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.produce(&mut backend, 1);
        producer.produce(&mut backend, 2);
        producer.add(&mut backend, "c1").unwrap();
        assert_eq!(backend.handshakes, vec![("c1", Handshake { first_seq: 3 })]);
        let path = producer.find_path(&"c1").unwrap();
        assert_eq!(path.offset, 3);
        assert_eq!(path.acked, 2);
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut backend = Recording::default();
        let mut producer = Producer::<_, u32>::new();
        producer.add(&mut backend, "c1").unwrap();
        assert_eq!(producer.add(&mut backend, "c1"), Err(ChannelError::ConsumerExists));
        assert_eq!(backend.handshakes.len(), 1);
    }

    #[test]
    fn eviction_waits_for_the_slowest_path() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        producer.add(&mut backend, "c2").unwrap();
        for i in 1..=10u32 {
            producer.produce(&mut backend, i);
        }
        producer.handle_ack(&"c1", 5);
        producer.handle_ack(&"c2", 5);
        assert_eq!(producer.buf().front().map(|e| e.seq), Some(6));

        // One fast path must not evict what the slow one still needs.
        producer.handle_ack(&"c1", 10);
        assert_eq!(producer.buf().front().map(|e| e.seq), Some(6));
        assert!(!producer.idle());

        producer.handle_ack(&"c2", 10);
        assert!(producer.buf().is_empty());
        assert!(producer.idle());
    }

    #[test]
    fn acks_beyond_seq_clamp() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        producer.produce(&mut backend, 1);
        producer.handle_ack(&"c1", 999);
        assert_eq!(producer.find_path(&"c1").unwrap().acked, 1);
        assert!(producer.idle());
    }

    #[test]
    fn unknown_acks_are_ignored() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        producer.produce(&mut backend, 1);
        producer.handle_ack(&"ghost", 1);
        assert_eq!(producer.buf().len(), 1);
    }

    #[test]
    fn nack_zero_resends_the_original_handshake() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.produce(&mut backend, 1);
        producer.add(&mut backend, "c1").unwrap();
        producer.produce(&mut backend, 2);
        backend.handshakes.clear();
        producer.handle_nack(&mut backend, &"c1", &[0]);
        assert_eq!(backend.handshakes, vec![("c1", Handshake { first_seq: 2 })]);
        assert!(backend.resends.is_empty());
    }

    #[test]
    fn nack_implies_cumulative_ack_and_resends() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        for i in 1..=5u32 {
            producer.produce(&mut backend, i);
        }
        producer.handle_nack(&mut backend, &"c1", &[3, 4]);
        // Everything before the first missing number counts as received.
        assert_eq!(producer.find_path(&"c1").unwrap().acked, 2);
        assert!(producer.buf().front().is_some_and(|e| e.seq == 3));
        let resent: Vec<_> = backend.resends.iter().map(|(_, e)| e.seq).collect();
        assert_eq!(resent, vec![3, 4]);
        assert!(backend.failed.is_empty());
    }

    #[test]
    fn nack_beyond_head_reports_retransmit_failed() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        producer.produce(&mut backend, 1);
        // Sequence 7 was never produced: a benign race, answered with
        // retransmit_failed rather than treated as a protocol violation.
        producer.handle_nack(&mut backend, &"c1", &[1, 7]);
        assert_eq!(backend.resends.len(), 1);
        assert_eq!(backend.failed, vec![("c1", RetransmitFailed { seq: 7 })]);
    }

    #[test]
    fn nack_for_evicted_event_reports_retransmit_failed() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        producer.add(&mut backend, "c2").unwrap();
        for i in 1..=4u32 {
            producer.produce(&mut backend, i);
        }
        producer.handle_ack(&"c1", 4);
        producer.handle_ack(&"c2", 4);
        assert!(producer.buf().is_empty());
        producer.handle_nack(&mut backend, &"c2", &[2]);
        assert_eq!(backend.failed, vec![("c2", RetransmitFailed { seq: 2 })]);
    }

    #[test]
    fn empty_nack_and_unknown_path_are_ignored() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "c1").unwrap();
        producer.produce(&mut backend, 1);
        producer.handle_nack(&mut backend, &"c1", &[]);
        producer.handle_nack(&mut backend, &"ghost", &[1]);
        assert!(backend.resends.is_empty());
        assert!(backend.failed.is_empty());
    }

    #[test]
    fn remove_releases_buffer_held_for_the_removed_path() {
        let mut backend = Recording::default();
        let mut producer = Producer::new();
        producer.add(&mut backend, "fast").unwrap();
        producer.add(&mut backend, "gone").unwrap();
        for i in 1..=6u32 {
            producer.produce(&mut backend, i);
        }
        producer.handle_ack(&"fast", 6);
        assert_eq!(producer.buf().len(), 6);
        assert!(producer.remove(&"gone"));
        assert!(producer.buf().is_empty());
        assert!(!producer.remove(&"gone"));
    }

    #[test]
    fn idle_with_no_paths() {
        let producer = Producer::<Hdl, u32>::new();
        assert!(producer.idle());
    }
}
