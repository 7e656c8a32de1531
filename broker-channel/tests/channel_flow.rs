//! End-to-end channel runs over a lossy, reordering in-memory transport.

use broker_channel::{
    Consumer, ConsumerBackend, CumulativeAck, Event, Handshake, Nack, Path, Producer,
    ProducerBackend, RetransmitFailed, SequenceNumber,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

#[derive(Clone, Debug)]
enum Downstream {
    Handshake(Handshake),
    Event(Event<u64>),
    RetransmitFailed(RetransmitFailed),
}

#[derive(Clone, Debug)]
enum Upstream {
    Ack(CumulativeAck),
    Nack(Nack),
}

/// Producer side of the harness: queues messages per consumer.
#[derive(Default)]
struct Wire {
    to_consumer: Vec<VecDeque<Downstream>>,
}

impl Wire {
    fn new(consumers: usize) -> Self {
        Self { to_consumer: (0..consumers).map(|_| VecDeque::new()).collect() }
    }
}

impl ProducerBackend<usize, u64> for Wire {
    fn broadcast_event(&mut self, paths: &[Path<usize>], event: &Event<u64>) {
        for p in paths {
            self.to_consumer[p.hdl].push_back(Downstream::Event(event.clone()));
        }
    }

    fn send_handshake(&mut self, to: &usize, handshake: Handshake) {
        self.to_consumer[*to].push_back(Downstream::Handshake(handshake));
    }

    fn resend_event(&mut self, to: &usize, event: &Event<u64>) {
        self.to_consumer[*to].push_back(Downstream::Event(event.clone()));
    }

    fn send_retransmit_failed(&mut self, to: &usize, failed: RetransmitFailed) {
        self.to_consumer[*to].push_back(Downstream::RetransmitFailed(failed));
    }
}

/// Consumer side of the harness: records deliveries, queues replies.
#[derive(Default)]
struct Sink {
    delivered: Vec<u64>,
    upstream: VecDeque<Upstream>,
}

impl ConsumerBackend<u64> for Sink {
    fn consume(&mut self, content: u64) {
        self.delivered.push(content);
    }

    fn send_ack(&mut self, ack: CumulativeAck) {
        self.upstream.push_back(Upstream::Ack(ack));
    }

    fn send_nack(&mut self, nack: Nack) {
        self.upstream.push_back(Upstream::Nack(nack));
    }
}

/// Drop and reorder a batch of in-flight messages. The handshake itself
/// may be lost; the NACK-for-zero path recovers it.
fn disturb(rng: &mut StdRng, queue: &mut VecDeque<Downstream>, loss: f64) -> Vec<Downstream> {
    let mut batch: Vec<Downstream> = queue.drain(..).filter(|_| rng.gen_bool(1.0 - loss)).collect();
    for i in (1..batch.len()).rev() {
        let j = rng.gen_range(0..=i);
        batch.swap(i, j);
    }
    batch
}

fn run_lossy(seed: u64, consumers: usize, messages: u64, loss: f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut wire = Wire::new(consumers);
    let mut producer = Producer::new();
    let mut chans: Vec<Consumer<u64>> = (0..consumers).map(|_| Consumer::new()).collect();
    let mut sinks: Vec<Sink> = (0..consumers).map(|_| Sink::default()).collect();

    for c in 0..consumers {
        producer.add(&mut wire, c).unwrap();
    }

    let mut round_trip = |loss: f64,
                          rng: &mut StdRng,
                          wire: &mut Wire,
                          producer: &mut Producer<usize, u64>,
                          chans: &mut [Consumer<u64>],
                          sinks: &mut [Sink]| {
        for c in 0..consumers {
            for msg in disturb(rng, &mut wire.to_consumer[c], loss) {
                match msg {
                    Downstream::Handshake(h) => chans[c].handle_handshake(&mut sinks[c], h),
                    Downstream::Event(e) => chans[c].handle_event(&mut sinks[c], e.seq, e.content),
                    Downstream::RetransmitFailed(f) => {
                        panic!("producer evicted {} with consumers attached", f.seq)
                    }
                }
            }
            chans[c].tick(&mut sinks[c]);
            while let Some(reply) = sinks[c].upstream.pop_front() {
                if rng.gen_bool(1.0 - loss) {
                    match reply {
                        Upstream::Ack(a) => producer.handle_ack(&c, a.seq),
                        Upstream::Nack(n) => producer.handle_nack(wire, &c, &n.seqs),
                    }
                }
            }
        }
    };

    // Phase one: lossy rounds with production interleaved.
    let mut produced = 0u64;
    for _ in 0..400 {
        if produced < messages {
            producer.produce(&mut wire, produced);
            produced += 1;
        }
        round_trip(loss, &mut rng, &mut wire, &mut producer, &mut chans, &mut sinks);
    }

    // Phase two: loss-free recovery. A gap at the very tail only gets
    // NACKed once later traffic lands in the reorder buffer, so sparse
    // keepalive production keeps stalled consumers moving; that mirrors
    // live store traffic.
    let mut total = messages;
    for round in 0..5_000u64 {
        let done = sinks.iter().all(|s| s.delivered.len() as u64 >= messages);
        if done && producer.idle() {
            break;
        }
        if !done && round % 20 == 0 {
            producer.produce(&mut wire, total);
            total += 1;
        }
        round_trip(0.0, &mut rng, &mut wire, &mut producer, &mut chans, &mut sinks);
    }

    for (c, sink) in sinks.iter().enumerate() {
        assert!(
            sink.delivered.len() as u64 >= messages,
            "consumer {} incomplete: {} of {}",
            c,
            sink.delivered.len(),
            messages
        );
        let expected: Vec<u64> = (0..sink.delivered.len() as u64).collect();
        assert_eq!(sink.delivered, expected, "consumer {} saw gaps or reordering", c);
    }
    assert!(producer.idle());
    assert!(producer.buf().is_empty(), "idle producer retains buffered events");
}

#[test]
fn lossless_run_delivers_everything_in_order() {
    run_lossy(7, 3, 200, 0.0);
}

#[test]
fn heavy_loss_and_reordering_still_converge() {
    for seed in 0..8 {
        run_lossy(seed, 2, 150, 0.4);
    }
}

#[test]
fn single_consumer_close_to_total_loss() {
    run_lossy(99, 1, 60, 0.8);
}

#[test]
fn late_joiner_sees_only_later_events() {
    let mut wire = Wire::new(2);
    let mut producer = Producer::new();
    producer.add(&mut wire, 0).unwrap();
    producer.produce(&mut wire, 10);
    producer.produce(&mut wire, 11);

    // Second consumer joins mid-stream.
    producer.add(&mut wire, 1).unwrap();
    producer.produce(&mut wire, 12);

    let mut late = Consumer::new();
    let mut sink = Sink::default();
    for msg in std::mem::take(&mut wire.to_consumer[1]) {
        match msg {
            Downstream::Handshake(h) => late.handle_handshake(&mut sink, h),
            Downstream::Event(e) => late.handle_event(&mut sink, e.seq, e.content),
            Downstream::RetransmitFailed(_) => unreachable!(),
        }
    }
    assert_eq!(sink.delivered, vec![12]);
}

#[test]
fn sequence_numbers_observed_downstream_are_contiguous() {
    let mut wire = Wire::new(1);
    let mut producer = Producer::new();
    producer.add(&mut wire, 0).unwrap();
    for m in 0..20u64 {
        producer.produce(&mut wire, m);
    }
    let seqs: Vec<SequenceNumber> = wire.to_consumer[0]
        .iter()
        .filter_map(|m| match m {
            Downstream::Event(e) => Some(e.seq),
            _ => None,
        })
        .collect();
    assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
}
