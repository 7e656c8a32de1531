//! Broker Channel
//!
//! A message-driven channel providing reliable, ordered transport over an
//! unreliable and unordered communication layer. A channel belongs to a
//! single producer with any number of consumers: the producer numbers
//! payloads, buffers them until cumulatively acknowledged, and retransmits
//! on request; each consumer delivers payloads to its backend strictly in
//! order, buffering out-of-order arrivals and emitting ACKs and NACKs from
//! a periodic tick.
//!
//! The channel never names a transport. Both roles are generic over a
//! backend capability supplied by the owning actor on every call, so the
//! owner decides how messages reach the other side.

mod consumer;
mod producer;

pub use consumer::{Consumer, ConsumerBackend};
pub use producer::{Path, Producer, ProducerBackend};

/// Errors raised by channel operations.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("consumer already registered")]
    ConsumerExists,
}

/// Monotonically increasing counter wide enough to neglect wraparound:
/// at a thousand messages per second it overflows after 580 million years.
pub type SequenceNumber = u64;

/// Tells a consumer the first sequence number it should process and
/// acknowledge after attaching to (or resynchronizing with) a producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub first_seq: SequenceNumber,
}

/// Transmits one ordered payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event<P> {
    pub seq: SequenceNumber,
    pub content: P,
}

/// Notifies the producer that a consumer received every event up to and
/// including `seq`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CumulativeAck {
    pub seq: SequenceNumber,
}

/// Notifies the producer that a consumer is missing specific events.
/// A NACK whose first entry is 0 signals lost synchronization and makes
/// the producer re-send the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nack {
    pub seqs: Vec<SequenceNumber>,
}

/// Notifies a consumer that the producer can no longer retransmit an
/// event. Fatal for the consumer's ordering guarantee; the owner must
/// resynchronize out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetransmitFailed {
    pub seq: SequenceNumber,
}
