//! Broker Store
//!
//! Replicated key/value stores over the reliable channel. One master
//! actor holds the authoritative state of a named store, serializes all
//! mutations, and broadcasts them to any number of clone actors, which
//! serve local reads and forward writes. Storage itself is pluggable
//! behind the `Backend` contract.

pub mod backend;
pub mod clone;
pub mod command;
pub mod disk;
pub mod events;
pub mod master;
pub mod memory;
pub mod message;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::Backend;
pub use clone::{spawn_clone, CloneMsg};
pub use command::Command;
pub use disk::DiskBackend;
pub use events::StoreEvent;
pub use master::{spawn_master, MasterMsg};
pub use memory::MemoryBackend;
pub use message::{StoreCore, StoreMessage};
pub use store::Store;
