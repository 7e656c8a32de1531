//! Broker Node
//!
//! The user-facing endpoint of the fabric: attach masters and clones,
//! publish and subscribe on topics, and peer with other endpoints. The
//! overlay here is the in-memory rendition used for in-process meshes
//! and tests; a socket transport plugs in at the same seam.

pub mod config;
pub mod core;
pub mod endpoint;
pub mod flare;
pub mod overlay;
pub mod publisher;
pub mod queue;
pub mod subscriber;

pub use config::{BrokerOptions, Configuration, TlsConfig};
pub use core::{CoreHandle, Envelope, PeerInfo, PeerStatus};
pub use endpoint::{Endpoint, EndpointEvent};
pub use flare::Flare;
pub use overlay::Overlay;
pub use publisher::Publisher;
pub use subscriber::Subscriber;
