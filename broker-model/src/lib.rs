//! Broker Model
//!
//! Pure data types and traits for the broker fabric, decoupled from
//! storage engines, actor runtimes, and transport layers.

pub mod address;
pub mod data;
pub mod error;
pub mod ids;
pub mod time;
pub mod topic;
pub mod version;

// Re-exports from dependencies
pub use uuid::Uuid;

pub use address::{Address, Port, Protocol, Subnet};
pub use data::{Data, DataType, EnumValue};
pub use error::{EndpointInfo, Error, ErrorCode, NetworkInfo};
pub use ids::{ActorId, NodeId, PublisherId, RequestId};
pub use time::{Clock, SimClock, SystemClock, Timespan, Timestamp};
pub use topic::{Topic, TopicError};
