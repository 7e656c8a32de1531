//! Error taxonomy shared by every public API
//!
//! Fallible operations return `Result<T, Error>` where `Error` carries a
//! fixed code, optional endpoint context, and an optional message.

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed set of error codes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Not-an-error.
    #[error("none")]
    None,
    /// The unspecified default error code.
    #[error("unspecified")]
    Unspecified,
    /// Version incompatibility.
    #[error("peer_incompatible")]
    PeerIncompatible,
    /// Referenced peer does not exist.
    #[error("peer_invalid")]
    PeerInvalid,
    /// Remote peer not listening.
    #[error("peer_unavailable")]
    PeerUnavailable,
    /// Remote peer closed the connection during handshake.
    #[error("peer_disconnect_during_handshake")]
    PeerDisconnectDuringHandshake,
    /// A peering request timed out.
    #[error("peer_timeout")]
    PeerTimeout,
    /// Master with the given name already exists.
    #[error("master_exists")]
    MasterExists,
    /// Master with the given name does not exist.
    #[error("no_such_master")]
    NoSuchMaster,
    /// The given data store key does not exist.
    #[error("no_such_key")]
    NoSuchKey,
    /// The store operation timed out.
    #[error("request_timeout")]
    RequestTimeout,
    /// The operation expected a different type than provided.
    #[error("type_clash")]
    TypeClash,
    /// The data value cannot be used to carry out the desired operation.
    #[error("invalid_data")]
    InvalidData,
    /// The storage backend failed to execute the operation.
    #[error("backend_failure")]
    BackendFailure,
    /// The clone store has not yet synchronized with its master, or it
    /// has been disconnected for too long.
    #[error("stale_data")]
    StaleData,
    /// Opening a file failed.
    #[error("cannot_open_file")]
    CannotOpenFile,
    /// Writing to an open file failed.
    #[error("cannot_write_file")]
    CannotWriteFile,
    /// Received an unknown key for a topic.
    #[error("invalid_topic_key")]
    InvalidTopicKey,
    /// Reached the end of an input file.
    #[error("end_of_file")]
    EndOfFile,
    /// Received an unknown type tag value.
    #[error("invalid_tag")]
    InvalidTag,
    /// Deserialized an invalid status.
    #[error("invalid_status")]
    InvalidStatus,
}

/// Network-level address of an endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identifies an endpoint, by node id and/or network address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub node: Option<NodeId>,
    pub network: Option<NetworkInfo>,
}

/// An error code with optional endpoint context and message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub endpoint: Option<EndpointInfo>,
    pub message: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, endpoint: None, message: None }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, endpoint: None, message: Some(message.into()) }
    }

    pub fn with_endpoint(
        code: ErrorCode,
        endpoint: EndpointInfo,
        message: impl Into<String>,
    ) -> Self {
        Self { code, endpoint: Some(endpoint), message: Some(message.into()) }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(ep) = self.endpoint.as_ref().and_then(|e| e.network.as_ref()) {
            write!(f, " [{}]", ep)?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl PartialEq<ErrorCode> for Error {
    fn eq(&self, other: &ErrorCode) -> bool {
        self.code == *other
    }
}
