//! Identity-framed, non-blocking message channels

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable per-connection identifier assigned at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Server side of the channel: many clients, each addressed by id.
///
/// `try_recv` never blocks; sends are fire-and-forget.
pub trait ServerTransport {
    fn try_recv(&mut self) -> Option<(ClientId, Bytes)>;

    fn send(&self, client: ClientId, payload: Bytes) -> Result<(), TransportError>;

    /// Clients that went away since the last call
    fn take_disconnected(&mut self) -> Vec<ClientId> {
        Vec::new()
    }
}

/// Client side of the channel: exactly one server
pub trait ClientTransport {
    fn try_recv(&mut self) -> Option<Bytes>;

    fn send(&self, payload: Bytes) -> Result<(), TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
