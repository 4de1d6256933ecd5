//! In-process transport over channels, for tests and local play

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::transport::{ClientId, ClientTransport, ServerTransport, TransportError};

type Outbound = mpsc::UnboundedSender<Bytes>;

/// Server end of the in-memory transport
pub struct MemoryServer {
    inbound_tx: mpsc::UnboundedSender<(ClientId, Bytes)>,
    inbound_rx: mpsc::UnboundedReceiver<(ClientId, Bytes)>,
    clients: Arc<DashMap<ClientId, Outbound>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx,
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Open a new client connection to this server
    pub fn connect(&self) -> MemoryClient {
        let id = ClientId::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.clients.insert(id, outbound_tx);
        MemoryClient {
            id,
            to_server: self.inbound_tx.clone(),
            from_server: outbound_rx,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerTransport for MemoryServer {
    fn try_recv(&mut self) -> Option<(ClientId, Bytes)> {
        self.inbound_rx.try_recv().ok()
    }

    fn send(&self, client: ClientId, payload: Bytes) -> Result<(), TransportError> {
        let sender = self
            .clients
            .get(&client)
            .ok_or(TransportError::UnknownClient(client))?;
        sender.send(payload).map_err(|_| TransportError::Closed)
    }

    fn take_disconnected(&mut self) -> Vec<ClientId> {
        let gone: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect();
        for id in &gone {
            self.clients.remove(id);
        }
        gone
    }
}

/// Client end of the in-memory transport
pub struct MemoryClient {
    id: ClientId,
    to_server: mpsc::UnboundedSender<(ClientId, Bytes)>,
    from_server: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryClient {
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl ClientTransport for MemoryClient {
    fn try_recv(&mut self) -> Option<Bytes> {
        self.from_server.try_recv().ok()
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.to_server
            .send((self.id, payload))
            .map_err(|_| TransportError::Closed)
    }
}
