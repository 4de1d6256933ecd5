//! TCP transport with length-delimited framing
//!
//! Socket I/O runs as tasks on a tokio runtime; the game side only touches
//! unbounded channels, so `try_recv` and `send` never block.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use super::protocol::MAX_FRAME_SIZE;
use super::transport::{ClientId, ClientTransport, ServerTransport, TransportError};

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE as usize)
        .new_codec()
}

/// Listening side: accepts any number of clients
pub struct TcpServer {
    local_addr: SocketAddr,
    inbound_rx: mpsc::UnboundedReceiver<(ClientId, Bytes)>,
    disconnected_rx: mpsc::UnboundedReceiver<ClientId>,
    clients: Arc<DashMap<ClientId, mpsc::UnboundedSender<Bytes>>>,
}

impl TcpServer {
    /// Bind and start accepting. Must run inside a tokio runtime.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (disconnected_tx, disconnected_rx) = mpsc::unbounded_channel();
        let clients = Arc::new(DashMap::new());

        tokio::spawn(accept_loop(
            listener,
            inbound_tx,
            disconnected_tx,
            Arc::clone(&clients),
        ));

        info!(addr = %local_addr, "Listening for clients");

        Ok(Self {
            local_addr,
            inbound_rx,
            disconnected_rx,
            clients,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ServerTransport for TcpServer {
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
        let mut gone = Vec::new();
        while let Ok(id) = self.disconnected_rx.try_recv() {
            gone.push(id);
        }
        gone
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Bytes)>,
    disconnected_tx: mpsc::UnboundedSender<ClientId>,
    clients: Arc<DashMap<ClientId, mpsc::UnboundedSender<Bytes>>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let client_id = ClientId::new();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                clients.insert(client_id, outbound_tx);
                info!(client_id = %client_id, peer = %peer, "Client connected");

                let inbound_tx = inbound_tx.clone();
                let disconnected_tx = disconnected_tx.clone();
                let clients = Arc::clone(&clients);
                tokio::spawn(async move {
                    run_connection(client_id, stream, inbound_tx, outbound_rx).await;
                    clients.remove(&client_id);
                    let _ = disconnected_tx.send(client_id);
                    info!(client_id = %client_id, "Client disconnected");
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Run one connection with read/write split
async fn run_connection(
    client_id: ClientId,
    stream: TcpStream,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Bytes)>,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let (mut sink, mut frames) = Framed::new(stream, codec()).split();

    // Writer task: outbound channel -> socket
    let writer_handle = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = sink.send(payload).await {
                debug!(client_id = %client_id, error = %e, "Socket send failed");
                break;
            }
        }
    });

    // Reader loop: socket -> game loop
    while let Some(result) = frames.next().await {
        match result {
            Ok(frame) => {
                if inbound_tx.send((client_id, frame.freeze())).is_err() {
                    debug!(client_id = %client_id, "Inbound channel closed");
                    break;
                }
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Socket read failed");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Client side: one connection to the server
pub struct TcpClient {
    inbound_rx: mpsc::UnboundedReceiver<Bytes>,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    reader_handle: JoinHandle<()>,
}

impl TcpClient {
    /// Connect and start the socket tasks. Must run inside a tokio runtime.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut sink, mut frames) = Framed::new(stream, codec()).split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(e) = sink.send(payload).await {
                    debug!(error = %e, "Socket send failed");
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(result) = frames.next().await {
                match result {
                    Ok(frame) => {
                        if inbound_tx.send(frame.freeze()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Socket read failed");
                        break;
                    }
                }
            }
            debug!("Server connection closed");
        });

        info!(addr = %addr, "Connected to server");

        Ok(Self {
            inbound_rx,
            outbound_tx,
            reader_handle,
        })
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        // The writer ends once `outbound_tx` is dropped; the socket closes with both halves
        self.reader_handle.abort();
    }
}

impl ClientTransport for TcpClient {
    fn try_recv(&mut self) -> Option<Bytes> {
        self.inbound_rx.try_recv().ok()
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.outbound_tx
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }
}
