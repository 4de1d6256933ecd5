//! Networking: wire protocol and transports

pub mod memory;
pub mod protocol;
pub mod tcp;
pub mod transport;

pub use memory::{MemoryClient, MemoryServer};
pub use protocol::{Envelope, Message, MessageType, ProtocolError, Sequencer, API_VERSION};
pub use tcp::{TcpClient, TcpServer};
pub use transport::{ClientId, ClientTransport, ServerTransport, TransportError};
