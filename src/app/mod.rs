//! Server application wiring

pub mod server;

pub use server::{MatchOutcome, ServerApp, ServerError, ServerOptions};
