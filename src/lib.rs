//! Duel Arena - authoritative arena server and predictive client core
//!
//! - `game`: tick-stepped arena simulation on a worker thread, action buffering, the tick driver
//! - `net`: binary wire protocol and message transports (TCP, in-memory)
//! - `app`: the server main loop
//! - `client`: connection state machine and snapshot playback

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod net;
pub mod util;
