//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::{DEFAULT_SUB_STEPS, DEFAULT_TICK_LENGTH};

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Authoritative tick length in seconds
    pub tick_length: f64,
    /// `AdvanceOnly` sub-steps issued before each tick's `Advance`
    pub sub_steps: u32,
    /// Episode length in ticks
    pub max_ticks: u64,
    /// Participants needed before the match starts
    pub required_players: usize,
    /// Arena RNG seed
    pub seed: u64,

    /// Admission tokens. Empty means dev mode: anyone may join.
    pub player_tokens: Vec<String>,
    /// Max inbound messages per second per client
    pub input_rate_limit: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR, as on most hosting platforms
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:7654".to_string())
        };

        let player_tokens = env::var("PLAYER_TOKENS")
            .map(|tokens| {
                tokens
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick_length: parse_var("TICK_LENGTH_SECS", DEFAULT_TICK_LENGTH)?,
            sub_steps: parse_var("SUB_STEPS", DEFAULT_SUB_STEPS)?,
            max_ticks: parse_var("MAX_TICKS", 600)?,
            required_players: parse_var("REQUIRED_PLAYERS", 2)?,
            seed: parse_var("MATCH_SEED", rand::random::<u64>())?,
            player_tokens,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?,
        };

        if !positive_secs(config.tick_length) {
            return Err(ConfigError::Invalid("TICK_LENGTH_SECS"));
        }
        if config.required_players == 0 {
            return Err(ConfigError::Invalid("REQUIRED_PLAYERS"));
        }

        Ok(config)
    }

    /// Whether connects are checked against `player_tokens`
    pub fn dev_mode(&self) -> bool {
        self.player_tokens.is_empty()
    }
}

/// Headless client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Admission token sent with `Connect`
    pub token: String,
    /// Body specification JSON; `None` uses the default test body
    pub body_spec: Option<String>,
    /// Render/update frames per second
    pub frame_rate: u32,
    /// Server tick length, used to pace playback
    pub tick_length: f64,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            server_addr: env::var("SERVER_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:7654".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            token: env::var("PLAYER_TOKEN").unwrap_or_default(),
            body_spec: env::var("BODY_SPEC").ok(),
            frame_rate: parse_var("FRAME_RATE", 60)?,
            tick_length: parse_var("TICK_LENGTH_SECS", DEFAULT_TICK_LENGTH)?,
        };

        if config.frame_rate == 0 {
            return Err(ConfigError::Invalid("FRAME_RATE"));
        }
        if !positive_secs(config.tick_length) {
            return Err(ConfigError::Invalid("TICK_LENGTH_SECS"));
        }

        Ok(config)
    }
}

/// Finite and above zero; NaN fails
fn positive_secs(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
