//! Server main loop: transport in, game ticks, state broadcast out

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::game::{BodySpec, Game, GameError, GameSettings, PlayerIndex, Tick};
use crate::net::protocol::{Envelope, Message, ProtocolError, Sequencer};
use crate::net::transport::{ClientId, ServerTransport};
use crate::util::rate_limit::{ClientRateLimiter, INPUT_RATE_LIMIT};
use crate::util::time::{SimClock, Timer};

/// Pause between loop iterations
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Admission and flow control
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Accepted tokens; empty lets anyone join
    pub player_tokens: Vec<String>,
    /// Max inbound messages per second per client
    pub input_rate_limit: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            player_tokens: Vec::new(),
            input_rate_limit: INPUT_RATE_LIMIT,
        }
    }
}

/// How a match ended
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub victor: Option<PlayerIndex>,
    pub scores: Vec<f32>,
    pub ticks: Tick,
    /// The simulation failed and the match was cut short
    pub aborted: bool,
}

/// Per-connection bookkeeping
struct Connection {
    sequencer: Sequencer,
    limiter: ClientRateLimiter,
    player: Option<PlayerIndex>,
}

/// The authoritative server application
pub struct ServerApp<T: ServerTransport> {
    transport: T,
    game: Game,
    options: ServerOptions,
    connections: HashMap<ClientId, Connection>,
    /// Player clients in connect order
    players: Vec<ClientId>,
    body_specs: Vec<String>,
    started: bool,
    outcome: Option<MatchOutcome>,
}

impl<T: ServerTransport> ServerApp<T> {
    pub fn new(transport: T, settings: GameSettings, options: ServerOptions) -> Self {
        Self {
            transport,
            game: Game::new(settings),
            options,
            connections: HashMap::new(),
            players: Vec::new(),
            body_specs: Vec::new(),
            started: false,
            outcome: None,
        }
    }

    pub fn from_config(transport: T, config: &ServerConfig) -> Self {
        Self::new(
            transport,
            GameSettings::from_config(config),
            ServerOptions {
                player_tokens: config.player_tokens.clone(),
                input_rate_limit: config.input_rate_limit,
            },
        )
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn players(&self) -> &[ClientId] {
        &self.players
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    /// One loop iteration at wall-clock `now`. Returns true once the match is over.
    pub fn run_once(&mut self, now: f64) -> Result<bool, ServerError> {
        if self.outcome.is_some() {
            return Ok(true);
        }

        for client_id in self.transport.take_disconnected() {
            if let Some(connection) = self.connections.remove(&client_id) {
                info!(client_id = %client_id, player = ?connection.player, "Connection dropped");
            }
        }

        while let Some((client_id, payload)) = self.transport.try_recv() {
            self.handle_payload(client_id, &payload)?;
        }

        if self.game.is_set_up() && !self.started {
            self.start_game(now)?;
        }

        if self.started && self.game.ready_to_tick(now) {
            return self.run_tick(now);
        }

        Ok(false)
    }

    /// Loop until the match finishes or `stop` is raised
    pub fn run(
        &mut self,
        clock: &SimClock,
        stop: &AtomicBool,
    ) -> Result<Option<MatchOutcome>, ServerError> {
        info!(
            required_players = self.game.required_players(),
            dev_mode = self.options.player_tokens.is_empty(),
            "Waiting for players"
        );

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested, leaving server loop");
                return Ok(None);
            }
            if self.run_once(clock.now())? {
                return Ok(self.outcome.clone());
            }
            thread::sleep(IDLE_SLEEP);
        }
    }

    /// Stop the simulation worker
    pub fn shutdown(&mut self) {
        self.game.shutdown();
    }

    fn handle_payload(&mut self, client_id: ClientId, payload: &[u8]) -> Result<(), ServerError> {
        let rate_limit = self.options.input_rate_limit;
        let connection = self
            .connections
            .entry(client_id)
            .or_insert_with(|| Connection {
                sequencer: Sequencer::new(),
                limiter: ClientRateLimiter::new(rate_limit),
                player: None,
            });

        if !connection.limiter.check() {
            warn!(client_id = %client_id, "Rate limited client message");
            return Ok(());
        }

        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Dropping malformed payload");
                return Ok(());
            }
        };

        match envelope.message {
            Message::Connect { body_spec, token } => self.handle_connect(client_id, &body_spec, &token),
            Message::Action {
                tick,
                action_vector,
            } => {
                self.handle_action(client_id, tick, action_vector);
                Ok(())
            }
            other => {
                warn!(
                    client_id = %client_id,
                    message_type = ?other.message_type(),
                    "Unexpected message from client"
                );
                Ok(())
            }
        }
    }

    fn handle_connect(
        &mut self,
        client_id: ClientId,
        body_spec: &str,
        token: &str,
    ) -> Result<(), ServerError> {
        let already_player = self
            .connections
            .get(&client_id)
            .and_then(|c| c.player)
            .is_some();
        if already_player {
            debug!(client_id = %client_id, "Duplicate connect ignored");
            return Ok(());
        }

        if self.game.is_set_up() {
            warn!(client_id = %client_id, "Connect rejected, match is full");
            return Ok(());
        }

        if !self.options.player_tokens.is_empty()
            && !self.options.player_tokens.iter().any(|t| t == token)
        {
            warn!(client_id = %client_id, "Connect rejected, invalid token");
            return Ok(());
        }

        let spec = match BodySpec::from_json(body_spec) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Connect rejected, bad body spec");
                return Ok(());
            }
        };

        let player_number = self.players.len();
        let body_json = spec.to_json();
        let body_name = spec.name.clone();
        self.game.register_body(spec)?;
        self.players.push(client_id);
        self.body_specs.push(body_json);
        if let Some(connection) = self.connections.get_mut(&client_id) {
            connection.player = Some(player_number);
        }

        info!(
            client_id = %client_id,
            player = player_number,
            body = %body_name,
            "Player joined"
        );

        self.send_to(client_id, Message::ConnectConfirmation { player_number })
    }

    fn handle_action(&mut self, client_id: ClientId, tick: Tick, action: Vec<i32>) {
        let Some(player) = self.connections.get(&client_id).and_then(|c| c.player) else {
            warn!(client_id = %client_id, "Action from a client that never connected");
            return;
        };

        match self.game.set_action(tick, player, action) {
            Ok(()) => {}
            Err(GameError::NotSetUp) => {
                debug!(client_id = %client_id, tick, "Action before game start dropped");
            }
            Err(e) => {
                warn!(client_id = %client_id, tick, error = %e, "Dropping invalid action");
            }
        }
    }

    fn start_game(&mut self, now: f64) -> Result<(), ServerError> {
        self.broadcast(Message::GameStart {
            body_specs: self.body_specs.clone(),
        })?;

        let initial = self.game.reset()?;
        self.broadcast(Message::state(&initial))?;

        self.game.anchor_clock(now);
        self.started = true;
        info!(players = self.players.len(), "Game started");
        Ok(())
    }

    fn run_tick(&mut self, now: f64) -> Result<bool, ServerError> {
        let behind = self.game.ticks_behind(now);
        if behind > 1 {
            warn!(behind, tick = self.game.current_tick(), "Server loop is lagging the tick schedule");
        }

        let timer = Timer::new();
        let result = match self.game.tick() {
            Ok(result) => result,
            Err(GameError::Worker(e)) => {
                error!(error = %e, tick = self.game.current_tick(), "Simulation failed, ending match");
                self.outcome = Some(MatchOutcome {
                    victor: None,
                    scores: Vec::new(),
                    ticks: self.game.current_tick(),
                    aborted: true,
                });
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(tick = result.tick_index, tick_us = timer.elapsed_micros(), "Tick simulated");

        self.broadcast(Message::state(&result))?;

        if result.done {
            info!(
                victor = ?result.victor,
                scores = ?result.scores,
                ticks = result.tick_index,
                "Match finished"
            );
            self.outcome = Some(MatchOutcome {
                victor: result.victor,
                scores: result.scores,
                ticks: result.tick_index,
                aborted: false,
            });
            return Ok(true);
        }

        Ok(false)
    }

    fn broadcast(&mut self, message: Message) -> Result<(), ServerError> {
        for client_id in self.players.clone() {
            self.send_to(client_id, message.clone())?;
        }
        Ok(())
    }

    /// Encode for one client; delivery failures are logged, not fatal
    fn send_to(&mut self, client_id: ClientId, message: Message) -> Result<(), ServerError> {
        let Some(connection) = self.connections.get_mut(&client_id) else {
            return Ok(());
        };
        let payload = connection.sequencer.encode(message)?;
        if let Err(e) = self.transport.send(client_id, payload) {
            debug!(client_id = %client_id, error = %e, "Send failed");
        }
        Ok(())
    }
}

/// Fatal server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ArenaSettings;
    use crate::net::memory::{MemoryClient, MemoryServer};
    use crate::net::transport::ClientTransport;
    use bytes::Bytes;

    fn settings() -> GameSettings {
        GameSettings {
            tick_length: 0.1,
            sub_steps: 5,
            required_players: 2,
            arena: ArenaSettings {
                max_ticks: 3,
                ..ArenaSettings::default()
            },
        }
    }

    fn send(client: &MemoryClient, message: Message) {
        client
            .send(Envelope::new(0, message).encode().unwrap())
            .unwrap();
    }

    fn connect(client: &MemoryClient, token: &str) {
        send(
            client,
            Message::Connect {
                body_spec: BodySpec::test_body().to_json(),
                token: token.to_string(),
            },
        );
    }

    fn drain(client: &mut MemoryClient) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(bytes) = client.try_recv() {
            messages.push(Envelope::decode(&bytes).unwrap().message);
        }
        messages
    }

    #[test]
    fn connect_is_confirmed_in_order() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let mut b = transport.connect();
        let mut app = ServerApp::new(transport, settings(), ServerOptions::default());

        connect(&a, "");
        app.run_once(0.0).unwrap();
        assert_eq!(drain(&mut a), vec![Message::ConnectConfirmation { player_number: 0 }]);
        assert!(!app.has_started());

        connect(&b, "");
        app.run_once(0.0).unwrap();
        let messages = drain(&mut b);
        assert_eq!(messages[0], Message::ConnectConfirmation { player_number: 1 });
        assert!(matches!(messages[1], Message::GameStart { ref body_specs } if body_specs.len() == 2));
        assert!(matches!(messages[2], Message::State { tick: 0, .. }));
        assert!(app.has_started());
    }

    #[test]
    fn invalid_token_is_rejected() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let options = ServerOptions {
            player_tokens: vec!["letmein".to_string()],
            ..ServerOptions::default()
        };
        let mut app = ServerApp::new(transport, settings(), options);

        connect(&a, "wrong");
        app.run_once(0.0).unwrap();
        assert!(drain(&mut a).is_empty());
        assert!(app.players().is_empty());

        connect(&a, "letmein");
        app.run_once(0.0).unwrap();
        assert_eq!(drain(&mut a), vec![Message::ConnectConfirmation { player_number: 0 }]);
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let mut app = ServerApp::new(transport, settings(), ServerOptions::default());

        a.send(Bytes::from_static(b"\xff\xff garbage")).unwrap();
        send(
            &a,
            Message::Connect {
                body_spec: "not json".to_string(),
                token: String::new(),
            },
        );
        app.run_once(0.0).unwrap();
        assert!(drain(&mut a).is_empty());

        // The connection still works afterwards
        connect(&a, "");
        app.run_once(0.0).unwrap();
        assert_eq!(drain(&mut a), vec![Message::ConnectConfirmation { player_number: 0 }]);
    }

    #[test]
    fn oversized_body_is_rejected_and_loop_continues() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let mut b = transport.connect();
        let mut app = ServerApp::new(transport, settings(), ServerOptions::default());

        for client in [&a, &b] {
            send(
                client,
                Message::Connect {
                    body_spec: r#"{"num_actions": 18446744073709551615}"#.to_string(),
                    token: String::new(),
                },
            );
        }
        assert!(!app.run_once(0.0).unwrap());
        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
        assert!(app.players().is_empty());
        assert!(!app.game().is_set_up());

        connect(&a, "");
        connect(&b, "");
        app.run_once(0.0).unwrap();
        assert_eq!(drain(&mut a)[0], Message::ConnectConfirmation { player_number: 0 });
        assert!(app.has_started());
    }

    #[test]
    fn duplicate_connect_is_ignored() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let mut app = ServerApp::new(transport, settings(), ServerOptions::default());

        connect(&a, "");
        connect(&a, "");
        app.run_once(0.0).unwrap();
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(app.players().len(), 1);
    }

    #[test]
    fn ticks_are_paced_and_match_finishes() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let b = transport.connect();
        let mut app = ServerApp::new(transport, settings(), ServerOptions::default());

        connect(&a, "");
        connect(&b, "");
        app.run_once(10.0).unwrap();
        drain(&mut a);

        // Not a full tick yet
        assert!(!app.run_once(10.05).unwrap());
        assert!(drain(&mut a).is_empty());

        send(
            &a,
            Message::Action {
                tick: 0,
                action_vector: vec![1, 0, 0, 0],
            },
        );
        assert!(!app.run_once(10.15).unwrap());
        let states = drain(&mut a);
        assert!(matches!(states.as_slice(), [Message::State { tick: 1, done: false, .. }]));

        assert!(!app.run_once(10.25).unwrap());
        assert!(app.run_once(10.35).unwrap());
        let outcome = app.outcome().unwrap();
        assert_eq!(outcome.ticks, 3);
        assert!(!outcome.aborted);
        let last = drain(&mut a);
        assert!(matches!(last.last(), Some(Message::State { done: true, .. })));
    }

    #[test]
    fn rate_limited_messages_are_dropped() {
        let transport = MemoryServer::new();
        let mut a = transport.connect();
        let options = ServerOptions {
            input_rate_limit: 1,
            ..ServerOptions::default()
        };
        let mut app = ServerApp::new(transport, settings(), options);

        send(
            &a,
            Message::Action {
                tick: 0,
                action_vector: vec![0; 4],
            },
        );
        connect(&a, "");
        app.run_once(0.0).unwrap();
        assert!(drain(&mut a).is_empty());
    }
}
