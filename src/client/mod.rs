//! Client side: connection state machine and snapshot playback

pub mod playback;
pub mod world;

pub use playback::{PlaybackEngine, SnapshotBuffer};
pub use world::{PoseSet, RenderState, WorldView};

use tracing::{debug, info, warn};

use crate::game::snapshot::StateSnapshot;
use crate::game::{ActionVector, BodySpec, PlayerIndex, Tick};
use crate::net::protocol::{Envelope, Message, ProtocolError, Sequencer};
use crate::net::transport::{ClientTransport, TransportError};

/// Where a client is in the match lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for `ConnectConfirmation`
    Connecting,
    /// Confirmed, waiting for `GameStart`
    AwaitingStart,
    Playing,
    /// A `done` state was received
    Finished,
}

/// One participant's view of a networked match
pub struct GameClient<T: ClientTransport> {
    transport: T,
    sequencer: Sequencer,
    state: ClientState,
    tick_length: f64,
    player_number: Option<PlayerIndex>,
    body_specs: Vec<BodySpec>,
    playback: Option<PlaybackEngine>,
    latest_tick: Option<Tick>,
    hps: Vec<f32>,
    scores: Vec<f32>,
}

impl<T: ClientTransport> GameClient<T> {
    pub fn new(transport: T, tick_length: f64) -> Self {
        Self {
            transport,
            sequencer: Sequencer::new(),
            state: ClientState::Connecting,
            tick_length,
            player_number: None,
            body_specs: Vec::new(),
            playback: None,
            latest_tick: None,
            hps: Vec::new(),
            scores: Vec::new(),
        }
    }

    /// Ask to join with the given body
    pub fn connect(&mut self, body_spec: &BodySpec, token: &str) -> Result<(), ClientError> {
        self.send(Message::Connect {
            body_spec: body_spec.to_json(),
            token: token.to_string(),
        })
    }

    /// Drain and handle every inbound frame. Returns how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(payload) = self.transport.try_recv() {
            match Envelope::decode(&payload) {
                Ok(envelope) => {
                    self.handle(envelope.message);
                    handled += 1;
                }
                Err(e) => warn!(error = %e, "Dropping malformed server payload"),
            }
        }
        handled
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::ConnectConfirmation { player_number } => {
                if self.state != ClientState::Connecting {
                    debug!(player_number, "Ignoring repeated confirmation");
                    return;
                }
                info!(player_number, "Connection confirmed");
                self.player_number = Some(player_number);
                self.state = ClientState::AwaitingStart;
            }
            Message::GameStart { body_specs } => {
                if self.playback.is_some() {
                    debug!("Ignoring repeated game start");
                    return;
                }
                self.body_specs = body_specs
                    .iter()
                    .filter_map(|json| match BodySpec::from_json(json) {
                        Ok(spec) => Some(spec),
                        Err(e) => {
                            warn!(error = %e, "Unreadable body spec in game start");
                            None
                        }
                    })
                    .collect();
                self.playback = Some(PlaybackEngine::new(self.tick_length, body_specs.len()));
                self.state = ClientState::Playing;
                info!(players = body_specs.len(), "Game started");
            }
            Message::State {
                tick,
                agent_transforms,
                entity_transforms,
                events,
                hps,
                scores,
                done,
            } => {
                let Some(playback) = self.playback.as_mut() else {
                    warn!(tick, "State before game start dropped");
                    return;
                };
                let snapshot = StateSnapshot::new(tick, agent_transforms, entity_transforms);
                if !playback.add_state(snapshot, events) {
                    debug!(tick, "Stale or duplicate state dropped");
                    return;
                }
                if self.latest_tick.map_or(true, |latest| tick > latest) {
                    self.latest_tick = Some(tick);
                    self.hps = hps;
                    self.scores = scores;
                }
                if done && self.state != ClientState::Finished {
                    info!(tick, scores = ?self.scores, "Match finished");
                    self.state = ClientState::Finished;
                }
            }
            other => {
                warn!(message_type = ?other.message_type(), "Unexpected message from server");
            }
        }
    }

    /// Send this player's action for the newest known tick. Returns that tick.
    pub fn send_action(&mut self, action_vector: ActionVector) -> Result<Tick, ClientError> {
        if self.state != ClientState::Playing {
            return Err(ClientError::NotPlaying);
        }
        let tick = self.latest_tick();
        self.send(Message::Action {
            tick,
            action_vector,
        })?;
        Ok(tick)
    }

    /// Advance playback by `delta_time` seconds into `world`
    pub fn update<W: WorldView + ?Sized>(&mut self, delta_time: f64, world: &mut W) -> bool {
        match self.playback.as_mut() {
            Some(playback) => playback.update(delta_time, world),
            None => false,
        }
    }

    fn send(&mut self, message: Message) -> Result<(), ClientError> {
        let payload = self.sequencer.encode(message)?;
        self.transport.send(payload)?;
        Ok(())
    }

    /// Newest tick received from the server, 0 before any
    pub fn latest_tick(&self) -> Tick {
        self.latest_tick.unwrap_or(0)
    }

    pub fn player_number(&self) -> Option<PlayerIndex> {
        self.player_number
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn body_specs(&self) -> &[BodySpec] {
        &self.body_specs
    }

    pub fn playback(&self) -> Option<&PlaybackEngine> {
        self.playback.as_ref()
    }

    pub fn hps(&self) -> &[f32] {
        &self.hps
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Highest scoring survivor once finished; ties have no victor
    pub fn victor(&self) -> Option<PlayerIndex> {
        if self.state != ClientState::Finished {
            return None;
        }
        let alive = |player: usize| self.hps.get(player).map_or(true, |hp| *hp > 0.0);
        let candidates: Vec<usize> = (0..self.scores.len()).filter(|&p| alive(p)).collect();
        let best = candidates
            .iter()
            .map(|&p| self.scores[p])
            .fold(f32::NEG_INFINITY, f32::max);
        let mut leaders = candidates.into_iter().filter(|&p| self.scores[p] == best);
        match (leaders.next(), leaders.next()) {
            (Some(player), None) => Some(player),
            _ => None,
        }
    }
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Game has not started")]
    NotPlaying,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::Transform;
    use crate::net::memory::MemoryServer;
    use crate::net::transport::ServerTransport;
    use std::collections::BTreeMap;

    fn state(tick: Tick, scores: Vec<f32>, done: bool) -> Message {
        Message::State {
            tick,
            agent_transforms: vec![Transform::default(), Transform::default()],
            entity_transforms: BTreeMap::new(),
            events: vec![],
            hps: vec![10.0, 10.0],
            scores,
            done,
        }
    }

    #[test]
    fn walks_the_connection_states() {
        let mut server = MemoryServer::new();
        let transport = server.connect();
        let id = transport.id();
        let mut client = GameClient::new(transport, 0.1);
        let mut seq = Sequencer::new();

        client.connect(&BodySpec::test_body(), "token").unwrap();
        let (from, payload) = server.try_recv().unwrap();
        assert_eq!(from, id);
        assert!(matches!(
            Envelope::decode(&payload).unwrap().message,
            Message::Connect { ref token, .. } if token == "token"
        ));
        assert!(matches!(client.send_action(vec![0; 4]), Err(ClientError::NotPlaying)));

        server
            .send(id, seq.encode(Message::ConnectConfirmation { player_number: 1 }).unwrap())
            .unwrap();
        client.poll();
        assert_eq!(client.state(), ClientState::AwaitingStart);
        assert_eq!(client.player_number(), Some(1));

        let spec = BodySpec::test_body().to_json();
        server
            .send(
                id,
                seq.encode(Message::GameStart {
                    body_specs: vec![spec.clone(), spec],
                })
                .unwrap(),
            )
            .unwrap();
        client.poll();
        assert_eq!(client.state(), ClientState::Playing);
        assert_eq!(client.body_specs().len(), 2);

        assert_eq!(client.send_action(vec![1, 0, 0, 0]).unwrap(), 0);
        let (_, payload) = server.try_recv().unwrap();
        assert_eq!(
            Envelope::decode(&payload).unwrap().message,
            Message::Action {
                tick: 0,
                action_vector: vec![1, 0, 0, 0]
            }
        );

        server.send(id, seq.encode(state(0, vec![0.0, 0.0], false)).unwrap()).unwrap();
        server.send(id, seq.encode(state(1, vec![5.0, 0.0], false)).unwrap()).unwrap();
        assert_eq!(client.poll(), 2);
        assert_eq!(client.latest_tick(), 1);
        assert!(client.update(0.05, &mut RenderState::new()));

        server.send(id, seq.encode(state(2, vec![105.0, -100.0], true)).unwrap()).unwrap();
        client.poll();
        assert_eq!(client.state(), ClientState::Finished);
        assert_eq!(client.victor(), Some(0));
    }

    #[test]
    fn state_before_start_and_garbage_are_dropped() {
        let server = MemoryServer::new();
        let transport = server.connect();
        let id = transport.id();
        let mut client = GameClient::new(transport, 0.1);

        server.send(id, bytes::Bytes::from_static(b"\x00\x01garbage")).unwrap();
        server
            .send(id, Sequencer::new().encode(state(3, vec![], false)).unwrap())
            .unwrap();
        client.poll();
        assert_eq!(client.state(), ClientState::Connecting);
        assert_eq!(client.latest_tick(), 0);
        assert!(!client.update(0.1, &mut RenderState::new()));
    }

    #[test]
    fn dead_leader_is_not_the_victor() {
        let server = MemoryServer::new();
        let transport = server.connect();
        let id = transport.id();
        let mut client = GameClient::new(transport, 0.1);
        let mut seq = Sequencer::new();

        server
            .send(id, seq.encode(Message::GameStart { body_specs: vec![] }).unwrap())
            .unwrap();
        let mut last = state(4, vec![100.0, 300.0], true);
        if let Message::State { hps, .. } = &mut last {
            *hps = vec![4.0, 0.0];
        }
        server.send(id, seq.encode(last).unwrap()).unwrap();
        client.poll();
        assert_eq!(client.victor(), Some(0));
    }

    #[test]
    fn tied_scores_have_no_victor() {
        let server = MemoryServer::new();
        let transport = server.connect();
        let id = transport.id();
        let mut client = GameClient::new(transport, 0.1);
        let mut seq = Sequencer::new();

        server
            .send(id, seq.encode(Message::GameStart { body_specs: vec![] }).unwrap())
            .unwrap();
        server.send(id, seq.encode(state(1, vec![3.0, 3.0], true)).unwrap()).unwrap();
        client.poll();
        assert_eq!(client.state(), ClientState::Finished);
        assert_eq!(client.victor(), None);
    }
}
