//! Wire protocol message definitions
//! These are the binary frames exchanged between server and clients

use std::collections::BTreeMap;

use bincode::Options;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::game::snapshot::{TimedEvent, Transform};
use crate::game::{ActionVector, EntityId, PlayerIndex, Tick, TickResult};

/// Version stamped on every envelope
pub const API_VERSION: u16 = 1;

/// Maximum accepted frame size (1 MiB)
pub const MAX_FRAME_SIZE: u64 = 1024 * 1024;

/// Discriminant of a `Message`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Connect = 0,
    ConnectConfirmation = 1,
    Action = 2,
    GameStart = 3,
    State = 4,
}

/// Messages exchanged between server and clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Client -> server, once per connection
    Connect {
        /// Serialized `BodySpec` (JSON)
        body_spec: String,
        /// Admission token
        token: String,
    },

    /// Server -> client, accepted connect
    ConnectConfirmation { player_number: PlayerIndex },

    /// Client -> server, as often as the client computes input
    Action {
        tick: Tick,
        action_vector: ActionVector,
    },

    /// Server -> all clients once the roster is complete
    GameStart {
        /// Serialized body specs in player order
        body_specs: Vec<String>,
    },

    /// Server -> all clients, once per tick
    State {
        tick: Tick,
        agent_transforms: Vec<Transform>,
        entity_transforms: BTreeMap<EntityId, Transform>,
        events: Vec<TimedEvent>,
        hps: Vec<f32>,
        scores: Vec<f32>,
        done: bool,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connect { .. } => MessageType::Connect,
            Self::ConnectConfirmation { .. } => MessageType::ConnectConfirmation,
            Self::Action { .. } => MessageType::Action,
            Self::GameStart { .. } => MessageType::GameStart,
            Self::State { .. } => MessageType::State,
        }
    }

    /// State broadcast for one tick result
    pub fn state(result: &TickResult) -> Self {
        Self::State {
            tick: result.tick_index,
            agent_transforms: result.agent_transforms.clone(),
            entity_transforms: result.entity_transforms.clone(),
            events: result.events.clone(),
            hps: result.hps.clone(),
            scores: result.scores.clone(),
            done: result.done,
        }
    }
}

/// Versioned, sequenced frame around one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub api_version: u16,
    pub sequence_id: u32,
    pub message: Message,
}

impl Envelope {
    pub fn new(sequence_id: u32, message: Message) -> Self {
        Self {
            api_version: API_VERSION,
            sequence_id,
            message,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    /// Serialize this envelope to bytes (bincode).
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let vec = codec().serialize(self).map_err(ProtocolError::Encode)?;
        Ok(Bytes::from(vec))
    }

    /// Deserialize bytes to an envelope (bincode), rejecting other versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = codec().deserialize(bytes).map_err(ProtocolError::Decode)?;
        if envelope.api_version != API_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: API_VERSION,
                actual: envelope.api_version,
            });
        }
        Ok(envelope)
    }
}

/// Varint, little endian, size-limited, trailing bytes rejected
fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_SIZE)
}

/// Numbers outbound envelopes for one connection
#[derive(Debug, Default)]
pub struct Sequencer {
    next: u32,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(&mut self, message: Message) -> Envelope {
        let envelope = Envelope::new(self.next, message);
        self.next = self.next.wrapping_add(1);
        envelope
    }

    /// Wrap and encode in one go
    pub fn encode(&mut self, message: Message) -> Result<Bytes, ProtocolError> {
        self.wrap(message).encode()
    }
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Malformed payload: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Unsupported protocol version {actual} (expected {expected})")]
    UnsupportedVersion { expected: u16, actual: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::EffectKind;

    fn sample_state() -> Message {
        let mut entity_transforms = BTreeMap::new();
        entity_transforms.insert(3, Transform::new(1.5, -2.0, 0.25));
        Message::State {
            tick: 42,
            agent_transforms: vec![Transform::new(0.0, -15.0, 0.0), Transform::new(0.0, 15.0, 3.0)],
            entity_transforms,
            events: vec![
                TimedEvent::EntityDestroyed {
                    id: 2,
                    time: 4.15,
                    transform: Transform::new(9.0, 1.0, 0.5),
                },
                TimedEvent::EffectTriggered {
                    kind: EffectKind::MuzzleFlash,
                    time: 4.2,
                    transform: Transform::default(),
                },
            ],
            hps: vec![10.0, 7.0],
            scores: vec![12.0, 0.0],
            done: false,
        }
    }

    #[test]
    fn every_message_survives_the_wire() {
        let messages = [
            Message::Connect {
                body_spec: r#"{"num_actions":4}"#.to_string(),
                token: "secret".to_string(),
            },
            Message::ConnectConfirmation { player_number: 1 },
            Message::Action {
                tick: 7,
                action_vector: vec![1, 0, -1, 1],
            },
            Message::GameStart {
                body_specs: vec!["{}".to_string(), r#"{"name":"b"}"#.to_string()],
            },
            sample_state(),
        ];
        for (sequence_id, message) in messages.into_iter().enumerate() {
            let envelope = Envelope::new(sequence_id as u32, message);
            let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn message_type_discriminants() {
        assert_eq!(MessageType::Connect as u8, 0);
        assert_eq!(MessageType::ConnectConfirmation as u8, 1);
        assert_eq!(MessageType::Action as u8, 2);
        assert_eq!(MessageType::GameStart as u8, 3);
        assert_eq!(MessageType::State as u8, 4);
        assert_eq!(sample_state().message_type(), MessageType::State);
    }

    #[test]
    fn rejects_other_versions() {
        let mut envelope = Envelope::new(0, Message::ConnectConfirmation { player_number: 1 });
        envelope.api_version = API_VERSION + 1;
        let bytes = envelope.encode().unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(ProtocolError::UnsupportedVersion { actual, .. }) if actual == API_VERSION + 1
        ));
    }

    #[test]
    fn rejects_garbage_and_trailing_bytes() {
        assert!(matches!(
            Envelope::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(Envelope::decode(&[]), Err(ProtocolError::Decode(_))));

        let mut bytes = Envelope::new(0, Message::ConnectConfirmation { player_number: 0 })
            .encode()
            .unwrap()
            .to_vec();
        bytes.push(0);
        assert!(matches!(Envelope::decode(&bytes), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn sequencer_numbers_envelopes() {
        let mut sequencer = Sequencer::new();
        let first = sequencer.wrap(Message::ConnectConfirmation { player_number: 0 });
        let second = sequencer.wrap(Message::ConnectConfirmation { player_number: 0 });
        assert_eq!((first.sequence_id, second.sequence_id), (0, 1));

        let mut sequencer = Sequencer { next: u32::MAX };
        sequencer.wrap(Message::GameStart { body_specs: vec![] });
        assert_eq!(sequencer.wrap(Message::GameStart { body_specs: vec![] }).sequence_id, 0);
    }
}
