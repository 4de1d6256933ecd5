//! Per-tick, per-player input store shared by the network path and the tick driver

use dashmap::DashMap;

use super::{ActionVector, PlayerIndex, Tick};

/// Latest received action for every `(tick, player)` key.
///
/// Writers may record actions for any tick in any order; readers never
/// wait for a straggler and get the zero vector instead.
#[derive(Debug)]
pub struct ActionBuffer {
    actions_per_player: Vec<usize>,
    table: DashMap<(Tick, PlayerIndex), ActionVector>,
}

impl ActionBuffer {
    pub fn new(actions_per_player: Vec<usize>) -> Result<Self, ActionError> {
        if actions_per_player.is_empty() {
            return Err(ActionError::NoPlayers);
        }
        Ok(Self {
            actions_per_player,
            table: DashMap::new(),
        })
    }

    pub fn num_players(&self) -> usize {
        self.actions_per_player.len()
    }

    /// Overwrite `player`'s action for `tick`
    pub fn set_action(
        &self,
        tick: Tick,
        player: PlayerIndex,
        action: ActionVector,
    ) -> Result<(), ActionError> {
        let expected = *self
            .actions_per_player
            .get(player)
            .ok_or(ActionError::UnknownPlayer {
                player,
                players: self.num_players(),
            })?;
        if action.len() != expected {
            return Err(ActionError::WrongLength {
                player,
                expected,
                actual: action.len(),
            });
        }
        self.table.insert((tick, player), action);
        Ok(())
    }

    /// One action per player, zero-filled where nothing arrived for `tick`
    pub fn get_actions(&self, tick: Tick) -> Vec<ActionVector> {
        self.actions_per_player
            .iter()
            .enumerate()
            .map(|(player, &len)| {
                self.table
                    .get(&(tick, player))
                    .map(|entry| entry.value().clone())
                    .unwrap_or_else(|| vec![0; len])
            })
            .collect()
    }

    /// True once every player has written an action for tick 0
    pub fn received_first_actions(&self) -> bool {
        (0..self.num_players()).all(|player| self.table.contains_key(&(0, player)))
    }

    /// Drop every entry for ticks older than `tick`
    pub fn evict_before(&self, tick: Tick) {
        self.table.retain(|(entry_tick, _), _| *entry_tick >= tick);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Action validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("Action buffer needs at least one player")]
    NoPlayers,

    #[error("Unknown player {player} (match has {players})")]
    UnknownPlayer { player: PlayerIndex, players: usize },

    #[error("Player {player} sent {actual} action flags, expected {expected}")]
    WrongLength {
        player: PlayerIndex,
        expected: usize,
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn buffer() -> ActionBuffer {
        ActionBuffer::new(vec![2, 3]).unwrap()
    }

    #[test]
    fn rejects_zero_players() {
        assert_eq!(ActionBuffer::new(vec![]).unwrap_err(), ActionError::NoPlayers);
    }

    #[test]
    fn missing_actions_are_zero_vectors() {
        let buffer = buffer();
        assert_eq!(buffer.get_actions(0), vec![vec![0, 0], vec![0, 0, 0]]);

        buffer.set_action(5, 1, vec![1, 0, 1]).unwrap();
        assert_eq!(buffer.get_actions(5), vec![vec![0, 0], vec![1, 0, 1]]);
        assert_eq!(buffer.get_actions(4), vec![vec![0, 0], vec![0, 0, 0]]);
    }

    #[test]
    fn later_writes_overwrite() {
        let buffer = buffer();
        buffer.set_action(0, 0, vec![1, 0]).unwrap();
        buffer.set_action(0, 0, vec![0, 1]).unwrap();
        assert_eq!(buffer.get_actions(0)[0], vec![0, 1]);
    }

    #[test]
    fn future_ticks_may_arrive_first() {
        let buffer = buffer();
        buffer.set_action(3, 0, vec![1, 1]).unwrap();
        buffer.set_action(1, 0, vec![1, 0]).unwrap();
        assert_eq!(buffer.get_actions(1)[0], vec![1, 0]);
        assert_eq!(buffer.get_actions(2)[0], vec![0, 0]);
        assert_eq!(buffer.get_actions(3)[0], vec![1, 1]);
    }

    #[test]
    fn validates_player_and_length() {
        let buffer = buffer();
        assert_eq!(
            buffer.set_action(0, 2, vec![0, 0]),
            Err(ActionError::UnknownPlayer {
                player: 2,
                players: 2
            })
        );
        assert_eq!(
            buffer.set_action(0, 1, vec![0, 0]),
            Err(ActionError::WrongLength {
                player: 1,
                expected: 3,
                actual: 2
            })
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn first_actions_need_every_player() {
        let buffer = buffer();
        assert!(!buffer.received_first_actions());
        buffer.set_action(0, 0, vec![0, 0]).unwrap();
        buffer.set_action(1, 1, vec![0, 0, 0]).unwrap();
        assert!(!buffer.received_first_actions());
        buffer.set_action(0, 1, vec![0, 0, 0]).unwrap();
        assert!(buffer.received_first_actions());
    }

    #[test]
    fn eviction_keeps_current_and_future_ticks() {
        let buffer = buffer();
        for tick in 0..10 {
            buffer.set_action(tick, 0, vec![1, 1]).unwrap();
        }
        buffer.evict_before(7);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get_actions(6)[0], vec![0, 0]);
        assert_eq!(buffer.get_actions(7)[0], vec![1, 1]);
    }

    #[test]
    fn concurrent_writers_and_reader() {
        let buffer = Arc::new(buffer());
        let writers: Vec<_> = (0..2)
            .map(|player| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let len = if player == 0 { 2 } else { 3 };
                    for tick in 0..500 {
                        buffer.set_action(tick, player, vec![1; len]).unwrap();
                    }
                })
            })
            .collect();

        for tick in 0..500 {
            assert_eq!(buffer.get_actions(tick).len(), 2);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(buffer.get_actions(499), vec![vec![1, 1], vec![1, 1, 1]]);
    }
}
