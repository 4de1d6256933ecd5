//! King-of-the-hill objective zone

use std::collections::BTreeSet;

use super::PlayerIndex;

/// Radius of the hill sensor circle
pub const HILL_RADIUS: f32 = 3.0;

/// Tracks which bodies are standing on the hill.
///
/// Occupancy is driven by begin/end contacts; `holder` decides who scores
/// the current tick.
#[derive(Debug, Default, Clone)]
pub struct Hill {
    occupants: BTreeSet<PlayerIndex>,
}

impl Hill {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, player: PlayerIndex) {
        self.occupants.insert(player);
    }

    pub fn leave(&mut self, player: PlayerIndex) {
        self.occupants.remove(&player);
    }

    pub fn is_occupied_by(&self, player: PlayerIndex) -> bool {
        self.occupants.contains(&player)
    }

    /// The sole occupant, if exactly one body is on the hill
    pub fn holder(&self) -> Option<PlayerIndex> {
        let mut occupants = self.occupants.iter();
        match (occupants.next(), occupants.next()) {
            (Some(&player), None) => Some(player),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.occupants.clear();
    }
}
