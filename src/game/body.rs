//! Body specifications submitted by clients

use serde::{Deserialize, Serialize};

/// Index of the thrust flag in an action vector
pub const ACTION_THRUST: usize = 0;
/// Index of the turn-left flag
pub const ACTION_TURN_LEFT: usize = 1;
/// Index of the turn-right flag
pub const ACTION_TURN_RIGHT: usize = 2;
/// Index of the fire flag
pub const ACTION_FIRE: usize = 3;

/// Largest accepted action vector
pub const MAX_ACTIONS: usize = 64;

/// Serialized description of one participant's body.
///
/// Travels as JSON text inside `Connect` and `GameStart`. Only `num_actions`
/// is required; it fixes the action vector length for the whole match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySpec {
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of controllable input flags
    pub num_actions: usize,
    #[serde(default = "default_max_hp")]
    pub max_hp: f32,
    /// Collision circle radius
    #[serde(default = "default_radius")]
    pub radius: f32,
    /// Forward acceleration while thrusting
    #[serde(default = "default_thrust")]
    pub thrust: f32,
    /// Radians per second while turning
    #[serde(default = "default_turn_rate")]
    pub turn_rate: f32,
    #[serde(default = "default_bullet_speed")]
    pub bullet_speed: f32,
}

fn default_name() -> String {
    "Unnamed".to_string()
}

fn default_max_hp() -> f32 {
    10.0
}

fn default_radius() -> f32 {
    0.6
}

fn default_thrust() -> f32 {
    12.0
}

fn default_turn_rate() -> f32 {
    3.0
}

fn default_bullet_speed() -> f32 {
    25.0
}

impl BodySpec {
    /// The stock four-input body (thrust, left, right, fire)
    pub fn test_body() -> Self {
        Self {
            name: "Test body".to_string(),
            num_actions: 4,
            max_hp: default_max_hp(),
            radius: default_radius(),
            thrust: default_thrust(),
            turn_rate: default_turn_rate(),
            bullet_speed: default_bullet_speed(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, BodySpecError> {
        let spec: BodySpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json(&self) -> String {
        // A struct of plain numbers and strings cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), BodySpecError> {
        if self.num_actions == 0 {
            return Err(BodySpecError::Invalid("num_actions must be at least 1"));
        }
        if self.num_actions > MAX_ACTIONS {
            return Err(BodySpecError::Invalid("num_actions exceeds the maximum"));
        }
        let positive = |value: f32| value.is_finite() && value > 0.0;
        if !positive(self.max_hp) {
            return Err(BodySpecError::Invalid("max_hp must be positive"));
        }
        if !positive(self.radius) {
            return Err(BodySpecError::Invalid("radius must be positive"));
        }
        if !positive(self.thrust) {
            return Err(BodySpecError::Invalid("thrust must be positive"));
        }
        if !positive(self.turn_rate) {
            return Err(BodySpecError::Invalid("turn_rate must be positive"));
        }
        if !positive(self.bullet_speed) {
            return Err(BodySpecError::Invalid("bullet_speed must be positive"));
        }
        Ok(())
    }
}

/// Body specification errors
#[derive(Debug, thiserror::Error)]
pub enum BodySpecError {
    #[error("Malformed body spec: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid body spec: {0}")]
    Invalid(&'static str),
}
