use serde::{Deserialize, Serialize};

/// Coordinate bound of the shared space, applied on both axes.
const POSITION_BOUND: i32 = 1000;

/// Position of a user's avatar in the shared space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Build a position clamped to `[-1000, 1000]` on both axes.
    pub fn clamped(x: i32, y: i32) -> Self {
        Self {
            x: x.clamp(-POSITION_BOUND, POSITION_BOUND),
            y: y.clamp(-POSITION_BOUND, POSITION_BOUND),
        }
    }
}
