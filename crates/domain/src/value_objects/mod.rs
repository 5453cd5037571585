//! Value objects - Immutable objects defined by their attributes

mod damage;
mod names;
mod position;

pub use damage::{DamageRoll, CRIT_CHANCE_PERCENT, MAX_BASE_DAMAGE, MIN_BASE_DAMAGE};
pub use names::{Nickname, RequestId};
pub use position::Position;
