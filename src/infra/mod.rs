mod battlefield;
mod types;

pub use battlefield::{Battlefield, Body, CombatAgent, DamageEvent};
pub use types::{AgentId, Bounds, Team, Vec3};
