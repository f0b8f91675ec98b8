//! Rule-based baseline policy

use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::rl::observation::{Action, GridCell, Observation, VISION_CELL_SIZE, VISION_GRID_SIDE};

/// Below this health the bot falls back and crouches.
pub const LOW_HEALTH: f32 = 30.0;
/// Per-step chance of throwing a grenade when one is available.
pub const GRENADE_CHANCE: f32 = 0.02;

/// Deterministic rules with a seeded random component. Needs no training.
#[derive(Debug, Clone)]
pub struct ScriptedPolicy {
    rng: StdRng,
}

impl ScriptedPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn predict(&mut self, obs: &Observation) -> Action {
        let threat = nearest_cell(obs, GridCell::Enemy);
        let defensive = obs.health < LOW_HEALTH;

        let (move_x, move_z) = match (threat, defensive) {
            // Fall back away from the threat
            (Some((dx, dz)), true) => unit(-dx, -dz),
            (Some((dx, dz)), false) => unit(dx, dz),
            (None, _) => {
                let heading = self.rng.random_range(-PI..PI);
                (heading.sin() * 0.5, heading.cos() * 0.5)
            }
        };

        let yaw = threat.map_or(0.0, |(dx, dz)| dx.atan2(dz));
        let grenade = obs.grenades >= 1.0 && self.rng.random::<f32>() < GRENADE_CHANCE;

        Action {
            move_x,
            move_z,
            yaw,
            pitch: 0.0,
            fire: if obs.sees_anyone() { 1.0 } else { 0.0 },
            crouch: if defensive { 1.0 } else { 0.0 },
            throw_grenade: if grenade { 1.0 } else { 0.0 },
            jump: 0.0,
            sprint: if defensive { 1.0 } else { 0.0 },
            lean: None,
        }
        .clamped()
    }
}

impl Default for ScriptedPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Offset (dx, dz) of the closest grid cell of the given kind.
fn nearest_cell(obs: &Observation, kind: GridCell) -> Option<(f32, f32)> {
    let half = VISION_GRID_SIDE as f32 * VISION_CELL_SIZE / 2.0;
    obs.vision_grid
        .iter()
        .enumerate()
        .filter(|&(_, &cell)| cell == kind as u8)
        .map(|(index, _)| {
            let gx = (index % VISION_GRID_SIDE) as f32;
            let gz = (index / VISION_GRID_SIDE) as f32;
            (
                (gx + 0.5) * VISION_CELL_SIZE - half,
                (gz + 0.5) * VISION_CELL_SIZE - half,
            )
        })
        .min_by(|a, b| (a.0.hypot(a.1)).total_cmp(&b.0.hypot(b.1)))
}

fn unit(x: f32, z: f32) -> (f32, f32) {
    let len = x.hypot(z);
    if len <= f32::EPSILON {
        (0.0, 0.0)
    } else {
        (x / len, z / len)
    }
}
