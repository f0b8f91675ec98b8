//! Fixed-shape observation and action records exchanged between the
//! environment adapter and the policies.

use std::f32::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};

use crate::infra::{Team, Vec3};

/// Side length of the square vision grid.
pub const VISION_GRID_SIDE: usize = 32;
/// Number of cells in the flattened vision grid.
pub const VISION_CELLS: usize = VISION_GRID_SIDE * VISION_GRID_SIDE;
/// World units covered by one grid cell.
pub const VISION_CELL_SIZE: f32 = 2.0;
/// Agents further away than this are not projected into the grid.
pub const VISION_RADIUS: f32 = 50.0;

/// Scalar features preceding the vision grid in the flat vector.
pub const SCALAR_FEATURES: usize = 16;
/// Length of [`Observation::flatten`].
pub const OBSERVATION_SIZE: usize = SCALAR_FEATURES + VISION_CELLS;
/// Length of the network's action vector.
pub const ACTION_SIZE: usize = 7;

/// Trigger scores strictly above this fire their side effect.
pub const TRIGGER_THRESHOLD: f32 = 0.5;

const MAX_HEALTH: f32 = 100.0;
const MAX_ARMOR: f32 = 100.0;

/// Occupancy value of one vision grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GridCell {
    Empty = 0,
    Ally = 1,
    Enemy = 2,
}

/// Optional tactical context only some engines provide.
///
/// When absent, the flat vector carries a zero presence flag followed by
/// [`CombatContext::default`] values (cover far away, not under fire).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombatContext {
    /// Normalized distance to the closest cover, in `[0, 1]`.
    pub cover_distance: f32,
    pub is_under_fire: bool,
}

impl Default for CombatContext {
    fn default() -> Self {
        Self {
            cover_distance: 1.0,
            is_under_fire: false,
        }
    }
}

/// One agent's state at one simulation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub position: Vec3,
    pub velocity: Vec3,
    pub health: f32,
    pub armor: f32,
    pub weapon_id: u32,
    pub ammo: f32,
    pub crouching: bool,
    pub grenades: f32,
    pub team: Team,
    /// Row-major (z rows, x columns) grid of [`GridCell`] values.
    pub vision_grid: Vec<u8>,
    pub combat: Option<CombatContext>,
}

impl Observation {
    /// An observation with an empty vision grid, every numeric field
    /// replaced by a finite value.
    pub fn new(team: Team) -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            health: 0.0,
            armor: 0.0,
            weapon_id: 0,
            ammo: 0.0,
            crouching: false,
            grenades: 0.0,
            team,
            vision_grid: vec![GridCell::Empty as u8; VISION_CELLS],
            combat: None,
        }
    }

    /// Horizontal speed in world units per second.
    pub fn horizontal_speed(&self) -> f32 {
        (self.velocity.x * self.velocity.x + self.velocity.z * self.velocity.z).sqrt()
    }

    /// True if any vision cell is occupied.
    pub fn sees_anyone(&self) -> bool {
        self.vision_grid.iter().any(|&cell| cell != GridCell::Empty as u8)
    }

    pub fn count_cells(&self, kind: GridCell) -> usize {
        self.vision_grid
            .iter()
            .filter(|&&cell| cell == kind as u8)
            .count()
    }

    pub fn is_finite(&self) -> bool {
        self.flatten().iter().all(|v| v.is_finite())
    }

    /// Flat network input of length [`OBSERVATION_SIZE`].
    pub fn flatten(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(OBSERVATION_SIZE);
        out.extend_from_slice(&self.position.to_array());
        out.extend_from_slice(&self.velocity.to_array());
        out.push(self.health / MAX_HEALTH);
        out.push(self.armor / MAX_ARMOR);
        out.push(self.weapon_id as f32);
        out.push(self.ammo);
        out.push(if self.crouching { 1.0 } else { 0.0 });
        out.push(self.grenades);
        out.push(self.team.as_bit());

        let context = self.combat.unwrap_or_default();
        out.push(if self.combat.is_some() { 1.0 } else { 0.0 });
        out.push(context.cover_distance);
        out.push(if context.is_under_fire { 1.0 } else { 0.0 });

        debug_assert_eq!(out.len(), SCALAR_FEATURES);

        out.extend(self.vision_grid.iter().map(|&cell| cell as f32));
        out
    }
}

/// Replace a non-finite value with `fallback`.
pub fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

/// Replace each non-finite component with zero.
pub fn finite_vec(value: Vec3) -> Vec3 {
    Vec3::new(
        finite_or(value.x, 0.0),
        finite_or(value.y, 0.0),
        finite_or(value.z, 0.0),
    )
}

/// One control decision for one agent.
///
/// Trigger fields are scores; [`TRIGGER_THRESHOLD`] decides whether they
/// fire. Discrete producers emit `0.0`/`1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    pub move_x: f32,
    pub move_z: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fire: f32,
    pub crouch: f32,
    pub throw_grenade: f32,
    pub jump: f32,
    pub sprint: f32,
    pub lean: Option<f32>,
}

impl Action {
    /// Clamp continuous components into their valid ranges and replace
    /// non-finite values with zero.
    pub fn clamped(self) -> Self {
        Self {
            move_x: finite_or(self.move_x, 0.0).clamp(-1.0, 1.0),
            move_z: finite_or(self.move_z, 0.0).clamp(-1.0, 1.0),
            yaw: finite_or(self.yaw, 0.0).clamp(-PI, PI),
            pitch: finite_or(self.pitch, 0.0).clamp(-FRAC_PI_2, FRAC_PI_2),
            fire: finite_or(self.fire, 0.0),
            crouch: finite_or(self.crouch, 0.0),
            throw_grenade: finite_or(self.throw_grenade, 0.0),
            jump: finite_or(self.jump, 0.0),
            sprint: finite_or(self.sprint, 0.0),
            lean: self.lean.map(|lean| finite_or(lean, 0.0).clamp(-1.0, 1.0)),
        }
    }

    /// Network-facing vector: move x/z, yaw, pitch, fire, crouch, grenade.
    pub fn to_vector(&self) -> [f32; ACTION_SIZE] {
        [
            self.move_x,
            self.move_z,
            self.yaw,
            self.pitch,
            self.fire,
            self.crouch,
            self.throw_grenade,
        ]
    }
}

pub fn triggered(score: f32) -> bool {
    score > TRIGGER_THRESHOLD
}

/// Cutoffs on the raw discrete network outputs. Deliberately asymmetric.
pub const FIRE_CUTOFF: f32 = 0.0;
pub const CROUCH_CUTOFF: f32 = 0.5;
pub const GRENADE_CUTOFF: f32 = 0.8;

impl Action {
    /// Decode a raw policy output vector: continuous parts clamped,
    /// discrete parts thresholded to `0.0`/`1.0`. Missing entries read as 0.
    pub fn from_network_output(raw: &[f32]) -> Self {
        let at = |i: usize| raw.get(i).copied().map_or(0.0, |v| finite_or(v, 0.0));
        let flag = |v: f32, cutoff: f32| if v > cutoff { 1.0 } else { 0.0 };
        Self {
            move_x: at(0),
            move_z: at(1),
            yaw: at(2),
            pitch: at(3),
            fire: flag(at(4), FIRE_CUTOFF),
            crouch: flag(at(5), CROUCH_CUTOFF),
            throw_grenade: flag(at(6), GRENADE_CUTOFF),
            jump: 0.0,
            sprint: 0.0,
            lean: None,
        }
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_length_and_layout() {
        let mut obs = Observation::new(Team::OpFor);
        obs.health = 50.0;
        obs.vision_grid[0] = GridCell::Enemy as u8;

        let flat = obs.flatten();
        assert_eq!(flat.len(), OBSERVATION_SIZE);
        assert!((flat[6] - 0.5).abs() < 1e-6);
        assert_eq!(flat[12], 1.0); // team bit
        assert_eq!(flat[13], 0.0); // no combat context
        assert_eq!(flat[14], 1.0); // default cover distance
        assert_eq!(flat[SCALAR_FEATURES], 2.0);
    }

    #[test]
    fn test_flatten_with_combat_context() {
        let mut obs = Observation::new(Team::TaskForce);
        obs.combat = Some(CombatContext {
            cover_distance: 0.25,
            is_under_fire: true,
        });
        let flat = obs.flatten();
        assert_eq!(&flat[13..16], &[1.0, 0.25, 1.0]);
    }

    #[test]
    fn test_action_clamping() {
        let action = Action {
            move_x: 3.0,
            move_z: -7.0,
            yaw: 10.0,
            pitch: -4.0,
            fire: f32::NAN,
            ..Action::default()
        }
        .clamped();

        assert_eq!(action.move_x, 1.0);
        assert_eq!(action.move_z, -1.0);
        assert_eq!(action.yaw, PI);
        assert_eq!(action.pitch, -FRAC_PI_2);
        assert_eq!(action.fire, 0.0);
    }

    #[test]
    fn test_network_output_thresholds() {
        let action = Action::from_network_output(&[2.0, -0.5, 0.1, 9.0, 0.01, 0.5, 0.79]);
        assert_eq!(action.move_x, 1.0);
        assert_eq!(action.pitch, FRAC_PI_2);
        assert_eq!(action.fire, 1.0);
        assert_eq!(action.crouch, 0.0);
        assert_eq!(action.throw_grenade, 0.0);

        let action = Action::from_network_output(&[0.0, 0.0, 0.0, 0.0, -0.1, 0.6, 0.81]);
        assert_eq!((action.fire, action.crouch, action.throw_grenade), (0.0, 1.0, 1.0));
    }

    #[test]
    fn test_trigger_threshold_is_strict() {
        assert!(!triggered(0.5));
        assert!(triggered(0.51));
    }
}
