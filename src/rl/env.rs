//! Environment adapter - translates live entities into observations and
//! applies actions back onto them.
//!
//! Both directions are synchronous and stateless; the only side effect is the
//! mutation of the single entity passed to [`apply_action`].

use crate::infra::{Battlefield, CombatAgent, Vec3};

use super::observation::{
    Action, GridCell, Observation, VISION_CELL_SIZE, VISION_GRID_SIDE, VISION_RADIUS,
    finite_or, finite_vec, triggered,
};

/// Movement tuning for [`apply_action`].
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Horizontal speed at full stick deflection
    pub move_speed: f32,
    /// Speed multiplier while sprinting
    pub sprint_multiplier: f32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            sprint_multiplier: 1.6,
        }
    }
}

/// Sample an agent's current state into an [`Observation`].
///
/// Agents without a physics body are observed at the origin with zero
/// velocity. Every numeric field is finite.
pub fn observation_from_entity<W: Battlefield>(world: &W, agent: &W::Agent) -> Observation {
    let mut obs = Observation::new(agent.team());

    if let Some(body) = agent.body() {
        obs.position = finite_vec(body.position);
        obs.velocity = finite_vec(body.velocity);
    }
    obs.health = finite_or(agent.health(), 0.0).clamp(0.0, 100.0);
    obs.armor = finite_or(agent.armor(), 0.0).clamp(0.0, 100.0);
    obs.weapon_id = agent.weapon_id();
    obs.ammo = finite_or(agent.ammo(), 0.0).max(0.0);
    obs.crouching = agent.is_crouching();
    obs.grenades = finite_or(agent.grenades(), 0.0).max(0.0);
    obs.combat = agent.combat_context().map(|mut context| {
        context.cover_distance = finite_or(context.cover_distance, 1.0).clamp(0.0, 1.0);
        context
    });

    let me = agent.id();
    for other in world.live_agents() {
        if other.id() == me {
            continue;
        }
        let Some(body) = other.body() else {
            continue;
        };
        let delta = finite_vec(body.position) - obs.position;
        let Some(index) = vision_cell(delta) else {
            continue;
        };
        // Last writer wins on cell collisions
        obs.vision_grid[index] = if other.team() == agent.team() {
            GridCell::Ally as u8
        } else {
            GridCell::Enemy as u8
        };
    }

    obs
}

/// Grid index for a relative offset, or `None` if it falls outside the
/// vision radius or the grid.
pub fn vision_cell(delta: Vec3) -> Option<usize> {
    if delta.length() > VISION_RADIUS {
        return None;
    }

    let half_extent = VISION_GRID_SIDE as f32 * VISION_CELL_SIZE / 2.0;
    let gx = ((delta.x + half_extent) / VISION_CELL_SIZE).floor();
    let gz = ((delta.z + half_extent) / VISION_CELL_SIZE).floor();
    let side = VISION_GRID_SIDE as f32;
    if gx < 0.0 || gz < 0.0 || gx >= side || gz >= side {
        return None;
    }

    Some(gz as usize * VISION_GRID_SIDE + gx as usize)
}

/// Apply one action to an entity.
///
/// Horizontal velocity is overwritten outright; vertical velocity is kept.
/// No smoothing or physical consistency check is applied.
pub fn apply_action<A: CombatAgent + ?Sized>(agent: &mut A, action: &Action, config: &EnvConfig) {
    let action = action.clamped();

    let mut speed = config.move_speed;
    if triggered(action.sprint) {
        speed *= config.sprint_multiplier;
    }

    let vertical = agent.body().map(|body| body.velocity.y).unwrap_or(0.0);
    agent.set_velocity(Vec3::new(
        action.move_x * speed,
        finite_or(vertical, 0.0),
        action.move_z * speed,
    ));
    agent.set_look(action.yaw, action.pitch);

    if let Some(lean) = action.lean {
        agent.set_lean(lean);
    }
    if triggered(action.jump) {
        agent.jump();
    }
    if triggered(action.fire) {
        agent.fire();
    }
    if triggered(action.throw_grenade) {
        agent.throw_grenade();
    }
    agent.set_crouching(triggered(action.crouch));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Team;
    use crate::state::{Arena, ArenaMap};

    fn arena() -> Arena {
        Arena::new(ArenaMap::by_name("warehouse"), 7)
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!((config.move_speed - 5.0).abs() < 1e-6);
        assert!(config.sprint_multiplier > 1.0);
    }

    #[test]
    fn test_vision_cell_projection() {
        assert_eq!(vision_cell(Vec3::ZERO), Some(16 * 32 + 16));
        assert_eq!(vision_cell(Vec3::new(-32.0, 0.0, -32.0)), Some(0));
        assert_eq!(vision_cell(Vec3::new(31.9, 0.0, 31.9)), Some(32 * 32 - 1));
        // Inside the radius but off the grid
        assert_eq!(vision_cell(Vec3::new(40.0, 0.0, 0.0)), None);
        // Beyond the radius
        assert_eq!(vision_cell(Vec3::new(30.0, 45.0, 0.0)), None);
    }

    #[test]
    fn test_observation_marks_allies_and_enemies() {
        let mut world = arena();
        let me = world.spawn_agent(Team::TaskForce, Vec3::new(0.0, 0.0, 0.0));
        world.spawn_agent(Team::TaskForce, Vec3::new(4.0, 0.0, 0.0));
        world.spawn_agent(Team::OpFor, Vec3::new(0.0, 0.0, -10.0));
        world.spawn_agent(Team::OpFor, Vec3::new(200.0, 0.0, 0.0));

        let agent = world.agent(me).unwrap();
        let obs = observation_from_entity(&world, agent);

        assert_eq!(obs.vision_grid.len(), 1024);
        assert_eq!(obs.count_cells(GridCell::Ally), 1);
        assert_eq!(obs.count_cells(GridCell::Enemy), 1);
        assert_eq!(obs.vision_grid[16 * 32 + 18], GridCell::Ally as u8);
        assert_eq!(obs.vision_grid[11 * 32 + 16], GridCell::Enemy as u8);
        assert!(obs.vision_grid.iter().all(|&c| c <= 2));
        assert!(obs.is_finite());
    }

    #[test]
    fn test_shared_cell_keeps_last_agent_in_id_order() {
        let cell = 16 * 32 + 18;

        let mut world = arena();
        let me = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        world.spawn_agent(Team::TaskForce, Vec3::new(4.0, 0.0, 0.0));
        world.spawn_agent(Team::OpFor, Vec3::new(4.5, 0.0, 0.5));
        let obs = observation_from_entity(&world, world.agent(me).unwrap());
        assert_eq!(obs.vision_grid[cell], GridCell::Enemy as u8);
        assert_eq!(obs.count_cells(GridCell::Ally), 0);

        let mut world = arena();
        let me = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        world.spawn_agent(Team::OpFor, Vec3::new(4.5, 0.0, 0.5));
        world.spawn_agent(Team::TaskForce, Vec3::new(4.0, 0.0, 0.0));
        let obs = observation_from_entity(&world, world.agent(me).unwrap());
        assert_eq!(obs.vision_grid[cell], GridCell::Ally as u8);
        assert_eq!(obs.count_cells(GridCell::Enemy), 0);
    }

    #[test]
    fn test_observation_without_body_defaults_to_origin() {
        let mut world = arena();
        let me = world.spawn_agent(Team::OpFor, Vec3::new(5.0, 0.0, 5.0));
        world.agent_mut(me).unwrap().detach_body();

        let obs = observation_from_entity(&world, world.agent(me).unwrap());
        assert_eq!(obs.position, Vec3::ZERO);
        assert_eq!(obs.velocity, Vec3::ZERO);
        assert!(obs.is_finite());
    }

    #[test]
    fn test_observation_sanitizes_non_finite_values() {
        let mut world = arena();
        let me = world.spawn_agent(Team::OpFor, Vec3::new(5.0, 0.0, 5.0));
        world.agent_mut(me).unwrap().state_mut().velocity = Vec3::new(f32::NAN, 0.0, 1.0);
        world.agent_mut(me).unwrap().state_mut().ammo = f32::INFINITY;

        let obs = observation_from_entity(&world, world.agent(me).unwrap());
        assert!(obs.is_finite());
        assert_eq!(obs.velocity.x, 0.0);
    }

    #[test]
    fn test_apply_action_overwrites_horizontal_velocity() {
        let mut world = arena();
        let id = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        let config = EnvConfig::default();
        let agent = world.agent_mut(id).unwrap();
        agent.state_mut().velocity = Vec3::new(9.0, -2.0, 9.0);

        let action = Action {
            move_x: 1.0,
            move_z: -0.5,
            yaw: 1.0,
            sprint: 1.0,
            crouch: 1.0,
            ..Action::default()
        };
        apply_action(agent, &action, &config);

        let state = agent.state();
        assert!((state.velocity.x - 8.0).abs() < 1e-5);
        assert!((state.velocity.z + 4.0).abs() < 1e-5);
        assert_eq!(state.velocity.y, -2.0);
        assert!((state.yaw - 1.0).abs() < 1e-6);
        assert!(state.crouching);
    }

    #[test]
    fn test_apply_action_triggers_fire_above_threshold() {
        let mut world = arena();
        let id = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        let config = EnvConfig::default();

        let agent = world.agent_mut(id).unwrap();
        apply_action(agent, &Action { fire: 0.5, ..Action::default() }, &config);
        assert!(!agent.state().fire_requested);

        apply_action(agent, &Action { fire: 0.9, ..Action::default() }, &config);
        assert!(agent.state().fire_requested);
    }
}
