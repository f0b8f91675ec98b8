//! Headless reference battlefield.
//!
//! A deliberately small fixed-step world: velocity integration with gravity,
//! hitscan fire inside a yaw cone, grenade splash damage and crouch damage
//! reduction. It exists so the orchestrator can run without a game engine.

use std::collections::BTreeMap;
use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::infra::{AgentId, Battlefield, Body, CombatAgent, DamageEvent, Team, Vec3};
use crate::rl::observation::CombatContext;

use super::agent_state::AgentState;
use super::map::ArenaMap;

const GRAVITY: f32 = 9.81;
const JUMP_SPEED: f32 = 6.0;
const FIRE_RANGE: f32 = 40.0;
const FIRE_CONE: f32 = 0.35;
const FIRE_COOLDOWN: f32 = 0.2;
const HIT_CHANCE: f64 = 0.7;
const SHOT_DAMAGE: f32 = 10.0;
const CROUCH_DAMAGE_FACTOR: f32 = 0.6;
const GRENADE_RANGE: f32 = 10.0;
const GRENADE_RADIUS: f32 = 5.0;
const GRENADE_DAMAGE: f32 = 40.0;
const UNDER_FIRE_WINDOW: f32 = 1.0;
const COVER_NORMALIZER: f32 = 20.0;

/// One agent living in an [`Arena`].
#[derive(Debug, Clone)]
pub struct ArenaAgent {
    id: AgentId,
    team: Team,
    state: AgentState,
    map_has_cover: bool,
    cover_distance: Option<f32>,
}

impl ArenaAgent {
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    /// Remove the physics body, as an engine does between death and respawn.
    pub fn detach_body(&mut self) {
        self.state.has_body = false;
    }
}

impl CombatAgent for ArenaAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn team(&self) -> Team {
        self.team
    }

    fn body(&self) -> Option<Body> {
        self.state.has_body.then_some(Body {
            position: self.state.position,
            velocity: self.state.velocity,
        })
    }

    fn health(&self) -> f32 {
        self.state.health
    }

    fn armor(&self) -> f32 {
        self.state.armor
    }

    fn weapon_id(&self) -> u32 {
        self.state.weapon_id
    }

    fn ammo(&self) -> f32 {
        self.state.ammo
    }

    fn grenades(&self) -> f32 {
        self.state.grenades
    }

    fn is_crouching(&self) -> bool {
        self.state.crouching
    }

    fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    fn combat_context(&self) -> Option<CombatContext> {
        if !self.map_has_cover {
            return None;
        }
        Some(CombatContext {
            cover_distance: self
                .cover_distance
                .map(|d| (d / COVER_NORMALIZER).clamp(0.0, 1.0))
                .unwrap_or(1.0),
            is_under_fire: self.state.under_fire > 0.0,
        })
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.state.velocity = velocity;
    }

    fn set_look(&mut self, yaw: f32, pitch: f32) {
        self.state.yaw = yaw;
        self.state.pitch = pitch;
    }

    fn jump(&mut self) {
        self.state.jump_requested = true;
    }

    fn fire(&mut self) {
        self.state.fire_requested = true;
    }

    fn throw_grenade(&mut self) {
        self.state.grenade_requested = true;
    }

    fn set_crouching(&mut self, crouching: bool) {
        self.state.crouching = crouching;
    }

    fn set_lean(&mut self, lean: f32) {
        self.state.lean = lean;
    }

    fn set_external_control(&mut self, external: bool) {
        self.state.external_control = external;
    }
}

/// In-memory battlefield with a seeded simulation.
pub struct Arena {
    map: ArenaMap,
    agents: BTreeMap<AgentId, ArenaAgent>,
    next_id: u32,
    damage_events: Vec<DamageEvent>,
    rng: StdRng,
    elapsed: f32,
}

impl Arena {
    pub fn new(map: ArenaMap, seed: u64) -> Self {
        Self {
            map,
            agents: BTreeMap::new(),
            next_id: 1,
            damage_events: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            elapsed: 0.0,
        }
    }

    pub fn map(&self) -> &ArenaMap {
        &self.map
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Deal damage directly, bypassing weapons. Recorded as a damage event
    /// when an attacker is given.
    pub fn inflict(&mut self, victim: AgentId, amount: f32, attacker: Option<AgentId>) {
        let Some(target) = self.agents.get_mut(&victim) else {
            return;
        };
        if !target.state.is_alive() {
            return;
        }
        let dealt = amount.min(target.state.health);
        target.state.health -= dealt;
        target.state.under_fire = UNDER_FIRE_WINDOW;
        if let Some(attacker) = attacker {
            self.damage_events.push(DamageEvent {
                attacker,
                victim,
                amount: dealt,
            });
        }
        if !target.state.is_alive() {
            trace!("Agent {} eliminated", victim);
        }
    }

    /// Advance the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        self.elapsed += dt;
        let bounds = self.map.bounds;

        for agent in self.agents.values_mut() {
            let state = &mut agent.state;
            if !state.is_alive() || !state.has_body {
                state.clear_requests();
                continue;
            }

            if !state.external_control {
                // Idle bots hold position
                state.velocity.x = 0.0;
                state.velocity.z = 0.0;
            }
            if state.jump_requested && state.on_ground() {
                state.velocity.y = JUMP_SPEED;
            }

            state.position += state.velocity * dt;
            state.velocity.y -= GRAVITY * dt;
            if state.position.y <= 0.0 {
                state.position.y = 0.0;
                state.velocity.y = state.velocity.y.max(0.0);
            }
            state.position = bounds.clamp(state.position);

            state.fire_cooldown = (state.fire_cooldown - dt).max(0.0);
            state.under_fire = (state.under_fire - dt).max(0.0);
            agent.cover_distance = self.map.distance_to_cover(state.position);
        }

        self.resolve_weapons();
    }

    fn resolve_weapons(&mut self) {
        let shooters: Vec<AgentId> = self.agents.keys().copied().collect();

        for shooter in shooters {
            let Some(agent) = self.agents.get_mut(&shooter) else {
                continue;
            };
            let state = &mut agent.state;
            let wants_fire = state.fire_requested
                && state.is_alive()
                && state.fire_cooldown <= 0.0
                && state.ammo >= 1.0;
            let wants_grenade =
                state.grenade_requested && state.is_alive() && state.grenades >= 1.0;
            let origin = state.position;
            let facing = state.facing();
            let yaw = state.yaw;
            state.clear_requests();

            if wants_fire {
                state.ammo -= 1.0;
                state.fire_cooldown = FIRE_COOLDOWN;
                if let Some(target) = self.hitscan_target(shooter, origin, yaw) {
                    if self.rng.random_bool(HIT_CHANCE) {
                        let crouching = self
                            .agents
                            .get(&target)
                            .map(|a| a.state.crouching)
                            .unwrap_or(false);
                        let damage = if crouching {
                            SHOT_DAMAGE * CROUCH_DAMAGE_FACTOR
                        } else {
                            SHOT_DAMAGE
                        };
                        self.inflict(target, damage, Some(shooter));
                    }
                }
            }

            if wants_grenade {
                if let Some(agent) = self.agents.get_mut(&shooter) {
                    agent.state.grenades -= 1.0;
                }
                let impact = origin + facing * GRENADE_RANGE;
                let victims: Vec<(AgentId, f32)> = self
                    .agents
                    .values()
                    .filter(|a| a.id != shooter && a.state.is_alive() && a.state.has_body)
                    .filter_map(|a| {
                        let distance = a.state.position.distance(impact);
                        (distance < GRENADE_RADIUS)
                            .then(|| (a.id, GRENADE_DAMAGE * (1.0 - distance / GRENADE_RADIUS)))
                    })
                    .collect();
                for (victim, damage) in victims {
                    self.inflict(victim, damage, Some(shooter));
                }
            }
        }
    }

    /// Closest live agent (either team) inside the shooter's fire cone.
    fn hitscan_target(&self, shooter: AgentId, origin: Vec3, yaw: f32) -> Option<AgentId> {
        self.agents
            .values()
            .filter(|a| a.id != shooter && a.state.is_alive() && a.state.has_body)
            .filter_map(|a| {
                let delta = a.state.position - origin;
                let distance = delta.length();
                if distance > FIRE_RANGE || distance <= f32::EPSILON {
                    return None;
                }
                let bearing = delta.x.atan2(delta.z);
                let mut offset = (bearing - yaw).abs() % (2.0 * PI);
                if offset > PI {
                    offset = 2.0 * PI - offset;
                }
                (offset <= FIRE_CONE).then_some((a.id, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }
}

impl Battlefield for Arena {
    type Agent = ArenaAgent;

    fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    fn agent(&self, id: AgentId) -> Option<&ArenaAgent> {
        self.agents.get(&id)
    }

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut ArenaAgent> {
        self.agents.get_mut(&id)
    }

    fn spawn_agent(&mut self, team: Team, position: Vec3) -> AgentId {
        let id = AgentId(self.next_id);
        self.next_id += 1;
        let position = self.map.bounds.clamp(position);
        let agent = ArenaAgent {
            id,
            team,
            state: AgentState::new(position),
            map_has_cover: self.map.has_cover(),
            cover_distance: self.map.distance_to_cover(position),
        };
        self.agents.insert(id, agent);
        id
    }

    fn despawn_agent(&mut self, id: AgentId) {
        self.agents.remove(&id);
    }

    fn spawn_points(&self, team: Team) -> Option<Vec<Vec3>> {
        self.map.spawn_points(team).map(|points| points.to_vec())
    }

    fn drain_damage_events(&mut self) -> Vec<DamageEvent> {
        std::mem::take(&mut self.damage_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::new(ArenaMap::by_name("courtyard"), 3)
    }

    #[test]
    fn test_spawn_and_despawn() {
        let mut world = arena();
        let a = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        let b = world.spawn_agent(Team::OpFor, Vec3::new(5.0, 0.0, 5.0));
        assert_eq!(world.agent_ids(), vec![a, b]);

        world.despawn_agent(a);
        assert_eq!(world.len(), 1);
        assert!(world.agent(a).is_none());
    }

    #[test]
    fn test_external_velocity_is_integrated() {
        let mut world = arena();
        let id = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        let agent = world.agent_mut(id).unwrap();
        agent.set_external_control(true);
        agent.set_velocity(Vec3::new(2.0, 0.0, 0.0));

        world.step(0.5);
        let pos = world.agent(id).unwrap().state().position;
        assert!((pos.x - 1.0).abs() < 1e-5);
        assert_eq!(pos.y, 0.0);
    }

    #[test]
    fn test_idle_agents_hold_position() {
        let mut world = arena();
        let id = world.spawn_agent(Team::OpFor, Vec3::ZERO);
        world.agent_mut(id).unwrap().set_velocity(Vec3::new(5.0, 0.0, 5.0));
        world.step(1.0);
        assert_eq!(world.agent(id).unwrap().state().position, Vec3::ZERO);
    }

    #[test]
    fn test_inflict_records_damage_and_kills() {
        let mut world = arena();
        let a = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        let b = world.spawn_agent(Team::OpFor, Vec3::new(5.0, 0.0, 5.0));

        world.inflict(b, 250.0, Some(a));
        assert!(!world.agent(b).unwrap().is_alive());

        let events = world.drain_damage_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attacker, a);
        assert!((events[0].amount - 100.0).abs() < 1e-6);
        assert!(world.drain_damage_events().is_empty());
    }

    #[test]
    fn test_grenade_splash_damages_nearby_agents() {
        let mut world = arena();
        let thrower = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        let victim = world.spawn_agent(Team::OpFor, Vec3::new(0.0, 0.0, 10.0));
        world.agent_mut(thrower).unwrap().throw_grenade();

        world.step(0.01);
        assert!(world.agent(victim).unwrap().health() < 100.0);
        assert_eq!(world.agent(thrower).unwrap().grenades(), 1.0);
    }

    #[test]
    fn test_fire_consumes_ammo_and_respects_cooldown() {
        let mut world = arena();
        let shooter = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        world.agent_mut(shooter).unwrap().fire();
        world.step(0.01);
        world.agent_mut(shooter).unwrap().fire();
        world.step(0.01);

        let ammo = world.agent(shooter).unwrap().ammo();
        assert_eq!(ammo, 59.0);
    }

    #[test]
    fn test_combat_context_only_on_maps_with_cover() {
        let mut world = arena();
        let id = world.spawn_agent(Team::TaskForce, Vec3::ZERO);
        assert!(world.agent(id).unwrap().combat_context().is_none());

        let mut world = Arena::new(ArenaMap::by_name("warehouse"), 3);
        let id = world.spawn_agent(Team::TaskForce, Vec3::new(0.0, 0.0, -12.0));
        let context = world.agent(id).unwrap().combat_context().unwrap();
        assert!(context.cover_distance < 1e-6);
        assert!(!context.is_under_fire);
    }
}
