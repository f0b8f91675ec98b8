//! Contracts the learning core expects from the surrounding game engine.
//!
//! The engine owns rendering, physics stepping and navigation. The learning
//! core only reads agent state through [`CombatAgent`] and issues commands
//! through the same trait; it never reaches into engine internals.

use crate::rl::observation::CombatContext;

use super::types::{AgentId, Team, Vec3};

/// Physics body of an agent, if one is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Damage dealt by one agent to another since the last drain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageEvent {
    pub attacker: AgentId,
    pub victim: AgentId,
    pub amount: f32,
}

/// Query and command capability over one live combat entity.
pub trait CombatAgent {
    fn id(&self) -> AgentId;
    fn team(&self) -> Team;
    /// `None` while the entity has no physics body (e.g. mid-respawn).
    fn body(&self) -> Option<Body>;
    fn health(&self) -> f32;
    fn armor(&self) -> f32;
    fn weapon_id(&self) -> u32;
    fn ammo(&self) -> f32;
    fn grenades(&self) -> f32;
    fn is_crouching(&self) -> bool;
    fn is_alive(&self) -> bool;
    /// Extended tactical context; only some engines provide it.
    fn combat_context(&self) -> Option<CombatContext> {
        None
    }

    fn set_velocity(&mut self, velocity: Vec3);
    /// Set look direction; yaw also drives the visual heading.
    fn set_look(&mut self, yaw: f32, pitch: f32);
    fn jump(&mut self);
    fn fire(&mut self);
    fn throw_grenade(&mut self);
    fn set_crouching(&mut self, crouching: bool);
    fn set_lean(&mut self, _lean: f32) {}
    /// Disable (or re-enable) any autonomous non-RL behaviour.
    fn set_external_control(&mut self, external: bool);
}

/// The world an orchestrator drives: agent lookup, spawning and damage feed.
pub trait Battlefield {
    type Agent: CombatAgent;

    /// Ids of every agent currently present, in a stable order.
    fn agent_ids(&self) -> Vec<AgentId>;
    fn agent(&self, id: AgentId) -> Option<&Self::Agent>;
    fn agent_mut(&mut self, id: AgentId) -> Option<&mut Self::Agent>;
    fn spawn_agent(&mut self, team: Team, position: Vec3) -> AgentId;
    fn despawn_agent(&mut self, id: AgentId);
    /// Map-provided spawn points for a team, if the map defines any.
    fn spawn_points(&self, team: Team) -> Option<Vec<Vec3>>;
    /// Damage dealt since the previous call.
    fn drain_damage_events(&mut self) -> Vec<DamageEvent>;

    /// Every live agent, in `agent_ids` order.
    fn live_agents(&self) -> Vec<&Self::Agent> {
        self.agent_ids()
            .into_iter()
            .filter_map(|id| self.agent(id))
            .filter(|agent| agent.is_alive())
            .collect()
    }
}
