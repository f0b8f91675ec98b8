use crate::infra::Vec3;

pub const MAX_HEALTH: f32 = 100.0;
pub const STARTING_AMMO: f32 = 60.0;
pub const STARTING_GRENADES: f32 = 2.0;

/// Simulated body and combat state of one arena agent.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub lean: f32,
    pub health: f32,
    pub armor: f32,
    pub weapon_id: u32,
    pub ammo: f32,
    pub grenades: f32,
    pub crouching: bool,
    pub has_body: bool,
    /// Set while an external controller (the trainer) drives this agent
    pub external_control: bool,
    pub fire_requested: bool,
    pub grenade_requested: bool,
    pub jump_requested: bool,
    pub fire_cooldown: f32,
    /// Seconds left in the "recently shot at" window
    pub under_fire: f32,
}

impl AgentState {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            lean: 0.0,
            health: MAX_HEALTH,
            armor: 0.0,
            weapon_id: 0,
            ammo: STARTING_AMMO,
            grenades: STARTING_GRENADES,
            crouching: false,
            has_body: true,
            external_control: false,
            fire_requested: false,
            grenade_requested: false,
            jump_requested: false,
            fire_cooldown: 0.0,
            under_fire: 0.0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    /// Unit vector of the horizontal facing direction (yaw 0 faces +z).
    pub fn facing(&self) -> Vec3 {
        Vec3::new(self.yaw.sin(), 0.0, self.yaw.cos())
    }

    pub fn on_ground(&self) -> bool {
        self.position.y <= 0.0
    }

    pub fn clear_requests(&mut self) {
        self.fire_requested = false;
        self.grenade_requested = false;
        self.jump_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_alive_and_armed() {
        let state = AgentState::new(Vec3::new(1.0, 0.0, 2.0));
        assert!(state.is_alive());
        assert!(state.on_ground());
        assert_eq!(state.ammo, STARTING_AMMO);
    }

    #[test]
    fn test_facing_follows_yaw() {
        let mut state = AgentState::new(Vec3::ZERO);
        state.yaw = std::f32::consts::FRAC_PI_2;
        let facing = state.facing();
        assert!((facing.x - 1.0).abs() < 1e-6);
        assert!(facing.z.abs() < 1e-6);
    }
}
