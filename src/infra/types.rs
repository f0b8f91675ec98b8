use serde::{Deserialize, Serialize};

pub use glam::Vec3;

/// Opaque handle of a live agent inside a battlefield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    TaskForce,
    OpFor,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::TaskForce, Team::OpFor];

    /// Binary encoding used in observations.
    pub fn as_bit(self) -> f32 {
        match self {
            Team::TaskForce => 0.0,
            Team::OpFor => 1.0,
        }
    }

    pub fn opponent(self) -> Team {
        match self {
            Team::TaskForce => Team::OpFor,
            Team::OpFor => Team::TaskForce,
        }
    }
}

/// Horizontal (x/z) extent of a playable area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Bounds {
    pub fn from_center_and_range(center: Vec3, range: f32) -> Self {
        Self {
            min_x: center.x - range,
            max_x: center.x + range,
            min_z: center.z - range,
            max_z: center.z + range,
        }
    }

    pub fn contains(&self, pos: Vec3) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.z >= self.min_z && pos.z <= self.max_z
    }

    /// Clamp the horizontal components of `pos` into the bounds.
    pub fn clamp(&self, pos: Vec3) -> Vec3 {
        Vec3::new(
            pos.x.clamp(self.min_x, self.max_x),
            pos.y,
            pos.z.clamp(self.min_z, self.max_z),
        )
    }
}
