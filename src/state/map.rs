use std::collections::HashMap;

use crate::infra::{Bounds, Team, Vec3};

/// Static layout of an arena: bounds, optional spawn data and cover points.
#[derive(Clone, Debug)]
pub struct ArenaMap {
    pub name: String,
    pub bounds: Bounds,
    spawns: Option<HashMap<Team, Vec<Vec3>>>,
    cover: Vec<Vec3>,
}

impl ArenaMap {
    /// Open ground with no spawn data and no cover.
    pub fn open(name: &str, half_extent: f32) -> Self {
        Self {
            name: name.to_string(),
            bounds: Bounds::from_center_and_range(Vec3::ZERO, half_extent),
            spawns: None,
            cover: Vec::new(),
        }
    }

    /// Look up a built-in map. Unknown names yield open ground without
    /// spawn data.
    pub fn by_name(name: &str) -> Self {
        match name {
            "warehouse" => Self::warehouse(),
            "courtyard" => Self::courtyard(),
            other => Self::open(other, 50.0),
        }
    }

    fn warehouse() -> Self {
        let line = |z: f32| (0..6).map(|i| Vec3::new(-15.0 + i as f32 * 6.0, 0.0, z)).collect();
        let mut spawns = HashMap::new();
        spawns.insert(Team::TaskForce, line(-40.0));
        spawns.insert(Team::OpFor, line(40.0));

        let cover = [-20.0f32, 0.0, 20.0]
            .iter()
            .flat_map(|&x| [Vec3::new(x, 0.0, -12.0), Vec3::new(x, 0.0, 12.0)])
            .collect();

        Self {
            name: "warehouse".to_string(),
            bounds: Bounds::from_center_and_range(Vec3::ZERO, 60.0),
            spawns: Some(spawns),
            cover,
        }
    }

    fn courtyard() -> Self {
        let mut spawns = HashMap::new();
        spawns.insert(
            Team::TaskForce,
            vec![
                Vec3::new(-30.0, 0.0, -30.0),
                Vec3::new(-25.0, 0.0, -30.0),
                Vec3::new(-30.0, 0.0, -25.0),
            ],
        );
        spawns.insert(
            Team::OpFor,
            vec![
                Vec3::new(30.0, 0.0, 30.0),
                Vec3::new(25.0, 0.0, 30.0),
                Vec3::new(30.0, 0.0, 25.0),
            ],
        );

        Self {
            name: "courtyard".to_string(),
            bounds: Bounds::from_center_and_range(Vec3::ZERO, 40.0),
            spawns: Some(spawns),
            cover: Vec::new(),
        }
    }

    pub fn spawn_points(&self, team: Team) -> Option<&[Vec3]> {
        self.spawns
            .as_ref()
            .and_then(|spawns| spawns.get(&team))
            .map(|points| points.as_slice())
            .filter(|points| !points.is_empty())
    }

    pub fn has_cover(&self) -> bool {
        !self.cover.is_empty()
    }

    /// Horizontal distance to the closest cover point.
    pub fn distance_to_cover(&self, pos: Vec3) -> Option<f32> {
        self.cover
            .iter()
            .map(|c| ((c.x - pos.x).powi(2) + (c.z - pos.z).powi(2)).sqrt())
            .min_by(|a, b| a.total_cmp(b))
    }
}
