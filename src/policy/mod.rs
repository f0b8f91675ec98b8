//! Policy abstraction: one inference interface over a closed set of
//! policy variants, chosen once at startup.

mod neural;
mod scripted;

use std::path::Path;

use burn::prelude::*;

use crate::error::PolicyError;
use crate::rl::observation::{Action, Observation};

pub use neural::NeuralPolicy;
pub use scripted::{GRENADE_CHANCE, LOW_HEALTH, ScriptedPolicy};

/// Which policy to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyKind {
    /// Rule-based baseline with the given RNG seed
    Scripted { seed: u64 },
    /// Neural policy, unloaded until `load` is called
    Neural,
}

#[derive(Debug)]
pub enum Policy<B: Backend> {
    Scripted(ScriptedPolicy),
    Neural(NeuralPolicy<B>),
}

impl<B: Backend> Policy<B> {
    pub fn new(kind: &PolicyKind, device: &B::Device) -> Self {
        match kind {
            PolicyKind::Scripted { seed } => Policy::Scripted(ScriptedPolicy::new(*seed)),
            PolicyKind::Neural => Policy::Neural(NeuralPolicy::new(device.clone())),
        }
    }

    /// # Panics
    ///
    /// Panics for an unloaded neural policy.
    pub fn predict(&mut self, obs: &Observation) -> Action {
        match self {
            Policy::Scripted(policy) => policy.predict(obs),
            Policy::Neural(policy) => policy.predict(obs),
        }
    }

    /// Load model weights. Scripted policies have none and always succeed.
    pub fn load(&mut self, path: &Path) -> Result<(), PolicyError> {
        match self {
            Policy::Scripted(_) => Ok(()),
            Policy::Neural(policy) => policy.load(path),
        }
    }

    pub fn is_loaded(&self) -> bool {
        match self {
            Policy::Scripted(_) => true,
            Policy::Neural(policy) => policy.is_loaded(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Scripted(_) => "scripted",
            Policy::Neural(_) => "neural",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Team;
    use burn::backend::NdArray;

    #[test]
    fn test_factory_builds_requested_variant() {
        let device = Default::default();
        let scripted = Policy::<NdArray>::new(&PolicyKind::Scripted { seed: 3 }, &device);
        assert_eq!(scripted.name(), "scripted");
        assert!(scripted.is_loaded());

        let neural = Policy::<NdArray>::new(&PolicyKind::Neural, &device);
        assert_eq!(neural.name(), "neural");
        assert!(!neural.is_loaded());
    }

    #[test]
    fn test_scripted_load_is_a_noop() {
        let mut policy = Policy::<NdArray>::new(&PolicyKind::Scripted { seed: 0 }, &Default::default());
        assert!(policy.load(Path::new("ignored.json")).is_ok());
        let action = policy.predict(&Observation::new(Team::TaskForce));
        assert!(action.move_x.abs() <= 1.0);
    }
}
