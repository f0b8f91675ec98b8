//! Policy backed by a trained policy network

use std::path::Path;

use burn::prelude::*;
use tracing::{info, warn};

use crate::error::PolicyError;
use crate::rl::network::PolicyNetwork;
use crate::rl::observation::{ACTION_SIZE, Action, OBSERVATION_SIZE, Observation};
use crate::rl::persist::{NetworkKind, import_document};

/// Deterministic inference through a policy network: no exploration noise.
#[derive(Debug)]
pub struct NeuralPolicy<B: Backend> {
    device: B::Device,
    network: Option<PolicyNetwork<B>>,
}

impl<B: Backend> NeuralPolicy<B> {
    /// An unloaded policy. Call [`Self::load`] before predicting.
    pub fn new(device: B::Device) -> Self {
        Self { device, network: None }
    }

    pub fn from_network(device: B::Device, network: PolicyNetwork<B>) -> Self {
        Self {
            device,
            network: Some(network),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.network.is_some()
    }

    /// Load the policy half of an exported model document. On failure the
    /// current network, if any, stays in place.
    pub fn load(&mut self, path: &Path) -> Result<(), PolicyError> {
        let loaded = import_document(path)
            .and_then(|snapshot| snapshot.policy.build::<B>(&self.device, NetworkKind::Policy));

        match loaded {
            Ok(mlp) => {
                self.network = Some(PolicyNetwork::from_mlp(mlp));
                info!("Loaded neural policy from {}", path.display());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load neural policy from {}: {}", path.display(), e);
                Err(e.into())
            }
        }
    }

    pub fn try_predict(&self, obs: &Observation) -> Result<Action, PolicyError> {
        let network = self.network.as_ref().ok_or(PolicyError::NotLoaded)?;
        let input = Tensor::<B, 2>::from_data(TensorData::new(obs.flatten(), [1, OBSERVATION_SIZE]), &self.device);
        let raw = network
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PolicyError::Inference(format!("{e:?}")))?;
        if raw.len() != ACTION_SIZE {
            return Err(PolicyError::Inference(format!(
                "expected {ACTION_SIZE} outputs, got {}",
                raw.len()
            )));
        }
        Ok(Action::from_network_output(&raw))
    }

    /// # Panics
    ///
    /// Panics if no network is loaded or inference fails; both are
    /// orchestration bugs, not recoverable conditions.
    pub fn predict(&self, obs: &Observation) -> Action {
        match self.try_predict(obs) {
            Ok(action) => action,
            Err(e) => panic!("NeuralPolicy::predict failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Team;
    use crate::rl::network::{Mlp, NetworkConfig, ValueNetwork};
    use crate::rl::persist::{ModelSnapshot, Topology, export_document};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            policy_hidden: vec![6],
            value_hidden: vec![6],
        }
    }

    #[test]
    #[should_panic(expected = "no loaded network")]
    fn test_unloaded_predict_panics() {
        let policy = NeuralPolicy::<TestBackend>::new(Default::default());
        policy.predict(&Observation::new(Team::TaskForce));
    }

    #[test]
    fn test_try_predict_reports_not_loaded() {
        let policy = NeuralPolicy::<TestBackend>::new(Default::default());
        assert!(!policy.is_loaded());
        assert!(matches!(
            policy.try_predict(&Observation::new(Team::OpFor)),
            Err(PolicyError::NotLoaded)
        ));
    }

    #[test]
    fn test_wrong_output_width_is_an_error() {
        let device = Default::default();
        let mlp = Mlp::<TestBackend>::new(&device, &Topology::relu(OBSERVATION_SIZE, vec![4], 3));
        let policy = NeuralPolicy::from_network(device, PolicyNetwork::from_mlp(mlp));

        let result = policy.try_predict(&Observation::new(Team::TaskForce));
        assert!(matches!(result, Err(PolicyError::Inference(_))));
    }

    #[test]
    #[should_panic(expected = "policy inference failed")]
    fn test_predict_panics_on_inference_error() {
        let device = Default::default();
        let mlp = Mlp::<TestBackend>::new(&device, &Topology::relu(OBSERVATION_SIZE, vec![4], 3));
        let policy = NeuralPolicy::from_network(device, PolicyNetwork::from_mlp(mlp));
        policy.predict(&Observation::new(Team::OpFor));
    }

    #[test]
    fn test_load_from_document_matches_source_network() {
        let device = Default::default();
        let policy_net = PolicyNetwork::<TestBackend>::new(&device, &small_config());
        let value_net = ValueNetwork::<TestBackend>::new(&device, &small_config());
        let snapshot = ModelSnapshot::capture("doc", &policy_net, &value_net).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        export_document(&path, &snapshot).unwrap();

        let source = NeuralPolicy::from_network(device, policy_net);
        let mut loaded = NeuralPolicy::<TestBackend>::new(Default::default());
        loaded.load(&path).unwrap();

        let mut obs = Observation::new(Team::TaskForce);
        obs.health = 64.0;
        obs.vision_grid[100] = 1;
        assert_eq!(source.predict(&obs), loaded.predict(&obs));
    }

    #[test]
    fn test_failed_load_keeps_existing_network() {
        let device = Default::default();
        let network = PolicyNetwork::<TestBackend>::new(&device, &small_config());
        let mut policy = NeuralPolicy::from_network(device, network);
        let obs = Observation::new(Team::TaskForce);
        let before = policy.predict(&obs);

        let result = policy.load(Path::new("/nonexistent/squadlab/model.json"));
        assert!(matches!(result, Err(PolicyError::Load(_))));
        assert!(policy.is_loaded());
        assert_eq!(policy.predict(&obs), before);
    }
}
