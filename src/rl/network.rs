//! Policy and value networks using Burn framework

use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use crate::error::PersistError;

use super::observation::{ACTION_SIZE, OBSERVATION_SIZE};
use super::persist::{Topology, WeightTensor};

/// Configuration for the two networks
#[derive(Debug, Config)]
pub struct NetworkConfig {
    /// Hidden layer sizes of the policy network
    pub policy_hidden: Vec<usize>,
    /// Hidden layer sizes of the value network
    pub value_hidden: Vec<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            policy_hidden: vec![128, 64],
            value_hidden: vec![128, 64],
        }
    }
}

impl NetworkConfig {
    pub fn policy_topology(&self) -> Topology {
        Topology::relu(OBSERVATION_SIZE, self.policy_hidden.clone(), ACTION_SIZE)
    }

    pub fn value_topology(&self) -> Topology {
        Topology::relu(OBSERVATION_SIZE, self.value_hidden.clone(), 1)
    }
}

/// Fully connected stack with ReLU between layers and a linear head.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: Relu,
}

impl<B: Backend> Mlp<B> {
    pub fn new(device: &B::Device, topology: &Topology) -> Self {
        let layers = topology
            .layer_dims()
            .into_iter()
            .map(|(d_in, d_out)| LinearConfig::new(d_in, d_out).init(device))
            .collect();

        Self {
            layers,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = self.activation.forward(x);
            }
        }
        x
    }

    /// Topology read back from the layer shapes.
    pub fn topology(&self) -> Topology {
        let dims: Vec<[usize; 2]> = self
            .layers
            .iter()
            .map(|layer| layer.weight.val().dims())
            .collect();

        let input_size = dims.first().map(|d| d[0]).unwrap_or(0);
        let output_size = dims.last().map(|d| d[1]).unwrap_or(0);
        let hidden_sizes = dims
            .iter()
            .take(dims.len().saturating_sub(1))
            .map(|d| d[1])
            .collect();

        Topology::relu(input_size, hidden_sizes, output_size)
    }

    /// Weights in layer order: weight `[in, out]` then bias `[out]`.
    pub fn to_tensors(&self) -> Result<Vec<WeightTensor>, PersistError> {
        let mut tensors = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            let weight = layer.weight.val();
            let shape = weight.dims().to_vec();
            tensors.push(WeightTensor::new(shape, read_floats(weight)?));

            let (d_out, bias) = match &layer.bias {
                Some(bias) => {
                    let bias = bias.val();
                    (bias.dims()[0], read_floats(bias)?)
                }
                None => {
                    let d_out = layer.weight.val().dims()[1];
                    (d_out, vec![0.0; d_out])
                }
            };
            tensors.push(WeightTensor::new(vec![d_out], bias));
        }
        Ok(tensors)
    }

    /// Rebuild a network from serialized weights. Shapes are validated
    /// against `topology` before any tensor is created.
    pub fn from_tensors(
        device: &B::Device,
        topology: &Topology,
        tensors: &[WeightTensor],
    ) -> Result<Self, PersistError> {
        let dims = topology.layer_dims();
        if tensors.len() != dims.len() * 2 {
            return Err(PersistError::TopologyMismatch {
                kind: "weights".to_string(),
                expected: format!("{} tensors", dims.len() * 2),
                found: format!("{} tensors", tensors.len()),
            });
        }
        for (index, tensor) in tensors.iter().enumerate() {
            tensor.validate(index)?;
            let (d_in, d_out) = dims[index / 2];
            let expected = if index % 2 == 0 {
                vec![d_in, d_out]
            } else {
                vec![d_out]
            };
            if tensor.shape != expected {
                return Err(PersistError::TopologyMismatch {
                    kind: format!("tensor {index}"),
                    expected: format!("{expected:?}"),
                    found: format!("{:?}", tensor.shape),
                });
            }
        }

        let layers = tensors
            .chunks(2)
            .map(|pair| {
                let weight = Tensor::<B, 2>::from_data(
                    TensorData::new(pair[0].data.clone(), pair[0].shape.clone()),
                    device,
                );
                let bias = Tensor::<B, 1>::from_data(
                    TensorData::new(pair[1].data.clone(), pair[1].shape.clone()),
                    device,
                );
                Linear {
                    weight: Param::from_tensor(weight),
                    bias: Some(Param::from_tensor(bias)),
                }
            })
            .collect();

        Ok(Self {
            layers,
            activation: Relu::new(),
        })
    }
}

fn read_floats<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, PersistError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| PersistError::TensorData(format!("{e:?}")))
}

/// Policy network - maps a flat observation to the raw 7-dimensional
/// action vector
#[derive(Module, Debug)]
pub struct PolicyNetwork<B: Backend> {
    mlp: Mlp<B>,
}

impl<B: Backend> PolicyNetwork<B> {
    pub fn new(device: &B::Device, config: &NetworkConfig) -> Self {
        Self {
            mlp: Mlp::new(device, &config.policy_topology()),
        }
    }

    pub fn from_mlp(mlp: Mlp<B>) -> Self {
        Self { mlp }
    }

    /// Forward pass returning raw outputs `[batch, ACTION_SIZE]`
    pub fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 2> {
        self.mlp.forward(obs)
    }

    pub fn mlp(&self) -> &Mlp<B> {
        &self.mlp
    }
}

/// Value network - maps a flat observation to a scalar state value
#[derive(Module, Debug)]
pub struct ValueNetwork<B: Backend> {
    mlp: Mlp<B>,
}

impl<B: Backend> ValueNetwork<B> {
    pub fn new(device: &B::Device, config: &NetworkConfig) -> Self {
        Self {
            mlp: Mlp::new(device, &config.value_topology()),
        }
    }

    pub fn from_mlp(mlp: Mlp<B>) -> Self {
        Self { mlp }
    }

    /// Forward pass returning state values `[batch]`
    pub fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 1> {
        self.mlp.forward(obs).squeeze(1)
    }

    pub fn mlp(&self) -> &Mlp<B> {
        &self.mlp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_network_config_default() {
        let config = NetworkConfig::default();
        assert_eq!(config.policy_hidden, vec![128, 64]);
        assert_eq!(config.value_topology().output_size, 1);
        assert_eq!(config.policy_topology().output_size, ACTION_SIZE);
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let config = NetworkConfig::default();
        let policy = PolicyNetwork::<TestBackend>::new(&device, &config);
        let value = ValueNetwork::<TestBackend>::new(&device, &config);

        let obs = Tensor::<TestBackend, 2>::zeros([3, OBSERVATION_SIZE], &device);
        assert_eq!(policy.forward(obs.clone()).dims(), [3, ACTION_SIZE]);
        assert_eq!(value.forward(obs).dims(), [3]);
    }

    #[test]
    fn test_topology_read_back() {
        let device = Default::default();
        let topology = Topology::relu(10, vec![8, 4], 3);
        let mlp = Mlp::<TestBackend>::new(&device, &topology);
        assert_eq!(mlp.topology(), topology);
    }

    #[test]
    fn test_tensors_rebuild_identical_outputs() {
        let device = Default::default();
        let topology = Topology::relu(6, vec![5], 2);
        let mlp = Mlp::<TestBackend>::new(&device, &topology);
        let tensors = mlp.to_tensors().unwrap();
        assert_eq!(tensors.len(), 4);
        assert_eq!(tensors[0].shape, vec![6, 5]);

        let rebuilt = Mlp::<TestBackend>::from_tensors(&device, &topology, &tensors).unwrap();
        let input = Tensor::<TestBackend, 2>::ones([1, 6], &device);
        let a: Vec<f32> = mlp.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = rebuilt.forward(input).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_tensors_rejects_wrong_topology() {
        let device = Default::default();
        let mlp = Mlp::<TestBackend>::new(&device, &Topology::relu(6, vec![5], 2));
        let tensors = mlp.to_tensors().unwrap();

        let result = Mlp::<TestBackend>::from_tensors(&device, &Topology::relu(6, vec![4], 2), &tensors);
        assert!(matches!(result, Err(PersistError::TopologyMismatch { .. })));
    }
}
