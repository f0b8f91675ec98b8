//! PPO trainer: prediction, experience collection and training passes

use std::f32::consts::PI;
use std::path::Path;
use std::thread::JoinHandle;

use burn::module::Module;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PersistError, TrainError};
use crate::infra::AgentId;

use super::buffer::{Experience, ExperienceBuffer, GaeOrdering, advantages_and_returns, normalize_advantages};
use super::network::{NetworkConfig, PolicyNetwork, ValueNetwork};
use super::observation::{ACTION_SIZE, Action, OBSERVATION_SIZE, Observation, finite_or};
use super::persist::ModelSnapshot;

/// Bound on `new - old` log-probability before exponentiation.
const LOG_RATIO_LIMIT: f32 = 20.0;

/// How action log-probabilities are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum LogProbModel {
    /// `-0.5 * sum(raw^2)` over the raw network outputs. Independent of
    /// the action actually taken.
    #[default]
    QuadraticPenalty,
    /// Diagonal Gaussian centred on the raw outputs with a fixed std,
    /// evaluated at the taken action.
    DiagonalGaussian { std: f32 },
}

impl LogProbModel {
    fn gaussian_norm(std: f32) -> f32 {
        ACTION_SIZE as f32 * (std.ln() + 0.5 * (2.0 * PI).ln())
    }

    pub fn log_prob(&self, raw: &[f32], action: &[f32]) -> f32 {
        match *self {
            LogProbModel::QuadraticPenalty => -0.5 * raw.iter().map(|r| r * r).sum::<f32>(),
            LogProbModel::DiagonalGaussian { std } => {
                let std = std.max(1e-3);
                let sq: f32 = raw
                    .iter()
                    .zip(action)
                    .map(|(mu, a)| ((a - mu) / std).powi(2))
                    .sum();
                -0.5 * sq - Self::gaussian_norm(std)
            }
        }
    }

    /// Batched version of [`Self::log_prob`]: `[batch, ACTION_SIZE]` -> `[batch]`.
    pub fn log_prob_tensor<B: Backend>(&self, raw: Tensor<B, 2>, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        match *self {
            LogProbModel::QuadraticPenalty => raw.powf_scalar(2.0).sum_dim(1).squeeze::<1>(1).mul_scalar(-0.5),
            LogProbModel::DiagonalGaussian { std } => {
                let std = std.max(1e-3);
                (actions - raw)
                    .div_scalar(std)
                    .powf_scalar(2.0)
                    .sum_dim(1)
                    .squeeze::<1>(1)
                    .mul_scalar(-0.5)
                    .sub_scalar(Self::gaussian_norm(std))
            }
        }
    }
}

/// When training passes run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrainSchedule {
    /// On the caller's thread, at the next [`Trainer::run_scheduled`] after
    /// the buffer fills
    #[default]
    Inline,
    /// On a worker thread; inference keeps the pre-pass weights until the
    /// pass lands
    Background,
}

/// Trainer configuration
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub network: NetworkConfig,
    /// Buffer capacity; reaching it schedules a pass. Transitions stored
    /// while the buffer is full are dropped.
    pub buffer_size: usize,
    /// Passes with fewer transitions are skipped. Clamped to `buffer_size`.
    pub min_batch_size: usize,
    pub epochs: usize,
    pub policy_learning_rate: f64,
    pub value_learning_rate: f64,
    pub clip_epsilon: f32,
    pub entropy_coef: f32,
    pub gamma: f32,
    pub gae_lambda: f32,
    /// Half-width of the uniform noise on continuous outputs
    pub exploration_noise: f32,
    /// Rewards are clamped to `±reward_clamp`
    pub reward_clamp: f32,
    /// Normalized advantages are clamped to `±advantage_clamp`
    pub advantage_clamp: f32,
    pub advantage_eps: f32,
    pub log_prob_model: LogProbModel,
    pub gae_ordering: GaeOrdering,
    pub schedule: TrainSchedule,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            buffer_size: 2048,
            min_batch_size: 64,
            epochs: 4,
            policy_learning_rate: 3e-4,
            value_learning_rate: 3e-4,
            clip_epsilon: 0.2,
            entropy_coef: 0.01,
            gamma: 0.99,
            gae_lambda: 0.95,
            exploration_noise: 0.1,
            reward_clamp: 10.0,
            advantage_clamp: 10.0,
            advantage_eps: 1e-8,
            log_prob_model: LogProbModel::default(),
            gae_ordering: GaeOrdering::default(),
            schedule: TrainSchedule::default(),
            seed: 42,
        }
    }
}

/// Output of one `predict` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub action: Action,
    pub log_prob: f32,
    pub value: f32,
}

/// Summary of a completed training pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainReport {
    pub pass: usize,
    pub samples: usize,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
}

/// Polled statistics; cheap and never blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrainingStats {
    pub episode_count: usize,
    pub avg_reward: f32,
    pub training_steps: usize,
    pub experience_count: usize,
    /// Transitions rejected because the buffer was full
    pub dropped_transitions: usize,
}

/// Networks together with their optimizers. Cloned into a worker for
/// background passes.
#[derive(Clone)]
struct Learner<B: AutodiffBackend> {
    policy: PolicyNetwork<B>,
    value: ValueNetwork<B>,
    policy_optim: OptimizerAdaptor<Adam, PolicyNetwork<B>, B>,
    value_optim: OptimizerAdaptor<Adam, ValueNetwork<B>, B>,
}

impl<B: AutodiffBackend> Learner<B> {
    fn new(policy: PolicyNetwork<B>, value: ValueNetwork<B>) -> Self {
        Self {
            policy,
            value,
            policy_optim: AdamConfig::new().init(),
            value_optim: AdamConfig::new().init(),
        }
    }

    /// Run every epoch of one pass on copies. Returns the updated learner,
    /// or an error with `self` left as it was.
    fn run_pass(
        &self,
        experiences: &[Experience],
        config: &TrainerConfig,
        device: &B::Device,
        pass: usize,
    ) -> Result<(Self, TrainReport), TrainError> {
        let n = experiences.len();

        let (mut advantages, returns) =
            advantages_and_returns(experiences, config.gae_ordering, config.gamma, config.gae_lambda);
        normalize_advantages(&mut advantages, config.advantage_eps, config.advantage_clamp);
        let returns: Vec<f32> = returns.into_iter().map(|r| finite_or(r, 0.0)).collect();

        let obs_flat: Vec<f32> = experiences
            .iter()
            .flat_map(|e| e.observation.iter().copied())
            .collect();
        let actions_flat: Vec<f32> = experiences.iter().flat_map(|e| e.action).collect();
        let old_log_probs: Vec<f32> = experiences.iter().map(|e| finite_or(e.log_prob, 0.0)).collect();

        let obs = Tensor::<B, 2>::from_data(TensorData::new(obs_flat, [n, OBSERVATION_SIZE]), device);
        let actions = Tensor::<B, 2>::from_data(TensorData::new(actions_flat, [n, ACTION_SIZE]), device);
        let old_log_probs = Tensor::<B, 1>::from_data(TensorData::new(old_log_probs, [n]), device);
        let advantages = Tensor::<B, 1>::from_data(TensorData::new(advantages, [n]), device);
        let returns = Tensor::<B, 1>::from_data(TensorData::new(returns, [n]), device);

        let mut next = self.clone();
        let mut total_policy_loss = 0.0f32;
        let mut total_value_loss = 0.0f32;
        let mut total_entropy = 0.0f32;

        for epoch in 0..config.epochs {
            // Policy step
            let raw = next.policy.forward(obs.clone());
            let new_log_probs = config.log_prob_model.log_prob_tensor(raw, actions.clone());
            let ratio = (new_log_probs.clone() - old_log_probs.clone())
                .clamp(-LOG_RATIO_LIMIT, LOG_RATIO_LIMIT)
                .exp();
            let clipped_ratio = ratio
                .clone()
                .clamp(1.0 - config.clip_epsilon, 1.0 + config.clip_epsilon);

            let surr1 = ratio * advantages.clone();
            let surr2 = clipped_ratio * advantages.clone();
            let entropy = new_log_probs.neg().mean();
            let policy_loss = -surr1.min_pair(surr2).mean() - entropy.clone().mul_scalar(config.entropy_coef);

            let policy_loss_value = scalar(&policy_loss);
            if !policy_loss_value.is_finite() {
                return Err(TrainError::NonFiniteLoss { which: "policy", epoch });
            }

            let grads = policy_loss.backward();
            let grads = GradientsParams::from_grads(grads, &next.policy);
            next.policy = next
                .policy_optim
                .step(config.policy_learning_rate, next.policy.clone(), grads);

            // Value step, separate optimizer
            let values = next.value.forward(obs.clone());
            let value_loss = (values - returns.clone()).powf_scalar(2.0).mean();

            let value_loss_value = scalar(&value_loss);
            if !value_loss_value.is_finite() {
                return Err(TrainError::NonFiniteLoss { which: "value", epoch });
            }

            let grads = value_loss.backward();
            let grads = GradientsParams::from_grads(grads, &next.value);
            next.value = next
                .value_optim
                .step(config.value_learning_rate, next.value.clone(), grads);

            total_policy_loss += policy_loss_value;
            total_value_loss += value_loss_value;
            total_entropy += scalar(&entropy);
            debug!(
                "Pass {} epoch {}: policy_loss={:.4}, value_loss={:.4}",
                pass, epoch, policy_loss_value, value_loss_value
            );
        }

        let epochs = config.epochs.max(1) as f32;
        let report = TrainReport {
            pass,
            samples: n,
            policy_loss: total_policy_loss / epochs,
            value_loss: total_value_loss / epochs,
            entropy: total_entropy / epochs,
        };

        Ok((next, report))
    }
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor
        .clone()
        .into_data()
        .to_vec::<f32>()
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(f32::NAN)
}

type PassResult<B> = Result<(Learner<B>, TrainReport), TrainError>;

struct TrainJob<B: AutodiffBackend> {
    handle: JoinHandle<PassResult<B>>,
    pass: usize,
}

/// Owns both networks, the experience buffer and the PPO update.
///
/// State machine: collecting until the buffer holds `buffer_size`
/// transitions, then one training pass, then the buffer is cleared.
/// The buffer never holds more than `buffer_size` transitions.
/// With [`TrainSchedule::Background`] at most one pass is in flight.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    device: B::Device,
    learner: Learner<B>,
    buffer: ExperienceBuffer,
    rng: StdRng,
    job: Option<TrainJob<B>>,
    pass_pending: bool,
    dropped_transitions: usize,
    passes_started: usize,
    training_steps: usize,
    episode_reward: f32,
    avg_reward: f32,
    episode_count: usize,
    last_report: Option<TrainReport>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(device: B::Device, mut config: TrainerConfig) -> Self {
        if config.buffer_size == 0 {
            warn!("buffer_size 0 raised to 1");
            config.buffer_size = 1;
        }
        if config.min_batch_size > config.buffer_size {
            warn!(
                "min_batch_size {} exceeds buffer_size {}, lowered to match",
                config.min_batch_size, config.buffer_size
            );
            config.min_batch_size = config.buffer_size;
        }

        let policy = PolicyNetwork::new(&device, &config.network);
        let value = ValueNetwork::new(&device, &config.network);

        Self {
            buffer: ExperienceBuffer::new(config.buffer_size),
            rng: StdRng::seed_from_u64(config.seed),
            learner: Learner::new(policy, value),
            config,
            device,
            job: None,
            pass_pending: false,
            dropped_transitions: 0,
            passes_started: 0,
            training_steps: 0,
            episode_reward: 0.0,
            avg_reward: 0.0,
            episode_count: 0,
            last_report: None,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn policy_network(&self) -> &PolicyNetwork<B> {
        &self.learner.policy
    }

    pub fn value_network(&self) -> &ValueNetwork<B> {
        &self.learner.value
    }

    /// One forward pass through both networks plus exploration noise.
    pub fn predict(&mut self, obs: &Observation) -> Prediction {
        let input = Tensor::<B, 2>::from_data(TensorData::new(obs.flatten(), [1, OBSERVATION_SIZE]), &self.device);
        let raw: Vec<f32> = self
            .learner
            .policy
            .forward(input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_else(|_| vec![0.0; ACTION_SIZE])
            .into_iter()
            .map(|v| finite_or(v, 0.0))
            .collect();
        let value = finite_or(scalar(&self.learner.value.forward(input)), 0.0);

        // Exploration noise on the continuous outputs only
        let noise = self.config.exploration_noise;
        let mut noisy = raw.clone();
        if noise > 0.0 {
            for v in noisy.iter_mut().take(4) {
                *v += self.rng.random_range(-noise..=noise);
            }
        }
        let action = Action::from_network_output(&noisy);

        let log_prob = finite_or(self.config.log_prob_model.log_prob(&raw, &action.to_vector()), 0.0);

        Prediction {
            action,
            log_prob,
            value,
        }
    }

    /// Append a transition. The reward is sanitized and clamped before it
    /// is stored or counted. Filling the buffer schedules a training pass;
    /// with [`TrainSchedule::Inline`] it runs at the next
    /// [`Self::run_scheduled`]. A full buffer drops the transition, though
    /// its reward still counts towards the episode.
    #[allow(clippy::too_many_arguments)]
    pub fn store_experience(
        &mut self,
        agent: AgentId,
        obs: &Observation,
        action: &Action,
        reward: f32,
        next_obs: &Observation,
        done: bool,
        log_prob: f32,
        value: f32,
    ) {
        let reward = self.clamp_reward(reward);
        self.episode_reward += reward;

        let stored = self.buffer.push(Experience {
            agent,
            observation: obs.flatten(),
            action: action.to_vector(),
            reward,
            next_observation: next_obs.flatten(),
            done,
            log_prob: finite_or(log_prob, 0.0),
            value: finite_or(value, 0.0),
        });
        if !stored {
            if self.dropped_transitions == 0 {
                warn!(
                    "Experience buffer full ({} transitions), dropping new transitions until the next pass",
                    self.buffer.capacity()
                );
            }
            self.dropped_transitions += 1;
            debug!("Dropped transition from agent {}", agent);
        }

        if !self.buffer.is_full() {
            return;
        }
        match self.config.schedule {
            TrainSchedule::Inline => self.pass_pending = true,
            TrainSchedule::Background => self.schedule_background(),
        }
    }

    /// Run whatever pass the schedule has due. Inline: the pass a full
    /// buffer scheduled, if any. Background: pick up a finished worker
    /// without blocking. Call once per simulation tick, after every agent
    /// has stored its transition.
    pub fn run_scheduled(&mut self) -> Option<Result<TrainReport, TrainError>> {
        match self.config.schedule {
            TrainSchedule::Inline => {
                if !std::mem::take(&mut self.pass_pending) {
                    return None;
                }
                self.train().transpose()
            }
            TrainSchedule::Background => self.poll_training(),
        }
    }

    pub fn clamp_reward(&self, reward: f32) -> f32 {
        let limit = self.config.reward_clamp;
        finite_or(reward, 0.0).clamp(-limit, limit)
    }

    /// Run a training pass now. No-op below `min_batch_size`.
    pub fn train(&mut self) -> Result<Option<TrainReport>, TrainError> {
        if self.job.is_some() {
            return Err(TrainError::PassInFlight);
        }
        if self.buffer.len() < self.config.min_batch_size {
            debug!(
                "Deferring training: {} < {} transitions",
                self.buffer.len(),
                self.config.min_batch_size
            );
            return Ok(None);
        }

        let experiences = self.buffer.take();
        self.pass_pending = false;
        self.passes_started += 1;
        let pass = self.passes_started;
        let result = self.learner.run_pass(&experiences, &self.config, &self.device, pass);
        self.finish_pass(result).map(Some)
    }

    fn schedule_background(&mut self) {
        if self.job.is_some() || self.buffer.len() < self.config.min_batch_size {
            return;
        }

        let experiences = self.buffer.take();
        self.passes_started += 1;
        let pass = self.passes_started;
        let learner = self.learner.clone();
        let config = self.config.clone();
        let device = self.device.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("squadlab-train-{pass}"))
            .spawn(move || learner.run_pass(&experiences, &config, &device, pass));

        match spawned {
            Ok(handle) => {
                debug!("Scheduled background training pass {}", pass);
                self.job = Some(TrainJob { handle, pass });
            }
            Err(e) => {
                warn!("Could not start training worker ({}), pass {} dropped", e, pass);
            }
        }
    }

    /// Pick up a finished background pass, if any. Never blocks.
    pub fn poll_training(&mut self) -> Option<Result<TrainReport, TrainError>> {
        if !self.job.as_ref().is_some_and(|job| job.handle.is_finished()) {
            return None;
        }
        self.join_job()
    }

    /// Block until the in-flight pass, if any, has landed.
    pub fn finish_training(&mut self) -> Option<Result<TrainReport, TrainError>> {
        self.join_job()
    }

    fn join_job(&mut self) -> Option<Result<TrainReport, TrainError>> {
        let job = self.job.take()?;
        let result = job.handle.join().unwrap_or(Err(TrainError::WorkerPanicked));
        if let Err(TrainError::WorkerPanicked) = &result {
            warn!("Training worker for pass {} panicked", job.pass);
        }
        let outcome = self.finish_pass(result);

        if self.buffer.is_full() {
            self.schedule_background();
        }
        Some(outcome)
    }

    fn finish_pass(&mut self, result: PassResult<B>) -> Result<TrainReport, TrainError> {
        match result {
            Ok((learner, report)) => {
                self.learner = learner;
                self.training_steps += 1;
                self.last_report = Some(report);
                info!(
                    "Training pass {}: samples={}, policy_loss={:.4}, value_loss={:.4}, entropy={:.4}",
                    report.pass, report.samples, report.policy_loss, report.value_loss, report.entropy
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Training pass failed, keeping previous weights: {}", e);
                Err(e)
            }
        }
    }

    /// Transitions collected since the last pass.
    pub fn experiences(&self) -> &[Experience] {
        self.buffer.entries()
    }

    pub fn training_in_flight(&self) -> bool {
        self.job.is_some()
    }

    pub fn last_report(&self) -> Option<TrainReport> {
        self.last_report
    }

    /// Close the current episode. Returns its accumulated reward.
    pub fn end_episode(&mut self) -> f32 {
        let reward = self.episode_reward;
        self.avg_reward = 0.9 * self.avg_reward + 0.1 * reward;
        self.episode_reward = 0.0;
        self.episode_count += 1;
        reward
    }

    /// Drop the running episode reward without counting an episode.
    pub fn reset_episode(&mut self) {
        self.episode_reward = 0.0;
    }

    pub fn episode_reward(&self) -> f32 {
        self.episode_reward
    }

    pub fn stats(&self) -> TrainingStats {
        TrainingStats {
            episode_count: self.episode_count,
            avg_reward: self.avg_reward,
            training_steps: self.training_steps,
            experience_count: self.buffer.len(),
            dropped_transitions: self.dropped_transitions,
        }
    }

    /// Capture the current inference weights.
    pub fn snapshot(&self, name: &str) -> Result<ModelSnapshot, PersistError> {
        ModelSnapshot::capture(name, &self.learner.policy, &self.learner.value)
    }

    /// Replace both networks. Nothing changes unless both build. Optimizer
    /// state is reset and an in-flight pass is discarded.
    pub fn restore(&mut self, snapshot: &ModelSnapshot) -> Result<(), PersistError> {
        let (policy, value) = snapshot.build::<B>(&self.device)?;
        if let Some(job) = self.job.take() {
            debug!("Discarding in-flight training pass {} after restore", job.pass);
        }
        self.learner = Learner::new(policy, value);
        info!("Restored model '{}'", snapshot.name());
        Ok(())
    }

    /// Write burn binary records `<dir>/policy.mpk` and `<dir>/value.mpk`.
    pub fn save_checkpoint(&self, dir: &Path) -> Result<(), PersistError> {
        std::fs::create_dir_all(dir).map_err(|source| PersistError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.learner
            .policy
            .clone()
            .save_file(dir.join("policy"), &recorder)
            .map_err(|e| PersistError::Recorder(format!("{e:?}")))?;
        self.learner
            .value
            .clone()
            .save_file(dir.join("value"), &recorder)
            .map_err(|e| PersistError::Recorder(format!("{e:?}")))?;
        info!("Saved checkpoint to {}", dir.display());
        Ok(())
    }

    /// Load records written by [`Self::save_checkpoint`] into networks of
    /// the configured topology.
    pub fn load_checkpoint(&mut self, dir: &Path) -> Result<(), PersistError> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let policy = PolicyNetwork::<B>::new(&self.device, &self.config.network)
            .load_file(dir.join("policy"), &recorder, &self.device)
            .map_err(|e| PersistError::Recorder(format!("{e:?}")))?;
        let value = ValueNetwork::<B>::new(&self.device, &self.config.network)
            .load_file(dir.join("value"), &recorder, &self.device)
            .map_err(|e| PersistError::Recorder(format!("{e:?}")))?;

        self.job = None;
        self.learner = Learner::new(policy, value);
        info!("Loaded checkpoint from {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{Team, Vec3};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn small_config() -> TrainerConfig {
        TrainerConfig {
            network: NetworkConfig {
                policy_hidden: vec![8],
                value_hidden: vec![8],
            },
            buffer_size: 8,
            min_batch_size: 4,
            epochs: 2,
            ..TrainerConfig::default()
        }
    }

    fn trainer(config: TrainerConfig) -> Trainer<TestBackend> {
        Trainer::new(Default::default(), config)
    }

    fn sample_observation(seed: f32) -> Observation {
        let mut obs = Observation::new(Team::TaskForce);
        obs.position = Vec3::new(seed, 0.0, -seed);
        obs.velocity = Vec3::new(1.0, 0.0, 0.5);
        obs.health = 80.0;
        obs.ammo = 30.0;
        obs.vision_grid[17] = 2;
        obs
    }

    fn store(trainer: &mut Trainer<TestBackend>, count: usize, reward: f32) {
        for i in 0..count {
            let obs = sample_observation(i as f32);
            let prediction = trainer.predict(&obs);
            let next = sample_observation(i as f32 + 1.0);
            trainer.store_experience(
                AgentId(1 + (i % 2) as u32),
                &obs,
                &prediction.action,
                reward,
                &next,
                i + 1 == count,
                prediction.log_prob,
                prediction.value,
            );
        }
    }

    #[test]
    fn test_trainer_config_default() {
        let config = TrainerConfig::default();
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.min_batch_size, 64);
        assert_eq!(config.epochs, 4);
        assert_eq!(config.log_prob_model, LogProbModel::QuadraticPenalty);
        assert_eq!(config.schedule, TrainSchedule::Inline);
    }

    #[test]
    fn test_predict_clamps_continuous_outputs() {
        let mut trainer = trainer(TrainerConfig {
            exploration_noise: 5.0,
            ..small_config()
        });
        let mut obs = sample_observation(1.0);
        obs.position = Vec3::new(1e4, -1e4, 1e4);
        obs.ammo = 1e5;

        for _ in 0..20 {
            let p = trainer.predict(&obs);
            let a = p.action;
            assert!((-1.0..=1.0).contains(&a.move_x));
            assert!((-1.0..=1.0).contains(&a.move_z));
            assert!((-PI..=PI).contains(&a.yaw));
            assert!((-std::f32::consts::FRAC_PI_2..=std::f32::consts::FRAC_PI_2).contains(&a.pitch));
            for flag in [a.fire, a.crouch, a.throw_grenade] {
                assert!(flag == 0.0 || flag == 1.0);
            }
            assert!(p.log_prob.is_finite() && p.value.is_finite());
        }
    }

    #[test]
    fn test_full_buffer_triggers_exactly_one_pass() {
        let mut trainer = trainer(small_config());
        store(&mut trainer, 7, 1.0);
        assert_eq!(trainer.stats().training_steps, 0);
        assert_eq!(trainer.stats().experience_count, 7);

        store(&mut trainer, 1, 1.0);
        assert_eq!(trainer.stats().training_steps, 0);
        assert_eq!(trainer.stats().experience_count, 8);

        let report = trainer.run_scheduled().unwrap().unwrap();
        assert_eq!(report.samples, 8);
        let stats = trainer.stats();
        assert_eq!(stats.training_steps, 1);
        assert_eq!(stats.experience_count, 0);
        assert_eq!(trainer.last_report().map(|r| r.samples), Some(8));
        assert!(trainer.run_scheduled().is_none());
    }

    #[test]
    fn test_weights_unchanged_until_scheduled_pass_runs() {
        let mut trainer = trainer(TrainerConfig {
            exploration_noise: 0.0,
            ..small_config()
        });
        let obs = sample_observation(5.0);
        let before = trainer.predict(&obs);

        store(&mut trainer, 8, 1.0);
        assert_eq!(trainer.predict(&obs), before);
        assert_eq!(trainer.stats().training_steps, 0);

        assert!(trainer.run_scheduled().is_some());
        assert_eq!(trainer.stats().training_steps, 1);
    }

    #[test]
    fn test_full_buffer_drops_until_pass() {
        let mut trainer = trainer(small_config());
        store(&mut trainer, 20, 1.0);
        let stats = trainer.stats();
        assert_eq!(stats.experience_count, 8);
        assert_eq!(stats.dropped_transitions, 12);
        // Dropped transitions still count towards the episode reward
        assert_eq!(trainer.episode_reward(), 20.0);

        let report = trainer.run_scheduled().unwrap().unwrap();
        assert_eq!(report.samples, 8);
        assert_eq!(trainer.stats().experience_count, 0);
    }

    #[test]
    fn test_min_batch_clamped_to_buffer_size() {
        let mut trainer = trainer(TrainerConfig {
            buffer_size: 2,
            min_batch_size: 4,
            ..small_config()
        });
        assert_eq!(trainer.config().min_batch_size, 2);

        store(&mut trainer, 5, 1.0);
        assert!(trainer.stats().experience_count <= 2);
        let report = trainer.run_scheduled().unwrap().unwrap();
        assert_eq!(report.samples, 2);

        let empty = Trainer::<TestBackend>::new(
            Default::default(),
            TrainerConfig {
                buffer_size: 0,
                ..small_config()
            },
        );
        assert_eq!(empty.config().buffer_size, 1);
        assert_eq!(empty.config().min_batch_size, 1);
    }

    #[test]
    fn test_train_below_min_batch_is_noop() {
        let mut trainer = trainer(small_config());
        store(&mut trainer, 3, 0.5);

        let result = trainer.train().unwrap();
        assert!(result.is_none());
        assert_eq!(trainer.stats().experience_count, 3);
        assert_eq!(trainer.stats().training_steps, 0);
    }

    #[test]
    fn test_rewards_are_clamped_and_sanitized() {
        let mut trainer = trainer(small_config());
        store(&mut trainer, 1, 250.0);
        assert_eq!(trainer.episode_reward(), 10.0);
        store(&mut trainer, 1, f32::NAN);
        assert_eq!(trainer.episode_reward(), 10.0);
        store(&mut trainer, 1, -99.0);
        assert_eq!(trainer.episode_reward(), 0.0);
    }

    #[test]
    fn test_end_episode_updates_moving_average() {
        let mut trainer = trainer(small_config());
        store(&mut trainer, 2, 5.0);
        assert_eq!(trainer.end_episode(), 10.0);

        let stats = trainer.stats();
        assert_eq!(stats.episode_count, 1);
        assert!((stats.avg_reward - 1.0).abs() < 1e-6);
        assert_eq!(trainer.episode_reward(), 0.0);
    }

    #[test]
    fn test_snapshot_restore_reproduces_predictions() {
        let config = TrainerConfig {
            exploration_noise: 0.0,
            ..small_config()
        };
        let mut source = trainer(config.clone());
        store(&mut source, 8, 2.0);
        let snapshot = source.snapshot("roundtrip").unwrap();

        let mut fresh = trainer(TrainerConfig { seed: 7, ..config });
        fresh.restore(&snapshot).unwrap();

        let obs = sample_observation(3.0);
        assert_eq!(source.predict(&obs), fresh.predict(&obs));
    }

    #[test]
    fn test_failed_restore_keeps_current_model() {
        let config = TrainerConfig {
            exploration_noise: 0.0,
            ..small_config()
        };
        let mut trainer = trainer(config);
        let obs = sample_observation(1.0);
        let before = trainer.predict(&obs);

        let mut broken = trainer.snapshot("broken").unwrap();
        broken.policy.weights.pop();
        assert!(trainer.restore(&broken).is_err());
        assert_eq!(trainer.predict(&obs), before);
    }

    #[test]
    fn test_background_pass_runs_once_at_a_time() {
        let mut trainer = trainer(TrainerConfig {
            schedule: TrainSchedule::Background,
            ..small_config()
        });
        store(&mut trainer, 8, 1.0);
        assert!(trainer.training_in_flight());
        assert_eq!(trainer.stats().experience_count, 0);

        // Collection continues while the pass runs
        store(&mut trainer, 3, 1.0);
        assert!(matches!(trainer.train(), Err(TrainError::PassInFlight)));

        let report = trainer.finish_training().unwrap().unwrap();
        assert_eq!(report.samples, 8);
        assert!(!trainer.training_in_flight());
        assert_eq!(trainer.stats().training_steps, 1);
        assert_eq!(trainer.stats().experience_count, 3);
    }

    #[test]
    fn test_background_buffer_stays_bounded_while_pass_in_flight() {
        let mut trainer = trainer(TrainerConfig {
            schedule: TrainSchedule::Background,
            ..small_config()
        });
        store(&mut trainer, 8, 1.0);
        assert!(trainer.training_in_flight());

        for _ in 0..22 {
            store(&mut trainer, 1, 1.0);
            assert!(trainer.stats().experience_count <= 8);
        }
        assert_eq!(trainer.stats().dropped_transitions, 14);

        // Landing the first pass schedules the next one on the full buffer
        let first = trainer.finish_training().unwrap().unwrap();
        assert_eq!(first.samples, 8);
        assert!(trainer.training_in_flight());

        let second = trainer.finish_training().unwrap().unwrap();
        assert_eq!(second.samples, 8);
        assert_eq!(trainer.stats().experience_count, 0);
        assert_eq!(trainer.stats().training_steps, 2);
    }

    #[test]
    fn test_gaussian_log_prob_peaks_at_mean() {
        let model = LogProbModel::DiagonalGaussian { std: 0.5 };
        let raw = [0.1; ACTION_SIZE];
        let at_mean = model.log_prob(&raw, &raw);
        let off = model.log_prob(&raw, &[0.9; ACTION_SIZE]);
        assert!(at_mean > off);

        let quadratic = LogProbModel::QuadraticPenalty.log_prob(&[1.0, 2.0], &[0.0, 0.0]);
        assert!((quadratic + 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_model_trains() {
        let mut trainer = trainer(TrainerConfig {
            log_prob_model: LogProbModel::DiagonalGaussian { std: 0.5 },
            gae_ordering: GaeOrdering::PerAgent,
            ..small_config()
        });
        store(&mut trainer, 8, -1.0);
        assert!(matches!(trainer.run_scheduled(), Some(Ok(_))));
        assert_eq!(trainer.stats().training_steps, 1);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let config = TrainerConfig {
            exploration_noise: 0.0,
            ..small_config()
        };
        let dir = tempfile::tempdir().unwrap();
        let mut source = trainer(config.clone());
        source.save_checkpoint(dir.path()).unwrap();

        let mut loaded = trainer(config);
        loaded.load_checkpoint(dir.path()).unwrap();

        let obs = sample_observation(2.0);
        assert_eq!(source.predict(&obs), loaded.predict(&obs));
    }
}
