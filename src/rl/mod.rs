//! Reinforcement learning core: PPO over squad combat agents
//!
//! This module turns live combat agents into fixed-shape observations,
//! drives them with a policy network and trains that network with a
//! clipped PPO objective, using:
//! - A 1040-value observation (16 scalars + 32x32 vision grid)
//! - A 7-value continuous action vector with thresholded triggers
//! - Separate policy and value networks with their own Adam optimizers
//! - Burn with the NdArray backend
//!
//! # Architecture
//!
//! ```text
//! Battlefield (engine or Arena)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  env::observation_from_entity                               │
//! │  - Sanitized scalars + vision grid per agent                │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Trainer::predict                                           │
//! │  - Policy: observation → action (+ exploration noise)       │
//! │  - Value: observation → state value                         │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  env::apply_action                                          │
//! │  - Velocity overwrite, look, triggers                       │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Trainer::store_experience → ExperienceBuffer               │
//! │  - Full buffer: pass scheduled, further transitions dropped │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Trainer::run_scheduled (once per tick)                     │
//! │  - GAE, PPO epochs, buffer cleared                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod env;
pub mod metrics;
pub mod network;
pub mod observation;
pub mod persist;
pub mod train;

pub use buffer::{Experience, ExperienceBuffer, GaeOrdering, compute_gae};
pub use env::{EnvConfig, apply_action, observation_from_entity};
pub use metrics::{EvaluationMetrics, MovingAverage, RoundResult, ScalarLog, TrainingMetrics};
pub use network::{NetworkConfig, PolicyNetwork, ValueNetwork};
pub use observation::{ACTION_SIZE, Action, CombatContext, GridCell, OBSERVATION_SIZE, Observation};
pub use persist::{
    DirectoryStore, MemoryStore, ModelIo, ModelSnapshot, ModelStore, NetworkBlob, PendingSave, export_document,
    import_document,
};
pub use train::{LogProbModel, Prediction, TrainReport, TrainSchedule, Trainer, TrainerConfig, TrainingStats};
