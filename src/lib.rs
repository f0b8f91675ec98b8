pub mod error;
pub mod infra;
pub mod policy;
pub mod rl;
pub mod state;
pub mod training;

// Re-export commonly used types for convenience
pub use error::{PersistError, PolicyError, TrainError};
pub use infra::{AgentId, Battlefield, CombatAgent, Team, Vec3};
pub use policy::{Policy, PolicyKind};
pub use rl::{Action, Observation, Trainer, TrainerConfig};
pub use state::{Arena, ArenaMap};
pub use training::{EvaluationRunner, Orchestrator, OrchestratorConfig};
