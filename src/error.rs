use std::path::PathBuf;

/// Errors raised while saving, loading or converting trained models.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("no model blob stored under key '{0}'")]
    MissingBlob(String),

    #[error("unsupported model format version {found} (expected {expected})")]
    FormatVersion { found: u32, expected: u32 },

    #[error("topology mismatch for {kind}: expected {expected}, found {found}")]
    TopologyMismatch {
        kind: String,
        expected: String,
        found: String,
    },

    #[error("weight tensor {index} has shape {shape:?} but carries {len} values")]
    WeightShape {
        index: usize,
        shape: Vec<usize>,
        len: usize,
    },

    #[error("failed to read tensor data: {0}")]
    TensorData(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("burn recorder error: {0}")]
    Recorder(String),

    #[error("model I/O actor is no longer running")]
    ActorClosed,
}

/// Errors raised by a training pass.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("non-finite {which} loss in epoch {epoch}")]
    NonFiniteLoss { which: &'static str, epoch: usize },

    #[error("a training pass is already in flight")]
    PassInFlight,

    #[error("background training worker panicked")]
    WorkerPanicked,
}

/// Errors raised by the policy abstraction.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("neural policy has no loaded network")]
    NotLoaded,

    #[error("failed to load policy: {0}")]
    Load(#[from] PersistError),

    #[error("policy inference failed: {0}")]
    Inference(String),
}
