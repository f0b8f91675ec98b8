//! Model persistence - versioned network blobs, key-value stores and the
//! model I/O actor.
//!
//! A trained model is stored as two blobs, `<name>-policy` and
//! `<name>-value`. Each blob carries the network topology and the ordered
//! weight tensors. The same pair serialized as one JSON object is the
//! import/export document format.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, oneshot};

use crate::error::PersistError;

use super::network::{Mlp, PolicyNetwork, ValueNetwork};
use super::observation::{ACTION_SIZE, OBSERVATION_SIZE};

/// Current blob format version.
pub const FORMAT_VERSION: u32 = 1;

/// Layer layout of a fully connected network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub input_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub output_size: usize,
    pub activation: String,
}

impl Topology {
    pub fn relu(input_size: usize, hidden_sizes: Vec<usize>, output_size: usize) -> Self {
        Self {
            input_size,
            hidden_sizes,
            output_size,
            activation: "relu".to_string(),
        }
    }

    /// `(d_in, d_out)` of every linear layer, input to output.
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut sizes = Vec::with_capacity(self.hidden_sizes.len() + 2);
        sizes.push(self.input_size);
        sizes.extend_from_slice(&self.hidden_sizes);
        sizes.push(self.output_size);
        sizes.windows(2).map(|w| (w[0], w[1])).collect()
    }

    fn describe(&self) -> String {
        format!(
            "{} -> {:?} -> {} ({})",
            self.input_size, self.hidden_sizes, self.output_size, self.activation
        )
    }
}

/// One weight tensor: shape plus row-major payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl WeightTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn validate(&self, index: usize) -> Result<(), PersistError> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(PersistError::WeightShape {
                index,
                shape: self.shape.clone(),
                len: self.data.len(),
            });
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(PersistError::TensorData(format!(
                "tensor {index} contains non-finite values"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Policy,
    Value,
}

impl NetworkKind {
    pub fn key(self, name: &str) -> String {
        match self {
            NetworkKind::Policy => format!("{name}-policy"),
            NetworkKind::Value => format!("{name}-value"),
        }
    }

    fn expected_io(self) -> (usize, usize) {
        match self {
            NetworkKind::Policy => (OBSERVATION_SIZE, ACTION_SIZE),
            NetworkKind::Value => (OBSERVATION_SIZE, 1),
        }
    }
}

/// A serialized network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkBlob {
    pub format_version: u32,
    pub name: String,
    pub kind: NetworkKind,
    pub saved_at: String,
    pub topology: Topology,
    pub weights: Vec<WeightTensor>,
}

impl NetworkBlob {
    pub fn capture<B: Backend>(name: &str, kind: NetworkKind, mlp: &Mlp<B>) -> Result<Self, PersistError> {
        Ok(Self {
            format_version: FORMAT_VERSION,
            name: name.to_string(),
            kind,
            saved_at: timestamp(),
            topology: mlp.topology(),
            weights: mlp.to_tensors()?,
        })
    }

    /// Check version, kind and input/output sizes.
    pub fn validate(&self, kind: NetworkKind) -> Result<(), PersistError> {
        if self.format_version != FORMAT_VERSION {
            return Err(PersistError::FormatVersion {
                found: self.format_version,
                expected: FORMAT_VERSION,
            });
        }
        let (input, output) = kind.expected_io();
        if self.kind != kind
            || self.topology.input_size != input
            || self.topology.output_size != output
            || self.topology.activation != "relu"
        {
            return Err(PersistError::TopologyMismatch {
                kind: format!("{:?}", kind).to_lowercase(),
                expected: format!("{kind:?} {input} -> .. -> {output} (relu)"),
                found: format!("{:?} {}", self.kind, self.topology.describe()),
            });
        }
        Ok(())
    }

    pub fn build<B: Backend>(&self, device: &B::Device, kind: NetworkKind) -> Result<Mlp<B>, PersistError> {
        self.validate(kind)?;
        Mlp::from_tensors(device, &self.topology, &self.weights)
    }
}

/// Both networks of a trained model. Serialized as-is this is the combined
/// import/export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub policy: NetworkBlob,
    pub value: NetworkBlob,
}

impl ModelSnapshot {
    pub fn capture<B: Backend>(
        name: &str,
        policy: &PolicyNetwork<B>,
        value: &ValueNetwork<B>,
    ) -> Result<Self, PersistError> {
        Ok(Self {
            policy: NetworkBlob::capture(name, NetworkKind::Policy, policy.mlp())?,
            value: NetworkBlob::capture(name, NetworkKind::Value, value.mlp())?,
        })
    }

    pub fn name(&self) -> &str {
        &self.policy.name
    }

    /// Build both networks. Either both succeed or nothing is returned,
    /// so callers can keep their current model on failure.
    pub fn build<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<(PolicyNetwork<B>, ValueNetwork<B>), PersistError> {
        let policy = self.policy.build(device, NetworkKind::Policy)?;
        let value = self.value.build(device, NetworkKind::Value)?;
        Ok((PolicyNetwork::from_mlp(policy), ValueNetwork::from_mlp(value)))
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&Rfc3339).unwrap_or_default()
}

/// Write the combined JSON document.
pub fn export_document(path: &Path, snapshot: &ModelSnapshot) -> Result<(), PersistError> {
    let json = serde_json::to_string(snapshot)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| PersistError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, json).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and validate a combined JSON document.
pub fn import_document(path: &Path) -> Result<ModelSnapshot, PersistError> {
    let json = std::fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: ModelSnapshot = serde_json::from_str(&json)?;
    snapshot.policy.validate(NetworkKind::Policy)?;
    snapshot.value.validate(NetworkKind::Value)?;
    Ok(snapshot)
}

/// Synchronous key-value storage for model blobs.
pub trait ModelStore: Send + 'static {
    fn put(&mut self, key: &str, value: String) -> Result<(), PersistError>;
    fn get(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn keys(&self) -> Result<Vec<String>, PersistError>;
}

/// Store both blobs of a snapshot.
pub fn save_snapshot<S: ModelStore + ?Sized>(store: &mut S, snapshot: &ModelSnapshot) -> Result<(), PersistError> {
    let name = snapshot.name().to_string();
    store.put(
        &NetworkKind::Policy.key(&name),
        serde_json::to_string(&snapshot.policy)?,
    )?;
    store.put(
        &NetworkKind::Value.key(&name),
        serde_json::to_string(&snapshot.value)?,
    )
}

/// Load and validate both blobs of a named model.
pub fn load_snapshot<S: ModelStore + ?Sized>(store: &S, name: &str) -> Result<ModelSnapshot, PersistError> {
    let read = |kind: NetworkKind| -> Result<NetworkBlob, PersistError> {
        let key = kind.key(name);
        let json = store.get(&key)?.ok_or(PersistError::MissingBlob(key))?;
        let blob: NetworkBlob = serde_json::from_str(&json)?;
        blob.validate(kind)?;
        Ok(blob)
    };

    Ok(ModelSnapshot {
        policy: read(NetworkKind::Policy)?,
        value: read(NetworkKind::Value)?,
    })
}

/// In-process store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ModelStore for MemoryStore {
    fn put(&mut self, key: &str, value: String) -> Result<(), PersistError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.lock().get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, PersistError> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ModelStore for DirectoryStore {
    fn put(&mut self, key: &str, value: String) -> Result<(), PersistError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| PersistError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        std::fs::write(&path, value).map_err(|source| PersistError::Io { path, source })
    }

    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Io { path, source }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, PersistError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}

enum IoCommand {
    Save {
        snapshot: ModelSnapshot,
        reply: oneshot::Sender<Result<(), PersistError>>,
    },
    Load {
        name: String,
        reply: oneshot::Sender<Result<ModelSnapshot, PersistError>>,
    },
    Keys {
        reply: oneshot::Sender<Result<Vec<String>, PersistError>>,
    },
}

/// Handle to the model I/O actor.
///
/// The actor owns the store and runs on a blocking tokio worker, handling
/// one command at a time, so saves never interleave. Snapshots are captured
/// by the caller before sending; the actor never touches live weights.
#[derive(Clone)]
pub struct ModelIo {
    tx: mpsc::UnboundedSender<IoCommand>,
}

impl ModelIo {
    /// Start the actor. Must be called from within a tokio runtime.
    pub fn spawn<S: ModelStore>(store: S) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<IoCommand>();
        let handle = tokio::task::spawn_blocking(move || {
            let mut store = store;
            while let Some(command) = rx.blocking_recv() {
                match command {
                    IoCommand::Save { snapshot, reply } => {
                        let result = save_snapshot(&mut store, &snapshot);
                        let _ = reply.send(result);
                    }
                    IoCommand::Load { name, reply } => {
                        let _ = reply.send(load_snapshot(&store, &name));
                    }
                    IoCommand::Keys { reply } => {
                        let _ = reply.send(store.keys());
                    }
                }
            }
            tracing::debug!("Model I/O actor stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a save. The returned handle resolves once the blobs are written.
    pub fn save(&self, snapshot: ModelSnapshot) -> PendingSave {
        let name = snapshot.name().to_string();
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(IoCommand::Save { reply, .. })) =
            self.tx.send(IoCommand::Save { snapshot, reply })
        {
            let _ = reply.send(Err(PersistError::ActorClosed));
        }
        PendingSave { name, rx }
    }

    pub async fn load(&self, name: &str) -> Result<ModelSnapshot, PersistError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IoCommand::Load {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| PersistError::ActorClosed)?;
        rx.await.map_err(|_| PersistError::ActorClosed)?
    }

    pub async fn keys(&self) -> Result<Vec<String>, PersistError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IoCommand::Keys { reply })
            .map_err(|_| PersistError::ActorClosed)?;
        rx.await.map_err(|_| PersistError::ActorClosed)?
    }
}

/// A save queued on the model I/O actor.
#[derive(Debug)]
pub struct PendingSave {
    name: String,
    rx: oneshot::Receiver<Result<(), PersistError>>,
}

impl PendingSave {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking check; `None` while the save is still running.
    pub fn poll(&mut self) -> Option<Result<(), PersistError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PersistError::ActorClosed)),
        }
    }

    pub async fn wait(self) -> Result<(), PersistError> {
        self.rx.await.map_err(|_| PersistError::ActorClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::network::NetworkConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            policy_hidden: vec![8],
            value_hidden: vec![4],
        }
    }

    fn snapshot(name: &str) -> ModelSnapshot {
        let device = Default::default();
        let config = small_config();
        let policy = PolicyNetwork::<TestBackend>::new(&device, &config);
        let value = ValueNetwork::<TestBackend>::new(&device, &config);
        ModelSnapshot::capture(name, &policy, &value).unwrap()
    }

    #[test]
    fn test_topology_layer_dims() {
        let topology = Topology::relu(10, vec![8, 4], 2);
        assert_eq!(topology.layer_dims(), vec![(10, 8), (8, 4), (4, 2)]);
        assert_eq!(Topology::relu(3, vec![], 1).layer_dims(), vec![(3, 1)]);
    }

    #[test]
    fn test_blob_keys() {
        assert_eq!(NetworkKind::Policy.key("bot"), "bot-policy");
        assert_eq!(NetworkKind::Value.key("bot"), "bot-value");
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        let original = snapshot("bot");
        save_snapshot(&mut store, &original).unwrap();

        assert_eq!(store.keys().unwrap(), vec!["bot-policy", "bot-value"]);
        let loaded = load_snapshot(&store, "bot").unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_missing_blob_is_reported() {
        let store = MemoryStore::new();
        let result = load_snapshot(&store, "ghost");
        assert!(matches!(result, Err(PersistError::MissingBlob(key)) if key == "ghost-policy"));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut store = MemoryStore::new();
        let mut original = snapshot("bot");
        original.value.format_version = 99;
        save_snapshot(&mut store, &original).unwrap();

        let result = load_snapshot(&store, "bot");
        assert!(matches!(result, Err(PersistError::FormatVersion { found: 99, .. })));
    }

    #[test]
    fn test_swapped_blobs_fail_validation() {
        let original = snapshot("bot");
        let swapped = ModelSnapshot {
            policy: original.value.clone(),
            value: original.policy.clone(),
        };
        let device = Default::default();
        assert!(swapped.build::<TestBackend>(&device).is_err());
    }

    #[test]
    fn test_directory_store_and_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(dir.path().join("models"));
        assert!(store.keys().unwrap().is_empty());

        let original = snapshot("squad");
        save_snapshot(&mut store, &original).unwrap();
        assert_eq!(load_snapshot(&store, "squad").unwrap(), original);

        let doc = dir.path().join("export/squad.json");
        export_document(&doc, &original).unwrap();
        assert_eq!(import_document(&doc).unwrap(), original);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("broken.json");
        std::fs::write(&doc, "{ not json").unwrap();
        assert!(matches!(import_document(&doc), Err(PersistError::Json(_))));
    }

    #[tokio::test]
    async fn test_model_io_actor_save_then_load() {
        let store = MemoryStore::new();
        let (io, _handle) = ModelIo::spawn(store.clone());

        let original = snapshot("actor");
        io.save(original.clone()).wait().await.unwrap();

        assert_eq!(io.load("actor").await.unwrap(), original);
        assert_eq!(io.keys().await.unwrap().len(), 2);
        assert!(store.get("actor-policy").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_model_io_load_failure_is_reported() {
        let (io, _handle) = ModelIo::spawn(MemoryStore::new());
        assert!(io.load("nothing").await.is_err());
    }
}
