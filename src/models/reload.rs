//! Process-wide serving model and hot reload
//!
//! The serving model is replaced wholesale when a new artifact is published;
//! requests in flight keep the `Arc` they started with.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::error::{ArtifactError, ServingError};
use crate::models::artifact::{ArtifactStore, ModelArtifact};
use crate::models::scorer::{check_schema, Scorer};
use crate::stats::StatsSnapshot;
use crate::types::ProcessorDirectory;

/// Everything one prediction needs, from a single artifact version
pub struct ServingModel {
    version: String,
    stats: StatsSnapshot,
    processors: ProcessorDirectory,
    scorer: Arc<dyn Scorer>,
}

impl ServingModel {
    /// Assemble a serving model, rejecting a scorer with a foreign schema
    pub fn new(
        version: impl Into<String>,
        stats: StatsSnapshot,
        processors: ProcessorDirectory,
        scorer: Arc<dyn Scorer>,
    ) -> Result<Self, ServingError> {
        check_schema(scorer.as_ref())?;
        Ok(Self {
            version: version.into(),
            stats,
            processors,
            scorer,
        })
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        artifact.validate()?;
        Ok(Self::new(
            artifact.version,
            artifact.stats,
            artifact.processors,
            Arc::new(artifact.model),
        )?)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn stats(&self) -> &StatsSnapshot {
        &self.stats
    }

    pub fn processors(&self) -> &ProcessorDirectory {
        &self.processors
    }

    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }
}

/// Shared slot holding the current serving model
#[derive(Clone, Default)]
pub struct ModelHandle {
    inner: Arc<RwLock<Option<Arc<ServingModel>>>>,
}

impl ModelHandle {
    /// A handle with nothing loaded yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(model: ServingModel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(Arc::new(model)))),
        }
    }

    pub fn current(&self) -> Option<Arc<ServingModel>> {
        self.inner.read().clone()
    }

    /// Swap in a new model, returning the previous one
    pub fn replace(&self, model: ServingModel) -> Option<Arc<ServingModel>> {
        self.inner.write().replace(Arc::new(model))
    }

    pub fn version(&self) -> Option<String> {
        self.inner.read().as_ref().map(|m| m.version.clone())
    }
}

/// Polls the artifact store and swaps the model when `latest` moves
pub struct ArtifactWatcher {
    store: ArtifactStore,
    handle: ModelHandle,
}

impl ArtifactWatcher {
    pub fn new(store: ArtifactStore, handle: ModelHandle) -> Self {
        Self { store, handle }
    }

    /// Load the latest version if it differs from the one being served.
    ///
    /// Returns `Ok(true)` when a new model was swapped in. A missing pointer
    /// is not an error; nothing has been published yet.
    pub fn check_and_reload(&self) -> Result<bool, ArtifactError> {
        let pointer = match self.store.latest_pointer() {
            Ok(pointer) => pointer,
            Err(ArtifactError::NoLatest(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let current = self.handle.version();
        if current.as_deref() == Some(pointer.version.as_str()) {
            return Ok(false);
        }

        let model = ServingModel::from_artifact(self.store.load_latest()?)?;
        let version = model.version().to_string();
        self.handle.replace(model);

        info!(
            previous = current.as_deref().unwrap_or("none"),
            version = %version,
            "Serving model reloaded"
        );
        Ok(true)
    }

    /// Spawn the polling loop. Failed loads keep the current model.
    pub fn start(self, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.check_and_reload() {
                    error!(error = %e, "Failed to reload model, keeping current version");
                }
            }
        })
    }
}
