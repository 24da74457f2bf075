//! Scoring, ranking and model artifact components

pub mod artifact;
pub mod gbdt;
pub mod inference;
pub mod ranker;
pub mod reload;
pub mod scorer;

pub use artifact::{ArtifactStore, LatestPointer, ModelArtifact, TrainingSummary};
pub use gbdt::{GbdtModel, GbdtParams, GbdtTrainer};
pub use inference::PredictionService;
pub use ranker::{Ranker, Ranking, RankingOptions, ScoredCandidate};
pub use reload::{ArtifactWatcher, ModelHandle, ServingModel};
pub use scorer::Scorer;
