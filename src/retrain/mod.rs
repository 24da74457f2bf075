//! Periodic retraining.
//!
//! A run moves through
//! `LOAD -> DEDUPE -> FILTER -> AGGREGATE -> TRAIN -> PERSIST -> ARCHIVE`.
//! Any failure before PERSIST completes leaves the published model and
//! the intake file untouched. Runs are not safe to overlap; schedule a
//! single instance.

pub mod dataset;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::RetrainingConfig;
use crate::error::RetrainError;
use crate::feature_builder::{FeatureBuilder, FEATURE_NAMES};
use crate::models::artifact::{ArtifactStore, ModelArtifact, TrainingSummary};
use crate::models::gbdt::GbdtTrainer;
use crate::stats::StatsSnapshot;
use crate::types::{Observation, ProcessorDirectory, ProcessorId, TransactionRecord};

use dataset::{append_records, dedupe, filter_min_support, read_records, write_records};

/// Steps of a retraining run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainStage {
    Load,
    Dedupe,
    Filter,
    Aggregate,
    Train,
    Persist,
    Archive,
}

impl fmt::Display for RetrainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "LOAD",
            Self::Dedupe => "DEDUPE",
            Self::Filter => "FILTER",
            Self::Aggregate => "AGGREGATE",
            Self::Train => "TRAIN",
            Self::Persist => "PERSIST",
            Self::Archive => "ARCHIVE",
        };
        f.write_str(name)
    }
}

/// What a successful run produced
#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub version: String,
    pub artifact_path: PathBuf,
    /// Archive file the consumed batch was appended to, if it was non-empty
    pub archive_path: Option<PathBuf>,
    pub processors: Vec<ProcessorId>,
    pub summary: TrainingSummary,
}

/// Rebuilds statistics and the scorer from transaction records
pub struct Retrainer {
    config: RetrainingConfig,
    store: ArtifactStore,
    builder: FeatureBuilder,
}

impl Retrainer {
    pub fn new(config: RetrainingConfig, store: ArtifactStore) -> Self {
        Self {
            config,
            store,
            builder: FeatureBuilder::new(),
        }
    }

    pub fn run(&self) -> Result<RetrainReport, RetrainError> {
        self.run_at(Utc::now())
    }

    /// Run with an explicit clock, which names the version and archive
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<RetrainReport, RetrainError> {
        let base_path = Path::new(&self.config.base_data_path);
        let new_path = Path::new(&self.config.new_data_path);

        info!(stage = %RetrainStage::Load, "Retraining started");
        let base = load(base_path)?;
        let arrived = load(new_path)?;
        let directory = ProcessorDirectory::load_json(&self.config.processor_names_path)
            .map_err(RetrainError::ProcessorNames)?;
        info!(
            stage = %RetrainStage::Load,
            base = base.len(),
            new = arrived.len(),
            processor_names = directory.len(),
            "Records loaded"
        );

        let mut summary = TrainingSummary {
            base_records: base.len(),
            new_records: arrived.len(),
            min_processor_support: self.config.min_processor_support,
            ..TrainingSummary::default()
        };

        let mut combined = base;
        combined.extend(arrived.iter().cloned());
        let loaded = combined.len();
        let deduped = dedupe(combined);
        summary.duplicates_removed = loaded - deduped.len();
        info!(
            stage = %RetrainStage::Dedupe,
            kept = deduped.len(),
            removed = summary.duplicates_removed,
            "Duplicates removed"
        );

        let filtered = filter_min_support(&deduped, self.config.min_processor_support);
        summary.missing_bin_dropped = filtered.missing_bin;
        summary.invalid_3d_dropped = filtered.invalid_3d;
        summary.dropped_processors = filtered.dropped_processors.clone();
        summary.training_records = filtered.observations.len();
        info!(
            stage = %RetrainStage::Filter,
            kept = filtered.observations.len(),
            missing_bin = filtered.missing_bin,
            invalid_3d = filtered.invalid_3d,
            dropped_processors = ?filtered.dropped_processors,
            "Records filtered"
        );
        if filtered.observations.is_empty() {
            return Err(RetrainError::EmptyTrainingSet);
        }

        let stats = StatsSnapshot::aggregate(&filtered.observations);
        if let Some(&id) = stats
            .processors()
            .iter()
            .find(|&&id| directory.name(id).is_none())
        {
            return Err(RetrainError::UnnamedProcessor(id));
        }
        info!(
            stage = %RetrainStage::Aggregate,
            bins = stats.bin_count(),
            pairs = stats.pair_count(),
            processors = stats.processors().len(),
            "Statistics aggregated"
        );

        let (features, labels) = self.training_matrix(&stats, &filtered.observations);
        summary.positives = labels.iter().filter(|&&y| y == 1).count();
        let model =
            GbdtTrainer::new(self.config.gbdt.clone()).train(&FEATURE_NAMES, &features, &labels)?;
        info!(
            stage = %RetrainStage::Train,
            samples = labels.len(),
            positives = summary.positives,
            trees = model.num_trees(),
            "Scorer trained"
        );

        let version = self.store.allocate_version(now);
        let processors = stats.processors().to_vec();
        let artifact = ModelArtifact {
            version: version.clone(),
            created_at: now,
            model,
            stats,
            processors: directory,
            summary: summary.clone(),
        };
        self.store.publish(&artifact).map_err(RetrainError::Persist)?;
        let artifact_path = self.store.artifact_path(&version);
        info!(stage = %RetrainStage::Persist, version = %version, "Artifact published");

        let archive_path = self.archive(now, base_path, new_path, &deduped, &arrived)?;
        info!(
            stage = %RetrainStage::Archive,
            archived = arrived.len(),
            path = ?archive_path,
            "Intake archived and reset"
        );

        Ok(RetrainReport {
            version,
            artifact_path,
            archive_path,
            processors,
            summary,
        })
    }

    /// One feature row per observation, joined against the full snapshot
    fn training_matrix(
        &self,
        stats: &StatsSnapshot,
        observations: &[Observation],
    ) -> (Vec<Vec<f64>>, Vec<u8>) {
        observations
            .iter()
            .map(|obs| {
                let record = self
                    .builder
                    .build(stats, obs.bin, obs.processor_id, obs.is_3d);
                (record.to_vector().to_vec(), obs.success_flag())
            })
            .unzip()
    }

    /// Fold the intake into the base file, keep a dated copy, empty the intake
    fn archive(
        &self,
        now: DateTime<Utc>,
        base_path: &Path,
        new_path: &Path,
        deduped: &[TransactionRecord],
        arrived: &[TransactionRecord],
    ) -> Result<Option<PathBuf>, RetrainError> {
        write_records(base_path, deduped).map_err(archive_error(base_path))?;

        let archive_path = if arrived.is_empty() {
            None
        } else {
            let path = Path::new(&self.config.archive_dir)
                .join(format!("transactions_{}.csv", now.format("%Y%m")));
            append_records(&path, arrived).map_err(archive_error(&path))?;
            Some(path)
        };

        write_records(new_path, &[]).map_err(archive_error(new_path))?;
        Ok(archive_path)
    }
}

fn archive_error(path: &Path) -> impl FnOnce(csv::Error) -> RetrainError {
    let path = path.to_path_buf();
    move |source| RetrainError::Archive { path, source }
}

fn load(path: &Path) -> Result<Vec<TransactionRecord>, RetrainError> {
    read_records(path).map_err(|source| RetrainError::Load {
        path: path.to_path_buf(),
        source,
    })
}
