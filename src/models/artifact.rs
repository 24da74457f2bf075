//! Versioned model artifacts on disk.
//!
//! Layout of the models directory:
//!
//! ```text
//! models/
//!   model_20260301_020000_123.json   one file per trained version
//!   latest.json                      pointer to the serving version
//! ```
//!
//! Artifacts and the pointer are written to a temporary file and renamed
//! into place, so readers never observe a half-written file. Artifacts are
//! never overwritten or deleted here; rollback re-points `latest.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::models::gbdt::GbdtModel;
use crate::models::scorer::check_schema;
use crate::stats::StatsSnapshot;
use crate::types::{ProcessorDirectory, ProcessorId};

/// File name of the serving pointer
pub const LATEST_POINTER: &str = "latest.json";

const ARTIFACT_PREFIX: &str = "model_";
const ARTIFACT_SUFFIX: &str = ".json";
const VERSION_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Record counts from the retraining run that produced an artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub base_records: usize,
    pub new_records: usize,
    pub duplicates_removed: usize,
    pub missing_bin_dropped: usize,
    /// Records with a 3-D Secure flag other than 0 or 1
    #[serde(default)]
    pub invalid_3d_dropped: usize,
    pub training_records: usize,
    pub positives: usize,
    pub min_processor_support: usize,
    /// Processors below the support floor, sorted by id
    pub dropped_processors: Vec<ProcessorId>,
}

/// Scorer, statistics and processor names trained together.
///
/// Serving with a snapshot from another version is invalid, so the three
/// only ever travel as one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub model: GbdtModel,
    pub stats: StatsSnapshot,
    pub processors: ProcessorDirectory,
    #[serde(default)]
    pub summary: TrainingSummary,
}

impl ModelArtifact {
    /// Check tree structure, feature schema and processor name coverage
    pub fn validate(&self) -> Result<(), ArtifactError> {
        self.model.validate().map_err(ArtifactError::InvalidModel)?;
        check_schema(&self.model)?;

        for &id in self.stats.processors() {
            if self.processors.name(id).is_none() {
                return Err(ArtifactError::UnnamedProcessor(id));
            }
        }

        Ok(())
    }
}

/// Contents of `latest.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub version: String,
    /// Artifact file name relative to the models directory
    pub file: String,
    /// BLAKE3 of the artifact file, hex encoded
    pub blake3: String,
    pub created_at: DateTime<Utc>,
}

/// Reads and publishes artifacts in one models directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.dir.join(LATEST_POINTER)
    }

    pub fn artifact_path(&self, version: &str) -> PathBuf {
        self.dir.join(artifact_file_name(version))
    }

    /// Timestamp version id for `now`, suffixed when that id is taken
    pub fn allocate_version(&self, now: DateTime<Utc>) -> String {
        let base = now.format(VERSION_FORMAT).to_string();
        if !self.artifact_path(&base).exists() {
            return base;
        }

        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.artifact_path(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Write a new artifact, then point `latest.json` at it.
    ///
    /// The previous pointer stays in place until the artifact file is fully
    /// written, so a failure here leaves serving on the old version.
    pub fn publish(&self, artifact: &ModelArtifact) -> Result<LatestPointer, ArtifactError> {
        artifact.validate()?;
        fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))?;

        let file = artifact_file_name(&artifact.version);
        let path = self.dir.join(&file);
        if path.exists() {
            return Err(ArtifactError::AlreadyExists(path));
        }

        let bytes = serde_json::to_vec_pretty(artifact).map_err(|source| ArtifactError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");

        let pointer = LatestPointer {
            version: artifact.version.clone(),
            file,
            blake3: checksum(&bytes),
            created_at: artifact.created_at,
        };
        self.write_pointer(&pointer)?;

        info!(
            version = %pointer.version,
            blake3 = %pointer.blake3,
            processors = artifact.stats.processors().len(),
            "Model artifact published"
        );

        Ok(pointer)
    }

    /// Read `latest.json`
    pub fn latest_pointer(&self) -> Result<LatestPointer, ArtifactError> {
        let path = self.pointer_path();
        if !path.exists() {
            return Err(ArtifactError::NoLatest(path));
        }

        let bytes = read_file(&path)?;
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json { path, source })
    }

    /// Load and verify the version `latest.json` points at
    pub fn load_latest(&self) -> Result<ModelArtifact, ArtifactError> {
        let pointer = self.latest_pointer()?;
        let path = self.dir.join(&pointer.file);
        let bytes = read_file(&path)?;

        let actual = checksum(&bytes);
        if actual != pointer.blake3 {
            return Err(ArtifactError::Checksum {
                file: pointer.file,
                expected: pointer.blake3,
                actual,
            });
        }

        let artifact = parse_artifact(&path, &bytes)?;
        if artifact.version != pointer.version {
            return Err(ArtifactError::InvalidModel(format!(
                "pointer names version {} but {} contains {}",
                pointer.version, pointer.file, artifact.version
            )));
        }

        Ok(artifact)
    }

    /// Load a specific version regardless of the pointer
    pub fn load_version(&self, version: &str) -> Result<ModelArtifact, ArtifactError> {
        let path = self.existing_artifact(version)?;
        let bytes = read_file(&path)?;
        parse_artifact(&path, &bytes)
    }

    /// Versions present in the directory, oldest first
    pub fn list_versions(&self) -> Result<Vec<String>, ArtifactError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|source| io_error(&self.dir, source))?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&self.dir, source))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(version) = name
                .strip_prefix(ARTIFACT_PREFIX)
                .and_then(|rest| rest.strip_suffix(ARTIFACT_SUFFIX))
            {
                versions.push(version.to_string());
            }
        }

        versions.sort();
        Ok(versions)
    }

    /// Re-point `latest.json` at an existing version
    pub fn promote(&self, version: &str) -> Result<LatestPointer, ArtifactError> {
        let path = self.existing_artifact(version)?;
        let bytes = read_file(&path)?;
        let artifact = parse_artifact(&path, &bytes)?;

        let pointer = LatestPointer {
            version: artifact.version.clone(),
            file: artifact_file_name(version),
            blake3: checksum(&bytes),
            created_at: artifact.created_at,
        };
        self.write_pointer(&pointer)?;

        info!(version = %pointer.version, "Promoted model version to latest");
        Ok(pointer)
    }

    fn existing_artifact(&self, version: &str) -> Result<PathBuf, ArtifactError> {
        // Version ids are plain file-name fragments
        if version.is_empty()
            || version.contains(|c| c == '/' || c == '\\')
            || version.contains("..")
        {
            return Err(ArtifactError::UnknownVersion(version.to_string()));
        }

        let path = self.artifact_path(version);
        if path.exists() {
            Ok(path)
        } else {
            Err(ArtifactError::UnknownVersion(version.to_string()))
        }
    }

    fn write_pointer(&self, pointer: &LatestPointer) -> Result<(), ArtifactError> {
        let path = self.pointer_path();
        let bytes = serde_json::to_vec_pretty(pointer).map_err(|source| ArtifactError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &bytes)
    }
}

fn artifact_file_name(version: &str) -> String {
    format!("{}{}{}", ARTIFACT_PREFIX, version, ARTIFACT_SUFFIX)
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

fn parse_artifact(path: &Path, bytes: &[u8]) -> Result<ModelArtifact, ArtifactError> {
    let artifact: ModelArtifact =
        serde_json::from_slice(bytes).map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    artifact.validate()?;
    Ok(artifact)
}

fn read_file(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write to `<path>.tmp` and rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).map_err(|source| io_error(&tmp, source))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|source| io_error(&tmp, source))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| io_error(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_builder::feature_schema;
    use crate::models::gbdt::{Node, Tree};
    use crate::types::Observation;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn artifact(version: &str) -> ModelArtifact {
        let observations = [Observation {
            bin: 510123,
            processor_id: 1,
            is_3d: 1,
            approved: true,
        }];
        let names: HashMap<String, ProcessorId> = [("Stripe".to_string(), 1)].into();

        ModelArtifact {
            version: version.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap(),
            model: GbdtModel {
                feature_names: feature_schema(),
                base_margin: 0.4,
                learning_rate: 0.05,
                trees: vec![Tree {
                    nodes: vec![Node {
                        feature: 0,
                        threshold: 0.0,
                        left: 0,
                        right: 0,
                        value: Some(0.1),
                    }],
                }],
            },
            stats: StatsSnapshot::aggregate(&observations),
            processors: ProcessorDirectory::from_name_map(names).unwrap(),
            summary: TrainingSummary::default(),
        }
    }

    #[test]
    fn test_publish_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let pointer = store.publish(&artifact("v1")).unwrap();
        assert_eq!(pointer.file, "model_v1.json");

        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded, artifact("v1"));
        assert_eq!(store.latest_pointer().unwrap(), pointer);
    }

    #[test]
    fn test_missing_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(store.load_latest(), Err(ArtifactError::NoLatest(_))));
        assert!(store.list_versions().unwrap().is_empty());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.publish(&artifact("v1")).unwrap();

        let path = store.artifact_path("v1");
        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push('\n');
        fs::write(&path, raw).unwrap();

        assert!(matches!(
            store.load_latest(),
            Err(ArtifactError::Checksum { .. })
        ));
    }

    #[test]
    fn test_existing_version_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.publish(&artifact("v1")).unwrap();
        assert!(matches!(
            store.publish(&artifact("v1")),
            Err(ArtifactError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_allocate_version_suffixes_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();

        let first = store.allocate_version(now);
        assert_eq!(first, "20260301_020000_000");
        store.publish(&artifact(&first)).unwrap();

        assert_eq!(store.allocate_version(now), "20260301_020000_000_1");
    }

    #[test]
    fn test_promote_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.publish(&artifact("v1")).unwrap();
        store.publish(&artifact("v2")).unwrap();
        assert_eq!(store.load_latest().unwrap().version, "v2");

        store.promote("v1").unwrap();
        assert_eq!(store.load_latest().unwrap().version, "v1");
        assert_eq!(store.list_versions().unwrap(), vec!["v1", "v2"]);

        assert!(matches!(
            store.promote("../v1"),
            Err(ArtifactError::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_unnamed_processor_rejected() {
        let mut bad = artifact("v1");
        bad.processors = ProcessorDirectory::default();
        assert!(matches!(
            bad.validate(),
            Err(ArtifactError::UnnamedProcessor(1))
        ));
    }
}
