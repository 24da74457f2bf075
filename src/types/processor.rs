//! Bidirectional mapping between encoded processor ids and display names

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::ProcessorId;
use crate::error::ArtifactError;

/// One processor entry in the persisted directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorEntry {
    pub id: ProcessorId,
    pub name: String,
}

/// Processor id <-> display name mapping.
///
/// Injective in both directions: construction fails if two names share an
/// id. Names are unique by construction since the source is keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ProcessorEntry>", into = "Vec<ProcessorEntry>")]
pub struct ProcessorDirectory {
    by_id: HashMap<ProcessorId, String>,
    by_name: HashMap<String, ProcessorId>,
}

impl ProcessorDirectory {
    /// Build from a `name -> id` map, the layout of `processor_name_mapping.json`
    pub fn from_name_map(names: HashMap<String, ProcessorId>) -> Result<Self, ArtifactError> {
        // Sorted so a duplicate is always reported against the same pair
        let sorted: BTreeMap<String, ProcessorId> = names.into_iter().collect();
        let mut directory = Self::default();

        for (name, id) in sorted {
            if let Some(first) = directory.by_id.get(&id) {
                return Err(ArtifactError::DuplicateProcessorId {
                    id,
                    first: first.clone(),
                    second: name,
                });
            }
            directory.by_id.insert(id, name.clone());
            directory.by_name.insert(name, id);
        }

        Ok(directory)
    }

    /// Load a `name -> id` JSON object from disk
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let names: HashMap<String, ProcessorId> =
            serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_name_map(names)
    }

    pub fn name(&self, id: ProcessorId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<ProcessorId> {
        self.by_name.get(name).copied()
    }

    /// Name to show for `id`, with a placeholder for ids outside the mapping
    pub fn display_name(&self, id: ProcessorId) -> String {
        self.name(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown ID {}", id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Entries sorted by id
    pub fn entries(&self) -> Vec<ProcessorEntry> {
        let mut entries: Vec<ProcessorEntry> = self
            .by_id
            .iter()
            .map(|(&id, name)| ProcessorEntry {
                id,
                name: name.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}

impl TryFrom<Vec<ProcessorEntry>> for ProcessorDirectory {
    type Error = ArtifactError;

    fn try_from(entries: Vec<ProcessorEntry>) -> Result<Self, Self::Error> {
        let mut names = HashMap::with_capacity(entries.len());
        for entry in entries {
            if let Some(previous) = names.insert(entry.name.clone(), entry.id) {
                return Err(ArtifactError::InvalidModel(format!(
                    "processor name {:?} listed for ids {} and {}",
                    entry.name, previous, entry.id
                )));
            }
        }
        Self::from_name_map(names)
    }
}

impl From<ProcessorDirectory> for Vec<ProcessorEntry> {
    fn from(directory: ProcessorDirectory) -> Self {
        directory.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProcessorDirectory {
        let mut names = HashMap::new();
        names.insert("Stripe EU".to_string(), 1);
        names.insert("Adyen".to_string(), 2);
        names.insert("TWP".to_string(), 9);
        ProcessorDirectory::from_name_map(names).unwrap()
    }

    #[test]
    fn test_bidirectional_lookup() {
        let directory = sample();
        assert_eq!(directory.name(2), Some("Adyen"));
        assert_eq!(directory.id("TWP"), Some(9));
        assert_eq!(directory.len(), 3);
        assert_eq!(directory.display_name(42), "Unknown ID 42");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut names = HashMap::new();
        names.insert("Adyen".to_string(), 2);
        names.insert("Adyen US".to_string(), 2);

        let err = ProcessorDirectory::from_name_map(names).unwrap_err();
        match err {
            ArtifactError::DuplicateProcessorId { id, first, second } => {
                assert_eq!(id, 2);
                assert_eq!(first, "Adyen");
                assert_eq!(second, "Adyen US");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_persisted_form_is_sorted_entries() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.starts_with(r#"[{"id":1,"name":"Stripe EU"}"#));

        let restored: ProcessorDirectory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sample());
    }
}
