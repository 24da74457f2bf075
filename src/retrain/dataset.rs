//! Transaction record files and the DEDUPE/FILTER steps

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::types::transaction::RECORD_HEADER;
use crate::types::{Observation, ProcessorId, TransactionRecord};

/// Read every record from a CSV file with a header row
pub fn read_records(path: &Path) -> Result<Vec<TransactionRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    reader.deserialize().collect()
}

/// Replace `path` with a header plus `records`, via a temporary file
pub fn write_records(path: &Path, records: &[TransactionRecord]) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        writer.write_record(RECORD_HEADER)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Append `records` to `path`, writing the header first if the file is new
pub fn append_records(path: &Path, records: &[TransactionRecord]) -> Result<(), csv::Error> {
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if !has_content {
        return write_records(path, records);
    }

    let file = OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Drop exact duplicates, keeping the first occurrence in order
pub fn dedupe(records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.clone()))
        .collect()
}

/// Outcome of the FILTER step
#[derive(Debug, Clone, Default)]
pub struct FilteredRecords {
    pub observations: Vec<Observation>,
    pub missing_bin: usize,
    /// Records whose 3-D Secure flag is neither 0 nor 1
    pub invalid_3d: usize,
    /// Processors below the support floor, sorted by id
    pub dropped_processors: Vec<ProcessorId>,
}

/// Drop records without a BIN or with a 3-D Secure flag serving never
/// sees, then processors seen fewer than `min_support` times among the
/// remaining records
pub fn filter_min_support(records: &[TransactionRecord], min_support: usize) -> FilteredRecords {
    let (mut missing_bin, mut invalid_3d) = (0, 0);
    let with_bin: Vec<Observation> = records
        .iter()
        .filter_map(|record| match record.observation() {
            None => {
                missing_bin += 1;
                None
            }
            Some(obs) if obs.is_3d > 1 => {
                invalid_3d += 1;
                None
            }
            Some(obs) => Some(obs),
        })
        .collect();

    let mut support: HashMap<ProcessorId, usize> = HashMap::new();
    for obs in &with_bin {
        *support.entry(obs.processor_id).or_insert(0) += 1;
    }

    let mut dropped_processors: Vec<ProcessorId> = support
        .iter()
        .filter(|(_, &count)| count < min_support)
        .map(|(&id, _)| id)
        .collect();
    dropped_processors.sort_unstable();

    let observations = with_bin
        .into_iter()
        .filter(|obs| support.get(&obs.processor_id).copied().unwrap_or(0) >= min_support)
        .collect();

    FilteredRecords {
        observations,
        missing_bin,
        invalid_3d,
        dropped_processors,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
