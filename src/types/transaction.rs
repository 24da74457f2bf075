//! Transaction outcome records consumed by the retrainer

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use super::{Bin, ProcessorId};

/// Column order used when writing record files.
pub const RECORD_HEADER: [&str; 5] = ["transaction_id", "bin", "processor_id", "is_3d", "status"];

/// Status value counted as a successful authorisation.
pub const APPROVED_STATUS: &str = "approved";

/// Encoded status the upstream extraction uses for approvals.
const APPROVED_STATUS_ENCODED: u8 = 0;

/// One historical authorisation attempt as extracted from the
/// transaction database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Upstream transaction identifier, when the extraction supplies one
    #[serde(default, alias = "txid")]
    pub transaction_id: Option<String>,

    /// Card BIN; empty when the card number was not captured
    #[serde(default, deserialize_with = "optional_integral")]
    pub bin: Option<Bin>,

    /// Encoded processor id
    #[serde(alias = "processor_name_encoded", deserialize_with = "integral")]
    pub processor_id: ProcessorId,

    /// 3-D Secure flag; values other than 0 or 1 are dropped before training
    #[serde(alias = "is_3d_encoded", deserialize_with = "integral")]
    pub is_3d: u8,

    /// Raw status as extracted
    #[serde(alias = "status_encoded")]
    pub status: String,
}

impl TransactionRecord {
    /// Create a record with a textual `approved`/`declined` status
    pub fn new(
        transaction_id: impl Into<String>,
        bin: Bin,
        processor_id: ProcessorId,
        is_3d: u8,
        approved: bool,
    ) -> Self {
        Self {
            transaction_id: Some(transaction_id.into()),
            bin: Some(bin),
            processor_id,
            is_3d,
            status: if approved { APPROVED_STATUS } else { "declined" }.to_string(),
        }
    }

    /// Whether the attempt was approved.
    ///
    /// Accepts both the textual status and the upstream encoding where
    /// `0` marks an approval.
    pub fn is_approved(&self) -> bool {
        let status = self.status.trim();
        status.eq_ignore_ascii_case(APPROVED_STATUS)
            || parse_integral::<u8>(status) == Ok(APPROVED_STATUS_ENCODED)
    }

    /// Project to the fields used for aggregation; `None` when the BIN is missing
    pub fn observation(&self) -> Option<Observation> {
        self.bin.map(|bin| Observation {
            bin,
            processor_id: self.processor_id,
            is_3d: self.is_3d,
            approved: self.is_approved(),
        })
    }
}

/// A record that survived FILTER: BIN present, status resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Observation {
    pub bin: Bin,
    pub processor_id: ProcessorId,
    pub is_3d: u8,
    pub approved: bool,
}

impl Observation {
    /// Binary label: 1 iff approved
    pub fn success_flag(&self) -> u8 {
        u8::from(self.approved)
    }
}

/// Parse an unsigned integer, also accepting an integral float such as
/// `510123.0` (dataframe exports turn integer columns with gaps into floats)
fn parse_integral<T: TryFrom<u64>>(raw: &str) -> Result<T, String> {
    let raw = raw.trim();
    let value = match raw.parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            let float: f64 = raw
                .parse()
                .map_err(|_| format!("expected an integer, got {:?}", raw))?;
            if !float.is_finite() || float.fract() != 0.0 || !(0.0..=u64::MAX as f64).contains(&float)
            {
                return Err(format!("expected an integer, got {:?}", raw));
            }
            float as u64
        }
    };
    T::try_from(value).map_err(|_| format!("{} is out of range", raw))
}

fn integral<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let raw = String::deserialize(deserializer)?;
    parse_integral(&raw).map_err(de::Error::custom)
}

fn optional_integral<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => {
            parse_integral(&raw).map(Some).map_err(de::Error::custom)
        }
        _ => Ok(None),
    }
}
