//! Content fingerprints for datasets and requests.
//!
//! Two datasets with the same rows and schema hash identically, no matter
//! how they were built.

use crate::models::{ColumnKind, Dataset, Record};
use sha2::{Digest, Sha256};
use std::fmt;

/// Cache key: digest of a dataset fingerprint plus a canonical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Combine a dataset fingerprint with a serialized request.
    pub(crate) fn from_parts(dataset_fingerprint: &str, request_json: &str) -> Self {
        let mut hasher = Sha256::new();
        put_str(&mut hasher, dataset_fingerprint);
        put_str(&mut hasher, request_json);
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash a dataset: row count, schema, then every row in order.
pub(crate) fn digest_dataset(dataset: &Dataset) -> String {
    let mut hasher = Sha256::new();

    hasher.update((dataset.len() as u64).to_le_bytes());
    for (name, kind) in dataset.schema().extras() {
        put_str(&mut hasher, name);
        hasher.update([kind_tag(*kind)]);
    }

    for record in dataset.iter() {
        put_record(&mut hasher, record);
    }

    format!("{:x}", hasher.finalize())
}

fn kind_tag(kind: ColumnKind) -> u8 {
    match kind {
        ColumnKind::Numeric => 1,
        ColumnKind::Categorical => 2,
        ColumnKind::Datetime => 3,
    }
}

// Calendar columns are functions of the timestamp and are not hashed
// separately; completion depends on configuration and is.
fn put_record(hasher: &mut Sha256, record: &Record) {
    put_str(
        hasher,
        &record.timestamp.format("%Y-%m-%dT%H:%M:%S%.9f").to_string(),
    );
    put_str(hasher, &record.entity_name);
    put_opt_str(hasher, record.item_name.as_deref());
    put_opt_u64(hasher, record.duration_ms);
    put_opt_str(hasher, record.completion);

    for (name, value) in &record.metrics {
        put_str(hasher, name);
        put_opt_u64(hasher, value.map(f64::to_bits));
    }
    for (name, value) in &record.metadata {
        put_str(hasher, name);
        put_opt_str(hasher, value.as_deref());
    }
}

fn put_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn put_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(s) => {
            hasher.update([1u8]);
            put_str(hasher, s);
        }
        None => hasher.update([0u8]),
    }
}

fn put_opt_u64(hasher: &mut Sha256, value: Option<u64>) {
    match value {
        Some(n) => {
            hasher.update([1u8]);
            hasher.update(n.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
}
