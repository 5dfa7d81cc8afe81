use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::BatchError;
use crate::dispatch::AllocationMode;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A named input or output together with its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: String,
    pub sha256: String,
}

impl FileDigest {
    pub fn of_file(path: &Path) -> Result<Self, BatchError> {
        let bytes = fs::read(path).map_err(|source| BatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::of_bytes(path.display().to_string(), &bytes))
    }

    pub fn of_bytes(label: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: label.into(),
            sha256: sha256_hex(bytes),
        }
    }
}

/// Written next to every scenario's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceManifest {
    pub scenario: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_revision: Option<String>,
    pub config: FileDigest,
    pub inputs: Vec<FileDigest>,
    pub catalog_version: u64,
    pub mode: AllocationMode,
    pub used_optimizer: bool,
    pub attempts: u32,
    pub outputs: Vec<FileDigest>,
}

/// Revision of the code producing the outputs.
///
/// `SOURCE_REVISION` or `GIT_COMMIT` win when set (CI builds, containers);
/// otherwise `git rev-parse HEAD` is tried and any failure yields `None`.
pub fn source_revision() -> Option<String> {
    for variable in ["SOURCE_REVISION", "GIT_COMMIT"] {
        if let Ok(value) = env::var(variable) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    let revision = revision.trim();
    (!revision.is_empty()).then(|| revision.to_string())
}
