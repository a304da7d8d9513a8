//! On-disk model store
//!
//! Each scope keeps one current artifact at `<base>/<scope dir>/latest.json`.
//! The file is an envelope holding the canonical bundle and its BLAKE3 hash;
//! writes go to a sibling temp file and are renamed into place, so readers
//! never see a half-written artifact.

use crate::bundle::{ModelBundle, OccurrenceBundle, Scope, SeverityBundle};
use crate::errors::{Result, RiskError};
use crate::records::UserId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const ARTIFACT_FILE: &str = "latest.json";
const ENVELOPE_FORMAT: u32 = 1;

/// BLAKE3 hex digest of a value's JSON form.
///
/// Going through `Value` sorts object keys (`serde_json::Map` is ordered
/// unless `preserve_order` is enabled), so equal bundles hash equally no
/// matter how their fields were declared or parsed.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(&serde_json::to_value(value)?)?;
    Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}

/// Write `bytes` to `tmp` and rename it over `path`. `tmp` never outlives a failure.
fn write_replacing(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let result = fs::write(tmp, bytes).and_then(|()| fs::rename(tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: u32,
    content_hash: String,
    bundle: Value,
}

/// Result of a successful save
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    pub path: PathBuf,
    pub content_hash: String,
    pub file_size: u64,
}

/// File-backed store of the latest bundle per scope.
#[derive(Debug, Clone)]
pub struct ModelStore {
    base: PathBuf,
}

impl ModelStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Artifact location for a scope.
    pub fn path(&self, scope: Scope) -> PathBuf {
        self.base.join(scope.relative_dir()).join(ARTIFACT_FILE)
    }

    pub fn exists(&self, scope: Scope) -> bool {
        self.path(scope).is_file()
    }

    /// Persist a bundle as the scope's current artifact, replacing any previous one.
    #[instrument(skip(self, bundle), fields(scope = %bundle.scope))]
    pub fn save<M: Serialize>(&self, bundle: &ModelBundle<M>) -> Result<SaveReceipt> {
        let path = self.path(bundle.scope);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base.clone());
        fs::create_dir_all(&dir)?;

        let value = serde_json::to_value(bundle)?;
        let envelope = Envelope {
            format: ENVELOPE_FORMAT,
            content_hash: content_hash(&value)?,
            bundle: value,
        };
        let text = serde_json::to_string_pretty(&serde_json::to_value(&envelope)?)?;

        let tmp = dir.join(format!("{ARTIFACT_FILE}.tmp-{}", std::process::id()));
        write_replacing(&tmp, &path, text.as_bytes())?;

        info!(
            path = %path.display(),
            bytes = text.len(),
            hash = %envelope.content_hash,
            "bundle saved"
        );
        Ok(SaveReceipt {
            path,
            content_hash: envelope.content_hash,
            file_size: text.len() as u64,
        })
    }

    /// Load the scope's current bundle. `Ok(None)` when nothing was ever saved.
    #[instrument(skip(self), fields(scope = %scope))]
    pub fn load<M: DeserializeOwned>(&self, scope: Scope) -> Result<Option<ModelBundle<M>>> {
        let path = self.path(scope);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no artifact");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let corrupt = |reason: String| RiskError::CorruptArtifact {
            path: path.clone(),
            reason,
        };

        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("unreadable envelope: {e}")))?;
        if envelope.format != ENVELOPE_FORMAT {
            return Err(corrupt(format!("unsupported format {}", envelope.format)));
        }
        let actual = content_hash(&envelope.bundle)?;
        if actual != envelope.content_hash {
            warn!(expected = %envelope.content_hash, actual = %actual, "content hash mismatch");
            return Err(corrupt("content hash mismatch".to_string()));
        }

        let bundle: ModelBundle<M> = serde_json::from_value(envelope.bundle)
            .map_err(|e| corrupt(format!("bundle does not decode: {e}")))?;
        if bundle.scope != scope {
            return Err(corrupt(format!("artifact belongs to {}", bundle.scope)));
        }
        Ok(Some(bundle))
    }

    pub fn load_global(&self) -> Result<Option<OccurrenceBundle>> {
        self.load(Scope::Global)
    }

    pub fn load_severity(&self) -> Result<Option<SeverityBundle>> {
        self.load(Scope::GlobalSeverity)
    }

    pub fn load_user(&self, user_id: UserId) -> Result<Option<OccurrenceBundle>> {
        self.load(Scope::User(user_id))
    }

    /// Users with a stored personal model, ascending.
    pub fn list_users(&self) -> Result<Vec<UserId>> {
        let dir = self.base.join("users");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut users = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<UserId>().ok()) else {
                continue;
            };
            if self.exists(Scope::User(id)) {
                users.push(id);
            }
        }
        users.sort_unstable();
        Ok(users)
    }

    /// Remove a scope's artifact. Missing artifacts are not an error.
    pub fn delete(&self, scope: Scope) -> Result<()> {
        match fs::remove_file(self.path(scope)) {
            Ok(()) => {
                info!(scope = %scope, "bundle deleted");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
