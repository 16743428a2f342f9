//! Checkpoint model for session state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{AppError, Result};

/// A named, immutable snapshot of a session's restorable state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Checkpoint {
    /// Unique record identifier.
    pub id: String,
    /// Checkpoint name, unique within the session.
    pub name: String,
    /// Owning session name.
    pub session: String,
    /// Kernel label that produced the snapshot.
    pub kernel: String,
    /// Opaque state produced by the kernel's `snapshot` reply.
    pub state: serde_json::Value,
    /// SHA-256 of the serialized state, verified before restore.
    pub digest: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Listing entry for a checkpoint, without its payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointSummary {
    /// Checkpoint name.
    pub name: String,
    /// Kernel label that produced the snapshot.
    pub kernel: String,
    /// Size of the serialized state in bytes.
    pub size_bytes: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Construct a new checkpoint and compute its digest.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the state cannot be serialized.
    pub fn new(
        name: String,
        session: String,
        kernel: String,
        state: serde_json::Value,
    ) -> Result<Self> {
        let digest = state_digest(&state)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            session,
            kernel,
            state,
            digest,
            created_at: Utc::now(),
        })
    }

    /// Recompute the digest and compare it with the stored one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Kernel` if the payload no longer matches.
    pub fn verify(&self) -> Result<()> {
        let actual = state_digest(&self.state)?;
        if actual == self.digest {
            Ok(())
        } else {
            Err(AppError::Kernel(format!(
                "checkpoint {} payload digest mismatch",
                self.name
            )))
        }
    }

    /// Payload-free listing entry.
    #[must_use]
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            name: self.name.clone(),
            kernel: self.kernel.clone(),
            size_bytes: serde_json::to_vec(&self.state).map_or(0, |bytes| bytes.len()),
            created_at: self.created_at,
        }
    }
}

/// SHA-256 hex digest of the compact JSON encoding of `state`.
fn state_digest(state: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
