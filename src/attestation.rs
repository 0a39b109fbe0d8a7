//! Attestation store boundary
//!
//! Attestations are owned by an external service; the engine only reads them
//! to resolve ownership, status and the attested value before any
//! cryptographic work. [`MemoryAttestations`] backs tests, the CLIs and
//! single-node deployments (seeded from a JSON file).

use std::{collections::HashMap, fmt, future::Future, path::Path, sync::RwLock};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::predicate::ClaimValue;
use crate::record::AttestationId;

/// Lifecycle status of an attestation. Only `Finalized` is provable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationStatus {
    Pending,
    Finalized,
    Revoked,
}

impl fmt::Display for AttestationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttestationStatus::Pending => "pending",
            AttestationStatus::Finalized => "finalized",
            AttestationStatus::Revoked => "revoked",
        })
    }
}

/// `getAttestation(id) -> { ownerSubject, status, value }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub id: AttestationId,
    #[serde(alias = "ownerSubject")]
    pub owner_subject: String,
    pub status: AttestationStatus,
    /// Private; `Debug` on `ClaimValue` is redacted.
    pub value: ClaimValue,
}

/// The authenticated caller, as established by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Actor {
    pub subject: String,
}

impl Actor {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    pub fn owns(&self, attestation: &Attestation) -> bool {
        self.subject == attestation.owner_subject
    }
}

/// Read-only view of the external attestation store.
pub trait AttestationStore: Send + Sync + 'static {
    fn get_attestation(
        &self,
        id: &AttestationId,
    ) -> impl Future<Output = Result<Option<Attestation>, StoreError>> + Send;
}

/// In-memory attestation table.
#[derive(Debug, Default)]
pub struct MemoryAttestations {
    inner: RwLock<HashMap<AttestationId, Attestation>>,
}

impl MemoryAttestations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, attestation: Attestation) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(attestation.id.clone(), attestation);
        Ok(())
    }

    /// Seed from a JSON array of attestations.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
        let list: Vec<Attestation> = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display()))?;
        let out = Self::new();
        for a in list {
            out.insert(a)?;
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AttestationStore for MemoryAttestations {
    async fn get_attestation(&self, id: &AttestationId) -> Result<Option<Attestation>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(id).cloned())
    }
}
