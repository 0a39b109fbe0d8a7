//! Happy-path crate API
//!
//! - `EngineBuilder` wires a [`ProofEngine`] with safe defaults (in-memory
//!   store, environment config, dev backend when the feature is on)
//! - proof-file I/O for the CLIs: `io::write_proof` / `io::read_proof`

use crate::attestation::AttestationStore;
use crate::backend::{BackendAdapter, ProvingBackend};
use crate::config::EngineConfig;
use crate::engine::ProofEngine;
use crate::error::ClaimProofError;
use crate::store::{MemoryStore, ProofStore, ReplayGuard};

// ===============================================================================================
// Builder
// ===============================================================================================

/// Ergonomic constructor for a [`ProofEngine`].
///
/// Defaults:
/// - store: [`MemoryStore`]
/// - config: [`EngineConfig::from_env`]
/// - backend: a fresh random-key `DevBackend` (feature `dev-backend`); without
///   the feature a backend must be supplied
pub struct EngineBuilder<S, A> {
    store: S,
    attestations: A,
    backend: Option<BackendAdapter>,
    config: Option<EngineConfig>,
}

impl<A: AttestationStore> EngineBuilder<MemoryStore, A> {
    pub fn new(attestations: A) -> Self {
        Self {
            store: MemoryStore::new(),
            attestations,
            backend: None,
            config: None,
        }
    }
}

impl<S, A> EngineBuilder<S, A>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    /// Swap the persistence layer.
    pub fn store<T: ProofStore + ReplayGuard>(self, store: T) -> EngineBuilder<T, A> {
        EngineBuilder {
            store,
            attestations: self.attestations,
            backend: self.backend,
            config: self.config,
        }
    }

    pub fn backend<B: ProvingBackend>(mut self, backend: B) -> Self {
        self.backend = Some(BackendAdapter::new(backend));
        self
    }

    pub fn backend_adapter(mut self, backend: BackendAdapter) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ProofEngine<S, A>, ClaimProofError> {
        let backend = match self.backend {
            Some(b) => b,
            None => default_backend()?,
        };
        let config = self.config.unwrap_or_else(EngineConfig::from_env);
        Ok(ProofEngine::new(self.store, self.attestations, backend, config))
    }
}

#[cfg(feature = "dev-backend")]
fn default_backend() -> Result<BackendAdapter, ClaimProofError> {
    Ok(BackendAdapter::new(crate::dev_backend::DevBackend::random()))
}

#[cfg(not(feature = "dev-backend"))]
fn default_backend() -> Result<BackendAdapter, ClaimProofError> {
    Err(ClaimProofError::BackendUnavailable(
        "no proving backend configured".into(),
    ))
}

// ===============================================================================================
/* Proof file I/O (magic + version + JSON record) */
// ===============================================================================================

pub mod io {
    use std::{fs, path::Path};

    use crate::record::ProofRecord;

    /// 8-byte magic used by the `prover`/`verifier` CLIs.
    pub const FILE_MAGIC: &[u8; 8] = b"CLAIMPv1";
    pub const FILE_VERSION: u16 = 1;

    /// Write a proof record (public material only) to `path`.
    pub fn write_proof(path: &Path, record: &ProofRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(record).map_err(|e| anyhow::anyhow!("serialize proof: {e}"))?;
        let mut f = fs::File::create(path).map_err(|e| anyhow::anyhow!("create {}: {e}", path.display()))?;
        use std::io::Write;
        f.write_all(FILE_MAGIC)?;
        f.write_all(&FILE_VERSION.to_be_bytes())?;
        f.write_all(&payload)?;
        f.flush()?;
        Ok(())
    }

    /// Read a proof record written by [`write_proof`].
    pub fn read_proof(path: &Path) -> anyhow::Result<ProofRecord> {
        let bytes = fs::read(path).map_err(|e| anyhow::anyhow!("open {}: {e}", path.display()))?;
        if bytes.len() < FILE_MAGIC.len() + 2 {
            anyhow::bail!("proof file too short");
        }
        let (magic, rest) = bytes.split_at(FILE_MAGIC.len());
        if magic != FILE_MAGIC {
            anyhow::bail!("bad proof file magic (expected CLAIMPv1)");
        }
        let (ver, payload) = rest.split_at(2);
        let file_ver = u16::from_be_bytes([ver[0], ver[1]]);
        if file_ver != FILE_VERSION {
            anyhow::bail!("unsupported proof version: {file_ver}");
        }
        serde_json::from_slice(payload).map_err(|e| anyhow::anyhow!("deserialize proof: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::io::*;
    use crate::nullifier::NullifierCommitment;
    use crate::predicate::{ClaimValue, PublicInputs};
    use crate::record::{AttestationId, ProofRecord};
    use crate::F;

    #[test]
    fn proof_file_round_trip_and_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proof.bin");
        let record = ProofRecord::new(
            AttestationId::from("att-1"),
            "alice",
            PublicInputs::SetMembership {
                allowed_set: vec![ClaimValue::Text("DE".into()), ClaimValue::Integer(3)],
            },
            vec![9; 64],
            NullifierCommitment::from_field(&F::from(11u64)),
        );
        write_proof(&path, &record).unwrap();
        assert_eq!(read_proof(&path).unwrap(), record);

        std::fs::write(&path, b"SSZKPv2\0\x00\x02{}").unwrap();
        assert!(read_proof(&path).is_err());
        std::fs::write(&path, b"CLAIMPv1\x00\x07{}").unwrap();
        assert!(read_proof(&path).unwrap_err().to_string().contains("unsupported"));
    }

    #[cfg(feature = "dev-backend")]
    #[tokio::test]
    async fn builder_defaults() {
        let engine = super::EngineBuilder::new(crate::attestation::MemoryAttestations::new())
            .config(crate::EngineConfig::default().with_prove_workers(1))
            .build()
            .unwrap();
        assert_eq!(engine.backend_name(), "dev-hmac");
        assert_eq!(engine.config().prove_workers, 1);
    }
}
