//! Proof persistence and the replay guard
//!
//! Two seams, both implemented by [`MemoryStore`] and by
//! [`crate::kvs::KvsStore`]:
//!
//! - [`ProofStore`]: record CRUD plus a compare-and-set state transition that
//!   only applies to `Unverified` records, so a record reaches a terminal
//!   state at most once even under concurrent verifiers.
//! - [`ReplayGuard`]: the set of accepted nullifier commitments with an atomic
//!   `test_and_insert`. This is the only cross-request mutable state on the
//!   verification path; no lock is held across the backend `verify` call.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use chrono::Utc;

use crate::attestation::Actor;
use crate::error::StoreError;
use crate::nullifier::NullifierCommitment;
use crate::record::{
    AttestationId, ProofId, ProofRecord, ReplayEntry, ReplayInsert, ReplayStats, VerificationState,
};

/// Outcome of [`ProofStore::transition_state`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateTransition {
    /// The record was `Unverified` and now carries the new state.
    Applied(ProofRecord),
    /// The record was already terminal; returned unchanged.
    Stale(ProofRecord),
    Missing,
}

/// Persistence for [`ProofRecord`]s.
pub trait ProofStore: Send + Sync + 'static {
    /// Insert a fresh record; `Duplicate` if the id exists.
    fn insert_record(&self, record: &ProofRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_record(&self, id: &ProofId) -> impl Future<Output = Result<Option<ProofRecord>, StoreError>> + Send;

    /// Move an `Unverified` record to `next`. Atomic per record.
    fn transition_state(
        &self,
        id: &ProofId,
        next: VerificationState,
    ) -> impl Future<Output = Result<StateTransition, StoreError>> + Send;

    /// Records for one attestation, newest first.
    fn list_for_attestation(
        &self,
        id: &AttestationId,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<ProofRecord>, StoreError>> + Send;

    /// Records generated by `actor`, newest first.
    fn list_for_owner(
        &self,
        actor: &Actor,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<ProofRecord>, StoreError>> + Send;
}

/// Accepted-nullifier set.
pub trait ReplayGuard: Send + Sync + 'static {
    /// Atomically insert `commitment → proof_id` unless an entry exists.
    fn test_and_insert(
        &self,
        commitment: &NullifierCommitment,
        proof_id: &ProofId,
    ) -> impl Future<Output = Result<ReplayInsert, StoreError>> + Send;

    fn get_entry(
        &self,
        commitment: &NullifierCommitment,
    ) -> impl Future<Output = Result<Option<ReplayEntry>, StoreError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<ReplayStats, StoreError>> + Send;
}

// ------------------------------ In-memory ------------------------------

#[derive(Default)]
struct Records {
    by_id: HashMap<ProofId, ProofRecord>,
    by_attestation: HashMap<AttestationId, Vec<ProofId>>,
    by_owner: HashMap<String, Vec<ProofId>>,
}

impl Records {
    fn page(&self, ids: Option<&Vec<ProofId>>, limit: usize, offset: usize) -> Vec<ProofRecord> {
        let Some(ids) = ids else {
            return Vec::new();
        };
        let mut out: Vec<ProofRecord> = ids.iter().filter_map(|p| self.by_id.get(p).cloned()).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        out.into_iter().skip(offset).take(limit).collect()
    }
}

/// Mutex-guarded in-process store. Records and the replay set sit behind
/// separate locks.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
    replay: Mutex<HashMap<NullifierCommitment, ReplayEntry>>,
    insert_attempts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `test_and_insert` calls observed (diagnostics).
    pub fn replay_insert_attempts(&self) -> u64 {
        self.insert_attempts.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("replay_insert_attempts", &self.replay_insert_attempts())
            .finish_non_exhaustive()
    }
}

impl ProofStore for MemoryStore {
    async fn insert_record(&self, record: &ProofRecord) -> Result<(), StoreError> {
        let mut g = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        if g.by_id.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.to_string()));
        }
        g.by_attestation
            .entry(record.attestation_id.clone())
            .or_default()
            .push(record.id.clone());
        g.by_owner
            .entry(record.owner_subject.clone())
            .or_default()
            .push(record.id.clone());
        g.by_id.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &ProofId) -> Result<Option<ProofRecord>, StoreError> {
        let g = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(g.by_id.get(id).cloned())
    }

    async fn transition_state(
        &self,
        id: &ProofId,
        next: VerificationState,
    ) -> Result<StateTransition, StoreError> {
        let mut g = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(record) = g.by_id.get_mut(id) else {
            return Ok(StateTransition::Missing);
        };
        if record.state.is_terminal() {
            return Ok(StateTransition::Stale(record.clone()));
        }
        record.state = next;
        Ok(StateTransition::Applied(record.clone()))
    }

    async fn list_for_attestation(
        &self,
        id: &AttestationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProofRecord>, StoreError> {
        let g = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(g.page(g.by_attestation.get(id), limit, offset))
    }

    async fn list_for_owner(
        &self,
        actor: &Actor,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProofRecord>, StoreError> {
        let g = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(g.page(g.by_owner.get(&actor.subject), limit, offset))
    }
}

impl ReplayGuard for MemoryStore {
    async fn test_and_insert(
        &self,
        commitment: &NullifierCommitment,
        proof_id: &ProofId,
    ) -> Result<ReplayInsert, StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::Relaxed);
        let mut g = self.replay.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(existing) = g.get(commitment) {
            return Ok(ReplayInsert::AlreadyPresent(existing.first_accepted_proof_id.clone()));
        }
        g.insert(
            *commitment,
            ReplayEntry {
                nullifier_commitment: *commitment,
                first_accepted_proof_id: proof_id.clone(),
                accepted_at: Utc::now(),
            },
        );
        Ok(ReplayInsert::Inserted)
    }

    async fn get_entry(&self, commitment: &NullifierCommitment) -> Result<Option<ReplayEntry>, StoreError> {
        let g = self.replay.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(g.get(commitment).cloned())
    }

    async fn stats(&self) -> Result<ReplayStats, StoreError> {
        let g = self.replay.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(ReplayStats {
            accepted_commitments: g.len() as u64,
            oldest_accepted_at: g.values().map(|e| e.accepted_at).min(),
        })
    }
}
