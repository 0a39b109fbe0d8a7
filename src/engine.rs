//! Proof lifecycle orchestrator
//!
//! Generation:
//! 1. resolve the attestation; check ownership, then eligibility;
//! 2. parse the raw inputs into a [`PredicateSpec`], bind the private value
//!    to the attested one and assemble the witness;
//! 3. derive the nullifier commitment;
//! 4. prove on the bounded pool, persist an `Unverified` record.
//!
//! Steps 1-3 run on the caller's task and fail fast. Step 4 runs as a
//! detached job: the caller waits up to the configured timeout and otherwise
//! receives a job id to poll. A job whose caller went away still persists its
//! record.
//!
//! Verification:
//! 1. load the record; terminal states answer from the record;
//! 2. backend `verify` (no lock held);
//! 3. atomic replay-guard insert of the nullifier commitment;
//! 4. compare-and-set the record to its terminal state.

use std::{fmt, sync::Arc, time::Duration, time::Instant};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn, Instrument};
use zeroize::Zeroize;

use crate::attestation::{Actor, Attestation, AttestationStatus, AttestationStore};
use crate::backend::BackendAdapter;
use crate::config::{EngineConfig, MAX_LIST_LIMIT};
use crate::error::ClaimProofError;
use crate::nullifier::{derive_nullifier_commitment, NullifierCommitment};
use crate::pool::{JobRegistry, JobStatus, ProverPool};
use crate::predicate::{PredicateKind, PredicateSpec};
use crate::record::{
    AttestationId, JobId, ProofId, ProofRecord, RejectionReason, ReplayInsert, ReplayStats,
    VerificationOutcome, VerificationState,
};
use crate::store::{ProofStore, ReplayGuard, StateTransition};
use crate::witness::{assemble_witness, Witness};

/// Raw generate call: `{ attestation_id, circuit_type, private_inputs, public_inputs }`.
///
/// String leaves of `private_inputs` are zeroized on drop.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateRequest {
    #[serde(alias = "attestationId")]
    pub attestation_id: AttestationId,
    #[serde(alias = "circuitType")]
    pub circuit_type: PredicateKind,
    #[serde(default, alias = "privateInputs")]
    pub private_inputs: Value,
    #[serde(default, alias = "publicInputs")]
    pub public_inputs: Value,
}

impl GenerateRequest {
    pub fn new(
        attestation_id: impl Into<AttestationId>,
        circuit_type: PredicateKind,
        private_inputs: Value,
        public_inputs: Value,
    ) -> Self {
        Self {
            attestation_id: attestation_id.into(),
            circuit_type,
            private_inputs,
            public_inputs,
        }
    }

    /// Parse a request body. Takes ownership so private strings are moved,
    /// not copied, into the request.
    pub fn from_value(v: Value) -> Result<Self, ClaimProofError> {
        serde_json::from_value(v)
            .map_err(|e| ClaimProofError::invalid(format!("malformed generate request: {e}")))
    }
}

fn scrub(v: &mut Value) {
    match v {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(scrub),
        Value::Object(map) => map.values_mut().for_each(scrub),
        _ => {}
    }
}

impl Drop for GenerateRequest {
    fn drop(&mut self) {
        scrub(&mut self.private_inputs);
    }
}

impl fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("attestation_id", &self.attestation_id)
            .field("circuit_type", &self.circuit_type)
            .field("private_inputs", &"<redacted>")
            .field("public_inputs", &self.public_inputs)
            .finish()
    }
}

struct EngineInner<S, A> {
    store: S,
    attestations: A,
    backend: BackendAdapter,
    pool: ProverPool,
    jobs: JobRegistry,
    config: EngineConfig,
}

/// Orchestrates generation and verification over a store, an attestation
/// source and a proving backend. Cheap to clone.
pub struct ProofEngine<S, A> {
    inner: Arc<EngineInner<S, A>>,
}

impl<S, A> Clone for ProofEngine<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, A> fmt::Debug for ProofEngine<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofEngine")
            .field("backend", &self.inner.backend)
            .field("pool", &self.inner.pool)
            .field("jobs", &self.inner.jobs)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S, A> ProofEngine<S, A>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    pub fn new(store: S, attestations: A, backend: BackendAdapter, config: EngineConfig) -> Self {
        let pool = ProverPool::new(config.prove_workers);
        let jobs = JobRegistry::new(config.job_retention);
        Self {
            inner: Arc::new(EngineInner {
                store,
                attestations,
                backend,
                pool,
                jobs,
                config,
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn attestations(&self) -> &A {
        &self.inner.attestations
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    // ------------------------------ Generation ------------------------------

    /// `generateProof`: submit and wait up to `prove_timeout`.
    ///
    /// On timeout the job keeps running and `GenerationPending(job_id)` is
    /// returned.
    pub async fn generate_proof(&self, req: GenerateRequest, actor: &Actor) -> Result<ProofRecord, ClaimProofError> {
        let job = self.submit_generation(req, actor).await?;
        self.await_job(&job, self.inner.config.prove_timeout).await
    }

    /// Validate, derive, and hand proving to the pool. Every caller-fixable
    /// error surfaces here, before any backend work.
    #[instrument(skip_all, fields(attestation_id = %req.attestation_id, kind = %req.circuit_type))]
    pub async fn submit_generation(&self, req: GenerateRequest, actor: &Actor) -> Result<JobId, ClaimProofError> {
        let attestation_id = req.attestation_id.clone();
        let attestation = self.resolve_attestation(&attestation_id, actor).await?;

        let spec = PredicateSpec::from_json(req.circuit_type, &req.private_inputs, &req.public_inputs)?;
        drop(req);
        if !spec.value_matches(&attestation.value) {
            return Err(ClaimProofError::invalid(
                "private_inputs: value does not match the attested value",
            ));
        }
        drop(attestation);

        let witness = assemble_witness(&spec)?;
        let nullifier = derive_nullifier_commitment(spec.nullifier_secret(), spec.kind());
        let kind = spec.kind();
        drop(spec);

        let handle = self.inner.jobs.register()?;
        let job_id = handle.id().clone();
        let inner = self.inner.clone();
        let owner = actor.subject.clone();
        let span = tracing::info_span!("generation", job_id = %job_id, attestation_id = %attestation_id, %kind);
        tokio::spawn(
            async move {
                let status = run_generation(&inner, witness, nullifier, attestation_id, owner).await;
                handle.complete(status);
            }
            .instrument(span),
        );
        debug!(job_id = %job_id, "generation submitted");
        Ok(job_id)
    }

    /// Wait for a job; `GenerationPending` if it is still running at `timeout`.
    pub async fn await_job(&self, job: &JobId, timeout: Duration) -> Result<ProofRecord, ClaimProofError> {
        match self.inner.jobs.wait(job, timeout).await? {
            JobStatus::Ready(record) => Ok(record),
            JobStatus::Failed(e) => Err(e),
            JobStatus::Pending => Err(ClaimProofError::GenerationPending(job.clone())),
        }
    }

    pub fn job_status(&self, job: &JobId) -> Result<JobStatus, ClaimProofError> {
        self.inner.jobs.status(job)
    }

    /// Forget finished jobs older than the retention window.
    pub fn prune_jobs(&self) -> usize {
        self.inner.jobs.prune()
    }

    async fn resolve_attestation(&self, id: &AttestationId, actor: &Actor) -> Result<Attestation, ClaimProofError> {
        let attestation = self
            .inner
            .attestations
            .get_attestation(id)
            .await?
            .ok_or_else(|| ClaimProofError::AttestationNotFound(id.clone()))?;
        // Ownership first, so non-owners learn nothing about status.
        if !actor.owns(&attestation) {
            warn!(attestation_id = %id, "actor does not own attestation");
            return Err(ClaimProofError::Unauthorized);
        }
        if attestation.status != AttestationStatus::Finalized {
            return Err(ClaimProofError::AttestationNotEligible {
                id: id.clone(),
                status: attestation.status,
            });
        }
        Ok(attestation)
    }

    // ------------------------------ Verification ------------------------------

    /// `verifyProof`. Idempotent for verified records; terminal errors repeat
    /// for rejected ones.
    #[instrument(skip_all, fields(proof_id = %proof_id))]
    pub async fn verify_proof(&self, proof_id: &ProofId) -> Result<VerificationOutcome, ClaimProofError> {
        let record = self.get_proof(proof_id).await?;
        if record.state.is_terminal() {
            debug!("answered from record state");
            return settled(&record);
        }

        let valid = self
            .inner
            .backend
            .verify(&record.public_inputs, &record.nullifier_commitment, &record.proof)?;
        if !valid {
            warn!("cryptographic verification failed");
            return self.reject(proof_id, RejectionReason::InvalidProof).await;
        }

        match self
            .inner
            .store
            .test_and_insert(&record.nullifier_commitment, proof_id)
            .await?
        {
            ReplayInsert::Inserted => {}
            // A previous attempt for this record got as far as the insert.
            ReplayInsert::AlreadyPresent(first) if &first == proof_id => {}
            ReplayInsert::AlreadyPresent(first) => {
                warn!(first_accepted = %first, "nullifier replay rejected");
                return self
                    .reject(proof_id, RejectionReason::NullifierReplayed { first_accepted: first })
                    .await;
            }
        }

        let verified_at = Utc::now();
        match self
            .inner
            .store
            .transition_state(proof_id, VerificationState::Verified { verified_at })
            .await?
        {
            StateTransition::Applied(r) => {
                info!(attestation_id = %r.attestation_id, kind = %r.circuit_type, "proof verified");
                Ok(VerificationOutcome {
                    proof_id: proof_id.clone(),
                    valid: true,
                    verified_at,
                    cached: false,
                })
            }
            StateTransition::Stale(current) => settled(&current),
            StateTransition::Missing => Err(ClaimProofError::ProofNotFound(proof_id.clone())),
        }
    }

    async fn reject(&self, proof_id: &ProofId, reason: RejectionReason) -> Result<VerificationOutcome, ClaimProofError> {
        let next = VerificationState::Rejected {
            reason: reason.clone(),
            rejected_at: Utc::now(),
        };
        match self.inner.store.transition_state(proof_id, next).await? {
            StateTransition::Applied(_) => Err(reason.to_error(proof_id)),
            StateTransition::Stale(current) => settled(&current),
            StateTransition::Missing => Err(ClaimProofError::ProofNotFound(proof_id.clone())),
        }
    }

    // ------------------------------ Queries ------------------------------

    pub async fn get_proof(&self, proof_id: &ProofId) -> Result<ProofRecord, ClaimProofError> {
        self.inner
            .store
            .get_record(proof_id)
            .await?
            .ok_or_else(|| ClaimProofError::ProofNotFound(proof_id.clone()))
    }

    /// `get_proof` scoped to the generating subject. Other subjects get
    /// `ProofNotFound`, so existence is not disclosed.
    pub async fn get_proof_for_actor(&self, proof_id: &ProofId, actor: &Actor) -> Result<ProofRecord, ClaimProofError> {
        let record = self.get_proof(proof_id).await?;
        if !record.is_owned_by(actor) {
            return Err(ClaimProofError::ProofNotFound(proof_id.clone()));
        }
        Ok(record)
    }

    /// The actor's own proofs, newest first; `limit` is clamped to
    /// `1..=MAX_LIST_LIMIT`.
    pub async fn list_proofs_for_actor(
        &self,
        actor: &Actor,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProofRecord>, ClaimProofError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        Ok(self.inner.store.list_for_owner(actor, limit, offset).await?)
    }

    /// Newest first; `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub async fn list_proofs_for_attestation(
        &self,
        id: &AttestationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProofRecord>, ClaimProofError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        Ok(self.inner.store.list_for_attestation(id, limit, offset).await?)
    }

    pub async fn replay_stats(&self) -> Result<ReplayStats, ClaimProofError> {
        Ok(self.inner.store.stats().await?)
    }
}

/// Outcome implied by a terminal record.
fn settled(record: &ProofRecord) -> Result<VerificationOutcome, ClaimProofError> {
    match &record.state {
        VerificationState::Verified { verified_at } => Ok(VerificationOutcome {
            proof_id: record.id.clone(),
            valid: true,
            verified_at: *verified_at,
            cached: true,
        }),
        VerificationState::Rejected { reason, .. } => Err(reason.to_error(&record.id)),
        VerificationState::Unverified => Err(ClaimProofError::Storage(format!(
            "record {} reported stale while unverified",
            record.id
        ))),
    }
}

async fn run_generation<S, A>(
    inner: &EngineInner<S, A>,
    witness: Witness,
    nullifier: NullifierCommitment,
    attestation_id: AttestationId,
    owner: String,
) -> JobStatus
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let public_inputs = witness.public_inputs().clone();
    let backend = inner.backend.clone();
    let started = Instant::now();
    // The witness moves into the blocking task and is zeroized there.
    let proved = inner
        .pool
        .run(move || backend.prove(&witness, &nullifier))
        .await
        .and_then(|r| r);
    let proof = match proved {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "proof generation failed");
            return JobStatus::Failed(e);
        }
    };

    let record = ProofRecord::new(attestation_id, owner, public_inputs, proof, nullifier);
    match inner.store.insert_record(&record).await {
        Ok(()) => {
            info!(
                proof_id = %record.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "proof generated"
            );
            JobStatus::Ready(record)
        }
        Err(e) => {
            error!(error = %e, "persisting proof record failed");
            JobStatus::Failed(e.into())
        }
    }
}

#[cfg(all(test, feature = "dev-backend"))]
mod tests {
    use super::*;
    use crate::attestation::MemoryAttestations;
    use crate::dev_backend::DevBackend;
    use crate::predicate::ClaimValue;
    use crate::store::MemoryStore;
    use serde_json::json;

    const SECRET: &str = "0x0123456789abcdef0123456789abcdef";

    fn engine() -> ProofEngine<MemoryStore, MemoryAttestations> {
        let atts = MemoryAttestations::new();
        for (id, status) in [
            ("att-ok", AttestationStatus::Finalized),
            ("att-pending", AttestationStatus::Pending),
        ] {
            atts.insert(Attestation {
                id: id.into(),
                owner_subject: "alice".into(),
                status,
                value: ClaimValue::Integer(25),
            })
            .unwrap();
        }
        ProofEngine::new(
            MemoryStore::new(),
            atts,
            BackendAdapter::new(DevBackend::random()),
            EngineConfig::default().with_prove_workers(2),
        )
    }

    fn threshold(att: &str, value: u64, threshold: u64) -> GenerateRequest {
        GenerateRequest::new(
            att,
            PredicateKind::Threshold,
            json!({ "value": value, "nullifier_secret": SECRET }),
            json!({ "threshold": threshold }),
        )
    }

    #[tokio::test]
    async fn authorization_precedes_eligibility() {
        let e = engine();
        let bob = Actor::new("bob");
        let err = e.generate_proof(threshold("att-pending", 25, 18), &bob).await.unwrap_err();
        assert_eq!(err, ClaimProofError::Unauthorized);

        let alice = Actor::new("alice");
        let err = e.generate_proof(threshold("att-pending", 25, 18), &alice).await.unwrap_err();
        assert_eq!(err.code(), "attestation_not_eligible");

        let err = e.generate_proof(threshold("att-missing", 25, 18), &alice).await.unwrap_err();
        assert_eq!(err.code(), "attestation_not_found");
    }

    #[tokio::test]
    async fn value_must_match_attestation() {
        let e = engine();
        let err = e
            .generate_proof(threshold("att-ok", 30, 18), &Actor::new("alice"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(!err.to_string().contains("30"));
    }

    #[tokio::test]
    async fn unsatisfied_predicate_persists_nothing() {
        let e = engine();
        let err = e
            .generate_proof(threshold("att-ok", 25, 26), &Actor::new("alice"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "proof_generation_failed");
        let listed = e.list_proofs_for_attestation(&"att-ok".into(), 10, 0).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn generate_then_verify_then_cached() {
        let e = engine();
        let record = e
            .generate_proof(threshold("att-ok", 25, 18), &Actor::new("alice"))
            .await
            .unwrap();
        assert!(!record.verified());

        let first = e.verify_proof(&record.id).await.unwrap();
        assert!(first.valid && !first.cached);
        let second = e.verify_proof(&record.id).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.verified_at, first.verified_at);
        assert_eq!(e.store().replay_insert_attempts(), 1);

        assert!(e.get_proof(&record.id).await.unwrap().verified());
        assert_eq!(e.replay_stats().await.unwrap().accepted_commitments, 1);
    }

    #[tokio::test]
    async fn proofs_are_scoped_to_their_generator() {
        let e = engine();
        let alice = Actor::new("alice");
        let record = e.generate_proof(threshold("att-ok", 25, 18), &alice).await.unwrap();
        assert_eq!(record.owner_subject, "alice");

        assert_eq!(e.get_proof_for_actor(&record.id, &alice).await.unwrap().id, record.id);
        let err = e.get_proof_for_actor(&record.id, &Actor::new("bob")).await.unwrap_err();
        assert_eq!(err, ClaimProofError::ProofNotFound(record.id.clone()));

        let mine = e.list_proofs_for_actor(&alice, 50, 0).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert!(e.list_proofs_for_actor(&Actor::new("bob"), 50, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids() {
        let e = engine();
        assert_eq!(
            e.verify_proof(&ProofId::from("nope")).await.unwrap_err().code(),
            "proof_not_found"
        );
        assert_eq!(e.job_status(&JobId::from("nope")).unwrap_err().code(), "job_not_found");
    }

    #[test]
    fn request_parsing_accepts_camel_case_and_redacts() {
        let req = GenerateRequest::from_value(json!({
            "attestationId": "att-ok",
            "circuitType": "range",
            "private_inputs": { "value": 31337, "nullifier_secret": SECRET },
            "public_inputs": { "min": 1, "max": 99999 }
        }))
        .unwrap();
        assert_eq!(req.circuit_type, PredicateKind::Range);
        assert!(!format!("{req:?}").contains("31337"));
        assert!(GenerateRequest::from_value(json!({ "attestation_id": "a" })).is_err());
        assert!(GenerateRequest::from_value(json!({
            "attestation_id": "a", "circuit_type": "threshold", "extra": 1
        }))
        .is_err());
    }
}
