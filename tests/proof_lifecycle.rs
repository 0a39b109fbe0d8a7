//! End-to-end proof lifecycle over the in-memory store and the dev backend.

#![cfg(feature = "dev-backend")]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use serde_json::{json, Value};

use claimproof::{
    attestation::MemoryAttestations,
    backend::{BackendAdapter, BackendProof, CircuitInput},
    dev_backend::DevBackend,
    Actor, Attestation, AttestationStatus, BackendError, CircuitId, ClaimProofError, ClaimValue,
    EngineConfig, GenerateRequest, MemoryStore, PredicateKind, ProofEngine, ProofRecord,
    ProofStore, ProvingBackend, F,
};

const SECRET: &str = "0x00112233445566778899aabbccddeeff";
const OTHER_SECRET: &str = "0xffeeddccbbaa99887766554433221100";
const THIRD_SECRET: &str = "0x0f0e0d0c0b0a09080706050403020100";
const OWNER: &str = "alice";

type Engine = ProofEngine<MemoryStore, MemoryAttestations>;

fn attestations(values: &[(&str, ClaimValue)]) -> MemoryAttestations {
    let atts = MemoryAttestations::new();
    for (id, value) in values {
        atts.insert(Attestation {
            id: (*id).into(),
            owner_subject: OWNER.into(),
            status: AttestationStatus::Finalized,
            value: value.clone(),
        })
        .unwrap();
    }
    atts
}

fn engine_with(atts: MemoryAttestations, backend: BackendAdapter, config: EngineConfig) -> Engine {
    ProofEngine::new(MemoryStore::new(), atts, backend, config)
}

fn engine(values: &[(&str, ClaimValue)]) -> Engine {
    engine_with(
        attestations(values),
        BackendAdapter::new(DevBackend::random()),
        EngineConfig::default().with_prove_workers(2),
    )
}

fn request(att: &str, kind: PredicateKind, value: Value, secret: &str, public: Value) -> GenerateRequest {
    GenerateRequest::new(att, kind, json!({ "value": value, "nullifier_secret": secret }), public)
}

async fn prove(e: &Engine, req: GenerateRequest) -> Result<ProofRecord, ClaimProofError> {
    e.generate_proof(req, &Actor::new(OWNER)).await
}

#[tokio::test]
async fn age_threshold_scenario_blocks_reuse_of_the_nullifier() {
    let e = engine(&[
        ("age-25", ClaimValue::Integer(25)),
        ("age-30", ClaimValue::Integer(30)),
    ]);
    let first = prove(
        &e,
        request("age-25", PredicateKind::Threshold, json!(25), SECRET, json!({ "threshold": 18 })),
    )
    .await
    .unwrap();
    let outcome = e.verify_proof(&first.id).await.unwrap();
    assert!(outcome.valid);

    // A different value, same secret and predicate kind: same commitment.
    let second = prove(
        &e,
        request("age-30", PredicateKind::Threshold, json!(30), SECRET, json!({ "threshold": 18 })),
    )
    .await
    .unwrap();
    assert_eq!(second.nullifier_commitment, first.nullifier_commitment);
    let err = e.verify_proof(&second.id).await.unwrap_err();
    assert_eq!(
        err,
        ClaimProofError::NullifierReplayed {
            proof_id: second.id.clone(),
            first_accepted: first.id.clone(),
        }
    );

    // Rejection is terminal and repeats; the first proof stays verified.
    assert_eq!(e.verify_proof(&second.id).await.unwrap_err(), err);
    assert!(!e.get_proof(&second.id).await.unwrap().verified());
    assert!(e.verify_proof(&first.id).await.unwrap().cached);
    assert_eq!(e.replay_stats().await.unwrap().accepted_commitments, 1);
}

#[tokio::test]
async fn unsatisfied_predicates_cannot_be_proven() {
    let e = engine(&[
        ("age", ClaimValue::Integer(17)),
        ("country", ClaimValue::Text("FR".into())),
    ]);
    let err = prove(&e, request("age", PredicateKind::Threshold, json!(17), SECRET, json!({ "threshold": 18 })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "proof_generation_failed");

    let err = prove(&e, request("age", PredicateKind::Range, json!(17), SECRET, json!({ "min": 18, "max": 65 })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "proof_generation_failed");

    let err = prove(
        &e,
        request(
            "country",
            PredicateKind::SetMembership,
            json!("FR"),
            SECRET,
            json!({ "allowed_set": ["DE", "NL"] }),
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "proof_generation_failed");

    // Inverted range is caught before any backend work.
    let err = prove(&e, request("age", PredicateKind::Range, json!(17), SECRET, json!({ "min": 20, "max": 10 })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");

    assert!(e.list_proofs_for_attestation(&"age".into(), 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn tampered_public_inputs_fail_verification() {
    let e = engine(&[("age", ClaimValue::Integer(25))]);
    let genuine = prove(&e, request("age", PredicateKind::Threshold, json!(25), SECRET, json!({ "threshold": 18 })))
        .await
        .unwrap();

    // Same proof bytes presented as evidence of a stronger claim.
    let forged = ProofRecord::new(
        genuine.attestation_id.clone(),
        genuine.owner_subject.clone(),
        claimproof::PublicInputs::Threshold { threshold: 21 },
        genuine.proof.clone(),
        genuine.nullifier_commitment,
    );
    e.store().insert_record(&forged).await.unwrap();
    let err = e.verify_proof(&forged.id).await.unwrap_err();
    assert_eq!(err, ClaimProofError::ProofVerificationFailed(forged.id.clone()));
    assert!(err.is_terminal());

    // The forgery never reached the replay guard, so the genuine proof verifies.
    assert!(e.verify_proof(&genuine.id).await.unwrap().valid);
}

#[tokio::test]
async fn records_and_responses_carry_no_private_data() {
    let e = engine(&[("salary", ClaimValue::Integer(987_654_321))]);
    let record = prove(
        &e,
        request(
            "salary",
            PredicateKind::Range,
            json!(987_654_321u64),
            SECRET,
            json!({ "min": 50_000, "max": 2_000_000_000u64 }),
        ),
    )
    .await
    .unwrap();
    let outcome = e.verify_proof(&record.id).await.unwrap();

    let secret_hex = SECRET.trim_start_matches("0x");
    for text in [
        serde_json::to_string(&e.get_proof(&record.id).await.unwrap()).unwrap(),
        serde_json::to_string(&outcome).unwrap(),
        format!("{record:?}"),
    ] {
        assert!(!text.contains("987654321"), "value leaked: {text}");
        assert!(!text.contains(secret_hex), "secret leaked: {text}");
    }
}

/// `io::Write` into a buffer shared with the test.
#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// Current-thread runtime: the engine's tasks run where the default
// subscriber is installed.
#[tokio::test(flavor = "current_thread")]
async fn logs_carry_no_private_data() {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let e = engine(&[
        ("salary", ClaimValue::Integer(987_654_321)),
        ("salary-2", ClaimValue::Integer(987_654_321)),
    ]);
    let public = json!({ "min": 50_000, "max": 2_000_000_000u64 });
    let record = prove(&e, request("salary", PredicateKind::Range, json!(987_654_321u64), SECRET, public.clone()))
        .await
        .unwrap();
    e.verify_proof(&record.id).await.unwrap();

    // Replayed nullifier, unsatisfied predicate, value mismatch.
    let replay = prove(&e, request("salary-2", PredicateKind::Range, json!(987_654_321u64), SECRET, public))
        .await
        .unwrap();
    assert!(e.verify_proof(&replay.id).await.is_err());
    let tight = json!({ "min": 1, "max": 10 });
    assert!(prove(&e, request("salary", PredicateKind::Range, json!(987_654_321u64), SECRET, tight))
        .await
        .is_err());
    assert!(prove(
        &e,
        request("salary", PredicateKind::Threshold, json!(987_654_320u64), SECRET, json!({ "threshold": 1 }))
    )
    .await
    .is_err());

    let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("proof generated"), "nothing captured: {logs}");
    assert!(logs.contains("nullifier replay rejected"));
    for needle in ["987654321", "987654320", SECRET.trim_start_matches("0x")] {
        assert!(!logs.contains(needle), "{needle} leaked into logs:\n{logs}");
    }
}

#[tokio::test]
async fn commitments_are_deterministic_and_kind_separated() {
    let e = engine(&[
        ("a", ClaimValue::Integer(40)),
        ("b", ClaimValue::Integer(40)),
    ]);
    let t1 = prove(&e, request("a", PredicateKind::Threshold, json!(40), SECRET, json!({ "threshold": 18 })))
        .await
        .unwrap();
    let t2 = prove(&e, request("b", PredicateKind::Threshold, json!(40), SECRET, json!({ "threshold": 30 })))
        .await
        .unwrap();
    let r = prove(&e, request("a", PredicateKind::Range, json!(40), SECRET, json!({ "min": 18, "max": 65 })))
        .await
        .unwrap();
    let other = prove(&e, request("a", PredicateKind::Threshold, json!(40), OTHER_SECRET, json!({ "threshold": 18 })))
        .await
        .unwrap();

    assert_eq!(t1.nullifier_commitment, t2.nullifier_commitment);
    assert_ne!(t1.nullifier_commitment, r.nullifier_commitment);
    assert_ne!(t1.nullifier_commitment, other.nullifier_commitment);
    assert_eq!(
        t1.nullifier_commitment,
        claimproof::derive_nullifier_commitment(
            &claimproof::NullifierSecret::from_hex(SECRET).unwrap(),
            PredicateKind::Threshold
        )
    );
}

#[tokio::test]
async fn verification_is_idempotent() {
    let e = engine(&[("age", ClaimValue::Integer(25))]);
    let record = prove(&e, request("age", PredicateKind::Threshold, json!(25), SECRET, json!({ "threshold": 25 })))
        .await
        .unwrap();
    let first = e.verify_proof(&record.id).await.unwrap();
    for _ in 0..3 {
        let again = e.verify_proof(&record.id).await.unwrap();
        assert!(again.valid && again.cached);
        assert_eq!(again.verified_at, first.verified_at);
    }
    assert_eq!(e.store().replay_insert_attempts(), 1);
    assert_eq!(e.get_proof(&record.id).await.unwrap().verified_at(), Some(first.verified_at));
}

#[tokio::test]
async fn range_boundaries_and_singleton_set() {
    let e = engine(&[
        ("lo", ClaimValue::Integer(18)),
        ("hi", ClaimValue::Integer(65)),
        ("zero", ClaimValue::Integer(0)),
        ("country", ClaimValue::Text("DE".into())),
    ]);
    for (att, v, secret) in [("lo", 18, SECRET), ("hi", 65, OTHER_SECRET)] {
        let r = prove(&e, request(att, PredicateKind::Range, json!(v), secret, json!({ "min": 18, "max": 65 })))
            .await
            .unwrap();
        assert!(e.verify_proof(&r.id).await.unwrap().valid);
    }
    let r = prove(&e, request("zero", PredicateKind::Range, json!(0), THIRD_SECRET, json!({ "min": 0, "max": 0 })))
        .await
        .unwrap();
    assert!(e.verify_proof(&r.id).await.unwrap().valid);

    let r = prove(
        &e,
        request("country", PredicateKind::SetMembership, json!("DE"), SECRET, json!({ "allowed_set": ["DE"] })),
    )
    .await
    .unwrap();
    assert!(e.verify_proof(&r.id).await.unwrap().valid);
}

#[tokio::test]
async fn set_membership_is_order_independent() {
    let e = engine(&[
        ("c1", ClaimValue::Text("NL".into())),
        ("c2", ClaimValue::Text("NL".into())),
    ]);
    let a = prove(
        &e,
        request("c1", PredicateKind::SetMembership, json!("NL"), SECRET, json!({ "allowed_set": ["DE", "NL", 7] })),
    )
    .await
    .unwrap();
    let b = prove(
        &e,
        request("c2", PredicateKind::SetMembership, json!("NL"), OTHER_SECRET, json!({ "set": [7, "NL", "DE"] })),
    )
    .await
    .unwrap();
    assert_eq!(a.public_inputs, b.public_inputs);
    assert!(e.verify_proof(&a.id).await.unwrap().valid);
    assert!(e.verify_proof(&b.id).await.unwrap().valid);

    let err = prove(
        &e,
        request("c1", PredicateKind::SetMembership, json!("NL"), SECRET, json!({ "allowed_set": ["NL", "NL"] })),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verifications_accept_exactly_one_commitment() {
    const N: usize = 8;
    let ids: Vec<String> = (0..N).map(|i| format!("att-{i}")).collect();
    let values: Vec<(&str, ClaimValue)> = ids.iter().map(|id| (id.as_str(), ClaimValue::Integer(50))).collect();
    let e = engine(&values);

    let mut records = Vec::new();
    for id in &ids {
        records.push(
            prove(&e, request(id, PredicateKind::Threshold, json!(50), SECRET, json!({ "threshold": 21 })))
                .await
                .unwrap(),
        );
    }

    let mut tasks = Vec::new();
    for r in &records {
        for _ in 0..2 {
            let e = e.clone();
            let id = r.id.clone();
            tasks.push(tokio::spawn(async move { (id.clone(), e.verify_proof(&id).await) }));
        }
    }
    let mut winners = std::collections::HashSet::new();
    for t in tasks {
        let (id, result) = t.await.unwrap();
        match result {
            Ok(outcome) => {
                assert!(outcome.valid);
                winners.insert(id);
            }
            Err(ClaimProofError::NullifierReplayed { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(e.replay_stats().await.unwrap().accepted_commitments, 1);

    let mut verified = 0;
    for r in &records {
        if e.get_proof(&r.id).await.unwrap().verified() {
            verified += 1;
        }
    }
    assert_eq!(verified, 1);
}

#[tokio::test]
async fn slow_generation_hands_back_a_job_and_still_persists() {
    let backend = DevBackend::random().with_latency(Duration::from_millis(300));
    let e = engine_with(
        attestations(&[("age", ClaimValue::Integer(25))]),
        BackendAdapter::new(backend),
        EngineConfig::default()
            .with_prove_workers(1)
            .with_prove_timeout(Duration::from_millis(20)),
    );
    let err = prove(&e, request("age", PredicateKind::Threshold, json!(25), SECRET, json!({ "threshold": 18 })))
        .await
        .unwrap_err();
    let job = match err {
        ClaimProofError::GenerationPending(job) => job,
        other => panic!("expected pending, got {other}"),
    };
    assert!(e.job_status(&job).unwrap().is_pending());

    let record = e.await_job(&job, Duration::from_secs(10)).await.unwrap();
    assert_eq!(e.get_proof(&record.id).await.unwrap().id, record.id);
    assert_eq!(e.job_status(&job).unwrap().as_str(), "ready");
}

/// Dev backend whose `verify` can be switched off.
struct Flaky {
    inner: DevBackend,
    down: Arc<AtomicBool>,
}

impl ProvingBackend for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn prove(&self, circuit: CircuitId, input: &CircuitInput) -> Result<BackendProof, BackendError> {
        self.inner.prove(circuit, input)
    }

    fn verify(&self, circuit: CircuitId, public_signals: &[F], proof: &[u8]) -> Result<bool, BackendError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("maintenance".into()));
        }
        self.inner.verify(circuit, public_signals, proof)
    }
}

#[tokio::test]
async fn backend_outage_leaves_record_unverified() {
    let down = Arc::new(AtomicBool::new(false));
    let e = engine_with(
        attestations(&[("age", ClaimValue::Integer(25))]),
        BackendAdapter::new(Flaky {
            inner: DevBackend::random(),
            down: down.clone(),
        }),
        EngineConfig::default().with_prove_workers(1),
    );
    let record = prove(&e, request("age", PredicateKind::Threshold, json!(25), SECRET, json!({ "threshold": 18 })))
        .await
        .unwrap();

    down.store(true, Ordering::SeqCst);
    let err = e.verify_proof(&record.id).await.unwrap_err();
    assert_eq!(err.code(), "backend_unavailable");
    assert!(err.is_retryable());
    assert!(!e.get_proof(&record.id).await.unwrap().state.is_terminal());
    assert_eq!(e.replay_stats().await.unwrap().accepted_commitments, 0);

    down.store(false, Ordering::SeqCst);
    assert!(e.verify_proof(&record.id).await.unwrap().valid);
}

#[tokio::test]
async fn listing_is_newest_first_and_paged() {
    let e = engine(&[("age", ClaimValue::Integer(25))]);
    let mut ids = Vec::new();
    for t in [10, 15, 20] {
        let r = prove(&e, request("age", PredicateKind::Threshold, json!(25), SECRET, json!({ "threshold": t })))
            .await
            .unwrap();
        ids.push(r.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let all = e.list_proofs_for_attestation(&"age".into(), 10, 0).await.unwrap();
    let listed: Vec<_> = all.iter().map(|r| r.id.clone()).collect();
    ids.reverse();
    assert_eq!(listed, ids);

    let page = e.list_proofs_for_attestation(&"age".into(), 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[1]);
    // limit 0 is clamped up to 1
    assert_eq!(e.list_proofs_for_attestation(&"age".into(), 0, 0).await.unwrap().len(), 1);
}
