//! claimproof_api: REST façade for claim-proof generation and verification.
//!
//! Authentication happens at the gateway, which forwards the authenticated
//! subject in `X-Subject`.
//!
//! Endpoints (JSON):
//! - GET  /v1/health
//! - GET  /v1/version
//! - POST /v1/proofs                     (X-Subject) { attestation_id, circuit_type, private_inputs, public_inputs }
//!                                       -> 201 proof view | 202 { job_id, status: "pending" }
//! - GET  /v1/proofs                     (X-Subject) ?limit&offset -> { proofs: [...], count }
//! - GET  /v1/jobs/:id                   -> { job_id, status, proof?, error? }
//! - GET  /v1/proofs/:id                 -> proof view (scoped to X-Subject when present)
//! - POST /v1/proofs/:id/verify          -> { valid, verified_at, cached }
//! - GET  /v1/attestations/:id/proofs    ?limit&offset -> { proofs: [...] }
//! - GET  /v1/replay/stats               -> { accepted_commitments, oldest_accepted_at }
//!
//! Errors are `{ error: <code>, message }` with a status per error kind.
//!
//! Persistence: Upstash Redis when `UPSTASH_REDIS_REST_URL`/`_TOKEN` are set,
//! in-memory otherwise. Attestations come from `CLAIMPROOF_ATTESTATIONS`
//! (JSON file) or, with Upstash, from the `claimproof:att:*` keys.

#![forbid(unsafe_code)]

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use claimproof::{
    attestation::MemoryAttestations,
    backend::BackendAdapter,
    config::init_tracing,
    dev_backend::DevBackend,
    kvs::KvsStore,
    pool::JobStatus,
    Actor, AttestationId, AttestationStore, ClaimProofError, EngineConfig, GenerateRequest, JobId,
    MemoryStore, NullifierCommitment, PredicateKind, ProofEngine, ProofId, ProofRecord, ProofStore,
    PublicInputs, ReplayGuard, VerificationState,
};

const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_OWN_LIST_LIMIT: usize = 50;

// ------------------------------ State ------------------------------

struct AppState<S, A> {
    engine: ProofEngine<S, A>,
}

impl<S, A> Clone for AppState<S, A> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

// ------------------------------ Errors ------------------------------

struct ApiError(ClaimProofError);

impl From<ClaimProofError> for ApiError {
    fn from(e: ClaimProofError) -> Self {
        Self(e)
    }
}

fn status_for(e: &ClaimProofError) -> StatusCode {
    match e {
        ClaimProofError::InvalidInput(_) | ClaimProofError::ProofGenerationFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ClaimProofError::AttestationNotFound(_)
        | ClaimProofError::JobNotFound(_)
        | ClaimProofError::ProofNotFound(_) => StatusCode::NOT_FOUND,
        ClaimProofError::AttestationNotEligible { .. } | ClaimProofError::NullifierReplayed { .. } => {
            StatusCode::CONFLICT
        }
        ClaimProofError::Unauthorized => StatusCode::FORBIDDEN,
        ClaimProofError::GenerationPending(_) => StatusCode::ACCEPTED,
        ClaimProofError::ProofVerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ClaimProofError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ClaimProofError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_body(e: &ClaimProofError) -> Value {
    json!({ "error": e.code(), "message": e.to_string() })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        }
        (status, Json(error_body(&self.0))).into_response()
    }
}

fn actor_from(headers: &HeaderMap) -> Result<Actor, Response> {
    headers
        .get("x-subject")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Actor::new)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthenticated", "message": "missing X-Subject header" })),
            )
                .into_response()
        })
}

// ------------------------------ Views ------------------------------

/// Public view of a record. Carries nothing private.
#[derive(Serialize)]
struct ProofView {
    id: ProofId,
    attestation_id: AttestationId,
    owner_subject: String,
    circuit_type: PredicateKind,
    public_inputs: PublicInputs,
    proof: String,
    nullifier_commitment: NullifierCommitment,
    verified: bool,
    verification: VerificationState,
    created_at: DateTime<Utc>,
}

impl From<&ProofRecord> for ProofView {
    fn from(r: &ProofRecord) -> Self {
        Self {
            id: r.id.clone(),
            attestation_id: r.attestation_id.clone(),
            owner_subject: r.owner_subject.clone(),
            circuit_type: r.circuit_type,
            public_inputs: r.public_inputs.clone(),
            proof: base64::engine::general_purpose::STANDARD.encode(&r.proof),
            nullifier_commitment: r.nullifier_commitment,
            verified: r.verified(),
            verification: r.state.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Version {
    api: &'static str,
    backend: &'static str,
    circuits: Vec<&'static str>,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

// ------------------------------ Handlers ------------------------------

async fn health() -> impl IntoResponse {
    Json(Health { status: "ok" })
}

async fn version<S, A>(State(st): State<AppState<S, A>>) -> impl IntoResponse
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    Json(Version {
        api: concat!("claimproof-api/", env!("CARGO_PKG_VERSION")),
        backend: st.engine.backend_name(),
        circuits: PredicateKind::ALL
            .iter()
            .map(|k| claimproof::CircuitId::for_kind(*k).as_str())
            .collect(),
    })
}

async fn generate<S, A>(
    State(st): State<AppState<S, A>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let actor = match actor_from(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let req = match GenerateRequest::from_value(body) {
        Ok(r) => r,
        Err(e) => return ApiError(e).into_response(),
    };
    match st.engine.generate_proof(req, &actor).await {
        Ok(record) => (StatusCode::CREATED, Json(ProofView::from(&record))).into_response(),
        Err(ClaimProofError::GenerationPending(job_id)) => (
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": job_id, "status": "pending" })),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn job<S, A>(
    State(st): State<AppState<S, A>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let job_id = JobId::new(id);
    let status = st.engine.job_status(&job_id)?;
    let mut body = json!({ "job_id": job_id, "status": status.as_str() });
    match &status {
        JobStatus::Ready(record) => body["proof"] = json!(ProofView::from(record)),
        JobStatus::Failed(e) => body["error"] = error_body(e),
        JobStatus::Pending => {}
    }
    Ok(Json(body))
}

async fn get_proof<S, A>(
    State(st): State<AppState<S, A>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProofView>, ApiError>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let id = ProofId::new(id);
    let record = match actor_from(&headers) {
        Ok(actor) => st.engine.get_proof_for_actor(&id, &actor).await?,
        Err(_) => st.engine.get_proof(&id).await?,
    };
    Ok(Json(ProofView::from(&record)))
}

async fn list_own<S, A>(
    State(st): State<AppState<S, A>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let actor = match actor_from(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let listed = st
        .engine
        .list_proofs_for_actor(
            &actor,
            q.limit.unwrap_or(DEFAULT_OWN_LIST_LIMIT),
            q.offset.unwrap_or(0),
        )
        .await;
    match listed {
        Ok(records) => {
            let proofs: Vec<ProofView> = records.iter().map(ProofView::from).collect();
            Json(json!({ "count": proofs.len(), "proofs": proofs })).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn verify<S, A>(
    State(st): State<AppState<S, A>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let outcome = st.engine.verify_proof(&ProofId::new(id)).await?;
    Ok(Json(json!({
        "proof_id": outcome.proof_id,
        "valid": outcome.valid,
        "verified_at": outcome.verified_at,
        "cached": outcome.cached,
    })))
}

async fn list_for_attestation<S, A>(
    State(st): State<AppState<S, A>>,
    Path(id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let records = st
        .engine
        .list_proofs_for_attestation(
            &AttestationId::new(id),
            q.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            q.offset.unwrap_or(0),
        )
        .await?;
    let proofs: Vec<ProofView> = records.iter().map(ProofView::from).collect();
    Ok(Json(json!({ "proofs": proofs })))
}

async fn replay_stats<S, A>(State(st): State<AppState<S, A>>) -> Result<Json<Value>, ApiError>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    let stats = st.engine.replay_stats().await?;
    Ok(Json(json!(stats)))
}

// ------------------------------ Wiring ------------------------------

fn router<S, A>(engine: ProofEngine<S, A>) -> Router
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/version", get(version::<S, A>))
        .route("/v1/proofs", post(generate::<S, A>).get(list_own::<S, A>))
        .route("/v1/jobs/:id", get(job::<S, A>))
        .route("/v1/proofs/:id", get(get_proof::<S, A>))
        .route("/v1/proofs/:id/verify", post(verify::<S, A>))
        .route("/v1/attestations/:id/proofs", get(list_for_attestation::<S, A>))
        .route("/v1/replay/stats", get(replay_stats::<S, A>))
        .with_state(AppState { engine })
}

fn cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_default();
    if allowed_origins.trim() == "*" {
        warn!("CORS set to permissive mode (*); do not use in production");
        return CorsLayer::permissive();
    }
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    info!(?origins, "CORS configured");
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-subject"),
        ])
        .max_age(Duration::from_secs(3600))
}

async fn serve<S, A>(engine: ProofEngine<S, A>, addr: SocketAddr) -> anyhow::Result<()>
where
    S: ProofStore + ReplayGuard,
    A: AttestationStore,
{
    // Rate limiting: 10 req/sec per IP, burst of 30.
    let governor_conf = Box::leak(Box::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate-limit configuration"))?,
    ));

    // Finished jobs are forgotten after the retention window.
    let pruner = engine.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let pruned = pruner.prune_jobs();
            if pruned > 0 {
                info!(pruned, "pruned finished generation jobs");
            }
        }
    });

    let app = router(engine)
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    info!(%addr, "claimproof API listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn backend_from_env() -> anyhow::Result<BackendAdapter> {
    match std::env::var("CLAIMPROOF_DEV_KEY") {
        Ok(hex) => Ok(BackendAdapter::new(DevBackend::from_hex(&hex)?)),
        Err(_) => {
            warn!("CLAIMPROOF_DEV_KEY not set; using a random dev key (proofs will not verify after restart)");
            Ok(BackendAdapter::new(DevBackend::random()))
        }
    }
}

fn attestations_from_env() -> anyhow::Result<Option<MemoryAttestations>> {
    match std::env::var("CLAIMPROOF_ATTESTATIONS") {
        Ok(path) => {
            let path = PathBuf::from(path);
            let atts = MemoryAttestations::from_json_file(&path)?;
            info!(count = atts.len(), path = %path.display(), "loaded attestations");
            Ok(Some(atts))
        }
        Err(_) => Ok(None),
    }
}

// ------------------------------ Main ------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("claimproof=info,claimproof_api=info,tower_http=info");

    let addr: SocketAddr = std::env::var("CLAIMPROOF_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

    let config = EngineConfig::from_env();
    info!(
        workers = config.prove_workers,
        timeout_ms = config.prove_timeout.as_millis() as u64,
        "engine configured"
    );
    let backend = backend_from_env()?;
    let file_attestations = attestations_from_env()?;

    let use_kvs = std::env::var("UPSTASH_REDIS_REST_URL").is_ok();
    match (use_kvs, file_attestations) {
        (true, Some(atts)) => {
            info!("persistence: upstash");
            let store = KvsStore::from_env()?;
            serve(ProofEngine::new(store, atts, backend, config), addr).await
        }
        (true, None) => {
            info!("persistence: upstash (attestations from kvs)");
            let store = KvsStore::from_env()?;
            serve(ProofEngine::new(store.clone(), store, backend, config), addr).await
        }
        (false, atts) => {
            warn!("persistence: in-memory (records and replay guard are lost on restart)");
            let atts = atts.unwrap_or_else(|| {
                warn!("no CLAIMPROOF_ATTESTATIONS file; every generate call will 404");
                MemoryAttestations::new()
            });
            serve(ProofEngine::new(MemoryStore::new(), atts, backend, config), addr).await
        }
    }
}
