//! Upstash Redis (REST) persistence adapter
//!
//! Layout (all keys under `claimproof:`):
//!
//! | key | value |
//! |---|---|
//! | `proof:{id}` | record JSON as created (state `unverified`) |
//! | `proof-state:{id}` | terminal state JSON, written once with `SET NX` |
//! | `att-proofs:{attestation}` | list of proof ids, `LPUSH` (newest first) |
//! | `owner-proofs:{subject}` | list of proof ids, `LPUSH` (newest first) |
//! | `nullifier:{0x..}` | replay entry JSON, written once with `SET NX` |
//! | `replay:count` / `replay:oldest` | replay statistics |
//! | `att:{id}` | attestation JSON (read-only) |
//!
//! Both single-writer guarantees (record state, replay entry) reduce to
//! Redis `SET ... NX`, which is atomic on the server.

use serde::Deserialize;
use serde_json::Value;

use crate::attestation::{Actor, Attestation, AttestationStore};
use crate::error::StoreError;
use crate::nullifier::NullifierCommitment;
use crate::record::{
    AttestationId, ProofId, ProofRecord, ReplayEntry, ReplayInsert, ReplayStats, VerificationState,
};
use crate::store::{ProofStore, ReplayGuard, StateTransition};

const PREFIX: &str = "claimproof";

#[derive(Deserialize)]
struct UpstashResp {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// REST client for an Upstash Redis database.
#[derive(Clone)]
pub struct KvsStore {
    url: String,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for KvsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvsStore").field("url", &self.url).finish_non_exhaustive()
    }
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl KvsStore {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut url = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        Self {
            url,
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    /// `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let url = get("UPSTASH_REDIS_REST_URL")
            .ok_or_else(|| anyhow::anyhow!("UPSTASH_REDIS_REST_URL not set"))?;
        let token = get("UPSTASH_REDIS_REST_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("UPSTASH_REDIS_REST_TOKEN not set"))?;
        Ok(Self::new(url, token))
    }

    #[inline]
    fn auth(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
    }

    /// One Redis command as a JSON array body.
    async fn command(&self, args: &[&str]) -> Result<Value, StoreError> {
        let res = self
            .auth(self.http.post(&self.url))
            .json(&args)
            .send()
            .await
            .map_err(backend)?;
        let status = res.status();
        let text = res.text().await.map_err(backend)?;
        let verb = args.first().copied().unwrap_or("?");
        let parsed: UpstashResp = serde_json::from_str(&text)
            .map_err(|e| StoreError::Backend(format!("kvs {verb} {status}: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(StoreError::Backend(format!("kvs {verb} {status}: {err}")));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("kvs {verb} {status}")));
        }
        Ok(parsed.result)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(match self.command(&["GET", key]).await? {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    /// `SET key val NX`; `true` when written.
    async fn set_nx(&self, key: &str, val: &str) -> Result<bool, StoreError> {
        Ok(matches!(self.command(&["SET", key, val, "NX"]).await?, Value::String(ref s) if s == "OK"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// One page of a proof-id list, resolved to records. Ids whose record is
    /// gone are skipped.
    async fn list_page(&self, key: &str, limit: usize, offset: usize) -> Result<Vec<ProofRecord>, StoreError> {
        let Some((start, stop)) = lrange_bounds(limit, offset) else {
            return Ok(Vec::new());
        };
        let ids = match self.command(&["LRANGE", key, &start, &stop]).await? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => return Err(StoreError::Encoding(format!("LRANGE returned {other}"))),
        };
        let mut out = Vec::with_capacity(ids.len());
        for v in ids {
            if let Value::String(pid) = v {
                if let Some(r) = self.load_record(&ProofId::new(pid)).await? {
                    out.push(r);
                }
            }
        }
        Ok(out)
    }

    async fn load_record(&self, id: &ProofId) -> Result<Option<ProofRecord>, StoreError> {
        let Some(mut record) = self.get_json::<ProofRecord>(&key_proof(id)).await? else {
            return Ok(None);
        };
        if let Some(state) = self.get_json::<VerificationState>(&key_state(id)).await? {
            record.state = state;
        }
        Ok(Some(record))
    }
}

fn key_proof(id: &ProofId) -> String {
    format!("{PREFIX}:proof:{id}")
}

fn key_state(id: &ProofId) -> String {
    format!("{PREFIX}:proof-state:{id}")
}

fn key_att_proofs(id: &AttestationId) -> String {
    format!("{PREFIX}:att-proofs:{id}")
}

fn key_owner_proofs(subject: &str) -> String {
    format!("{PREFIX}:owner-proofs:{subject}")
}

fn key_nullifier(nc: &NullifierCommitment) -> String {
    format!("{PREFIX}:nullifier:{nc}")
}

fn key_attestation(id: &AttestationId) -> String {
    format!("{PREFIX}:att:{id}")
}

const KEY_REPLAY_COUNT: &str = "claimproof:replay:count";
const KEY_REPLAY_OLDEST: &str = "claimproof:replay:oldest";

/// Inclusive `LRANGE` indices for a page; `None` when the page is empty or
/// starts beyond what Redis can address.
fn lrange_bounds(limit: usize, offset: usize) -> Option<(String, String)> {
    const MAX_INDEX: usize = i64::MAX as usize;
    if limit == 0 || offset > MAX_INDEX {
        return None;
    }
    let stop = offset.saturating_add(limit - 1).min(MAX_INDEX);
    Some((offset.to_string(), stop.to_string()))
}

impl ProofStore for KvsStore {
    async fn insert_record(&self, record: &ProofRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(&record.with_state(VerificationState::Unverified))?;
        let key = key_proof(&record.id);
        if !self.set_nx(&key, &body).await? {
            return Err(StoreError::Duplicate(record.id.to_string()));
        }
        let id = record.id.as_str();
        let indexed = match self.command(&["LPUSH", &key_att_proofs(&record.attestation_id), id]).await {
            Ok(_) => self
                .command(&["LPUSH", &key_owner_proofs(&record.owner_subject), id])
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = indexed {
            // Undo the record so a failed insert leaves nothing fetchable.
            // Index entries already pushed point at nothing and are skipped.
            if let Err(del) = self.command(&["DEL", &key]).await {
                tracing::error!(proof_id = %record.id, error = %del, "rollback of partially inserted record failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn get_record(&self, id: &ProofId) -> Result<Option<ProofRecord>, StoreError> {
        self.load_record(id).await
    }

    async fn transition_state(
        &self,
        id: &ProofId,
        next: VerificationState,
    ) -> Result<StateTransition, StoreError> {
        let Some(current) = self.load_record(id).await? else {
            return Ok(StateTransition::Missing);
        };
        if current.state.is_terminal() {
            return Ok(StateTransition::Stale(current));
        }
        let body = serde_json::to_string(&next)?;
        if self.set_nx(&key_state(id), &body).await? {
            return Ok(StateTransition::Applied(current.with_state(next)));
        }
        // Lost the race; report the winner's state.
        match self.load_record(id).await? {
            Some(r) => Ok(StateTransition::Stale(r)),
            None => Ok(StateTransition::Missing),
        }
    }

    async fn list_for_attestation(
        &self,
        id: &AttestationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProofRecord>, StoreError> {
        self.list_page(&key_att_proofs(id), limit, offset).await
    }

    async fn list_for_owner(
        &self,
        actor: &Actor,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProofRecord>, StoreError> {
        self.list_page(&key_owner_proofs(&actor.subject), limit, offset).await
    }
}

impl ReplayGuard for KvsStore {
    async fn test_and_insert(
        &self,
        commitment: &NullifierCommitment,
        proof_id: &ProofId,
    ) -> Result<ReplayInsert, StoreError> {
        let entry = ReplayEntry {
            nullifier_commitment: *commitment,
            first_accepted_proof_id: proof_id.clone(),
            accepted_at: chrono::Utc::now(),
        };
        let key = key_nullifier(commitment);
        if self.set_nx(&key, &serde_json::to_string(&entry)?).await? {
            // Counters are best effort; the entry itself is authoritative.
            if let Err(e) = self.command(&["INCR", KEY_REPLAY_COUNT]).await {
                tracing::warn!(error = %e, "replay counter update failed");
            }
            let at = entry.accepted_at.to_rfc3339();
            if let Err(e) = self.set_nx(KEY_REPLAY_OLDEST, &at).await {
                tracing::warn!(error = %e, "replay oldest update failed");
            }
            return Ok(ReplayInsert::Inserted);
        }
        match self.get_json::<ReplayEntry>(&key).await? {
            Some(existing) => Ok(ReplayInsert::AlreadyPresent(existing.first_accepted_proof_id)),
            None => Err(StoreError::Backend(format!("{key} vanished after SET NX refusal"))),
        }
    }

    async fn get_entry(&self, commitment: &NullifierCommitment) -> Result<Option<ReplayEntry>, StoreError> {
        self.get_json(&key_nullifier(commitment)).await
    }

    async fn stats(&self) -> Result<ReplayStats, StoreError> {
        let accepted_commitments: u64 = match self.get(KEY_REPLAY_COUNT).await? {
            Some(s) => s.parse().map_err(|e| StoreError::Encoding(format!("replay count: {e}")))?,
            None => 0,
        };
        let oldest_accepted_at = match self.get(KEY_REPLAY_OLDEST).await? {
            Some(s) => Some(
                chrono::DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| StoreError::Encoding(format!("replay oldest: {e}")))?
                    .with_timezone(&chrono::Utc),
            ),
            None => None,
        };
        Ok(ReplayStats {
            accepted_commitments,
            oldest_accepted_at,
        })
    }
}

impl AttestationStore for KvsStore {
    async fn get_attestation(&self, id: &AttestationId) -> Result<Option<Attestation>, StoreError> {
        self.get_json(&key_attestation(id)).await
    }
}
