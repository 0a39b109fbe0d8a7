//! Environment-driven engine configuration
//!
//! | variable | default |
//! |---|---|
//! | `CLAIMPROOF_PROVE_WORKERS` | available parallelism |
//! | `CLAIMPROOF_PROVE_TIMEOUT_MS` | 30000 |
//! | `CLAIMPROOF_JOB_RETENTION_SECS` | 3600 |
//!
//! Unparseable values fall back to the default. Logging is configured by
//! [`init_tracing`].

use std::time::Duration;

pub const DEFAULT_PROVE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 3_600;
/// Upper bound on `limit` for listing proofs.
pub const MAX_LIST_LIMIT: usize = 100;

/// Tunables for [`crate::ProofEngine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Concurrent proofs on the blocking pool.
    pub prove_workers: usize,
    /// How long `generate_proof` waits before handing back a pending job.
    pub prove_timeout: Duration,
    /// How long finished jobs stay pollable.
    pub job_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prove_workers: default_workers(),
            prove_timeout: Duration::from_millis(DEFAULT_PROVE_TIMEOUT_MS),
            job_retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env` over an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let prove_workers = get("CLAIMPROOF_PROVE_WORKERS")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(d.prove_workers);
        let prove_timeout = get("CLAIMPROOF_PROVE_TIMEOUT_MS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(d.prove_timeout);
        let job_retention = get("CLAIMPROOF_JOB_RETENTION_SECS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.job_retention);
        Self {
            prove_workers,
            prove_timeout,
            job_retention,
        }
    }

    pub fn with_prove_workers(mut self, n: usize) -> Self {
        self.prove_workers = n.max(1);
        self
    }

    pub fn with_prove_timeout(mut self, t: Duration) -> Self {
        self.prove_timeout = t;
        self
    }

    pub fn with_job_retention(mut self, t: Duration) -> Self {
        self.job_retention = t;
        self
    }
}

/// Install the global `tracing` subscriber for a binary.
///
/// `RUST_LOG` overrides `default_filter`; `CLAIMPROOF_LOG_JSON=true` switches
/// from compact text to JSON lines. A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let json = std::env::var("CLAIMPROOF_LOG_JSON")
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("CLAIMPROOF_PROVE_WORKERS", "3"),
            ("CLAIMPROOF_PROVE_TIMEOUT_MS", "250"),
            ("CLAIMPROOF_JOB_RETENTION_SECS", "ten"),
        ]
        .into_iter()
        .collect();
        let c = EngineConfig::from_lookup(|k| env.get(k).map(|s| s.to_string()));
        assert_eq!(c.prove_workers, 3);
        assert_eq!(c.prove_timeout, Duration::from_millis(250));
        assert_eq!(c.job_retention, Duration::from_secs(DEFAULT_JOB_RETENTION_SECS));
    }

    #[test]
    fn zero_workers_falls_back() {
        let c = EngineConfig::from_lookup(|k| (k == "CLAIMPROOF_PROVE_WORKERS").then(|| "0".to_string()));
        assert!(c.prove_workers >= 1);
    }
}
