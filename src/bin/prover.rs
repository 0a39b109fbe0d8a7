//! Minimal CLI prover
//!
//! Proves one predicate over a value supplied on the command line and writes
//! a versioned proof file:
//!   magic: b"CLAIMPv1" (8 bytes) + u16 version (=1) + JSON proof record
//!
//! The value is treated as attested by a local, already-finalized
//! attestation, so the CLI exercises the same generation path as the API.
//!
//! ```text
//! prover --kind threshold \
//!        --private '{"value":25,"nullifier_secret":"0x0123456789abcdef0123456789abcdef"}' \
//!        --public '{"threshold":18}' \
//!        [--out proof.bin] [--key <hex>]
//! ```
//!
//! The dev key comes from `--key`, then `CLAIMPROOF_DEV_KEY`; without either a
//! random key is generated and printed so the verifier can be pointed at it.

#![forbid(unsafe_code)]

use std::{env, path::PathBuf};

use serde_json::Value;

use claimproof::{
    api::io::write_proof,
    attestation::MemoryAttestations,
    backend::BackendAdapter,
    config::init_tracing,
    dev_backend::DevBackend,
    Actor, Attestation, AttestationStatus, ClaimValue, EngineConfig, GenerateRequest,
    MemoryStore, PredicateKind, ProofEngine,
};

const CLI_SUBJECT: &str = "cli";
const CLI_ATTESTATION: &str = "cli-attestation";

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn parse_json(args: &[String], key: &str) -> anyhow::Result<Value> {
    let raw = parse_flag(args, key).ok_or_else(|| anyhow::anyhow!("missing {key} <json>"))?;
    serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("{key}: not valid JSON: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("claimproof=warn");
    let args: Vec<String> = env::args().collect();

    let kind: PredicateKind = parse_flag(&args, "--kind")
        .ok_or_else(|| anyhow::anyhow!("missing --kind <threshold|range|set_membership>"))?
        .parse()?;
    let private = parse_json(&args, "--private")?;
    let public = parse_json(&args, "--public")?;
    let out = PathBuf::from(parse_flag(&args, "--out").unwrap_or_else(|| "proof.bin".into()));

    let (backend, generated_key) = match parse_flag(&args, "--key").or_else(|| env::var("CLAIMPROOF_DEV_KEY").ok()) {
        Some(hex) => (DevBackend::from_hex(&hex)?, false),
        None => (DevBackend::random(), true),
    };
    let key_hex = generated_key.then(|| backend.key_hex());

    let value = private
        .get("value")
        .and_then(ClaimValue::from_json)
        .ok_or_else(|| anyhow::anyhow!("--private must carry an integer or string \"value\""))?;
    let attestations = MemoryAttestations::new();
    attestations.insert(Attestation {
        id: CLI_ATTESTATION.into(),
        owner_subject: CLI_SUBJECT.into(),
        status: AttestationStatus::Finalized,
        value,
    })?;

    let engine = ProofEngine::new(
        MemoryStore::new(),
        attestations,
        BackendAdapter::new(backend),
        EngineConfig::from_env(),
    );

    eprintln!("Proving {kind} claim...");
    let request = GenerateRequest::new(CLI_ATTESTATION, kind, private, public);
    let record = engine.generate_proof(request, &Actor::new(CLI_SUBJECT)).await?;

    write_proof(&out, &record)?;

    eprintln!();
    eprintln!("✓ Proof written to {}", out.display());
    eprintln!("  proof id:             {}", record.id);
    eprintln!("  circuit:              {}", claimproof::CircuitId::for_kind(kind));
    eprintln!("  nullifier commitment: {}", record.nullifier_commitment);
    eprintln!("  proof bytes:          {}", record.proof.len());
    if let Some(k) = key_hex {
        eprintln!();
        eprintln!("No dev key supplied; generated one for this run:");
        eprintln!("  CLAIMPROOF_DEV_KEY={k}");
    }
    println!("Prover result: ok");
    Ok(())
}
