//! Minimal CLI verifier
//!
//! Reads a proof file written by `prover` and checks it against the dev
//! backend key:
//!
//! ```text
//! verifier [--in proof.bin] [--key <hex>]     (or CLAIMPROOF_DEV_KEY)
//! ```
//!
//! Only the cryptographic check runs here. Replay protection needs the shared
//! replay guard and is enforced by the API's verify endpoint.

#![forbid(unsafe_code)]

use std::{env, path::PathBuf};

use claimproof::{api::io::read_proof, backend::BackendAdapter, config::init_tracing, dev_backend::DevBackend, CircuitId};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn main() -> anyhow::Result<()> {
    init_tracing("claimproof=warn");
    let args: Vec<String> = env::args().collect();

    let path = PathBuf::from(parse_flag(&args, "--in").unwrap_or_else(|| "proof.bin".into()));
    let key = parse_flag(&args, "--key")
        .or_else(|| env::var("CLAIMPROOF_DEV_KEY").ok())
        .ok_or_else(|| anyhow::anyhow!("missing --key <hex> (or CLAIMPROOF_DEV_KEY)"))?;
    let backend = BackendAdapter::new(DevBackend::from_hex(&key)?);

    let record = read_proof(&path)?;
    eprintln!("Loaded {}", path.display());
    eprintln!("  proof id:             {}", record.id);
    eprintln!("  attestation:          {}", record.attestation_id);
    eprintln!("  circuit:              {}", CircuitId::for_kind(record.circuit_type));
    eprintln!("  public inputs:        {}", serde_json::to_string(&record.public_inputs)?);
    eprintln!("  nullifier commitment: {}", record.nullifier_commitment);

    let valid = backend
        .verify(&record.public_inputs, &record.nullifier_commitment, &record.proof)
        .map_err(|e| anyhow::anyhow!("verification could not run: {e}"))?;
    if !valid {
        anyhow::bail!("verification failed: proof does not match its public inputs");
    }

    eprintln!();
    eprintln!("✓ VERIFICATION SUCCESSFUL (replay not checked offline)");
    println!("Verifier result: ok");
    Ok(())
}
