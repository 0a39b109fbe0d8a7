//! Generate a development backend key
//!
//! Prints a fresh random key as hex, suitable for `CLAIMPROOF_DEV_KEY`.
//! With `--out <path>` the key is also written to a file.
//!
//! DEV ONLY: anyone holding the key can mint proofs the dev backend accepts.

#![forbid(unsafe_code)]

use std::{env, fs, path::PathBuf};

use claimproof::dev_backend::DevBackend;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let out = args
        .iter()
        .position(|a| a == "--out")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let key = DevBackend::random().key_hex();
    if let Some(path) = out {
        fs::write(&path, format!("{key}\n"))
            .map_err(|e| anyhow::anyhow!("write {}: {e}", path.display()))?;
        eprintln!("✓ Dev key written to {}", path.display());
    }
    eprintln!("⚠️  Development key only. Do not use to accept proofs from untrusted provers.");
    println!("{key}");
    Ok(())
}
