//! Development proving backend
//!
//! `DevBackend` evaluates each circuit's constraints over the assignment at
//! proving time and emits a randomized keyed-MAC proof:
//!
//! ```text
//! proof = nonce(32) || HMAC-SHA256(key, DST || circuit || nonce || signals)
//! ```
//!
//! Verification recomputes the tag. The construction is sound only against
//! parties without the key and carries no zero-knowledge property against the
//! key holder, so it is suited to development and tests, not production.

use std::time::Duration;

use ark_ff::{PrimeField, Zero};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::backend::{BackendError, BackendProof, CircuitId, CircuitInput, ProvingBackend};
use crate::nullifier::commit_field;
use crate::predicate::{MAX_SET_SIZE, VALUE_BITS};
use crate::witness::set_commitment;
use crate::{fe_fits_bits, fe_to_bytes, F};

type HmacSha256 = Hmac<Sha256>;

const DST: &[u8] = b"claimproof.dev_backend.v1";
const NONCE_BYTES: usize = 32;
const TAG_BYTES: usize = 32;
pub const KEY_BYTES: usize = 32;

#[derive(Zeroize, ZeroizeOnDrop)]
struct MacKey([u8; KEY_BYTES]);

/// Constraint-checking backend with keyed-MAC proofs.
pub struct DevBackend {
    key: MacKey,
    latency: Option<Duration>,
}

impl DevBackend {
    pub fn new(key: [u8; KEY_BYTES]) -> Self {
        Self {
            key: MacKey(key),
            latency: None,
        }
    }

    /// Fresh random key; proofs do not survive a restart.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut key);
        let out = Self::new(key);
        key.zeroize();
        out
    }

    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let digits = s.trim().strip_prefix("0x").unwrap_or(s.trim());
        let mut bytes = hex::decode(digits)?;
        let key: [u8; KEY_BYTES] = match bytes.as_slice().try_into() {
            Ok(k) => k,
            Err(_) => {
                bytes.zeroize();
                anyhow::bail!("dev key must be {KEY_BYTES} bytes of hex");
            }
        };
        bytes.zeroize();
        Ok(Self::new(key))
    }

    pub fn key_hex(&self) -> String {
        hex::encode(self.key.0)
    }

    /// Sleep inside `prove` to simulate a slow prover.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn tag(&self, circuit: CircuitId, nonce: &[u8], signals: &[F]) -> Result<HmacSha256, BackendError> {
        let mut mac = HmacSha256::new_from_slice(&self.key.0)
            .map_err(|e| BackendError::Unavailable(format!("invalid dev key: {e}")))?;
        mac.update(DST);
        mac.update(&(circuit.as_str().len() as u64).to_be_bytes());
        mac.update(circuit.as_str().as_bytes());
        mac.update(nonce);
        mac.update(&(signals.len() as u64).to_be_bytes());
        for s in signals {
            mac.update(&fe_to_bytes(s));
        }
        Ok(mac)
    }
}

impl ProvingBackend for DevBackend {
    fn name(&self) -> &'static str {
        "dev-hmac"
    }

    fn prove(&self, circuit: CircuitId, input: &CircuitInput) -> Result<BackendProof, BackendError> {
        if let Some(d) = self.latency {
            std::thread::sleep(d);
        }
        check_constraints(circuit, &input.public, input.private())?;

        let nc = commit_field(&input.private()[1], circuit.kind());
        let mut public_signals = Vec::with_capacity(1 + input.public.len());
        public_signals.push(nc);
        public_signals.extend_from_slice(&input.public);

        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        let tag = self.tag(circuit, &nonce, &public_signals)?.finalize().into_bytes();

        let mut proof = Vec::with_capacity(NONCE_BYTES + TAG_BYTES);
        proof.extend_from_slice(&nonce);
        proof.extend_from_slice(&tag);
        Ok(BackendProof {
            proof,
            public_signals,
        })
    }

    fn verify(&self, circuit: CircuitId, public_signals: &[F], proof: &[u8]) -> Result<bool, BackendError> {
        if proof.len() != NONCE_BYTES + TAG_BYTES {
            return Err(BackendError::MalformedProof(format!(
                "expected {} bytes, got {}",
                NONCE_BYTES + TAG_BYTES,
                proof.len()
            )));
        }
        if public_signals.len() != circuit.public_signal_count() {
            return Ok(false);
        }
        let (nonce, tag) = proof.split_at(NONCE_BYTES);
        Ok(self.tag(circuit, nonce, public_signals)?.verify_slice(tag).is_ok())
    }
}

fn in_bits(x: &F) -> bool {
    fe_fits_bits(x, VALUE_BITS)
}

/// The circuit relations, evaluated directly over `F`.
fn check_constraints(circuit: CircuitId, public: &[F], private: &[F]) -> Result<(), BackendError> {
    let unsat = |what: &str| -> Result<(), BackendError> {
        Err(BackendError::Unsatisfiable(format!("{circuit}: {what}")))
    };
    match circuit {
        CircuitId::ThresholdV1 => {
            let ([threshold], [value, _secret]) = (public, private) else {
                return Err(malformed(circuit));
            };
            if !in_bits(value) || !in_bits(threshold) {
                return unsat("range check");
            }
            if value < threshold {
                return unsat("comparison");
            }
        }
        CircuitId::RangeV1 => {
            let ([min, max], [value, _secret]) = (public, private) else {
                return Err(malformed(circuit));
            };
            if !in_bits(value) || !in_bits(min) || !in_bits(max) {
                return unsat("range check");
            }
            if value < min || value > max {
                return unsat("comparison");
            }
        }
        CircuitId::SetMembershipV1 => {
            let [commitment, size] = public else {
                return Err(malformed(circuit));
            };
            if private.len() != 2 + MAX_SET_SIZE {
                return Err(malformed(circuit));
            }
            let n = match usize::try_from(low_u64(size)) {
                Ok(n) if (1..=MAX_SET_SIZE).contains(&n) && in_bits(size) => n,
                _ => return unsat("set size"),
            };
            let value = private[0];
            let members = &private[2..2 + n];
            if private[2 + n..].iter().any(|p| !p.is_zero()) {
                return unsat("padding");
            }
            if members.windows(2).any(|w| w[0] >= w[1]) {
                return unsat("member order");
            }
            if set_commitment(members) != *commitment {
                return unsat("set commitment");
            }
            if !members.contains(&value) {
                return unsat("membership");
            }
        }
    }
    Ok(())
}

fn malformed(circuit: CircuitId) -> BackendError {
    BackendError::MalformedWitness(format!("{circuit}: unexpected assignment shape"))
}

/// Low limb; exact once `in_bits` holds.
fn low_u64(x: &F) -> u64 {
    x.into_bigint().0[0]
}
