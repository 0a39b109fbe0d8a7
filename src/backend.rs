//! Proving-backend boundary
//!
//! The cryptographic prover and verifier live behind [`ProvingBackend`]. This
//! module owns what sits on our side of that boundary:
//!
//! - selecting the [`CircuitId`] for a predicate kind;
//! - marshalling public inputs into the exact public-signal order the
//!   verification key expects (`[nullifier_commitment, ..public values]`);
//! - mapping backend failures into [`ClaimProofError`].
//!
//! Backends are synchronous and CPU-bound; the engine runs `prove` on the
//! bounded pool in [`crate::pool`].

use std::{fmt, str::FromStr, sync::Arc};

use zeroize::Zeroize;

use crate::error::ClaimProofError;
use crate::nullifier::NullifierCommitment;
use crate::predicate::{PredicateKind, PublicInputs};
use crate::witness::{self, Witness};
use crate::F;

/// Circuit identifiers, one per predicate kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CircuitId {
    ThresholdV1,
    RangeV1,
    SetMembershipV1,
}

impl CircuitId {
    pub fn for_kind(kind: PredicateKind) -> Self {
        match kind {
            PredicateKind::Threshold => CircuitId::ThresholdV1,
            PredicateKind::Range => CircuitId::RangeV1,
            PredicateKind::SetMembership => CircuitId::SetMembershipV1,
        }
    }

    pub fn kind(&self) -> PredicateKind {
        match self {
            CircuitId::ThresholdV1 => PredicateKind::Threshold,
            CircuitId::RangeV1 => PredicateKind::Range,
            CircuitId::SetMembershipV1 => PredicateKind::SetMembership,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitId::ThresholdV1 => "threshold_v1",
            CircuitId::RangeV1 => "range_v1",
            CircuitId::SetMembershipV1 => "set_membership_v1",
        }
    }

    /// Number of public signals, nullifier commitment included.
    pub fn public_signal_count(&self) -> usize {
        match self {
            CircuitId::ThresholdV1 => 2,
            CircuitId::RangeV1 | CircuitId::SetMembershipV1 => 3,
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitId {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold_v1" => Ok(CircuitId::ThresholdV1),
            "range_v1" => Ok(CircuitId::RangeV1),
            "set_membership_v1" => Ok(CircuitId::SetMembershipV1),
            other => Err(BackendError::MalformedWitness(format!("unknown circuit {other}"))),
        }
    }
}

/// Inputs handed to `prove`. The private half is zeroized on drop.
pub struct CircuitInput {
    pub public: Vec<F>,
    private: Vec<F>,
}

impl CircuitInput {
    pub fn new(public: Vec<F>, private: Vec<F>) -> Self {
        Self { public, private }
    }

    pub fn private(&self) -> &[F] {
        &self.private
    }
}

impl From<&Witness> for CircuitInput {
    fn from(w: &Witness) -> Self {
        Self::new(w.public_values().to_vec(), w.private_assignment().to_vec())
    }
}

impl Drop for CircuitInput {
    fn drop(&mut self) {
        self.private.iter_mut().for_each(Zeroize::zeroize);
    }
}

/// `prove` output.
#[derive(Clone, Debug)]
pub struct BackendProof {
    pub proof: Vec<u8>,
    pub public_signals: Vec<F>,
}

/// Backend-specific failures. Messages must not carry private values.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("witness does not satisfy the circuit constraints: {0}")]
    Unsatisfiable(String),
    #[error("malformed witness: {0}")]
    MalformedWitness(String),
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// External proving backend.
pub trait ProvingBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn prove(&self, circuit: CircuitId, input: &CircuitInput) -> Result<BackendProof, BackendError>;

    fn verify(&self, circuit: CircuitId, public_signals: &[F], proof: &[u8]) -> Result<bool, BackendError>;
}

/// `[nullifier_commitment, ..public values]` for stored public inputs.
pub fn public_signals(
    public: &PublicInputs,
    nullifier: &NullifierCommitment,
) -> Result<Vec<F>, ClaimProofError> {
    let nc = nullifier
        .to_field()
        .ok_or_else(|| ClaimProofError::invalid("non-canonical nullifier commitment"))?;
    let mut signals = vec![nc];
    signals.extend(witness::public_values(public)?);
    Ok(signals)
}

/// Shared handle that applies signal marshalling and error mapping around a
/// concrete backend.
#[derive(Clone)]
pub struct BackendAdapter {
    inner: Arc<dyn ProvingBackend>,
}

impl BackendAdapter {
    pub fn new<B: ProvingBackend>(backend: B) -> Self {
        Self {
            inner: Arc::new(backend),
        }
    }

    pub fn from_arc(inner: Arc<dyn ProvingBackend>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Prove and check that the backend's public signals are exactly the ones
    /// the record will be verified against.
    pub fn prove(
        &self,
        witness: &Witness,
        nullifier: &NullifierCommitment,
    ) -> Result<Vec<u8>, ClaimProofError> {
        let circuit = CircuitId::for_kind(witness.kind());
        let input = CircuitInput::from(witness);
        let out = self.inner.prove(circuit, &input).map_err(|e| match e {
            BackendError::Unsatisfiable(_) => ClaimProofError::ProofGenerationFailed(format!(
                "private_inputs do not satisfy the {circuit} predicate"
            )),
            other => ClaimProofError::ProofGenerationFailed(other.to_string()),
        })?;
        drop(input);

        let expected = public_signals(witness.public_inputs(), nullifier)?;
        if out.public_signals != expected {
            return Err(ClaimProofError::ProofGenerationFailed(format!(
                "{} returned public signals that do not match the {circuit} layout",
                self.name()
            )));
        }
        Ok(out.proof)
    }

    /// Cryptographic check of a stored proof.
    ///
    /// Malformed proofs or signals read as `false`; only an unavailable
    /// backend is an error, so a transient outage never rejects a record.
    pub fn verify(
        &self,
        public: &PublicInputs,
        nullifier: &NullifierCommitment,
        proof: &[u8],
    ) -> Result<bool, ClaimProofError> {
        let circuit = CircuitId::for_kind(public.kind());
        let signals = match public_signals(public, nullifier) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        match self.inner.verify(circuit, &signals, proof) {
            Ok(ok) => Ok(ok),
            Err(BackendError::Unavailable(msg)) => Err(ClaimProofError::BackendUnavailable(msg)),
            Err(_) => Ok(false),
        }
    }
}

impl fmt::Debug for BackendAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendAdapter").field("backend", &self.name()).finish()
    }
}
