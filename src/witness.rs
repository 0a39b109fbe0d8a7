//! Witness assembly
//!
//! `assemble_witness` turns a typed [`PredicateSpec`] into the field-level
//! inputs a circuit consumes. It is pure: it validates, canonicalizes and
//! maps to `F`, and nothing else. The returned [`Witness`] owns the private
//! assignment; it is zeroized on drop and never serialized.
//!
//! Assignment layout (must match the circuits):
//!
//! | kind | public values | private assignment |
//! |---|---|---|
//! | threshold | `[threshold]` | `[value, secret]` |
//! | range | `[min, max]` | `[value, secret]` |
//! | set_membership | `[set_commitment, set_size]` | `[value, secret, m_0 .. m_{MAX-1}]` |
//!
//! The nullifier commitment is not part of the witness: circuits output it as
//! public signal 0, computed from `secret`.

use std::fmt;

use ark_ff::Zero;
use zeroize::Zeroize;

use crate::error::ClaimProofError;
use crate::nullifier::secret_to_field;
use crate::predicate::{ClaimValue, PredicateKind, PredicateSpec, PublicInputs, MAX_SET_SIZE};
use crate::transcript::{Label, Transcript};
use crate::F;

/// Field-level circuit inputs for one proof. Private half zeroized on drop.
pub struct Witness {
    kind: PredicateKind,
    public_inputs: PublicInputs,
    public_values: Vec<F>,
    private: Vec<F>,
}

impl Witness {
    pub fn kind(&self) -> PredicateKind {
        self.kind
    }

    /// Canonical public inputs (set members sorted); safe to persist.
    pub fn public_inputs(&self) -> &PublicInputs {
        &self.public_inputs
    }

    /// Public circuit inputs, excluding the nullifier commitment.
    pub fn public_values(&self) -> &[F] {
        &self.public_values
    }

    pub fn private_assignment(&self) -> &[F] {
        &self.private
    }

    /// Field image of the nullifier secret (private slot 1).
    pub fn secret_field(&self) -> F {
        self.private[1]
    }
}

impl Drop for Witness {
    fn drop(&mut self) {
        self.private.iter_mut().for_each(Zeroize::zeroize);
    }
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Witness")
            .field("kind", &self.kind)
            .field("public_inputs", &self.public_inputs)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// `assembleWitness(spec) -> Witness | InvalidInput`.
///
/// Constraint satisfaction (`value >= threshold`, membership, ...) is not
/// checked here; an unsatisfiable witness is rejected by the backend.
pub fn assemble_witness(spec: &PredicateSpec) -> Result<Witness, ClaimProofError> {
    let secret = secret_to_field(spec.nullifier_secret());
    match spec {
        PredicateSpec::Threshold { threshold, value, .. } => Ok(Witness {
            kind: PredicateKind::Threshold,
            public_inputs: PublicInputs::Threshold {
                threshold: *threshold,
            },
            public_values: vec![F::from(*threshold)],
            private: vec![F::from(*value), secret],
        }),
        PredicateSpec::Range { min, max, value, .. } => {
            if min > max {
                return Err(ClaimProofError::invalid(
                    "public_inputs: min must not exceed max",
                ));
            }
            Ok(Witness {
                kind: PredicateKind::Range,
                public_inputs: PublicInputs::Range {
                    min: *min,
                    max: *max,
                },
                public_values: vec![F::from(*min), F::from(*max)],
                private: vec![F::from(*value), secret],
            })
        }
        PredicateSpec::SetMembership {
            allowed_set, value, ..
        } => {
            let canonical = canonical_set(allowed_set)?;
            let members: Vec<F> = canonical.iter().map(|(fe, _)| *fe).collect();
            let commitment = set_commitment(&members);

            let mut private = Vec::with_capacity(2 + MAX_SET_SIZE);
            private.push(member_to_field(value));
            private.push(secret);
            private.extend_from_slice(&members);
            private.resize(2 + MAX_SET_SIZE, F::zero());

            Ok(Witness {
                kind: PredicateKind::SetMembership,
                public_inputs: PublicInputs::SetMembership {
                    allowed_set: canonical.into_iter().map(|(_, v)| v).collect(),
                },
                public_values: vec![commitment, F::from(members.len() as u64)],
                private,
            })
        }
    }
}

/// Map a claim value into `F`. Integers embed directly; text goes through a
/// tagged hash so `"5"` and `5` never coincide.
pub fn member_to_field(v: &ClaimValue) -> F {
    match v {
        ClaimValue::Integer(n) => F::from(*n),
        ClaimValue::Text(s) => {
            let mut t = Transcript::new("claimproof.value.text");
            t.absorb_bytes_l(Label::TextValue, s.as_bytes());
            t.challenge_f_l(Label::TextValue)
        }
    }
}

/// Validate and sort a set by field image. Permutations of one set yield the
/// same canonical order and therefore the same commitment.
pub fn canonical_set(set: &[ClaimValue]) -> Result<Vec<(F, ClaimValue)>, ClaimProofError> {
    if set.is_empty() {
        return Err(ClaimProofError::invalid("public_inputs: allowed_set must not be empty"));
    }
    if set.len() > MAX_SET_SIZE {
        return Err(ClaimProofError::invalid(format!(
            "public_inputs: allowed_set holds at most {MAX_SET_SIZE} members"
        )));
    }
    let mut out: Vec<(F, ClaimValue)> = set.iter().map(|v| (member_to_field(v), v.clone())).collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    if out.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(ClaimProofError::invalid("public_inputs: allowed_set members must be unique"));
    }
    Ok(out)
}

/// Commitment over canonically ordered members.
pub fn set_commitment(sorted_members: &[F]) -> F {
    let mut t = Transcript::new("claimproof.set");
    t.absorb_counter_l(Label::SetSize, sorted_members.len() as u64);
    t.absorb_scalars_l(Label::SetMember, sorted_members);
    t.challenge_f_l(Label::SetCommitment)
}

/// Public values for stored (already canonical) public inputs.
pub fn public_values(public: &PublicInputs) -> Result<Vec<F>, ClaimProofError> {
    match public {
        PublicInputs::Threshold { threshold } => Ok(vec![F::from(*threshold)]),
        PublicInputs::Range { min, max } => Ok(vec![F::from(*min), F::from(*max)]),
        PublicInputs::SetMembership { allowed_set } => {
            let members: Vec<F> = canonical_set(allowed_set)?.into_iter().map(|(fe, _)| fe).collect();
            Ok(vec![set_commitment(&members), F::from(members.len() as u64)])
        }
    }
}
