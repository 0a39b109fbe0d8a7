//! Nullifier derivation
//!
//! A caller-held secret is committed in two steps:
//!
//! 1. `secret_to_field`: the secret bytes are hashed into `F`. This is the
//!    element that enters the private assignment.
//! 2. `commit_field`: the field secret is hashed together with the predicate
//!    kind into the public commitment (public signal 0 of every circuit).
//!
//! Both steps run through the domain-separated [`Transcript`], so the map is
//! deterministic and one-way. Commitments are separated per predicate kind:
//! one secret used for a threshold proof and a range proof yields two
//! unrelated commitments.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::predicate::{NullifierSecret, PredicateKind};
use crate::transcript::{Label, Transcript};
use crate::{fe_from_bytes, fe_to_bytes, F, FE_BYTES};

/// Public one-way commitment to a nullifier secret (canonical `F` bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NullifierCommitment([u8; FE_BYTES]);

impl NullifierCommitment {
    pub fn from_field(x: &F) -> Self {
        Self(fe_to_bytes(x))
    }

    /// Always `Some` for commitments built through `from_field`; `None` only
    /// for hand-crafted non-canonical bytes.
    pub fn to_field(&self) -> Option<F> {
        fe_from_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; FE_BYTES] {
        &self.0
    }

    /// Parse `0x`-prefixed (or bare) hex of a canonical encoding.
    pub fn from_hex(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes: [u8; FE_BYTES] = hex::decode(digits).ok()?.try_into().ok()?;
        fe_from_bytes(&bytes).map(|_| Self(bytes))
    }
}

impl fmt::Display for NullifierCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NullifierCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullifierCommitment({self})")
    }
}

impl Serialize for NullifierCommitment {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NullifierCommitment {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_hex(&s)
            .ok_or_else(|| de::Error::custom("expected 0x-prefixed canonical field element"))
    }
}

/// Hash the raw secret into the field. The result is private.
pub fn secret_to_field(secret: &NullifierSecret) -> F {
    let mut t = Transcript::new("claimproof.nullifier.secret");
    t.absorb_bytes_l(Label::NullifierSecret, secret.expose());
    t.challenge_f_l(Label::SecretField)
}

/// Commitment over an already-mapped field secret. Circuits re-evaluate this
/// to tie public signal 0 to the private assignment.
pub fn commit_field(secret_fe: &F, kind: PredicateKind) -> F {
    let mut t = Transcript::new("claimproof.nullifier.commit");
    t.absorb_bytes_l(Label::PredicateKind, kind.as_str().as_bytes());
    t.absorb_scalar_l(Label::SecretField, secret_fe);
    t.challenge_f_l(Label::NullifierCommitment)
}

/// `deriveNullifierCommitment(secret, kind)`: deterministic, pure.
pub fn derive_nullifier_commitment(secret: &NullifierSecret, kind: PredicateKind) -> NullifierCommitment {
    NullifierCommitment::from_field(&commit_field(&secret_to_field(secret), kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(b: u8) -> NullifierSecret {
        NullifierSecret::from_bytes(vec![b; 32]).unwrap()
    }

    #[test]
    fn deterministic() {
        let a = derive_nullifier_commitment(&secret(1), PredicateKind::Threshold);
        let b = derive_nullifier_commitment(&secret(1), PredicateKind::Threshold);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_secrets_distinct_commitments() {
        let a = derive_nullifier_commitment(&secret(1), PredicateKind::Threshold);
        let b = derive_nullifier_commitment(&secret(2), PredicateKind::Threshold);
        assert_ne!(a, b);
    }

    #[test]
    fn separated_per_kind() {
        let s = secret(9);
        let t = derive_nullifier_commitment(&s, PredicateKind::Threshold);
        let r = derive_nullifier_commitment(&s, PredicateKind::Range);
        let m = derive_nullifier_commitment(&s, PredicateKind::SetMembership);
        assert_ne!(t, r);
        assert_ne!(r, m);
        assert_ne!(t, m);
    }

    #[test]
    fn hex_serde_round_trip() {
        let c = derive_nullifier_commitment(&secret(3), PredicateKind::Range);
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: NullifierCommitment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(c.to_field().is_some());
        assert!(NullifierCommitment::from_hex("0x1234").is_none());
    }
}
