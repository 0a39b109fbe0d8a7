//! Domain-separated BLAKE3 transcript (hash → field)
//!
//! Every hash the engine needs inside the field goes through this module:
//! nullifier commitments, set commitments and text-to-field mappings. The
//! construction is a label-stable absorb schedule over BLAKE3:
//!
//! - **Stable DSTs.** The transcript starts with a fixed preamble plus an
//!   instance label; every absorb is prefixed by `item:<label>:len:<n>:data:`.
//! - **Length-delimited items.** No two distinct absorb sequences produce the
//!   same byte stream.
//! - **Clone-before-challenge.** Deriving a field element clones the running
//!   state and reads 64 bytes of XOF output, reduced mod r. The absorb state is
//!   never consumed.
//!
//! Changing a label changes every derived value:
//!
//! ```
//! use claimproof::transcript::{Label, Transcript};
//!
//! let mut t1 = Transcript::new("example");
//! t1.absorb_bytes_l(Label::SecretField, b"abc");
//! let a = t1.challenge_f_l(Label::NullifierCommitment);
//!
//! let mut t2 = Transcript::new("example");
//! t2.absorb_bytes_l(Label::TextValue, b"abc");
//! let b = t2.challenge_f_l(Label::NullifierCommitment);
//!
//! assert_ne!(a, b);
//! ```

use ark_ff::PrimeField;
use blake3::Hasher;

use crate::{fe_to_bytes, F};

const PREAMBLE: &[u8] = b"claimproof.transcript.v1";

/// Canonical absorb/derive labels.
///
/// The strings are part of every derived value. Adding variants is
/// compatible; renaming one invalidates all persisted commitments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Label {
    NullifierSecret,
    SecretField,
    PredicateKind,
    NullifierCommitment,
    SetSize,
    SetMember,
    SetCommitment,
    TextValue,
    CircuitId,
    PublicSignals,
    ProofNonce,
}

impl Label {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::NullifierSecret => "nullifier_secret",
            Label::SecretField => "secret_field",
            Label::PredicateKind => "predicate_kind",
            Label::NullifierCommitment => "nullifier_commitment",
            Label::SetSize => "set_size",
            Label::SetMember => "set_member",
            Label::SetCommitment => "set_commitment",
            Label::TextValue => "text_value",
            Label::CircuitId => "circuit_id",
            Label::PublicSignals => "public_signals",
            Label::ProofNonce => "proof_nonce",
        }
    }
}

/// BLAKE3 transcript with domain separation.
#[derive(Clone)]
pub struct Transcript {
    label: &'static str,
    hasher: Hasher,
    ctr: u64,
}

impl Transcript {
    /// New transcript for the independent domain `label`.
    pub fn new(label: &'static str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(PREAMBLE);
        hasher.update(label.as_bytes());
        Self { label, hasher, ctr: 0 }
    }

    #[inline]
    pub fn absorb_bytes_l(&mut self, label: Label, bytes: &[u8]) {
        self.absorb_bytes(label.as_str(), bytes)
    }

    /// Absorb a byte slice (length-delimited).
    pub fn absorb_bytes(&mut self, label: &'static str, bytes: &[u8]) {
        self.hasher.update(b"item:");
        self.hasher.update(label.as_bytes());
        self.hasher.update(b":len:");
        self.hasher.update(&(bytes.len() as u64).to_be_bytes());
        self.hasher.update(b":data:");
        self.hasher.update(bytes);
    }

    /// Absorb a field element by its canonical 32-byte encoding.
    #[inline]
    pub fn absorb_scalar_l(&mut self, label: Label, f: &F) {
        self.absorb_bytes_l(label, &fe_to_bytes(f));
    }

    /// Absorb a sequence of field elements as one item:
    /// `u64(len) || fe_0 || ... || fe_{n-1}`.
    pub fn absorb_scalars_l(&mut self, label: Label, v: &[F]) {
        let mut buf = Vec::with_capacity(8 + v.len() * crate::FE_BYTES);
        buf.extend_from_slice(&(v.len() as u64).to_be_bytes());
        for f in v {
            buf.extend_from_slice(&fe_to_bytes(f));
        }
        self.absorb_bytes_l(label, &buf);
    }

    /// Absorb a big-endian `u64` (sizes, indices).
    #[inline]
    pub fn absorb_counter_l(&mut self, label: Label, ctr: u64) {
        self.absorb_bytes_l(label, &ctr.to_be_bytes());
    }

    /// Derive one field element (state is cloned, not consumed).
    #[inline]
    pub fn challenge_f_l(&mut self, label: Label) -> F {
        self.challenge_f(label.as_str())
    }

    pub fn challenge_f(&mut self, label: &'static str) -> F {
        let out = hash_to_field(&self.hasher, self.label, label, self.ctr);
        self.ctr = self.ctr.wrapping_add(1);
        out
    }

    /// 32 raw bytes of output under `label`, for keyed constructions that
    /// want bytes rather than a field element.
    pub fn challenge_bytes_l(&mut self, label: Label) -> [u8; 32] {
        let h = derive_state(&self.hasher, self.label, label.as_str(), self.ctr);
        self.ctr = self.ctr.wrapping_add(1);
        let mut out = [0u8; 32];
        h.finalize_xof().fill(&mut out);
        out
    }
}

fn derive_state(base: &Hasher, tlabel: &'static str, label: &'static str, ctr: u64) -> Hasher {
    let mut h = base.clone();
    h.update(b"challenge:");
    h.update(PREAMBLE);
    h.update(b":tlabel:");
    h.update(tlabel.as_bytes());
    h.update(b":label:");
    h.update(label.as_bytes());
    h.update(b":ctr:");
    h.update(&ctr.to_be_bytes());
    h
}

/// XOF → 64 bytes → reduce mod r (little-endian). The wide read keeps the
/// modular bias negligible.
fn hash_to_field(base: &Hasher, tlabel: &'static str, label: &'static str, ctr: u64) -> F {
    let h = derive_state(base, tlabel, label, ctr);
    let mut buf = [0u8; 64];
    h.finalize_xof().fill(&mut buf);
    F::from_le_bytes_mod_order(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_schedule_same_output() {
        let mut a = Transcript::new("t");
        a.absorb_counter_l(Label::SetSize, 3);
        let mut b = Transcript::new("t");
        b.absorb_counter_l(Label::SetSize, 3);
        assert_eq!(a.challenge_f_l(Label::SetCommitment), b.challenge_f_l(Label::SetCommitment));
    }

    #[test]
    fn instance_label_separates_domains() {
        let mut a = Transcript::new("one");
        let mut b = Transcript::new("two");
        a.absorb_bytes_l(Label::TextValue, b"x");
        b.absorb_bytes_l(Label::TextValue, b"x");
        assert_ne!(a.challenge_f_l(Label::TextValue), b.challenge_f_l(Label::TextValue));
    }

    #[test]
    fn length_delimiting_prevents_concatenation_collisions() {
        let mut a = Transcript::new("t");
        a.absorb_bytes_l(Label::TextValue, b"ab");
        a.absorb_bytes_l(Label::TextValue, b"c");
        let mut b = Transcript::new("t");
        b.absorb_bytes_l(Label::TextValue, b"a");
        b.absorb_bytes_l(Label::TextValue, b"bc");
        assert_ne!(a.challenge_f_l(Label::TextValue), b.challenge_f_l(Label::TextValue));
    }

    #[test]
    fn successive_challenges_differ() {
        let mut t = Transcript::new("t");
        let x = t.challenge_f_l(Label::ProofNonce);
        let y = t.challenge_f_l(Label::ProofNonce);
        assert_ne!(x, y);
    }
}
