//! Predicate variants and the typed `PredicateSpec` union.
//!
//! Callers hand us loosely shaped JSON objects (`private_inputs`,
//! `public_inputs`). They are parsed here, once, into a closed tagged union
//! whose variant selects the expected schema. Nothing downstream ever sees an
//! untyped input.
//!
//! Error wording for private fields is deliberately coarse: it names the
//! schema and whether the problem is shape or bounds, never the offending
//! value.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ClaimProofError;

/// Bit width of integer claims supported by the range-checked circuits.
pub const VALUE_BITS: u32 = 64;
/// Padding width of the set-membership circuit.
pub const MAX_SET_SIZE: usize = 10;
/// Upper bound on the byte length of a text claim.
pub const MAX_TEXT_BYTES: usize = 256;
/// Nullifier secrets must carry at least 128 bits.
pub const MIN_SECRET_BYTES: usize = 16;
pub const MAX_SECRET_BYTES: usize = 64;

// ------------------------------ Kinds ------------------------------

/// The closed set of predicate kinds (one circuit each).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    Threshold,
    Range,
    SetMembership,
}

impl PredicateKind {
    pub const ALL: [PredicateKind; 3] = [
        PredicateKind::Threshold,
        PredicateKind::Range,
        PredicateKind::SetMembership,
    ];

    /// Wire name (`circuit_type` in the API).
    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateKind::Threshold => "threshold",
            PredicateKind::Range => "range",
            PredicateKind::SetMembership => "set_membership",
        }
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredicateKind {
    type Err = ClaimProofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold" => Ok(PredicateKind::Threshold),
            "range" => Ok(PredicateKind::Range),
            "set_membership" => Ok(PredicateKind::SetMembership),
            other => Err(ClaimProofError::invalid(format!(
                "unsupported circuit_type `{other}` (expected threshold, range or set_membership)"
            ))),
        }
    }
}

// ------------------------------ Values ------------------------------

/// An attested value: a 64-bit unsigned integer or a short text.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Integer(u64),
    Text(String),
}

impl ClaimValue {
    /// Parse a JSON scalar. `None` for anything that is not an unsigned
    /// 64-bit integer or a string of at most [`MAX_TEXT_BYTES`] bytes.
    pub fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => n.as_u64().map(ClaimValue::Integer),
            Value::String(s) if !s.is_empty() && s.len() <= MAX_TEXT_BYTES => {
                Some(ClaimValue::Text(s.clone()))
            }
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            ClaimValue::Integer(n) => Some(*n),
            ClaimValue::Text(_) => None,
        }
    }
}

impl fmt::Debug for ClaimValue {
    // Claim values are private in most contexts; public ones (set members)
    // are shown through `PublicInputs` serialization instead.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::Integer(_) => f.write_str("Integer(<redacted>)"),
            ClaimValue::Text(_) => f.write_str("Text(<redacted>)"),
        }
    }
}

impl Zeroize for ClaimValue {
    fn zeroize(&mut self) {
        match self {
            ClaimValue::Integer(n) => n.zeroize(),
            ClaimValue::Text(s) => s.zeroize(),
        }
    }
}

/// Caller-supplied entropy behind a nullifier commitment.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NullifierSecret(Vec<u8>);

impl NullifierSecret {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ClaimProofError> {
        if bytes.len() < MIN_SECRET_BYTES || bytes.len() > MAX_SECRET_BYTES {
            let mut bytes = bytes;
            bytes.zeroize();
            return Err(ClaimProofError::invalid(format!(
                "private_inputs: nullifier_secret must be {MIN_SECRET_BYTES}..={MAX_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self(bytes))
    }

    /// Hex with an optional `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, ClaimProofError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|_| {
            ClaimProofError::invalid("private_inputs: nullifier_secret must be hex encoded")
        })?;
        Self::from_bytes(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for NullifierSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NullifierSecret(<redacted>)")
    }
}

// ------------------------------ Public inputs ------------------------------

/// The public half of a predicate; persisted with the proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublicInputs {
    Threshold { threshold: u64 },
    Range { min: u64, max: u64 },
    SetMembership { allowed_set: Vec<ClaimValue> },
}

impl PublicInputs {
    pub fn kind(&self) -> PredicateKind {
        match self {
            PublicInputs::Threshold { .. } => PredicateKind::Threshold,
            PublicInputs::Range { .. } => PredicateKind::Range,
            PublicInputs::SetMembership { .. } => PredicateKind::SetMembership,
        }
    }
}

// ------------------------------ PredicateSpec ------------------------------

/// A fully typed proof statement: public predicate plus private witness data.
///
/// Private fields are zeroized on drop and redacted in `Debug`.
pub enum PredicateSpec {
    Threshold {
        threshold: u64,
        value: u64,
        nullifier_secret: NullifierSecret,
    },
    Range {
        min: u64,
        max: u64,
        value: u64,
        nullifier_secret: NullifierSecret,
    },
    SetMembership {
        allowed_set: Vec<ClaimValue>,
        value: ClaimValue,
        nullifier_secret: NullifierSecret,
    },
}

impl PredicateSpec {
    /// Parse raw `private_inputs` / `public_inputs` objects for `kind`.
    ///
    /// Unknown or missing keys, wrong JSON types and out-of-range integers are
    /// all `InvalidInput`.
    pub fn from_json(
        kind: PredicateKind,
        private_inputs: &Value,
        public_inputs: &Value,
    ) -> Result<Self, ClaimProofError> {
        let public = Fields::new(public_inputs, Role::Public, kind)?;
        let private = Fields::new(private_inputs, Role::Private, kind)?;
        private.only(&["value", "nullifier_secret"])?;
        let nullifier_secret = private.secret("nullifier_secret")?;

        match kind {
            PredicateKind::Threshold => {
                public.only(&["threshold"])?;
                Ok(PredicateSpec::Threshold {
                    threshold: public.integer("threshold")?,
                    value: private.integer("value")?,
                    nullifier_secret,
                })
            }
            PredicateKind::Range => {
                public.only(&["min", "max"])?;
                Ok(PredicateSpec::Range {
                    min: public.integer("min")?,
                    max: public.integer("max")?,
                    value: private.integer("value")?,
                    nullifier_secret,
                })
            }
            PredicateKind::SetMembership => {
                // `set` is the older spelling of `allowed_set`.
                public.only(&["allowed_set", "set"])?;
                let key = if public.has("allowed_set") { "allowed_set" } else { "set" };
                Ok(PredicateSpec::SetMembership {
                    allowed_set: public.set(key)?,
                    value: private.claim_value("value")?,
                    nullifier_secret,
                })
            }
        }
    }

    pub fn kind(&self) -> PredicateKind {
        match self {
            PredicateSpec::Threshold { .. } => PredicateKind::Threshold,
            PredicateSpec::Range { .. } => PredicateKind::Range,
            PredicateSpec::SetMembership { .. } => PredicateKind::SetMembership,
        }
    }

    /// Public half as supplied (not yet canonicalized).
    pub fn public_inputs(&self) -> PublicInputs {
        match self {
            PredicateSpec::Threshold { threshold, .. } => PublicInputs::Threshold {
                threshold: *threshold,
            },
            PredicateSpec::Range { min, max, .. } => PublicInputs::Range {
                min: *min,
                max: *max,
            },
            PredicateSpec::SetMembership { allowed_set, .. } => PublicInputs::SetMembership {
                allowed_set: allowed_set.clone(),
            },
        }
    }

    pub fn nullifier_secret(&self) -> &NullifierSecret {
        match self {
            PredicateSpec::Threshold { nullifier_secret, .. }
            | PredicateSpec::Range { nullifier_secret, .. }
            | PredicateSpec::SetMembership { nullifier_secret, .. } => nullifier_secret,
        }
    }

    /// Whether the private value equals `attested` (attestation binding).
    pub fn value_matches(&self, attested: &ClaimValue) -> bool {
        match self {
            PredicateSpec::Threshold { value, .. } | PredicateSpec::Range { value, .. } => {
                attested.as_integer() == Some(*value)
            }
            PredicateSpec::SetMembership { value, .. } => value == attested,
        }
    }
}

impl Drop for PredicateSpec {
    fn drop(&mut self) {
        match self {
            PredicateSpec::Threshold { value, .. } | PredicateSpec::Range { value, .. } => {
                value.zeroize()
            }
            PredicateSpec::SetMembership { value, .. } => value.zeroize(),
        }
    }
}

impl fmt::Debug for PredicateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSpec")
            .field("kind", &self.kind())
            .field("public", &self.public_inputs())
            .field("private", &"<redacted>")
            .finish()
    }
}

// ------------------------------ Field extraction ------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Public,
    Private,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Public => "public_inputs",
            Role::Private => "private_inputs",
        }
    }
}

/// Schema-checked view over one JSON input object.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    role: Role,
    kind: PredicateKind,
}

impl<'a> Fields<'a> {
    fn new(v: &'a Value, role: Role, kind: PredicateKind) -> Result<Self, ClaimProofError> {
        match v {
            Value::Object(obj) => Ok(Self { obj, role, kind }),
            _ => Err(ClaimProofError::invalid(format!("{} must be a JSON object", role.as_str()))),
        }
    }

    fn shape_error(&self) -> ClaimProofError {
        ClaimProofError::invalid(format!(
            "{} do not match the {} schema",
            self.role.as_str(),
            self.kind
        ))
    }

    fn bounds_error(&self, key: &str) -> ClaimProofError {
        match self.role {
            Role::Private => ClaimProofError::invalid(format!(
                "private_inputs: {key} is outside the supported {VALUE_BITS}-bit range"
            )),
            Role::Public => ClaimProofError::invalid(format!(
                "public_inputs: {key} must be an unsigned {VALUE_BITS}-bit integer"
            )),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.obj.contains_key(key)
    }

    /// Reject keys outside `allowed`.
    fn only(&self, allowed: &[&str]) -> Result<(), ClaimProofError> {
        if self.obj.keys().all(|k| allowed.contains(&k.as_str())) {
            Ok(())
        } else {
            Err(self.shape_error())
        }
    }

    fn get(&self, key: &str) -> Result<&'a Value, ClaimProofError> {
        self.obj.get(key).ok_or_else(|| self.shape_error())
    }

    fn integer(&self, key: &str) -> Result<u64, ClaimProofError> {
        match self.get(key)? {
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Ok(v)
                } else if n.is_i64() {
                    // negative
                    Err(self.bounds_error(key))
                } else if n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false) {
                    // integral but beyond u64 (serde_json parses as f64)
                    Err(self.bounds_error(key))
                } else {
                    Err(self.shape_error())
                }
            }
            _ => Err(self.shape_error()),
        }
    }

    fn claim_value(&self, key: &str) -> Result<ClaimValue, ClaimProofError> {
        ClaimValue::from_json(self.get(key)?).ok_or_else(|| self.shape_error())
    }

    fn secret(&self, key: &str) -> Result<NullifierSecret, ClaimProofError> {
        match self.get(key)? {
            Value::String(s) => NullifierSecret::from_hex(s),
            _ => Err(self.shape_error()),
        }
    }

    fn set(&self, key: &str) -> Result<Vec<ClaimValue>, ClaimProofError> {
        let items = match self.get(key)? {
            Value::Array(items) => items,
            _ => return Err(self.shape_error()),
        };
        items
            .iter()
            .map(|v| {
                ClaimValue::from_json(v).ok_or_else(|| {
                    ClaimProofError::invalid(format!(
                        "public_inputs: {key} members must be unsigned {VALUE_BITS}-bit integers or non-empty strings"
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "0x0123456789abcdef0123456789abcdef";

    #[test]
    fn parses_threshold() {
        let spec = PredicateSpec::from_json(
            PredicateKind::Threshold,
            &json!({ "value": 25, "nullifier_secret": SECRET }),
            &json!({ "threshold": 18 }),
        )
        .unwrap();
        assert_eq!(spec.kind(), PredicateKind::Threshold);
        assert_eq!(spec.public_inputs(), PublicInputs::Threshold { threshold: 18 });
        assert!(spec.value_matches(&ClaimValue::Integer(25)));
        assert!(!spec.value_matches(&ClaimValue::Integer(26)));
        assert_eq!(spec.nullifier_secret().expose().len(), 16);
    }

    #[test]
    fn parses_set_membership_with_legacy_key() {
        let spec = PredicateSpec::from_json(
            PredicateKind::SetMembership,
            &json!({ "value": "DE", "nullifier_secret": SECRET }),
            &json!({ "set": ["FR", "DE", 7] }),
        )
        .unwrap();
        match spec.public_inputs() {
            PublicInputs::SetMembership { allowed_set } => {
                assert_eq!(allowed_set.len(), 3);
                assert_eq!(allowed_set[2], ClaimValue::Integer(7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_missing_keys() {
        let err = PredicateSpec::from_json(
            PredicateKind::Range,
            &json!({ "value": 5, "nullifier_secret": SECRET }),
            &json!({ "min": 1 }),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err = PredicateSpec::from_json(
            PredicateKind::Threshold,
            &json!({ "value": 5, "nullifier_secret": SECRET, "extra": true }),
            &json!({ "threshold": 1 }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("private_inputs do not match the threshold schema"));
    }

    #[test]
    fn private_errors_do_not_echo_values() {
        for bad in [json!(-42), json!(1.5), json!("1234"), json!(18446744073709551616.0)] {
            let err = PredicateSpec::from_json(
                PredicateKind::Threshold,
                &json!({ "value": bad, "nullifier_secret": SECRET }),
                &json!({ "threshold": 1 }),
            )
            .unwrap_err();
            let msg = err.to_string();
            assert!(!msg.contains("42"), "{msg}");
            assert!(!msg.contains("1.5"), "{msg}");
            assert!(!msg.contains("1234"), "{msg}");
        }
    }

    #[test]
    fn secret_length_policy() {
        assert!(NullifierSecret::from_hex("0xabc").is_err());
        assert!(NullifierSecret::from_hex("zz").is_err());
        assert!(NullifierSecret::from_bytes(vec![1; 65]).is_err());
        let s = NullifierSecret::from_bytes(vec![7; 32]).unwrap();
        assert_eq!(format!("{s:?}"), "NullifierSecret(<redacted>)");
    }

    #[test]
    fn debug_redacts_private_fields() {
        let spec = PredicateSpec::from_json(
            PredicateKind::Range,
            &json!({ "value": 31337, "nullifier_secret": SECRET }),
            &json!({ "min": 1, "max": 99999 }),
        )
        .unwrap();
        let dbg = format!("{spec:?}");
        assert!(!dbg.contains("31337"));
        assert!(!dbg.contains("0123456789abcdef"));
        assert!(dbg.contains("99999"));
    }

    #[test]
    fn kind_parsing() {
        for k in PredicateKind::ALL {
            assert_eq!(k.as_str().parse::<PredicateKind>().unwrap(), k);
        }
        assert!("membership".parse::<PredicateKind>().is_err());
    }
}
