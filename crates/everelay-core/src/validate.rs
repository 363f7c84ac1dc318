//! Structural, identity-hash and signature validation of inbound events.
//!
//! Pure and free of I/O, as required: everything here is a computation over
//! the bytes the client sent plus a caller-supplied `now`.

use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Message, XOnlyPublicKey};
use snafu::Snafu;

use crate::event::{Event, Tag};
use crate::{EventId, PublicKey, Signature, Timestamp};

/// How far into the future a `created_at` may be before it's rejected.
pub const MAX_FUTURE_SECS: i64 = 900;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[snafu(display("invalid: not a JSON object"))]
    NotAnObject,
    #[snafu(display("invalid: missing or malformed field `{field}`"))]
    MalformedField { field: &'static str },
    #[snafu(display("invalid: kind must be an integer in 0..=65535"))]
    KindOutOfRange,
    #[snafu(display("invalid: tags must be an array of non-empty arrays of strings"))]
    MalformedTags,
    #[snafu(display("invalid: id does not match sha256 of the canonical serialization"))]
    IdMismatch,
    #[snafu(display("invalid: signature does not verify"))]
    BadSignature,
    #[snafu(display("invalid: created_at is too far in the future"))]
    FutureTimestamp,
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a raw client-submitted JSON value into a fully checked
/// [`Event`], or a rejection reason prefixed `invalid:`.
pub fn validate(raw: &serde_json::Value, now: Timestamp) -> ValidationResult<Event> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let id = parse_hex_field::<EventId>(obj, "id")?;
    let pubkey = parse_hex_field::<PublicKey>(obj, "pubkey")?;
    let sig = parse_hex_field::<Signature>(obj, "sig")?;

    let created_at = obj
        .get("created_at")
        .and_then(serde_json::Value::as_i64)
        .ok_or(ValidationError::MalformedField {
            field: "created_at",
        })?;

    let kind = obj
        .get("kind")
        .and_then(serde_json::Value::as_u64)
        .ok_or(ValidationError::MalformedField { field: "kind" })?;
    let kind: u32 = kind.try_into().map_err(|_| ValidationError::KindOutOfRange)?;
    if kind > 65535 {
        return Err(ValidationError::KindOutOfRange);
    }

    let content = obj
        .get("content")
        .and_then(serde_json::Value::as_str)
        .ok_or(ValidationError::MalformedField { field: "content" })?
        .to_string();

    let tags = parse_tags(obj.get("tags"))?;

    if Event::compute_id(&pubkey, created_at, kind, &tags, &content) != id {
        return Err(ValidationError::IdMismatch);
    }

    verify_signature(&id, &pubkey, &sig)?;

    if created_at > now + MAX_FUTURE_SECS {
        return Err(ValidationError::FutureTimestamp);
    }

    Ok(Event::assume_valid(
        id, pubkey, created_at, kind, tags, content, sig,
    ))
}

fn parse_hex_field<T: std::str::FromStr>(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> ValidationResult<T> {
    obj.get(field)
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or(ValidationError::MalformedField { field })
}

fn parse_tags(value: Option<&serde_json::Value>) -> ValidationResult<Vec<Tag>> {
    let array = value
        .and_then(serde_json::Value::as_array)
        .ok_or(ValidationError::MalformedTags)?;

    array
        .iter()
        .map(|inner| {
            let inner = inner.as_array().ok_or(ValidationError::MalformedTags)?;
            if inner.is_empty() {
                return Err(ValidationError::MalformedTags);
            }
            inner
                .iter()
                .map(|s| {
                    s.as_str()
                        .map(str::to_string)
                        .ok_or(ValidationError::MalformedTags)
                })
                .collect::<ValidationResult<Tag>>()
        })
        .collect()
}

fn verify_signature(
    id: &EventId,
    pubkey: &PublicKey,
    sig: &Signature,
) -> ValidationResult<()> {
    let xonly = XOnlyPublicKey::from_slice(pubkey.as_bytes())
        .map_err(|_| ValidationError::BadSignature)?;
    let schnorr_sig =
        SchnorrSignature::from_slice(sig.as_bytes()).map_err(|_| ValidationError::BadSignature)?;
    let message = Message::from_digest(*id.as_bytes());

    secp256k1::SECP256K1
        .verify_schnorr(&schnorr_sig, &message, &xonly)
        .map_err(|_| ValidationError::BadSignature)
}
