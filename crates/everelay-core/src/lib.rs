#[macro_use]
mod macros;

pub mod event;
pub mod filter;
pub mod kind;
pub mod validate;

use snafu::Snafu;

define_hex_array!(
    /// A 32-byte identity hash: the SHA-256 digest of an event's canonical
    /// serialization.
    struct EventId, 32
);

define_hex_array!(
    /// A 32-byte BIP-340 x-only public key, hex encoded.
    struct PublicKey, 32
);

define_hex_array!(
    /// A 64-byte BIP-340 Schnorr signature, hex encoded.
    struct Signature, 64
);

/// Seconds since the Unix epoch, as carried on [`event::Event::created_at`].
pub type Timestamp = i64;

/// The globally monotonic sequence number assigned to a stored event.
///
/// `0` is reserved to mean "no sequence assigned yet" (used as the default
/// `since` cursor and as the `lastSeq()` of an empty store).
pub type Seq = u64;

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum HexParseError {
    #[snafu(display("expected {expected} hex chars, got {got}"))]
    WrongLength { expected: usize, got: usize },
    #[snafu(display("value is not lowercase hex"))]
    NotLowercaseHex,
}
