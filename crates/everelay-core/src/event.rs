//! The [`Event`] type and its canonical serialization.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{EventId, PublicKey, Signature, Timestamp};

/// A single tag: an ordered, non-empty sequence of strings.
///
/// The spec requires each inner sequence to have length >= 1; this is
/// enforced by the structural validator, not by the type itself, since the
/// type must still be able to represent (and reject) a malformed empty tag
/// read off the wire.
pub type Tag = Vec<String>;

/// An immutable, signed record; the unit of publication.
///
/// Construction (`Event::new` plus `Validator::validate`, see
/// [`crate::validate`]) is the only way to obtain one: there is no public
/// way to build an `Event` whose `id` doesn't match its canonical
/// serialization, short of using [`Event::assume_valid`] for trusted
/// round-trips out of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: Signature,
}

impl Event {
    /// Reconstruct an `Event` already known to be valid (e.g. one just read
    /// back out of the store). Does *not* recheck the hash or signature.
    pub fn assume_valid(
        id: EventId,
        pubkey: PublicKey,
        created_at: Timestamp,
        kind: u32,
        tags: Vec<Tag>,
        content: String,
        sig: Signature,
    ) -> Self {
        Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig,
        }
    }

    /// The canonical serialization used for hashing: the JSON array
    /// `[0, pubkey, created_at, kind, tags, content]`, compact (no
    /// extraneous whitespace), preserving tag order.
    pub fn canonical_bytes(
        pubkey: &PublicKey,
        created_at: Timestamp,
        kind: u32,
        tags: &[Tag],
        content: &str,
    ) -> Vec<u8> {
        let value = serde_json::json!([0, pubkey.to_string(), created_at, kind, tags, content]);
        // `serde_json`'s default `Serializer` never inserts whitespace and
        // escapes exactly the characters JSON requires, which matches the
        // canonical form byte for byte.
        serde_json::to_vec(&value).expect("json array of known-serializable fields can't fail")
    }

    pub fn compute_id(
        pubkey: &PublicKey,
        created_at: Timestamp,
        kind: u32,
        tags: &[Tag],
        content: &str,
    ) -> EventId {
        let bytes = Self::canonical_bytes(pubkey, created_at, kind, tags, content);
        let digest = Sha256::digest(&bytes);
        EventId::from_bytes(digest.into())
    }

    /// First two positions of each tag whose first position is a single
    /// ASCII letter (`a`-`z`, `A`-`Z`): the tags that get materialized as
    /// tag-index entries and that `#X` filters can match against.
    pub fn indexable_tags(&self) -> impl Iterator<Item = (u8, &str)> {
        self.tags.iter().filter_map(|tag| {
            let name = tag.first()?;
            let mut chars = name.chars();
            let (Some(letter), None) = (chars.next(), chars.next()) else {
                return None;
            };
            if !letter.is_ascii_alphabetic() {
                return None;
            }
            let value = tag.get(1).map(String::as_str).unwrap_or("");
            Some((letter as u8, value))
        })
    }

    /// Value of the first `d` tag, or `""` if absent — the addressable-event
    /// document discriminator.
    pub fn d_tag(&self) -> &str {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some("d"))
            .and_then(|t| t.get(1))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}
