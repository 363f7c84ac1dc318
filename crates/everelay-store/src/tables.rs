//! Table schema for the event store.

use bincode::{Decode, Encode};
use everelay_core::event::Tag;
use everelay_core::{EventId, PublicKey, Seq, Signature, Timestamp};

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

/// A persisted event, keyed by [`EventId`] in the [`events`] table.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct EventRecord {
    pub seq: Seq,
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: Signature,
}

impl EventRecord {
    pub fn into_event(self, id: EventId) -> everelay_core::event::Event {
        everelay_core::event::Event::assume_valid(
            id,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
            self.sig,
        )
    }

    pub fn from_event(event: &everelay_core::event::Event, seq: Seq) -> Self {
        Self {
            seq,
            pubkey: event.pubkey,
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
            sig: event.sig,
        }
    }
}

def_table! {
    /// Authoritative event storage, keyed by id.
    events: EventId => EventRecord
}

def_table! {
    /// Seq-ordered index of every persisted event, the change feed's spine.
    events_by_seq: Seq => EventId
}

def_table! {
    /// Tag index: `(tag_name, tag_value, event_id) => ()`. Only single
    /// ASCII-letter tag names are materialized here.
    ///
    /// Keying `event_id` last (rather than as the sole key) lets a prefix
    /// scan over `(tag_name, tag_value)` enumerate every matching event.
    event_tags: (u8, String, EventId) => ()
}

def_table! {
    /// Singleton index for replaceable kinds: `(pubkey, kind) => id`.
    replaceable_index: (PublicKey, u32) => EventId
}

def_table! {
    /// Singleton index for addressable kinds: `(pubkey, kind, d_tag) => id`.
    addressable_index: (PublicKey, u32, String) => EventId
}

def_table! {
    /// The single global monotonic sequence counter.
    seq_counter: () => Seq
}
