//! The query/subscription filter and its matching semantics.
//!
//! A single [`Filter`] is a conjunction of its present fields; a `REQ` or
//! `CHANGES` subscription carries a list of filters and an event matches the
//! subscription if it matches *any* of them (disjunction across filters).
//! `limit` bounds how many stored events a query returns and plays no part
//! in live matching, so it isn't consulted by [`Filter::matches`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::{EventId, PublicKey, Timestamp};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<EventId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<PublicKey>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// `#<letter>` tag predicates, e.g. `#e` or `#p`. Only single
    /// ASCII-letter tag names participate, matching what's indexable.
    #[serde(flatten)]
    pub tags: TagFilters,
}

/// The `#X` fields of a filter, keyed by tag letter.
///
/// Modeled as its own type (rather than inlined into `Filter`) so the
/// `#[serde(flatten)]` use above can deserialize arbitrary `#<letter>` keys
/// without `Filter` needing a custom `Deserialize` impl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilters(pub BTreeMap<u8, Vec<String>>);

impl Serialize for TagFilters {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (letter, values) in &self.0 {
            map.serialize_entry(&format!("#{}", *letter as char), values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TagFilters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: BTreeMap<String, Vec<String>> = BTreeMap::deserialize(deserializer)?;
        let mut tags = BTreeMap::new();
        for (key, values) in raw {
            let mut chars = key.strip_prefix('#').map(str::chars).unwrap_or_default();
            let (Some(letter), None) = (chars.next(), chars.next()) else {
                continue;
            };
            if letter.is_ascii_alphabetic() {
                tags.insert(letter as u8, values);
            }
        }
        Ok(TagFilters(tags))
    }
}

impl Filter {
    /// Whether `event` satisfies every present field of this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.is_empty() && !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.is_empty() && !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.is_empty() && !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (letter, wanted) in &self.tags.0 {
            if wanted.is_empty() {
                continue;
            }
            let has_match = event
                .indexable_tags()
                .any(|(l, value)| l == *letter && wanted.iter().any(|w| w == value));
            if !has_match {
                return false;
            }
        }
        true
    }
}

/// Whether `event` matches at least one filter in `filters` (empty list
/// matches nothing, per the usual `REQ [] => no results` convention).
pub fn matches_any(event: &Event, filters: &[Filter]) -> bool {
    filters.iter().any(|f| f.matches(event))
}
