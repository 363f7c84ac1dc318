//! Read-only access: point lookups, filtered queries, and the change feed.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use everelay_core::event::Event;
use everelay_core::filter::Filter;
use everelay_core::{EventId, PublicKey, Seq};
use redb_bincode::ReadableTable;

use crate::tables::{events, events_by_seq, seq_counter, EventRecord};
use crate::{Store, StoreResult};

/// Narrowing options for `CHANGES`/`CHANGES_SUB` (spec §4.5). `since` is
/// threaded separately since it is also the subscription cursor.
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    pub limit: Option<u64>,
    pub kinds: Option<Vec<u32>>,
    pub authors: Option<Vec<PublicKey>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangesResult {
    pub changes: Vec<(Seq, Event)>,
    pub last_seq: Seq,
}

/// `(created_at desc, id asc)`, the order results are returned in.
fn by_recency(a: &Event, b: &Event) -> std::cmp::Ordering {
    (Reverse(a.created_at), a.id).cmp(&(Reverse(b.created_at), b.id))
}

impl Store {
    pub async fn get(&self, id: EventId) -> StoreResult<Option<Event>> {
        self.read_with(move |tx| {
            let events_tbl = tx.open_table(&events::TABLE)?;
            Ok(events_tbl.get(&id)?.map(|g| g.value().into_event(id)))
        })
        .await
    }

    /// Union, across `filters`, of every stored event matching at least one
    /// filter, each filter's own `limit` applied before the union, the
    /// final result deduplicated by id and sorted newest-first.
    pub async fn query(&self, filters: Vec<Filter>) -> StoreResult<Vec<Event>> {
        self.read_with(move |tx| {
            let events_tbl = tx.open_table(&events::TABLE)?;
            let mut by_id: BTreeMap<EventId, Event> = BTreeMap::new();
            for filter in &filters {
                let mut matched = collect_for_filter(&events_tbl, filter)?;
                matched.sort_by(by_recency);
                if let Some(limit) = filter.limit {
                    matched.truncate(limit as usize);
                }
                for event in matched {
                    by_id.entry(event.id).or_insert(event);
                }
            }
            let mut result: Vec<Event> = by_id.into_values().collect();
            result.sort_by(by_recency);
            Ok(result)
        })
        .await
    }

    /// One-shot `CHANGES`: every event with `seq > since`, newest-appended
    /// last, plus the correct `lastSeq` cursor (spec §4.5).
    pub async fn query_changes(
        &self,
        since: Seq,
        options: ChangesOptions,
    ) -> StoreResult<ChangesResult> {
        self.read_with(move |tx| {
            let events_by_seq_tbl = tx.open_table(&events_by_seq::TABLE)?;
            let events_tbl = tx.open_table(&events::TABLE)?;
            let seq_counter_tbl = tx.open_table(&seq_counter::TABLE)?;
            let global_last_seq = seq_counter_tbl.get(&())?.map(|g| g.value()).unwrap_or(0);

            let lower = since.saturating_add(1);
            let mut changes = Vec::new();
            let mut max_seq = 0;
            for entry in events_by_seq_tbl.range(&lower..)? {
                let (seq, id) = {
                    let (k, v) = entry?;
                    (k.value(), v.value())
                };
                let Some(record) = events_tbl.get(&id)?.map(|g| g.value()) else {
                    continue;
                };
                if let Some(kinds) = &options.kinds {
                    if !kinds.is_empty() && !kinds.contains(&record.kind) {
                        continue;
                    }
                }
                if let Some(authors) = &options.authors {
                    if !authors.is_empty() && !authors.contains(&record.pubkey) {
                        continue;
                    }
                }
                max_seq = max_seq.max(seq);
                changes.push((seq, record.into_event(id)));
                if let Some(limit) = options.limit {
                    if changes.len() as u64 >= limit {
                        break;
                    }
                }
            }
            let last_seq = if changes.is_empty() {
                global_last_seq
            } else {
                max_seq
            };
            Ok(ChangesResult { changes, last_seq })
        })
        .await
    }

    pub async fn last_seq(&self) -> StoreResult<Seq> {
        self.read_with(|tx| {
            let seq_counter_tbl = tx.open_table(&seq_counter::TABLE)?;
            Ok(seq_counter_tbl.get(&())?.map(|g| g.value()).unwrap_or(0))
        })
        .await
    }

    /// Replay bracket for `CHANGES_SUB` (spec §4.5, §9): every persisted
    /// change with `seq > since` matching `options`, plus the store's
    /// global `lastSeq` as it stood in the *same* read transaction as the
    /// scan. The caller registers its live subscription using that
    /// snapshot as the floor below which incoming broadcasts are already
    /// accounted for by this replay, so no event is delivered twice.
    pub async fn subscribe_replay(
        &self,
        since: Seq,
        options: ChangesOptions,
    ) -> StoreResult<(Vec<(Seq, Event)>, Seq)> {
        self.read_with(move |tx| {
            let events_by_seq_tbl = tx.open_table(&events_by_seq::TABLE)?;
            let events_tbl = tx.open_table(&events::TABLE)?;
            let seq_counter_tbl = tx.open_table(&seq_counter::TABLE)?;
            let snapshot = seq_counter_tbl.get(&())?.map(|g| g.value()).unwrap_or(0);

            let lower = since.saturating_add(1);
            let mut changes = Vec::new();
            for entry in events_by_seq_tbl.range(&lower..)? {
                let (seq, id) = {
                    let (k, v) = entry?;
                    (k.value(), v.value())
                };
                let Some(record) = events_tbl.get(&id)?.map(|g| g.value()) else {
                    continue;
                };
                if let Some(kinds) = &options.kinds {
                    if !kinds.is_empty() && !kinds.contains(&record.kind) {
                        continue;
                    }
                }
                if let Some(authors) = &options.authors {
                    if !authors.is_empty() && !authors.contains(&record.pubkey) {
                        continue;
                    }
                }
                changes.push((seq, record.into_event(id)));
            }
            Ok((changes, snapshot))
        })
        .await
    }
}

fn collect_for_filter(
    events_tbl: &impl ReadableTable<EventId, EventRecord>,
    filter: &Filter,
) -> StoreResult<Vec<Event>> {
    if let Some(ids) = &filter.ids {
        if !ids.is_empty() {
            let mut out = Vec::with_capacity(ids.len());
            for &id in ids {
                if let Some(record) = events_tbl.get(&id)?.map(|g| g.value()) {
                    let event = record.into_event(id);
                    if filter.matches(&event) {
                        out.push(event);
                    }
                }
            }
            return Ok(out);
        }
    }

    let mut out = Vec::new();
    for entry in events_tbl.range(..)? {
        let (id, record) = {
            let (k, v) = entry?;
            (k.value(), v.value())
        };
        let event = record.into_event(id);
        if filter.matches(&event) {
            out.push(event);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use everelay_core::Signature;

    use super::*;
    use crate::Store;

    fn event(pubkey: PublicKey, kind: u32, created_at: i64, tags: Vec<Vec<String>>) -> Event {
        let content = String::new();
        let id = Event::compute_id(&pubkey, created_at, kind, &tags, &content);
        Event::assume_valid(id, pubkey, created_at, kind, tags, content, Signature::from_bytes([0; 64]))
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn get_returns_none_for_unknown_id() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.get(EventId::from_bytes([7; 32])).await.unwrap(), None);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn query_unions_filters_and_sorts_newest_first() {
        let store = Store::open_in_memory().await.unwrap();
        let pk = PublicKey::from_bytes([1; 32]);
        let a = event(pk, 1, 10, vec![]);
        let b = event(pk, 1, 20, vec![]);
        store.ingest(a.clone()).await.unwrap();
        store.ingest(b.clone()).await.unwrap();

        let results = store.query(vec![Filter::default()]).await.unwrap();
        assert_eq!(results, vec![b, a]);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn query_with_present_but_empty_ids_scans_every_event() {
        let store = Store::open_in_memory().await.unwrap();
        let pk = PublicKey::from_bytes([1; 32]);
        let a = event(pk, 1, 10, vec![]);
        let b = event(pk, 1, 20, vec![]);
        store.ingest(a.clone()).await.unwrap();
        store.ingest(b.clone()).await.unwrap();

        let results = store
            .query(vec![Filter {
                ids: Some(vec![]),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert_eq!(results, vec![b, a]);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn query_changes_reports_global_last_seq_when_empty() {
        let store = Store::open_in_memory().await.unwrap();
        let pk = PublicKey::from_bytes([1; 32]);
        store.ingest(event(pk, 1, 1, vec![])).await.unwrap();

        let result = store
            .query_changes(100, ChangesOptions::default())
            .await
            .unwrap();
        assert!(result.changes.is_empty());
        assert_eq!(result.last_seq, 1);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn query_changes_filters_by_kind() {
        let store = Store::open_in_memory().await.unwrap();
        let pk = PublicKey::from_bytes([1; 32]);
        store.ingest(event(pk, 1, 1, vec![])).await.unwrap();
        store.ingest(event(pk, 2, 2, vec![])).await.unwrap();

        let result = store
            .query_changes(
                0,
                ChangesOptions {
                    kinds: Some(vec![2]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].1.kind, 2);
        assert_eq!(result.last_seq, 2);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn query_changes_present_but_empty_kinds_imposes_no_constraint() {
        let store = Store::open_in_memory().await.unwrap();
        let pk = PublicKey::from_bytes([1; 32]);
        store.ingest(event(pk, 1, 1, vec![])).await.unwrap();
        store.ingest(event(pk, 2, 2, vec![])).await.unwrap();

        let result = store
            .query_changes(
                0,
                ChangesOptions {
                    kinds: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.changes.len(), 2);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn subscribe_replay_snapshot_is_the_global_last_seq_even_when_filtered_out() {
        let store = Store::open_in_memory().await.unwrap();
        let pk = PublicKey::from_bytes([1; 32]);
        store.ingest(event(pk, 1, 1, vec![])).await.unwrap();
        store.ingest(event(pk, 2, 2, vec![])).await.unwrap();

        let (changes, snapshot) = store
            .subscribe_replay(
                0,
                ChangesOptions {
                    kinds: Some(vec![1]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, 1);
        // The snapshot is the true global last_seq (2), not the matched max
        // (1): a live event with seq 2 must not be re-delivered, and a
        // caller using this as a subscription floor relies on exactly this.
        assert_eq!(snapshot, 2);
    }
}
