//! The ingest pipeline: validated-event retention policy, applied
//! atomically against the store.

use everelay_core::event::Event;
use everelay_core::kind::{classify, KindClass, SYNCABLE_RANGE};
use everelay_core::{EventId, PublicKey, Seq};
use redb_bincode::ReadableTable as _;
use snafu::OptionExt as _;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::tables::{
    addressable_index, event_tags, events, events_by_seq, replaceable_index, seq_counter,
    EventRecord,
};
use crate::{BroadcastEvent, OverflowSnafu, Store, StoreResult, WriteTransactionCtx, LOG_TARGET};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted { seq: Option<Seq> },
    Duplicate { reason: String, seq: Option<Seq> },
    Rejected { reason: String },
}

impl Store {
    /// Run the ingest pipeline (spec §4.2) for an already-validated event.
    #[instrument(skip_all, fields(kind = event.kind))]
    pub async fn ingest(&self, event: Event) -> StoreResult<IngestOutcome> {
        let Some(class) = classify(event.kind) else {
            return Ok(IngestOutcome::Rejected {
                reason: "invalid: kind has no retention class".to_string(),
            });
        };

        if class == KindClass::Ephemeral {
            let _ = self.broadcast_tx.send(BroadcastEvent {
                event,
                seq: None,
            });
            return Ok(IngestOutcome::Accepted { seq: None });
        }

        let broadcast_tx = self.broadcast_tx.clone();
        self.write_with(move |tx| ingest_tx(tx, class, event, broadcast_tx))
            .await
    }

    /// `purgeDocument(pubkey, kind, docId) -> {deleted: int}`.
    pub async fn purge_document(
        &self,
        pubkey: PublicKey,
        kind: u32,
        doc_id: String,
    ) -> StoreResult<usize> {
        self.write_with(move |tx| {
            let mut events_tbl = tx.open_table(&events::TABLE)?;
            let mut events_by_seq_tbl = tx.open_table(&events_by_seq::TABLE)?;
            let mut event_tags_tbl = tx.open_table(&event_tags::TABLE)?;
            let targets =
                find_document_events_mut(&events_tbl, &event_tags_tbl, pubkey, kind, &doc_id)?;
            let mut deleted = 0;
            for id in targets {
                if delete_event_tx(&mut events_tbl, &mut events_by_seq_tbl, &mut event_tags_tbl, id)?
                    .is_some()
                {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
        .await
    }
}

fn ingest_tx(
    tx: &WriteTransactionCtx,
    class: KindClass,
    event: Event,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
) -> StoreResult<IngestOutcome> {
    let mut events_tbl = tx.open_table(&events::TABLE)?;
    let mut events_by_seq_tbl = tx.open_table(&events_by_seq::TABLE)?;
    let mut event_tags_tbl = tx.open_table(&event_tags::TABLE)?;
    let mut replaceable_tbl = tx.open_table(&replaceable_index::TABLE)?;
    let mut addressable_tbl = tx.open_table(&addressable_index::TABLE)?;
    let mut seq_counter_tbl = tx.open_table(&seq_counter::TABLE)?;

    if let Some(existing) = events_tbl.get(&event.id)?.map(|g| g.value()) {
        return Ok(IngestOutcome::Duplicate {
            reason: "duplicate: already have this event".to_string(),
            seq: Some(existing.seq),
        });
    }

    match class {
        KindClass::Ephemeral => unreachable!("handled by Store::ingest before opening a tx"),
        KindClass::Purge => {
            let Some(d_tag) = event.first_tag_value("d") else {
                return Ok(IngestOutcome::Rejected {
                    reason: "invalid: purge event missing `d` tag".to_string(),
                });
            };
            let Some(k_value) = event.first_tag_value("k") else {
                return Ok(IngestOutcome::Rejected {
                    reason: "invalid: purge event missing `k` tag".to_string(),
                });
            };
            let Ok(parsed_kind) = k_value.parse::<u32>() else {
                return Ok(IngestOutcome::Rejected {
                    reason: "invalid: purge event `k` tag is not an integer".to_string(),
                });
            };
            if !SYNCABLE_RANGE.contains(&parsed_kind) {
                return Ok(IngestOutcome::Rejected {
                    reason: "invalid: purge event `k` tag is outside the syncable range"
                        .to_string(),
                });
            }

            let targets = {
                let read_events = &events_tbl;
                let read_tags = &event_tags_tbl;
                find_document_events_mut(read_events, read_tags, event.pubkey, parsed_kind, d_tag)?
            };
            for id in targets {
                delete_event_tx(
                    &mut events_tbl,
                    &mut events_by_seq_tbl,
                    &mut event_tags_tbl,
                    id,
                )?;
            }

            let seq = insert_event_tx(
                &mut seq_counter_tbl,
                &mut events_tbl,
                &mut events_by_seq_tbl,
                &mut event_tags_tbl,
                &event,
            )?;
            notify_on_commit(tx, broadcast_tx, event, seq);
            Ok(IngestOutcome::Accepted { seq: Some(seq) })
        }
        KindClass::Replaceable => {
            let key = (event.pubkey, event.kind);
            if let Some(existing_id) = replaceable_tbl.get(&key)?.map(|g| g.value()) {
                let existing = events_tbl
                    .get(&existing_id)?
                    .map(|g| g.value())
                    .expect("replaceable index points at a missing event");
                if existing_wins(existing.created_at, existing_id, event.created_at, event.id) {
                    return Ok(IngestOutcome::Duplicate {
                        reason: "duplicate: have a newer version of this replaceable event"
                            .to_string(),
                        seq: Some(existing.seq),
                    });
                }
                delete_event_tx(
                    &mut events_tbl,
                    &mut events_by_seq_tbl,
                    &mut event_tags_tbl,
                    existing_id,
                )?;
            }
            let seq = insert_event_tx(
                &mut seq_counter_tbl,
                &mut events_tbl,
                &mut events_by_seq_tbl,
                &mut event_tags_tbl,
                &event,
            )?;
            replaceable_tbl.insert(&key, &event.id)?;
            notify_on_commit(tx, broadcast_tx, event, seq);
            Ok(IngestOutcome::Accepted { seq: Some(seq) })
        }
        KindClass::Addressable => {
            let d_tag = event.d_tag().to_string();
            let key = (event.pubkey, event.kind, d_tag.clone());
            if let Some(existing_id) = addressable_tbl.get(&key)?.map(|g| g.value()) {
                let existing = events_tbl
                    .get(&existing_id)?
                    .map(|g| g.value())
                    .expect("addressable index points at a missing event");
                if existing_wins(existing.created_at, existing_id, event.created_at, event.id) {
                    return Ok(IngestOutcome::Duplicate {
                        reason: "duplicate: have a newer version of this addressable event"
                            .to_string(),
                        seq: Some(existing.seq),
                    });
                }
                delete_event_tx(
                    &mut events_tbl,
                    &mut events_by_seq_tbl,
                    &mut event_tags_tbl,
                    existing_id,
                )?;
            }
            let seq = insert_event_tx(
                &mut seq_counter_tbl,
                &mut events_tbl,
                &mut events_by_seq_tbl,
                &mut event_tags_tbl,
                &event,
            )?;
            addressable_tbl.insert(&key, &event.id)?;
            notify_on_commit(tx, broadcast_tx, event, seq);
            Ok(IngestOutcome::Accepted { seq: Some(seq) })
        }
        KindClass::Syncable | KindClass::Regular => {
            let seq = insert_event_tx(
                &mut seq_counter_tbl,
                &mut events_tbl,
                &mut events_by_seq_tbl,
                &mut event_tags_tbl,
                &event,
            )?;
            notify_on_commit(tx, broadcast_tx, event, seq);
            Ok(IngestOutcome::Accepted { seq: Some(seq) })
        }
    }
}

/// `(created_at desc, id asc)` tuple order: the lexicographically smaller
/// tuple wins and is kept. Returns whether the *existing* event wins.
fn existing_wins(
    existing_created_at: everelay_core::Timestamp,
    existing_id: EventId,
    incoming_created_at: everelay_core::Timestamp,
    incoming_id: EventId,
) -> bool {
    let existing_key = (std::cmp::Reverse(existing_created_at), existing_id);
    let incoming_key = (std::cmp::Reverse(incoming_created_at), incoming_id);
    existing_key <= incoming_key
}

fn notify_on_commit(
    tx: &WriteTransactionCtx,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
    event: Event,
    seq: Seq,
) {
    tx.on_commit(move || {
        let _ = broadcast_tx.send(BroadcastEvent {
            event,
            seq: Some(seq),
        });
    });
}

fn insert_event_tx(
    seq_counter_tbl: &mut seq_counter::Table<'_>,
    events_tbl: &mut events::Table<'_>,
    events_by_seq_tbl: &mut events_by_seq::Table<'_>,
    event_tags_tbl: &mut event_tags::Table<'_>,
    event: &Event,
) -> StoreResult<Seq> {
    let current = seq_counter_tbl.get(&())?.map(|g| g.value()).unwrap_or(0);
    let seq = current.checked_add(1).context(OverflowSnafu)?;
    seq_counter_tbl.insert(&(), &seq)?;

    events_tbl.insert(&event.id, &EventRecord::from_event(event, seq))?;
    events_by_seq_tbl.insert(&seq, &event.id)?;

    for (letter, value) in event.indexable_tags() {
        event_tags_tbl.insert(&(letter, value.to_string(), event.id), &())?;
    }

    tracing::debug!(target: LOG_TARGET, id = %event.id, seq, "event inserted");
    Ok(seq)
}

fn delete_event_tx(
    events_tbl: &mut events::Table<'_>,
    events_by_seq_tbl: &mut events_by_seq::Table<'_>,
    event_tags_tbl: &mut event_tags::Table<'_>,
    id: EventId,
) -> StoreResult<Option<EventRecord>> {
    let Some(record) = events_tbl.get(&id)?.map(|g| g.value()) else {
        return Ok(None);
    };
    let event = record.clone().into_event(id);
    for (letter, value) in event.indexable_tags() {
        event_tags_tbl.remove(&(letter, value.to_string(), id))?;
    }
    events_tbl.remove(&id)?;
    events_by_seq_tbl.remove(&record.seq)?;
    Ok(Some(record))
}

/// Find every stored event matching `(pubkey, kind, d-tag)`, via the `d`
/// tag index, narrowed down by `pubkey`/`kind`.
fn find_document_events_mut(
    events_tbl: &events::Table<'_>,
    event_tags_tbl: &event_tags::Table<'_>,
    pubkey: PublicKey,
    kind: u32,
    doc_id: &str,
) -> StoreResult<Vec<EventId>> {
    let lo = (b'd', doc_id.to_string(), EventId::from_bytes([0; 32]));
    let hi = (b'd', doc_id.to_string(), EventId::from_bytes([0xff; 32]));
    let mut matches = Vec::new();
    for entry in event_tags_tbl.range(&lo..=&hi)? {
        let ((_, _, id), ()) = {
            let (k, v) = entry?;
            (k.value(), v.value())
        };
        let Some(record) = events_tbl.get(&id)?.map(|g| g.value()) else {
            continue;
        };
        if record.pubkey == pubkey && record.kind == kind {
            matches.push(id);
        }
    }
    Ok(matches)
}
