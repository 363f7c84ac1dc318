//! The connection handler: per-socket command dispatch, subscription
//! registry and broadcast fan-out (spec §4.6, §5).
//!
//! Each accepted connection owns one task running the select loop below.
//! It is, at once, the spec's "Connection Handler" (parses frames,
//! dispatches, serializes responses) and its "Subscription Registry" for
//! this connection (the `regular_subs`/`change_subs` maps). The
//! "Broadcaster" is `everelay_store::Store`'s `tokio::sync::broadcast`
//! channel: every connection subscribes to it directly and applies its own
//! matching/fan-out rules to each event, which gives snapshot iteration
//! over "the registry" for free and needs no separate lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use everelay_core::filter::{matches_any, Filter};
use everelay_core::{validate, PublicKey, Seq};
use everelay_proto::client::ChangesOptions as ClientChangesOptions;
use everelay_proto::{ChangeEntry, ClientMessage, RelayMessage};
use everelay_store::{BroadcastEvent, ChangesOptions as StoreChangesOptions, IngestOutcome, Store};
use everelay_util_error::FmtCompact as _;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, instrument, warn};

const LOG_TARGET: &str = "everelay::connection";

/// Max number of response frames a slow client can have buffered before we
/// drop the connection rather than let the writer queue grow unbounded.
const OUTBOX_CAPACITY: usize = 1024;

/// Longest accepted subscription id, per spec §3.
const MAX_SUB_ID_LEN: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live change-feed subscription on this connection.
struct ChangeFeedSub {
    options: ClientChangesOptions,
    /// Every replayed change up to (and including) this seq has already
    /// been delivered; live broadcasts with `seq <= floor` are skipped so
    /// they aren't delivered a second time (see `Store::subscribe_replay`).
    floor: Seq,
}

impl ChangeFeedSub {
    fn matches(&self, kind: u32, pubkey: PublicKey) -> bool {
        if let Some(kinds) = &self.options.kinds {
            if !kinds.is_empty() && !kinds.contains(&kind) {
                return false;
            }
        }
        if let Some(authors) = &self.options.authors {
            if !authors.is_empty() && !authors.contains(&pubkey) {
                return false;
            }
        }
        true
    }
}

/// This connection's subscription state: the per-connection half of the
/// spec's Subscription Registry.
#[derive(Default)]
struct Registry {
    regular: HashMap<String, Vec<Filter>>,
    change_feed: HashMap<String, ChangeFeedSub>,
}

pub async fn handle_socket(socket: WebSocket, store: Arc<Store>) {
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let span = tracing::info_span!(target: LOG_TARGET, "connection", connection_id);
    let _enter = span.enter();
    debug!(target: LOG_TARGET, "connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<RelayMessage>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(Message::Text(msg.to_json_string().into())).await.is_err() {
                break;
            }
        }
    });

    let mut broadcast_rx = store.subscribe();
    let mut registry = Registry::default();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(frame) = frame else { break };
                let Ok(frame) = frame else { break };
                if !handle_frame(frame, &store, &out_tx, &mut registry).await {
                    break;
                }
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => fan_out(&event, &registry, &out_tx).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: LOG_TARGET, skipped, "broadcast receiver lagged, some live events were dropped");
                        let _ = out_tx
                            .send(RelayMessage::Notice {
                                text: format!(
                                    "error: dropped {skipped} live event(s), reconnect and resume from LASTSEQ"
                                ),
                            })
                            .await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    debug!(target: LOG_TARGET, "connection closed");
}

/// Handle one inbound transport frame. Returns `false` if the connection
/// should be closed.
async fn handle_frame(
    frame: Message,
    store: &Store,
    out_tx: &mpsc::Sender<RelayMessage>,
    registry: &mut Registry,
) -> bool {
    let text = match frame {
        Message::Text(text) => text.to_string(),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                notice(out_tx, "malformed: binary frame is not valid UTF-8").await;
                return true;
            }
        },
        Message::Close(_) => return false,
        Message::Ping(_) | Message::Pong(_) => return true,
    };

    let command = match ClientMessage::parse(&text) {
        Ok(command) => command,
        Err(err) => {
            notice(out_tx, &err.to_string()).await;
            return true;
        }
    };

    dispatch(command, store, out_tx, registry).await;
    true
}

#[instrument(skip_all)]
async fn dispatch(
    command: ClientMessage,
    store: &Store,
    out_tx: &mpsc::Sender<RelayMessage>,
    registry: &mut Registry,
) {
    match command {
        ClientMessage::Event(raw) => handle_event(raw, store, out_tx).await,
        ClientMessage::Req { sub_id, filters } => handle_req(sub_id, filters, store, out_tx, registry).await,
        ClientMessage::Close { sub_id } => {
            registry.regular.remove(&sub_id);
        }
        ClientMessage::Changes(options) => handle_changes(options, store, out_tx).await,
        ClientMessage::LastSeq => {
            let seq = store.last_seq().await.unwrap_or(0);
            let _ = out_tx.send(RelayMessage::LastSeq(seq)).await;
        }
        ClientMessage::ChangesSub { sub_id, options } => {
            handle_changes_sub(sub_id, options, store, out_tx, registry).await
        }
        ClientMessage::ChangesUnsub { sub_id } => {
            registry.change_feed.remove(&sub_id);
        }
    }
}

async fn handle_event(raw: serde_json::Value, store: &Store, out_tx: &mpsc::Sender<RelayMessage>) {
    let echoed_id = raw
        .get("id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();

    let event = match validate::validate(&raw, now_secs()) {
        Ok(event) => event,
        Err(err) => {
            let _ = out_tx
                .send(RelayMessage::Ok {
                    event_id: echoed_id,
                    accepted: false,
                    reason: err.to_string(),
                })
                .await;
            return;
        }
    };

    let event_id = event.id.to_string();
    let response = match store.ingest(event).await {
        Ok(IngestOutcome::Accepted { .. }) => RelayMessage::Ok {
            event_id,
            accepted: true,
            reason: String::new(),
        },
        Ok(IngestOutcome::Duplicate { reason, .. }) => RelayMessage::Ok {
            event_id,
            accepted: true,
            reason,
        },
        Ok(IngestOutcome::Rejected { reason }) => RelayMessage::Ok {
            event_id,
            accepted: false,
            reason,
        },
        Err(err) => {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "store failure during ingest");
            RelayMessage::Ok {
                event_id,
                accepted: false,
                reason: format!("error: {}", err.fmt_compact()),
            }
        }
    };
    let _ = out_tx.send(response).await;
}

async fn handle_req(
    sub_id: String,
    filters: Vec<Filter>,
    store: &Store,
    out_tx: &mpsc::Sender<RelayMessage>,
    registry: &mut Registry,
) {
    if !(1..=MAX_SUB_ID_LEN).contains(&sub_id.len()) {
        let _ = out_tx
            .send(RelayMessage::Closed {
                sub_id,
                reason: "invalid: subscription id must be 1..=64 characters".to_string(),
            })
            .await;
        return;
    }
    if filters.is_empty() {
        let _ = out_tx
            .send(RelayMessage::Closed {
                sub_id,
                reason: "invalid: REQ requires at least one filter".to_string(),
            })
            .await;
        return;
    }

    registry.regular.insert(sub_id.clone(), filters.clone());

    match store.query(filters).await {
        Ok(events) => {
            for event in events {
                let _ = out_tx
                    .send(RelayMessage::Event {
                        sub_id: sub_id.clone(),
                        event,
                    })
                    .await;
            }
            let _ = out_tx.send(RelayMessage::Eose { sub_id }).await;
        }
        Err(err) => {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "store failure during query");
            registry.regular.remove(&sub_id);
            let _ = out_tx
                .send(RelayMessage::Closed {
                    sub_id,
                    reason: format!("error: {}", err.fmt_compact()),
                })
                .await;
        }
    }
}

async fn handle_changes(options: ClientChangesOptions, store: &Store, out_tx: &mpsc::Sender<RelayMessage>) {
    let since = options.since.unwrap_or(0);
    let store_options = StoreChangesOptions {
        limit: options.limit,
        kinds: options.kinds,
        authors: options.authors,
    };
    match store.query_changes(since, store_options).await {
        Ok(result) => {
            let changes = result
                .changes
                .into_iter()
                .map(|(seq, event)| ChangeEntry { seq, event })
                .collect();
            let _ = out_tx
                .send(RelayMessage::Changes {
                    changes,
                    last_seq: result.last_seq,
                })
                .await;
        }
        Err(err) => {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "store failure during changes scan");
            let _ = out_tx
                .send(RelayMessage::Notice {
                    text: format!("error: {}", err.fmt_compact()),
                })
                .await;
        }
    }
}

async fn handle_changes_sub(
    sub_id: String,
    options: ClientChangesOptions,
    store: &Store,
    out_tx: &mpsc::Sender<RelayMessage>,
    registry: &mut Registry,
) {
    if !(1..=MAX_SUB_ID_LEN).contains(&sub_id.len()) {
        let _ = out_tx
            .send(RelayMessage::Closed {
                sub_id,
                reason: "invalid: subscription id must be 1..=64 characters".to_string(),
            })
            .await;
        return;
    }

    let since = options.since.unwrap_or(0);
    let store_options = StoreChangesOptions {
        limit: None,
        kinds: options.kinds.clone(),
        authors: options.authors.clone(),
    };

    match store.subscribe_replay(since, store_options).await {
        Ok((changes, snapshot)) => {
            for (seq, event) in changes {
                let _ = out_tx
                    .send(RelayMessage::ChangesEvent {
                        sub_id: sub_id.clone(),
                        seq,
                        event,
                    })
                    .await;
            }
            // Register the live subscription only once the replay has been
            // fully sent, bracketing replay and live delivery as spec §9
            // requires: any event already accounted for by the scan above
            // has `seq <= snapshot` and is skipped on the live path.
            registry.change_feed.insert(
                sub_id.clone(),
                ChangeFeedSub {
                    options,
                    floor: snapshot,
                },
            );
            let _ = out_tx
                .send(RelayMessage::ChangesEose {
                    sub_id,
                    last_seq: snapshot,
                })
                .await;
        }
        Err(err) => {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "store failure during changes replay");
            let _ = out_tx
                .send(RelayMessage::Closed {
                    sub_id,
                    reason: format!("error: {}", err.fmt_compact()),
                })
                .await;
        }
    }
}

/// Apply this connection's subscriptions to a newly broadcast event,
/// implementing spec §4.6's fan-out rules verbatim: at most one `EVENT`
/// per connection for regular subscriptions, but every matching
/// change-feed subscription gets its own `CHANGES_EVENT`.
async fn fan_out(broadcast_event: &BroadcastEvent, registry: &Registry, out_tx: &mpsc::Sender<RelayMessage>) {
    for (sub_id, filters) in &registry.regular {
        if matches_any(&broadcast_event.event, filters) {
            let _ = out_tx
                .send(RelayMessage::Event {
                    sub_id: sub_id.clone(),
                    event: broadcast_event.event.clone(),
                })
                .await;
            break;
        }
    }

    let Some(seq) = broadcast_event.seq else {
        // Ephemeral events carry no seq and are never delivered to
        // change-feed subscriptions.
        return;
    };
    for (sub_id, sub) in &registry.change_feed {
        if seq > sub.floor && sub.matches(broadcast_event.event.kind, broadcast_event.event.pubkey) {
            let _ = out_tx
                .send(RelayMessage::ChangesEvent {
                    sub_id: sub_id.clone(),
                    seq,
                    event: broadcast_event.event.clone(),
                })
                .await;
        }
    }
}

async fn notice(out_tx: &mpsc::Sender<RelayMessage>, text: &str) {
    let _ = out_tx
        .send(RelayMessage::Notice {
            text: text.to_string(),
        })
        .await;
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs() as i64
}
