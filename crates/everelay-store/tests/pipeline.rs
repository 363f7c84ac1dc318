//! Exercises the ingest -> query -> change-feed path end to end against a
//! fresh in-memory store, the way a client driving the wire protocol would.

use everelay_core::event::Event;
use everelay_core::filter::Filter;
use everelay_core::{PublicKey, Signature};
use everelay_store::{BroadcastEvent, ChangesOptions, Store};

fn event(pubkey: PublicKey, kind: u32, created_at: i64, tags: Vec<Vec<String>>, content: &str) -> Event {
    let content = content.to_string();
    let id = Event::compute_id(&pubkey, created_at, kind, &tags, &content);
    Event::assume_valid(id, pubkey, created_at, kind, tags, content, Signature::from_bytes([0; 64]))
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn ingested_regular_event_is_returned_by_a_matching_query() {
    let store = Store::open_in_memory().await.unwrap();
    let alice = PublicKey::from_bytes([1; 32]);

    let e = event(alice, 1, 1000, vec![], "hello");
    let id = e.id;
    store.ingest(e).await.unwrap();

    let found = store
        .query(vec![Filter {
            authors: Some(vec![alice]),
            ..Default::default()
        }])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);

    let not_found = store
        .query(vec![Filter {
            kinds: Some(vec![2]),
            ..Default::default()
        }])
        .await
        .unwrap();
    assert!(not_found.is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn replaceable_event_supersedes_the_older_one_in_both_query_and_changes() {
    let store = Store::open_in_memory().await.unwrap();
    let alice = PublicKey::from_bytes([2; 32]);

    let older = event(alice, 0, 100, vec![], "v1");
    let newer = event(alice, 0, 200, vec![], "v2");
    store.ingest(older.clone()).await.unwrap();
    store.ingest(newer.clone()).await.unwrap();

    let found = store
        .query(vec![Filter {
            authors: Some(vec![alice]),
            kinds: Some(vec![0]),
            ..Default::default()
        }])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, newer.id);
    assert_eq!(store.get(older.id).await.unwrap(), None);

    let changes = store.query_changes(0, ChangesOptions::default()).await.unwrap();
    let ids: Vec<_> = changes.changes.iter().map(|(_, e)| e.id).collect();
    assert!(ids.contains(&newer.id));
    assert!(!ids.contains(&older.id));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn change_feed_subscription_sees_only_events_broadcast_after_its_snapshot() {
    let store = Store::open_in_memory().await.unwrap();
    let alice = PublicKey::from_bytes([3; 32]);

    let before = event(alice, 1, 1, vec![], "before");
    store.ingest(before).await.unwrap();

    let (replay, snapshot) = store
        .subscribe_replay(0, ChangesOptions::default())
        .await
        .unwrap();
    assert_eq!(replay.len(), 1);
    assert_eq!(snapshot, 1);

    let mut live = store.subscribe();

    let after = event(alice, 1, 2, vec![], "after");
    let after_id = after.id;
    store.ingest(after).await.unwrap();

    let BroadcastEvent { event: delivered, seq } = live.recv().await.unwrap();
    assert_eq!(delivered.id, after_id);
    let seq = seq.expect("regular event carries a seq");
    assert!(seq > snapshot, "live delivery must be strictly after the replay snapshot");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn ephemeral_events_are_broadcast_but_never_queryable() {
    let store = Store::open_in_memory().await.unwrap();
    let alice = PublicKey::from_bytes([4; 32]);
    let mut live = store.subscribe();

    let e = event(alice, 20001, 1, vec![], "ephemeral");
    let id = e.id;
    store.ingest(e).await.unwrap();

    let delivered = live.recv().await.unwrap();
    assert_eq!(delivered.event.id, id);
    assert_eq!(delivered.seq, None);
    assert_eq!(store.get(id).await.unwrap(), None);
}
