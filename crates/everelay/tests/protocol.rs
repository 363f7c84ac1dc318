//! End-to-end coverage of the framed command protocol over a real
//! WebSocket connection to an in-process server.

mod common;

use common::TestServer;
use everelay_core::event::Event;
use everelay_core::PublicKey;
use futures::{SinkExt, StreamExt};
use secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn test_keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
    Keypair::from_secret_key(&secp, &secret)
}

/// Sign a minimal well-formed event, the way `everelay_core::validate`'s
/// own tests do it.
fn signed_event(keypair: &Keypair, created_at: i64, kind: u32, content: &str) -> serde_json::Value {
    let pubkey = PublicKey::from_bytes(keypair.x_only_public_key().0.serialize());
    let tags = vec![];
    let id = Event::compute_id(&pubkey, created_at, kind, &tags, content);
    let message = Message::from_digest(*id.as_bytes());
    let sig = secp256k1::SECP256K1.sign_schnorr_no_aux_rand(&message, keypair);
    serde_json::json!({
        "id": id.to_string(),
        "pubkey": pubkey.to_string(),
        "created_at": created_at,
        "kind": kind,
        "tags": tags,
        "content": content,
        "sig": data_encoding::HEXLOWER.encode(&sig.serialize()),
    })
}

async fn recv_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> serde_json::Value {
    loop {
        match ws.next().await.expect("stream ended").expect("ws error") {
            WsMessage::Text(text) => {
                return serde_json::from_str(&text.to_string()).expect("not json")
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    value: &serde_json::Value,
) {
    ws.send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

/// S1: `EVENT` is accepted and echoed as `OK`, and a subsequent `REQ` by
/// id replays it followed by `EOSE`.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn event_then_req_by_id_replays_it_and_eoses() {
    let server = TestServer::start().await;
    let url = format!("ws://{}", server.base_url().trim_start_matches("http://"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect failed");

    let keypair = test_keypair(7);
    let event = signed_event(&keypair, 1_700_000_000, 1, "hello");
    let event_id = event["id"].as_str().unwrap().to_string();

    send_json(&mut ws, &serde_json::json!(["EVENT", event])).await;
    let ok = recv_json(&mut ws).await;
    assert_eq!(ok, serde_json::json!(["OK", event_id, true, ""]));

    send_json(
        &mut ws,
        &serde_json::json!(["REQ", "x", {"ids": [event_id]}]),
    )
    .await;

    let event_frame = recv_json(&mut ws).await;
    let array = event_frame.as_array().expect("EVENT frame is an array");
    assert_eq!(array[0], "EVENT");
    assert_eq!(array[1], "x");
    assert_eq!(array[2]["id"], event_id);

    let eose = recv_json(&mut ws).await;
    assert_eq!(eose, serde_json::json!(["EOSE", "x"]));
}

/// S1 negative case: a structurally invalid event (bad id) is rejected.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn malformed_event_is_rejected_with_ok_false() {
    let server = TestServer::start().await;
    let url = format!("ws://{}", server.base_url().trim_start_matches("http://"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect failed");

    let keypair = test_keypair(7);
    let mut event = signed_event(&keypair, 1_700_000_000, 1, "hello");
    event["content"] = serde_json::json!("tampered");

    send_json(&mut ws, &serde_json::json!(["EVENT", event])).await;
    let reply = recv_json(&mut ws).await;
    let array = reply.as_array().unwrap();
    assert_eq!(array[0], "OK");
    assert_eq!(array[2], false);
}

/// A `REQ` whose only filter is a present-but-empty id set still matches
/// every stored event, per spec §4.4.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn req_with_empty_ids_filter_matches_everything() {
    let server = TestServer::start().await;
    let url = format!("ws://{}", server.base_url().trim_start_matches("http://"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect failed");

    let keypair = test_keypair(9);
    let event = signed_event(&keypair, 1_700_000_001, 1, "present but empty");
    let event_id = event["id"].as_str().unwrap().to_string();

    send_json(&mut ws, &serde_json::json!(["EVENT", event])).await;
    let _ok = recv_json(&mut ws).await;

    send_json(&mut ws, &serde_json::json!(["REQ", "y", {"ids": []}])).await;

    let event_frame = recv_json(&mut ws).await;
    assert_eq!(event_frame[2]["id"], event_id);
    let eose = recv_json(&mut ws).await;
    assert_eq!(eose, serde_json::json!(["EOSE", "y"]));
}

/// `LASTSEQ` reports `0` against an empty store.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn lastseq_on_an_empty_store_is_zero() {
    let server = TestServer::start().await;
    let url = format!("ws://{}", server.base_url().trim_start_matches("http://"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect failed");

    send_json(&mut ws, &serde_json::json!(["LASTSEQ"])).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply, serde_json::json!(["LASTSEQ", 0]));
}
