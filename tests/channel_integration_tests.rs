//! Integration tests for the delivery channels and the multiplexer
//!
//! These tests drive payloads in their wire form through decoding,
//! normalization and the multiplexer, and check the resulting collection:
//! - Streaming frames split across chunk boundaries
//! - Push notifications racing batch telemetry in any order
//! - Duplicate and stale deliveries across channels
//! - Malformed units becoming diagnostics without stopping the run

use serde_json::json;
use setforge::models::{Channel, DiagnosticKind, Progress, RunMode, SetVariant, Skeleton};
use setforge::services::{FrameDecoder, Inbound, Multiplexer, PushMessage, StreamFrame};
use setforge::StateManager;
use std::time::Duration;

fn three_slots() -> Skeleton {
    Skeleton::builder()
        .slot("white", "common", "A1", "")
        .slot("white", "common", "A2", "")
        .slot("white", "common", "A3", "")
        .build()
        .unwrap()
}

fn ten_slots() -> Skeleton {
    let mut builder = Skeleton::builder();
    for i in 1..=10 {
        let category = if i <= 5 { "red" } else { "green" };
        builder = builder.slot(category, "common", &format!("S{}", i), "");
    }
    builder.build().unwrap()
}

fn multiplexer(skeleton: Skeleton) -> Multiplexer {
    Multiplexer::new(
        StateManager::with_skeleton(skeleton, SetVariant::Full),
        Duration::from_secs(2),
    )
}

fn push_item(slot: &str, category: &str) -> Inbound {
    let text = json!({
        "event": "card_generated",
        "data": {
            "color": category,
            "rarity": "common",
            "slot_id": slot,
            "card": {"name": format!("Card {}", slot), "mana_cost": "{R}", "type": "Instant"}
        }
    })
    .to_string();
    Inbound::Push(PushMessage::parse(&text).unwrap())
}

fn push_batch(number: u32, completed: u32) -> Inbound {
    let text = json!({
        "event": "batch_completed",
        "data": {
            "batch_number": number,
            "total_batches": 2,
            "batch_time": 4.5,
            "cards_completed": completed,
            "total_cards": 10
        }
    })
    .to_string();
    Inbound::Push(PushMessage::parse(&text).unwrap())
}

#[test]
fn test_frame_split_mid_token_decodes_once() {
    let mut decoder = FrameDecoder::new();

    let first = decoder.push(br#"data: {"type":"it"#);
    assert!(first.is_empty());
    assert!(decoder.pending() > 0);

    let second = decoder.push(
        br#"em","color":"white","rarity":"common","slot_id":"A2","card":{"name":"Dawn"}}
"#,
    );
    assert_eq!(second.len(), 1);
    match second.into_iter().next().unwrap().unwrap() {
        StreamFrame::Item(notification) => {
            assert_eq!(notification.slot_id.as_deref(), Some("A2"));
            assert_eq!(notification.item.name, "Dawn");
        }
        other => panic!("expected an item frame, got {:?}", other),
    }
    assert!(decoder.finish().is_none());
}

#[test]
fn test_stream_then_push_copy_keeps_progress() {
    let mux = multiplexer(three_slots());
    let run = mux.state().begin_run("dawn", RunMode::Streaming);

    let mut decoder = FrameDecoder::new();
    for frame in decoder.push(
        b"data: {\"type\":\"card\",\"color\":\"white\",\"rarity\":\"common\",\"slot_id\":\"A2\",\"card\":{\"name\":\"Dawn\"}}\n\n",
    ) {
        mux.dispatch(Inbound::Frame {
            run,
            frame: frame.unwrap(),
        });
    }
    assert_eq!(mux.state().progress(), Progress { completed: 1, total: 3 });

    let duplicate = json!({
        "event": "item-assigned",
        "data": {"category": "white", "sub_category": "common", "slot_id": "A2", "item": {"name": "Dawn"}}
    })
    .to_string();
    mux.dispatch(Inbound::Push(PushMessage::parse(&duplicate).unwrap()));

    assert_eq!(mux.state().progress(), Progress { completed: 1, total: 3 });
    assert_eq!(
        mux.state()
            .read(|s| s.collection.item_by_id("A2").map(|i| i.name.clone())),
        Some("Dawn".to_string())
    );
    assert_eq!(mux.state().metrics().channel(Channel::Push).applied(), 0);
    // A streaming run takes nothing from the push channel
    assert_eq!(mux.state().metrics().channel(Channel::Push).stale.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn test_batched_run_reaches_total_in_any_order() {
    let orders: [&[usize]; 3] = [
        // telemetry after its items
        &[1, 2, 3, 4, 5, 100, 6, 7, 8, 9, 10, 101],
        // telemetry before any item
        &[100, 101, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
        // interleaved and reversed
        &[10, 101, 9, 8, 100, 7, 6, 5, 4, 3, 2, 1],
    ];

    for order in orders {
        let mux = multiplexer(ten_slots());
        let run = mux.state().begin_run("volcano", RunMode::Batched);

        for &step in order {
            let inbound = match step {
                100 => push_batch(1, 5),
                101 => push_batch(2, 10),
                i => push_item(&format!("S{}", i), if i <= 5 { "red" } else { "green" }),
            };
            mux.dispatch(inbound);
        }

        let state = mux.state().snapshot();
        assert_eq!(state.progress(), Progress { completed: 10, total: 10 }, "order {:?}", order);
        assert_eq!(state.batch.batches_seen, 2);
        assert_eq!(state.batch.latest.as_ref().unwrap().cards_completed, 10);
        assert!(!state.run.active, "run finishes when the collection is complete");

        // The terminal bulk response that follows changes nothing
        mux.dispatch(Inbound::Bulk {
            run,
            response: json!({"success": true, "set": {"red": {"common": {"S1": {"name": "Card S1", "mana_cost": "{R}", "type": "Instant"}}}}}),
        });
        assert_eq!(mux.state().progress().completed, 10);
        assert_eq!(mux.state().metrics().channel(Channel::Bulk).duplicates.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}

#[test]
fn test_superseded_stream_is_ignored() {
    let mux = multiplexer(three_slots());
    let old = mux.state().begin_run("first", RunMode::Streaming);
    let current = mux.state().begin_run("second", RunMode::Streaming);

    mux.dispatch(Inbound::Frame {
        run: old,
        frame: serde_json::from_value(json!({"type": "item", "slot_id": "A1", "item": {"name": "Old"}})).unwrap(),
    });
    mux.dispatch(Inbound::StreamEnded { run: old, error: None });

    assert_eq!(mux.state().progress().completed, 0);
    assert_eq!(mux.state().current_run(), current);
    assert!(mux.state().read(|s| s.run.active));
    assert_eq!(mux.state().metrics().channel(Channel::Stream).stale.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn test_batched_run_superseded_by_stream_ignores_its_pushes() {
    let mux = multiplexer(ten_slots());
    mux.state().begin_run("old theme", RunMode::Batched);
    mux.dispatch(push_item("S1", "red"));
    mux.dispatch(push_batch(1, 5));
    assert_eq!(mux.state().progress().completed, 1);

    let run = mux.state().begin_run("new theme", RunMode::Streaming);
    // The server keeps delivering the superseded job
    mux.dispatch(push_item("S2", "red"));
    mux.dispatch(push_batch(2, 10));
    mux.dispatch(Inbound::Frame {
        run,
        frame: serde_json::from_value(json!({"type": "item", "slot_id": "S3", "item": {"name": "Fresh"}})).unwrap(),
    });

    let state = mux.state().snapshot();
    assert_eq!(state.progress(), Progress { completed: 1, total: 10 });
    assert!(state.collection.item_by_id("S2").is_none());
    assert_eq!(state.collection.item_by_id("S3").unwrap().name, "Fresh");
    assert_eq!(state.batch.batches_seen, 0);
    assert!(state.batch.latest.is_none());
}

#[test]
fn test_generation_error_frames_fill_slots_with_fallbacks() {
    let mux = multiplexer(three_slots());
    let run = mux.state().begin_run("storm", RunMode::Streaming);

    let mut decoder = FrameDecoder::new();
    let body = concat!(
        "data: {\"type\":\"error\",\"color\":\"white\",\"rarity\":\"common\",\"slot_id\":\"A1\",\"error\":\"rate limited\"}\n\n",
        "data: {\"type\":\"error\",\"message\":\"generator overloaded\"}\n\n",
        "data: {\"type\":\"item\",\"slot_id\":\"A2\"\n\n",
        "data: {\"type\":\"item\",\"slot_id\":\"A3\",\"card\":{\"name\":\"Gale\"}}\n\n",
        "data: {\"type\":\"complete\",\"message\":\"done\"}\n\n",
    );
    for decoded in decoder.push(body.as_bytes()) {
        let inbound = match decoded {
            Ok(frame) => Inbound::Frame { run, frame },
            Err(e) => Inbound::Malformed {
                channel: Channel::Stream,
                error: e.to_string(),
            },
        };
        mux.dispatch(inbound);
    }

    let state = mux.state().snapshot();
    let fallback = state.collection.item_by_id("A1").unwrap();
    assert!(fallback.is_fallback());
    assert_eq!(fallback.error.as_deref(), Some("rate limited"));
    assert!(state.collection.item_by_id("A2").is_none());
    assert_eq!(state.collection.item_by_id("A3").unwrap().name, "Gale");
    assert_eq!(state.progress(), Progress { completed: 2, total: 3 });
    assert!(!state.run.active);

    let kinds: Vec<DiagnosticKind> = state.diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![DiagnosticKind::GenerationFailed, DiagnosticKind::MalformedPayload]
    );
}

#[tokio::test]
async fn test_concurrent_producers_through_actor() {
    let mux = multiplexer(ten_slots());
    let state = mux.state().clone();
    let run = state.begin_run("tundra", RunMode::Batched);
    let (handle, task) = mux.spawn();

    let push = {
        let handle = handle.clone();
        tokio::spawn(async move {
            for i in 1..=10 {
                let category = if i <= 5 { "red" } else { "green" };
                handle.send(push_item(&format!("S{}", i), category)).await.unwrap();
            }
        })
    };
    let bulk = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .send(Inbound::Bulk {
                    run,
                    response: json!({
                        "success": true,
                        "set": {
                            "red": {"common": [{"slot_id": "S1", "name": "Card S1", "mana_cost": "{R}", "type": "Instant"}]},
                            "green": {"common": {"S10": {"name": "Card S10", "mana_cost": "{R}", "type": "Instant"}}}
                        }
                    }),
                })
                .await
                .unwrap();
        })
    };
    push.await.unwrap();
    bulk.await.unwrap();
    drop(handle);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.progress(), Progress { completed: 10, total: 10 });
}

#[test]
fn test_malformed_push_message_is_diagnosed() {
    let mux = multiplexer(three_slots());

    let error = PushMessage::parse("{\"event\":\"card_generated\",\"data\":{\"slot_id\":7}}").unwrap_err();
    mux.dispatch(Inbound::Malformed {
        channel: Channel::Push,
        error: error.to_string(),
    });
    mux.dispatch(Inbound::Push(PushMessage::parse("{\"event\":\"welcome\"}").unwrap()));

    let state = mux.state().snapshot();
    assert_eq!(state.diagnostics.len(), 1);
    assert_eq!(state.diagnostics[0].channel, Channel::Push);
    assert_eq!(mux.state().metrics().channel(Channel::Push).malformed.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn test_null_card_fields_are_accepted_on_every_channel() {
    let land = json!({"name": "Tidal Flats", "mana_cost": null, "type": "Land", "flavor_text": null});
    let mux = multiplexer(three_slots());

    // push, outside any run
    let pushed = json!({
        "event": "card_generated",
        "data": {"color": "white", "rarity": "common", "slot_id": "A1", "card": land.clone()}
    })
    .to_string();
    mux.dispatch(Inbound::Push(PushMessage::parse(&pushed).unwrap()));
    assert_eq!(mux.state().progress().completed, 1);

    // stream
    let run = mux.state().begin_run("coast", RunMode::Streaming);
    let mut decoder = FrameDecoder::new();
    let frame = format!("data: {}\n", json!({"type": "card", "slot_id": "A2", "card": land.clone()}));
    for decoded in decoder.push(frame.as_bytes()) {
        mux.dispatch(Inbound::Frame { run, frame: decoded.unwrap() });
    }
    assert_eq!(mux.state().progress().completed, 1, "new run starts empty");

    // bulk
    let run = mux.state().begin_run("coast", RunMode::Batched);
    mux.dispatch(Inbound::Bulk {
        run,
        response: json!({"success": true, "set": {"white": {"common": {"A1": land.clone(), "A2": land.clone(), "A3": land}}}}),
    });

    let state = mux.state().snapshot();
    assert_eq!(state.progress(), Progress { completed: 3, total: 3 });
    assert!(state.diagnostics.is_empty());
    let item = state.collection.item_by_id("A3").unwrap();
    assert_eq!(item.name, "Tidal Flats");
    assert_eq!(item.cost, "");
    assert_eq!(item.flavor_text, "");
}
