use std::time::{Duration, Instant};

use ranked_list_sync::engine::{Dispatch, DropReason, Engine, EngineConfig};
use ranked_list_sync::protocol::ControlMessage;
use ranked_list_sync::subscription::SubscriptionState;
use serde_json::json;
use tokio::sync::mpsc;

const LIST: &str = "gappers_up";

fn connected_engine(now: Instant) -> (Engine, mpsc::UnboundedReceiver<ControlMessage>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut engine = Engine::new(EngineConfig::default(), tx);
    engine.connected(now);
    assert!(engine.is_connected());
    assert!(engine.subscribe(LIST, now));
    assert_eq!(
        rx.try_recv().ok(),
        Some(ControlMessage::SubscribeList { list: LIST.into() })
    );
    (engine, rx)
}

fn sent(rx: &mut mpsc::UnboundedReceiver<ControlMessage>) -> Vec<ControlMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn deliver(engine: &mut Engine, value: serde_json::Value, now: Instant) -> Dispatch {
    engine.handle_text(&value.to_string(), now)
}

fn order(engine: &Engine) -> Vec<String> {
    engine
        .ordered_records(LIST)
        .into_iter()
        .map(|record| record.symbol)
        .collect()
}

fn snapshot(symbols: &[&str], sequence: u64) -> serde_json::Value {
    let rows: Vec<_> = symbols
        .iter()
        .map(|symbol| json!({ "symbol": symbol, "price": 10.0, "high": 12.0, "low": 8.0 }))
        .collect();
    json!({ "type": "snapshot", "list": LIST, "sequence": sequence, "rows": rows })
}

#[test]
fn unranked_snapshot_then_rerank_reorders() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);

    deliver(&mut engine, snapshot(&["AAA", "BBB"], 1), now);
    assert_eq!(order(&engine), vec!["AAA", "BBB"]);

    deliver(
        &mut engine,
        json!({
            "type": "delta",
            "list": LIST,
            "sequence": 2,
            "deltas": [{ "action": "rerank", "symbol": "BBB", "old_rank": 1, "new_rank": 0 }]
        }),
        now,
    );
    engine.flush_frame();

    assert_eq!(order(&engine), vec!["BBB", "AAA"]);
    assert_eq!(engine.sequence(LIST), Some(2));
    assert_eq!(engine.rank_moves(LIST).len(), 1);
}

#[test]
fn delta_before_snapshot_sends_one_resync_and_mutates_nothing() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);
    let early = json!({
        "type": "delta",
        "list": LIST,
        "sequence": 7,
        "deltas": [{ "action": "add", "symbol": "AAA", "rank": 0, "data": { "price": 1.0 } }]
    });

    assert_eq!(
        deliver(&mut engine, early.clone(), now),
        Dispatch::DeltaDiscarded { resync_sent: true }
    );
    assert_eq!(
        deliver(&mut engine, early, now + Duration::from_millis(5)),
        Dispatch::DeltaDiscarded { resync_sent: false }
    );
    engine.flush_frame();

    assert_eq!(
        sent(&mut rx),
        vec![ControlMessage::Resync { list: LIST.into() }]
    );
    assert!(engine.ordered_records(LIST).is_empty());
    assert!(!engine.is_ready(LIST));
    assert_eq!(engine.sequence(LIST), Some(0));
}

#[test]
fn snapshot_discards_buffered_deltas() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    deliver(
        &mut engine,
        json!({
            "type": "delta",
            "list": LIST,
            "sequence": 2,
            "deltas": [{ "action": "add", "symbol": "STALE", "rank": 0 }]
        }),
        now,
    );
    assert_eq!(engine.queued(LIST), Some((1, 0)));

    deliver(&mut engine, snapshot(&["BBB", "CCC"], 10), now);
    engine.flush_frame();

    assert_eq!(order(&engine), vec!["BBB", "CCC"]);
    assert_eq!(engine.sequence(LIST), Some(10));
}

#[test]
fn falsy_price_is_preserved_and_extremes_widen() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    deliver(
        &mut engine,
        json!({
            "type": "delta",
            "list": LIST,
            "sequence": 2,
            "deltas": [{ "action": "update", "symbol": "AAA", "data": { "price": 0, "high": 15, "low": 9 } }]
        }),
        now,
    );
    engine.flush_frame();

    let record = &engine.ordered_records(LIST)[0];
    assert_eq!(record.fields.price, Some(10.0));
    assert_eq!(record.fields.high, Some(15.0));
    assert_eq!(record.fields.low, Some(8.0));
}

#[test]
fn empty_batch_leaves_records_and_sequence() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA", "BBB"], 3), now);
    let before = engine.ordered_records(LIST);
    let stamped = engine.last_update(LIST).expect("snapshot stamp");
    std::thread::sleep(Duration::from_millis(2));

    deliver(
        &mut engine,
        json!({ "type": "delta", "list": LIST, "sequence": 4, "deltas": [] }),
        now,
    );
    engine.flush_frame();

    assert_eq!(engine.ordered_records(LIST), before);
    assert_eq!(engine.sequence(LIST), Some(3));
    assert!(engine.last_update(LIST).expect("flush stamp") > stamped);
}

#[test]
fn aggregate_for_unknown_symbol_creates_nothing() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    let dispatch = deliver(
        &mut engine,
        json!({ "type": "aggregate", "symbol": "ZZZ", "data": { "c": 5.0, "av": 100 } }),
        now,
    );
    engine.flush_frame();

    assert_eq!(dispatch, Dispatch::AggregateQueued { lists: 0 });
    assert_eq!(order(&engine), vec!["AAA"]);
}

#[test]
fn tick_for_symbol_added_in_same_frame_is_applied() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    deliver(
        &mut engine,
        json!({
            "type": "delta",
            "list": LIST,
            "sequence": 2,
            "deltas": [{ "action": "add", "symbol": "BBB", "rank": 1, "data": { "price": 4.0 } }]
        }),
        now,
    );
    let dispatch = deliver(
        &mut engine,
        json!({ "type": "aggregate", "symbol": "BBB", "data": { "c": 5.0 } }),
        now,
    );
    assert_eq!(dispatch, Dispatch::AggregateQueued { lists: 1 });

    let report = engine.flush_frame();
    assert_eq!(report.ticks_applied, 1);
    let bbb = engine
        .ordered_records(LIST)
        .into_iter()
        .find(|record| record.symbol == "BBB")
        .expect("BBB added");
    assert_eq!(bbb.fields.price, Some(5.0));
}

#[test]
fn add_with_rank_only_in_data_keeps_the_batch() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    let dispatch = deliver(
        &mut engine,
        json!({
            "type": "delta",
            "list": LIST,
            "sequence": 2,
            "deltas": [
                { "action": "remove", "symbol": "AAA" },
                { "action": "add", "symbol": "BBB", "data": { "rank": 0, "price": 3.0 } },
                { "action": "add", "symbol": "NORANK", "data": { "price": 1.0 } }
            ]
        }),
        now,
    );
    assert_eq!(dispatch, Dispatch::DeltaQueued);

    let report = engine.flush_frame();
    assert_eq!(report.deltas_applied, 2);
    assert_eq!(report.deltas_ignored, 1);
    assert_eq!(order(&engine), vec!["BBB"]);
    assert_eq!(engine.sequence(LIST), Some(2));
    assert!(sent(&mut rx).is_empty());
}

#[test]
fn aggregates_coalesce_within_a_frame() {
    let now = Instant::now();
    let (mut engine, _rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    for close in [11.0, 12.0, 13.0] {
        deliver(
            &mut engine,
            json!({ "type": "aggregate", "symbol": "AAA", "data": { "c": close, "h": close } }),
            now,
        );
    }
    assert_eq!(engine.queued(LIST), Some((0, 1)));

    let report = engine.flush_frame();
    assert_eq!(report.ticks_applied, 1);
    let record = &engine.ordered_records(LIST)[0];
    assert_eq!(record.fields.price, Some(13.0));
    assert_eq!(record.fields.high, Some(13.0));
}

#[test]
fn malformed_and_unknown_messages_are_dropped() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);

    assert_eq!(
        engine.handle_text("not json", now),
        Dispatch::Dropped(DropReason::Malformed)
    );
    assert_eq!(
        deliver(&mut engine, json!({ "type": "heartbeat" }), now),
        Dispatch::Dropped(DropReason::Unrecognized)
    );
    assert_eq!(
        deliver(&mut engine, json!({ "type": "snapshot", "list": LIST }), now),
        Dispatch::Dropped(DropReason::Malformed)
    );
    assert_eq!(
        deliver(&mut engine, snapshot(&["AAA"], 1), now),
        Dispatch::SnapshotApplied
    );
    assert_eq!(
        deliver(
            &mut engine,
            json!({ "type": "snapshot", "list": "elsewhere", "rows": [] }),
            now
        ),
        Dispatch::Dropped(DropReason::NotSubscribed)
    );
    assert!(sent(&mut rx).is_empty());
}

#[test]
fn disconnect_keeps_stale_records_and_reconnect_resubscribes() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA", "BBB"], 1), now);
    assert_eq!(engine.state(LIST), SubscriptionState::Ready);

    engine.disconnected();
    assert!(!engine.is_connected());
    assert_eq!(engine.state(LIST), SubscriptionState::Unsubscribed);
    assert!(!engine.is_ready(LIST));
    assert_eq!(order(&engine), vec!["AAA", "BBB"]);

    engine.connected(now);
    assert_eq!(engine.state(LIST), SubscriptionState::AwaitingSnapshot);
    assert_eq!(
        sent(&mut rx),
        vec![ControlMessage::SubscribeList { list: LIST.into() }]
    );

    deliver(&mut engine, snapshot(&["CCC"], 9), now);
    assert!(engine.is_ready(LIST));
    assert_eq!(order(&engine), vec!["CCC"]);
}

#[test]
fn snapshot_timeout_requests_resync() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);
    let timeout = engine.config().snapshot_timeout;

    engine.poll_timers(now + timeout / 2);
    assert!(sent(&mut rx).is_empty());

    engine.poll_timers(now + timeout);
    assert_eq!(
        sent(&mut rx),
        vec![ControlMessage::Resync { list: LIST.into() }]
    );
}

#[test]
fn visibility_resyncs_ready_lists() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    engine.became_visible(now);
    assert_eq!(
        sent(&mut rx),
        vec![ControlMessage::Resync { list: LIST.into() }]
    );
}

#[test]
fn unsubscribe_notifies_feed_and_forgets_list() {
    let now = Instant::now();
    let (mut engine, mut rx) = connected_engine(now);
    deliver(&mut engine, snapshot(&["AAA"], 1), now);

    assert!(engine.unsubscribe(LIST));
    assert!(!engine.has_subscriptions());
    assert!(engine.ordered_records(LIST).is_empty());
    assert_eq!(
        sent(&mut rx),
        vec![ControlMessage::UnsubscribeList { list: LIST.into() }]
    );
    assert!(!engine.unsubscribe(LIST));
}
