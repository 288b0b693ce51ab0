#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use orc_core::error::{OrcError, Result};
use orc_core::protocol::{CorrelationId, Document, MessageType, Node, RepeatedFieldSchema};
use orc_engine::dispatch::{Dispatcher, InboundOutcome};
use orc_engine::obs::EngineMetrics;
use orc_engine::registry::{Callback, Delivery};
use orc_engine::sequencer::Sequencer;
use orc_engine::transport::{Direction, InboundConsumer, Outbound};
use orc_engine::TreeCodec;

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Outbound for Recorder {
    async fn send_text(&self, wire: String) -> Result<()> {
        self.sent.lock().unwrap().push(wire);
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl Outbound for Broken {
    async fn send_text(&self, _wire: String) -> Result<()> {
        Err(OrcError::Transport("sender stopped".into()))
    }
}

/// Pushes a reply into the dispatcher while the request is still being written.
struct ReplyWhileSending {
    dispatcher: OnceLock<Dispatcher<TreeCodec>>,
    reply: String,
    write_time: Duration,
    fail: bool,
    written: AtomicBool,
}

impl ReplyWhileSending {
    fn new(reply: String, write_time: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: OnceLock::new(),
            reply,
            write_time,
            fail,
            written: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Outbound for ReplyWhileSending {
    async fn send_text(&self, _wire: String) -> Result<()> {
        let d = self.dispatcher.get().expect("dispatcher not wired");
        d.on_message(&self.reply)?;
        tokio::time::sleep(self.write_time).await;
        if self.fail {
            return Err(OrcError::Transport("write failed".into()));
        }
        self.written.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn wired(out: &Arc<ReplyWhileSending>) -> Dispatcher<TreeCodec> {
    let d = dispatcher_with(out.clone(), TreeCodec::new(), None);
    let _ = out.dispatcher.set(d.clone());
    d
}

fn dispatcher_with(
    out: Arc<dyn Outbound>,
    codec: TreeCodec,
    ttl: Option<Duration>,
) -> Dispatcher<TreeCodec> {
    Dispatcher::new(
        out,
        codec,
        Sequencer::new().unwrap(),
        Arc::new(EngineMetrics::default()),
        ttl,
    )
}

fn recorder() -> (Arc<Recorder>, Dispatcher<TreeCodec>) {
    let rec = Arc::new(Recorder::default());
    let d = dispatcher_with(rec.clone(), TreeCodec::new(), None);
    (rec, d)
}

fn channel_callback() -> (Callback<Document>, mpsc::UnboundedReceiver<Delivery<Document>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb: Callback<Document> = Arc::new(move |d| {
        let _ = tx.send(d);
    });
    (cb, rx)
}

fn request() -> Document {
    Document::new(vec![
        Node::leaf("message_type", "PRICE_FEED"),
        Node::container("instrument_id", vec![Node::leaf("underlying", "AUDUSD")]),
    ])
}

fn price_reply(id: CorrelationId, underlying: &str, bid: &str) -> String {
    format!(
        "{{reply_to={{message_type=PRICE_FEED}}|private={id}|instrument_id={{underlying={underlying}}}|bid={bid}}}"
    )
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("channel closed")
}

async fn assert_quiet<T>(rx: &mut mpsc::UnboundedReceiver<T>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "unexpected delivery");
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn price_feed_reply_reaches_subscriber_once() {
    let (rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();

    d.send(request(), id, cb).await.unwrap();
    let wire = rec.sent.lock().unwrap().pop().unwrap();
    assert!(wire.contains(&format!("private={id}")), "{wire}");

    let outcome = d.on_message(&price_reply(id, "AUDUSD", "0.75")).unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Routed {
            message_type: MessageType::PriceFeed,
            correlation_id: id
        }
    );

    let got = next(&mut rx).await;
    assert_eq!(got.correlation_id, id);
    assert_eq!(got.message_type, MessageType::PriceFeed);
    assert_eq!(got.payload.lookup_value("instrument_id/underlying"), Some("AUDUSD"));
    assert_eq!(got.payload.lookup_value("bid"), Some("0.75"));
    assert!(got.payload.child("private").is_none());
    assert!(got.payload.child("reply_to").is_none());
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_correlation_id_is_dropped_silently() {
    let (_rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    d.send(request(), CorrelationId::new_v4(), cb).await.unwrap();

    let stranger = CorrelationId::new_v4();
    let outcome = d.on_message(&price_reply(stranger, "AUDUSD", "1")).unwrap();
    assert_eq!(outcome, InboundOutcome::Dropped);
    assert_eq!(d.metrics().correlation_misses.get(&[]), 1);
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn envelope_failures_never_reach_callbacks() {
    let (_rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();
    d.send(request(), id, cb).await.unwrap();

    let no_type = format!("{{private={id}|instrument_id={{underlying=AUDUSD}}}}");
    let err = d.on_message(&no_type).unwrap_err();
    assert_eq!(err.code().as_str(), "ENVELOPE");

    let unknown = format!("{{message_type=QUOTE_FEED|private={id}}}");
    assert_eq!(d.on_message(&unknown).unwrap_err().code().as_str(), "ENVELOPE");

    let no_private = "{message_type=PRICE_FEED|bid=1}";
    assert_eq!(d.on_message(no_private).unwrap_err().code().as_str(), "ENVELOPE");

    assert_eq!(d.metrics().envelope_errors.get(&[]), 3);
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_text_is_a_grammar_error() {
    let (_rec, d) = recorder();

    let err = d.on_message("{a=1|b={c=2}").unwrap_err();
    assert_eq!(err.code().as_str(), "GRAMMAR");

    let err = d.on_message("{a=1|=2}").unwrap_err();
    assert_eq!(err.code().as_str(), "GRAMMAR");

    assert_eq!(d.metrics().grammar_errors.get(&[]), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn message_type_is_case_insensitive() {
    let (_rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();
    d.send(request(), id, cb).await.unwrap();

    let wire = format!("{{message_info={{message_type=trade_feed}}|private={id}|qty=5}}");
    d.on_message(&wire).unwrap();
    let got = next(&mut rx).await;
    assert_eq!(got.message_type, MessageType::TradeFeed);
    assert_eq!(got.payload.lookup_value("qty"), Some("5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_without_underlying_is_counted_not_delivered() {
    let (_rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();
    d.send(request(), id, cb).await.unwrap();

    let wire = format!("{{message_type=INSTRUMENT_FEED|private={id}|bid=1}}");
    assert!(matches!(d.on_message(&wire).unwrap(), InboundOutcome::Routed { .. }));

    let m = Arc::clone(d.metrics());
    eventually(|| m.payload_errors.get(&[("message_type", "INSTRUMENT_FEED")]) == 1).await;
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_underlying_is_delivered_in_receive_order() {
    let (_rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();
    d.send(request(), id, cb).await.unwrap();

    for i in 0..50 {
        d.on_message(&price_reply(id, "AUDUSD", &i.to_string())).unwrap();
    }
    for i in 0..50 {
        let got = next(&mut rx).await;
        assert_eq!(got.payload.lookup_value("bid"), Some(i.to_string().as_str()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_and_handle_cancel() {
    let (_rec, d) = recorder();
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();

    d.send(request(), id, cb.clone()).await.unwrap();
    assert_eq!(d.pending_subscriptions(), 1);
    assert!(d.unsubscribe(&id));
    assert!(!d.unsubscribe(&id));
    assert_eq!(
        d.on_message(&price_reply(id, "AUDUSD", "1")).unwrap(),
        InboundOutcome::Dropped
    );

    let handle = d.send(request(), id, cb).await.unwrap();
    assert_eq!(handle.id(), id);
    drop(handle.clone());
    assert_eq!(d.pending_subscriptions(), 1);
    assert!(handle.cancel());
    assert_eq!(d.pending_subscriptions(), 0);
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_send_rolls_back_registration() {
    let d = dispatcher_with(Arc::new(Broken), TreeCodec::new(), None);
    let (cb, _rx) = channel_callback();

    let err = d.send(request(), CorrelationId::new_v4(), cb.clone()).await.unwrap_err();
    assert_eq!(err.code().as_str(), "TRANSPORT");
    assert_eq!(d.pending_subscriptions(), 0);

    let (_rec, d) = recorder();
    let bad = Document::new(vec![Node::leaf("bad name", "x")]);
    let err = d.send(bad, CorrelationId::new_v4(), cb).await.unwrap_err();
    assert_eq!(err.code().as_str(), "GRAMMAR");
    assert_eq!(d.pending_subscriptions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schema_numbers_declared_repeats() {
    let rec = Arc::new(Recorder::default());
    let schema = RepeatedFieldSchema::new().with_type("", ["leg"]);
    let d = dispatcher_with(rec.clone(), TreeCodec::with_schema(schema), None);
    let (cb, _rx) = channel_callback();

    let order = Document::new(vec![
        Node::leaf("message_type", "ORDER_INSERT"),
        Node::container("leg", vec![Node::leaf("qty", "1")]),
    ]);
    d.send(order, CorrelationId::new_v4(), cb).await.unwrap();
    let wire = rec.sent.lock().unwrap().pop().unwrap();
    assert!(wire.contains("leg1={qty=1}"), "{wire}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_subscriptions_miss() {
    let rec = Arc::new(Recorder::default());
    let d = dispatcher_with(rec, TreeCodec::new(), Some(Duration::from_millis(20)));
    let (cb, mut rx) = channel_callback();
    let id = CorrelationId::new_v4();
    d.send(request(), id, cb).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(
        d.on_message(&price_reply(id, "AUDUSD", "1")).unwrap(),
        InboundOutcome::Dropped
    );
    assert_eq!(d.pending_subscriptions(), 0);
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn receiver_stop_abandons_pending_subscriptions() {
    let (_rec, d) = recorder();
    for _ in 0..3 {
        let (cb, _rx) = channel_callback();
        d.send(request(), CorrelationId::new_v4(), cb).await.unwrap();
    }

    InboundConsumer::on_stopped(&d, Direction::Send, "write failed");
    assert_eq!(d.pending_subscriptions(), 3);

    InboundConsumer::on_stopped(&d, Direction::Receive, "peer closed connection");
    assert_eq!(d.pending_subscriptions(), 0);

    let m = d.metrics();
    assert_eq!(m.transport_stops.get(&[("direction", "sender")]), 1);
    assert_eq!(m.transport_stops.get(&[("direction", "receiver")]), 1);
    assert_eq!(m.abandoned_subscriptions.get(&[]), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_reply_waits_for_send_to_return() {
    let id = CorrelationId::new_v4();
    let out = ReplyWhileSending::new(
        price_reply(id, "AUDUSD", "0.75"),
        Duration::from_millis(200),
        false,
    );
    let d = wired(&out);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let seen = Arc::clone(&out);
    let cb: Callback<Document> = Arc::new(move |delivery| {
        let _ = tx.send((seen.written.load(Ordering::SeqCst), delivery));
    });

    d.send(request(), id, cb).await.unwrap();
    let (written, got) = next(&mut rx).await;
    assert!(written, "callback ran while the request was still being written");
    assert_eq!(got.payload.lookup_value("bid"), Some("0.75"));
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_reply_is_discarded_when_send_fails() {
    let id = CorrelationId::new_v4();
    let out = ReplyWhileSending::new(
        price_reply(id, "AUDUSD", "1"),
        Duration::from_millis(50),
        true,
    );
    let d = wired(&out);
    let (cb, mut rx) = channel_callback();

    let err = d.send(request(), id, cb).await.unwrap_err();
    assert_eq!(err.code().as_str(), "TRANSPORT");
    assert_eq!(d.pending_subscriptions(), 0);
    assert_quiet(&mut rx).await;
    assert_eq!(d.metrics().deliveries.get(&[("message_type", "PRICE_FEED")]), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_send_rolls_back_and_discards_early_reply() {
    let id = CorrelationId::new_v4();
    let out = ReplyWhileSending::new(
        price_reply(id, "AUDUSD", "1"),
        Duration::from_secs(10),
        false,
    );
    let d = wired(&out);
    let (cb, mut rx) = channel_callback();

    let send = d.send(request(), id, cb);
    let cancelled = tokio::time::timeout(Duration::from_millis(100), send).await;
    assert!(cancelled.is_err());
    assert_eq!(d.pending_subscriptions(), 0);
    assert_quiet(&mut rx).await;
}
