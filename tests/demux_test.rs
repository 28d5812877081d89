mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowline::{BuildContext, Demux, Message, Params, Stage, Status, Value};

use common::{AckMode, CaptureSink};

fn demux_with_sinks(
    params: Params,
    sinks: &[Arc<CaptureSink>],
) -> Arc<dyn Stage> {
    let demux = Demux::build("dmx", &params, &BuildContext::default()).unwrap();
    for sink in sinks {
        demux
            .connect(1, Arc::clone(sink) as Arc<dyn Stage>)
            .unwrap();
    }
    demux
}

async fn start_all(demux: &Arc<dyn Stage>, sinks: &[Arc<CaptureSink>]) {
    for sink in sinks {
        (Arc::clone(sink) as Arc<dyn Stage>).start().await.unwrap();
    }
    demux.start().await.unwrap();
}

/// Every downstream acks Done -> the parent resolves Done and each sink saw
/// exactly one copy.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_branches_succeed() {
    let sinks = [
        CaptureSink::new("a", AckMode::Done),
        CaptureSink::new("b", AckMode::Done),
    ];
    let demux = demux_with_sinks(Params::new(), &sinks);
    start_all(&demux, &sinks).await;

    let (msg, wait) = Message::new_sync("x");
    demux.receive(msg).await.unwrap();
    assert_eq!(wait.wait().await, Status::Done);

    for sink in &sinks {
        assert_eq!(sink.received(), vec![bytes::Bytes::from("x")]);
    }
    demux.stop().await.unwrap();
}

/// One branch fails -> PartialSend, but both sinks still saw the payload.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_failure_is_partial_send() {
    let sinks = [
        CaptureSink::new("a", AckMode::Done),
        CaptureSink::new("b", AckMode::Failed),
    ];
    let demux = demux_with_sinks(Params::new(), &sinks);
    start_all(&demux, &sinks).await;

    let (msg, wait) = Message::new_sync("x");
    demux.receive(msg).await.unwrap();
    assert_eq!(wait.wait().await, Status::PartialSend);

    assert_eq!(sinks[0].received_count(), 1);
    assert_eq!(sinks[1].received_count(), 1);
    demux.stop().await.unwrap();
}

/// Every branch fails -> Failed.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_branches_failing_is_failed() {
    let sinks = [
        CaptureSink::new("a", AckMode::Failed),
        CaptureSink::new("b", AckMode::Failed),
    ];
    let demux = demux_with_sinks(Params::new(), &sinks);
    start_all(&demux, &sinks).await;

    let (msg, wait) = Message::new_sync("x");
    demux.receive(msg).await.unwrap();
    assert_eq!(wait.wait().await, Status::Failed);
    demux.stop().await.unwrap();
}

/// A branch that outlives the deadline times the parent out promptly; the
/// late ack lands in a dropped slot and disappears.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_branch_times_the_parent_out() {
    let sinks = [
        CaptureSink::new("a", AckMode::Done),
        CaptureSink::new("b", AckMode::DelayDone(Duration::from_millis(400))),
    ];
    let mut params = Params::new();
    params.insert("timeout_ms".into(), Value::Int(50));
    let demux = demux_with_sinks(params, &sinks);
    start_all(&demux, &sinks).await;

    let started = Instant::now();
    let (msg, wait) = Message::new_sync("x");
    demux.receive(msg).await.unwrap();
    assert_eq!(wait.wait().await, Status::TimedOut);
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "timeout took {:?}",
        started.elapsed()
    );

    // The slow sink did receive its copy; its eventual ack is discarded.
    assert_eq!(sinks[1].received_count(), 1);
    demux.stop().await.unwrap();
}

/// An all-zero active mask means no participants: the parent acks Done
/// without any child work.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_mask_short_circuits() {
    let sinks = [
        CaptureSink::new("a", AckMode::Done),
        CaptureSink::new("b", AckMode::Done),
    ];
    let mut params = Params::new();
    params.insert("active_mask".into(), Value::Int(0));
    let demux = demux_with_sinks(params, &sinks);
    start_all(&demux, &sinks).await;

    let (msg, wait) = Message::new_sync("x");
    demux.receive(msg).await.unwrap();
    assert_eq!(wait.wait().await, Status::Done);

    assert_eq!(sinks[0].received_count(), 0);
    assert_eq!(sinks[1].received_count(), 0);
    demux.stop().await.unwrap();
}

/// Only targets whose mask bit is set participate.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mask_selects_participants() {
    let sinks = [
        CaptureSink::new("a", AckMode::Done),
        CaptureSink::new("b", AckMode::Failed),
    ];
    let mut params = Params::new();
    params.insert("active_mask".into(), Value::Int(0b01));
    let demux = demux_with_sinks(params, &sinks);
    start_all(&demux, &sinks).await;

    let (msg, wait) = Message::new_sync("x");
    demux.receive(msg).await.unwrap();
    // Only the Done-acking sink participates, so the parent resolves Done.
    assert_eq!(wait.wait().await, Status::Done);
    assert_eq!(sinks[0].received_count(), 1);
    assert_eq!(sinks[1].received_count(), 0);
    demux.stop().await.unwrap();
}

/// Async messages resolve at dispatch: all sinks get copies and nothing
/// waits on their acks.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_messages_fan_out_without_waiting() {
    let sinks = [
        CaptureSink::new("a", AckMode::Done),
        CaptureSink::new("b", AckMode::DelayDone(Duration::from_millis(200))),
    ];
    let demux = demux_with_sinks(Params::new(), &sinks);
    start_all(&demux, &sinks).await;

    demux.receive(Message::new_async("x")).await.unwrap();

    // Copies arrive at both sinks regardless of ack latency.
    tokio::time::timeout(Duration::from_secs(1), async {
        while sinks[0].received_count() + sinks[1].received_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both sinks should receive the async message");
    demux.stop().await.unwrap();
}
