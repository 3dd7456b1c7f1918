//! Integration tests: the broker, the TCP bus client and the relay
//! pipeline talking over real sockets on localhost.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ipid_core::{
    Broker, ChannelCodec, ConnectionInfo, CovertReceiver, Delivery, DetectorConfig, Frame,
    FrameBuilder, GroundTruth, MemorySink, PacketBus, Pipeline, PipelineConfig, TcpBus, Topics,
};
use tokio::sync::mpsc;

// ── Helpers ──────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

/// Start a broker on an OS-assigned port. Dropping the returned sender
/// stops it.
async fn start_broker() -> (ConnectionInfo, tokio::sync::oneshot::Sender<()>) {
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(broker.run_until(async move {
        let _ = stop_rx.await;
    }));
    (ConnectionInfo::new(addr.ip().to_string(), addr.port()), stop_tx)
}

async fn client(info: &ConnectionInfo) -> (TcpBus, mpsc::Receiver<Delivery>) {
    TcpBus::connect(info, WAIT).await.unwrap()
}

/// Subscriptions travel over the same socket as publishes, but from a
/// different client; give the registry a moment to record them.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn next(rx: &mut mpsc::Receiver<Delivery>) -> Delivery {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timeout")
        .expect("bus closed")
}

// ── Broker ───────────────────────────────────────────────────────

#[tokio::test]
async fn publish_reaches_subscriber() {
    let (info, _stop) = start_broker().await;
    let (sub, mut sub_rx) = client(&info).await;
    let (publisher, _pub_rx) = client(&info).await;

    sub.subscribe("inpktsec").await.unwrap();
    settle().await;

    publisher
        .publish("inpktsec", Bytes::from_static(b"frame-1"))
        .await
        .unwrap();
    publisher
        .publish("elsewhere", Bytes::from_static(b"not for you"))
        .await
        .unwrap();
    publisher
        .publish("inpktsec", Bytes::from_static(b"frame-2"))
        .await
        .unwrap();

    let first = next(&mut sub_rx).await;
    let second = next(&mut sub_rx).await;
    assert_eq!(first.topic, "inpktsec");
    assert_eq!(first.payload.as_ref(), b"frame-1");
    assert_eq!(second.payload.as_ref(), b"frame-2");
}

#[tokio::test]
async fn fan_out_to_every_subscriber() {
    let (info, _stop) = start_broker().await;
    let (a, mut a_rx) = client(&info).await;
    let (b, mut b_rx) = client(&info).await;
    let (publisher, _rx) = client(&info).await;

    a.subscribe("t").await.unwrap();
    b.subscribe("t").await.unwrap();
    settle().await;

    publisher.publish("t", Bytes::from_static(b"x")).await.unwrap();
    assert_eq!(next(&mut a_rx).await.payload.as_ref(), b"x");
    assert_eq!(next(&mut b_rx).await.payload.as_ref(), b"x");
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let info = ConnectionInfo::new("127.0.0.1", port);
    assert!(TcpBus::connect(&info, Duration::from_secs(2)).await.is_err());
}

// ── Relay over TCP ───────────────────────────────────────────────

#[tokio::test]
async fn relay_forwards_and_detects_over_tcp() {
    let (info, _stop) = start_broker().await;
    let topics = Topics::default();

    // Relay side.
    let (relay_bus, mut relay_rx) = client(&info).await;
    relay_bus.subscribe(&topics.from_segment_a).await.unwrap();
    relay_bus.subscribe(&topics.from_segment_b).await.unwrap();

    // Receiver on the far side of segment B.
    let (far, mut far_rx) = client(&info).await;
    far.subscribe(&topics.to_segment_b).await.unwrap();

    // Sender on segment A.
    let (sender, _sender_rx) = client(&info).await;
    settle().await;

    let sink = MemorySink::new();
    let mut pipeline = Pipeline::new(
        PipelineConfig {
            detector: DetectorConfig {
                window_size: 3,
                ..DetectorConfig::default()
            },
            mean_delay_ms: 20,
            ..PipelineConfig::default()
        },
        Arc::new(relay_bus),
        Box::new(sink.clone()),
        GroundTruth::new(true),
    );

    let codec = ChannelCodec::default();
    let message = "hi!";
    for symbol in codec.encode(message).unwrap() {
        let frame = FrameBuilder::new()
            .identification(symbol.identification)
            .payload(symbol.payload)
            .build();
        sender
            .publish(&topics.from_segment_a, frame.into_bytes())
            .await
            .unwrap();
    }

    for _ in 0..message.len() {
        let delivery = next(&mut relay_rx).await;
        pipeline.handle(delivery);
    }

    let mut receiver = CovertReceiver::new(codec);
    let mut arrived = Vec::new();
    for _ in 0..message.len() {
        let delivery = next(&mut far_rx).await;
        assert_eq!(delivery.topic, topics.to_segment_b);
        arrived.push(delivery.payload);
    }
    for payload in &arrived {
        receiver.observe_frame(&Frame::from(payload.as_ref()));
    }

    let stats = pipeline.shutdown(Duration::from_secs(2)).await;
    assert_eq!(stats.received_a, 3);
    assert_eq!(stats.forwarded, 3);

    // Jitter may reorder, but every character survives.
    let mut got: Vec<char> = receiver.message().chars().collect();
    let mut want: Vec<char> = message.chars().collect();
    got.sort_unstable();
    want.sort_unstable();
    assert_eq!(got, want);

    // Window of 3 over 3 tagged frames: one scoring event, a true positive.
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tp, 1);
}
