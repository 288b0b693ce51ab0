#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use orc_engine::config::ConnectionSection;
use orc_engine::transport::{PipelineEvent, PipelineEvents, TransportPipeline};

async fn listener() -> (TcpListener, ConnectionSection) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ConnectionSection::new("127.0.0.1", port))
}

async fn next_event(events: &mut PipelineEvents) -> PipelineEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no pipeline event")
        .expect("event channel closed")
}

#[tokio::test]
async fn frames_split_across_segments_arrive_whole() {
    let (listener, cfg) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"{a=1|b={c=").await.unwrap();
        sock.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        sock.write_all(b"2}}\r\n{d=\\}}{e=3}").await.unwrap();
        sock.flush().await.unwrap();
        sock
    });

    let (pipeline, mut events) = TransportPipeline::open(&cfg).await.unwrap();
    let mut frames = Vec::new();
    while frames.len() < 3 {
        match next_event(&mut events).await {
            PipelineEvent::Frame(f) => frames.push(String::from_utf8(f.to_vec()).unwrap()),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(frames, ["{a=1|b={c=2}}", "{d=\\}}", "{e=3}"]);

    drop(server.await.unwrap());
    pipeline.close();
}

#[tokio::test]
async fn outbound_bytes_reach_the_peer() {
    let (listener, cfg) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64];
        let mut got = Vec::new();
        while got.len() < 10 {
            let n = sock.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed early");
            got.extend_from_slice(&buf[..n]);
        }
        got
    });

    let (pipeline, _events) = TransportPipeline::open(&cfg).await.unwrap();
    pipeline.send(Bytes::from_static(b"{a=1}")).await.unwrap();
    pipeline.send(Bytes::from_static(b"{b=2}")).await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(got, b"{a=1}{b=2}");
}

#[tokio::test]
async fn peer_close_stops_receiver_only() {
    let (listener, cfg) = listener().await;
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        drop(sock);
    });

    let (pipeline, mut events) = TransportPipeline::open(&cfg).await.unwrap();
    server.await.unwrap();

    match next_event(&mut events).await {
        PipelineEvent::ReceiverStopped(reason) => assert_eq!(reason, "peer closed connection"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!pipeline.is_closed());
}

#[tokio::test]
async fn close_stops_both_directions_and_rejects_sends() {
    let (listener, cfg) = listener().await;
    let server = tokio::spawn(async move { listener.accept().await.unwrap().0 });

    let (pipeline, mut events) = TransportPipeline::open(&cfg).await.unwrap();
    let _sock = server.await.unwrap();

    pipeline.close();
    pipeline.close();
    assert!(pipeline.is_closed());

    let mut stopped = Vec::new();
    while stopped.len() < 2 {
        match next_event(&mut events).await {
            PipelineEvent::SenderStopped(r) => stopped.push(("sender", r)),
            PipelineEvent::ReceiverStopped(r) => stopped.push(("receiver", r)),
            PipelineEvent::Frame(_) => {}
        }
    }
    stopped.sort();
    assert_eq!(
        stopped,
        [
            ("receiver", "closed by owner".to_string()),
            ("sender", "closed by owner".to_string())
        ]
    );

    let err = pipeline.send(Bytes::from_static(b"{a=1}")).await.unwrap_err();
    assert_eq!(err.code().as_str(), "TRANSPORT");
}

#[tokio::test]
async fn oversize_frame_stops_receiver() {
    let (listener, mut cfg) = listener().await;
    cfg.max_frame_bytes = 64;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let big = format!("{{blob={}}}", "x".repeat(200));
        sock.write_all(big.as_bytes()).await.unwrap();
        sock
    });

    let (_pipeline, mut events) = TransportPipeline::open(&cfg).await.unwrap();
    let _sock = server.await.unwrap();

    match next_event(&mut events).await {
        PipelineEvent::ReceiverStopped(reason) => assert_eq!(reason, "frame exceeds 64 bytes"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn connect_refused_is_a_transport_error() {
    let (listener, cfg) = listener().await;
    drop(listener);

    let err = TransportPipeline::open(&cfg).await.err().expect("connect must fail");
    assert_eq!(err.code().as_str(), "TRANSPORT");
}
