//! Correlation and forwarding over in-memory sockets

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use tapline_external_media::Encapsulation;
use tapline_stream_bridge::{
    AudioSocketFrame, ClientMessage, ClientReader, ClientWriter, Result, StreamBridge, StreamError,
    StreamRegistry, StreamWriter,
};

const WAIT: Duration = Duration::from_secs(2);

struct ChannelReader(mpsc::UnboundedReceiver<ClientMessage>);

#[async_trait]
impl ClientReader for ChannelReader {
    async fn next_message(&mut self) -> Result<Option<ClientMessage>> {
        Ok(self.0.recv().await)
    }
}

struct ChannelWriter {
    sent: mpsc::UnboundedSender<Bytes>,
    closes: AtomicUsize,
}

#[async_trait]
impl ClientWriter for ChannelWriter {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.sent.send(data).map_err(|_| StreamError::Closed)
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-process stand-in for a consumer connection
struct TestClient {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    received: mpsc::UnboundedReceiver<Bytes>,
    writer: Arc<ChannelWriter>,
}

fn connect_client(bridge: &StreamBridge, id: Uuid) -> TestClient {
    let (outbound, inbound) = mpsc::unbounded_channel();
    let (sent, received) = mpsc::unbounded_channel();
    let writer = Arc::new(ChannelWriter {
        sent,
        closes: AtomicUsize::new(0),
    });
    bridge.accept_client(id, ChannelReader(inbound), writer.clone(), Encapsulation::AudioSocket);
    TestClient {
        outbound,
        received,
        writer,
    }
}

fn bridge() -> StreamBridge {
    StreamBridge::new(Arc::new(StreamRegistry::new()))
}

fn frame(frame: AudioSocketFrame) -> Bytes {
    frame.encode().unwrap()
}

/// Dial "from the switch": write `first` and hand the other end to the
/// correlator. Returns the switch's end of the connection.
async fn dial_switch(
    bridge: &StreamBridge,
    first: AudioSocketFrame,
) -> (DuplexStream, Result<Uuid>) {
    let (mut switch_end, bridge_end) = tokio::io::duplex(4096);
    switch_end.write_all(&frame(first)).await.unwrap();

    let (reader, writer) = tokio::io::split(bridge_end);
    let res = bridge.correlate(reader, Arc::new(StreamWriter::new(writer))).await;
    (switch_end, res)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_audio_flows_both_ways_after_identity() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let mut client = connect_client(&bridge, id);

    let (mut switch_end, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    assert_eq!(res.unwrap(), id);
    assert!(bridge.registry().get(id).unwrap().has_switch_socket());

    // switch -> client carries the whole frame
    let audio = frame(AudioSocketFrame::Audio(Bytes::from_static(&[1, 2, 3])));
    switch_end.write_all(&audio).await.unwrap();
    let received = timeout(WAIT, client.received.recv()).await.unwrap().unwrap();
    assert_eq!(received, audio);

    // client -> switch is written as is
    let reply = frame(AudioSocketFrame::Audio(Bytes::from_static(&[7, 7, 7, 7])));
    client.outbound.send(ClientMessage::Binary(reply.clone())).unwrap();
    let mut buf = vec![0u8; reply.len()];
    timeout(WAIT, switch_end.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf, reply);
}

#[tokio::test]
async fn test_non_identity_first_frame_closes_connection() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let _client = connect_client(&bridge, id);
    let before = bridge.registry().stats();

    let (mut switch_end, res) =
        dial_switch(&bridge, AudioSocketFrame::Audio(Bytes::from_static(&[1, 2]))).await;
    assert!(matches!(res, Err(StreamError::MalformedFrame(_))));

    let mut rest = Vec::new();
    timeout(WAIT, switch_end.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());

    assert_eq!(bridge.registry().len(), 1);
    assert!(!bridge.registry().get(id).unwrap().has_switch_socket());
    assert_eq!(bridge.registry().stats(), before);
}

#[tokio::test]
async fn test_identity_for_unknown_session_closes_connection() {
    let bridge = bridge();

    let (mut switch_end, res) =
        dial_switch(&bridge, AudioSocketFrame::Identity(Uuid::new_v4())).await;
    assert!(res.unwrap_err().is_not_found());

    let mut rest = Vec::new();
    timeout(WAIT, switch_end.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn test_only_non_empty_audio_is_forwarded() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let mut client = connect_client(&bridge, id);
    let (mut switch_end, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    res.unwrap();

    for skipped in [
        AudioSocketFrame::Audio(Bytes::new()),
        AudioSocketFrame::Error(Some(0x01)),
        AudioSocketFrame::Unknown {
            kind: 0x42,
            payload: Bytes::from_static(b"x"),
        },
    ] {
        switch_end.write_all(&frame(skipped)).await.unwrap();
    }
    let audio = frame(AudioSocketFrame::Audio(Bytes::from_static(&[9])));
    switch_end.write_all(&audio).await.unwrap();

    let received = timeout(WAIT, client.received.recv()).await.unwrap().unwrap();
    assert_eq!(received, audio);
    settle().await;
    assert!(client.received.try_recv().is_err());
}

#[tokio::test]
async fn test_client_audio_before_switch_is_dropped() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let client = connect_client(&bridge, id);

    client
        .outbound
        .send(ClientMessage::Binary(Bytes::from_static(b"early")))
        .unwrap();
    settle().await;

    let (mut switch_end, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    res.unwrap();

    client.outbound.send(ClientMessage::Other).unwrap();
    client
        .outbound
        .send(ClientMessage::Binary(Bytes::from_static(b"late")))
        .unwrap();

    let mut buf = [0u8; 4];
    timeout(WAIT, switch_end.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"late");
}

#[tokio::test]
async fn test_client_disconnect_terminates_once() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let client = connect_client(&bridge, id);
    let session = bridge.registry().get(id).unwrap();

    let (mut switch_end, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    res.unwrap();
    for _ in 0..4 {
        switch_end
            .write_all(&frame(AudioSocketFrame::Audio(Bytes::from_static(&[0x55; 160]))))
            .await
            .unwrap();
    }

    let TestClient {
        outbound,
        received: _received,
        writer,
    } = client;
    drop(outbound);

    timeout(WAIT, session.closed()).await.unwrap();

    // switch socket was shut down from our side
    let mut rest = Vec::new();
    timeout(WAIT, switch_end.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());

    settle().await;
    assert!(bridge.registry().is_empty());
    assert_eq!(bridge.registry().stats().total_terminated, 1);
    assert_eq!(writer.closes.load(Ordering::SeqCst), 1);
    assert!(!bridge.stop(id).await);
}

#[tokio::test]
async fn test_switch_hangup_terminates_session() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let client = connect_client(&bridge, id);
    let session = bridge.registry().get(id).unwrap();

    let (mut switch_end, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    res.unwrap();
    switch_end.write_all(&frame(AudioSocketFrame::Terminate)).await.unwrap();
    drop(switch_end);

    timeout(WAIT, session.closed()).await.unwrap();
    assert_eq!(client.writer.closes.load(Ordering::SeqCst), 1);
    assert!(bridge.registry().get(id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_explicit_stop_is_repeatable() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let client = connect_client(&bridge, id);

    assert!(bridge.stop(id).await);
    for _ in 0..5 {
        assert!(!bridge.stop(id).await);
    }
    assert_eq!(client.writer.closes.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.registry().stats().total_terminated, 1);
}

#[tokio::test]
async fn test_second_switch_connection_is_refused() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let mut client = connect_client(&bridge, id);

    let (mut first, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    res.unwrap();

    let (mut second, res) = dial_switch(&bridge, AudioSocketFrame::Identity(id)).await;
    assert!(matches!(res, Err(StreamError::AlreadyAttached(got)) if got == id));
    let mut rest = Vec::new();
    timeout(WAIT, second.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());

    // the original connection keeps carrying the session
    let audio = frame(AudioSocketFrame::Audio(Bytes::from_static(&[4, 2])));
    first.write_all(&audio).await.unwrap();
    let received = timeout(WAIT, client.received.recv()).await.unwrap().unwrap();
    assert_eq!(received, audio);
    assert_eq!(bridge.registry().len(), 1);
}

#[tokio::test]
async fn test_replaced_client_does_not_end_new_session() {
    let bridge = bridge();
    let id = Uuid::new_v4();
    let old = connect_client(&bridge, id);
    let old_session = bridge.registry().get(id).unwrap();
    let new = connect_client(&bridge, id);
    let new_session = bridge.registry().get(id).unwrap();

    timeout(WAIT, old_session.closed()).await.unwrap();
    drop(old.outbound);
    settle().await;

    assert!(!new_session.is_closed());
    assert_eq!(bridge.registry().len(), 1);
    assert_eq!(new.writer.closes.load(Ordering::SeqCst), 0);
    assert!(!bridge.registry().terminate_session(&old_session).await);

    drop(new.outbound);
    timeout(WAIT, new_session.closed()).await.unwrap();
    settle().await;
    assert!(bridge.registry().is_empty());
}
