//! Socket seams for both sides of a stream
//!
//! The client side is message oriented (a WebSocket in production), the
//! switch side is a byte stream carrying AudioSocket frames. Writers are
//! shared between a forwarding loop and the registry, so they take `&self`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::Result;

/// One message received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Media payload
    Binary(Bytes),
    /// Anything the bridge does not forward (text, ping, ...)
    Other,
}

#[async_trait]
pub trait ClientReader: Send {
    /// Next message, `None` once the client has gone away
    async fn next_message(&mut self) -> Result<Option<ClientMessage>>;
}

#[async_trait]
pub trait ClientWriter: Send + Sync {
    async fn send(&self, data: Bytes) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait SwitchWriter: Send + Sync {
    async fn send(&self, data: Bytes) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Write half of a byte stream (TCP from the switch)
pub struct StreamWriter<W> {
    inner: Mutex<W>,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Mutex::new(inner) }
    }
}

#[async_trait]
impl<W> SwitchWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, data: Bytes) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.write_all(&data).await?;
        inner.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        match self.inner.lock().await.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Split an accepted WebSocket into the reader/writer pair the bridge uses
pub fn split_websocket<S>(ws: WebSocketStream<S>) -> (WsClientReader<S>, WsClientWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (
        WsClientReader { stream },
        WsClientWriter { sink: Mutex::new(sink) },
    )
}

pub struct WsClientReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> ClientReader for WsClientReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_message(&mut self) -> Result<Option<ClientMessage>> {
        match self.stream.next().await {
            None | Some(Ok(Message::Close(_))) => Ok(None),
            Some(Ok(Message::Binary(data))) => Ok(Some(ClientMessage::Binary(data))),
            Some(Ok(_)) => Ok(Some(ClientMessage::Other)),
            Some(Err(tungstenite::Error::ConnectionClosed)) => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

pub struct WsClientWriter<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
}

#[async_trait]
impl<S> ClientWriter for WsClientWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, data: Bytes) -> Result<()> {
        self.sink.lock().await.send(Message::Binary(data)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        match self.sink.lock().await.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
