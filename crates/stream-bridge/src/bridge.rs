//! Stream bridge runtime
//!
//! Two forwarding tasks per session, one per direction, plus one short
//! task per inbound switch connection until it has been correlated. Any
//! I/O failure ends the session; both tasks may race to terminate it and
//! the registry makes that safe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tapline_external_media::Encapsulation;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::convert::{convert_from_client, convert_from_switch};
use crate::error::{Result, StreamError};
use crate::frame::{read_frame, AudioSocketFrame};
use crate::registry::{StreamRegistry, StreamSession};
use crate::socket::{ClientMessage, ClientReader, ClientWriter, StreamWriter, SwitchWriter};

/// Pause after a failed `accept` so a persistent error (out of file
/// descriptors) does not spin the listener
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct StreamBridge {
    registry: Arc<StreamRegistry>,
}

impl StreamBridge {
    pub fn new(registry: Arc<StreamRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Register an accepted client and start forwarding its messages to the
    /// switch. Messages arriving before the switch dials in are dropped.
    pub fn accept_client<R>(
        &self,
        id: Uuid,
        reader: R,
        writer: Arc<dyn ClientWriter>,
        encapsulation: Encapsulation,
    ) -> StreamSession
    where
        R: ClientReader + 'static,
    {
        let session = self.registry.create(id, writer, encapsulation);
        tokio::spawn(client_to_switch(self.registry.clone(), session.clone(), reader));
        info!(stream_id = %id, "Accepted stream client");
        session
    }

    /// Identify a freshly accepted switch connection by its first frame and
    /// hook it into its session. On failure the connection is closed and the
    /// registry is left untouched.
    pub async fn correlate<R>(&self, mut reader: R, writer: Arc<dyn SwitchWriter>) -> Result<Uuid>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let id = match read_frame(&mut reader).await {
            Ok(Some(AudioSocketFrame::Identity(id))) => id,
            Ok(Some(frame)) => {
                warn!(kind = frame.kind(), "First switch frame is not an identity frame");
                close_switch(writer.as_ref()).await;
                return Err(StreamError::malformed(format!(
                    "expected identity frame, got kind {:#04x}",
                    frame.kind()
                )));
            }
            Ok(None) => {
                close_switch(writer.as_ref()).await;
                return Err(StreamError::Closed);
            }
            Err(e) => {
                close_switch(writer.as_ref()).await;
                return Err(e);
            }
        };

        let session = match self.registry.attach_switch_socket(id, writer.clone()) {
            Ok(session) => session,
            Err(e) => {
                warn!(stream_id = %id, "Refusing switch connection: {}", e);
                close_switch(writer.as_ref()).await;
                return Err(e);
            }
        };

        info!(stream_id = %id, "Correlated switch connection");
        tokio::spawn(switch_to_client(self.registry.clone(), session, reader));
        Ok(id)
    }

    /// Accept switch connections. Accept errors are logged and retried, so
    /// this only returns if the listener cannot report its address.
    pub async fn run_switch_listener(&self, listener: TcpListener) -> Result<()> {
        info!("AudioSocket listener on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = accept_with_retry("AudioSocket", || listener.accept()).await;
            debug!(%peer, "Switch connection accepted");
            if let Err(e) = stream.set_nodelay(true) {
                warn!(%peer, "Could not disable Nagle on switch connection: {}", e);
            }

            let (reader, writer) = stream.into_split();
            let bridge = self.clone();
            tokio::spawn(async move {
                let writer = Arc::new(StreamWriter::new(writer));
                if let Err(e) = bridge.correlate(reader, writer).await {
                    debug!(%peer, "Dropped switch connection: {}", e);
                }
            });
        }
    }

    /// Tear down a stream from outside. Returns `false` if it was already gone.
    pub async fn stop(&self, id: Uuid) -> bool {
        self.registry.terminate(id).await
    }
}

/// Next connection from `accept`. Failures are logged and retried after
/// [`ACCEPT_RETRY_DELAY`], so a failed accept never ends a listener.
pub async fn accept_with_retry<F, Fut, T>(listener: &str, mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("{} accept failed: {}", listener, e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn close_switch(writer: &dyn SwitchWriter) {
    if let Err(e) = writer.close().await {
        debug!("Closing switch connection failed: {}", e);
    }
}

async fn switch_to_client<R>(registry: Arc<StreamRegistry>, session: StreamSession, mut reader: R)
where
    R: AsyncRead + Unpin + Send,
{
    let id = session.id;
    let client = session.client_writer();

    let res = tokio::select! {
        res = forward_switch_frames(session.encapsulation, &mut reader, client.as_ref()) => res,
        _ = session.closed() => return,
    };

    match res {
        Ok(()) => debug!(stream_id = %id, "Switch side hung up"),
        Err(e) => debug!(stream_id = %id, "Switch to client forwarding stopped: {}", e),
    }
    registry.terminate_session(&session).await;
}

async fn forward_switch_frames<R>(
    encapsulation: Encapsulation,
    reader: &mut R,
    client: &dyn ClientWriter,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    while let Some(frame) = read_frame(reader).await? {
        match &frame {
            AudioSocketFrame::Audio(payload) if !payload.is_empty() => {}
            AudioSocketFrame::Error(code) => {
                debug!(?code, "Switch reported an AudioSocket error");
                continue;
            }
            other => {
                trace!(kind = other.kind(), "Skipping switch frame");
                continue;
            }
        }

        let data = convert_from_switch(encapsulation, frame.encode()?)?;
        client.send(data).await?;
    }
    Ok(())
}

async fn client_to_switch<R>(registry: Arc<StreamRegistry>, session: StreamSession, mut reader: R)
where
    R: ClientReader,
{
    let id = session.id;

    let res = tokio::select! {
        res = forward_client_messages(&registry, &session, &mut reader) => res,
        _ = session.closed() => return,
    };

    match res {
        Ok(()) => debug!(stream_id = %id, "Client disconnected"),
        Err(e) => debug!(stream_id = %id, "Client to switch forwarding stopped: {}", e),
    }
    registry.terminate_session(&session).await;
}

async fn forward_client_messages<R>(
    registry: &StreamRegistry,
    session: &StreamSession,
    reader: &mut R,
) -> Result<()>
where
    R: ClientReader,
{
    while let Some(message) = reader.next_message().await? {
        let ClientMessage::Binary(data) = message else {
            continue;
        };
        let Some(switch) = registry.current_switch_writer(session)? else {
            trace!(stream_id = %session.id, "Switch not connected yet, dropping client audio");
            continue;
        };

        let data: Bytes = convert_from_client(session.encapsulation, data)?;
        switch.send(data).await?;
    }
    Ok(())
}
