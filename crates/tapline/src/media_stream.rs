//! WebSocket endpoint that attaches a consumer to a call or conference
//!
//! `GET /v1/media-streams?reference_type=call&reference_id=<uuid>[&format=ulaw]`
//!
//! Each accepted client gets its own external media session over
//! AudioSocket. The session lives as long as the WebSocket does.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tapline_external_media::{
    ConnectionRole, Direction, Encapsulation, ExternalMediaHandler, ReferenceType, StartRequest,
    Transport,
};
use tapline_stream_bridge::{accept_with_retry, split_websocket, StreamBridge};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MEDIA_STREAMS_PATH: &str = "/v1/media-streams";

/// What a client asked to listen to
#[derive(Debug, Clone, PartialEq)]
pub struct MediaStreamRequest {
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub format: Option<String>,
}

impl MediaStreamRequest {
    pub fn from_uri(uri: &Uri) -> std::result::Result<Self, String> {
        if uri.path() != MEDIA_STREAMS_PATH {
            return Err(format!("unknown path {}", uri.path()));
        }

        let mut reference_type = None;
        let mut reference_id = None;
        let mut format = None;
        let query = uri.query().unwrap_or_default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "reference_type" => {
                    let parsed = value.parse::<ReferenceType>().map_err(|e| e.to_string())?;
                    reference_type = Some(parsed);
                }
                "reference_id" => {
                    reference_id = Some(
                        value
                            .parse::<Uuid>()
                            .map_err(|_| format!("invalid reference_id {}", value))?,
                    )
                }
                "format" if !value.is_empty() => format = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            reference_type: reference_type.ok_or("missing reference_type")?,
            reference_id: reference_id.ok_or("missing reference_id")?,
            format,
        })
    }

    /// AudioSocket over TCP, the switch dialing out to `advertise`
    fn start_request(&self, id: Uuid, advertise: &str) -> StartRequest {
        let mut request = StartRequest::new(self.reference_type, self.reference_id, advertise)
            .with_id(id)
            .with_encapsulation(Encapsulation::AudioSocket)
            .with_transport(Transport::Tcp)
            .with_connection_role(ConnectionRole::Client)
            .with_directions(Direction::Both, Direction::Both);
        if let Some(format) = &self.format {
            request = request.with_format(format.clone());
        }
        request
    }
}

fn bad_request(message: String) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(message));
    *res.status_mut() = StatusCode::BAD_REQUEST;
    res
}

pub struct MediaStreamService {
    handler: Arc<ExternalMediaHandler>,
    bridge: StreamBridge,
    advertise: String,
}

impl MediaStreamService {
    pub fn new(
        handler: Arc<ExternalMediaHandler>,
        bridge: StreamBridge,
        advertise: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            bridge,
            advertise: advertise.into(),
        }
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Media stream listener on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = accept_with_retry("Media stream", || listener.accept()).await;
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.serve(stream, peer).await {
                    warn!(%peer, "Media stream ended with an error: {:#}", e);
                }
            });
        }
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut requested = None;
        let ws = accept_hdr_async(stream, |req: &Request, res: Response| {
            match MediaStreamRequest::from_uri(req.uri()) {
                Ok(request) => {
                    requested = Some(request);
                    Ok(res)
                }
                Err(message) => Err(bad_request(message)),
            }
        })
        .await?;
        let requested = requested.ok_or_else(|| anyhow!("handshake completed without a request"))?;

        let id = Uuid::new_v4();
        info!(
            stream_id = %id,
            %peer,
            reference_type = %requested.reference_type,
            reference_id = %requested.reference_id,
            "Media stream client connected"
        );

        let (reader, writer) = split_websocket(ws);
        let session = self
            .bridge
            .accept_client(id, reader, Arc::new(writer), Encapsulation::AudioSocket);

        let media = match self.handler.start(requested.start_request(id, &self.advertise)).await {
            Ok(media) => media,
            Err(e) => {
                error!(stream_id = %id, "Could not start external media: {}", e);
                self.bridge.stop(id).await;
                return Err(e.into());
            }
        };
        if self.bridge.registry().attach_external_media_info(id, media).is_err() {
            debug!(stream_id = %id, "Client left before the session was recorded");
        }

        session.closed().await;

        match self.handler.stop(id).await {
            Ok(_) => info!(stream_id = %id, "Media stream finished"),
            Err(e) if e.is_not_found() => debug!(stream_id = %id, "External media already stopped"),
            Err(e) => warn!(stream_id = %id, "Could not stop external media: {}", e),
        }
        Ok(())
    }
}
