//! AudioSocket framing
//!
//! Every message on a switch socket is `[kind: u8][length: u16 LE][payload]`.
//! Frames are decoded once into [`AudioSocketFrame`] and matched on from
//! then on.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::error::{Result, StreamError};

pub const KIND_TERMINATE: u8 = 0x00;
pub const KIND_IDENTITY: u8 = 0x01;
pub const KIND_AUDIO: u8 = 0x10;
pub const KIND_ERROR: u8 = 0xff;

/// Kind byte plus the two length bytes
pub const HEADER_LEN: usize = 3;

pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// One decoded AudioSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSocketFrame {
    /// Sender is hanging up. Empty payload.
    Terminate,
    /// First frame on a switch connection, carrying the session id
    Identity(Uuid),
    /// Raw PCM
    Audio(Bytes),
    /// Switch-side error, with its one byte code when present
    Error(Option<u8>),
    /// Any other kind, or a known kind whose payload has the wrong shape
    Unknown { kind: u8, payload: Bytes },
}

impl AudioSocketFrame {
    /// Build a frame from its kind byte and payload
    pub fn decode(kind: u8, payload: Bytes) -> Self {
        match kind {
            KIND_TERMINATE if payload.is_empty() => Self::Terminate,
            KIND_IDENTITY => match Uuid::from_slice(&payload) {
                Ok(id) => Self::Identity(id),
                Err(_) => Self::Unknown { kind, payload },
            },
            KIND_AUDIO => Self::Audio(payload),
            KIND_ERROR => Self::Error(payload.first().copied()),
            _ => Self::Unknown { kind, payload },
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Self::Terminate => KIND_TERMINATE,
            Self::Identity(_) => KIND_IDENTITY,
            Self::Audio(_) => KIND_AUDIO,
            Self::Error(_) => KIND_ERROR,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    pub fn payload(&self) -> Bytes {
        match self {
            Self::Terminate => Bytes::new(),
            Self::Identity(id) => Bytes::copy_from_slice(id.as_bytes()),
            Self::Audio(payload) => payload.clone(),
            Self::Error(code) => code.map(|c| Bytes::copy_from_slice(&[c])).unwrap_or_default(),
            Self::Unknown { payload, .. } => payload.clone(),
        }
    }

    /// Serialize header and payload into a single buffer
    pub fn encode(&self) -> Result<Bytes> {
        let payload = self.payload();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(StreamError::malformed(format!(
                "payload of {} bytes does not fit a frame",
                payload.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(self.kind());
        buf.put_u16_le(payload.len() as u16);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode one frame from the front of `buf`. Returns `None` and leaves
    /// `buf` untouched when it does not hold a complete frame yet.
    pub fn parse(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        if buf.len() < HEADER_LEN + len {
            return None;
        }

        let kind = buf.get_u8();
        buf.advance(2);
        Some(Self::decode(kind, buf.split_to(len).freeze()))
    }
}

/// Read the next frame from a switch socket. `Ok(None)` is a clean end of
/// stream at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<AudioSocketFrame>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(StreamError::malformed(format!(
                    "stream ended after {} of {} header bytes",
                    filled, HEADER_LEN
                )))
            }
            n => filled += n,
        }
    }

    let kind = header[0];
    let len = u16::from_le_bytes([header[1], header[2]]) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(AudioSocketFrame::decode(kind, Bytes::from(payload))))
}
