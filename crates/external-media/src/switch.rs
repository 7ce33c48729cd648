//! Switch control-plane seam
//!
//! Everything the orchestrator needs from the switch goes through
//! [`SwitchClient`]. The ARI implementation lives in [`crate::ari`]; tests
//! plug in their own recorder.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SwitchResult;
use crate::types::{ConnectionRole, Direction, Encapsulation, Transport};

/// Channel variable carrying the address the switch bound for external media
pub const LOCAL_ADDRESS_VAR: &str = "UNICASTRTP_LOCAL_ADDRESS";
/// Channel variable carrying the port the switch bound for external media
pub const LOCAL_PORT_VAR: &str = "UNICASTRTP_LOCAL_PORT";

/// The "data" field handed to the switch when a channel is created.
///
/// The AudioSocket driver reads the data field as the stream identifier and
/// nothing else, so it only ever gets [`ChannelData::RawId`]. Every other
/// channel gets structured key=value data the event side parses back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelData {
    RawId(String),
    KeyValue(Vec<(String, String)>),
}

impl ChannelData {
    pub fn key_value() -> Self {
        ChannelData::KeyValue(Vec::new())
    }

    /// Append a pair. No-op on a raw id.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        if let ChannelData::KeyValue(pairs) = &mut self {
            pairs.push((key.into(), value.to_string()));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            ChannelData::RawId(_) => None,
            ChannelData::KeyValue(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
        }
    }

    /// Inverse of the `Display` rendering
    pub fn parse(data: &str) -> Self {
        if !data.contains('=') {
            return ChannelData::RawId(data.trim().to_string());
        }

        let pairs = data
            .split(',')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        ChannelData::KeyValue(pairs)
    }
}

impl fmt::Display for ChannelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelData::RawId(id) => f.write_str(id),
            ChannelData::KeyValue(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                Ok(())
            }
        }
    }
}

/// A channel as reported by the switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchChannel {
    pub id: String,
    pub asterisk_id: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub channel_vars: HashMap<String, String>,
}

/// A bridge as reported by the switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchBridge {
    pub id: String,
    pub name: String,
    pub bridge_type: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Parameters for creating an external media channel
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMediaChannelRequest {
    pub channel_id: String,
    pub external_host: String,
    pub encapsulation: Encapsulation,
    pub transport: Transport,
    pub connection_role: ConnectionRole,
    pub format: String,
    pub direction: Direction,
    pub data: ChannelData,
    pub variables: HashMap<String, String>,
}

/// Parameters for creating a snoop channel off an existing channel
#[derive(Debug, Clone, PartialEq)]
pub struct SnoopRequest {
    /// Channel being snooped
    pub channel_id: String,
    pub snoop_id: String,
    pub spy: Direction,
    pub whisper: Direction,
    pub app_args: ChannelData,
}

/// Control-plane calls consumed by the orchestrator
#[async_trait]
pub trait SwitchClient: Send + Sync {
    async fn create_external_media(
        &self,
        asterisk_id: &str,
        request: &ExternalMediaChannelRequest,
    ) -> SwitchResult<SwitchChannel>;

    /// Create a mixing bridge with the given id
    async fn create_bridge(
        &self,
        asterisk_id: &str,
        bridge_id: &str,
        name: &str,
    ) -> SwitchResult<SwitchBridge>;

    async fn create_snoop(
        &self,
        asterisk_id: &str,
        request: &SnoopRequest,
    ) -> SwitchResult<SwitchChannel>;

    async fn add_channel_to_bridge(
        &self,
        asterisk_id: &str,
        bridge_id: &str,
        channel_id: &str,
    ) -> SwitchResult<()>;

    async fn hangup_channel(&self, asterisk_id: &str, channel_id: &str) -> SwitchResult<()>;

    async fn destroy_bridge(&self, asterisk_id: &str, bridge_id: &str) -> SwitchResult<()>;
}
