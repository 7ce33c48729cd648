//! Lookups of the records an attachment can reference
//!
//! Call, conference, channel and bridge records are owned by the rest of the
//! platform. The orchestrator only reads them through [`ReferenceDirectory`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExternalMediaError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    pub id: Uuid,
    pub channel_id: String,
    /// Empty while the call is not bridged
    pub bridge_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConferenceInfo {
    pub id: Uuid,
    pub bridge_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub asterisk_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfo {
    pub id: String,
    pub asterisk_id: String,
}

/// Read access to platform records. Absent records are
/// [`ExternalMediaError::NotFound`].
#[async_trait]
pub trait ReferenceDirectory: Send + Sync {
    async fn get_call(&self, id: Uuid) -> Result<CallInfo>;
    async fn get_conference(&self, id: Uuid) -> Result<ConferenceInfo>;
    async fn get_channel(&self, id: &str) -> Result<ChannelInfo>;
    async fn get_bridge(&self, id: &str) -> Result<BridgeInfo>;
}

/// In-process directory, fed by whoever consumes the switch events
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    calls: Arc<DashMap<Uuid, CallInfo>>,
    conferences: Arc<DashMap<Uuid, ConferenceInfo>>,
    channels: Arc<DashMap<String, ChannelInfo>>,
    bridges: Arc<DashMap<String, BridgeInfo>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_call(&self, call: CallInfo) {
        self.calls.insert(call.id, call);
    }

    pub fn upsert_conference(&self, conference: ConferenceInfo) {
        self.conferences.insert(conference.id, conference);
    }

    pub fn upsert_channel(&self, channel: ChannelInfo) {
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn upsert_bridge(&self, bridge: BridgeInfo) {
        self.bridges.insert(bridge.id.clone(), bridge);
    }

    pub fn remove_call(&self, id: Uuid) {
        self.calls.remove(&id);
    }

    pub fn remove_conference(&self, id: Uuid) {
        self.conferences.remove(&id);
    }

    pub fn remove_channel(&self, id: &str) {
        self.channels.remove(id);
    }

    pub fn remove_bridge(&self, id: &str) {
        self.bridges.remove(id);
    }
}

#[async_trait]
impl ReferenceDirectory for MemoryDirectory {
    async fn get_call(&self, id: Uuid) -> Result<CallInfo> {
        self.calls
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| ExternalMediaError::not_found("call", id))
    }

    async fn get_conference(&self, id: Uuid) -> Result<ConferenceInfo> {
        self.conferences
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| ExternalMediaError::not_found("conference", id))
    }

    async fn get_channel(&self, id: &str) -> Result<ChannelInfo> {
        self.channels
            .get(id)
            .map(|c| c.value().clone())
            .ok_or_else(|| ExternalMediaError::not_found("channel", id))
    }

    async fn get_bridge(&self, id: &str) -> Result<BridgeInfo> {
        self.bridges
            .get(id)
            .map(|b| b.value().clone())
            .ok_or_else(|| ExternalMediaError::not_found("bridge", id))
    }
}
