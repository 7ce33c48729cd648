//! Topology planning: where the new external media channel is spliced in
//!
//! Three shapes are possible:
//!
//! - conference: the media channel joins the conference's own bridge
//! - call, inserting: the media channel joins the call's bridge, so audio
//!   flows both ways
//! - call, no-insert: an auxiliary bridge is created, a snoop channel off the
//!   call's channel is routed into it, and the media channel joins the
//!   auxiliary bridge. The snoop never whispers, so nothing sent by the
//!   consumer reaches the call. This path is observation-only.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ExternalMediaError, Result};
use crate::reference::ReferenceDirectory;
use crate::switch::{ChannelData, SnoopRequest, SwitchClient};
use crate::types::{Direction, Encapsulation, ReferenceType, StartRequest};

/// Context stamped on external media channels
pub const CONTEXT_EXTERNAL_MEDIA: &str = "call-externalmedia";
/// Context stamped on the snoop channel of the no-insert path
pub const CONTEXT_EXTERNAL_SNOOP: &str = "call-externalsnoop";

pub const DATA_CONTEXT: &str = "context";
pub const DATA_BRIDGE_ID: &str = "bridge_id";
pub const DATA_REFERENCE_TYPE: &str = "reference_type";
pub const DATA_REFERENCE_ID: &str = "reference_id";
pub const DATA_EXTERNAL_MEDIA_ID: &str = "external_media_id";

pub const VAR_EXTERNAL_MEDIA_ID: &str = "TAPLINE_EXTERNAL_MEDIA_ID";
pub const VAR_REFERENCE_TYPE: &str = "TAPLINE_REFERENCE_TYPE";
pub const VAR_REFERENCE_ID: &str = "TAPLINE_REFERENCE_ID";

/// Outcome of planning: where to create the channel and what to stamp on it
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyPlan {
    pub asterisk_id: String,
    pub bridge_id: String,
    /// Present on the no-insert path, where `bridge_id` is an auxiliary
    /// bridge owned by the session
    pub snoop_channel_id: Option<String>,
    pub data: ChannelData,
    pub variables: HashMap<String, String>,
}

impl TopologyPlan {
    pub fn owns_bridge(&self) -> bool {
        self.snoop_channel_id.is_some()
    }
}

pub struct TopologyPlanner {
    switch: Arc<dyn SwitchClient>,
    directory: Arc<dyn ReferenceDirectory>,
}

impl TopologyPlanner {
    pub fn new(switch: Arc<dyn SwitchClient>, directory: Arc<dyn ReferenceDirectory>) -> Self {
        Self { switch, directory }
    }

    /// Decide the target bridge for session `id`, creating the auxiliary
    /// bridge and snoop channel first when the request asks not to insert.
    pub async fn plan(
        &self,
        id: Uuid,
        request: &StartRequest,
        encapsulation: Encapsulation,
    ) -> Result<TopologyPlan> {
        let (asterisk_id, bridge_id, snoop_channel_id) = match request.reference_type {
            ReferenceType::Conference => {
                if request.no_insert {
                    debug!(
                        external_media_id = %id,
                        "no-insert has no effect on a conference reference"
                    );
                }
                let (asterisk_id, bridge_id) = self.conference_target(request.reference_id).await?;
                (asterisk_id, bridge_id, None)
            }
            ReferenceType::Call if !request.no_insert => {
                let (asterisk_id, bridge_id, _) = self.call_target(request.reference_id).await?;
                (asterisk_id, bridge_id, None)
            }
            ReferenceType::Call => {
                let (asterisk_id, _, channel_id) = self.call_target(request.reference_id).await?;
                let (bridge_id, snoop_id) = self
                    .create_snoop_path(id, request, &asterisk_id, &channel_id)
                    .await?;
                (asterisk_id, bridge_id, Some(snoop_id))
            }
        };

        let data = Self::channel_data(id, request, encapsulation, &bridge_id);
        let variables = HashMap::from([
            (VAR_EXTERNAL_MEDIA_ID.to_string(), id.to_string()),
            (VAR_REFERENCE_TYPE.to_string(), request.reference_type.to_string()),
            (VAR_REFERENCE_ID.to_string(), request.reference_id.to_string()),
        ]);

        info!(
            external_media_id = %id,
            asterisk_id = %asterisk_id,
            bridge_id = %bridge_id,
            snoop = snoop_channel_id.is_some(),
            "Planned external media topology"
        );

        Ok(TopologyPlan {
            asterisk_id,
            bridge_id,
            snoop_channel_id,
            data,
            variables,
        })
    }

    /// The AudioSocket driver takes the data field as the stream id and
    /// nothing else. Every other encapsulation gets key=value pairs.
    pub fn channel_data(
        id: Uuid,
        request: &StartRequest,
        encapsulation: Encapsulation,
        bridge_id: &str,
    ) -> ChannelData {
        match encapsulation {
            Encapsulation::AudioSocket => ChannelData::RawId(id.to_string()),
            Encapsulation::Rtp | Encapsulation::Sln => ChannelData::key_value()
                .with(DATA_CONTEXT, CONTEXT_EXTERNAL_MEDIA)
                .with(DATA_BRIDGE_ID, bridge_id)
                .with(DATA_REFERENCE_TYPE, request.reference_type)
                .with(DATA_REFERENCE_ID, request.reference_id)
                .with(DATA_EXTERNAL_MEDIA_ID, id),
        }
    }

    async fn conference_target(&self, conference_id: Uuid) -> Result<(String, String)> {
        let conference = self.directory.get_conference(conference_id).await?;
        let bridge = self.directory.get_bridge(&conference.bridge_id).await?;
        Ok((bridge.asterisk_id, bridge.id))
    }

    /// (asterisk id, bridge id, channel id) of a call
    async fn call_target(&self, call_id: Uuid) -> Result<(String, String, String)> {
        let call = self.directory.get_call(call_id).await?;
        let channel = self.directory.get_channel(&call.channel_id).await?;
        if call.bridge_id.is_empty() {
            return Err(ExternalMediaError::invalid_state(format!(
                "call {} has no bridge",
                call_id
            )));
        }
        let bridge = self.directory.get_bridge(&call.bridge_id).await?;
        Ok((channel.asterisk_id, bridge.id, channel.id))
    }

    /// Create the auxiliary bridge, then the snoop channel routed into it.
    /// Returns (bridge id, snoop channel id).
    async fn create_snoop_path(
        &self,
        id: Uuid,
        request: &StartRequest,
        asterisk_id: &str,
        channel_id: &str,
    ) -> Result<(String, String)> {
        let bridge_id = Uuid::new_v4().to_string();
        let bridge_name = format!(
            "reference_type={},reference_id={}",
            request.reference_type, request.reference_id
        );
        self.switch
            .create_bridge(asterisk_id, &bridge_id, &bridge_name)
            .await
            .map_err(|e| ExternalMediaError::switch("create bridge", e))?;
        debug!(external_media_id = %id, bridge_id = %bridge_id, "Created auxiliary bridge");

        if request.direction_speak != Direction::None {
            warn!(
                external_media_id = %id,
                "Speak direction {} is dropped on the no-insert path",
                request.direction_speak
            );
        }

        let spy = match request.direction_listen {
            Direction::None => Direction::Both,
            other => other,
        };
        let snoop = SnoopRequest {
            channel_id: channel_id.to_string(),
            snoop_id: Uuid::new_v4().to_string(),
            spy,
            whisper: Direction::None,
            app_args: ChannelData::key_value()
                .with(DATA_CONTEXT, CONTEXT_EXTERNAL_SNOOP)
                .with(DATA_BRIDGE_ID, &bridge_id)
                .with(DATA_REFERENCE_TYPE, request.reference_type)
                .with(DATA_REFERENCE_ID, request.reference_id)
                .with(DATA_EXTERNAL_MEDIA_ID, id),
        };
        let channel = self
            .switch
            .create_snoop(asterisk_id, &snoop)
            .await
            .map_err(|e| ExternalMediaError::switch("create snoop", e))?;
        debug!(external_media_id = %id, snoop_channel_id = %channel.id, "Created snoop channel");

        Ok((bridge_id, channel.id))
    }
}
