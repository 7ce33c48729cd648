//! External media session establishment and teardown

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExternalMediaError, Result};
use crate::reference::ReferenceDirectory;
use crate::store::ExternalMediaStore;
use crate::switch::{
    ChannelData, ExternalMediaChannelRequest, SwitchChannel, SwitchClient, LOCAL_ADDRESS_VAR,
    LOCAL_PORT_VAR,
};
use crate::topology::{
    TopologyPlanner, CONTEXT_EXTERNAL_MEDIA, CONTEXT_EXTERNAL_SNOOP, DATA_BRIDGE_ID, DATA_CONTEXT,
};
use crate::types::{
    ConnectionRole, Direction, Encapsulation, ExternalMedia, ListFilter, StartRequest, Status,
    Transport, DEFAULT_FORMAT,
};

/// Owns the lifecycle of [`ExternalMedia`] sessions: plans the topology,
/// creates the switch-side channel, records the session and tears it down.
pub struct ExternalMediaHandler {
    planner: TopologyPlanner,
    switch: Arc<dyn SwitchClient>,
    store: Arc<dyn ExternalMediaStore>,
    default_format: String,
    /// Sessions with a `stop` in flight
    stopping: DashSet<Uuid>,
}

/// Marks a session as being stopped until dropped
struct StopGuard<'a> {
    stopping: &'a DashSet<Uuid>,
    id: Uuid,
}

impl<'a> StopGuard<'a> {
    fn acquire(stopping: &'a DashSet<Uuid>, id: Uuid) -> Option<Self> {
        if stopping.insert(id) {
            Some(Self { stopping, id })
        } else {
            None
        }
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.stopping.remove(&self.id);
    }
}

impl ExternalMediaHandler {
    pub fn new(
        switch: Arc<dyn SwitchClient>,
        directory: Arc<dyn ReferenceDirectory>,
        store: Arc<dyn ExternalMediaStore>,
    ) -> Self {
        Self {
            planner: TopologyPlanner::new(switch.clone(), directory),
            switch,
            store,
            default_format: DEFAULT_FORMAT.to_string(),
            stopping: DashSet::new(),
        }
    }

    /// Codec used when a request leaves the format empty
    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    /// Attach a new external media channel to the referenced call or
    /// conference.
    ///
    /// Any failing step aborts the whole operation and leaves no record.
    /// Switch resources created before the failure are not rolled back.
    pub async fn start(&self, request: StartRequest) -> Result<ExternalMedia> {
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let encapsulation = request.encapsulation.unwrap_or(Encapsulation::Rtp);
        let transport = request.transport.unwrap_or(Transport::Udp);
        let connection_role = request.connection_role.unwrap_or(ConnectionRole::Client);
        let format = match request.format.as_deref() {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => self.default_format.clone(),
        };

        info!(
            external_media_id = %id,
            reference_type = %request.reference_type,
            reference_id = %request.reference_id,
            encapsulation = %encapsulation,
            "Starting external media"
        );

        let plan = self.planner.plan(id, &request, encapsulation).await?;

        let channel_request = ExternalMediaChannelRequest {
            channel_id: Uuid::new_v4().to_string(),
            external_host: request.external_host.clone(),
            encapsulation,
            transport,
            connection_role,
            format: format.clone(),
            direction: Direction::combine(request.direction_listen, request.direction_speak),
            data: plan.data.clone(),
            variables: plan.variables.clone(),
        };
        let channel = self
            .switch
            .create_external_media(&plan.asterisk_id, &channel_request)
            .await
            .map_err(|e| ExternalMediaError::switch("create external media", e))?;
        debug!(external_media_id = %id, channel_id = %channel.id, "Created external media channel");

        let local_address = reported_local_address(&channel)?;

        let now = Utc::now();
        let media = self
            .store
            .create(ExternalMedia {
                id,
                asterisk_id: plan.asterisk_id.clone(),
                channel_id: channel.id.clone(),
                bridge_id: Some(plan.bridge_id.clone()),
                snoop_channel_id: plan.snoop_channel_id.clone(),
                reference_type: request.reference_type,
                reference_id: request.reference_id,
                local_ip: String::new(),
                local_port: 0,
                external_host: request.external_host.clone(),
                encapsulation,
                transport,
                connection_role,
                format,
                direction_listen: request.direction_listen,
                direction_speak: request.direction_speak,
                status: Status::Running,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let Some((ip, port)) = local_address else {
            // AudioSocket channels dial out and never report a bound address
            debug!(external_media_id = %id, "Switch reported no local address");
            return Ok(media);
        };

        match self.store.set_local_address(id, &ip, port).await {
            Ok(updated) => {
                info!(
                    external_media_id = %id,
                    local_ip = %ip,
                    local_port = port,
                    "External media started"
                );
                Ok(updated)
            }
            Err(e) => {
                error!(external_media_id = %id, "Could not record the local address: {}", e);
                if let Err(e) = self.store.delete(id).await {
                    warn!(external_media_id = %id, "Could not drop the partial record: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Hang up the session's channel and delete the record. Returns the
    /// last snapshot of the record.
    ///
    /// A session whose hang-up failed stays `Terminating` and the next
    /// `stop` retries it. Concurrent stops of one session hang up once.
    pub async fn stop(&self, id: Uuid) -> Result<ExternalMedia> {
        let Some(_guard) = StopGuard::acquire(&self.stopping, id) else {
            return Err(ExternalMediaError::invalid_state(format!(
                "external media {} is already being stopped",
                id
            )));
        };

        let media = self.store.get(id).await?;
        info!(
            external_media_id = %id,
            channel_id = %media.channel_id,
            status = %media.status,
            "Stopping external media"
        );

        if media.status == Status::Running {
            self.store.begin_termination(id).await?;
        }

        match self.switch.hangup_channel(&media.asterisk_id, &media.channel_id).await {
            Ok(()) => {}
            Err(crate::error::SwitchError::NotFound { .. }) => {
                debug!(external_media_id = %id, "Channel was already gone");
            }
            Err(e) => {
                error!(external_media_id = %id, "Could not hang up external media channel: {}", e);
                return Err(ExternalMediaError::switch("hangup channel", e));
            }
        }

        self.release_auxiliary(&media).await;

        self.store.set_status(id, Status::Terminated).await?;
        let res = self.store.delete(id).await?;
        info!(external_media_id = %id, "External media stopped");
        Ok(res)
    }

    pub async fn get(&self, id: Uuid) -> Result<ExternalMedia> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<ExternalMedia>> {
        self.store.list(filter).await
    }

    /// Route a channel that just entered the switch application into its
    /// bridge. Returns `false` for channels this component did not create.
    pub async fn handle_channel_entered(
        &self,
        channel: &SwitchChannel,
        data: &str,
    ) -> Result<bool> {
        let bridge_id = match ChannelData::parse(data) {
            ChannelData::RawId(raw) => {
                let Ok(id) = raw.parse::<Uuid>() else {
                    return Ok(false);
                };
                let media = match self.store.get(id).await {
                    Ok(media) => media,
                    Err(e) if e.is_not_found() => return Ok(false),
                    Err(e) => return Err(e),
                };
                if media.channel_id != channel.id {
                    warn!(
                        external_media_id = %id,
                        channel_id = %channel.id,
                        "Channel carries an external media id it does not belong to"
                    );
                    return Ok(false);
                }
                match media.bridge_id {
                    Some(bridge_id) => bridge_id,
                    None => return Ok(false),
                }
            }
            kv => match kv.get(DATA_CONTEXT) {
                Some(CONTEXT_EXTERNAL_MEDIA) | Some(CONTEXT_EXTERNAL_SNOOP) => {
                    match kv.get(DATA_BRIDGE_ID) {
                        Some(bridge_id) if !bridge_id.is_empty() => bridge_id.to_string(),
                        _ => {
                            return Err(ExternalMediaError::invalid_argument(format!(
                                "channel {} has no bridge in its data",
                                channel.id
                            )))
                        }
                    }
                }
                _ => return Ok(false),
            },
        };

        debug!(channel_id = %channel.id, bridge_id = %bridge_id, "Joining channel into bridge");
        if let Err(e) = self
            .switch
            .add_channel_to_bridge(&channel.asterisk_id, &bridge_id, &channel.id)
            .await
        {
            error!(
                channel_id = %channel.id,
                bridge_id = %bridge_id,
                "Could not join the bridge: {}",
                e
            );
            if let Err(e) = self.switch.hangup_channel(&channel.asterisk_id, &channel.id).await {
                warn!(channel_id = %channel.id, "Could not hang up the stray channel: {}", e);
            }
            return Err(ExternalMediaError::switch("add channel to bridge", e));
        }

        Ok(true)
    }

    /// Best-effort cleanup of the snoop channel and auxiliary bridge owned
    /// by a no-insert session
    async fn release_auxiliary(&self, media: &ExternalMedia) {
        let Some(snoop_id) = media.snoop_channel_id.as_deref() else {
            return;
        };

        if let Err(e) = self.switch.hangup_channel(&media.asterisk_id, snoop_id).await {
            warn!(
                external_media_id = %media.id,
                "Could not hang up snoop channel {}: {}",
                snoop_id,
                e
            );
        }
        if let Some(bridge_id) = media.bridge_id.as_deref() {
            if let Err(e) = self.switch.destroy_bridge(&media.asterisk_id, bridge_id).await {
                warn!(
                    external_media_id = %media.id,
                    "Could not destroy auxiliary bridge {}: {}",
                    bridge_id,
                    e
                );
            }
        }
    }
}

/// Local address the switch bound, read from the created channel's
/// variables. `None` when the switch did not report one.
fn reported_local_address(channel: &SwitchChannel) -> Result<Option<(String, u16)>> {
    let ip = channel.channel_vars.get(LOCAL_ADDRESS_VAR);
    let port = channel.channel_vars.get(LOCAL_PORT_VAR);

    match (ip, port) {
        (None, None) => Ok(None),
        (Some(ip), Some(port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                ExternalMediaError::invalid_argument(format!(
                    "channel {} reported an invalid local port: {}",
                    channel.id, port
                ))
            })?;
            Ok(Some((ip.trim().to_string(), port)))
        }
        _ => Err(ExternalMediaError::invalid_argument(format!(
            "channel {} reported an incomplete local address",
            channel.id
        ))),
    }
}
