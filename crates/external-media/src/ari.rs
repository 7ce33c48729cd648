//! [`SwitchClient`] over the Asterisk REST Interface

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace};

use crate::error::{SwitchError, SwitchResult};
use crate::switch::{
    ExternalMediaChannelRequest, SnoopRequest, SwitchBridge, SwitchChannel, SwitchClient,
};

/// Stasis application new channels are handed to
pub const DEFAULT_STASIS_APP: &str = "tapline";

/// One switch node reachable over ARI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AriNodeConfig {
    /// Node id as it appears on channels (usually the node's MAC address)
    pub id: String,
    /// Base URL, e.g. `http://10.164.0.20:8088`
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct AriChannel {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    channelvars: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct AriBridge {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bridge_type: String,
    #[serde(default)]
    channels: Vec<String>,
}

impl AriChannel {
    fn into_switch_channel(self, asterisk_id: &str) -> SwitchChannel {
        SwitchChannel {
            id: self.id,
            asterisk_id: asterisk_id.to_string(),
            name: self.name,
            state: self.state,
            channel_vars: self.channelvars.unwrap_or_default(),
        }
    }
}

impl From<AriBridge> for SwitchBridge {
    fn from(b: AriBridge) -> Self {
        SwitchBridge {
            id: b.id,
            name: b.name,
            bridge_type: b.bridge_type,
            channels: b.channels,
        }
    }
}

/// ARI client addressing several switch nodes by id
#[derive(Debug, Clone)]
pub struct AriClient {
    http: reqwest::Client,
    app: String,
    nodes: HashMap<String, AriNodeConfig>,
}

impl AriClient {
    pub fn new(app: impl Into<String>, nodes: Vec<AriNodeConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            app: app.into(),
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    fn node(&self, asterisk_id: &str) -> SwitchResult<&AriNodeConfig> {
        self.nodes
            .get(asterisk_id)
            .ok_or_else(|| SwitchError::UnknownNode(asterisk_id.to_string()))
    }

    /// Issue a request and return the response body, empty for 204
    async fn send(
        &self,
        asterisk_id: &str,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> SwitchResult<String> {
        let node = self.node(asterisk_id)?;
        let url = format!("{}/ari{}", node.url.trim_end_matches('/'), path);
        trace!(asterisk_id, %method, %url, "Sending ARI request");

        let mut req = self
            .http
            .request(method, &url)
            .basic_auth(&node.username, Some(&node.password))
            .query(query);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        match status {
            s if s.is_success() => Ok(text),
            StatusCode::NOT_FOUND => Err(SwitchError::NotFound { resource: path.to_string() }),
            s => Err(SwitchError::Status {
                code: s.as_u16(),
                body: text,
            }),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> SwitchResult<T> {
        serde_json::from_str(body).map_err(|e| SwitchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SwitchClient for AriClient {
    async fn create_external_media(
        &self,
        asterisk_id: &str,
        request: &ExternalMediaChannelRequest,
    ) -> SwitchResult<SwitchChannel> {
        let query = [
            ("app", self.app.clone()),
            ("channelId", request.channel_id.clone()),
            ("external_host", request.external_host.clone()),
            ("encapsulation", request.encapsulation.to_string()),
            ("transport", request.transport.to_string()),
            ("connection_type", request.connection_role.to_string()),
            ("format", request.format.clone()),
            ("direction", request.direction.to_string()),
            ("data", request.data.to_string()),
        ];
        let body = json!({ "variables": request.variables });

        let res = self
            .send(asterisk_id, Method::POST, "/channels/externalMedia", &query, Some(body))
            .await?;
        let channel: AriChannel = Self::decode(&res)?;
        debug!(asterisk_id, channel_id = %channel.id, "Created external media channel");
        Ok(channel.into_switch_channel(asterisk_id))
    }

    async fn create_bridge(
        &self,
        asterisk_id: &str,
        bridge_id: &str,
        name: &str,
    ) -> SwitchResult<SwitchBridge> {
        let query = [
            ("type", "mixing".to_string()),
            ("bridgeId", bridge_id.to_string()),
            ("name", name.to_string()),
        ];
        let res = self.send(asterisk_id, Method::POST, "/bridges", &query, None).await?;
        let bridge: AriBridge = Self::decode(&res)?;
        Ok(bridge.into())
    }

    async fn create_snoop(
        &self,
        asterisk_id: &str,
        request: &SnoopRequest,
    ) -> SwitchResult<SwitchChannel> {
        let path = format!("/channels/{}/snoop", request.channel_id);
        let query = [
            ("app", self.app.clone()),
            ("snoopId", request.snoop_id.clone()),
            ("spy", request.spy.to_string()),
            ("whisper", request.whisper.to_string()),
            ("appArgs", request.app_args.to_string()),
        ];
        let res = self.send(asterisk_id, Method::POST, &path, &query, None).await?;
        let channel: AriChannel = Self::decode(&res)?;
        Ok(channel.into_switch_channel(asterisk_id))
    }

    async fn add_channel_to_bridge(
        &self,
        asterisk_id: &str,
        bridge_id: &str,
        channel_id: &str,
    ) -> SwitchResult<()> {
        let path = format!("/bridges/{}/addChannel", bridge_id);
        let query = [("channel", channel_id.to_string())];
        self.send(asterisk_id, Method::POST, &path, &query, None).await?;
        Ok(())
    }

    async fn hangup_channel(&self, asterisk_id: &str, channel_id: &str) -> SwitchResult<()> {
        let path = format!("/channels/{}", channel_id);
        let query = [("reason", "normal".to_string())];
        self.send(asterisk_id, Method::DELETE, &path, &query, None).await?;
        Ok(())
    }

    async fn destroy_bridge(&self, asterisk_id: &str, bridge_id: &str) -> SwitchResult<()> {
        let path = format!("/bridges/{}", bridge_id);
        self.send(asterisk_id, Method::DELETE, &path, &[], None).await?;
        Ok(())
    }
}
