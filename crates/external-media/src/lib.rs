//! External media orchestration
//!
//! Splices a secondary media stream into a live call or conference on an
//! ARI-controlled switch without disturbing the call itself.
//!
//! - `types`: the [`ExternalMedia`] session record and request/filter types
//! - `topology`: decides where the new channel attaches (direct bridge
//!   attach or auxiliary bridge + snoop)
//! - `handler`: [`ExternalMediaHandler`], the start/stop/get/list surface
//! - `store`: persistence seam with an in-memory implementation
//! - `switch`: the control-plane seam, `ari`: its ARI implementation
//! - `reference`: read access to call/conference/channel/bridge records

pub mod ari;
pub mod error;
pub mod handler;
pub mod reference;
pub mod store;
pub mod switch;
pub mod topology;
pub mod types;

pub use ari::{AriClient, AriNodeConfig, DEFAULT_STASIS_APP};
pub use error::{ExternalMediaError, Result, SwitchError, SwitchResult};
pub use handler::ExternalMediaHandler;
pub use reference::{
    BridgeInfo, CallInfo, ChannelInfo, ConferenceInfo, MemoryDirectory, ReferenceDirectory,
};
pub use store::{ExternalMediaStore, MemoryStore};
pub use switch::{
    ChannelData, ExternalMediaChannelRequest, SnoopRequest, SwitchBridge, SwitchChannel,
    SwitchClient,
};
pub use topology::{TopologyPlan, TopologyPlanner};
pub use types::{
    ConnectionRole, Direction, Encapsulation, ExternalMedia, ListFilter, ReferenceType,
    StartRequest, Status, Transport, DEFAULT_FORMAT,
};
