//! AudioSocket stream bridge
//!
//! Pairs a media consumer's connection with the AudioSocket connection the
//! switch dials in for the same session, then relays audio both ways
//! byte for byte.
//!
//! The consumer side is registered first with
//! [`StreamBridge::accept_client`]. When the switch connects, the
//! correlator reads its identity frame, finds the session in the
//! [`StreamRegistry`] and starts the switch to client loop.

pub mod bridge;
pub mod convert;
pub mod error;
pub mod frame;
pub mod registry;
pub mod socket;

pub use bridge::{accept_with_retry, StreamBridge, ACCEPT_RETRY_DELAY};
pub use convert::{convert_from_client, convert_from_switch};
pub use error::{Result, StreamError};
pub use frame::{read_frame, AudioSocketFrame};
pub use registry::{RegistryStats, StreamRegistry, StreamSession};
pub use socket::{
    split_websocket, ClientMessage, ClientReader, ClientWriter, StreamWriter, SwitchWriter,
    WsClientReader, WsClientWriter,
};
