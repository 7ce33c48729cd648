//! External media session record and the value types around it

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExternalMediaError;

/// Codec handed to the switch when the caller leaves the format empty
pub const DEFAULT_FORMAT: &str = "ulaw";

/// What an external media attachment is tapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Call,
    Conference,
}

/// Wire format used between the switch and the external consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encapsulation {
    Rtp,
    AudioSocket,
    /// Raw signed-linear PCM
    Sln,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

/// Which side opens the media connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    Client,
    Server,
}

/// Media direction, as understood by the switch for snoop and external
/// media channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    None,
    In,
    Out,
    Both,
}

/// Lifecycle of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Terminating,
    Terminated,
}

macro_rules! string_enum {
    ($ty:ident, $err:expr, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ExternalMediaError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err($err(other)),
                }
            }
        }
    };
}

string_enum!(ReferenceType,
    |s: &str| ExternalMediaError::UnsupportedReferenceType(s.to_string()), {
    Call => "call",
    Conference => "conference",
});

string_enum!(Encapsulation,
    |s: &str| ExternalMediaError::UnsupportedEncapsulation(s.to_string()), {
    Rtp => "rtp",
    AudioSocket => "audiosocket",
    Sln => "sln",
});

string_enum!(Transport,
    |s: &str| ExternalMediaError::invalid_argument(format!("unknown transport: {}", s)), {
    Udp => "udp",
    Tcp => "tcp",
});

string_enum!(ConnectionRole,
    |s: &str| ExternalMediaError::invalid_argument(format!("unknown connection role: {}", s)), {
    Client => "client",
    Server => "server",
});

string_enum!(Direction,
    |s: &str| ExternalMediaError::invalid_argument(format!("unknown direction: {}", s)), {
    None => "none",
    In => "in",
    Out => "out",
    Both => "both",
});

string_enum!(Status,
    |s: &str| ExternalMediaError::invalid_argument(format!("unknown status: {}", s)), {
    Running => "running",
    Terminating => "terminating",
    Terminated => "terminated",
});

impl Direction {
    /// Collapse a listen/speak pair into the single direction the switch
    /// expects on the external media channel itself
    pub fn combine(listen: Direction, speak: Direction) -> Direction {
        match (listen, speak) {
            (Direction::None, other) | (other, Direction::None) => other,
            (a, b) if a == b => a,
            _ => Direction::Both,
        }
    }
}

impl Status {
    /// Running -> Terminating -> Terminated, skipping ahead allowed,
    /// never backwards and never in place
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Running, Status::Terminating)
                | (Status::Running, Status::Terminated)
                | (Status::Terminating, Status::Terminated)
        )
    }
}

/// One external media attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMedia {
    /// Doubles as the correlation key on the switch-originated socket
    pub id: Uuid,

    /// Switch node owning the channel
    pub asterisk_id: String,
    pub channel_id: String,
    pub bridge_id: Option<String>,
    /// Set only when the session owns an auxiliary bridge and snoop
    pub snoop_channel_id: Option<String>,

    pub reference_type: ReferenceType,
    pub reference_id: Uuid,

    /// Address the switch bound for this media stream. Empty until the
    /// switch reports it, then never rewritten.
    pub local_ip: String,
    pub local_port: u16,

    pub external_host: String,
    pub encapsulation: Encapsulation,
    pub transport: Transport,
    pub connection_role: ConnectionRole,
    pub format: String,
    pub direction_listen: Direction,
    pub direction_speak: Direction,

    pub status: Status,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalMedia {
    pub fn has_local_address(&self) -> bool {
        !self.local_ip.is_empty() || self.local_port != 0
    }

    /// `ip:port` the switch is expecting media on, once known
    pub fn local_endpoint(&self) -> Option<String> {
        if self.has_local_address() {
            Some(format!("{}:{}", self.local_ip, self.local_port))
        } else {
            None
        }
    }
}

/// Parameters of a `start` call. Optional fields are defaulted by the
/// establisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Generated when absent
    pub id: Option<Uuid>,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    /// Tap through a snoop channel so returned audio never reaches the call
    pub no_insert: bool,
    pub external_host: String,
    pub encapsulation: Option<Encapsulation>,
    pub transport: Option<Transport>,
    pub connection_role: Option<ConnectionRole>,
    pub format: Option<String>,
    pub direction_listen: Direction,
    pub direction_speak: Direction,
}

impl StartRequest {
    pub fn new(
        reference_type: ReferenceType,
        reference_id: Uuid,
        external_host: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            reference_type,
            reference_id,
            no_insert: false,
            external_host: external_host.into(),
            encapsulation: None,
            transport: None,
            connection_role: None,
            format: None,
            direction_listen: Direction::Both,
            direction_speak: Direction::Both,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_no_insert(mut self, no_insert: bool) -> Self {
        self.no_insert = no_insert;
        self
    }

    pub fn with_encapsulation(mut self, encapsulation: Encapsulation) -> Self {
        self.encapsulation = Some(encapsulation);
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_connection_role(mut self, role: ConnectionRole) -> Self {
        self.connection_role = Some(role);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_directions(mut self, listen: Direction, speak: Direction) -> Self {
        self.direction_listen = listen;
        self.direction_speak = speak;
        self
    }
}

/// Filter for `list`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<Uuid>,
    pub status: Option<Status>,
}

impl ListFilter {
    pub fn matches(&self, media: &ExternalMedia) -> bool {
        self.reference_type.map_or(true, |t| t == media.reference_type)
            && self.reference_id.map_or(true, |id| id == media.reference_id)
            && self.status.map_or(true, |s| s == media.status)
    }
}
