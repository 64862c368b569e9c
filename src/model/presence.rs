//! Presence and connection types exchanged with the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ErrorInformation, Resolution};
use crate::error::{Error, Result};

/// Role of a client present on a trackable's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    Publisher,
    Subscriber,
}

/// Payload each client attaches to its presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceData {
    #[serde(rename = "type")]
    pub client_type: ClientType,

    /// For subscribers: the resolution they would like to receive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl PresenceData {
    pub fn publisher(resolution: Option<Resolution>) -> Self {
        Self {
            client_type: ClientType::Publisher,
            resolution,
        }
    }

    pub fn subscriber(resolution: Option<Resolution>) -> Self {
        Self {
            client_type: ClientType::Subscriber,
            resolution,
        }
    }

    /// Wire form handed to the transport.
    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain data with derived impls cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| Error::InvalidPresenceData(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Enter,
    Update,
    Leave,
}

/// A presence event received on a trackable's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub action: PresenceAction,
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
    /// Raw presence payload, parsed lazily with [`PresenceMessage::presence_data`].
    pub data: serde_json::Value,
}

impl PresenceMessage {
    pub fn presence_data(&self) -> Result<PresenceData> {
        PresenceData::from_json(&self.data)
    }
}

/// Connection or channel state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Online,
    Offline,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateChange {
    pub state: ConnectionState,
    pub error: Option<ErrorInformation>,
}
