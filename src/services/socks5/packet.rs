//! Session-level packet format carried inside `JobData` payloads
//!
//! Each SOCKS tunnel frame is a small JSON object naming the session and
//! carrying a hex-encoded chunk of stream bytes. A packet whose `data` field
//! is JSON `null` is the close sentinel for that session; an empty string is
//! an empty (but live) chunk and must stay distinct from `null`.

use crate::error::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One frame of a multiplexed SOCKS session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocksPacket {
    /// Session this frame belongs to
    pub session_id: String,
    /// Hex-encoded stream bytes, or `None` to close the session
    pub data: Option<String>,
}

impl SocksPacket {
    /// A data frame carrying stream bytes
    pub fn data(session_id: impl Into<String>, payload: &[u8]) -> Self {
        SocksPacket {
            session_id: session_id.into(),
            data: Some(hex::encode(payload)),
        }
    }

    /// The close sentinel for a session
    pub fn close(session_id: impl Into<String>) -> Self {
        SocksPacket {
            session_id: session_id.into(),
            data: None,
        }
    }

    /// Whether this frame closes the session
    pub fn is_close(&self) -> bool {
        self.data.is_none()
    }

    /// Decode the carried bytes, if any
    pub fn payload(&self) -> Result<Option<Bytes>, ProtocolError> {
        match &self.data {
            Some(hexed) => {
                let bytes = hex::decode(hexed)
                    .map_err(|e| ProtocolError::MalformedEnvelope(format!("packet hex: {e}")))?;
                Ok(Some(Bytes::from(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Serialize to the JSON string carried in `JobData`
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("packet serialize: {e}")))
    }

    /// Parse from the JSON string carried in `JobData`
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("packet json: {e}")))
    }
}
