//! Envelope framing for the control channel
//!
//! Every message crossing the WebSocket is wrapped in an outer JSON envelope
//! `{"uuid": "<correlation id>", "data": "<hex>"}`. The hex decodes to the
//! inner message JSON, optionally zlib-compressed and then optionally
//! encrypted. The correlation id exists for tracing only; replies are never
//! matched to requests by it.

use crate::error::ProtocolError;
use crate::protocol::cipher::{compress, decompress, PayloadCipher};
use crate::protocol::message::{Command, RawFrame, Reply};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A correlation-id + payload pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    /// Caller-generated correlation id, uncorrelated with processing order
    pub correlation_id: Uuid,
    /// The carried command or reply
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wrap a payload under a fresh v4 correlation id
    pub fn new(payload: T) -> Self {
        Envelope {
            correlation_id: Uuid::new_v4(),
            payload,
        }
    }

    /// Wrap a payload under an existing correlation id
    pub fn with_id(correlation_id: Uuid, payload: T) -> Self {
        Envelope {
            correlation_id,
            payload,
        }
    }
}

/// Outer wire shape of an envelope
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    uuid: String,
    data: String,
}

/// Encoder/decoder for envelopes.
///
/// Compression and encryption are agreed via configuration on both ends,
/// not negotiated in-band.
#[derive(Debug)]
pub struct EnvelopeCodec {
    compression: bool,
    cipher: Option<PayloadCipher>,
}

impl EnvelopeCodec {
    /// Create a codec with the given payload protection settings
    pub fn new(compression: bool, cipher: Option<PayloadCipher>) -> Self {
        EnvelopeCodec {
            compression,
            cipher,
        }
    }

    /// A codec with no compression and no encryption
    pub fn plain() -> Self {
        Self::new(false, None)
    }

    /// Encode a command envelope into a wire string
    pub fn encode_command(&self, envelope: &Envelope<Command>) -> Result<String, ProtocolError> {
        self.encode_frame(envelope.correlation_id, envelope.payload.to_frame())
    }

    /// Encode a reply envelope into a wire string
    pub fn encode_reply(&self, envelope: &Envelope<Reply>) -> Result<String, ProtocolError> {
        self.encode_frame(envelope.correlation_id, envelope.payload.to_frame())
    }

    /// Decode a wire string into a command envelope
    pub fn decode_command(&self, wire: &str) -> Result<Envelope<Command>, ProtocolError> {
        let (id, frame) = self.decode_frame(wire)?;
        Ok(Envelope::with_id(id, Command::from_frame(frame)?))
    }

    /// Decode a wire string into a reply envelope
    pub fn decode_reply(&self, wire: &str) -> Result<Envelope<Reply>, ProtocolError> {
        let (id, frame) = self.decode_frame(wire)?;
        Ok(Envelope::with_id(id, Reply::from_frame(frame)?))
    }

    fn encode_frame(&self, id: Uuid, frame: RawFrame) -> Result<String, ProtocolError> {
        let inner = serde_json::to_vec(&frame)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("serialize: {e}")))?;

        // compress before encrypt; decode reverses
        let inner = if self.compression {
            compress(&inner)?
        } else {
            inner
        };
        let inner = match &self.cipher {
            Some(cipher) => cipher.encrypt(&inner)?,
            None => inner,
        };

        let wire = WireEnvelope {
            uuid: id.to_string(),
            data: hex::encode(inner),
        };
        serde_json::to_string(&wire)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("serialize: {e}")))
    }

    fn decode_frame(&self, wire: &str) -> Result<(Uuid, RawFrame), ProtocolError> {
        let outer: WireEnvelope = serde_json::from_str(wire)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("outer json: {e}")))?;
        let id = Uuid::parse_str(&outer.uuid)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("uuid: {e}")))?;
        let payload = hex::decode(&outer.data)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("hex: {e}")))?;

        let payload = match &self.cipher {
            Some(cipher) => cipher.decrypt(&payload)?,
            None => payload,
        };
        let payload = if self.compression {
            decompress(&payload)?
        } else {
            payload
        };

        let frame: RawFrame = serde_json::from_slice(&payload)
            .map_err(|e| ProtocolError::MalformedEnvelope(format!("inner json: {e}")))?;
        Ok((id, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codecs() -> Vec<EnvelopeCodec> {
        let key = [7u8; 32];
        vec![
            EnvelopeCodec::plain(),
            EnvelopeCodec::new(true, None),
            EnvelopeCodec::new(false, Some(PayloadCipher::new(&key))),
            EnvelopeCodec::new(true, Some(PayloadCipher::new(&key))),
        ]
    }

    fn sample_commands() -> Vec<Command> {
        vec![
            Command::Ok,
            Command::Error("oops".to_string()),
            Command::Register {
                client_id: Uuid::new_v4().to_string(),
            },
            Command::CreateJob {
                module_name: "socks5".to_string(),
            },
            Command::StopJob { job_id: 12 },
            Command::JobData {
                job_id: 1,
                data: "cafe".to_string(),
            },
        ]
    }

    fn sample_replies() -> Vec<Reply> {
        vec![
            Reply::Ok,
            Reply::Error("oops".to_string()),
            Reply::Registered {
                client_id: Uuid::new_v4().to_string(),
            },
            Reply::JobCreated {
                job_id: 0,
                module_name: "echo".to_string(),
            },
            Reply::JobStopped { job_id: 12 },
            Reply::JobData {
                job_id: 1,
                data: "cafe".to_string(),
            },
        ]
    }

    #[test]
    fn test_command_roundtrip_all_flag_combinations() {
        for codec in codecs() {
            for cmd in sample_commands() {
                let envelope = Envelope::new(cmd);
                let wire = codec.encode_command(&envelope).unwrap();
                let decoded = codec.decode_command(&wire).unwrap();
                assert_eq!(decoded, envelope);
            }
        }
    }

    #[test]
    fn test_reply_roundtrip_all_flag_combinations() {
        for codec in codecs() {
            for rply in sample_replies() {
                let envelope = Envelope::new(rply);
                let wire = codec.encode_reply(&envelope).unwrap();
                let decoded = codec.decode_reply(&wire).unwrap();
                assert_eq!(decoded, envelope);
            }
        }
    }

    #[test]
    fn test_wire_shape() {
        let codec = EnvelopeCodec::plain();
        let envelope = Envelope::new(Command::Ok);
        let wire = codec.encode_command(&envelope).unwrap();

        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["uuid"], envelope.correlation_id.to_string());
        let inner = hex::decode(value["data"].as_str().unwrap()).unwrap();
        let inner: serde_json::Value = serde_json::from_slice(&inner).unwrap();
        assert_eq!(inner["cmd_id"], 0);
    }

    #[test]
    fn test_malformed_outer_json() {
        let codec = EnvelopeCodec::plain();
        assert!(matches!(
            codec.decode_command("not json"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_malformed_hex() {
        let codec = EnvelopeCodec::plain();
        let wire = format!(r#"{{"uuid":"{}","data":"zz"}}"#, Uuid::new_v4());
        assert!(matches!(
            codec.decode_command(&wire),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_bad_uuid() {
        let codec = EnvelopeCodec::plain();
        let wire = r#"{"uuid":"not-a-uuid","data":"00"}"#;
        assert!(matches!(
            codec.decode_command(wire),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_unknown_tag_surfaces() {
        let codec = EnvelopeCodec::plain();
        let inner = serde_json::json!({ "cmd_id": 2 }).to_string();
        let wire = serde_json::json!({
            "uuid": Uuid::new_v4().to_string(),
            "data": hex::encode(inner.as_bytes()),
        })
        .to_string();
        assert!(matches!(
            codec.decode_command(&wire),
            Err(ProtocolError::UnknownTag(2))
        ));
    }

    #[test]
    fn test_flag_mismatch_fails() {
        // encrypted wire fed to a plain codec must not decode
        let key = [7u8; 32];
        let encrypting = EnvelopeCodec::new(false, Some(PayloadCipher::new(&key)));
        let plain = EnvelopeCodec::plain();

        let wire = encrypting
            .encode_command(&Envelope::new(Command::Ok))
            .unwrap();
        assert!(plain.decode_command(&wire).is_err());
    }
}
