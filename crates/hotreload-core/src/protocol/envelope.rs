//! [`Envelope`] codec.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::message_types as mt;
use super::payloads::{
    CapabilityNegotiationPayload, ClientRegisterPayload, ConnectionClosePayload,
    ConnectionStatusPayload, ErrorPayload, FileChangedPayload, PingPayload, Platform,
    PongPayload, StateSyncPayload,
};
use super::PROTOCOL_VERSION;
use crate::errors::ProtocolError;
use crate::ids::MessageId;

/// Typed body of an envelope, selected by the wire `type` tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// `fileChanged`
    FileChanged(FileChangedPayload),
    /// `stateSync`
    StateSync(StateSyncPayload),
    /// `clientRegister`
    ClientRegister(ClientRegisterPayload),
    /// `ping`
    Ping(PingPayload),
    /// `pong`
    Pong(PongPayload),
    /// `error`
    Error(ErrorPayload),
    /// `connectionStatus`
    ConnectionStatus(ConnectionStatusPayload),
    /// `capabilityNegotiation`
    CapabilityNegotiation(CapabilityNegotiationPayload),
    /// `connectionClose`
    ConnectionClose(ConnectionClosePayload),
    /// Any type this crate does not model; forwarded as-is.
    Other {
        /// The wire `type` tag.
        message_type: String,
        /// The raw payload.
        payload: Value,
    },
}

impl Payload {
    /// Wire `type` tag of this payload.
    pub fn message_type(&self) -> &str {
        match self {
            Self::FileChanged(_) => mt::FILE_CHANGED,
            Self::StateSync(_) => mt::STATE_SYNC,
            Self::ClientRegister(_) => mt::CLIENT_REGISTER,
            Self::Ping(_) => mt::PING,
            Self::Pong(_) => mt::PONG,
            Self::Error(_) => mt::ERROR,
            Self::ConnectionStatus(_) => mt::CONNECTION_STATUS,
            Self::CapabilityNegotiation(_) => mt::CAPABILITY_NEGOTIATION,
            Self::ConnectionClose(_) => mt::CONNECTION_CLOSE,
            Self::Other { message_type, .. } => message_type,
        }
    }

    /// Decode a payload body for the given type tag.
    pub fn decode(message_type: String, payload: Value) -> Result<Self, ProtocolError> {
        // A missing payload is treated as an empty object so that
        // field-less messages (`connectionClose`) need not carry one.
        let payload = if payload.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            payload
        };
        let decoded = match message_type.as_str() {
            mt::FILE_CHANGED => Self::FileChanged(typed(&message_type, payload)?),
            mt::STATE_SYNC => Self::StateSync(typed(&message_type, payload)?),
            mt::CLIENT_REGISTER => Self::ClientRegister(typed(&message_type, payload)?),
            mt::PING => Self::Ping(typed(&message_type, payload)?),
            mt::PONG => Self::Pong(typed(&message_type, payload)?),
            mt::ERROR => Self::Error(typed(&message_type, payload)?),
            mt::CONNECTION_STATUS => Self::ConnectionStatus(typed(&message_type, payload)?),
            mt::CAPABILITY_NEGOTIATION => {
                Self::CapabilityNegotiation(typed(&message_type, payload)?)
            }
            mt::CONNECTION_CLOSE => Self::ConnectionClose(typed(&message_type, payload)?),
            _ => Self::Other {
                message_type,
                payload,
            },
        };
        Ok(decoded)
    }
}

fn typed<T: DeserializeOwned>(message_type: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        message_type: message_type.to_owned(),
        source,
    })
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::FileChanged(p) => p.serialize(serializer),
            Self::StateSync(p) => p.serialize(serializer),
            Self::ClientRegister(p) => p.serialize(serializer),
            Self::Ping(p) => p.serialize(serializer),
            Self::Pong(p) => p.serialize(serializer),
            Self::Error(p) => p.serialize(serializer),
            Self::ConnectionStatus(p) => p.serialize(serializer),
            Self::CapabilityNegotiation(p) => p.serialize(serializer),
            Self::ConnectionClose(p) => p.serialize(serializer),
            Self::Other { payload, .. } => payload.serialize(serializer),
        }
    }
}

/// One protocol frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Unique message id.
    pub message_id: MessageId,
    /// Sending or addressed client, if any.
    pub client_id: Option<String>,
    /// Platform of the sending client, if any.
    pub platform: Option<Platform>,
    /// Protocol version of the sender.
    pub version: String,
    /// Typed body.
    pub payload: Payload,
}

impl Envelope {
    /// Wrap a payload with a fresh id and timestamp.
    pub fn new(payload: Payload) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: MessageId::new(),
            client_id: None,
            platform: None,
            version: PROTOCOL_VERSION.to_owned(),
            payload,
        }
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Wire `type` tag.
    pub fn message_type(&self) -> &str {
        self.payload.message_type()
    }

    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        let wire: WireEnvelope = serde_json::from_str(frame).map_err(ProtocolError::Malformed)?;
        wire.into_envelope()
    }

    /// Parse a JSON frame, rejecting frames longer than `limit` bytes.
    pub fn from_json_limited(frame: &str, limit: usize) -> Result<Self, ProtocolError> {
        if frame.len() > limit {
            return Err(ProtocolError::TooLarge {
                size: frame.len(),
                limit,
            });
        }
        Self::from_json(frame)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelopeRef<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    timestamp: &'a DateTime<Utc>,
    message_id: &'a MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<Platform>,
    version: &'a str,
    payload: &'a Payload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    message_id: MessageId,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    platform: Option<Platform>,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    payload: Value,
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_owned()
}

impl WireEnvelope {
    fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        let payload = Payload::decode(self.message_type, self.payload)?;
        Ok(Envelope {
            timestamp: self.timestamp,
            message_id: self.message_id,
            client_id: self.client_id,
            platform: self.platform,
            version: self.version,
            payload,
        })
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelopeRef {
            message_type: self.message_type(),
            timestamp: &self.timestamp,
            message_id: &self.message_id,
            client_id: self.client_id.as_deref(),
            platform: self.platform,
            version: &self.version,
            payload: &self.payload,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireEnvelope::deserialize(deserializer)?
            .into_envelope()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payloads::{ChangeType, ConnectionStatus, StateOperation};
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn serializes_type_tag_and_camel_case_fields() {
        let env = Envelope::new(Payload::Ping(PingPayload { sequence: 7 }))
            .with_client_id("c-1")
            .with_platform(Platform::Ios);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "ping");
        assert_eq!(v["clientId"], "c-1");
        assert_eq!(v["platform"], "ios");
        assert_eq!(v["version"], PROTOCOL_VERSION);
        assert_eq!(v["payload"], json!({"sequence": 7}));
        assert!(v["messageId"].is_string());
        assert!(v["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn omits_absent_optional_fields() {
        let env = Envelope::new(Payload::ConnectionClose(ConnectionClosePayload::default()));
        let v = serde_json::to_value(&env).unwrap();
        assert!(v.get("clientId").is_none());
        assert!(v.get("platform").is_none());
        assert_eq!(v["payload"], json!({}));
    }

    #[test]
    fn parses_client_register() {
        let frame = json!({
            "type": "clientRegister",
            "timestamp": "2026-03-01T10:00:00Z",
            "messageId": "m-1",
            "version": "1.0.0",
            "payload": {
                "platform": "ios",
                "clientName": "t",
                "capabilities": [],
                "deviceInfo": {"model": "iPhone15,2", "osVersion": "18.0"}
            }
        })
        .to_string();
        let env = Envelope::from_json(&frame).unwrap();
        assert_eq!(env.message_id.as_str(), "m-1");
        assert_matches!(env.payload, Payload::ClientRegister(ref p) if p.client_name == "t");
    }

    #[test]
    fn missing_envelope_metadata_is_filled_in() {
        let env = Envelope::from_json(r#"{"type":"ping","payload":{"sequence":1}}"#).unwrap();
        assert_eq!(env.version, PROTOCOL_VERSION);
        assert!(!env.message_id.is_empty());
    }

    #[test]
    fn connection_close_without_payload() {
        let env = Envelope::from_json(r#"{"type":"connectionClose"}"#).unwrap();
        assert_eq!(env.payload, Payload::ConnectionClose(ConnectionClosePayload::default()));
    }

    #[test]
    fn unknown_type_is_kept_verbatim() {
        let env = Envelope::from_json(r#"{"type":"previewSwitch","payload":{"screen":"Home"}}"#)
            .unwrap();
        assert_eq!(env.message_type(), "previewSwitch");
        assert_matches!(env.payload, Payload::Other { ref payload, .. } if payload["screen"] == "Home");
        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(back["type"], "previewSwitch");
        assert_eq!(back["payload"]["screen"], "Home");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_matches!(Envelope::from_json("not json"), Err(ProtocolError::Malformed(_)));
        assert_matches!(Envelope::from_json(r#"{"payload":{}}"#), Err(ProtocolError::Malformed(_)));
    }

    #[test]
    fn known_type_with_wrong_payload_is_rejected() {
        let err = Envelope::from_json(r#"{"type":"ping","payload":{"sequence":"x"}}"#).unwrap_err();
        assert_matches!(err, ProtocolError::InvalidPayload { ref message_type, .. } if message_type == "ping");
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let err = Envelope::from_json_limited("{}", 1).unwrap_err();
        assert_matches!(err, ProtocolError::TooLarge { size: 2, limit: 1 });
    }

    #[test]
    fn typed_payloads_survive_a_trip_through_json() {
        let payloads = vec![
            Payload::FileChanged(FileChangedPayload::new("a/B.kt", "x".into(), ChangeType::Created)),
            Payload::StateSync(StateSyncPayload {
                state_data: json!({"count": 3}).as_object().cloned().unwrap(),
                file_name: "Counter.swift".into(),
                operation: StateOperation::Preserve,
            }),
            Payload::ConnectionStatus(ConnectionStatusPayload {
                status: ConnectionStatus::Error,
                client_count: 2,
                server_load: Some(0.04),
            }),
        ];
        for payload in payloads {
            let env = Envelope::new(payload);
            let back = Envelope::from_json(&env.to_json().unwrap()).unwrap();
            assert_eq!(back, env);
        }
    }
}
