use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::device::{DeviceConfig, DevicePair};

/// Messages the reconciliation engine pushes to the console through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayedMessage {
    /// Full table of known devices, sent once per logical connection.
    Init { devices: BTreeMap<String, DevicePair> },
    /// Current desired/actual pair of a single device.
    Update {
        device: String,
        #[serde(default)]
        spec: DeviceConfig,
        #[serde(default)]
        status: Option<DeviceConfig>,
    },
}

impl RelayedMessage {
    /// Decodes a text frame. Undecodable JSON, a missing `type`, an unknown
    /// `type` and a known `type` with the wrong shape are all reported as
    /// [`MalformedMessage`] so callers can log and move on.
    pub fn parse(text: &str) -> Result<Self, MalformedMessage> {
        let value: Value = serde_json::from_str(text).map_err(MalformedMessage::Undecodable)?;
        match MessageKind::of_value(&value) {
            MessageKind::Init | MessageKind::Update => {}
            MessageKind::Other(kind) => return Err(MalformedMessage::UnknownType(kind)),
            MessageKind::Untyped => return Err(MalformedMessage::MissingType),
        }
        serde_json::from_value(value).map_err(MalformedMessage::InvalidShape)
    }
}

/// The `type` discriminator of a frame, read without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Init,
    Update,
    Other(String),
    /// Not a JSON object, or no string `type` field.
    Untyped,
}

impl MessageKind {
    pub fn peek(text: &str) -> Self {
        #[derive(Deserialize)]
        struct Discriminator {
            #[serde(rename = "type")]
            kind: Option<String>,
        }

        match serde_json::from_str::<Discriminator>(text) {
            Ok(Discriminator { kind: Some(kind) }) => Self::from_tag(kind),
            _ => MessageKind::Untyped,
        }
    }

    fn of_value(value: &Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some(kind) => Self::from_tag(kind.to_string()),
            None => MessageKind::Untyped,
        }
    }

    fn from_tag(tag: String) -> Self {
        match tag.as_str() {
            "init" => MessageKind::Init,
            "update" => MessageKind::Update,
            _ => MessageKind::Other(tag),
        }
    }
}

#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("frame is not valid JSON: {0}")]
    Undecodable(#[source] serde_json::Error),
    #[error("frame has no `type` field")]
    MissingType,
    #[error("unrecognized message type `{0}`")]
    UnknownType(String),
    #[error("message does not match its declared type: {0}")]
    InvalidShape(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SyncStatus;

    #[test_timeout::timeout]
    fn parses_init_with_multiple_devices() {
        let text = r#"{"type":"init","devices":{
            "d1":{"spec":{"appVersion":"2.0"},"status":{"appVersion":"1.0"}},
            "d2":{"spec":{"appVersion":"1.0","enabled":true},"status":null}
        }}"#;
        let RelayedMessage::Init { devices } = RelayedMessage::parse(text).unwrap() else {
            panic!("expected init");
        };
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["d1"].sync_status(), SyncStatus::Pending);
        assert_eq!(devices["d2"].spec.enabled, Some(true));
        assert!(devices["d2"].status.is_none());
    }

    #[test_timeout::timeout]
    fn one_mistyped_field_does_not_drop_the_init() {
        let text = r#"{"type":"init","devices":{
            "d1":{"spec":{"appVersion":"2.0","logInterval":"5s"},"status":{"appVersion":"2.0"}},
            "d2":{"spec":{"appVersion":"1.0"},"status":null}
        }}"#;
        let RelayedMessage::Init { devices } = RelayedMessage::parse(text).unwrap() else {
            panic!("expected init");
        };
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["d1"].spec.log_interval, None);
        assert_eq!(devices["d1"].sync_status(), SyncStatus::Synced);
    }

    #[test_timeout::timeout]
    fn parses_update_without_status() {
        let text = r#"{"type":"update","device":"d1","spec":{"appVersion":"2.0"}}"#;
        match RelayedMessage::parse(text).unwrap() {
            RelayedMessage::Update {
                device,
                spec,
                status,
            } => {
                assert_eq!(device, "d1");
                assert_eq!(spec.app_version.as_deref(), Some("2.0"));
                assert!(status.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn classifies_malformed_frames() {
        assert!(matches!(
            RelayedMessage::parse("{not json"),
            Err(MalformedMessage::Undecodable(_))
        ));
        assert!(matches!(
            RelayedMessage::parse(r#"{"devices":{}}"#),
            Err(MalformedMessage::MissingType)
        ));
        assert!(matches!(
            RelayedMessage::parse(r#"{"type":"heartbeat"}"#),
            Err(MalformedMessage::UnknownType(kind)) if kind == "heartbeat"
        ));
        assert!(matches!(
            RelayedMessage::parse(r#"{"type":"update","spec":{}}"#),
            Err(MalformedMessage::InvalidShape(_))
        ));
    }

    #[test_timeout::timeout]
    fn peek_reads_only_the_discriminator() {
        assert_eq!(MessageKind::peek(r#"{"type":"init","devices":{}}"#), MessageKind::Init);
        assert_eq!(
            MessageKind::peek(r#"{"type":"resync","x":[1,2]}"#),
            MessageKind::Other("resync".into())
        );
        assert_eq!(MessageKind::peek("[1,2,3]"), MessageKind::Untyped);
        assert_eq!(MessageKind::peek(r#"{"type":7}"#), MessageKind::Untyped);
    }
}
