use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Configuration of a managed device, used both for the desired `spec` and
/// the reported `status`. Keys outside the known set are carried through
/// untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_version: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub enabled: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_interval: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_format: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A known field holding a value of the wrong type reads as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl DeviceConfig {
    pub fn with_app_version(version: impl Into<String>) -> Self {
        Self {
            app_version: Some(version.into()),
            ..Self::default()
        }
    }
}

/// Desired configuration plus the last configuration the device reported.
/// Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePair {
    #[serde(default)]
    pub spec: DeviceConfig,
    #[serde(default)]
    pub status: Option<DeviceConfig>,
}

impl DevicePair {
    pub fn new(spec: DeviceConfig, status: Option<DeviceConfig>) -> Self {
        Self { spec, status }
    }

    pub fn desired_version(&self) -> Option<&str> {
        self.spec.app_version.as_deref()
    }

    pub fn actual_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.app_version.as_deref())
    }

    pub fn sync_status(&self) -> SyncStatus {
        match &self.status {
            None => SyncStatus::Unknown,
            Some(_) => match (self.actual_version(), self.desired_version()) {
                (Some(actual), Some(desired)) if actual == desired => SyncStatus::Synced,
                _ => SyncStatus::Pending,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The device has not reported a status.
    Unknown,
    /// Reported application version equals the desired one.
    Synced,
    /// Reported, but not (yet) at the desired version.
    Pending,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Unknown => "unknown",
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
