use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::{DeviceConfig, DevicePair};

/// A device object as listed by the platform's REST API. Only the fields the
/// console needs are typed; the rest of `metadata` is kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub metadata: BlueprintMetadata,
    #[serde(default)]
    pub spec: DeviceConfig,
    #[serde(default)]
    pub status: Option<DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintMetadata {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Blueprint {
    pub fn device_id(&self) -> &str {
        &self.metadata.name
    }

    /// Blueprints without a `kind` are assumed to already be filtered.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref().map_or(true, |own| own == kind)
    }

    pub fn pair(&self) -> DevicePair {
        DevicePair::new(self.spec.clone(), self.status.clone())
    }
}
