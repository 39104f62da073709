use serde::{Deserialize, Serialize};

/// Document served by the relay's config endpoint and read by the console at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleBootstrap {
    pub colonies: ColoniesEndpoint,
    pub colony_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colony_prv_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_prv_key: Option<String>,
    /// Relay WebSocket URL, always on the same host and port the console used
    /// to fetch this document.
    pub reconciler_ws_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoniesEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn serializes_with_console_field_names() {
        let bootstrap = ConsoleBootstrap {
            colonies: ColoniesEndpoint {
                host: "colonies.local".into(),
                port: 50080,
                tls: false,
            },
            colony_name: "dev".into(),
            colony_prv_key: None,
            executor_prv_key: Some("abc".into()),
            reconciler_ws_url: "ws://console.local:8080/reconciler".into(),
        };
        assert_eq!(
            serde_json::to_value(&bootstrap).unwrap(),
            json!({
                "colonies": {"host": "colonies.local", "port": 50080, "tls": false},
                "colonyName": "dev",
                "executorPrvKey": "abc",
                "reconcilerWsUrl": "ws://console.local:8080/reconciler"
            })
        );
    }
}
