//! Bridge configuration.

use serde::{Deserialize, Serialize};

/// Listening configuration for the debug transport.
///
/// Port 0 asks the transport for an ephemeral port; the port actually bound
/// is reported through [`crate::InspectorIo::port`] once the bridge starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    /// Host the transport binds to.
    pub host: String,
    /// Port the transport binds to.
    pub port: u16,
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9229,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_conventional_endpoint() {
        let options = DebugOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 9229);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let options: DebugOptions = serde_json::from_str(r#"{"port": 0}"#).unwrap();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 0);
    }
}
