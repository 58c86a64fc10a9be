use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Runtime binary used to launch target scripts.
    pub runtime: String,
    /// Host the inspector is asked to listen on (port is always ephemeral).
    pub host: String,
    /// How long to wait for the inspector endpoint and the entry pause.
    pub launch_timeout: Duration,
    /// How long to wait for any single CDP command reply.
    pub command_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            runtime: "node".to_string(),
            host: "127.0.0.1".to_string(),
            launch_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let runtime = std::env::var("NODE_BINARY").unwrap_or(defaults.runtime);
        let host = std::env::var("INSPECTOR_HOST").unwrap_or(defaults.host);

        let launch_timeout = std::env::var("INSPECTOR_LAUNCH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.launch_timeout);

        let command_timeout = std::env::var("INSPECTOR_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.command_timeout);

        Self {
            runtime,
            host,
            launch_timeout,
            command_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.runtime, "node");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.launch_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_env_defaults() {
        // Only INSPECTOR_HOST here; the other env tests own the other vars.
        std::env::remove_var("INSPECTOR_HOST");

        let config = BridgeConfig::from_env();
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_from_env_custom() {
        std::env::set_var("NODE_BINARY", "/opt/node/bin/node");
        std::env::set_var("INSPECTOR_LAUNCH_TIMEOUT_MS", "2500");

        let config = BridgeConfig::from_env();
        assert_eq!(config.runtime, "/opt/node/bin/node");
        assert_eq!(config.launch_timeout, Duration::from_millis(2500));

        std::env::remove_var("NODE_BINARY");
        std::env::remove_var("INSPECTOR_LAUNCH_TIMEOUT_MS");
    }

    #[test]
    fn test_from_env_invalid_timeout_falls_back() {
        std::env::set_var("INSPECTOR_COMMAND_TIMEOUT_MS", "not-a-number");

        let config = BridgeConfig::from_env();
        assert_eq!(config.command_timeout, Duration::from_secs(30));

        std::env::remove_var("INSPECTOR_COMMAND_TIMEOUT_MS");
    }
}
