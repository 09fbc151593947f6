//! Client configuration from environment variables.

use std::time::Duration;

use academia_shared::DEFAULT_WS_PATH;

use crate::ws::ReconnectConfig;

/// Runtime configuration of the notification client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `https://campus.example.edu`.
    pub api_url: String,
    /// Socket path appended to the API base URL.
    pub ws_path: String,
    /// Delay between the bulk fetch and the first socket connect.
    pub connect_delay: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            connect_delay: Duration::from_millis(1000),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build the configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ACADEMIA_API_URL`: REST base URL (default: "http://localhost:8080")
    /// - `ACADEMIA_WS_PATH`: socket path (default: "/ws")
    /// - `ACADEMIA_CONNECT_DELAY_MS`: delay before the first connect (default: 1000)
    /// - `ACADEMIA_RECONNECT_MAX_ATTEMPTS`: retry ceiling (default: 3)
    /// - `ACADEMIA_RECONNECT_BASE_DELAY_MS`: first retry delay (default: 2000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_url = lookup("ACADEMIA_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.api_url);

        let ws_path = lookup("ACADEMIA_WS_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| if v.starts_with('/') { v } else { format!("/{v}") })
            .unwrap_or(defaults.ws_path);

        let connect_delay = Duration::from_millis(parse_or(
            &lookup,
            "ACADEMIA_CONNECT_DELAY_MS",
            defaults.connect_delay.as_millis() as u64,
        ));

        let reconnect = ReconnectConfig {
            max_attempts: parse_or(
                &lookup,
                "ACADEMIA_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
            initial_delay_ms: parse_or(
                &lookup,
                "ACADEMIA_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect.initial_delay_ms,
            ),
            ..defaults.reconnect
        };

        Self {
            api_url,
            ws_path,
            connect_delay,
            reconnect,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                crate::log_warn!("{key}={raw:?} is not valid, using {default}");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.connect_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 2000);
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("ACADEMIA_API_URL", "https://campus.example.edu/"),
            ("ACADEMIA_WS_PATH", "socket"),
            ("ACADEMIA_CONNECT_DELAY_MS", "250"),
            ("ACADEMIA_RECONNECT_MAX_ATTEMPTS", "many"),
        ]));
        assert_eq!(config.api_url, "https://campus.example.edu");
        assert_eq!(config.ws_path, "/socket");
        assert_eq!(config.connect_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 3);
    }
}
