//! Configuration loading and validation.
//!
//! Values come from the environment, optionally layered over a TOML file.
//! Environment variables always win over the file so a deployment can keep
//! secrets out of the checked-in config.

use crate::error::{ConfigError, Result};

use serde::Deserialize;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PUBLIC_PROTOCOL: &str = "https";

/// cdnbot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Slack credentials and channel routing.
    pub slack: SlackConfig,

    /// Upload service endpoint.
    pub cdn: CdnConfig,

    /// File proxy listener and its public address.
    pub proxy: ProxyConfig,
}

/// Slack configuration.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-`). Also the bearer credential for private file URLs.
    pub bot_token: String,

    /// App-level token (`xapp-`) for Socket Mode.
    pub app_token: String,

    /// Request signing secret. Only HTTP event delivery needs it; Socket
    /// Mode authenticates with the app token, so nothing reads it today.
    pub signing_secret: Option<String>,

    /// Channel whose file uploads are relayed.
    pub channel_id: String,

    /// User mentioned in error replies so people know whom to ping.
    pub support_user_id: Option<String>,
}

/// Upload service configuration.
#[derive(Debug, Clone)]
pub struct CdnConfig {
    /// Batch upload endpoint.
    pub url: String,

    /// Bearer key for the upload endpoint.
    pub api_key: String,
}

/// File proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    pub bind: String,

    /// Port the proxy listens on.
    pub port: u16,

    /// Externally reachable base URL, without a trailing slash.
    pub public_base_url: String,
}

impl ProxyConfig {
    /// Path component of the public base URL, without a trailing slash.
    ///
    /// Empty when the proxy is published at the host root.
    pub fn path_prefix(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.public_base_url).map_err(|error| {
            ConfigError::Invalid(format!(
                "invalid public base URL '{}': {error}",
                self.public_base_url
            ))
        })?;
        Ok(url.path().trim_end_matches('/').to_string())
    }

    /// Resolve the listen address, accepting bare or bracketed IPv6 hosts.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let raw_bind = self.bind.trim_start_matches('[').trim_end_matches(']');
        let bind_str = if raw_bind.contains(':') {
            format!("[{}]:{}", raw_bind, self.port)
        } else {
            format!("{}:{}", raw_bind, self.port)
        };
        bind_str.parse::<SocketAddr>().map_err(|error| {
            ConfigError::Invalid(format!("invalid proxy bind address '{bind_str}': {error}"))
                .into()
        })
    }
}

/// On-disk TOML layout. Every field is optional so the environment can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    slack: TomlSlackConfig,
    cdn: TomlCdnConfig,
    proxy: TomlProxyConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlSlackConfig {
    bot_token: Option<String>,
    app_token: Option<String>,
    signing_secret: Option<String>,
    channel_id: Option<String>,
    support_user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlCdnConfig {
    url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlProxyConfig {
    bind: Option<String>,
    port: Option<u16>,
    public_protocol: Option<String>,
    public_host: Option<String>,
    public_port: Option<u16>,
    public_base_url: Option<String>,
}

impl TomlConfig {
    /// Flatten into the environment variable namespace.
    fn into_env_map(self) -> HashMap<&'static str, String> {
        let entries = [
            ("SLACK_BOT_TOKEN", self.slack.bot_token),
            ("SLACK_APP_TOKEN", self.slack.app_token),
            ("SLACK_SIGNING_SECRET", self.slack.signing_secret),
            ("CHANNEL_ID", self.slack.channel_id),
            ("SUPPORT_USER_ID", self.slack.support_user_id),
            ("CDN_URL", self.cdn.url),
            ("CDN_API_KEY", self.cdn.api_key),
            ("HOST_BIND", self.proxy.bind),
            ("HOST_PORT", self.proxy.port.map(|p| p.to_string())),
            ("SERVER_PROTOCOL", self.proxy.public_protocol),
            ("SERVER_HOST", self.proxy.public_host),
            ("SERVER_PORT", self.proxy.public_port.map(|p| p.to_string())),
            ("SERVER_BASE_URL", self.proxy.public_base_url),
        ];

        entries
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a TOML file, with environment variables taking precedence.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        let file_values = parse_toml(&content, path)?;

        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_values.get(key).cloned())
        })
    }

    /// Build a config from an arbitrary key lookup using environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingKey(key.into()));

        let slack = SlackConfig {
            bot_token: require("SLACK_BOT_TOKEN")?,
            app_token: require("SLACK_APP_TOKEN")?,
            signing_secret: get("SLACK_SIGNING_SECRET"),
            channel_id: require("CHANNEL_ID")?,
            support_user_id: get("SUPPORT_USER_ID"),
        };

        let cdn = CdnConfig {
            url: require("CDN_URL")?,
            api_key: require("CDN_API_KEY")?,
        };

        let port = parse_port("HOST_PORT", &require("HOST_PORT")?)?;
        let bind = get("HOST_BIND").unwrap_or_else(|| DEFAULT_BIND.into());

        let public_base_url = match get("SERVER_BASE_URL") {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => {
                let protocol =
                    get("SERVER_PROTOCOL").unwrap_or_else(|| DEFAULT_PUBLIC_PROTOCOL.into());
                let host = require("SERVER_HOST")?;
                match get("SERVER_PORT") {
                    Some(raw) => {
                        let public_port = parse_port("SERVER_PORT", &raw)?;
                        format!("{protocol}://{host}:{public_port}")
                    }
                    None => format!("{protocol}://{host}"),
                }
            }
        };

        let proxy = ProxyConfig {
            bind,
            port,
            public_base_url,
        };
        proxy.path_prefix()?;

        Ok(Self { slack, cdn, proxy })
    }
}

fn parse_toml(content: &str, path: &Path) -> Result<HashMap<&'static str, String>> {
    let parsed: TomlConfig = toml::from_str(content).map_err(|error| ConfigError::Parse {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    Ok(parsed.into_env_map())
}

fn parse_port(key: &str, raw: &str) -> Result<u16> {
    raw.trim().parse::<u16>().map_err(|error| {
        ConfigError::Invalid(format!("{key} must be a port number, got '{raw}': {error}")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SLACK_BOT_TOKEN", "xoxb-test"),
            ("SLACK_APP_TOKEN", "xapp-test"),
            ("CHANNEL_ID", "C123"),
            ("CDN_URL", "https://cdn.example.com/api/v3/upload"),
            ("CDN_API_KEY", "cdn-key"),
            ("HOST_PORT", "3000"),
            ("SERVER_HOST", "proxy.example.com"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn builds_public_url_from_host_parts() {
        let mut env = base_env();
        env.insert("SERVER_PORT", "8443");

        let config = load(&env).expect("config should load");

        assert_eq!(config.proxy.public_base_url, "https://proxy.example.com:8443");
        assert_eq!(config.proxy.port, 3000);
        assert_eq!(config.proxy.bind, "0.0.0.0");
        assert!(config.slack.support_user_id.is_none());
    }

    #[test]
    fn base_url_override_wins_and_drops_trailing_slash() {
        let mut env = base_env();
        env.insert("SERVER_BASE_URL", "http://localhost:3000/files/");
        env.insert("SERVER_PROTOCOL", "ftp");

        let config = load(&env).expect("config should load");

        assert_eq!(config.proxy.public_base_url, "http://localhost:3000/files");
        assert_eq!(config.proxy.path_prefix().expect("prefix"), "/files");
    }

    #[test]
    fn root_base_url_has_empty_prefix() {
        let config = load(&base_env()).expect("config should load");

        assert_eq!(config.proxy.path_prefix().expect("prefix"), "");
    }

    #[test]
    fn unparseable_base_url_is_rejected() {
        let mut env = base_env();
        env.insert("SERVER_BASE_URL", "not a url");

        let error = load(&env).expect_err("config should fail");

        assert!(matches!(error, Error::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn signing_secret_is_optional_and_loaded() {
        assert!(load(&base_env()).expect("config").slack.signing_secret.is_none());

        let mut env = base_env();
        env.insert("SLACK_SIGNING_SECRET", "shh");

        let config = load(&env).expect("config should load");

        assert_eq!(config.slack.signing_secret.as_deref(), Some("shh"));
    }

    #[test]
    fn missing_required_key_is_reported_by_name() {
        let mut env = base_env();
        env.remove("CDN_API_KEY");

        let error = load(&env).expect_err("config should fail");

        assert!(matches!(
            error,
            Error::Config(ConfigError::MissingKey(ref key)) if key == "CDN_API_KEY"
        ));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut env = base_env();
        env.insert("CHANNEL_ID", "   ");

        assert!(load(&env).is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        let mut env = base_env();
        env.insert("HOST_PORT", "eighty");

        let error = load(&env).expect_err("config should fail");

        assert!(matches!(error, Error::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn toml_values_are_flattened_to_env_names() {
        let content = r#"
            [slack]
            bot_token = "xoxb-file"
            channel_id = "CFILE"

            [proxy]
            port = 4000
            public_base_url = "https://files.example.com"
        "#;

        let values = parse_toml(content, Path::new("cdnbot.toml")).expect("toml should parse");

        assert_eq!(values.get("SLACK_BOT_TOKEN").map(String::as_str), Some("xoxb-file"));
        assert_eq!(values.get("CHANNEL_ID").map(String::as_str), Some("CFILE"));
        assert_eq!(values.get("HOST_PORT").map(String::as_str), Some("4000"));
        assert!(!values.contains_key("CDN_URL"));
    }

    #[test]
    fn bind_addr_accepts_ipv6() {
        let proxy = ProxyConfig {
            bind: "::1".into(),
            port: 8080,
            public_base_url: "https://example.com".into(),
        };

        let addr = proxy.bind_addr().expect("address should parse");

        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 8080);
    }
}
