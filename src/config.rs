use std::fmt;
use std::path::PathBuf;

use url::Url;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_FRONTEND_DIR: &str = "frontend";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

// ── Upstream credentials ─────────────────────────────────────────────────────

/// Connection details for the hosted chat-completion deployment.
///
/// Shared read-only by both pipeline stages; built once at startup.
#[derive(Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureOpenAiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str, missing: &mut Vec<&'static str>| {
            let value = lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            if value.is_none() {
                missing.push(name);
            }
            value.unwrap_or_default()
        };

        let mut missing = Vec::new();
        let endpoint = read("AZURE_OPENAI_ENDPOINT", &mut missing);
        let api_key = read("AZURE_OPENAI_KEY", &mut missing);
        let deployment = read("DEPLOYMENT_NAME", &mut missing);
        let api_version = read("API_VERSION", &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let endpoint = Url::parse(&endpoint).map_err(|e| ConfigError::InvalidValue {
            name: "AZURE_OPENAI_ENDPOINT",
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                name: "AZURE_OPENAI_ENDPOINT",
                reason: format!("unsupported scheme {:?}", endpoint.scheme()),
            });
        }

        Ok(Self {
            endpoint,
            api_key,
            deployment,
            api_version,
        })
    }

    /// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={version}`
    pub fn completions_url(&self) -> Result<Url, url::ParseError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!(
            "{}/openai/deployments/{}/chat/completions",
            base, self.deployment
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

impl fmt::Debug for AzureOpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureOpenAiConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .finish()
    }
}

// ── Server settings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            frontend_dir: PathBuf::from(DEFAULT_FRONTEND_DIR),
            staging_dir: std::env::temp_dir(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse_number("PORT", &port)?;
        }
        if let Some(dir) = get("FRONTEND_DIR") {
            config.frontend_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("UPLOAD_TMP_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Some(limit) = get("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = parse_number("MAX_UPLOAD_BYTES", &limit)?;
        }

        Ok(config)
    }

    /// Host names are resolved by the listener, so `localhost` works as well as an IP.
    pub fn bind_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            reason: e.to_string(),
        })
}
