//! Process environment, read once (after loading any `.env` file) and kept for the life of the
//! process.

use std::sync::LazyLock;

use serde::de::value::MapDeserializer;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::{DEFAULT_CONFIG_PATH, DISCORD_API_URL};

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

pub async fn env() -> EnvResult<&'static Env> {
    ENV_VARS.get_or_try_init(|| async { Env::new() }).await
}

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = env().await?;
    Ok(match var {
        Var::DiscordToken => &vars.discord_token,
        Var::DiscordGuildId => &vars.discord_guild_id,
        Var::DiscordApiUrl => &vars.discord_api_url,
        Var::ConfigPath => &vars.config_path,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub discord_token: String,
    pub discord_guild_id: String,
    #[serde(default = "default_api_url")]
    pub discord_api_url: String,
    #[serde(rename = "SLURPOTRON_CONFIG", default = "default_config_path")]
    pub config_path: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP export is off unless this is set
    #[serde(default, deserialize_with = "optional")]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_api_url() -> String {
    DISCORD_API_URL.to_string()
}

fn default_config_path() -> String {
    DEFAULT_CONFIG_PATH.to_string()
}

fn default_service_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// Variables arrive as plain strings, so a present value is always `Some`
fn optional<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Some)
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        Self::from_iter(dotenvy::vars())
    }

    /// Builds the environment from `(name, value)` pairs; empty values count as unset
    pub fn from_iter<Iter>(iter: Iter) -> EnvResult<Self>
    where
        Iter: IntoIterator<Item = (String, String)>,
    {
        let vars = iter
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty());

        let deserializer: MapDeserializer<'_, _, EnvDeserializeError> = MapDeserializer::new(vars);
        Ok(Env::deserialize(deserializer)?)
    }
}

#[derive(Debug)]
pub enum Var {
    DiscordToken,
    DiscordGuildId,
    DiscordApiUrl,
    ConfigPath,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing environment variable {0}")]
    MissingValue(&'static str),
}

impl serde::de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let env = Env::from_iter(vars(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_GUILD_ID", "42"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(env.discord_token, "abc");
        assert_eq!(env.discord_guild_id, "42");
        assert_eq!(env.discord_api_url, DISCORD_API_URL);
        assert_eq!(env.config_path, DEFAULT_CONFIG_PATH);
        assert_eq!(env.service_name, "slurpotron");
        assert_eq!(env.otel_exporter_otlp_endpoint, None);
    }

    #[test]
    fn test_overrides() {
        let env = Env::from_iter(vars(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_GUILD_ID", "42"),
            ("DISCORD_API_URL", "http://localhost:9000"),
            ("SLURPOTRON_CONFIG", "/etc/slurpotron.json"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
        ]))
        .unwrap();

        assert_eq!(env.discord_api_url, "http://localhost:9000");
        assert_eq!(env.config_path, "/etc/slurpotron.json");
        assert_eq!(
            env.otel_exporter_otlp_endpoint.as_deref(),
            Some("http://collector:4317")
        );
    }

    #[test]
    fn test_missing_token() {
        let result = Env::from_iter(vars(&[("DISCORD_GUILD_ID", "42")]));
        assert!(matches!(
            result,
            Err(EnvErr::DeserializationError(EnvDeserializeError::MissingValue("DISCORD_TOKEN")))
        ));
    }
}
