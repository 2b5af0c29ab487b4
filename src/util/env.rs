//! Process configuration pulled from the environment (and `.env`, if present).
//!
//! Every variable is kept as a string and parsed at the point of use so that a single malformed
//! value only fails the component that needs it.

use std::sync::LazyLock;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use serde::de::value::{Error as ValueError, MapDeserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::{
    DEFAULT_LOG_FILTER, DEFAULT_RESET_AT, DEFAULT_RESET_TIMEZONE, DEFAULT_SERVICE_NAME,
    DEFAULT_TRACER_NAME, SERVER_PORT,
};

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::InternalToken => &vars.internal_token,
        Var::AdminUserId => &vars.admin_user_id,
        Var::ResetTimezone => &vars.reset_timezone,
        Var::ResetAt => &vars.reset_at,
        Var::LogFilter => &vars.log_filter,
        Var::OtelExporterEndpoint => &vars.otel_exporter_otlp_endpoint,
        Var::ApiServiceName => &vars.api_service_name,
        Var::ApiTracerName => &vars.api_tracer_name,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_port")]
    pub server_api_port: String,
    #[serde(default)]
    pub internal_token: String,
    #[serde(default)]
    pub admin_user_id: String,
    #[serde(default = "default_reset_timezone")]
    pub reset_timezone: String,
    #[serde(default = "default_reset_at")]
    pub reset_at: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: String,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
}

fn default_port() -> String {
    SERVER_PORT.to_string()
}

fn default_reset_timezone() -> String {
    DEFAULT_RESET_TIMEZONE.to_string()
}

fn default_reset_at() -> String {
    DEFAULT_RESET_AT.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_tracer_name() -> String {
    DEFAULT_TRACER_NAME.to_string()
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        // a missing .env file is fine, the real environment still applies
        _ = dotenvy::dotenv();
        from_iter(std::env::vars())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Var {
    DatabaseUrl,
    ServerApiPort,
    InternalToken,
    AdminUserId,
    ResetTimezone,
    ResetAt,
    LogFilter,
    OtelExporterEndpoint,
    ApiServiceName,
    ApiTracerName,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

/// Builds an [`Env`] from `(NAME, value)` pairs; unknown names are ignored.
pub fn from_iter<Iter>(iter: Iter) -> EnvResult<Env>
where
    Iter: IntoIterator<Item = (String, String)>,
{
    let deserializer = MapDeserializer::<_, ValueError>::new(iter.into_iter());
    Ok(Env::deserialize(deserializer)?)
}

pub fn parse_port(raw: &str) -> EnvResult<u16> {
    raw.trim().parse::<u16>().map_err(|e| EnvErr::Invalid {
        var: Var::ServerApiPort,
        reason: e.to_string(),
    })
}

/// An empty `ADMIN_USER_ID` disables the administrative reset entirely.
pub fn parse_admin(raw: &str) -> EnvResult<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    raw.parse::<i64>().map(Some).map_err(|e| EnvErr::Invalid {
        var: Var::AdminUserId,
        reason: e.to_string(),
    })
}

pub fn parse_timezone(raw: &str) -> EnvResult<Tz> {
    raw.trim().parse::<Tz>().map_err(|e| EnvErr::Invalid {
        var: Var::ResetTimezone,
        reason: e.to_string(),
    })
}

/// Accepts `HH:MM`.
pub fn parse_reset_at(raw: &str) -> EnvResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| EnvErr::Invalid {
        var: Var::ResetAt,
        reason: e.to_string(),
    })
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Deserialize(#[from] ValueError),

    #[error("invalid value for {var:?}: {reason}")]
    Invalid { var: Var, reason: String },
}
