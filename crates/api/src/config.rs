//! Typed server configuration, layered over environment variables with
//! the `config` crate.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub database_url: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_max_concurrently_running")]
    pub max_concurrently_running_default: i32,
    #[serde(default)]
    pub auth_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_max_concurrently_running() -> i32 {
    10
}

impl ServerConfig {
    /// Load from environment, prefixed `JOBMON_` (e.g. `JOBMON_DATABASE_URL`),
    /// falling back to bare `DATABASE_URL` since that's the variable every
    /// other Postgres-backed tool in this deployment already expects.
    pub fn load() -> Result<Self, config::ConfigError> {
        let database_url = std::env::var("DATABASE_URL").ok();

        let mut builder = config::Config::builder()
            .add_source(config::Environment::with_prefix("JOBMON").separator("_"));

        if let Some(url) = database_url {
            builder = builder.set_default("database_url", url)?;
        }

        builder.build()?.try_deserialize()
    }
}
