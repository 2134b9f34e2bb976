//! Environment configuration.
//!
//! All deployment knobs come from `PULSEOX_*` environment variables with
//! local-development defaults. The constants module keeps variable names in
//! one place instead of scattering string literals across crates.

/// Environment variable names.
pub mod env_vars {
    pub const DB_PATH: &str = "PULSEOX_DB_PATH";
    pub const HTTP_HOST: &str = "PULSEOX_HTTP_HOST";
    pub const HTTP_PORT: &str = "PULSEOX_HTTP_PORT";
    pub const MQTT_HOST: &str = "PULSEOX_MQTT_HOST";
    pub const MQTT_PORT: &str = "PULSEOX_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "PULSEOX_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "PULSEOX_MQTT_PASSWORD";
    pub const MQTT_TLS: &str = "PULSEOX_MQTT_TLS";
    pub const IDENTITY_ENDPOINT: &str = "PULSEOX_IDENTITY_ENDPOINT";
    pub const LLM_ENDPOINT: &str = "PULSEOX_LLM_ENDPOINT";
    pub const LLM_MODEL: &str = "PULSEOX_LLM_MODEL";
    pub const LLM_API_KEY: &str = "PULSEOX_LLM_API_KEY";
    pub const SCHEDULE_GRACE_SECS: &str = "PULSEOX_SCHEDULE_GRACE_SECS";
}

/// Default values for local development.
pub mod defaults {
    pub const DB_PATH: &str = "./data/pulseox.redb";
    pub const HTTP_HOST: &str = "127.0.0.1";
    pub const HTTP_PORT: u16 = 9480;
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const LLM_ENDPOINT: &str = "http://localhost:11434/v1";
    pub const LLM_MODEL: &str = "qwen3-vl:2b";
    pub const SCHEDULE_GRACE_SECS: u64 = 60;
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_host: String,
    pub http_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_tls: bool,
    pub identity_endpoint: Option<String>,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub schedule_grace_secs: u64,
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            db_path: env_or(env_vars::DB_PATH, defaults::DB_PATH),
            http_host: env_or(env_vars::HTTP_HOST, defaults::HTTP_HOST),
            http_port: env_parse_or(env_vars::HTTP_PORT, defaults::HTTP_PORT),
            mqtt_host: env_or(env_vars::MQTT_HOST, defaults::MQTT_HOST),
            mqtt_port: env_parse_or(env_vars::MQTT_PORT, defaults::MQTT_PORT),
            mqtt_username: std::env::var(env_vars::MQTT_USERNAME).ok(),
            mqtt_password: std::env::var(env_vars::MQTT_PASSWORD).ok(),
            mqtt_tls: env_parse_or(env_vars::MQTT_TLS, false),
            identity_endpoint: std::env::var(env_vars::IDENTITY_ENDPOINT).ok(),
            llm_endpoint: env_or(env_vars::LLM_ENDPOINT, defaults::LLM_ENDPOINT),
            llm_model: env_or(env_vars::LLM_MODEL, defaults::LLM_MODEL),
            llm_api_key: std::env::var(env_vars::LLM_API_KEY).ok(),
            schedule_grace_secs: env_parse_or(
                env_vars::SCHEDULE_GRACE_SECS,
                defaults::SCHEDULE_GRACE_SECS,
            ),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
