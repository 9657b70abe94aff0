pub mod analytics;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod observability;
pub mod query;
pub mod sink;
pub mod types;
pub mod upstream;

/// Selects `config/{env}.toml`.
pub const ENV_VAR: &str = "MOEX_PROXY_ENV";
pub const DEFAULT_ENV: &str = "development";
