use std::{env, net::IpAddr, path::PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

pub static DEFAULT_TICKTICK_BASE_URL: &str = "https://api.ticktick.com/open/v1";
pub static DEFAULT_TICKTICK_AUTH_URL: &str = "https://ticktick.com/oauth/authorize";
pub static DEFAULT_TICKTICK_TOKEN_URL: &str = "https://ticktick.com/oauth/token";

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub ticktick: TickTickSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub log_directive: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TickTickSettings {
    pub base_url: Url,
    pub auth_url: Url,
    pub token_url: Url,
    /// Address the one-shot authorization callback listener binds to.
    /// Must be a loopback address; the listener is refused otherwise.
    pub listen_address: IpAddr,
    /// Port of the callback listener. 0 picks an ephemeral port.
    pub listen_port: u16,
    pub authorization_timeout_seconds: u64,
    pub credentials_file: PathBuf,
}

impl Settings {
    pub fn new_from_file(file: Option<String>) -> Result<Self, ConfigError> {
        let config_file_required = file.is_some();
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config".into());
        let config_file = file
            .unwrap_or_else(|| env::var("CONFIG_FILE").unwrap_or_else(|_| String::new()));

        let default_config_file = format!("{config_path}/default");
        let local_config_file = format!("{config_path}/local");

        let mut builder = Config::builder()
            .set_default("application.log_directive", "info")?
            .set_default("ticktick.base_url", DEFAULT_TICKTICK_BASE_URL)?
            .set_default("ticktick.auth_url", DEFAULT_TICKTICK_AUTH_URL)?
            .set_default("ticktick.token_url", DEFAULT_TICKTICK_TOKEN_URL)?
            .set_default("ticktick.listen_address", "127.0.0.1")?
            .set_default("ticktick.listen_port", 8000_i64)?
            .set_default("ticktick.authorization_timeout_seconds", 120_i64)?
            .set_default("ticktick.credentials_file", ".env")?
            .add_source(File::with_name(&default_config_file).required(false))
            .add_source(File::with_name(&local_config_file).required(false));
        if !config_file.is_empty() {
            builder = builder
                .add_source(File::with_name(&config_file).required(config_file_required));
        }
        let config = builder
            .add_source(Environment::with_prefix("ticktick_mcp").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn new() -> Result<Self, ConfigError> {
        Settings::new_from_file(None)
    }
}
