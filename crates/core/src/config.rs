//! Application configuration: TOML file plus environment overrides.

use std::env;
use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub crm: CrmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// External CRM connection settings plus the knobs that bound a sync run.
#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub api_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub page_size: u32,
    pub max_pages: u32,
    pub full_page_size: u32,
    pub full_max_pages: u32,
    pub page_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub crm_api_base_url: Option<String>,
    pub crm_token_url: Option<String>,
    pub crm_client_id: Option<String>,
    pub crm_client_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://freightdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            crm: CrmConfig {
                api_base_url: "https://api.focus.teamleader.eu".to_string(),
                token_url: "https://focus.teamleader.eu/oauth2/access_token".to_string(),
                client_id: String::new(),
                client_secret: String::new().into(),
                page_size: 50,
                max_pages: 20,
                full_page_size: 100,
                full_max_pages: 200,
                page_delay_ms: 200,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8090,
                health_check_port: 8091,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

/// File-level shape; every field optional so partial config files work.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    crm: Option<FileCrm>,
    server: Option<FileServer>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCrm {
    api_base_url: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    page_size: Option<u32>,
    max_pages: Option<u32>,
    full_page_size: Option<u32>,
    full_max_pages: Option<u32>,
    page_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

const DEFAULT_CONFIG_FILE: &str = "freightdesk.toml";

impl AppConfig {
    /// Defaults, then config file, then environment, then explicit overrides.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path =
            options.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let file: FileConfig = toml::from_str(&raw)
                    .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?;
                config.apply_file(file);
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                if options.require_file {
                    return Err(ConfigError::MissingConfigFile(path));
                }
            }
            Err(source) => return Err(ConfigError::ReadFile { path, source }),
        }

        config.apply_env();
        config.apply_overrides(&options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(database) = file.database {
            apply(&mut self.database.url, database.url);
            apply(&mut self.database.max_connections, database.max_connections);
            apply(&mut self.database.timeout_secs, database.timeout_secs);
        }
        if let Some(crm) = file.crm {
            apply(&mut self.crm.api_base_url, crm.api_base_url);
            apply(&mut self.crm.token_url, crm.token_url);
            apply(&mut self.crm.client_id, crm.client_id);
            if let Some(secret) = crm.client_secret {
                self.crm.client_secret = secret.into();
            }
            apply(&mut self.crm.page_size, crm.page_size);
            apply(&mut self.crm.max_pages, crm.max_pages);
            apply(&mut self.crm.full_page_size, crm.full_page_size);
            apply(&mut self.crm.full_max_pages, crm.full_max_pages);
            apply(&mut self.crm.page_delay_ms, crm.page_delay_ms);
        }
        if let Some(server) = file.server {
            apply(&mut self.server.bind_address, server.bind_address);
            apply(&mut self.server.port, server.port);
            apply(&mut self.server.health_check_port, server.health_check_port);
        }
        if let Some(logging) = file.logging {
            apply(&mut self.logging.level, logging.level);
            apply(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env(&mut self) {
        apply(&mut self.database.url, env_string("FREIGHTDESK_DATABASE_URL"));
        apply(&mut self.logging.level, env_string("FREIGHTDESK_LOG_LEVEL"));
        apply(&mut self.crm.api_base_url, env_string("FREIGHTDESK_CRM_API_BASE_URL"));
        apply(&mut self.crm.token_url, env_string("FREIGHTDESK_CRM_TOKEN_URL"));
        apply(&mut self.crm.client_id, env_string("FREIGHTDESK_CRM_CLIENT_ID"));
        if let Some(secret) = env_string("FREIGHTDESK_CRM_CLIENT_SECRET") {
            self.crm.client_secret = secret.into();
        }
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        apply(&mut self.database.url, overrides.database_url.clone());
        apply(&mut self.logging.level, overrides.log_level.clone());
        apply(&mut self.crm.api_base_url, overrides.crm_api_base_url.clone());
        apply(&mut self.crm.token_url, overrides.crm_token_url.clone());
        apply(&mut self.crm.client_id, overrides.crm_client_id.clone());
        if let Some(secret) = overrides.crm_client_secret.clone() {
            self.crm.client_secret = secret.into();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        for (key, url) in
            [("crm.api_base_url", &self.crm.api_base_url), ("crm.token_url", &self.crm.token_url)]
        {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{key} must start with http:// or https://"
                )));
            }
        }
        if self.crm.page_size == 0 || self.crm.full_page_size == 0 {
            return Err(ConfigError::Validation("crm page sizes must be positive".to_string()));
        }
        if self.crm.max_pages == 0 || self.crm.full_max_pages == 0 {
            return Err(ConfigError::Validation("crm page ceilings must be positive".to_string()));
        }
        Ok(())
    }
}

fn apply<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
