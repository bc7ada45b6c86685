use crate::core::get_config_dir;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    /// Identity claims the CLI attaches to its requests. The daemon ignores
    /// this section; identities normally come from the front-end's identity
    /// provider.
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database file location (default: `<data_dir>/gpool/manager.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// How often the expiry sweeper looks for overdue jobs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the orchestration engine's REST API
    #[serde(default = "default_engine_endpoint")]
    pub endpoint: String,
    /// Per-request timeout for engine and credential-store calls
    #[serde(default = "default_engine_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct BootstrapConfig {
    /// User id granted owner privileges at daemon startup
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    59100
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_engine_endpoint() -> String {
    "http://localhost:2375".to_string()
}

fn default_engine_timeout_secs() -> u64 {
    30
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_engine_endpoint(),
            request_timeout_secs: default_engine_timeout_secs(),
        }
    }
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gpool.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("GPOOL")
                .separator("_")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
