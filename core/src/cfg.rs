use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"renewd"`.
    pub application: &'static str,
}

/// Floor for the pause after each licensing service call (ms).
pub const MIN_CALL_DELAY_MS: u64 = 800;

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    pub log_level: String,
    /// Endpoint of the licensing service.
    #[serde(default = "default_service_url")]
    pub service_url: String,
    /// Retry budget shared by a whole renewal run. With `0` the first request
    /// is still sent, and its failure ends the run.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause after every service call (ms); never below [`MIN_CALL_DELAY_MS`].
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,
    /// Newline separated task parameters: user, serial, version, count, delete.
    #[serde(default)]
    pub task_data: String,
    /// Scheduler poll period (ms).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Optional `host:port` for the status endpoint.
    #[serde(default)]
    pub status_addr: Option<String>,
    /// Public key the licensing service published for request payloads.
    #[serde(default)]
    pub public_key: PublicKeyCfg,
}

/// RSA public key in the `<RSAKeyValue>` form: base64 modulus and exponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCfg {
    /// Big-endian modulus, base64.
    pub modulus: String,
    /// Big-endian public exponent, base64.
    pub exponent: String,
}

impl Default for PublicKeyCfg {
    fn default() -> Self {
        Self {
            modulus: concat!(
                "4yUuUVYKw0lQDTMONy356ufkOgSUjeGdP168JdNAQbGnaqSuXek/qe0HztzUteY4oWR73CimGNshL9viCcmc/AZh",
                "WoLUdiML1rii6Rup7KRXY4azti65cmgADeFXkO3Cl2dmyQaYX6IN+VHTTjp1B3SSdqv2dbz0VFwjZuVG/1DK9avl",
                "nQkS04W5UAGNR3ZDfqBJaw7Fou/7X2psH6S0xXVV+qy64qgJcfe3OkyH+zqUCEf6hOJwBeGNXc3NWw629UatPg7c",
                "gvLvj/JSDfuNmUKrVkC40GaLXkAuPUZiyledyEb3a/G2D8YjG48Xk4qxz1vtBd+EsIaiNez2iVx5Dw==",
            )
            .to_string(),
            exponent: "AQAB".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            service_url: default_service_url(),
            max_retries: default_max_retries(),
            call_delay_ms: default_call_delay_ms(),
            task_data: String::new(),
            tick_ms: default_tick_ms(),
            status_addr: None,
            public_key: PublicKeyCfg::default(),
        }
    }
}

impl Config {
    /// Call delay with the rate-limit floor applied.
    pub fn call_delay_ms(&self) -> u64 {
        self.call_delay_ms.max(MIN_CALL_DELAY_MS)
    }
}

fn default_service_url() -> String { "https://licensing.example.com/api/keys".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_call_delay_ms() -> u64 { MIN_CALL_DELAY_MS }
fn default_tick_ms() -> u64 { 60_000 }

fn project_dirs(app: &AppId) -> Result<ProjectDirs> {
    ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Return the data directory (key store root) for this app, creating it if needed.
pub fn data_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.data_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let path = config_dir(app)?.join("config.toml");
    if path.exists() {
        load_from(&path)
    } else {
        let cfg = Config::default();
        save_config(&path, &cfg)?;
        Ok(cfg)
    }
}

/// Load a config file from an explicit path.
pub fn load_from(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    let cfg: Config = toml::from_str(&txt)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
