use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used when building completion URLs for staged bookings.
    /// Defaults to `http://{host}:{port}`.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL clients should use to reach this server.
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8088
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("fileport.db")
}

/// Local staging area and transfer tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Directory under which every booking gets its own temporary directory.
    #[serde(default = "default_staging_root")]
    pub root: PathBuf,
    /// Chunk size when streaming a locally staged file.
    #[serde(default = "default_staged_chunk_size")]
    pub staged_chunk_size: usize,
    /// Chunk size when streaming directly from the catalog.
    #[serde(default = "default_catalog_chunk_size")]
    pub catalog_chunk_size: usize,
    /// How many times synchronous staging checks for the first bytes.
    #[serde(default = "default_sync_wait_attempts")]
    pub sync_wait_attempts: u32,
    /// Pause between two synchronous staging checks.
    #[serde(default = "default_sync_wait_interval_ms")]
    pub sync_wait_interval_ms: u64,
    /// Pause before re-reading a staged file that is still being written.
    #[serde(default = "default_growth_poll_interval_ms")]
    pub growth_poll_interval_ms: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_staging_root(),
            staged_chunk_size: default_staged_chunk_size(),
            catalog_chunk_size: default_catalog_chunk_size(),
            sync_wait_attempts: default_sync_wait_attempts(),
            sync_wait_interval_ms: default_sync_wait_interval_ms(),
            growth_poll_interval_ms: default_growth_poll_interval_ms(),
        }
    }
}

impl StagingConfig {
    pub fn sync_wait(&self) -> StagingWait {
        StagingWait {
            attempts: self.sync_wait_attempts,
            interval: Duration::from_millis(self.sync_wait_interval_ms),
        }
    }

    pub fn growth_poll_interval(&self) -> Duration {
        Duration::from_millis(self.growth_poll_interval_ms)
    }
}

/// Bounded wait policy for synchronous staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl StagingWait {
    /// Upper bound of the whole wait.
    pub fn total(&self) -> Duration {
        self.interval * self.attempts
    }
}

fn default_staging_root() -> PathBuf {
    std::env::temp_dir().join("fileport-staging")
}

fn default_staged_chunk_size() -> usize {
    16 * 1024
}

fn default_catalog_chunk_size() -> usize {
    8 * 1024
}

fn default_sync_wait_attempts() -> u32 {
    30
}

fn default_sync_wait_interval_ms() -> u64 {
    1000
}

fn default_growth_poll_interval_ms() -> u64 {
    250
}

/// Catalog command-line tooling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Path segment between the VO directory and the application directory.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_list_command")]
    pub list_command: String,
    #[serde(default = "default_copy_command")]
    pub copy_command: String,
    #[serde(default = "default_remove_command")]
    pub remove_command: String,
    #[serde(default = "default_replicas_command")]
    pub replicas_command: String,
    #[serde(default = "default_register_command")]
    pub register_command: String,
    /// Command used for direct streaming; it receives `lfn:<path>` and a
    /// destination of `file:/dev/stdout`.
    #[serde(default = "default_copy_command")]
    pub stream_command: String,
    /// Number of parallel streams passed to the copy command.
    #[serde(default = "default_copy_streams")]
    pub copy_streams: u32,
    /// Process-table signature of a running staging transfer.
    /// Defaults to the copy command.
    #[serde(default)]
    pub transfer_signature: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            list_command: default_list_command(),
            copy_command: default_copy_command(),
            remove_command: default_remove_command(),
            replicas_command: default_replicas_command(),
            register_command: default_register_command(),
            stream_command: default_copy_command(),
            copy_streams: default_copy_streams(),
            transfer_signature: None,
        }
    }
}

impl CatalogConfig {
    pub fn transfer_signature(&self) -> &str {
        self.transfer_signature
            .as_deref()
            .unwrap_or(&self.copy_command)
    }
}

fn default_namespace() -> String {
    "sgfs".to_string()
}

fn default_list_command() -> String {
    "lfc-ls".to_string()
}

fn default_copy_command() -> String {
    "lcg-cp".to_string()
}

fn default_remove_command() -> String {
    "lcg-del".to_string()
}

fn default_replicas_command() -> String {
    "lcg-lr".to_string()
}

fn default_register_command() -> String {
    "lcg-rf".to_string()
}

fn default_copy_streams() -> u32 {
    3
}

/// Credential proxy issuance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Directory where per-transaction proxy files are written.
    #[serde(default = "default_proxy_dir")]
    pub dir: PathBuf,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            dir: default_proxy_dir(),
            timeout_secs: default_proxy_timeout(),
        }
    }
}

fn default_proxy_dir() -> PathBuf {
    std::env::temp_dir().join("fileport-proxies")
}

fn default_proxy_timeout() -> u64 {
    30
}

/// Reference data seeded into the store at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub infrastructures: Vec<InfrastructureConfig>,
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// A grid infrastructure: where proxies come from and which catalog it uses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfrastructureConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub proxy_id: String,
    pub vo: String,
    pub role: String,
    #[serde(default)]
    pub proxy_renewal: bool,
    /// Information system endpoint (`LCG_GFAL_INFOSYS`).
    pub info_system: String,
    /// Catalog host (`LFC_HOST`).
    pub catalog_host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// Directory under the catalog namespace holding this application's files.
    pub catalog_dir: String,
    /// Name of the infrastructure this application runs on.
    pub infrastructure: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub name: String,
}

/// Sanitized config for API responses
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub staging: StagingConfig,
    pub catalog: CatalogConfig,
    pub infrastructures: Vec<SanitizedInfrastructure>,
    pub applications: usize,
    pub users: usize,
}

/// Infrastructure summary (proxy robot identifier hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedInfrastructure {
    pub name: String,
    pub vo: String,
    pub catalog_host: String,
    pub proxy_id_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            staging: config.staging.clone(),
            catalog: config.catalog.clone(),
            infrastructures: config
                .registry
                .infrastructures
                .iter()
                .map(|i| SanitizedInfrastructure {
                    name: i.name.clone(),
                    vo: i.vo.clone(),
                    catalog_host: i.catalog_host.clone(),
                    proxy_id_configured: !i.proxy_id.is_empty(),
                })
                .collect(),
            applications: config.registry.applications.len(),
            users: config.registry.users.len(),
        }
    }
}
