use config::Config;
use config::ConfigError;
use config::File;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

/// Top-level settings, layered `configuration/base.yaml` +
/// `configuration/{local,production}.yaml` + `APP_`-prefixed env overrides
/// (SPEC_FULL.md "Configuration"). Mirrors the teacher's `Settings` shape,
/// generalized from one flat file to an environment-layered one because
/// this service runs in more than one deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub dispatch: DispatchSettings,
    pub reporter: ReporterSettings,
    pub smtp_pool: SmtpPoolSettings,
    pub attachments: AttachmentSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub api_token: Option<Secret<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_require_ssl")]
    pub require_ssl: bool,
}

fn default_require_ssl() -> bool { true }

impl DatabaseSettings {
    pub fn connection_string(&self) -> Secret<String> {
        use secrecy::ExposeSecret;
        Secret::new(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database_name,
        ))
    }

    pub fn connection_string_without_db(&self) -> Secret<String> {
        use secrecy::ExposeSecret;
        Secret::new(format!(
            "postgres://{}:{}@{}:{}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
        ))
    }
}

/// Dispatcher cadence and retry policy, spec.md §4.5/§7.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_smtp_batch_size")]
    pub smtp_batch_size: i64,
    #[serde(default = "default_batch_size_per_account")]
    pub batch_size_per_account: i64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_max_concurrent_per_account")]
    pub max_concurrent_per_account: usize,
    #[serde(default = "default_send_loop_interval_ms")]
    pub send_loop_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delays_secs")]
    pub retry_delays_secs: Vec<i64>,
    #[serde(default)]
    pub report_deferred_events: bool,
}

fn default_smtp_batch_size() -> i64 { 100 }
fn default_batch_size_per_account() -> i64 { 50 }
fn default_max_concurrent_sends() -> usize { 10 }
fn default_max_concurrent_per_account() -> usize { 3 }
fn default_send_loop_interval_ms() -> u64 { 500 }
fn default_max_retries() -> u32 { 5 }
fn default_retry_delays_secs() -> Vec<i64> { vec![60, 300, 900, 3600, 7200] }

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            smtp_batch_size: default_smtp_batch_size(),
            batch_size_per_account: default_batch_size_per_account(),
            max_concurrent_sends: default_max_concurrent_sends(),
            max_concurrent_per_account: default_max_concurrent_per_account(),
            send_loop_interval_ms: default_send_loop_interval_ms(),
            max_retries: default_max_retries(),
            retry_delays_secs: default_retry_delays_secs(),
            report_deferred_events: false,
        }
    }
}

/// Reporter loop cadence and retention, spec.md §4.6.
#[derive(Debug, Clone, Deserialize)]
pub struct ReporterSettings {
    #[serde(default = "default_reporter_fallback_secs")]
    pub fallback_interval_secs: u64,
    #[serde(default = "default_report_retention_secs")]
    pub report_retention_secs: i64,
    #[serde(default = "default_reporter_http_timeout_secs")]
    pub http_timeout_secs: u64,
    pub global_sync_url: Option<String>,
}

fn default_reporter_fallback_secs() -> u64 { 300 }
fn default_report_retention_secs() -> i64 { 7 * 24 * 3600 }
fn default_reporter_http_timeout_secs() -> u64 { 30 }

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            fallback_interval_secs: default_reporter_fallback_secs(),
            report_retention_secs: default_report_retention_secs(),
            http_timeout_secs: default_reporter_http_timeout_secs(),
            global_sync_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpPoolSettings {
    #[serde(default = "default_pool_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_pool_cleanup_interval_secs() -> u64 { 150 }

impl Default for SmtpPoolSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_pool_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentSettings {
    #[serde(default = "default_memory_max_mb")]
    pub memory_max_mb: u64,
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: i64,
    #[serde(default = "default_disk_max_mb")]
    pub disk_max_mb: u64,
    #[serde(default = "default_disk_threshold_kb")]
    pub disk_threshold_kb: u64,
    #[serde(default = "default_disk_dir")]
    pub disk_dir: String,
    #[serde(default = "default_filesystem_base_dir")]
    pub filesystem_base_dir: String,
}

fn default_memory_max_mb() -> u64 { 64 }
fn default_memory_ttl_secs() -> i64 { 600 }
fn default_disk_max_mb() -> u64 { 512 }
fn default_disk_threshold_kb() -> u64 { 256 }
fn default_disk_dir() -> String { "attachment-cache".to_string() }
fn default_filesystem_base_dir() -> String { "attachments".to_string() }

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            memory_max_mb: default_memory_max_mb(),
            memory_ttl_secs: default_memory_ttl_secs(),
            disk_max_mb: default_disk_max_mb(),
            disk_threshold_kb: default_disk_threshold_kb(),
            disk_dir: default_disk_dir(),
            filesystem_base_dir: default_filesystem_base_dir(),
        }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

/// Loads `configuration/base.yaml`, layers the environment-specific file on
/// top, then applies `APP_`-prefixed environment overrides (e.g.
/// `APP_DATABASE__PORT`), per SPEC_FULL.md's Configuration section.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().expect("failed to determine current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("failed to parse APP_ENVIRONMENT");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize()
}
