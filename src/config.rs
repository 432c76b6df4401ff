use crate::error::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub browser: BrowserLaunchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_browser_instances")]
    pub max_browser_instances: usize,
    #[serde(default = "default_default_ttl_minutes")]
    pub default_ttl_minutes: u64,
    #[serde(default = "default_hard_ttl_minutes")]
    pub hard_ttl_minutes: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_browser_instances: default_max_browser_instances(),
            default_ttl_minutes: default_default_ttl_minutes(),
            hard_ttl_minutes: default_hard_ttl_minutes(),
        }
    }
}

fn default_max_browser_instances() -> usize {
    5
}
fn default_default_ttl_minutes() -> u64 {
    30
}
fn default_hard_ttl_minutes() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserLaunchConfig {
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_browser_timeout_ms")]
    pub browser_timeout_ms: u64,
    #[serde(default = "default_port_start")]
    pub chrome_port_start: u16,
    #[serde(default = "default_port_end")]
    pub chrome_port_end: u16,
    #[serde(default)]
    pub use_custom_chrome_launcher: bool,
    pub chrome_launcher_cmd: Option<String>,
}

impl Default for BrowserLaunchConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            browser_timeout_ms: default_browser_timeout_ms(),
            chrome_port_start: default_port_start(),
            chrome_port_end: default_port_end(),
            use_custom_chrome_launcher: false,
            chrome_launcher_cmd: None,
        }
    }
}

fn default_browser_timeout_ms() -> u64 {
    60_000
}
fn default_port_start() -> u16 {
    9222
}
fn default_port_end() -> u16 {
    9322
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub request_queue_url: String,
    pub response_queue_url: Option<String>,
    pub aws_region: Option<String>,
    #[serde(default = "default_sqs_max_batch_size")]
    pub sqs_max_batch_size: i32,
    #[serde(default = "default_sqs_wait_time_seconds")]
    pub sqs_wait_time_seconds: i32,
    #[serde(default = "default_status_log_interval")]
    pub status_log_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_queue_url: String::new(),
            response_queue_url: None,
            aws_region: None,
            sqs_max_batch_size: default_sqs_max_batch_size(),
            sqs_wait_time_seconds: default_sqs_wait_time_seconds(),
            status_log_interval_secs: default_status_log_interval(),
        }
    }
}

fn default_sqs_max_batch_size() -> i32 {
    4
}
fn default_sqs_wait_time_seconds() -> i32 {
    10
}
fn default_status_log_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub reuse_enabled: bool,
    #[serde(default = "default_profile_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_profile_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            reuse_enabled: false,
            max_age_hours: default_profile_max_age_hours(),
            cleanup_interval_secs: default_profile_cleanup_interval(),
        }
    }
}

fn default_profile_max_age_hours() -> u64 {
    24
}
fn default_profile_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads configuration from process environment variables, the only
    /// authority for configuration at runtime. There is no on-disk file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            env: env_var_or("ENV", "local"),
            ..Self::default()
        };

        config.queue.request_queue_url = env_var_or("SQS_REQUEST_QUEUE_URL", "");
        config.queue.response_queue_url = std::env::var("SQS_RESPONSE_QUEUE_URL").ok();
        config.queue.aws_region = std::env::var("AWS_REGION").ok();
        if let Some(v) = env_parse::<i32>("SQS_MAX_BATCH_SIZE") {
            config.queue.sqs_max_batch_size = v;
        }
        if let Some(v) = env_parse::<i32>("SQS_WAIT_TIME_SECONDS") {
            config.queue.sqs_wait_time_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("STATUS_LOG_INTERVAL") {
            config.queue.status_log_interval_secs = v;
        }

        if let Some(v) = env_parse::<usize>("MAX_BROWSER_INSTANCES") {
            config.pool.max_browser_instances = v;
        }
        if let Some(v) = env_parse::<u64>("DEFAULT_TTL_MINUTES") {
            config.pool.default_ttl_minutes = v;
        }
        if let Some(v) = env_parse::<u64>("HARD_TTL_MINUTES") {
            config.pool.hard_ttl_minutes = v;
        }

        if let Some(v) = env_parse::<u64>("BROWSER_TIMEOUT") {
            config.browser.browser_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u16>("CHROME_PORT_START") {
            config.browser.chrome_port_start = v;
        }
        if let Some(v) = env_parse::<u16>("CHROME_PORT_END") {
            config.browser.chrome_port_end = v;
        }
        if let Ok(v) = std::env::var("USE_CUSTOM_CHROME_LAUNCHER") {
            config.browser.use_custom_chrome_launcher = v == "true" || v == "1";
        }
        config.browser.chrome_launcher_cmd = std::env::var("CHROME_LAUNCHER_CMD").ok();
        config.browser.chrome_path = std::env::var("CHROME_PATH").ok().map(PathBuf::from);

        if let Ok(v) = std::env::var("PROFILE_REUSE_ENABLED") {
            config.profile.reuse_enabled = v == "true" || v == "1";
        }
        if let Some(v) = env_parse::<u64>("PROFILE_MAX_AGE_HOURS") {
            config.profile.max_age_hours = v;
        }
        if let Some(v) = env_parse::<u64>("PROFILE_CLEANUP_INTERVAL_SECONDS") {
            config.profile.cleanup_interval_secs = v;
        }

        if let Ok(v) = std::env::var("BROWSER_API_CALLBACK_ENABLED") {
            config.callback.enabled = v == "true" || v == "1";
        }
        config.callback.url = std::env::var("BROWSER_API_CALLBACK_URL").ok();

        config.logging.log_level = env_var_or("LOG_LEVEL", "info");
        config.logging.log_file = std::env::var("LOG_FILE").ok().map(PathBuf::from);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.browser.chrome_port_start > self.browser.chrome_port_end {
            return Err(LauncherError::ConfigError(
                "CHROME_PORT_START must be <= CHROME_PORT_END".into(),
            ));
        }
        if self.pool.max_browser_instances == 0 {
            return Err(LauncherError::ConfigError(
                "MAX_BROWSER_INSTANCES must be greater than 0".into(),
            ));
        }
        if self.pool.default_ttl_minutes == 0 || self.pool.hard_ttl_minutes == 0 {
            return Err(LauncherError::ConfigError(
                "TTL minutes must be greater than 0".into(),
            ));
        }
        if self.pool.default_ttl_minutes > self.pool.hard_ttl_minutes {
            return Err(LauncherError::ConfigError(
                "DEFAULT_TTL_MINUTES must not exceed HARD_TTL_MINUTES".into(),
            ));
        }
        if self.queue.sqs_max_batch_size <= 0 {
            return Err(LauncherError::ConfigError(
                "SQS_MAX_BATCH_SIZE must be greater than 0".into(),
            ));
        }
        if self.callback.enabled && self.callback.url.is_none() {
            return Err(LauncherError::ConfigError(
                "BROWSER_API_CALLBACK_ENABLED set but BROWSER_API_CALLBACK_URL missing".into(),
            ));
        }
        Ok(())
    }

    pub fn is_local_queue(&self) -> bool {
        self.queue.request_queue_url.is_empty() || self.queue.request_queue_url == "local"
    }

    /// Total size of the debug port range, inclusive.
    pub fn port_range_size(&self) -> u32 {
        u32::from(self.browser.chrome_port_end) - u32::from(self.browser.chrome_port_start) + 1
    }

    pub fn show_masked(&self) -> String {
        format!(
            "env={} pool(max={}, ttl={}m, hard_ttl={}m) ports={}-{} queue={} callback_enabled={}",
            self.env,
            self.pool.max_browser_instances,
            self.pool.default_ttl_minutes,
            self.pool.hard_ttl_minutes,
            self.browser.chrome_port_start,
            self.browser.chrome_port_end,
            if self.is_local_queue() { "local" } else { "<redacted>" },
            self.callback.enabled,
        )
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
