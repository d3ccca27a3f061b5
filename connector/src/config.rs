use profile_sync::config::{DEFAULT_BASE_URL, MAX_RETRIES, ReadFailurePolicy};
use profile_sync::{ClientConfig, RetryPolicy};
use sentry::types::Dsn;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("timeout_secs cannot be 0")]
    InvalidTimeout,
    #[error("max_retries cannot be 0")]
    InvalidRetries,
    #[error("event_batch_size cannot be 0")]
    InvalidBatchSize,
    #[error("concurrency cannot be 0")]
    InvalidConcurrency,
    #[error("api_key_env cannot be empty")]
    EmptyApiKeyEnv,
    #[error("default_list_id cannot be empty when set")]
    EmptyDefaultList,
    #[error("statsd_port cannot be 0")]
    InvalidStatsdPort,
    #[error("sentry_dsn is not a valid DSN")]
    InvalidSentryDsn,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CdpConfig {
    /// Base of the v3 API; `profiles` and `events` are resolved against it.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CdpConfig {
    fn default() -> Self {
        CdpConfig {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// List used for records that do not name one.
    pub default_list_id: Option<String>,
    /// Where processed profile and event keys are kept between runs.
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_event_batch_size")]
    pub event_batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Log what would be sent without calling the CDP.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Skip the profile upsert for emails already in the state file.
    #[serde(default)]
    pub skip_synced_profiles: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            default_list_id: None,
            state_file: None,
            event_batch_size: default_event_batch_size(),
            concurrency: default_concurrency(),
            dry_run: default_dry_run(),
            skip_synced_profiles: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

impl LoggingConfig {
    pub fn dsn(&self) -> Option<Dsn> {
        self.sentry_dsn.trim().parse().ok()
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cdp: CdpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub read_failure_policy: ReadFailurePolicy,
    #[serde(default)]
    pub sync: SyncConfig,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cdp.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.cdp.api_key_env.trim().is_empty() {
            return Err(ValidationError::EmptyApiKeyEnv);
        }
        if self.retry.max_retries == 0 {
            return Err(ValidationError::InvalidRetries);
        }
        if self.sync.event_batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.sync.concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        if let Some(list_id) = &self.sync.default_list_id
            && list_id.trim().is_empty()
        {
            return Err(ValidationError::EmptyDefaultList);
        }
        if let Some(metrics) = &self.metrics
            && metrics.statsd_port == 0
        {
            return Err(ValidationError::InvalidStatsdPort);
        }
        if let Some(logging) = &self.logging
            && logging.dsn().is_none()
        {
            return Err(ValidationError::InvalidSentryDsn);
        }
        Ok(())
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.cdp.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.cdp.api_key_env.clone()))
    }

    pub fn client_config(&self, api_key: String) -> ClientConfig {
        ClientConfig::new(self.cdp.base_url.as_str(), api_key)
            .with_timeout(Duration::from_secs(self.cdp.timeout_secs))
            .with_retry(RetryPolicy {
                max_attempts: self.retry.max_retries,
                delay: Duration::from_millis(self.retry.delay_ms),
            })
            .with_read_failure_policy(self.read_failure_policy)
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

fn default_api_key_env() -> String {
    "OPTIMIZELY_API_TOKEN".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_delay_ms() -> u64 {
    2000
}

fn default_event_batch_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    1
}

fn default_dry_run() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            cdp:
                base_url: https://api.example.com/v3
                api_key_env: CDP_KEY
                timeout_secs: 10
            retry:
                max_retries: 5
                delay_ms: 100
            read_failure_policy: fail_closed
            sync:
                default_list_id: base_store_purchases_only
                state_file: /var/lib/connector/processed.json
                event_batch_size: 50
                concurrency: 4
                dry_run: false
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://public@sentry.example.com/1
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let client = config.client_config("key".into());
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert_eq!(client.retry.max_attempts, 5);
        assert_eq!(client.retry.delay, Duration::from_millis(100));
        assert_eq!(client.read_failure_policy, ReadFailurePolicy::FailClosed);

        assert_eq!(config.cdp.base_url.as_str(), "https://api.example.com/v3");
        assert_eq!(config.cdp.api_key_env, "CDP_KEY");
        assert_eq!(config.read_failure_policy, ReadFailurePolicy::FailClosed);
        assert_eq!(
            config.sync.default_list_id.as_deref(),
            Some("base_store_purchases_only")
        );
        assert!(!config.sync.dry_run);
        assert_eq!(config.metrics.unwrap().statsd_port, 8125);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let tmp = write_tmp_file("{}");
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.cdp.base_url.as_str(), "https://api.zaius.com/v3");
        assert_eq!(config.cdp.api_key_env, "OPTIMIZELY_API_TOKEN");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.read_failure_policy, ReadFailurePolicy::FailOpen);
        assert!(config.sync.dry_run);
        assert_eq!(config.sync.event_batch_size, 100);
        assert!(config.metrics.is_none());
    }

    #[test]
    fn validation_errors() {
        let mut config = Config::default();
        config.validate().expect("defaults are valid");

        config.sync.concurrency = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidConcurrency));

        let mut config = Config::default();
        config.sync.default_list_id = Some(" ".into());
        assert_eq!(config.validate(), Err(ValidationError::EmptyDefaultList));

        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRetries));
    }

    #[test]
    fn invalid_sentry_dsn_is_rejected() {
        let tmp = write_tmp_file("logging:\n  sentry_dsn: not-a-dsn\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(ValidationError::InvalidSentryDsn))
        ));

        let mut config = Config::default();
        config.logging = Some(LoggingConfig {
            sentry_dsn: "https://public@sentry.example.com/1".into(),
        });
        assert_eq!(config.validate(), Ok(()));
        assert!(config.logging.unwrap().dsn().is_some());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let tmp = write_tmp_file("cdp:\n  base_url: not a url\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn missing_api_key() {
        let mut config = Config::default();
        config.cdp.api_key_env = "CONNECTOR_TEST_UNSET_KEY".into();
        assert!(matches!(
            config.api_key(),
            Err(ConfigError::MissingApiKey(name)) if name == "CONNECTOR_TEST_UNSET_KEY"
        ));
    }
}
