use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chrono_tz::Tz;

use crate::error::{AppError, Result};
use crate::models::SourceKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// IANA zone used for schedule times and batch dates.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_minutes: u32,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fallback when the `morning_time` setting is absent.
    #[serde(default = "default_morning")]
    pub morning: String,
    #[serde(default = "default_evening")]
    pub evening: String,
    #[serde(default = "default_tick")]
    pub tick_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Enabled sources; dedup priority is fixed by `SourceKind` order.
    #[serde(default = "default_enabled_sources")]
    pub enabled: Vec<SourceKind>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub producthunt_client_id: Option<String>,
    pub producthunt_client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_related_threshold")]
    pub related_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerBackend {
    Api,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_backend")]
    pub backend: SummarizerBackend,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Program and arguments for the `command` backend; prompt goes to stdin.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default = "default_summary_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_content")]
    pub max_content_chars: usize,
    /// Pauses between attempts; one retry per entry.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_base_url: String,
    #[serde(default = "default_message_pause")]
    pub message_pause_ms: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tech-digest");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("digest.db").to_string_lossy().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_lock_ttl() -> u32 {
    30
}

fn default_morning() -> String {
    "09:00".to_string()
}

fn default_evening() -> String {
    "21:00".to_string()
}

fn default_tick() -> u64 {
    30
}

fn default_enabled_sources() -> Vec<SourceKind> {
    SourceKind::ALL.to_vec()
}

fn default_limit() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    10
}

fn default_related_threshold() -> f64 {
    0.5
}

fn default_backend() -> SummarizerBackend {
    SummarizerBackend::Api
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_command() -> Vec<String> {
    vec!["claude".to_string(), "-p".to_string()]
}

fn default_summary_timeout() -> u64 {
    120
}

fn default_max_content() -> usize {
    10_000
}

fn default_retry_delays() -> Vec<u64> {
    vec![2, 4, 8]
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_message_pause() -> u64 {
    1000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            morning: default_morning(),
            evening: default_evening(),
            tick_seconds: default_tick(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_sources(),
            limit: default_limit(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
            producthunt_client_id: None,
            producthunt_client_secret: None,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            related_threshold: default_related_threshold(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            api_key: None,
            model: default_model(),
            command: default_command(),
            timeout_secs: default_summary_timeout(),
            max_content_chars: default_max_content(),
            retry_delays_secs: default_retry_delays(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base_url: default_telegram_api(),
            message_pause_ms: default_message_pause(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            timezone: default_timezone(),
            lock_ttl_minutes: default_lock_ttl(),
            schedule: ScheduleConfig::default(),
            sources: SourcesConfig::default(),
            dedup: DedupConfig::default(),
            summarizer: SummarizerConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location), writing defaults out when
    /// the file does not exist yet, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tech-digest")
            .join("config.toml")
    }

    /// Environment wins over the file. Secrets are expected to live here.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("DIGEST_DB_PATH") {
            self.db_path = v;
        }
        if let Some(v) = non_empty("DIGEST_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = non_empty("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = non_empty("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = non_empty("PRODUCTHUNT_CLIENT_ID") {
            self.sources.producthunt_client_id = Some(v);
        }
        if let Some(v) = non_empty("PRODUCTHUNT_CLIENT_SECRET") {
            self.sources.producthunt_client_secret = Some(v);
        }
        if let Some(v) = non_empty("ANTHROPIC_API_KEY") {
            self.summarizer.api_key = Some(v);
        }
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AppError::Config(format!("unknown timezone: {}", self.timezone)))
    }

    /// Everything a fetch → summarize → deliver run needs. Failing here must
    /// keep the process from starting.
    pub fn validate_for_pipeline(&self) -> Result<()> {
        let mut missing = Vec::new();

        if is_blank(&self.telegram.bot_token) {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if is_blank(&self.telegram.chat_id) {
            missing.push("TELEGRAM_CHAT_ID");
        }
        if self.sources.enabled.contains(&SourceKind::ProductHunt) {
            if is_blank(&self.sources.producthunt_client_id) {
                missing.push("PRODUCTHUNT_CLIENT_ID");
            }
            if is_blank(&self.sources.producthunt_client_secret) {
                missing.push("PRODUCTHUNT_CLIENT_SECRET");
            }
        }
        match self.summarizer.backend {
            SummarizerBackend::Api if is_blank(&self.summarizer.api_key) => {
                missing.push("ANTHROPIC_API_KEY");
            }
            SummarizerBackend::Command if self.summarizer.command.is_empty() => {
                return Err(AppError::Config(
                    "summarizer.command must name a program".to_string(),
                ));
            }
            _ => {}
        }

        if !missing.is_empty() {
            return Err(AppError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if self.sources.enabled.is_empty() {
            return Err(AppError::Config("no sources enabled".to_string()));
        }
        if self.sources.max_attempts == 0 {
            return Err(AppError::Config("sources.max_attempts must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.dedup.related_threshold) {
            return Err(AppError::Config(
                "dedup.related_threshold must be in [0.0, 1.0]".to_string(),
            ));
        }

        self.tz()?;
        crate::batch::scheduler::parse_hhmm(&self.schedule.morning)?;
        crate::batch::scheduler::parse_hhmm(&self.schedule.evening)?;
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config {
        let mut config = Config::default();
        config.telegram.bot_token = Some("123:abc".to_string());
        config.telegram.chat_id = Some("42".to_string());
        config.sources.producthunt_client_id = Some("id".to_string());
        config.sources.producthunt_client_secret = Some("secret".to_string());
        config.summarizer.api_key = Some("key".to_string());
        config
    }

    #[test]
    fn complete_config_validates() {
        assert!(complete().validate_for_pipeline().is_ok());
    }

    #[test]
    fn missing_telegram_credentials_are_fatal() {
        let mut config = complete();
        config.telegram.bot_token = None;
        let err = config.validate_for_pipeline().unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn producthunt_credentials_only_required_when_enabled() {
        let mut config = complete();
        config.sources.producthunt_client_id = None;
        assert!(config.validate_for_pipeline().is_err());

        config.sources.enabled.retain(|s| *s != SourceKind::ProductHunt);
        assert!(config.validate_for_pipeline().is_ok());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "TELEGRAM_CHAT_ID" => Some("99".to_string()),
            "DIGEST_DB_PATH" => Some("/tmp/x.db".to_string()),
            "ANTHROPIC_API_KEY" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram.chat_id.as_deref(), Some("99"));
        assert_eq!(config.db_path, "/tmp/x.db");
        assert!(config.summarizer.api_key.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "digest.db"

            [sources]
            enabled = ["hackernews", "github"]
            limit = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.sources.limit, 5);
        assert_eq!(config.sources.max_attempts, 3);
        assert_eq!(config.sources.enabled, vec![SourceKind::HackerNews, SourceKind::GitHub]);
        assert_eq!(config.dedup.batch_size, 10);
        assert_eq!(config.schedule.morning, "09:00");
    }

    #[test]
    fn bad_schedule_time_is_rejected() {
        let mut config = complete();
        config.schedule.evening = "25:99".to_string();
        assert!(config.validate_for_pipeline().is_err());
    }
}
