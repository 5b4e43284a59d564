//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Longest purge grace period accepted from configuration.
pub const MAX_QUARANTINE_DAYS: i64 = 3650;

/// Placeholder vocabulary: descriptions made only of these words carry no
/// information worth reusing.
const DEFAULT_PLACEHOLDER_WORDS: &[&str] = &[
    "мем", "мемы", "мемчик", "видео", "видос", "ролик", "клип", "смешно", "смешное", "смешной",
    "прикол", "приколы", "юмор", "стрим", "алерт", "без", "описания", "названия", "тег", "теги",
    "meme", "memes", "video", "clip", "funny", "lol", "humor", "stream", "alert", "no",
    "description", "title", "untitled", "tag", "tags",
];

const DEFAULT_HIGH_RISK_KEYWORDS: &[&str] = &[
    "nsfw", "porn", "порно", "gore", "расчлен", "suicide", "суицид", "nazi", "нацист",
    "swastika", "свастик", "terror", "теракт",
];

const DEFAULT_MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "18+", "sex", "секс", "blood", "кровь", "drugs", "наркот", "weapon", "оружие", "fight",
    "драка", "shock", "шок", "scream", "скример",
];

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master switch for the scheduler
    pub enabled: bool,
    /// Tick interval
    pub interval: Duration,
    /// Delay before the first tick
    pub initial_delay: Duration,
    /// Candidates examined per tick
    pub batch_size: usize,
    /// Claims older than this are considered abandoned
    pub stuck_threshold: Duration,
    /// Failed attempts before a submission becomes `failed_final`
    pub max_retries: i32,
    /// Deadline for one submission
    pub item_timeout: Duration,
    /// Backoff base (doubles per retry)
    pub retry_base: Duration,
    /// Backoff cap
    pub retry_max: Duration,

    /// Risk at or above this is `medium`
    pub medium_threshold: f64,
    /// Risk at or above this is `high`
    pub high_threshold: f64,
    /// Delay before a `high` asset may be purged
    pub quarantine_days: i64,
    /// Maximum tags kept per meme
    pub tag_limit: usize,

    pub vision_enabled: bool,
    pub metadata_enabled: bool,
    pub auto_approve_enabled: bool,
    /// Frames sampled for vision
    pub vision_frames: usize,
    /// Download size cap
    pub max_download_bytes: u64,
    /// Concurrent hash computations
    pub hash_concurrency: usize,
    /// Deadline for one hash computation
    pub hash_timeout: Duration,

    /// Submitter roles eligible for auto-approval
    pub auto_approve_roles: Vec<String>,
    /// Public locations eligible for auto-approval
    pub auto_approve_url_prefixes: Vec<String>,
    pub placeholder_words: Vec<String>,
    pub high_risk_keywords: Vec<String>,
    pub medium_risk_keywords: Vec<String>,

    /// Deployment identity; partitions the tick lock
    pub instance_id: String,
    /// Root for per-submission temp dirs
    pub work_dir: PathBuf,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Apply bundled migrations at startup
    pub run_migrations: bool,
    pub metrics_addr: Option<SocketAddr>,
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(15),
            batch_size: 5,
            stuck_threshold: Duration::from_secs(600),
            max_retries: 5,
            item_timeout: Duration::from_secs(300),
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(3600),
            medium_threshold: 0.4,
            high_threshold: 0.7,
            quarantine_days: 14,
            tag_limit: 8,
            vision_enabled: true,
            metadata_enabled: true,
            auto_approve_enabled: false,
            vision_frames: 4,
            max_download_bytes: 50 * 1024 * 1024,
            hash_concurrency: 2,
            hash_timeout: Duration::from_secs(60),
            auto_approve_roles: vec!["streamer".to_string(), "admin".to_string()],
            auto_approve_url_prefixes: vec!["/uploads/".to_string()],
            placeholder_words: to_strings(DEFAULT_PLACEHOLDER_WORDS),
            high_risk_keywords: to_strings(DEFAULT_HIGH_RISK_KEYWORDS),
            medium_risk_keywords: to_strings(DEFAULT_MEDIUM_RISK_KEYWORDS),
            instance_id: "default".to_string(),
            work_dir: PathBuf::from("/tmp/memalerts-ai"),
            shutdown_timeout: Duration::from_secs(30),
            database_url: None,
            database_max_connections: 5,
            run_migrations: false,
            metrics_addr: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|s| match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

/// Comma-separated list; an unset or blank variable keeps the default.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn default_instance_id() -> String {
    std::env::var("INSTANCE_ID")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_bool("AI_MODERATION_ENABLED").unwrap_or(d.enabled),
            interval: env_secs("AI_MODERATION_INTERVAL_SECS").unwrap_or(d.interval),
            initial_delay: env_secs("AI_MODERATION_INITIAL_DELAY_SECS").unwrap_or(d.initial_delay),
            batch_size: env_parse("AI_MODERATION_BATCH").unwrap_or(d.batch_size),
            stuck_threshold: env_secs("AI_MODERATION_STUCK_SECS").unwrap_or(d.stuck_threshold),
            max_retries: env_parse("AI_MODERATION_MAX_RETRIES").unwrap_or(d.max_retries),
            item_timeout: env_secs("AI_MODERATION_ITEM_TIMEOUT_SECS").unwrap_or(d.item_timeout),
            retry_base: env_secs("AI_MODERATION_RETRY_BASE_SECS").unwrap_or(d.retry_base),
            retry_max: env_secs("AI_MODERATION_RETRY_MAX_SECS").unwrap_or(d.retry_max),
            medium_threshold: env_parse("AI_MODERATION_MEDIUM_THRESHOLD")
                .unwrap_or(d.medium_threshold),
            high_threshold: env_parse("AI_MODERATION_HIGH_THRESHOLD").unwrap_or(d.high_threshold),
            quarantine_days: env_parse("AI_MODERATION_QUARANTINE_DAYS")
                .unwrap_or(d.quarantine_days),
            tag_limit: env_parse("AI_MODERATION_TAG_LIMIT").unwrap_or(d.tag_limit),
            vision_enabled: env_bool("AI_VISION_ENABLED").unwrap_or(d.vision_enabled),
            metadata_enabled: env_bool("AI_METADATA_ENABLED").unwrap_or(d.metadata_enabled),
            auto_approve_enabled: env_bool("AI_AUTO_APPROVE_ENABLED")
                .unwrap_or(d.auto_approve_enabled),
            vision_frames: env_parse("AI_VISION_FRAMES").unwrap_or(d.vision_frames),
            max_download_bytes: env_parse("AI_MAX_DOWNLOAD_BYTES").unwrap_or(d.max_download_bytes),
            hash_concurrency: env_parse("AI_HASH_CONCURRENCY").unwrap_or(d.hash_concurrency),
            hash_timeout: env_secs("AI_HASH_TIMEOUT_SECS").unwrap_or(d.hash_timeout),
            auto_approve_roles: env_list("AI_AUTO_APPROVE_ROLES").unwrap_or(d.auto_approve_roles),
            auto_approve_url_prefixes: env_list("AI_AUTO_APPROVE_URL_PREFIXES")
                .unwrap_or(d.auto_approve_url_prefixes),
            placeholder_words: env_list("AI_PLACEHOLDER_WORDS").unwrap_or(d.placeholder_words),
            high_risk_keywords: env_list("AI_HIGH_RISK_KEYWORDS").unwrap_or(d.high_risk_keywords),
            medium_risk_keywords: env_list("AI_MEDIUM_RISK_KEYWORDS")
                .unwrap_or(d.medium_risk_keywords),
            instance_id: default_instance_id(),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.work_dir),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(d.shutdown_timeout),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(d.database_max_connections),
            run_migrations: env_bool("DATABASE_RUN_MIGRATIONS").unwrap_or(d.run_migrations),
            metrics_addr: env_parse("METRICS_ADDR"),
        }
    }

    /// Reject incoherent settings.
    pub fn validate(&self) -> WorkerResult<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.medium_threshold) || !in_unit(self.high_threshold) {
            return Err(WorkerError::config_error("risk thresholds must be within [0, 1]"));
        }
        if self.medium_threshold > self.high_threshold {
            return Err(WorkerError::config_error(format!(
                "medium threshold {} exceeds high threshold {}",
                self.medium_threshold, self.high_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(WorkerError::config_error("AI_MODERATION_BATCH must be positive"));
        }
        if self.max_retries < 0 {
            return Err(WorkerError::config_error("AI_MODERATION_MAX_RETRIES must not be negative"));
        }
        if self.interval.is_zero() || self.item_timeout.is_zero() || self.hash_timeout.is_zero() {
            return Err(WorkerError::config_error("interval and timeouts must be non-zero"));
        }
        if self.stuck_threshold <= self.item_timeout {
            return Err(WorkerError::config_error(
                "AI_MODERATION_STUCK_SECS must exceed AI_MODERATION_ITEM_TIMEOUT_SECS",
            ));
        }
        if self.hash_concurrency == 0 {
            return Err(WorkerError::config_error("AI_HASH_CONCURRENCY must be positive"));
        }
        if !(0..=MAX_QUARANTINE_DAYS).contains(&self.quarantine_days) {
            return Err(WorkerError::config_error(format!(
                "AI_MODERATION_QUARANTINE_DAYS must be within 0..={MAX_QUARANTINE_DAYS}"
            )));
        }
        if self.retry_base > self.retry_max {
            return Err(WorkerError::config_error("retry base exceeds retry cap"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.retry_base, Duration::from_secs(5));
        assert!(!config.auto_approve_enabled);
    }

    #[test]
    fn test_threshold_order_is_checked() {
        let config = WorkerConfig {
            medium_threshold: 0.8,
            high_threshold: 0.7,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_range_is_checked() {
        let config = WorkerConfig {
            high_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stuck_threshold_must_exceed_item_timeout() {
        let config = WorkerConfig {
            stuck_threshold: Duration::from_secs(60),
            item_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quarantine_days_are_bounded() {
        for days in [-1, MAX_QUARANTINE_DAYS + 1, i64::MAX] {
            let config = WorkerConfig {
                quarantine_days: days,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{days} accepted");
        }
        let config = WorkerConfig {
            quarantine_days: MAX_QUARANTINE_DAYS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = WorkerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
