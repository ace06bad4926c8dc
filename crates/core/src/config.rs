use serde::Deserialize;

use crate::error::{CampaignError, CampaignResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Segmentation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// Customers pulled from the store per page while evaluating a segment.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Upper bound on the page size accepted by segment previews.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

fn default_page_size() -> usize { 500 }
fn default_preview_limit() -> usize { 100 }

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            preview_limit: default_preview_limit(),
        }
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// How send times are assigned when per-customer prediction is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadPolicy {
    /// Every record is scheduled at the window start.
    #[default]
    WindowStart,
    /// Records are spaced evenly across the window in audience order.
    Even,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub spread_policy: SpreadPolicy,
    #[serde(default = "default_predictor_timeout_ms")]
    pub predictor_timeout_ms: u64,
    #[serde(default = "default_predictor_concurrency")]
    pub predictor_concurrency: usize,
    /// Window length used when a draft campaign is started without a schedule.
    #[serde(default = "default_window_hours")]
    pub default_window_hours: i64,
}

fn default_predictor_timeout_ms() -> u64 { 2000 }
fn default_predictor_concurrency() -> usize { 16 }
fn default_window_hours() -> i64 { 24 }

impl SchedulerConfig {
    /// `default_window_hours` as a duration. Non-positive or out-of-range
    /// values are configuration errors.
    pub fn default_window(&self) -> CampaignResult<chrono::Duration> {
        let hours = self.default_window_hours;
        if hours < 1 {
            return Err(CampaignError::Config(format!(
                "scheduler.default_window_hours must be at least 1, got {hours}"
            )));
        }
        chrono::Duration::try_hours(hours).ok_or_else(|| {
            CampaignError::Config(format!(
                "scheduler.default_window_hours {hours} is out of range"
            ))
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            spread_policy: SpreadPolicy::default(),
            predictor_timeout_ms: default_predictor_timeout_ms(),
            predictor_concurrency: default_predictor_concurrency(),
            default_window_hours: default_window_hours(),
        }
    }
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts allowed per recipient, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff; doubles with every failed attempt.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_max_attempts() -> u32 { 1 }
fn default_backoff_secs() -> u64 { 300 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrent_dispatches() -> usize { 32 }
fn default_provider_timeout_ms() -> u64 { 10_000 }
fn default_tick_interval_ms() -> u64 { 5_000 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
            provider_timeout_ms: default_provider_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            retry: RetryConfig::default(),
        }
    }
}

// ─── Channels ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_from_number")]
    pub from_number: String,
    #[serde(default)]
    pub status_callback_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: SmsConfig,
}

fn default_from_email() -> String { "campaigns@campaignexpress.io".to_string() }
fn default_from_name() -> String { "Campaign Express".to_string() }
fn default_from_number() -> String { "+15550000000".to_string() }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            from_number: default_from_number(),
            status_callback_url: None,
        }
    }
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            segmentation: SegmentationConfig::default(),
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CAMPAIGN_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
