use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::convergence::ConvergenceConfig;
use super::request::RoutingMode;

/// Main configuration structure for simroute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Convergence loop parameters
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Intent routing configuration
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Specialist dispatcher configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Per-request event stream configuration
    #[serde(default)]
    pub events: EventsConfig,

    /// Spec fingerprinting and tool invocation configuration
    #[serde(default)]
    pub invoker: InvokerConfig,

    /// Run store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// External simulation engine configuration
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Probabilistic classifier configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-tool logging templates keyed by tool name.
    ///
    /// Placeholders: `{tool_name}`, `{agent}`, `{run_id}`, `{iteration}`.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            convergence: ConvergenceConfig::default(),
            routing: RoutingConfig::default(),
            dispatch: DispatchConfig::default(),
            events: EventsConfig::default(),
            invoker: InvokerConfig::default(),
            database: DatabaseConfig::default(),
            simulation: SimulationConfig::default(),
            classifier: ClassifierConfig::default(),
            logging: LoggingConfig::default(),
            templates: BTreeMap::new(),
        }
    }
}

/// Intent routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoutingConfig {
    /// Mode used when a request does not ask for one explicitly
    #[serde(default)]
    pub default_mode: RoutingMode,

    /// Hard timeout for the external classifier in milliseconds
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,

    /// Classifier answers below this confidence fall back to the rules
    #[serde(default)]
    pub min_classifier_confidence: f64,
}

const fn default_classifier_timeout_ms() -> u64 {
    5000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_mode: RoutingMode::default(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            min_classifier_confidence: 0.0,
        }
    }
}

/// Specialist dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Maximum concurrent simulation calls in one sweep
    #[serde(default = "default_sweep_parallelism")]
    pub sweep_parallelism: usize,

    /// |z| above which two runs are reported as significantly different
    #[serde(default = "default_significance_z")]
    pub significance_z: f64,

    /// Default cap on records returned by lookups
    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,
}

const fn default_sweep_parallelism() -> usize {
    4
}

const fn default_significance_z() -> f64 {
    2.0
}

const fn default_query_limit() -> usize {
    50
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sweep_parallelism: default_sweep_parallelism(),
            significance_z: default_significance_z(),
            default_query_limit: default_query_limit(),
        }
    }
}

/// Per-request event stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventsConfig {
    /// Bounded channel capacity per request stream
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Events retained per request for late subscribers (0 disables replay)
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    /// Finished requests whose closed stream and terminal result stay in
    /// memory; older ones are evicted (stored runs are unaffected)
    #[serde(default = "default_retained_requests")]
    pub retained_requests: usize,
}

const fn default_channel_capacity() -> usize {
    256
}

const fn default_replay_capacity() -> usize {
    64
}

const fn default_retained_requests() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            replay_capacity: default_replay_capacity(),
            retained_requests: default_retained_requests(),
        }
    }
}

/// Spec fingerprinting and tool invocation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InvokerConfig {
    /// Spec fields ignored by fingerprinting at any nesting level
    #[serde(default = "default_transient_fields")]
    pub transient_fields: Vec<String>,

    /// Keep completed results of cacheable tools for identical later calls
    #[serde(default = "default_cache_completed")]
    pub cache_completed: bool,
}

fn default_transient_fields() -> Vec<String> {
    ["created_at", "submitted_at", "timestamp", "request_id"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_cache_completed() -> bool {
    true
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            transient_fields: default_transient_fields(),
            cache_completed: default_cache_completed(),
        }
    }
}

/// Run store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// `SQLite` database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:.simroute/runs.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// External simulation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulationConfig {
    /// Executable invoked once per simulation call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Extra arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_simulation_timeout")]
    pub timeout_secs: u64,
}

const fn default_simulation_timeout() -> u64 {
    900
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_simulation_timeout(),
        }
    }
}

/// Probabilistic classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClassifierConfig {
    /// Enable the external classifier
    #[serde(default)]
    pub enabled: bool,

    /// API key (can also be set via ANTHROPIC_API_KEY env var)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for API (for testing/proxies)
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,

    /// Model to use
    #[serde(default = "default_classifier_model")]
    pub model: String,

    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_classifier_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_classifier_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

const fn default_requests_per_second() -> u32 {
    5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            base_url: default_classifier_base_url(),
            model: default_classifier_model(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for rolling JSON log files (stderr only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}
