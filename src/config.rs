//! Process configuration from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

pub mod env {
    pub const OPERATOR_NAMESPACE: &str = "OPERATOR_NAMESPACE";
    pub const CONFIG_MAP_NAME: &str = "CONFIG_MAP_NAME";
    pub const PROMETHEUS_URL: &str = "PROMETHEUS_URL";
    pub const PROMETHEUS_TOKEN_FILE: &str = "PROMETHEUS_TOKEN_FILE";
    pub const SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";
    pub const METRICS_PORT: &str = "METRICS_PORT";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const RECONCILE_TIMEOUT_SECONDS: &str = "RECONCILE_TIMEOUT_SECONDS";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "muo",
    version,
    about = "Managed upgrade operator: node drain keeper and upgrade notifications"
)]
pub struct OperatorConfig {
    /// Namespace holding the UpgradeConfig and operator ConfigMap
    #[arg(long, env = env::OPERATOR_NAMESPACE, default_value = "openshift-managed-upgrade-operator")]
    pub namespace: String,

    /// ConfigMap with the operator's config.yaml
    #[arg(long, env = env::CONFIG_MAP_NAME, default_value = "managed-upgrade-operator-config")]
    pub config_map_name: String,

    /// Prometheus base URL for alert queries
    #[arg(
        long,
        env = env::PROMETHEUS_URL,
        default_value = "https://prometheus-k8s.openshift-monitoring.svc:9091"
    )]
    pub prometheus_url: String,

    /// File holding the bearer token for Prometheus
    #[arg(long, env = env::PROMETHEUS_TOKEN_FILE)]
    pub prometheus_token_file: Option<PathBuf>,

    /// Slack incoming webhook URL (notifications are only logged when unset)
    #[arg(long, env = env::SLACK_WEBHOOK_URL, hide_env_values = true)]
    pub slack_webhook_url: Option<String>,

    /// Metrics server port
    #[arg(long, env = env::METRICS_PORT, default_value = "8383")]
    pub metrics_port: u16,

    /// Health server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "8080")]
    pub health_port: u16,

    /// Deadline for a single reconciliation, in seconds
    #[arg(long, env = env::RECONCILE_TIMEOUT_SECONDS, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    pub reconcile_timeout_seconds: u64,

    /// Log output format
    #[arg(long, env = env::LOG_FORMAT, value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Log level when RUST_LOG is unset: trace, debug, info, warn, error
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,
}

impl OperatorConfig {
    pub const fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_seconds)
    }
}
