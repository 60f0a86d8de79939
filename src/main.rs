//! muo - managed upgrade operator.
//!
//! Supervises node drains while the worker machine pool rolls out an upgrade
//! and delivers one notification per upgrade lifecycle state.

mod alerts;
mod config;
mod configmanager;
mod controller;
mod crd;
mod drain;
mod error;
mod eventmanager;
mod machinery;
mod nodekeeper;
mod notify;
mod telemetry;
mod upgradeconfig;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use const_format::concatcp;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::runtime::Controller;
use kube::runtime::watcher::Config;
use secrecy::SecretString;
use tracing::{error, info};

use config::{LogFormat, OperatorConfig};
use crd::UpgradeConfig;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("GIT_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");
pub const USER_AGENT: &str = concatcp!("muo/", VERSION);

/// Nodes supervised by the node keeper.
const WORKER_NODE_SELECTOR: &str = "node-role.kubernetes.io/worker";

#[tokio::main]
async fn main() {
    let config = OperatorConfig::parse();

    if let Err(e) = init_tracing(config.log_format, &config.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        version = VERSION,
        commit = COMMIT,
        build_date = BUILD_DATE,
        "Starting muo"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Operator failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat, level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    match format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(true)
            .init(),
        LogFormat::Text => fmt().with_env_filter(filter).compact().with_target(true).init(),
    }

    Ok(())
}

async fn read_token(path: Option<&std::path::Path>) -> Result<Option<SecretString>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let token = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read Prometheus token from {}", path.display()))?;
    Ok(Some(SecretString::from(token.trim().to_string())))
}

async fn run(config: OperatorConfig) -> Result<()> {
    let client = kube::Client::try_default().await?;
    info!(namespace = %config.namespace, "Connected to Kubernetes API server");

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(telemetry::metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let health_state = telemetry::health::HealthState::new();
    let health_port = config.health_port;
    let health_clone = health_state.clone();
    tokio::spawn(async move {
        if let Err(e) = telemetry::serve_health(health_port, health_clone).await {
            error!(error = %e, "Health server failed");
        }
    });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = telemetry::serve_metrics(metrics_port, registry).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    // Collaborators
    let upgrade_configs: Arc<dyn upgradeconfig::UpgradeConfigManager> = Arc::new(
        upgradeconfig::KubeUpgradeConfigManager::new(client.clone(), &config.namespace),
    );
    let config_manager = configmanager::ConfigManager::new(Arc::new(configmanager::ConfigMapSource::new(
        client.clone(),
        &config.namespace,
        &config.config_map_name,
    )));
    let pods: Arc<dyn drain::pods::PodClient> = Arc::new(drain::pods::KubePodClient::new(client.clone()));
    let notifier = notify::build_notifier(config.slack_webhook_url.as_deref());
    let token = read_token(config.prometheus_token_file.as_deref()).await?;
    let reporter: Arc<dyn alerts::AlertReporter> = Arc::new(alerts::PrometheusReporter::new(
        &config.prometheus_url,
        token,
        metrics.clone(),
    )?);

    let keeper = nodekeeper::NodeKeeper::new(
        upgrade_configs.clone(),
        Arc::new(machinery::KubeMachinery::new(client.clone())),
        Arc::new(nodekeeper::KubeNodeClient::new(client.clone())),
        config_manager,
        Arc::new(drain::OsdDrainStrategyBuilder::new(pods)),
        metrics.clone(),
    );
    let node_ctx = Arc::new(controller::nodekeeper::Context {
        keeper,
        metrics: metrics.clone(),
        reconcile_timeout: config.reconcile_timeout(),
    });
    let notification_ctx = Arc::new(controller::notification::Context {
        events: eventmanager::EventManager::new(upgrade_configs, notifier, metrics.clone()),
        reporter,
        metrics,
        reconcile_timeout: config.reconcile_timeout(),
    });

    let nodes: Api<Node> = Api::all(client.clone());
    let node_controller = Controller::new(nodes, Config::default().labels(WORKER_NODE_SELECTOR))
        .run(
            controller::nodekeeper::reconcile,
            controller::nodekeeper::error_policy,
            node_ctx,
        )
        .for_each(|res| async move {
            match res {
                Ok((node, _)) => info!(node = %node.name, "Node reconciled"),
                Err(e) => error!(error = %e, "Node reconcile failed"),
            }
        });

    let upgrade_config_api: Api<UpgradeConfig> = Api::namespaced(client, &config.namespace);
    let notification_controller = Controller::new(upgrade_config_api, Config::default())
        .run(
            controller::notification::reconcile,
            controller::notification::error_policy,
            notification_ctx,
        )
        .for_each(|res| async move {
            match res {
                Ok((uc, _)) => info!(upgrade_config = %uc.name, "UpgradeConfig reconciled"),
                Err(e) => error!(error = %e, "UpgradeConfig reconcile failed"),
            }
        });

    health_state.set_ready(true);
    info!("Starting node keeper and notification controllers");
    futures::join!(node_controller, notification_controller);

    Ok(())
}
