//! Cluster alert queries against Prometheus and the upgrade sync gauge.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::MuoError;
use crate::telemetry::metrics::Metrics;

/// Response of the Prometheus instant query API.
#[allow(dead_code)]
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AlertResponse {
    pub status: String,
    #[serde(default)]
    pub data: AlertData,
}

#[allow(dead_code)]
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AlertData {
    #[serde(default)]
    pub result: Vec<AlertResult>,
}

/// One series: its labels and `[timestamp, "value"]` sample.
#[allow(dead_code)]
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AlertResult {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub value: Vec<serde_json::Value>,
}

/// Alert queries and upgrade progress gauges for phase logic.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlertReporter: Send + Sync {
    #[allow(dead_code)]
    async fn query(&self, promql: &str) -> Result<AlertResponse, MuoError>;

    /// Is `alert` firing in a checked namespace (or cluster-scoped) and outside the ignored ones?
    #[allow(dead_code)]
    async fn is_alert_firing(&self, alert: &str, checked: &[String], ignored: &[String]) -> Result<bool, MuoError>;

    fn update_synced_gauge(&self, name: &str);

    fn reset_synced_gauge(&self, name: &str);
}

#[allow(dead_code)]
pub struct PrometheusReporter {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    metrics: Arc<Metrics>,
}

impl PrometheusReporter {
    pub fn new(base_url: &str, token: Option<SecretString>, metrics: Arc<Metrics>) -> Result<Self, MuoError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|e| MuoError::Metrics(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            metrics,
        })
    }
}

/// PromQL selecting firing instances of `alert`.
///
/// Series without a namespace label always match the checked set.
#[allow(dead_code)]
pub fn alert_query(alert: &str, checked: &[String], ignored: &[String]) -> String {
    format!(
        r#"ALERTS{{alertstate="firing",alertname="{alert}",namespace=~"^$|{}",namespace!="{}"}}"#,
        checked.join("|"),
        ignored.join("|")
    )
}

#[async_trait]
impl AlertReporter for PrometheusReporter {
    async fn query(&self, promql: &str) -> Result<AlertResponse, MuoError> {
        let mut request = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| MuoError::Metrics(format!("could not query Prometheus: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MuoError::Metrics(format!("Prometheus returned {status}")));
        }

        let body: AlertResponse = resp
            .json()
            .await
            .map_err(|e| MuoError::Metrics(format!("invalid Prometheus response: {e}")))?;
        debug!(query = promql, series = body.data.result.len(), "Prometheus query");
        Ok(body)
    }

    async fn is_alert_firing(&self, alert: &str, checked: &[String], ignored: &[String]) -> Result<bool, MuoError> {
        let response = self.query(&alert_query(alert, checked, ignored)).await?;
        Ok(!response.data.result.is_empty())
    }

    fn update_synced_gauge(&self, name: &str) {
        self.metrics.set_upgradeconfig_synced(name, true);
    }

    fn reset_synced_gauge(&self, name: &str) {
        self.metrics.set_upgradeconfig_synced(name, false);
    }
}
