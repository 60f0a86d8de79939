//! Node drain strategies.
//!
//! A strategy is built per reconciliation for one cordoned node. It runs timed
//! drain mechanisms whose wait has elapsed since the cordon, and judges the
//! drain as failed only when the node has stayed cordoned past its time budget.
//! Mechanism errors are recorded in the results and never fail the drain by
//! themselves; the next reconciliation retries them.

pub mod pdb;
pub mod pods;
pub mod terminating;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::configmanager::ConfigValidator;
use crate::error::MuoError;
use pods::PodClient;

/// Shortest requeue while a drain is in its grace period.
pub const MIN_REQUEUE: Duration = Duration::from_secs(5);

/// Longest requeue while a drain is in its grace period.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for drain timing values (one week).
pub const MAX_DRAIN_MINUTES: u64 = 7 * 24 * 60;

/// Drain timing configuration, in minutes.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrain {
    /// Time budget for a cordoned node to drain.
    #[serde(rename = "timeOut")]
    pub timeout: u64,

    /// Time a drain is expected to take before mechanisms escalate.
    pub expected_node_drain_time: u64,
}

impl NodeDrain {
    pub fn timeout_duration(&self) -> chrono::Duration {
        minutes(self.timeout)
    }

    pub fn expected_drain_duration(&self) -> chrono::Duration {
        minutes(self.expected_node_drain_time)
    }
}

impl ConfigValidator for NodeDrain {
    fn validate(&self) -> Result<(), MuoError> {
        check_minutes("nodeDrain.timeOut", self.timeout)?;
        check_minutes("nodeDrain.expectedNodeDrainTime", self.expected_node_drain_time)
    }
}

fn check_minutes(key: &str, value: u64) -> Result<(), MuoError> {
    if value == 0 || value > MAX_DRAIN_MINUTES {
        return Err(MuoError::Config(format!(
            "{key} must be between 1 and {MAX_DRAIN_MINUTES} minutes, got {value}"
        )));
    }
    Ok(())
}

fn minutes(m: u64) -> chrono::Duration {
    i64::try_from(m)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .unwrap_or(chrono::Duration::MAX)
}

/// Outcome of one drain mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainStrategyResult {
    pub strategy: String,
    pub message: String,
    /// Error reported by the mechanism, if any.
    pub error: Option<String>,
}

/// A drain run for one cordoned node.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeDrainStrategy: Send + Sync {
    /// Run every mechanism whose wait has elapsed, in order.
    async fn execute(&self) -> Result<Vec<DrainStrategyResult>, MuoError>;

    /// Whether the drain has exceeded its time budget.
    async fn has_failed(&self, results: &[DrainStrategyResult]) -> Result<bool, MuoError>;
}

/// Builds a [`NodeDrainStrategy`] per reconciliation.
#[cfg_attr(test, automock)]
pub trait NodeDrainStrategyBuilder: Send + Sync {
    fn new_node_drain_strategy(
        &self,
        node: &Node,
        config: &NodeDrain,
        cordoned_at: DateTime<Utc>,
    ) -> Result<Box<dyn NodeDrainStrategy>, MuoError>;
}

/// A single drain mechanism.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DrainStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, node_name: &str) -> Result<DrainStrategyResult, MuoError>;
}

/// A mechanism that only runs once the node has been cordoned for `wait`.
pub struct TimedDrainStrategy {
    pub wait: chrono::Duration,
    pub strategy: Box<dyn DrainStrategy>,
}

/// Default strategy: escalating timed mechanisms under a fixed time budget.
pub struct OsdDrainStrategy {
    node_name: String,
    cordoned_at: DateTime<Utc>,
    timeout: chrono::Duration,
    strategies: Vec<TimedDrainStrategy>,
}

impl OsdDrainStrategy {
    pub fn new(
        node_name: &str,
        cordoned_at: DateTime<Utc>,
        timeout: chrono::Duration,
        strategies: Vec<TimedDrainStrategy>,
    ) -> Self {
        Self {
            node_name: node_name.to_string(),
            cordoned_at,
            timeout,
            strategies,
        }
    }
}

#[async_trait]
impl NodeDrainStrategy for OsdDrainStrategy {
    async fn execute(&self) -> Result<Vec<DrainStrategyResult>, MuoError> {
        let elapsed = Utc::now().signed_duration_since(self.cordoned_at);
        let mut results = Vec::new();

        for timed in &self.strategies {
            let name = timed.strategy.name();
            if elapsed < timed.wait {
                debug!(node = %self.node_name, strategy = name, "Drain strategy not due yet");
                continue;
            }

            match timed.strategy.execute(&self.node_name).await {
                Ok(result) => {
                    info!(node = %self.node_name, strategy = name, message = %result.message, "Drain strategy executed");
                    results.push(result);
                }
                Err(e) => {
                    warn!(node = %self.node_name, strategy = name, error = %e, "Drain strategy failed");
                    results.push(DrainStrategyResult {
                        strategy: name.to_string(),
                        message: format!("{name} failed"),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(results)
    }

    async fn has_failed(&self, results: &[DrainStrategyResult]) -> Result<bool, MuoError> {
        let elapsed = Utc::now().signed_duration_since(self.cordoned_at);
        let failed = elapsed > self.timeout;
        debug!(
            node = %self.node_name,
            elapsed_minutes = elapsed.num_minutes(),
            timeout_minutes = self.timeout.num_minutes(),
            mechanism_errors = results.iter().filter(|r| r.error.is_some()).count(),
            failed,
            "Drain failure check"
        );
        Ok(failed)
    }
}

/// Builds [`OsdDrainStrategy`] instances backed by the Kubernetes API.
pub struct OsdDrainStrategyBuilder {
    pods: Arc<dyn PodClient>,
}

impl OsdDrainStrategyBuilder {
    pub fn new(pods: Arc<dyn PodClient>) -> Self {
        Self { pods }
    }
}

impl NodeDrainStrategyBuilder for OsdDrainStrategyBuilder {
    fn new_node_drain_strategy(
        &self,
        node: &Node,
        config: &NodeDrain,
        cordoned_at: DateTime<Utc>,
    ) -> Result<Box<dyn NodeDrainStrategy>, MuoError> {
        let node_name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| MuoError::drain("builder", "node has no name"))?;

        let strategies = vec![
            TimedDrainStrategy {
                wait: config.expected_drain_duration(),
                strategy: Box::new(pdb::PdbPodRemoval::new(self.pods.clone())),
            },
            TimedDrainStrategy {
                wait: config.expected_drain_duration(),
                strategy: Box::new(terminating::StuckTerminatingPodRemoval::new(self.pods.clone())),
            },
        ];

        Ok(Box::new(OsdDrainStrategy::new(
            node_name,
            cordoned_at,
            config.timeout_duration(),
            strategies,
        )))
    }
}

/// Delay until the next drain checkpoint for a node still in its grace period.
///
/// Checkpoints are the mechanism escalation time and the deadline. The delay
/// targets the checkpoint itself, clamped to [`MIN_REQUEUE`, `POLL_INTERVAL`],
/// so a missed deadline is detected at most `MIN_REQUEUE` after it passes.
/// A cordon timestamp ahead of `now` (clock skew) counts as negative elapsed time.
pub fn next_check(cordoned_at: DateTime<Utc>, config: &NodeDrain, now: DateTime<Utc>) -> Duration {
    let elapsed = now.signed_duration_since(cordoned_at);
    let until = [config.expected_drain_duration(), config.timeout_duration()]
        .into_iter()
        .filter(|checkpoint| *checkpoint > elapsed)
        .filter_map(|checkpoint| checkpoint.checked_sub(&elapsed))
        .min();

    until
        .and_then(|d| d.to_std().ok())
        .map_or(MIN_REQUEUE, |d| d.clamp(MIN_REQUEUE, POLL_INTERVAL))
}
