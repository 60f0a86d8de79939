//! Slack notification support via Incoming Webhooks.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{NotifyState, Notifier, build_message};
use crate::crd::UpgradeConfig;
use crate::error::MuoError;

/// Structured Slack message for Block Kit rendering.
pub struct SlackMessage {
    pub header: String,
    pub fields: Vec<(String, String)>,
    pub context: String,
}

/// Slack webhook client.
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Post a Block Kit message. Transport errors and non-2xx replies are errors.
    async fn send(&self, state: NotifyState, message: &SlackMessage) -> Result<(), MuoError> {
        let payload = build_blocks_payload(message);
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MuoError::Notification(state.to_string(), e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MuoError::Notification(
                state.to_string(),
                format!("Slack webhook returned {status}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify_state(&self, state: NotifyState, uc: &UpgradeConfig) -> Result<(), MuoError> {
        let message = build_message(state, uc);
        self.send(state, &message).await?;
        info!(
            upgrade_config = uc.name_or_unknown(),
            %state,
            header = message.header.as_str(),
            "Slack notification sent"
        );
        Ok(())
    }
}

/// Build a Slack Block Kit payload from a [`SlackMessage`].
fn build_blocks_payload(message: &SlackMessage) -> Value {
    let mut blocks: Vec<Value> = vec![json!({
        "type": "header",
        "text": {
            "type": "plain_text",
            "text": message.header,
            "emoji": true
        }
    })];

    if !message.fields.is_empty() {
        let fields: Vec<Value> = message
            .fields
            .iter()
            .map(|(label, value)| {
                json!({
                    "type": "mrkdwn",
                    "text": format!("*{label}*\n{value}")
                })
            })
            .collect();

        // Slack allows max 10 fields per section
        for chunk in fields.chunks(10) {
            blocks.push(json!({
                "type": "section",
                "fields": chunk
            }));
        }
    }

    blocks.push(json!({"type": "divider"}));
    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": message.context
        }]
    }));

    json!({
        "text": format!("{}\n{}", message.header, message.context),
        "blocks": blocks
    })
}
