// File: manager/src/services/notification_service.rs
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::constants::{defaults, notifications};
use crate::errors::NotificationError;
use crate::outcome::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Backup,
    Restore,
    Verify,
    Prune,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Operation::Backup => "backup",
            Operation::Restore => "restore",
            Operation::Verify => "verify",
            Operation::Prune => "prune",
        };
        f.write_str(label)
    }
}

/// Structured outcome summary delivered to every channel
#[derive(Debug, Clone, Serialize)]
pub struct RunNotice {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub outcome: RunOutcome,
    pub database: String,
    pub artifact: Option<PathBuf>,
    pub failed_step: Option<String>,
    pub message: String,
    pub server_host: String,
    pub details: Option<serde_json::Value>,
}

impl RunNotice {
    pub fn new(operation: Operation, outcome: RunOutcome, database: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            outcome,
            database: database.to_string(),
            artifact: None,
            failed_step: None,
            message: message.into(),
            server_host: local_host(),
            details: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Option<PathBuf>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_failed_step(mut self, step: Option<String>) -> Self {
        self.failed_step = step;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn subject(&self) -> String {
        format!(
            "[backup-manager] {} {} for '{}' on {}",
            self.operation, self.outcome, self.database, self.server_host
        )
    }

    fn body(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if let Some(step) = &self.failed_step {
            lines.push(format!("Failed step: {}", step));
        }
        if let Some(artifact) = &self.artifact {
            lines.push(format!("Artifact: {}", artifact.display()));
        }
        lines.push(format!("Time: {}", self.timestamp.to_rfc3339()));
        lines.join("\n")
    }
}

fn local_host() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Per-channel delivery results, for logging only
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Best-effort delivery of run outcomes. Nothing here ever fails a run.
#[derive(Clone)]
pub struct NotificationDispatcher {
    client: Client,
    webhook_url: Option<String>,
    slack_webhook_url: Option<String>,
    email_to: Option<String>,
    sendmail_binary: String,
    delivery_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(config: &NotificationConfig) -> Self {
        let client = Client::builder()
            .timeout(notifications::DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            webhook_url: non_empty(&config.webhook_url),
            slack_webhook_url: non_empty(&config.slack_webhook_url),
            email_to: non_empty(&config.email_to),
            sendmail_binary: config
                .sendmail_binary
                .clone()
                .unwrap_or_else(|| defaults::SENDMAIL_BINARY.to_string()),
            delivery_timeout: notifications::DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some() || self.slack_webhook_url.is_some() || self.email_to.is_some()
    }

    /// Deliver to every configured channel concurrently
    pub async fn dispatch(&self, notice: &RunNotice) -> DispatchSummary {
        let mut deliveries: Vec<(&'static str, BoxFuture<'_, Result<(), NotificationError>>)> =
            Vec::new();

        if let Some(url) = &self.webhook_url {
            let payload = serde_json::to_value(notice).unwrap_or_default();
            deliveries.push(("webhook", self.post_json("webhook", url, payload).boxed()));
        }
        if let Some(url) = &self.slack_webhook_url {
            let payload = json!({ "text": format!("{}\n{}", notice.subject(), notice.body()) });
            deliveries.push(("slack", self.post_json("slack", url, payload).boxed()));
        }
        if let Some(to) = &self.email_to {
            deliveries.push(("email", self.send_mail(to, notice).boxed()));
        }

        let mut summary = DispatchSummary {
            attempted: deliveries.len(),
            ..Default::default()
        };
        if deliveries.is_empty() {
            debug!("No notification channels configured, skipping");
            return summary;
        }

        let (channels, futures): (Vec<_>, Vec<_>) = deliveries.into_iter().unzip();
        let results = join_all(futures).await;
        for (channel, result) in channels.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    info!("Notification sent via {} for {} on '{}'", channel, notice.operation, notice.database);
                    summary.delivered.push(channel.to_string());
                }
                Err(e) => {
                    warn!("{}", e);
                    summary.failed.push(channel.to_string());
                }
            }
        }
        summary
    }

    async fn post_json(
        &self,
        channel: &str,
        url: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotificationError> {
        match timeout(self.delivery_timeout, self.client.post(url).json(&payload).send()).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(NotificationError::Status {
                channel: channel.to_string(),
                status: response.status().as_u16(),
            }),
            Ok(Err(e)) => Err(NotificationError::Delivery {
                channel: channel.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(NotificationError::Timeout {
                channel: channel.to_string(),
            }),
        }
    }

    async fn send_mail(&self, to: &str, notice: &RunNotice) -> Result<(), NotificationError> {
        let message = format!(
            "To: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            to,
            notice.subject(),
            notice.body()
        );
        let delivery = async {
            let mut child = Command::new(&self.sendmail_binary)
                .arg("-t")
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| e.to_string())?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(message.as_bytes())
                    .await
                    .map_err(|e| e.to_string())?;
            }
            let status = child.wait().await.map_err(|e| e.to_string())?;
            if status.success() {
                Ok(())
            } else {
                Err(format!("{} exited with {}", self.sendmail_binary, status))
            }
        };

        match timeout(self.delivery_timeout, delivery).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(NotificationError::Delivery {
                channel: "email".to_string(),
                reason,
            }),
            Err(_) => Err(NotificationError::Timeout {
                channel: "email".to_string(),
            }),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}
