//! Mock webhook server for testing notification delivery
//!
//! Simulates the generic JSON and Slack endpoints so tests can check
//! what the dispatcher sent.

use serde_json::Value;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub struct MockWebhookServer {
    pub server: MockServer,
}

impl MockWebhookServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Accept deliveries on `/webhook` and `/slack`
    pub async fn mock_success(&self) {
        for route in ["/webhook", "/slack"] {
            Mock::given(method("POST"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200))
                .mount(&self.server)
                .await;
        }
    }

    pub async fn mock_failure(&self, status_code: u16) {
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(status_code))
            .mount(&self.server)
            .await;
    }

    /// Respond only after `delay`
    pub async fn mock_slow(&self, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.server.uri())
    }

    pub fn slack_url(&self) -> String {
        format!("{}/slack", self.server.uri())
    }

    /// JSON bodies received on `route`, in arrival order
    pub async fn bodies(&self, route: &str) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == route)
            .filter_map(|request| request.body_json::<Value>().ok())
            .collect()
    }
}
