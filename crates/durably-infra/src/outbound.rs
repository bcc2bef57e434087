//! Outbound adapters for the approval workflow's ports.
//!
//! The HTTP adapters deliver callback tokens to the approval topic and the
//! two command endpoints. Non-2xx responses surface as
//! [`CommandError::Status`] so retry policies can classify them. When an
//! endpoint is not configured the `Log*` adapters only log the token, which
//! lets an operator drive the workflow by hand with `durably approve`.

use std::time::Duration;

use durably_core::approval::{ApprovalNotifier, CommandDispatcher, CommandError};
use durably_types::config::EndpointConfig;
use serde_json::json;

/// Timeout for a single outbound request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> Result<reqwest::Client, CommandError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| CommandError::Transport(format!("failed to build HTTP client: {e}")))
}

async fn check_response(
    target: &str,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<(), CommandError> {
    let response = response.map_err(|e| {
        tracing::warn!(target_url = target, error = %e, "outbound request failed");
        CommandError::Transport(e.to_string())
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(target_url = target, status = status.as_u16(), body = %body, "outbound request rejected");
    Err(CommandError::Status {
        status: status.as_u16(),
    })
}

fn callback_link(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}callbackId={token}")
}

// ---------------------------------------------------------------------------
// Approval notifier
// ---------------------------------------------------------------------------

/// Publishes the approval link to a notification topic over HTTP.
pub struct HttpApprovalNotifier {
    client: reqwest::Client,
    topic_url: String,
    approval_api_url: String,
}

impl HttpApprovalNotifier {
    pub fn new(topic_url: String, approval_api_url: String) -> Result<Self, CommandError> {
        Ok(Self {
            client: build_client()?,
            topic_url,
            approval_api_url,
        })
    }
}

impl ApprovalNotifier for HttpApprovalNotifier {
    async fn send_approval(&self, callback_token: &str) -> Result<(), CommandError> {
        let message = callback_link(&self.approval_api_url, callback_token);
        tracing::info!(topic = %self.topic_url, "sending approval request");
        let response = self
            .client
            .post(&self.topic_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(message)
            .send()
            .await;
        check_response(&self.topic_url, response).await
    }
}

/// Logs the approval token instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl ApprovalNotifier for LogNotifier {
    async fn send_approval(&self, callback_token: &str) -> Result<(), CommandError> {
        tracing::info!(callback_token, "approval requested (no approval endpoint configured)");
        Ok(())
    }
}

/// Notifier chosen from the endpoint configuration.
pub enum ConfiguredNotifier {
    Http(HttpApprovalNotifier),
    Log(LogNotifier),
}

impl ConfiguredNotifier {
    pub fn from_endpoints(endpoints: &EndpointConfig) -> Result<Self, CommandError> {
        match (&endpoints.approval_topic_url, &endpoints.approval_api_url) {
            (Some(topic), Some(api)) => Ok(Self::Http(HttpApprovalNotifier::new(
                topic.clone(),
                api.clone(),
            )?)),
            (None, None) => Ok(Self::Log(LogNotifier)),
            _ => Err(CommandError::NotConfigured(
                "approval_topic_url and approval_api_url must be set together".to_string(),
            )),
        }
    }
}

impl ApprovalNotifier for ConfiguredNotifier {
    async fn send_approval(&self, callback_token: &str) -> Result<(), CommandError> {
        match self {
            Self::Http(n) => n.send_approval(callback_token).await,
            Self::Log(n) => n.send_approval(callback_token).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatcher
// ---------------------------------------------------------------------------

/// Dispatches the two commands over HTTP.
///
/// Command one is enqueued as a JSON message; command two calls an HTTP
/// endpoint directly and carries the token in the query string.
pub struct HttpCommandDispatcher {
    client: reqwest::Client,
    queue_url: Option<String>,
    command_url: Option<String>,
}

impl HttpCommandDispatcher {
    pub fn new(queue_url: Option<String>, command_url: Option<String>) -> Result<Self, CommandError> {
        Ok(Self {
            client: build_client()?,
            queue_url,
            command_url,
        })
    }
}

impl CommandDispatcher for HttpCommandDispatcher {
    async fn command_one(&self, callback_token: &str) -> Result<(), CommandError> {
        let Some(url) = &self.queue_url else {
            return LogCommandDispatcher.command_one(callback_token).await;
        };
        tracing::info!(queue = %url, "enqueueing command one");
        let response = self
            .client
            .post(url)
            .json(&json!({ "callbackId": callback_token }))
            .send()
            .await;
        check_response(url, response).await
    }

    async fn command_two(&self, callback_token: &str) -> Result<(), CommandError> {
        let Some(url) = &self.command_url else {
            return LogCommandDispatcher.command_two(callback_token).await;
        };
        let target = callback_link(url, callback_token);
        tracing::info!(url = %url, "calling command two");
        let response = self.client.post(&target).send().await;
        check_response(url, response).await
    }
}

/// Logs command tokens instead of dispatching them.
#[derive(Debug, Default)]
pub struct LogCommandDispatcher;

impl CommandDispatcher for LogCommandDispatcher {
    async fn command_one(&self, callback_token: &str) -> Result<(), CommandError> {
        tracing::info!(callback_token, "command one requested (no queue configured)");
        Ok(())
    }

    async fn command_two(&self, callback_token: &str) -> Result<(), CommandError> {
        tracing::info!(callback_token, "command two requested (no endpoint configured)");
        Ok(())
    }
}

/// Dispatcher chosen from the endpoint configuration.
pub enum ConfiguredDispatcher {
    Http(HttpCommandDispatcher),
    Log(LogCommandDispatcher),
}

impl ConfiguredDispatcher {
    pub fn from_endpoints(endpoints: &EndpointConfig) -> Result<Self, CommandError> {
        if endpoints.command_queue_url.is_none() && endpoints.command_url.is_none() {
            return Ok(Self::Log(LogCommandDispatcher));
        }
        Ok(Self::Http(HttpCommandDispatcher::new(
            endpoints.command_queue_url.clone(),
            endpoints.command_url.clone(),
        )?))
    }
}

impl CommandDispatcher for ConfiguredDispatcher {
    async fn command_one(&self, callback_token: &str) -> Result<(), CommandError> {
        match self {
            Self::Http(d) => d.command_one(callback_token).await,
            Self::Log(d) => d.command_one(callback_token).await,
        }
    }

    async fn command_two(&self, callback_token: &str) -> Result<(), CommandError> {
        match self {
            Self::Http(d) => d.command_two(callback_token).await,
            Self::Log(d) => d.command_two(callback_token).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
