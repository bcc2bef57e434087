//! Outbound ports used by the approval workflow.

use std::future::Future;

use crate::workflow::error::TaskError;

/// Failure of an outbound command or notification.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The endpoint answered with a non-success status.
    #[error("endpoint returned status {status}")]
    Status { status: u16 },

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint not configured: {0}")]
    NotConfigured(String),
}

impl From<CommandError> for TaskError {
    fn from(e: CommandError) -> Self {
        let message = e.to_string();
        match e {
            CommandError::Status { status } => TaskError::status(status, message),
            _ => TaskError::new(message),
        }
    }
}

/// Sends the approval request carrying a callback token to a human.
pub trait ApprovalNotifier: Send + Sync {
    fn send_approval(
        &self,
        callback_token: &str,
    ) -> impl Future<Output = Result<(), CommandError>> + Send;
}

/// Starts the two long-running commands; each reports back via its token.
pub trait CommandDispatcher: Send + Sync {
    fn command_one(
        &self,
        callback_token: &str,
    ) -> impl Future<Output = Result<(), CommandError>> + Send;

    fn command_two(
        &self,
        callback_token: &str,
    ) -> impl Future<Output = Result<(), CommandError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_their_code() {
        let err: TaskError = CommandError::Status { status: 502 }.into();
        assert_eq!(err.status, Some(502));
        assert!(err.message.contains("502"));

        let err: TaskError = CommandError::Transport("connection reset".into()).into();
        assert_eq!(err.status, None);
    }
}
