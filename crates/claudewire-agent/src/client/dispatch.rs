//! Time-bounded execution of inbound control requests
//!
//! Every callback or tool call runs on its own task so the coordinator loop
//! keeps reading lines. The outcome is posted back to the loop as a
//! [`Completion`]; only the loop writes to the CLI.

use crate::error::{AgentError, Result};
use claudewire_protocol::{ControlResponse, RequestId};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Finished unit of work, ready to be written as a control response
#[derive(Debug)]
pub(crate) struct Completion {
    pub request_id: RequestId,
    pub response: ControlResponse,
}

/// Run `work` bounded by `limit` and post its response to `done`
///
/// - success becomes a `success` response carrying the value
/// - an error or a panic becomes an `error` response
/// - timeout cancels `token`, aborts the task and posts a timeout error
/// - cancellation of `token` from outside aborts the task and posts nothing
pub(crate) fn spawn_bounded<F>(
    request_id: RequestId,
    label: String,
    limit: Duration,
    token: CancellationToken,
    work: F,
    done: mpsc::UnboundedSender<Completion>,
) where
    F: Future<Output = Result<Value>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut task = tokio::spawn(work);

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                task.abort();
                debug!(request_id = %request_id, label = %label, "request cancelled");
                return;
            }
            joined = tokio::time::timeout(limit, &mut task) => joined,
        };

        let response = match outcome {
            Ok(Ok(Ok(value))) => ControlResponse::success(request_id.clone(), Some(value)),
            Ok(Ok(Err(e))) => {
                debug!(request_id = %request_id, label = %label, error = %e, "callback failed");
                ControlResponse::error(request_id.clone(), e.to_string())
            }
            Ok(Err(join_error)) => {
                warn!(request_id = %request_id, label = %label, "callback panicked");
                let reason = if join_error.is_panic() {
                    "callback panicked".to_string()
                } else {
                    join_error.to_string()
                };
                ControlResponse::error(
                    request_id.clone(),
                    AgentError::CallbackExecution(reason).to_string(),
                )
            }
            Err(_) => {
                token.cancel();
                task.abort();
                let err = AgentError::CallbackTimeout {
                    callback_id: label,
                    timeout_ms: limit.as_millis() as u64,
                };
                warn!(request_id = %request_id, error = %err, "callback timed out");
                ControlResponse::error(request_id.clone(), err.to_string())
            }
        };

        let _ = done.send(Completion {
            request_id,
            response,
        });
    });
}
