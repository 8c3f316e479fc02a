//! Per-resource action queue.
//!
//! Serializes provisioning actions per (service, deployment) key: at most one
//! destructive or creative action is in flight for a key at any instant,
//! while distinct keys proceed fully independently. Enqueue never blocks the
//! caller; execution and polling run on a drain task owned by the queue.
//!
//! ```text
//! enqueue(key, action) ──▶ pending FIFO ──▶ drain task (one per busy key)
//!                                             │ submit ─▶ operation id
//!                                             │ poll until terminal or budget spent
//!                                             └ complete(outcome), advance
//! ```
//!
//! A failed action never stalls the queue: submission errors, stale ids,
//! status-query errors, and exhausted poll budgets all become a `Failed`
//! outcome handed to the action's completion step, and the key advances.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cirrus_provider::{ErrorDetail, OperationId, OperationProgress, OperationWatcher};
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::action::{OperationOutcome, ProvisionAction};

/// Error code attached when an operation is still pending after the whole
/// poll budget.
pub const POLL_EXHAUSTED_CODE: &str = "poll.exhausted";

/// Error code attached when the provider does not recognize an operation id
/// it supposedly issued.
pub const STALE_OPERATION_CODE: &str = "operation.stale";

/// Identifies the cloud resource group whose actions must be serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub service_name: String,
    pub deployment_name: String,
}

impl QueueKey {
    pub fn new(service_name: impl Into<String>, deployment_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            deployment_name: deployment_name.into(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_name, self.deployment_name)
    }
}

/// Bounded polling schedule for in-flight operations.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Wait between status checks.
    pub interval: Duration,

    /// Status checks before the operation is written off as failed.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150, // 5 minutes worst case
        }
    }
}

/// Errors raised while enqueuing, before any provider call is made.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No async runtime is available to run the drain task.
    #[error("no async runtime available to run queued actions")]
    NoRuntime,
}

#[derive(Default)]
struct KeyState {
    pending: VecDeque<ProvisionAction>,
    busy: bool,
}

/// Owned registry of per-resource-group FIFO queues.
///
/// One `ActionQueue` serves every image in the process; images sharing a
/// resource group share a key and therefore serialize against each other.
pub struct ActionQueue {
    policy: PollPolicy,
    keys: Mutex<HashMap<QueueKey, KeyState>>,
}

impl ActionQueue {
    pub fn new(policy: PollPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            keys: Mutex::new(HashMap::new()),
        })
    }

    // A panicked handler must not wedge every other key.
    fn state(&self) -> MutexGuard<'_, HashMap<QueueKey, KeyState>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an action to the key's FIFO. Never blocks; if the key was
    /// idle, a drain task starts immediately, otherwise the action waits its
    /// turn.
    pub fn enqueue(
        self: &Arc<Self>,
        key: QueueKey,
        action: ProvisionAction,
    ) -> Result<(), QueueError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        debug!(key = %key, action = %action.name(), "queueing action");
        let start_drain = {
            let mut keys = self.state();
            let entry = keys.entry(key.clone()).or_default();
            entry.pending.push_back(action);
            if entry.busy {
                false
            } else {
                entry.busy = true;
                true
            }
        };

        if start_drain {
            let queue = Arc::clone(self);
            handle.spawn(async move {
                queue.drain(key).await;
            });
        }
        Ok(())
    }

    /// Whether any action for the key is pending or in flight.
    pub fn is_locked(&self, key: &QueueKey) -> bool {
        self.state()
            .get(key)
            .map(|state| state.busy || !state.pending.is_empty())
            .unwrap_or(false)
    }

    async fn drain(self: Arc<Self>, key: QueueKey) {
        loop {
            let action = {
                let mut keys = self.state();
                let entry = keys.entry(key.clone()).or_default();
                match entry.pending.pop_front() {
                    Some(action) => action,
                    None => {
                        // Cleared under the same lock an enqueue would take,
                        // so no action can slip in unnoticed.
                        entry.busy = false;
                        return;
                    }
                }
            };

            if AssertUnwindSafe(self.run(&key, action))
                .catch_unwind()
                .await
                .is_err()
            {
                warn!(key = %key, "action handler panicked; advancing queue");
            }
        }
    }

    async fn run(&self, key: &QueueKey, action: ProvisionAction) {
        let (name, execute, complete, watcher) = action.into_parts();
        debug!(key = %key, action = %name, "executing action");

        let outcome = match execute().await {
            Ok(op_id) if !watcher.owns_operation(&op_id) => {
                warn!(
                    key = %key,
                    action = %name,
                    operation = %op_id,
                    "provider does not recognize operation id"
                );
                OperationOutcome::Failed(ErrorDetail::new(
                    STALE_OPERATION_CODE,
                    format!("operation {op_id} does not belong to this resource group"),
                ))
            }
            Ok(op_id) => self.await_operation(watcher.as_ref(), &op_id, &name, key).await,
            Err(err) => {
                warn!(key = %key, action = %name, error = %err, "action submission failed");
                OperationOutcome::from_submit_error(&err)
            }
        };

        match &outcome {
            OperationOutcome::Succeeded => {
                info!(key = %key, action = %name, "action completed");
            }
            OperationOutcome::Failed(detail) => {
                warn!(key = %key, action = %name, code = %detail.code, "action failed");
            }
        }
        complete(outcome);
    }

    async fn await_operation(
        &self,
        watcher: &dyn OperationWatcher,
        op_id: &OperationId,
        action: &str,
        key: &QueueKey,
    ) -> OperationOutcome {
        for attempt in 1..=self.policy.max_attempts {
            match watcher.operation_status(op_id).await {
                Ok(OperationProgress::Pending) => {
                    debug!(
                        key = %key,
                        action = %action,
                        operation = %op_id,
                        attempt,
                        "operation still pending"
                    );
                }
                Ok(OperationProgress::Succeeded) => return OperationOutcome::Succeeded,
                Ok(OperationProgress::Failed(detail)) => return OperationOutcome::Failed(detail),
                Err(err) => {
                    warn!(
                        key = %key,
                        action = %action,
                        operation = %op_id,
                        error = %err,
                        "status poll failed"
                    );
                    return OperationOutcome::Failed(err.error_detail());
                }
            }
            tokio::time::sleep(self.policy.interval).await;
        }

        warn!(
            key = %key,
            action = %action,
            operation = %op_id,
            attempts = self.policy.max_attempts,
            "poll budget exhausted"
        );
        OperationOutcome::Failed(ErrorDetail::new(
            POLL_EXHAUSTED_CODE,
            format!(
                "operation {op_id} still pending after {} status checks",
                self.policy.max_attempts
            ),
        ))
    }
}
