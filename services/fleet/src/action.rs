//! Provisioning action descriptors.
//!
//! A `ProvisionAction` is a named unit of work bound to one instance: how to
//! submit the call to the provider, and how to react once the provider
//! reports a terminal status. Actions are plain values - created per
//! lifecycle request, consumed exactly once by the queue, then discarded.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use cirrus_provider::{ErrorDetail, OperationId, OperationWatcher, ProviderError};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

/// Terminal result of a provider operation, as delivered to an action's
/// completion step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded,
    Failed(ErrorDetail),
}

impl OperationOutcome {
    /// Failure synthesized from a submission error, code and message
    /// preserved verbatim.
    pub fn from_submit_error(err: &ProviderError) -> Self {
        Self::Failed(err.error_detail())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

type ExecuteFn =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<OperationId, ProviderError>> + Send>;
type CompleteFn = Box<dyn FnOnce(OperationOutcome) + Send>;

/// A named unit of provisioning work against one cloud resource group.
pub struct ProvisionAction {
    name: String,
    execute: ExecuteFn,
    complete: CompleteFn,
    watcher: Arc<dyn OperationWatcher>,
}

impl ProvisionAction {
    pub fn new<E, Fut, C>(
        name: impl Into<String>,
        watcher: Arc<dyn OperationWatcher>,
        execute: E,
        complete: C,
    ) -> Self
    where
        E: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<OperationId, ProviderError>> + Send + 'static,
        C: FnOnce(OperationOutcome) + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Box::new(move || execute().boxed()),
            complete: Box::new(complete),
            watcher,
        }
    }

    /// Display name, diagnostic only.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(
        self,
    ) -> (String, ExecuteFn, CompleteFn, Arc<dyn OperationWatcher>) {
        (self.name, self.execute, self.complete, self.watcher)
    }
}

impl fmt::Debug for ProvisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
