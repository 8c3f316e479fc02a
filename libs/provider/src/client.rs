//! Provider capability traits.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{
    DiscoveredInstance, OperationId, OperationProgress, Subscription, VmUserData,
};

/// Resolves asynchronous provider operations.
///
/// Pure queries, no side effects. `owns_operation` is the stale-id check: a
/// queue must not poll an id the provider did not issue for this resource
/// group.
#[async_trait]
pub trait OperationWatcher: Send + Sync {
    /// Current state of the operation.
    async fn operation_status(
        &self,
        id: &OperationId,
    ) -> Result<OperationProgress, ProviderError>;

    /// Whether this watcher issued the given operation id.
    fn owns_operation(&self, id: &OperationId) -> bool;
}

/// Submits lifecycle calls and answers catalog queries against the provider.
///
/// Every lifecycle call returns an [`OperationId`] synchronously or fails
/// immediately; the operation's real outcome is discovered by polling the
/// watcher this trait extends.
#[async_trait]
pub trait CloudClient: OperationWatcher {
    /// Start the canonical VM behind an image.
    async fn start_vm(&self, image_name: &str) -> Result<OperationId, ProviderError>;

    /// Provision a fresh, uniquely named VM from an image template and boot it.
    async fn create_and_start_vm(
        &self,
        image_name: &str,
        vm_name: &str,
        user_data: &VmUserData,
        generalized: bool,
    ) -> Result<OperationId, ProviderError>;

    /// Stop a running VM.
    async fn stop_vm(&self, vm_name: &str) -> Result<OperationId, ProviderError>;

    /// Delete a VM. Idempotent at the provider.
    async fn delete_vm(&self, vm_name: &str) -> Result<OperationId, ProviderError>;

    /// Whether the image template is a generalized (sysprepped) source.
    async fn is_image_generalized(&self, image_name: &str) -> Result<bool, ProviderError>;

    /// VMs the provider already holds for an image, keyed by VM name.
    async fn list_image_instances(
        &self,
        image_name: &str,
    ) -> Result<HashMap<String, DiscoveredInstance>, ProviderError>;

    /// Subscriptions visible to the configured credentials.
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, ProviderError>;
}
