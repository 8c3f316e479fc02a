//! Cloud image - a VM template plus the set of instances started from it.
//!
//! An image decides whether a new instance may start (queue-lock check),
//! constructs instances, and queues the lifecycle actions that drive them.
//! All provider work goes through the per-resource action queue; the image
//! only performs the synchronous pre-transitions (`scheduled_to_start`
//! before a start is queued, `stopping` before a stop is queued) so
//! observers never see a stale status while an action is outstanding.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use cirrus_provider::{CloudClient, ErrorDetail, OperationWatcher, ProviderError, VmUserData};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::action::{OperationOutcome, ProvisionAction};
use crate::instance::{InstanceStatus, VmInstance};
use crate::queue::{ActionQueue, QueueKey};

/// How new instances are provisioned from the image template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClonePolicy {
    /// Reuse the one canonical VM behind the image.
    UseOriginal,
    /// Provision a fresh uniquely named VM; stopping it implies deletion.
    CloneAndDeleteAfterStop,
    /// Provision a fresh uniquely named VM and keep it after stop.
    ClonePersist,
}

impl ClonePolicy {
    pub fn is_use_original(self) -> bool {
        matches!(self, Self::UseOriginal)
    }

    pub fn is_delete_after_stop(self) -> bool {
        matches!(self, Self::CloneAndDeleteAfterStop)
    }
}

#[derive(Debug, Error)]
#[error("unknown clone policy: {0}")]
pub struct UnknownClonePolicy(String);

impl FromStr for ClonePolicy {
    type Err = UnknownClonePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "use_original" => Ok(Self::UseOriginal),
            "clone_and_delete_after_stop" => Ok(Self::CloneAndDeleteAfterStop),
            "clone_persist" => Ok(Self::ClonePersist),
            other => Err(UnknownClonePolicy(other.to_string())),
        }
    }
}

/// Static description of a cloud image template.
#[derive(Debug, Clone)]
pub struct ImageDetails {
    /// Name of the template definition at the provider.
    pub image_name: String,
    /// Cloud service owning the deployment.
    pub service_name: String,
    /// Deployment the image's VMs live in.
    pub deployment_name: String,
    /// Prefix for names of cloned VMs.
    pub vm_name_prefix: String,
    pub clone_policy: ClonePolicy,
}

impl ImageDetails {
    /// Resource-group key governing this image's actions. Immutable for the
    /// life of the image.
    pub fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.service_name.clone(), self.deployment_name.clone())
    }
}

/// Errors surfaced by image operations.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Restart is not available for this provider binding. Distinct from
    /// provider failures so callers do not mistake it for a transient error.
    #[error("restart is not supported (instance {0})")]
    RestartUnsupported(String),

    /// A provider call failed while the image was being constructed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A cloud image and its live instances.
pub struct VmImage {
    details: ImageDetails,
    generalized: bool,
    client: Arc<dyn CloudClient>,
    queue: Arc<ActionQueue>,
    instances: RwLock<HashMap<String, Arc<VmInstance>>>,
}

impl VmImage {
    /// Build the image and seed its collection with the instances the
    /// provider already holds for it.
    pub async fn new(
        details: ImageDetails,
        client: Arc<dyn CloudClient>,
        queue: Arc<ActionQueue>,
    ) -> Result<Arc<Self>, ImageError> {
        // Irrelevant when the canonical VM is reused as-is.
        let generalized = if details.clone_policy.is_use_original() {
            false
        } else {
            client.is_image_generalized(&details.image_name).await?
        };

        let discovered = client.list_image_instances(&details.image_name).await?;
        let image = Arc::new(Self {
            generalized,
            client,
            queue,
            instances: RwLock::new(HashMap::new()),
            details,
        });

        {
            let mut instances = image.instances_mut();
            for (name, found) in discovered {
                let status = InstanceStatus::from_provider_state(&found.status);
                instances.insert(
                    name.clone(),
                    Arc::new(VmInstance::new(name, image.details.image_name.clone(), status)),
                );
            }
        }

        info!(
            image = %image.details.image_name,
            key = %image.details.queue_key(),
            instances = image.instance_count(),
            generalized = image.generalized,
            "image ready"
        );
        Ok(image)
    }

    pub fn name(&self) -> &str {
        &self.details.image_name
    }

    pub fn details(&self) -> &ImageDetails {
        &self.details
    }

    pub fn generalized(&self) -> bool {
        self.generalized
    }

    pub fn instance_count(&self) -> usize {
        self.instances_read().len()
    }

    /// Snapshot of the current instance collection.
    pub fn instances(&self) -> Vec<Arc<VmInstance>> {
        self.instances_read().values().cloned().collect()
    }

    pub fn find_instance(&self, name: &str) -> Option<Arc<VmInstance>> {
        self.instances_read().get(name).cloned()
    }

    /// True when no action for this image's resource group is pending or in
    /// flight. A conservative "busy" answer is acceptable; a false "free"
    /// never is.
    pub fn can_start_new_instance(&self) -> bool {
        !self.queue.is_locked(&self.details.queue_key())
    }

    /// Construct a new instance in `scheduled_to_start`, register it, and
    /// queue the provider call. Returns immediately; callers observe
    /// progress by polling the instance's status.
    pub fn start_new_instance(self: &Arc<Self>, user_data: VmUserData) -> Arc<VmInstance> {
        let vm_name = self.derive_vm_name();
        let instance = Arc::new(VmInstance::new(
            vm_name.clone(),
            self.details.image_name.clone(),
            InstanceStatus::ScheduledToStart,
        ));
        self.instances_mut()
            .insert(vm_name.clone(), Arc::clone(&instance));
        info!(image = %self.name(), vm = %vm_name, "scheduling new instance");

        let client = Arc::clone(&self.client);
        let details = self.details.clone();
        let generalized = self.generalized;
        let exec_vm_name = vm_name.clone();
        let execute = move || async move {
            if details.clone_policy.is_use_original() {
                client.start_vm(&details.image_name).await
            } else {
                client
                    .create_and_start_vm(&details.image_name, &exec_vm_name, &user_data, generalized)
                    .await
            }
        };

        let completion_instance = Arc::clone(&instance);
        let complete = move |outcome: OperationOutcome| match outcome {
            OperationOutcome::Succeeded => {
                completion_instance.set_status(InstanceStatus::Running);
            }
            OperationOutcome::Failed(detail) => {
                completion_instance.record_failure(InstanceStatus::Error, detail);
            }
        };

        let action = ProvisionAction::new(
            format!("start new instance: {vm_name}"),
            self.watcher(),
            execute,
            complete,
        );
        if let Err(err) = self.queue.enqueue(self.details.queue_key(), action) {
            warn!(image = %self.name(), vm = %vm_name, error = %err, "enqueue failed");
            instance.record_failure(
                InstanceStatus::Error,
                ErrorDetail::new("queue.enqueue", err.to_string()),
            );
        }
        instance
    }

    /// Synchronously mark the instance `stopping` and queue the stop call.
    /// On success the instance becomes `stopped` (and is deleted if the
    /// clone policy mandates it); on failure it becomes `error_cannot_stop`.
    pub fn terminate_instance(self: &Arc<Self>, instance: &Arc<VmInstance>) {
        instance.set_status(InstanceStatus::Stopping);

        let client = Arc::clone(&self.client);
        let vm_name = instance.name().to_string();
        let execute = move || async move { client.stop_vm(&vm_name).await };

        let image = Arc::clone(self);
        let completion_instance = Arc::clone(instance);
        let complete = move |outcome: OperationOutcome| match outcome {
            OperationOutcome::Succeeded => {
                completion_instance.set_status(InstanceStatus::Stopped);
                if image.details.clone_policy.is_delete_after_stop() {
                    image.delete_instance(&completion_instance);
                }
            }
            OperationOutcome::Failed(detail) => {
                completion_instance.record_failure(InstanceStatus::ErrorCannotStop, detail);
            }
        };

        let action = ProvisionAction::new(
            format!("stop instance {}", instance.name()),
            self.watcher(),
            execute,
            complete,
        );
        if let Err(err) = self.queue.enqueue(self.details.queue_key(), action) {
            warn!(image = %self.name(), vm = %instance.name(), error = %err, "enqueue failed");
            instance.record_failure(
                InstanceStatus::Error,
                ErrorDetail::new("queue.enqueue", err.to_string()),
            );
        }
    }

    /// Queue deletion of a VM. On completion the instance leaves the
    /// collection regardless of outcome - delete is idempotent at the
    /// provider.
    pub fn delete_instance(self: &Arc<Self>, instance: &Arc<VmInstance>) {
        let client = Arc::clone(&self.client);
        let vm_name = instance.name().to_string();
        let execute = move || async move { client.delete_vm(&vm_name).await };

        let image = Arc::clone(self);
        let removed_name = instance.name().to_string();
        let complete = move |_outcome: OperationOutcome| {
            image.remove_instance(&removed_name);
        };

        let action = ProvisionAction::new(
            format!("delete instance {}", instance.name()),
            self.watcher(),
            execute,
            complete,
        );
        if let Err(err) = self.queue.enqueue(self.details.queue_key(), action) {
            warn!(image = %self.name(), vm = %instance.name(), error = %err, "enqueue failed");
            instance.record_failure(
                InstanceStatus::Error,
                ErrorDetail::new("queue.enqueue", err.to_string()),
            );
        }
    }

    /// Restart is not available for this provider binding.
    pub fn restart_instance(&self, instance: &Arc<VmInstance>) -> Result<(), ImageError> {
        Err(ImageError::RestartUnsupported(instance.name().to_string()))
    }

    fn remove_instance(&self, name: &str) {
        self.instances_mut().remove(name);
        debug!(image = %self.name(), vm = %name, "instance removed from collection");
    }

    /// VM name for a new instance: the canonical name when the original is
    /// reused, otherwise a time-derived unique suffix on the prefix.
    fn derive_vm_name(&self) -> String {
        if self.details.clone_policy.is_use_original() {
            self.details.image_name.clone()
        } else {
            format!(
                "{}-{:x}",
                self.details.vm_name_prefix,
                Utc::now().timestamp_millis()
            )
        }
    }

    fn watcher(&self) -> Arc<dyn OperationWatcher> {
        let client = Arc::clone(&self.client);
        let watcher: Arc<dyn OperationWatcher> = client;
        watcher
    }

    fn instances_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<VmInstance>>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn instances_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<VmInstance>>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }
}
