//! Scriptable in-process cloud provider.
//!
//! `MockCloud` stands in for a real SDK binding in tests and development
//! builds. Submissions succeed by default and operations complete after a
//! configurable number of pending polls; failures are injected per call
//! kind. The mock records every submission so tests can assert ordering and
//! the number of simultaneously open operations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::client::{CloudClient, OperationWatcher};
use crate::error::ProviderError;
use crate::types::{
    DiscoveredInstance, ErrorDetail, OperationId, OperationProgress, Subscription, VmUserData,
};

/// Which lifecycle call a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Start,
    CreateAndStart,
    Stop,
    Delete,
}

struct OperationRecord {
    remaining_polls: u32,
    result: OperationProgress,
    owned: bool,
    open: bool,
}

#[derive(Default)]
struct MockState {
    pending_polls: u32,
    refusals: HashMap<CallKind, ErrorDetail>,
    failures: HashMap<CallKind, ErrorDetail>,
    disown_operations: bool,
    operations: HashMap<String, OperationRecord>,
    discovered: HashMap<String, DiscoveredInstance>,
    subscriptions: Vec<Subscription>,
    generalized: HashSet<String>,
    submissions: Vec<String>,
    open_operations: u32,
    max_open_operations: u32,
}

/// In-process cloud provider with scriptable behavior.
pub struct MockCloud {
    state: Mutex<MockState>,
    op_counter: AtomicU64,
}

impl MockCloud {
    /// Create a mock where every call succeeds after one pending poll.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                pending_polls: 1,
                ..MockState::default()
            }),
            op_counter: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of `Pending` responses each operation reports before turning
    /// terminal.
    pub fn set_pending_polls(&self, polls: u32) {
        self.lock().pending_polls = polls;
    }

    /// Make submissions of the given kind fail immediately.
    pub fn refuse(&self, kind: CallKind, code: &str, message: &str) {
        self.lock()
            .refusals
            .insert(kind, ErrorDetail::new(code, message));
    }

    /// Make operations of the given kind reach a `Failed` terminal status.
    pub fn fail_operation(&self, kind: CallKind, code: &str, message: &str) {
        self.lock()
            .failures
            .insert(kind, ErrorDetail::new(code, message));
    }

    /// Stop recognizing newly issued operation ids, so `owns_operation`
    /// reports them as stale.
    pub fn disown_operations(&self, disown: bool) {
        self.lock().disown_operations = disown;
    }

    /// Seed a VM the provider "already knows about" for discovery.
    pub fn seed_instance(&self, name: &str, status: &str) {
        self.lock()
            .discovered
            .insert(name.to_string(), DiscoveredInstance::new(name, status));
    }

    pub fn add_subscription(&self, id: &str, display_name: &str) {
        self.lock().subscriptions.push(Subscription {
            id: id.to_string(),
            display_name: display_name.to_string(),
        });
    }

    pub fn set_generalized(&self, image_name: &str, generalized: bool) {
        let mut state = self.lock();
        if generalized {
            state.generalized.insert(image_name.to_string());
        } else {
            state.generalized.remove(image_name);
        }
    }

    /// Labels of every submission accepted or refused, in call order.
    pub fn submissions(&self) -> Vec<String> {
        self.lock().submissions.clone()
    }

    /// Largest number of operations that were open at the same time.
    pub fn max_open_operations(&self) -> u32 {
        self.lock().max_open_operations
    }

    fn submit(&self, kind: CallKind, label: String) -> Result<OperationId, ProviderError> {
        let mut state = self.lock();
        state.submissions.push(label.clone());

        if let Some(detail) = state.refusals.get(&kind) {
            debug!(call = %label, code = %detail.code, "[mock] submission refused");
            return Err(ProviderError::Api {
                code: detail.code.clone(),
                message: detail.message.clone(),
            });
        }

        let id = OperationId::new(format!(
            "op_{:016x}",
            self.op_counter.fetch_add(1, Ordering::SeqCst)
        ));
        let result = match state.failures.get(&kind) {
            Some(detail) => OperationProgress::Failed(detail.clone()),
            None => OperationProgress::Succeeded,
        };

        state.open_operations += 1;
        state.max_open_operations = state.max_open_operations.max(state.open_operations);
        let record = OperationRecord {
            remaining_polls: state.pending_polls,
            result,
            owned: !state.disown_operations,
            open: true,
        };
        state.operations.insert(id.as_str().to_string(), record);

        debug!(call = %label, operation = %id, "[mock] submission accepted");
        Ok(id)
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationWatcher for MockCloud {
    async fn operation_status(
        &self,
        id: &OperationId,
    ) -> Result<OperationProgress, ProviderError> {
        let mut state = self.lock();
        let closed_now;
        let progress;
        match state.operations.get_mut(id.as_str()) {
            Some(record) => {
                if record.remaining_polls > 0 {
                    record.remaining_polls -= 1;
                    return Ok(OperationProgress::Pending);
                }
                closed_now = record.open;
                record.open = false;
                progress = record.result.clone();
            }
            None => return Err(ProviderError::UnknownOperation(id.to_string())),
        }
        if closed_now {
            state.open_operations -= 1;
        }
        Ok(progress)
    }

    fn owns_operation(&self, id: &OperationId) -> bool {
        self.lock()
            .operations
            .get(id.as_str())
            .map(|record| record.owned)
            .unwrap_or(false)
    }
}

#[async_trait]
impl CloudClient for MockCloud {
    async fn start_vm(&self, image_name: &str) -> Result<OperationId, ProviderError> {
        self.submit(CallKind::Start, format!("start {image_name}"))
    }

    async fn create_and_start_vm(
        &self,
        image_name: &str,
        vm_name: &str,
        _user_data: &VmUserData,
        _generalized: bool,
    ) -> Result<OperationId, ProviderError> {
        self.submit(
            CallKind::CreateAndStart,
            format!("create {vm_name} from {image_name}"),
        )
    }

    async fn stop_vm(&self, vm_name: &str) -> Result<OperationId, ProviderError> {
        self.submit(CallKind::Stop, format!("stop {vm_name}"))
    }

    async fn delete_vm(&self, vm_name: &str) -> Result<OperationId, ProviderError> {
        self.submit(CallKind::Delete, format!("delete {vm_name}"))
    }

    async fn is_image_generalized(&self, image_name: &str) -> Result<bool, ProviderError> {
        Ok(self.lock().generalized.contains(image_name))
    }

    async fn list_image_instances(
        &self,
        _image_name: &str,
    ) -> Result<HashMap<String, DiscoveredInstance>, ProviderError> {
        Ok(self.lock().discovered.clone())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, ProviderError> {
        Ok(self.lock().subscriptions.clone())
    }
}
