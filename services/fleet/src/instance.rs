//! In-memory VM instance state.
//!
//! ## State machine
//!
//! ```text
//! scheduled_to_start ──▶ running ──▶ stopping ──▶ stopped ──▶ (removed)
//!         │                              │
//!         ▼                              ▼
//!       error                   error_cannot_stop
//! ```
//!
//! Transitions happen either synchronously when an action is issued (e.g.
//! `stopping` is set before the stop call is even queued) or from the
//! action's completion callback. Observers read eventually consistent
//! snapshots; status only ever moves forward along the edges above, and the
//! error states are not terminal for the object - the instance stays in its
//! image's collection until a delete completes.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cirrus_provider::ErrorDetail;
use serde::Serialize;
use tracing::{debug, warn};

/// Lifecycle status of a VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    ScheduledToStart,
    Running,
    Stopping,
    Stopped,
    Error,
    ErrorCannotStop,
}

impl InstanceStatus {
    /// Map a provider-reported power state onto the local status model.
    /// Unrecognized states land in `Error`.
    pub fn from_provider_state(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "starting" | "scheduled" => Self::ScheduledToStart,
            "stopping" => Self::Stopping,
            "stopped" | "deallocated" => Self::Stopped,
            other => {
                warn!(state = %other, "unrecognized provider power state");
                Self::Error
            }
        }
    }
}

/// One provider error attached to an instance, code and message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceError {
    pub code: String,
    pub message: String,
}

impl From<ErrorDetail> for InstanceError {
    fn from(detail: ErrorDetail) -> Self {
        Self {
            code: detail.code,
            message: detail.message,
        }
    }
}

/// Read-only view of an instance for display.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub status: InstanceStatus,
    pub errors: Vec<InstanceError>,
}

struct InstanceState {
    status: InstanceStatus,
    errors: Vec<InstanceError>,
}

/// A single VM, owned by its image's instance collection.
///
/// The VM name doubles as the stable instance id for this provider binding.
/// Shared via `Arc` between the image, queued completion callbacks, and the
/// read-only display surface.
pub struct VmInstance {
    name: String,
    /// Back-reference to the owning image, by name - never an owning handle.
    image_name: String,
    state: RwLock<InstanceState>,
}

impl VmInstance {
    pub fn new(name: impl Into<String>, image_name: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            name: name.into(),
            image_name: image_name.into(),
            state: RwLock::new(InstanceState {
                status,
                errors: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn status(&self) -> InstanceStatus {
        self.read().status
    }

    pub fn errors(&self) -> Vec<InstanceError> {
        self.read().errors.clone()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let state = self.read();
        InstanceSnapshot {
            name: self.name.clone(),
            status: state.status,
            errors: state.errors.clone(),
        }
    }

    /// Move to a new status. A successful transition clears the accumulated
    /// errors; failed transitions go through [`VmInstance::record_failure`]
    /// instead so the detail is kept.
    pub(crate) fn set_status(&self, status: InstanceStatus) {
        let mut state = self.write();
        debug!(
            instance = %self.name,
            from = ?state.status,
            to = ?status,
            "instance status transition"
        );
        if matches!(status, InstanceStatus::Running | InstanceStatus::Stopped) {
            state.errors.clear();
        }
        state.status = status;
    }

    /// Move to a failure status and append the provider's error detail.
    pub(crate) fn record_failure(&self, status: InstanceStatus, detail: ErrorDetail) {
        let mut state = self.write();
        warn!(
            instance = %self.name,
            from = ?state.status,
            to = ?status,
            code = %detail.code,
            message = %detail.message,
            "instance failed"
        );
        state.status = status;
        state.errors.push(detail.into());
    }

    fn read(&self) -> RwLockReadGuard<'_, InstanceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InstanceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
