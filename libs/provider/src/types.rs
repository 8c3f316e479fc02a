//! Shared provider types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an asynchronous provider operation.
///
/// Issued synchronously when a lifecycle call is accepted; the operation
/// itself completes later and must be polled via
/// [`OperationWatcher`](crate::OperationWatcher).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Typed provider error payload, code and message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// State of an asynchronous provider operation as reported by a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationProgress {
    /// Still running on the provider side.
    Pending,
    /// Terminal: the operation completed.
    Succeeded,
    /// Terminal: the operation failed with the given detail.
    Failed(ErrorDetail),
}

impl OperationProgress {
    /// Returns true once the operation can no longer change state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Snapshot of a VM the provider already knows about, as returned by
/// instance discovery at image construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInstance {
    pub name: String,
    /// Provider-reported power state, e.g. `"running"` or `"stopped"`.
    pub status: String,
}

impl DiscoveredInstance {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
        }
    }
}

/// A cloud subscription, rendered by the listing endpoint as a flat
/// id/display-name pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub display_name: String,
}

/// Bootstrap payload handed to a freshly created VM so the guest can
/// register itself with the coordinating server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmUserData {
    pub agent_name: String,
    pub server_url: String,
    /// Free-form profile data, passed through to the guest untouched.
    pub payload: serde_json::Value,
}

impl VmUserData {
    pub fn new(agent_name: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            server_url: server_url.into(),
            payload: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_roundtrip() {
        let id = OperationId::new("op_0001");
        assert_eq!(id.as_str(), "op_0001");
        assert_eq!(id.to_string(), "op_0001");
    }

    #[test]
    fn test_progress_terminal() {
        assert!(!OperationProgress::Pending.is_terminal());
        assert!(OperationProgress::Succeeded.is_terminal());
        assert!(OperationProgress::Failed(ErrorDetail::new("409", "Conflict")).is_terminal());
    }

    #[test]
    fn test_error_detail_display() {
        let detail = ErrorDetail::new("409", "Conflict");
        assert_eq!(detail.to_string(), "409: Conflict");
    }
}
