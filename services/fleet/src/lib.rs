//! cirrus Fleet Service Library
//!
//! Manages the lifecycle of pooled virtual machines on a remote cloud
//! control plane where every provider operation is asynchronous: submitting
//! a start/stop/delete returns an operation id, and completion has to be
//! discovered later by polling. The service keeps a local view of instance
//! state consistent with eventual provider state while guaranteeing at most
//! one in-flight destructive action per cloud resource group.
//!
//! ## Architecture
//!
//! ```text
//! VmImage ──▶ ProvisionAction ──▶ ActionQueue (one drain task per busy key)
//!    │                               │ submit, poll, complete
//!    └── VmInstance status/errors ◀──┘
//! ```
//!
//! ## Modules
//!
//! - `action`: provisioning action descriptors (submit step + completion step)
//! - `queue`: per-resource-group FIFO queues with bounded operation polling
//! - `instance`: in-memory VM state machine and error accumulation
//! - `image`: image templates, instance collections, lifecycle operations
//! - `api`: read-only HTTP listing surface
//! - `config`: environment-driven service configuration

pub mod action;
pub mod api;
pub mod config;
pub mod image;
pub mod instance;
pub mod queue;

// Re-export commonly used types
pub use action::{OperationOutcome, ProvisionAction};
pub use config::Config;
pub use image::{ClonePolicy, ImageDetails, ImageError, VmImage};
pub use instance::{InstanceError, InstanceSnapshot, InstanceStatus, VmInstance};
pub use queue::{ActionQueue, PollPolicy, QueueError, QueueKey};
