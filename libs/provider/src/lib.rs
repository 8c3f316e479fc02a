//! # cirrus-provider
//!
//! Cloud provider interfaces for the cirrus platform.
//!
//! The provider is consumed through two narrow capabilities:
//!
//! - [`CloudClient`]: submits lifecycle calls (start/create/stop/delete) and
//!   answers catalog queries. Every lifecycle call is asynchronous on the
//!   provider side: it returns an [`OperationId`] immediately, and the real
//!   outcome has to be discovered later by polling.
//! - [`OperationWatcher`]: resolves an operation id to its current
//!   [`OperationProgress`] and rejects ids it did not issue.
//!
//! Real SDK bindings implement these traits elsewhere; this crate ships the
//! types, the traits, and [`MockCloud`], an in-process scriptable provider
//! used by tests and development builds.

mod client;
mod error;
mod mock;
mod types;

pub use client::{CloudClient, OperationWatcher};
pub use error::ProviderError;
pub use mock::{CallKind, MockCloud};
pub use types::{
    DiscoveredInstance, ErrorDetail, OperationId, OperationProgress, Subscription, VmUserData,
};
