//! Configuration for the fleet service.

use std::time::Duration;

use anyhow::Result;

use crate::image::{ClonePolicy, ImageDetails};
use crate::queue::PollPolicy;

/// Fleet service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address for the read-only listing API.
    pub listen_addr: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Polling schedule for in-flight provider operations.
    pub poll: PollPolicy,

    /// Image this fleet serves.
    pub image: ImageDetails,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr =
            std::env::var("CIRRUS_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let log_level = std::env::var("CIRRUS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let poll_interval_secs = std::env::var("CIRRUS_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        let poll_max_attempts = std::env::var("CIRRUS_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(150);

        let image_name =
            std::env::var("CIRRUS_IMAGE_NAME").unwrap_or_else(|_| "build-agent".to_string());
        let service_name =
            std::env::var("CIRRUS_SERVICE_NAME").unwrap_or_else(|_| "fleet".to_string());
        let deployment_name =
            std::env::var("CIRRUS_DEPLOYMENT_NAME").unwrap_or_else(|_| "default".to_string());
        let vm_name_prefix =
            std::env::var("CIRRUS_VM_NAME_PREFIX").unwrap_or_else(|_| "agent".to_string());
        let clone_policy = std::env::var("CIRRUS_CLONE_POLICY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(ClonePolicy::CloneAndDeleteAfterStop);

        Ok(Self {
            listen_addr,
            log_level,
            poll: PollPolicy {
                interval: Duration::from_secs(poll_interval_secs),
                max_attempts: poll_max_attempts,
            },
            image: ImageDetails {
                image_name,
                service_name,
                deployment_name,
                vm_name_prefix,
                clone_policy,
            },
        })
    }
}
