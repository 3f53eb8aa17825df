//! Response bodies of the lifecycle and health endpoints.

use crate::slot::Slot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Initiated,
    Terminating,
    Updated,
}

/// How an update reached the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    /// Acknowledged over the live channel
    Channel,
    /// Written to the config file with a reload signal
    File,
}

/// Immediate acknowledgement of a lifecycle request; the work itself
/// continues in the background
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAck {
    pub status: AckStatus,
    pub slot: Slot,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<UpdateMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl LifecycleAck {
    pub fn initiated(slot: Slot) -> Self {
        Self::new(AckStatus::Initiated, slot, format!("Galaxy_{} starting...", slot))
    }

    pub fn terminating(slot: Slot) -> Self {
        Self::new(AckStatus::Terminating, slot, format!("Galaxy_{} force stopping...", slot))
    }

    pub fn updated(slot: Slot, method: UpdateMethod, result: Option<Value>) -> Self {
        Self {
            method: Some(method),
            result,
            ..Self::new(AckStatus::Updated, slot, format!("Galaxy_{} config updating...", slot))
        }
    }

    fn new(status: AckStatus, slot: Slot, message: String) -> Self {
        Self {
            status,
            slot,
            message,
            method: None,
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub uptime_seconds: u64,
    pub backend_path: String,
    pub pool_size: usize,
    pub tasks_in_flight: usize,
    pub channel_sessions: usize,
}
