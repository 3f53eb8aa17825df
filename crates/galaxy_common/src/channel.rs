//! Live channel wire messages.
//!
//! Workers hold a WebSocket session with the daemon and exchange JSON
//! messages tagged by `type`:
//!
//! ```text
//! worker -> daemon  {"type":"register","slot":2}
//! daemon -> worker  {"type":"registered","slot":2}
//! daemon -> worker  {"type":"config_update","token":"…","slot":2,"config":{…}}
//! worker -> daemon  {"type":"config_ack","token":"…","result":{…}}
//! ```

use crate::slot::Slot;
use crate::worker_config::WorkerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Pairs one config push with its acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages sent by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Register {
        slot: Slot,
    },
    ConfigAck {
        token: CorrelationToken,
        #[serde(default)]
        result: Value,
    },
}

/// Messages sent by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    Registered {
        slot: Slot,
    },
    ConfigUpdate {
        token: CorrelationToken,
        slot: Slot,
        config: WorkerConfig,
    },
    Error {
        message: String,
    },
}
