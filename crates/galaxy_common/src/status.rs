//! Status payloads returned by `/status` and `/quick-status`.

use crate::slot::{Slot, SlotState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which read path produced a status payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusView {
    /// Supervisor inventory, served through the freshness cache
    Aggregated,
    /// Process table handles only
    Direct,
}

/// One slot as reported by the external supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub status: String,
    pub cpu: f64,
    pub memory: u64,
}

impl SlotStatus {
    /// Slot absent from the supervisor inventory
    pub fn stopped() -> Self {
        Self {
            running: false,
            pid: None,
            status: "stopped".to_string(),
            cpu: 0.0,
            memory: 0,
        }
    }

    /// Conservative entry used when the inventory could not be read
    pub fn unknown() -> Self {
        Self {
            status: "unknown".to_string(),
            ..Self::stopped()
        }
    }
}

/// Immutable aggregated view of all slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub view: StatusView,
    /// Unix milliseconds at capture
    pub captured_at: i64,
    pub slots: BTreeMap<String, SlotStatus>,
}

impl StatusSnapshot {
    pub fn new(captured_at: i64, slots: impl IntoIterator<Item = (Slot, SlotStatus)>) -> Self {
        Self {
            view: StatusView::Aggregated,
            captured_at,
            slots: slots.into_iter().map(|(s, st)| (s.key(), st)).collect(),
        }
    }

    /// Every slot reported as not running with status "unknown"
    pub fn unknown(captured_at: i64) -> Self {
        Self::new(captured_at, Slot::all().map(|s| (s, SlotStatus::unknown())))
    }

    pub fn slot(&self, slot: Slot) -> Option<&SlotStatus> {
        self.slots.get(&slot.key())
    }
}

/// One slot as seen by the process table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectSlotStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub process_exists: bool,
    pub state: SlotState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectStatus {
    pub view: StatusView,
    pub captured_at: i64,
    pub slots: BTreeMap<String, DirectSlotStatus>,
}

impl DirectStatus {
    pub fn new(captured_at: i64, slots: impl IntoIterator<Item = (Slot, DirectSlotStatus)>) -> Self {
        Self {
            view: StatusView::Direct,
            captured_at,
            slots: slots.into_iter().map(|(s, st)| (s.key(), st)).collect(),
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<&DirectSlotStatus> {
        self.slots.get(&slot.key())
    }
}
