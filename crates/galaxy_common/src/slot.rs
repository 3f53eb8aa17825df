//! Worker slots and the names derived from them.

use crate::error::SlotError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the five fixed worker slots (1..=5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Slot(u8);

impl Slot {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;
    pub const COUNT: usize = 5;

    pub fn new(id: i64) -> Result<Self, SlotError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&id) {
            Ok(Self(id as u8))
        } else {
            Err(SlotError::OutOfRange(id))
        }
    }

    /// Parse a slot from a path segment such as "3"
    pub fn parse(raw: &str) -> Result<Self, SlotError> {
        let id: i64 = raw
            .trim()
            .parse()
            .map_err(|_| SlotError::NotANumber(raw.to_string()))?;
        Self::new(id)
    }

    /// All slots in ascending order
    pub fn all() -> impl Iterator<Item = Slot> {
        (Self::MIN..=Self::MAX).map(Slot)
    }

    pub fn id(self) -> u8 {
        self.0
    }

    /// Key used for this slot in status payloads
    pub fn key(self) -> String {
        format!("slot_{}", self.0)
    }
}

impl TryFrom<i64> for Slot {
    type Error = SlotError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state tag held by the process table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Unknown,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Unknown => "unknown",
        }
    }
}

/// Deterministic names for a slot's worker, script, config and log files.
///
/// With the default prefix `galaxy_`, slot 3 runs `galaxy_3.js` under the
/// supervisor name `galaxy_3`, reads `config3.json` and logs to
/// `galaxy-3-out.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerNaming {
    prefix: String,
}

impl WorkerNaming {
    pub const DEFAULT_PREFIX: &'static str = "galaxy_";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name registered with the external supervisor
    pub fn process_name(&self, slot: Slot) -> String {
        format!("{}{}", self.prefix, slot)
    }

    pub fn script_file(&self, slot: Slot) -> String {
        format!("{}.js", self.process_name(slot))
    }

    pub fn config_file(&self, slot: Slot) -> String {
        format!("config{}.json", slot)
    }

    /// The supervisor replaces underscores with dashes in log file names
    pub fn log_file(&self, slot: Slot) -> String {
        format!("{}-out.log", self.process_name(slot).replace('_', "-"))
    }

    /// Reverse of `process_name`; `None` for foreign or malformed names
    pub fn slot_of(&self, process_name: &str) -> Option<Slot> {
        let suffix = process_name.strip_prefix(&self.prefix)?;
        Slot::parse(suffix).ok()
    }
}

impl Default for WorkerNaming {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}
