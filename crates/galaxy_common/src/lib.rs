//! Galaxy Common - types shared between the daemon and its workers.
//!
//! Slots and worker naming, the typed worker configuration and the validator
//! that produces it from form input, status and acknowledgement payloads,
//! and the live channel wire messages.

pub mod api;
pub mod channel;
pub mod error;
pub mod slot;
pub mod status;
pub mod validate;
pub mod worker_config;

pub use api::{AckStatus, HealthResponse, LifecycleAck, UpdateMethod};
pub use channel::{CorrelationToken, DaemonMessage, WorkerMessage};
pub use error::{InvalidConfig, SlotError};
pub use slot::{Slot, SlotState, WorkerNaming};
pub use status::{DirectSlotStatus, DirectStatus, SlotStatus, StatusSnapshot, StatusView};
pub use validate::{coerce_bool, parse_list, validate_form, FormInput};
pub use worker_config::{Identity, SecondaryTiming, TimingBlock, Toggles, WorkerConfig};
