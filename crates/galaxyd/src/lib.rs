//! galaxyd - control plane for five supervised worker slots.
//!
//! Workers run under an external process supervisor. The daemon starts,
//! stops and reconfigures them over HTTP, keeps each slot's config file in
//! sync, and reports their status.

pub mod channel;
pub mod config;
pub mod config_writer;
pub mod daemon;
pub mod error;
pub mod log_stream;
pub mod pool;
pub mod process_table;
pub mod routes;
pub mod server;
pub mod signals;
pub mod status_cache;
pub mod supervisor;
pub mod termination;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use supervisor::{FakeSupervisor, Pm2Supervisor, ProcessSupervisor};
