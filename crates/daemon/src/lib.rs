//! suggestd daemon library: wiring for the binary in `main.rs`.
//! Grounded in the teacher's crate layout (`server/src/lib.rs` module
//! declarations), trimmed to the modules this daemon actually has.

pub mod cli;
pub mod config;
pub mod error;
pub mod ipc;
pub mod lock;
pub mod ops;
pub mod state;

pub use config::Config;
pub use error::{DaemonError, DaemonResult};
pub use state::AppState;
