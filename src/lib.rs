#![forbid(unsafe_code)]

//! Debug-session bridge between a Debug Adapter Protocol client, a
//! `flutter run --machine` / `flutter attach --machine` runner process and
//! the running application's runtime introspection service.

pub mod config;
pub mod daemon;
pub mod dap;
pub mod errors;
pub mod inspector_ui;
pub mod runtime;
pub mod session;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
