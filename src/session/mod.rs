//! Debug session orchestration.
//!
//! [`debug_session::DebugSession`] owns the lifecycle of one session. The
//! remaining modules are its building blocks: lifecycle state, output
//! classification, runner hooks, the process-wide registry and the refresh
//! debouncer.

pub mod debug_session;
pub mod hooks;
pub mod output;
pub mod refresh;
pub mod registry;
pub mod state;
