//! Debug Adapter Protocol surface.
//!
//! - [`codec`]: `Content-Length` framing.
//! - [`messages`]: request/response/event types and the client channel.
//! - [`server`]: stdio and TCP transports binding a client to a session.

pub mod codec;
pub mod messages;
pub mod server;
