//! Server-push event stream modules.
//!
//! - `client`: HTTP transport, observer dispatch, and reconnect
//!   handling.
//! - `wire`: incremental `text/event-stream` frame parser.

/// Event stream client and observer surface.
pub mod client;
/// Wire-format framing.
pub mod wire;
