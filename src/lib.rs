//! Client-side session runtime for the Fleetline management console.
//!
//! The crate is organized by concern:
//! - `access`: permitted-key state derived from the persisted role
//!   marker.
//! - `cancel`: registry of in-flight cancellable operations.
//! - `stream`: authenticated server-push event stream client.
//!
//! The three surfaces are deliberately independent; hosts wire them
//! together per session (typically one `AccessStore`, one
//! `CancelRegistry`, and any number of stream subscriptions).

/// Role-derived permitted-key state.
pub mod access;
/// Cancellation handles and the per-session registry.
pub mod cancel;
/// Server-push event stream client and wire parser.
pub mod stream;
