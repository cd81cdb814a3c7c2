//! Media-Stream Session Management
//!
//! This module contains the core logic for running live phone calls over the
//! telephony provider's media-stream WebSocket. It is structured into
//! submodules for clarity:
//!
//! - `protocol`: Defines the provider's JSON frame format and the outbound
//!   audio chunking.
//! - `call`: The per-call session state machine (context window, transcript,
//!   turn single-flight, lifecycle transitions) and the turn pipeline.
//! - `manager`: The in-memory registry of live sessions.
//! - `session`: Manages the WebSocket connection lifecycle, from handshake to
//!   termination, and the per-call event loop.

pub mod call;
pub mod manager;
pub mod protocol;
pub mod session;

pub use manager::SessionManager;
pub use session::ws_handler;
