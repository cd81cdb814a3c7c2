//! Aria API Library Crate
//!
//! This library contains all the core logic for the voice-call orchestration
//! service, including the application state, provider adapters, API handlers,
//! media-stream WebSocket logic, and routing. The `api` binary is a thin
//! wrapper around this library.

pub mod audio;
pub mod config;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod providers;
pub mod router;
pub mod state;
pub mod telephony;
pub mod ws;
