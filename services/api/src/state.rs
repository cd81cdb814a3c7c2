//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the session registry and service clients.

use crate::{
    config::Config, notify::LifecycleNotifier, telephony::OutboundDialer, ws::SessionManager,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<SessionManager>,
    pub dialer: Arc<dyn OutboundDialer>,
    pub notifier: Arc<LifecycleNotifier>,
}
