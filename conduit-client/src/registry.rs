//! Process-wide observer and logging defaults
//!
//! Calls made through any [`CallExecutor`](crate::CallExecutor) consult this
//! registry in addition to their own configuration.

use conduit_core::ObserverRef;
use conduit_middleware::FunctionLogging;
use parking_lot::RwLock;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Default)]
struct GlobalRegistry {
    observers: Vec<ObserverRef>,
    logging: FunctionLogging,
}

fn registry() -> &'static RwLock<GlobalRegistry> {
    static REGISTRY: OnceLock<RwLock<GlobalRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(GlobalRegistry::default()))
}

/// Notify `observer` about every call in the process
pub fn register_global_observer(observer: ObserverRef) {
    let mut registry = registry().write();
    registry.observers.push(observer);
    debug!(count = registry.observers.len(), "Registered global observer");
}

/// Snapshot of the globally registered observers
pub fn global_observers() -> Vec<ObserverRef> {
    registry().read().observers.clone()
}

/// Set the logging mode used when neither the call nor the executor sets one
pub fn set_global_logging(logging: FunctionLogging) {
    registry().write().logging = logging;
}

/// Current global logging mode
pub fn global_logging() -> FunctionLogging {
    registry().read().logging
}

/// Remove all global observers and turn global logging off
pub fn reset_global_registry() {
    let mut registry = registry().write();
    registry.observers.clear();
    registry.logging = FunctionLogging::Off;
}
