//! Where results leave the engine

use crate::error::RuntimeError;
use crate::value::Value;

/// Receives a run's publications, errors and termination
///
/// Callbacks run on engine threads and must not block for long. Every
/// method has a no-op default.
pub trait Listener: Send + Sync {
    /// A value reached a top-level `Publish`
    fn on_publish(&self, _value: &Value) {}

    /// An uncaught token exception, or a fatal engine error
    fn on_error(&self, _error: &RuntimeError) {}

    /// No token is pending any more; called exactly once per run
    fn on_terminate(&self) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl Listener for NullListener {}
