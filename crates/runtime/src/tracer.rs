//! Observability hook
//!
//! A tracer sees token lifecycle events at the points where they happen.
//! It is purely additive: the engine behaves the same with or without one.

use crate::error::TokenException;
use crate::scope::TokenId;
use crate::value::Value;
use tracing::trace;
use weft_core::NodeId;

#[derive(Debug)]
pub enum TraceEvent<'a> {
    /// `parent` created `child`; the root token has no parent
    Fork {
        parent: Option<TokenId>,
        child: TokenId,
    },
    /// A token halted or was cancelled
    Die { token: TokenId },
    Publish { token: TokenId, value: &'a Value },
    /// A token parked on a cell or an outstanding site call
    Block { token: TokenId, node: NodeId },
    Unblock { token: TokenId },
    /// A token won the race to bind its pruning cell
    Bind { token: TokenId, value: &'a Value },
    /// An exception went uncaught
    Error {
        token: TokenId,
        exception: &'a TokenException,
    },
}

pub trait Tracer: Send + Sync {
    fn trace(&self, event: TraceEvent<'_>);
}

/// Forwards every event to `tracing` at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn trace(&self, event: TraceEvent<'_>) {
        match event {
            TraceEvent::Fork { parent, child } => match parent {
                Some(parent) => trace!(%parent, %child, "fork"),
                None => trace!(%child, "root"),
            },
            TraceEvent::Die { token } => trace!(%token, "die"),
            TraceEvent::Publish { token, value } => trace!(%token, %value, "publish"),
            TraceEvent::Block { token, node } => trace!(%token, %node, "block"),
            TraceEvent::Unblock { token } => trace!(%token, "unblock"),
            TraceEvent::Bind { token, value } => trace!(%token, %value, "bind"),
            TraceEvent::Error { token, exception } => trace!(%token, %exception, "error"),
        }
    }
}
