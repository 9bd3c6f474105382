//! Runtime error handling
//!
//! Failures are split by blast radius:
//!
//! - `TokenException`: something went wrong for one token. It is raised to
//!   the token's handler chain; uncaught, the token dies and the engine's
//!   listener receives a `TokenError` carrying the source location and the
//!   call backtrace. Every other token keeps running.
//! - `EngineError`: the engine's own invariants no longer hold (a dangling
//!   variable, a corrupted continuation stack), or the control surface was
//!   misused. Invariant breaches abort the whole run.
//!
//! Deaths caused by cancellation (a region closing, a cell going dead) are
//! not errors and never reach the listener.

use crate::scope::TokenId;
use crate::value::Value;
use std::fmt;
use thiserror::Error;
use weft_core::{ProgramError, SourceLocation};

/// A token-local failure, catchable by a `Try` node
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TokenException {
    #[error("{site}: {message}")]
    Site { site: String, message: String },

    #[error("{0} is not callable")]
    Uncallable(String),

    #[error("{name} expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("capability '{0}' has not been granted")]
    Capability(String),

    #[error("stack limit of {0} frames exceeded")]
    StackLimit(usize),

    #[error("token limit of {0} live tokens exceeded")]
    TokenLimit(usize),

    #[error("uncaught exception: {0}")]
    Thrown(Value),

    #[error("site {site} panicked: {message}")]
    SitePanic { site: String, message: String },
}

impl TokenException {
    /// Value bound in the handler when this exception is caught
    ///
    /// Thrown values are handed over unchanged; runtime failures are
    /// described by their message.
    pub fn to_value(&self) -> Value {
        match self {
            TokenException::Thrown(value) => value.clone(),
            other => Value::str(&other.to_string()),
        }
    }

    /// Shorthand used by site implementations
    pub fn site(site: impl Into<String>, message: impl Into<String>) -> Self {
        TokenException::Site {
            site: site.into(),
            message: message.into(),
        }
    }
}

/// An engine-fatal condition or a misuse of the control surface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid program: {0}")]
    InvalidProgram(#[from] ProgramError),

    #[error("program calls unknown site '{0}'")]
    UnknownSite(String),

    #[error("variable at offset {offset} is unbound (environment depth {depth})")]
    UnboundVariable { offset: u32, depth: usize },

    #[error("cannot unwind {width} bindings from an environment of depth {depth}")]
    EnvUnderflow { width: u32, depth: usize },

    #[error("return with an empty continuation stack")]
    EmptyContinuation,

    #[error("end of try block without a handler frame")]
    HandlerUnderflow,

    #[error("store outside of any pruning scope")]
    MissingGroup,

    #[error("token {0} left an otherwise scope it is not registered in")]
    RegionMismatch(TokenId),

    #[error("engine already started")]
    AlreadyStarted,

    #[error("engine has not been started")]
    NotStarted,

    #[error("failed to spawn {0}")]
    Spawn(String),

    /// A listener, tracer or the step loop itself panicked
    #[error("{context} panicked: {message}")]
    Panicked {
        context: &'static str,
        message: String,
    },
}

/// An uncaught token exception, as reported to the listener
#[derive(Debug, Clone, PartialEq)]
pub struct TokenError {
    pub token: TokenId,
    pub exception: TokenException,
    /// Location of the node the token was at when it failed
    pub location: Option<SourceLocation>,
    /// Call sites of the enclosing closure calls, innermost first
    pub backtrace: Vec<SourceLocation>,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.exception)?,
            None => write!(f, "{}", self.exception)?,
        }
        for frame in &self.backtrace {
            write!(f, "\n    called from {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for TokenError {}

/// What the engine hands to `Listener::on_error`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("engine aborted: {0}")]
    Fatal(#[from] EngineError),
}

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
