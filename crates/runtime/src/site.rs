//! The site contract
//!
//! Sites are the engine's only way to touch the outside world. A call hands
//! the site its (fully forced) arguments and a `SiteCall`, which owns the
//! calling token until the site decides what happens to it:
//!
//! - `resume(value)`: continue the caller with `value`
//! - `publish(value)`: the same, spelled the way sites usually think of it
//! - `halt()`: the call produced nothing; the caller dies silently
//! - `fail(exception)`: raise a token exception in the caller
//!
//! The handle may be completed synchronously inside `call`, or moved to any
//! other thread and completed later. Dropping it without completing it
//! counts as `halt()`, unless the dropping thread is panicking, in which
//! case the caller sees a `SitePanic`. Once the caller has been cancelled,
//! completing the handle does nothing; long-running sites can poll
//! `is_live()` to stop early.
//!
//! Sites that block report `blocking() == true` and are run on the engine's
//! site pool instead of a dispatch worker.

use crate::engine::Shared;
use crate::error::{TokenException, format_panic_payload};
use crate::token::Token;
use crate::value::{SiteRef, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, warn};
use weft_core::NodeId;

pub trait Site: Send + Sync {
    fn name(&self) -> &str;

    fn call(&self, args: Vec<Value>, call: SiteCall);

    /// Whether calls may block the calling thread
    fn blocking(&self) -> bool {
        false
    }

    /// Capability the engine must have granted before this site may run
    fn capability(&self) -> Option<&str> {
        None
    }
}

/// Message for a call whose handle was dropped by a panicking thread
const DROPPED_IN_PANIC: &str = "call dropped while panicking";

#[derive(Default)]
struct Slot {
    token: Option<Token>,
    /// `invoke` is still inside `Site::call`
    guarded: bool,
    /// Dropped by a panic while guarded; `invoke` raises it
    orphaned: bool,
}

/// Handle to one outstanding site call
pub struct SiteCall {
    engine: Weak<Shared>,
    slot: Arc<Mutex<Slot>>,
    next: NodeId,
    site: Arc<str>,
}

impl SiteCall {
    pub(crate) fn new(engine: Weak<Shared>, token: Token, next: NodeId, site: &str) -> Self {
        SiteCall {
            engine,
            slot: Arc::new(Mutex::new(Slot {
                token: Some(token),
                ..Slot::default()
            })),
            next,
            site: Arc::from(site),
        }
    }

    /// Name of the site being called
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Whether the caller is still waiting for an answer
    pub fn is_live(&self) -> bool {
        self.slot
            .lock()
            .expect("site call: lock poisoned")
            .token
            .as_ref()
            .is_some_and(Token::is_alive)
    }

    pub fn resume(self, value: Value) {
        if let Some(mut token) = self.take() {
            token.result = value;
            token.node = self.next;
            if let Some(engine) = self.engine.upgrade() {
                engine.unblock(token);
            }
        }
    }

    pub fn publish(self, value: Value) {
        self.resume(value)
    }

    /// Resume with `signal`
    pub fn resume_signal(self) {
        self.resume(Value::Signal)
    }

    pub fn halt(self) {
        if let Some(token) = self.take()
            && let Some(engine) = self.engine.upgrade()
        {
            engine.die(token);
        }
    }

    pub fn fail(self, exception: TokenException) {
        if let Some(token) = self.take()
            && let Some(engine) = self.engine.upgrade()
        {
            engine.raise(token, exception);
        }
    }

    fn take(&self) -> Option<Token> {
        self.slot.lock().expect("site call: lock poisoned").token.take()
    }
}

impl Drop for SiteCall {
    fn drop(&mut self) {
        let panicking = std::thread::panicking();
        let token = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if panicking && slot.guarded {
                slot.orphaned = true;
                return;
            }
            slot.token.take()
        };
        let Some(token) = token else {
            return;
        };
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        if panicking {
            warn!(site = %self.site, token = %token.id, "site call dropped while panicking");
            engine.raise(
                token,
                TokenException::SitePanic {
                    site: self.site.to_string(),
                    message: DROPPED_IN_PANIC.to_string(),
                },
            );
        } else {
            debug!(site = %self.site, token = %token.id, "site call dropped without an answer");
            engine.die(token);
        }
    }
}

impl fmt::Debug for SiteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCall")
            .field("site", &self.site)
            .field("next", &self.next)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Run a site call, turning a panic into a token exception
pub(crate) fn invoke(site: &SiteRef, args: Vec<Value>, call: SiteCall) {
    let slot = call.slot.clone();
    let engine = call.engine.clone();
    slot.lock().expect("site call: lock poisoned").guarded = true;
    let result = panic::catch_unwind(AssertUnwindSafe(|| site.site().call(args, call)));

    let (token, message) = {
        let mut slot = slot.lock().expect("site call: lock poisoned");
        slot.guarded = false;
        match result {
            Err(payload) => {
                let message = format_panic_payload(&payload);
                warn!(site = site.name(), %message, "site panicked");
                (slot.token.take(), message)
            }
            // Another thread took the handle and panicked with it
            Ok(()) if slot.orphaned => (slot.token.take(), DROPPED_IN_PANIC.to_string()),
            Ok(()) => return,
        }
    };
    if let Some(token) = token
        && let Some(engine) = engine.upgrade()
    {
        engine.raise(
            token,
            TokenException::SitePanic {
                site: site.name().to_string(),
                message,
            },
        );
    }
}

type SiteFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A site backed by a plain function that answers immediately
///
/// `Ok` resumes the caller, `Err` raises a site exception.
pub struct FnSite {
    name: String,
    blocking: bool,
    capability: Option<String>,
    f: Box<SiteFn>,
}

impl FnSite {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        FnSite {
            name: name.into(),
            blocking: false,
            capability: None,
            f: Box::new(f),
        }
    }

    /// Run calls on the site pool
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }
}

impl Site for FnSite {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Value>, call: SiteCall) {
        match (self.f)(&args) {
            Ok(value) => call.resume(value),
            Err(message) => call.fail(TokenException::site(&self.name, message)),
        }
    }

    fn blocking(&self) -> bool {
        self.blocking
    }

    fn capability(&self) -> Option<&str> {
        self.capability.as_deref()
    }
}

/// Sites available for linking, by name
#[derive(Default, Clone)]
pub struct SiteRegistry {
    sites: HashMap<String, Arc<dyn Site>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a site under its own name, replacing any previous one
    pub fn register(&mut self, site: Arc<dyn Site>) {
        self.sites.insert(site.name().to_string(), site);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Site>> {
        self.sites.get(name)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }
}

impl fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("SiteRegistry").field("sites", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_by_name() {
        let mut registry = SiteRegistry::new();
        registry.register(Arc::new(FnSite::new("add", |args| {
            Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))
        })));
        registry.register(Arc::new(FnSite::new("sleep", |_| Ok(Value::Signal)).blocking()));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("add").is_some());
        assert!(registry.get("sleep").is_some_and(|s| s.blocking()));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_fn_site_capability() {
        let site = FnSite::new("clock", |_| Ok(Value::Int(0))).requires("time");
        assert_eq!(site.capability(), Some("time"));
        assert!(!Site::blocking(&site));
    }

    #[test]
    fn test_detached_call_is_inert() {
        // A call whose engine is gone completes without effect
        let mut table = crate::scope::ScopeTable::new();
        let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (region, id) = table.open_root(alive.clone());
        let token = Token::root(id, alive, region, NodeId(0));

        let call = SiteCall::new(Weak::new(), token, NodeId(1), "demo");
        assert!(call.is_live());
        assert_eq!(call.site(), "demo");
        call.resume(Value::Int(1));
    }
}
