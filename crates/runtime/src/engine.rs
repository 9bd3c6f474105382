//! Engine: runnable queue, dispatch workers and the control surface
//!
//! One FIFO queue of runnable tokens is drained by a fixed set of dispatch
//! threads. A worker runs a token for up to `burst` steps and then puts it
//! back at the end of the queue, so a long-running token cannot starve the
//! rest. Tokens leave the queue when they park on a cell or hand themselves
//! to a site, and come back through `activate` when they can continue.
//!
//! ## Termination
//!
//! The engine is done when no token is pending. Pending means "has a record
//! in the scope table", wherever the token itself currently is, so parked
//! tokens keep a run alive. The last record to go (a token finishing, or
//! `terminate` closing the root region) triggers `finish`, which fires
//! `Listener::on_terminate` exactly once and wakes `wait`.
//!
//! ## Lock order
//!
//! The scope table, each group cell and the schedule have their own mutex.
//! None of them is held while another is taken: scope changes hand back a
//! `Fallout`, which is applied after the scope lock is released.
//!
//! ## Statistics
//!
//! Counters are lock-free atomics, read by `summary()` and the diagnostics
//! dump. The peak live-token count is kept with a compare-exchange loop.

use crate::cell::GroupCell;
use crate::config::EngineConfig;
use crate::error::{EngineError, RuntimeError, TokenError, TokenException, format_panic_payload};
use crate::interpreter::{self, LinkedProgram, Step};
use crate::listener::{Listener, NullListener};
use crate::pool::{Job, PoolStats, SitePool};
use crate::scope::{Fallout, RegionId, RegionInfo, RegionKind, Refused, ScopeTable, TokenId, TokenInfo};
use crate::site::{Site, SiteRegistry};
use crate::token::Token;
use crate::tracer::{TraceEvent, Tracer};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use weft_core::{NodeId, Program};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Terminated,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Terminated => "terminated",
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub publications: u64,
    pub tokens_created: u64,
    pub peak_tokens: usize,
    pub site_calls: u64,
    /// Uncaught token exceptions
    pub errors: u64,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct Stats {
    tokens_created: AtomicU64,
    peak_tokens: AtomicUsize,
    publications: AtomicU64,
    site_calls: AtomicU64,
    errors: AtomicU64,
}

struct Schedule {
    state: EngineState,
    runnable: VecDeque<Token>,
    /// No token is pending; workers exit
    finished: bool,
    /// `on_terminate` has returned
    done: bool,
}

/// State shared by the engine handle, dispatch workers and site calls
pub(crate) struct Shared {
    me: Weak<Shared>,
    config: EngineConfig,
    listener: Arc<dyn Listener>,
    tracer: Option<Arc<dyn Tracer>>,
    registry: SiteRegistry,
    program: OnceLock<Arc<LinkedProgram>>,
    root: OnceLock<RegionId>,
    scope: Mutex<ScopeTable>,
    sched: Mutex<Schedule>,
    /// Signalled when the queue gains a token or the state changes
    work: Condvar,
    /// Signalled once the run is over
    done: Condvar,
    pool: Arc<SitePool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    fatal: Mutex<Option<EngineError>>,
    stats: Stats,
    started: OnceLock<Instant>,
    elapsed: Mutex<Option<Duration>>,
}

impl Shared {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn handle(&self) -> Weak<Shared> {
        self.me.clone()
    }

    fn scope(&self) -> MutexGuard<'_, ScopeTable> {
        self.scope.lock().expect("scope table: lock poisoned")
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.sched.lock().expect("schedule: lock poisoned")
    }

    fn trace(&self, event: TraceEvent<'_>) {
        if let Some(tracer) = &self.tracer {
            self.callout("tracer", || tracer.trace(event));
        }
    }

    /// Run listener or tracer code; a panic aborts the run
    fn callout(&self, context: &'static str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let message = format_panic_payload(&payload);
            error!(context, %message, "callout panicked");
            self.abort(EngineError::Panicked { context, message });
        }
    }

    /// Count a new token and raise the high-water mark if needed
    fn created(&self, live: usize) {
        self.stats.tokens_created.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.stats.peak_tokens.load(Ordering::Acquire);
        while live > peak {
            match self.stats.peak_tokens.compare_exchange_weak(
                peak,
                live,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    pub(crate) fn site_called(&self) {
        self.stats.site_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.pool.submit(job)
    }

    /// Put a token on the runnable queue
    pub(crate) fn activate(&self, token: Token) {
        let mut sched = self.schedule();
        if sched.finished || !token.is_alive() {
            return;
        }
        sched.runnable.push_back(token);
        drop(sched);
        self.work.notify_one();
    }

    /// Wake a parked token
    pub(crate) fn unblock(&self, token: Token) {
        if !token.is_alive() {
            return;
        }
        self.unparked(token.id);
        self.trace(TraceEvent::Unblock { token: token.id });
        self.activate(token);
    }

    pub(crate) fn parked(&self, token: &Token) {
        self.scope().set_parked(token.id, Some(token.node));
        self.trace(TraceEvent::Block {
            token: token.id,
            node: token.node,
        });
    }

    pub(crate) fn unparked(&self, token: TokenId) {
        self.scope().set_parked(token, None);
    }

    /// End a token; idempotent for tokens that were already killed
    pub(crate) fn die(&self, token: Token) {
        if token.is_alive() {
            self.trace(TraceEvent::Die { token: token.id });
        }
        let fallout = self.scope().remove_token(token.id);
        self.settle(fallout);
    }

    /// Carry out what a scope change left to do
    fn settle(&self, fallout: Fallout) {
        for token in &fallout.killed {
            self.trace(TraceEvent::Die { token: *token });
        }
        for cell in fallout.cells {
            if let Some(waiters) = cell.close() {
                for waiter in waiters {
                    self.die(waiter);
                }
            }
        }
        for fallback in fallout.fallbacks {
            self.activate(fallback);
        }
        if fallout.drained {
            self.finish();
        }
    }

    /// Register a copy of `parent` at `node` in `region`
    ///
    /// `Ok(None)` means the region has closed and the copy would be dead.
    pub(crate) fn fork(
        &self,
        parent: &Token,
        region: RegionId,
        group: Option<Arc<GroupCell>>,
        node: NodeId,
    ) -> Result<Option<Token>, TokenException> {
        let alive = Arc::new(AtomicBool::new(true));
        let registered = {
            let mut scope = self.scope();
            scope
                .add_token(region, alive.clone(), self.config.token_limit)
                .map(|id| (id, scope.live_tokens()))
        };
        let (id, live) = match registered {
            Ok(registered) => registered,
            Err(Refused::Closed) => return Ok(None),
            Err(Refused::Limit(limit)) => return Err(TokenException::TokenLimit(limit)),
        };
        self.created(live);
        self.trace(TraceEvent::Fork {
            parent: Some(parent.id),
            child: id,
        });
        Ok(Some(parent.fork(id, alive, region, group, node)))
    }

    /// Open the group region of a pruning combinator with its first token
    /// at `node`
    pub(crate) fn open_group(
        &self,
        parent: &Token,
        cell: Arc<GroupCell>,
        node: NodeId,
    ) -> Result<Option<Token>, TokenException> {
        let alive = Arc::new(AtomicBool::new(true));
        let opened = {
            let mut scope = self.scope();
            scope
                .open_region(
                    parent.region,
                    RegionKind::Group(cell.clone()),
                    alive.clone(),
                    self.config.token_limit,
                )
                .map(|opened| (opened, scope.live_tokens()))
        };
        let ((region, id), live) = match opened {
            Ok(opened) => opened,
            Err(Refused::Closed) => return Ok(None),
            Err(Refused::Limit(limit)) => return Err(TokenException::TokenLimit(limit)),
        };
        cell.attach(region);
        self.created(live);
        self.trace(TraceEvent::Fork {
            parent: Some(parent.id),
            child: id,
        });
        Ok(Some(parent.fork(id, alive, region, Some(cell), node)))
    }

    /// Move `token` into a new otherwise region, parking a fallback at
    /// `node` until the region finishes
    ///
    /// `Ok(false)` means the token has already been killed.
    pub(crate) fn open_otherwise(
        &self,
        token: &mut Token,
        node: NodeId,
    ) -> Result<bool, TokenException> {
        let alive = Arc::new(AtomicBool::new(true));
        let opened = {
            let mut scope = self.scope();
            scope
                .open_otherwise(token.id, alive.clone(), self.config.token_limit)
                .map(|opened| (opened, scope.live_tokens()))
        };
        let ((region, id), live) = match opened {
            Ok(opened) => opened,
            Err(Refused::Closed) => return Ok(false),
            Err(Refused::Limit(limit)) => return Err(TokenException::TokenLimit(limit)),
        };
        self.created(live);
        self.trace(TraceEvent::Fork {
            parent: Some(token.id),
            child: id,
        });
        let fallback = token.fork(id, alive, token.region, token.group.clone(), node);
        token.region = region;
        if let Err(fallback) = self.scope().stash_fallback(region, fallback) {
            // Closed underneath us; the fallback's record went with it
            drop(fallback);
        }
        Ok(true)
    }

    /// Publish out of the enclosing otherwise region
    ///
    /// `Ok(false)` means the token has already been killed.
    pub(crate) fn leave(&self, token: &mut Token) -> Result<bool, EngineError> {
        let left = self.scope().leave(token.id);
        match left {
            Ok(Some((parent, fallout))) => {
                token.region = parent;
                self.settle(fallout);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(id) => Err(EngineError::RegionMismatch(id)),
        }
    }

    /// Bind the token's pruning cell with its result, then end the token
    pub(crate) fn store(&self, token: Token, cell: &GroupCell) {
        if token.is_alive()
            && let Some(waiters) = cell.bind(token.result.clone())
        {
            self.trace(TraceEvent::Bind {
                token: token.id,
                value: &token.result,
            });
            if let Some(region) = cell.region() {
                let fallout = self.scope().close_region(region);
                self.settle(fallout);
            }
            for waiter in waiters {
                self.unblock(waiter);
            }
        }
        self.die(token);
    }

    /// Deliver a top-level publication, then end the token
    pub(crate) fn publish(&self, token: Token) {
        if !token.is_alive() {
            return;
        }
        let max = self.config.max_publications;
        let counted = self
            .stats
            .publications
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match max {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            });
        if let Ok(previous) = counted {
            self.trace(TraceEvent::Publish {
                token: token.id,
                value: &token.result,
            });
            self.callout("listener", || self.listener.on_publish(&token.result));
            if max == Some(previous + 1) {
                debug!(publications = previous + 1, "publication limit reached");
                self.die(token);
                self.terminate();
                return;
            }
        }
        self.die(token);
    }

    /// Hand an exception to the token's nearest handler, or report it
    pub(crate) fn raise(&self, mut token: Token, exception: TokenException) {
        if !token.is_alive() {
            return;
        }
        match token.pop_handler() {
            Some(handler) => {
                let alive = Arc::new(AtomicBool::new(true));
                // Handlers are not subject to the token limit; they replace
                // the raising token.
                let registered = {
                    let mut scope = self.scope();
                    scope
                        .add_token(handler.region, alive.clone(), None)
                        .map(|id| (id, scope.live_tokens()))
                };
                if let Ok((id, live)) = registered {
                    self.created(live);
                    self.trace(TraceEvent::Fork {
                        parent: Some(token.id),
                        child: id,
                    });
                    let caught = token.for_handler(id, alive, handler, exception.to_value());
                    self.activate(caught);
                }
            }
            None => self.report(&token, exception),
        }
        self.die(token);
    }

    fn report(&self, token: &Token, exception: TokenException) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        self.trace(TraceEvent::Error {
            token: token.id,
            exception: &exception,
        });
        let program = self.program.get();
        let location = program.and_then(|p| p.location(token.node).cloned());
        let backtrace = program
            .map(|p| {
                token
                    .call_sites()
                    .filter_map(|call| p.location(call).cloned())
                    .collect()
            })
            .unwrap_or_default();
        warn!(token = %token.id, node = %token.node, %exception, "uncaught exception");
        let error = RuntimeError::Token(TokenError {
            token: token.id,
            exception,
            location,
            backtrace,
        });
        self.callout("listener", || self.listener.on_error(&error));
    }

    /// Abort the run
    pub(crate) fn fatal(&self, token: Token, err: EngineError) {
        let kind = self
            .program
            .get()
            .map(|p| p.node_kind(token.node))
            .unwrap_or("?");
        error!(token = %token.id, node = %token.node, kind, error = %err, "fatal engine error");
        // The token's record goes with the root region
        drop(token);
        self.abort(err);
    }

    /// Record the first fatal error, report it and cancel everything
    ///
    /// Later calls only terminate, so a callout that keeps panicking while
    /// the run winds down cannot recurse.
    fn abort(&self, err: EngineError) {
        {
            let mut fatal = self.fatal.lock().expect("engine fatal: lock poisoned");
            if fatal.is_some() {
                drop(fatal);
                self.terminate();
                return;
            }
            *fatal = Some(err.clone());
        }
        let error = RuntimeError::Fatal(err);
        if panic::catch_unwind(AssertUnwindSafe(|| self.listener.on_error(&error))).is_err() {
            warn!("listener panicked while reporting a fatal error");
        }
        self.terminate();
    }

    /// Cancel every pending token
    pub(crate) fn terminate(&self) {
        match self.root.get() {
            Some(root) => {
                let fallout = self.scope().close_region(*root);
                self.settle(fallout);
            }
            None => self.finish(),
        }
    }

    /// End the run; only the first call has an effect
    fn finish(&self) {
        let dropped = {
            let mut sched = self.schedule();
            if sched.finished {
                return;
            }
            sched.finished = true;
            sched.state = EngineState::Terminated;
            std::mem::take(&mut sched.runnable)
        };
        drop(dropped);
        *self.elapsed.lock().expect("engine elapsed: lock poisoned") =
            self.started.get().map(Instant::elapsed);
        self.pool.shutdown();
        self.work.notify_all();
        debug!("engine finished");

        if panic::catch_unwind(AssertUnwindSafe(|| self.listener.on_terminate())).is_err() {
            warn!("listener panicked in on_terminate");
        }

        self.schedule().done = true;
        self.done.notify_all();
    }

    /// Register the root token at `node` and queue it
    fn plant_root(&self, node: NodeId) {
        let alive = Arc::new(AtomicBool::new(true));
        let (region, id) = self.scope().open_root(alive.clone());
        let _ = self.root.set(region);
        if self.schedule().finished {
            // Terminated before the root region was known
            debug!("engine terminated while starting");
            let fallout = self.scope().close_region(region);
            self.settle(fallout);
            return;
        }
        self.created(1);
        self.trace(TraceEvent::Fork {
            parent: None,
            child: id,
        });
        self.activate(Token::root(id, alive, region, node));
    }

    fn next_runnable(&self) -> Option<Token> {
        let mut sched = self.schedule();
        loop {
            if sched.finished {
                return None;
            }
            if sched.state == EngineState::Running
                && let Some(token) = sched.runnable.pop_front()
            {
                return Some(token);
            }
            sched = self.work.wait(sched).expect("schedule: lock poisoned");
        }
    }
}

fn dispatch(shared: Arc<Shared>, program: Arc<LinkedProgram>) {
    let burst = shared.config.burst.max(1);
    while let Some(mut token) = shared.next_runnable() {
        let mut steps = 0;
        loop {
            let (id, node) = (token.id, token.node);
            let step = panic::catch_unwind(AssertUnwindSafe(|| {
                interpreter::step(&shared, &program, token)
            }));
            match step {
                Ok(Step::Continue(next)) => {
                    steps += 1;
                    if steps >= burst {
                        shared.activate(next);
                        break;
                    }
                    token = next;
                }
                Ok(Step::Suspended | Step::Halted) => break,
                Err(payload) => {
                    // The token unwound with the panic; closing the root
                    // region removes its record
                    let message = format_panic_payload(&payload);
                    error!(token = %id, %node, %message, "step panicked");
                    shared.abort(EngineError::Panicked {
                        context: "dispatch",
                        message,
                    });
                    break;
                }
            }
        }
    }
    debug!("dispatch worker exiting");
}

/// Builder for an [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    listener: Arc<dyn Listener>,
    tracer: Option<Arc<dyn Tracer>>,
    registry: SiteRegistry,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            listener: Arc::new(NullListener),
            tracer: None,
            registry: SiteRegistry::new(),
        }
    }
}

impl EngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_site(mut self, site: impl Site + 'static) -> Self {
        self.registry.register(Arc::new(site));
        self
    }

    /// Register every site in `registry`, on top of those already added
    pub fn with_registry(mut self, registry: &SiteRegistry) -> Self {
        for name in registry.names() {
            if let Some(site) = registry.get(name) {
                self.registry.register(site.clone());
            }
        }
        self
    }

    pub fn build(self) -> Engine {
        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            config: self.config,
            listener: self.listener,
            tracer: self.tracer,
            registry: self.registry,
            program: OnceLock::new(),
            root: OnceLock::new(),
            scope: Mutex::new(ScopeTable::new()),
            sched: Mutex::new(Schedule {
                state: EngineState::Idle,
                runnable: VecDeque::new(),
                finished: false,
                done: false,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
            pool: Arc::new(SitePool::new()),
            workers: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            stats: Stats::default(),
            started: OnceLock::new(),
            elapsed: Mutex::new(None),
        });
        Engine { shared }
    }
}

/// Handle to one run of a program
///
/// Clones share the same engine. An engine runs one program; after it has
/// terminated, build a new one.
///
/// # Example
///
/// ```
/// use weft_core::{Arg, Literal, ProgramBuilder};
/// use weft_runtime::Engine;
///
/// let mut b = ProgramBuilder::new();
/// let publish = b.publish();
/// let root = b.let_(Arg::Lit(Literal::Int(42)), publish);
/// let program = b.build(root).unwrap();
///
/// let summary = Engine::builder().build().run(program).unwrap();
/// assert_eq!(summary.publications, 1);
/// ```
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Link `program` and start running it from its root node
    pub fn start(&self, program: Program) -> Result<(), EngineError> {
        let shared = &self.shared;
        let linked = Arc::new(LinkedProgram::link(program, &shared.registry)?);
        {
            let mut sched = shared.schedule();
            if sched.state != EngineState::Idle {
                return Err(EngineError::AlreadyStarted);
            }
            sched.state = EngineState::Running;
        }
        let _ = shared.program.set(linked.clone());
        let _ = shared.started.set(Instant::now());

        if let Err(err) = self.spawn_threads(&linked) {
            let err = EngineError::Spawn(err.to_string());
            error!(error = %err, "engine failed to start");
            shared.finish();
            return Err(err);
        }

        shared.plant_root(linked.root());
        debug!(
            dispatch_threads = shared.config.dispatch_threads,
            site_threads = shared.config.site_threads,
            "engine started"
        );
        Ok(())
    }

    fn spawn_threads(&self, program: &Arc<LinkedProgram>) -> std::io::Result<()> {
        let shared = &self.shared;
        SitePool::start(&shared.pool, shared.config.site_threads)?;
        let mut workers = shared.workers.lock().expect("engine workers: lock poisoned");
        for i in 0..shared.config.dispatch_threads.max(1) {
            let worker = shared.clone();
            let program = program.clone();
            let handle = std::thread::Builder::new()
                .name(format!("weft-dispatch-{}", i))
                .spawn(move || dispatch(worker, program))?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Block until the run is over
    pub fn wait(&self) -> Result<RunSummary, EngineError> {
        let shared = &self.shared;
        {
            let mut sched = shared.schedule();
            if sched.state == EngineState::Idle {
                return Err(EngineError::NotStarted);
            }
            while !sched.done {
                sched = shared.done.wait(sched).expect("schedule: lock poisoned");
            }
        }

        let workers = std::mem::take(&mut *shared.workers.lock().expect("engine workers: lock poisoned"));
        let current = std::thread::current().id();
        for worker in workers {
            // A listener may call `wait` from a dispatch thread
            if worker.thread().id() != current && worker.join().is_err() {
                warn!("dispatch worker panicked");
            }
        }

        match shared.fatal.lock().expect("engine fatal: lock poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(self.summary()),
        }
    }

    /// `start` followed by `wait`
    pub fn run(&self, program: Program) -> Result<RunSummary, EngineError> {
        self.start(program)?;
        self.wait()
    }

    /// Stop handing out tokens; in-flight bursts and site calls finish
    pub fn pause(&self) {
        let mut sched = self.shared.schedule();
        if sched.state == EngineState::Running {
            sched.state = EngineState::Paused;
            debug!("engine paused");
        }
    }

    pub fn unpause(&self) {
        let mut sched = self.shared.schedule();
        if sched.state == EngineState::Paused {
            sched.state = EngineState::Running;
            drop(sched);
            self.shared.work.notify_all();
            debug!("engine resumed");
        }
    }

    /// Cancel every token and end the run
    pub fn terminate(&self) {
        debug!("engine terminating");
        self.shared.terminate();
    }

    pub fn state(&self) -> EngineState {
        self.shared.schedule().state
    }

    /// Snapshot of the pending tokens
    pub fn tokens(&self) -> Vec<TokenInfo> {
        self.shared.scope().tokens()
    }

    /// Snapshot of the open regions
    pub fn regions(&self) -> Vec<RegionInfo> {
        self.shared.scope().regions()
    }

    /// Tokens registered in `region` or any region beneath it
    pub fn region_tokens(&self, region: RegionId) -> Vec<TokenId> {
        self.shared.scope().snapshot(region)
    }

    pub fn pending(&self) -> usize {
        self.shared.scope().live_tokens()
    }

    /// Tokens waiting in the runnable queue
    pub fn queued(&self) -> usize {
        self.shared.schedule().runnable.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Kind of the node at `node`, if a program is loaded
    pub fn node_kind(&self, node: NodeId) -> Option<&'static str> {
        self.shared.program.get().map(|p| p.node_kind(node))
    }

    /// Counters so far; final once `wait` has returned
    pub fn summary(&self) -> RunSummary {
        let shared = &self.shared;
        let elapsed = shared
            .elapsed
            .lock()
            .expect("engine elapsed: lock poisoned")
            .or_else(|| shared.started.get().map(Instant::elapsed))
            .unwrap_or_default();
        RunSummary {
            publications: shared.stats.publications.load(Ordering::Acquire),
            tokens_created: shared.stats.tokens_created.load(Ordering::Relaxed),
            peak_tokens: shared.stats.peak_tokens.load(Ordering::Acquire),
            site_calls: shared.stats.site_calls.load(Ordering::Relaxed),
            errors: shared.stats.errors.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}
