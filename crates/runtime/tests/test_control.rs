//! Engine control surface: limits, capabilities, pause and termination

mod common;

use common::{Hold, Recorder, Shared, TIMEOUT, single_threaded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use weft_core::{Arg, Literal, Node, ProgramBuilder};
use weft_runtime::{
    Engine, EngineError, EngineState, FnSite, Listener, RuntimeError, TokenException, TraceEvent,
    Tracer, Value,
};

fn int(n: i64) -> Arg {
    Arg::Lit(Literal::Int(n))
}

fn exceptions(recorder: &Recorder) -> Vec<TokenException> {
    recorder
        .errors()
        .into_iter()
        .filter_map(|e| match e {
            RuntimeError::Token(error) => Some(error.exception),
            RuntimeError::Fatal(_) => None,
        })
        .collect()
}

#[test]
fn test_max_publications_stops_engine() {
    // 1 | 2 | 3, stopping after the first
    let mut b = ProgramBuilder::new();
    let publish = b.publish();
    let one = b.let_(int(1), publish);
    let two = b.let_(int(2), publish);
    let three = b.let_(int(3), publish);
    let inner = b.fork(two, three);
    let root = b.fork(one, inner);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let engine = Engine::builder()
        .with_config(single_threaded().with_max_publications(1))
        .with_listener(recorder.clone())
        .build();
    let summary = engine.run(program).unwrap();

    assert_eq!(recorder.publications().len(), 1);
    assert_eq!(summary.publications, 1);
    assert_eq!(engine.state(), EngineState::Terminated);
    assert_eq!(recorder.terminated(), 1);
}

#[test]
fn test_stack_limit_raises_locally() {
    // def f() = f() >> stop; f()
    let mut b = ProgramBuilder::new();
    let stop = b.stop();
    let body = b.call(Arg::Var(0), vec![], stop);
    let f = b.def("f", 0, body);
    let publish = b.publish();
    let call = b.call(Arg::Var(0), vec![], publish);
    let root = b.defs(vec![f], call);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let summary = Engine::builder()
        .with_config(single_threaded().with_stack_limit(8))
        .with_listener(recorder.clone())
        .build()
        .run(program)
        .unwrap();

    assert_eq!(exceptions(&recorder), vec![TokenException::StackLimit(8)]);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.publications, 0);
}

#[test]
fn test_token_limit_raises_locally() {
    // (1 | 2) | 3 with room for two tokens
    let mut b = ProgramBuilder::new();
    let publish = b.publish();
    let one = b.let_(int(1), publish);
    let two = b.let_(int(2), publish);
    let three = b.let_(int(3), publish);
    let inner = b.fork(one, two);
    let root = b.fork(inner, three);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let summary = Engine::builder()
        .with_config(single_threaded().with_token_limit(2))
        .with_listener(recorder.clone())
        .build()
        .run(program)
        .unwrap();

    // The root forks once, then fails to fork again while the first child
    // is still queued
    assert_eq!(exceptions(&recorder), vec![TokenException::TokenLimit(2)]);
    assert_eq!(recorder.publications(), vec![Value::Int(3)]);
    assert_eq!(summary.peak_tokens, 2);
}

#[test]
fn test_capability_denied_without_grant() {
    let ran = Arc::new(AtomicBool::new(false));

    let build = |granted: bool| {
        let mut b = ProgramBuilder::new();
        let fetch = b.site("fetch");
        let publish = b.publish();
        let root = b.call(Arg::Site(fetch), vec![], publish);
        let program = b.build(root).unwrap();

        let flag = ran.clone();
        let recorder = Recorder::new();
        let engine = Engine::builder()
            .with_config(single_threaded().with_capability("net", granted))
            .with_listener(recorder.clone())
            .with_site(
                FnSite::new("fetch", move |_| {
                    flag.store(true, Ordering::SeqCst);
                    Ok(Value::str("page"))
                })
                .requires("net"),
            )
            .build();
        (engine, program, recorder)
    };

    let (engine, program, recorder) = build(false);
    let summary = engine.run(program).unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(
        exceptions(&recorder),
        vec![TokenException::Capability("net".into())]
    );
    assert_eq!(summary.site_calls, 0);

    let (engine, program, recorder) = build(true);
    engine.run(program).unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(recorder.publications(), vec![Value::str("page")]);
}

#[test]
fn test_pause_holds_dispatch() {
    // gate() >> 1
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let mut b = ProgramBuilder::new();
    let gate = b.site("gate");
    let publish = b.publish();
    let one = b.let_(int(1), publish);
    let root = b.call(Arg::Site(gate), vec![], one);
    let program = b.build(root).unwrap();

    let (recorder, published) = Recorder::with_channel();
    let engine = Engine::builder()
        .with_config(single_threaded())
        .with_listener(recorder.clone())
        .with_site(
            FnSite::new("gate", move |_| {
                release_rx
                    .lock()
                    .unwrap()
                    .recv()
                    .map(|_| Value::Signal)
                    .map_err(|e| e.to_string())
            })
            .blocking(),
        )
        .build();

    engine.start(program).unwrap();
    engine.pause();
    assert_eq!(engine.state(), EngineState::Paused);

    // The site answers while paused; the token waits in the queue
    release_tx.send(()).unwrap();
    assert!(published.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(engine.queued(), 1);

    engine.unpause();
    assert_eq!(published.recv_timeout(TIMEOUT).unwrap(), Value::Int(1));
    let summary = engine.wait().unwrap();
    assert_eq!(summary.publications, 1);
}

#[test]
fn test_terminate_cancels_parked_tokens_once() {
    let (hold, called) = Hold::new();

    let mut b = ProgramBuilder::new();
    let site = b.site("hold");
    let publish = b.publish();
    let left = b.call(Arg::Site(site), vec![], publish);
    let right = b.call(Arg::Site(site), vec![], publish);
    let root = b.fork(left, right);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let engine = Engine::builder()
        .with_listener(recorder.clone())
        .with_site(Shared(hold.clone()))
        .build();
    engine.start(program).unwrap();

    called.recv_timeout(TIMEOUT).unwrap();
    called.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(engine.pending(), 2);
    assert!(
        engine
            .tokens()
            .iter()
            .all(|token| token.parked.is_some())
    );

    engine.terminate();
    engine.terminate();
    let summary = engine.wait().unwrap();

    assert!(!hold.any_live());
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.state(), EngineState::Terminated);
    assert_eq!(recorder.terminated(), 1);
    assert_eq!(summary.publications, 0);
    assert!(recorder.errors().is_empty());
}

#[test]
fn test_blocking_site_runs_on_pool() {
    let mut b = ProgramBuilder::new();
    let whoami = b.site("whoami");
    let publish = b.publish();
    let root = b.call(Arg::Site(whoami), vec![], publish);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let engine = Engine::builder()
        .with_listener(recorder.clone())
        .with_site(
            FnSite::new("whoami", |_| {
                let name = std::thread::current().name().unwrap_or("").to_string();
                Ok(Value::str(&name))
            })
            .blocking(),
        )
        .build();
    engine.run(program).unwrap();

    let published = recorder.publications();
    assert_eq!(published.len(), 1);
    assert!(published[0].as_str().unwrap().starts_with("weft-site-"));
}

#[test]
fn test_dropped_site_call_halts_caller() {
    let mut b = ProgramBuilder::new();
    let ignore = b.site("ignore");
    let publish = b.publish();
    let root = b.call(Arg::Site(ignore), vec![], publish);
    let program = b.build(root).unwrap();

    struct Ignore;
    impl weft_runtime::Site for Ignore {
        fn name(&self) -> &str {
            "ignore"
        }
        fn call(&self, _args: Vec<Value>, _call: weft_runtime::SiteCall) {}
    }

    let recorder = Recorder::new();
    let summary = Engine::builder()
        .with_listener(recorder.clone())
        .with_site(Ignore)
        .build()
        .run(program)
        .unwrap();

    assert!(recorder.publications().is_empty());
    assert!(recorder.errors().is_empty());
    assert_eq!(summary.site_calls, 1);
    assert_eq!(recorder.terminated(), 1);
}

#[test]
fn test_fatal_error_aborts_run() {
    // A bare return at top level has nowhere to go
    let mut b = ProgramBuilder::new();
    let root = b.node(Node::Return);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let engine = Engine::builder().with_listener(recorder.clone()).build();
    assert_eq!(engine.run(program), Err(EngineError::EmptyContinuation));
    assert_eq!(
        recorder.errors(),
        vec![RuntimeError::Fatal(EngineError::EmptyContinuation)]
    );
    assert_eq!(recorder.terminated(), 1);
}

#[test]
fn test_start_rejects_unknown_site_and_restart() {
    let mut b = ProgramBuilder::new();
    let missing = b.site("missing");
    let publish = b.publish();
    let root = b.call(Arg::Site(missing), vec![], publish);
    let program = b.build(root).unwrap();

    let engine = Engine::default();
    assert_eq!(
        engine.start(program),
        Err(EngineError::UnknownSite("missing".into()))
    );
    assert_eq!(engine.state(), EngineState::Idle);

    let mut b = ProgramBuilder::new();
    let root = b.stop();
    let program = b.build(root).unwrap();
    engine.run(program.clone()).unwrap();
    assert_eq!(engine.start(program), Err(EngineError::AlreadyStarted));
}

/// Forwards to a recorder but panics on every publication
struct PanicOnPublish(Arc<Recorder>);

impl Listener for PanicOnPublish {
    fn on_publish(&self, _value: &Value) {
        panic!("listener exploded");
    }

    fn on_error(&self, error: &RuntimeError) {
        self.0.on_error(error);
    }

    fn on_terminate(&self) {
        self.0.on_terminate();
    }
}

#[test]
fn test_panicking_listener_aborts_run() {
    // 1 | hold() >> 2
    let (hold, _called) = Hold::new();

    let mut b = ProgramBuilder::new();
    let site = b.site("hold");
    let publish = b.publish();
    let one = b.let_(int(1), publish);
    let two = b.let_(int(2), publish);
    let held = b.call(Arg::Site(site), vec![], two);
    let root = b.fork(one, held);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let engine = Engine::builder()
        .with_config(single_threaded())
        .with_listener(Arc::new(PanicOnPublish(recorder.clone())))
        .with_site(Shared(hold.clone()))
        .build();
    let result = engine.run(program);

    assert!(matches!(
        &result,
        Err(EngineError::Panicked { context: "listener", message }) if message == "listener exploded"
    ));
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.state(), EngineState::Terminated);
    assert!(!hold.any_live());
    assert_eq!(recorder.terminated(), 1);
    assert!(
        recorder
            .errors()
            .iter()
            .any(|e| matches!(e, RuntimeError::Fatal(EngineError::Panicked { .. })))
    );
}

struct PanicOnPublishEvent;

impl Tracer for PanicOnPublishEvent {
    fn trace(&self, event: TraceEvent<'_>) {
        if let TraceEvent::Publish { .. } = event {
            panic!("tracer exploded");
        }
    }
}

#[test]
fn test_panicking_tracer_aborts_run() {
    let mut b = ProgramBuilder::new();
    let publish = b.publish();
    let root = b.let_(int(1), publish);
    let program = b.build(root).unwrap();

    let recorder = Recorder::new();
    let engine = Engine::builder()
        .with_config(single_threaded())
        .with_listener(recorder.clone())
        .with_tracer(Arc::new(PanicOnPublishEvent))
        .build();

    assert_eq!(
        engine.run(program),
        Err(EngineError::Panicked {
            context: "tracer",
            message: "tracer exploded".into(),
        })
    );
    assert_eq!(engine.pending(), 0);
    assert_eq!(recorder.terminated(), 1);
}

/// Hands the call to a thread that panics while holding it
struct PanicElsewhere {
    join: bool,
}

impl weft_runtime::Site for PanicElsewhere {
    fn name(&self) -> &str {
        "elsewhere"
    }

    fn call(&self, _args: Vec<Value>, call: weft_runtime::SiteCall) {
        let handle = std::thread::spawn(move || {
            let _call = call;
            panic!("worker exploded");
        });
        if self.join {
            let _ = handle.join();
        }
    }
}

#[test]
fn test_call_dropped_by_panicking_thread_raises() {
    // Joined: the handle is dropped while the call is still running.
    // Detached: it is most likely dropped after the call has returned.
    for join in [true, false] {
        let mut b = ProgramBuilder::new();
        let site = b.site("elsewhere");
        let publish = b.publish();
        let root = b.call(Arg::Site(site), vec![], publish);
        let program = b.build(root).unwrap();

        let recorder = Recorder::new();
        let engine = Engine::builder()
            .with_config(single_threaded())
            .with_listener(recorder.clone())
            .with_site(PanicElsewhere { join })
            .build();
        engine.start(program).unwrap();
        let summary = engine.wait().unwrap();

        let errors = exceptions(&recorder);
        assert_eq!(errors.len(), 1, "join = {join}");
        assert!(matches!(
            &errors[0],
            TokenException::SitePanic { site, .. } if site == "elsewhere"
        ));
        assert_eq!(summary.errors, 1);
        assert_eq!(engine.pending(), 0);
        assert_eq!(recorder.terminated(), 1);
    }
}
