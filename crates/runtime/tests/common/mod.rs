//! Shared listeners and sites for the engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use weft_runtime::{EngineConfig, Listener, RuntimeError, Site, SiteCall, Value};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Records everything the engine reports
#[derive(Default)]
pub struct Recorder {
    publications: Mutex<Vec<Value>>,
    errors: Mutex<Vec<RuntimeError>>,
    terminated: AtomicUsize,
    published_tx: Mutex<Option<mpsc::Sender<Value>>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A recorder that also forwards publications to a channel
    pub fn with_channel() -> (Arc<Self>, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel();
        let recorder = Recorder {
            published_tx: Mutex::new(Some(tx)),
            ..Default::default()
        };
        (Arc::new(recorder), rx)
    }

    pub fn publications(&self) -> Vec<Value> {
        self.publications.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<RuntimeError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Listener for Recorder {
    fn on_publish(&self, value: &Value) {
        self.publications.lock().unwrap().push(value.clone());
        if let Some(tx) = self.published_tx.lock().unwrap().as_ref() {
            let _ = tx.send(value.clone());
        }
    }

    fn on_error(&self, error: &RuntimeError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn on_terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps every call it receives without ever answering
#[derive(Default)]
pub struct Hold {
    pub calls: Mutex<Vec<SiteCall>>,
    called_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Hold {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let hold = Hold {
            calls: Mutex::new(Vec::new()),
            called_tx: Mutex::new(Some(tx)),
        };
        (Arc::new(hold), rx)
    }

    pub fn any_live(&self) -> bool {
        self.calls.lock().unwrap().iter().any(SiteCall::is_live)
    }
}

impl Site for Hold {
    fn name(&self) -> &str {
        "hold"
    }

    fn call(&self, _args: Vec<Value>, call: SiteCall) {
        self.calls.lock().unwrap().push(call);
        if let Some(tx) = self.called_tx.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }
}

/// Lets `Arc<Hold>` be registered while the test keeps a handle
pub struct Shared<S>(pub Arc<S>);

impl<S: Site> Site for Shared<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn call(&self, args: Vec<Value>, call: SiteCall) {
        self.0.call(args, call)
    }

    fn blocking(&self) -> bool {
        self.0.blocking()
    }

    fn capability(&self) -> Option<&str> {
        self.0.capability()
    }
}

/// Resumes with a signal if its argument is true, halts otherwise
pub struct Ift;

impl Site for Ift {
    fn name(&self) -> &str {
        "ift"
    }

    fn call(&self, args: Vec<Value>, call: SiteCall) {
        match args.first() {
            Some(Value::Bool(true)) => call.resume_signal(),
            _ => call.halt(),
        }
    }
}

/// A small config that keeps scheduling deterministic
pub fn single_threaded() -> EngineConfig {
    EngineConfig::new()
        .with_dispatch_threads(1)
        .with_site_threads(2)
}
