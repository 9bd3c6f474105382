//! Run the bundled demo programs end to end

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use weft_cli::{demo_sites, load_program};
use weft_runtime::{Engine, EngineConfig, Listener, Value};

#[derive(Default)]
struct Collect(Mutex<Vec<Value>>);

impl Listener for Collect {
    fn on_publish(&self, value: &Value) {
        self.0.lock().unwrap().push(value.clone());
    }
}

fn run_demo(name: &str) -> (Vec<Value>, weft_runtime::RunSummary) {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name);
    let program = load_program(&path).unwrap();
    let collect = Arc::new(Collect::default());
    let summary = Engine::builder()
        .with_config(EngineConfig::new().with_dispatch_threads(2))
        .with_registry(&demo_sites())
        .with_listener(collect.clone())
        .build()
        .run(program)
        .unwrap();
    let mut published = collect.0.lock().unwrap().clone();
    published.sort_by_key(|v| v.as_int());
    (published, summary)
}

#[test]
fn test_parallel_demo() {
    let (published, summary) = run_demo("parallel.toml");
    assert_eq!(published, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(summary.site_calls, 2);
}

#[test]
fn test_prune_demo_takes_fast_branch() {
    let (published, summary) = run_demo("prune.toml");
    assert_eq!(published, vec![Value::Signal]);
    assert_eq!(summary.errors, 0);
}

#[test]
fn test_countdown_demo_is_silent() {
    let (published, summary) = run_demo("countdown.json");
    assert!(published.is_empty());
    // lt, ift, println, rwait, sub for 3, 2, 1, then lt and ift for 0
    assert_eq!(summary.site_calls, 17);
    assert_eq!(summary.errors, 0);
}

#[test]
fn test_demo_config_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("weft.toml");
    let config = weft_cli::load_config(Some(&path)).unwrap();
    assert!(!config.grants("net"));
}
