//! Sites the runner links programs against
//!
//! Just enough to write demos: printing, integer arithmetic, comparisons,
//! the `ift`/`iff` guards, and `rwait` for a relative delay.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use weft_runtime::{FnSite, Site, SiteCall, SiteRegistry, Value};

/// Granularity at which a sleeping `rwait` notices cancellation
const RWAIT_POLL: Duration = Duration::from_millis(10);

fn ints(site: &str, args: &[Value]) -> Result<(i64, i64), String> {
    match args {
        [a, b] => match (a.as_int(), b.as_int()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(format!(
                "{} expects two integers, got {} and {}",
                site,
                a.type_name(),
                b.type_name()
            )),
        },
        _ => Err(format!("{} expects 2 arguments, got {}", site, args.len())),
    }
}

/// Writes its arguments to stdout, space separated
fn print_line(args: &[Value]) -> Result<Value, String> {
    let line = args
        .iter()
        .map(|value| match value {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", line).map_err(|e| e.to_string())?;
    Ok(Value::Signal)
}

/// Resumes with `signal` when its argument matches `want`, halts otherwise
struct Guard {
    name: &'static str,
    want: bool,
}

impl Site for Guard {
    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, args: Vec<Value>, call: SiteCall) {
        match args.as_slice() {
            [Value::Bool(b)] if *b == self.want => call.resume_signal(),
            [Value::Bool(_)] => call.halt(),
            _ => call.fail(weft_runtime::TokenException::site(
                self.name,
                "expects one boolean",
            )),
        }
    }
}

/// Sleeps for the given number of milliseconds, then resumes with `signal`
struct Rwait;

impl Site for Rwait {
    fn name(&self) -> &str {
        "rwait"
    }

    fn call(&self, args: Vec<Value>, call: SiteCall) {
        let millis = match args.as_slice() {
            [Value::Int(ms)] if *ms >= 0 => *ms as u64,
            _ => {
                call.fail(weft_runtime::TokenException::site(
                    "rwait",
                    "expects a non-negative integer",
                ));
                return;
            }
        };
        let deadline = Instant::now() + Duration::from_millis(millis);
        loop {
            if !call.is_live() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(RWAIT_POLL.min(deadline - now));
        }
        call.resume_signal();
    }

    fn blocking(&self) -> bool {
        true
    }
}

/// Registry holding every demo site
pub fn demo_sites() -> SiteRegistry {
    let mut registry = SiteRegistry::new();
    registry.register(Arc::new(FnSite::new("println", print_line)));
    registry.register(Arc::new(FnSite::new("add", |args| {
        let (a, b) = ints("add", args)?;
        a.checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string())
    })));
    registry.register(Arc::new(FnSite::new("sub", |args| {
        let (a, b) = ints("sub", args)?;
        a.checked_sub(b)
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string())
    })));
    registry.register(Arc::new(FnSite::new("lt", |args| {
        let (a, b) = ints("lt", args)?;
        Ok(Value::Bool(a < b))
    })));
    registry.register(Arc::new(FnSite::new("eq", |args| match args {
        [a, b] => Ok(Value::Bool(a == b)),
        _ => Err(format!("eq expects 2 arguments, got {}", args.len())),
    })));
    registry.register(Arc::new(Guard {
        name: "ift",
        want: true,
    }));
    registry.register(Arc::new(Guard {
        name: "iff",
        want: false,
    }));
    registry.register(Arc::new(Rwait));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use weft_core::{Arg, Literal, ProgramBuilder};
    use weft_runtime::{Engine, Listener, RuntimeError};

    #[derive(Default)]
    struct Collect {
        published: Mutex<Vec<Value>>,
        errors: Mutex<Vec<RuntimeError>>,
    }

    impl Listener for Collect {
        fn on_publish(&self, value: &Value) {
            self.published.lock().unwrap().push(value.clone());
        }

        fn on_error(&self, error: &RuntimeError) {
            self.errors.lock().unwrap().push(error.clone());
        }
    }

    fn run_call(site: &str, args: Vec<Arg>) -> Arc<Collect> {
        let mut b = ProgramBuilder::new();
        let target = b.site(site);
        let publish = b.publish();
        let root = b.call(Arg::Site(target), args, publish);
        let program = b.build(root).unwrap();

        let collect = Arc::new(Collect::default());
        Engine::builder()
            .with_registry(&demo_sites())
            .with_listener(collect.clone())
            .build()
            .run(program)
            .unwrap();
        collect
    }

    fn int(n: i64) -> Arg {
        Arg::Lit(Literal::Int(n))
    }

    #[test]
    fn test_registry_names() {
        let registry = demo_sites();
        for name in ["println", "add", "sub", "lt", "eq", "ift", "iff", "rwait"] {
            assert!(registry.get(name).is_some(), "missing {}", name);
        }
        assert!(registry.get("rwait").unwrap().blocking());
    }

    #[test]
    fn test_arithmetic() {
        let collect = run_call("add", vec![int(2), int(3)]);
        assert_eq!(*collect.published.lock().unwrap(), vec![Value::Int(5)]);

        let collect = run_call("sub", vec![int(i64::MIN), int(1)]);
        assert!(collect.published.lock().unwrap().is_empty());
        assert_eq!(collect.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_guards() {
        let yes = Arg::Lit(Literal::Bool(true));
        let collect = run_call("ift", vec![yes.clone()]);
        assert_eq!(*collect.published.lock().unwrap(), vec![Value::Signal]);

        let collect = run_call("iff", vec![yes]);
        assert!(collect.published.lock().unwrap().is_empty());
        assert!(collect.errors.lock().unwrap().is_empty());

        let collect = run_call("ift", vec![int(1)]);
        assert_eq!(collect.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_rwait_resumes_after_delay() {
        let start = Instant::now();
        let collect = run_call("rwait", vec![int(30)]);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(*collect.published.lock().unwrap(), vec![Value::Signal]);
    }
}
