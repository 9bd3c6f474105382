//! Weft CLI
//!
//! Runs compiled orchestration graphs against the demo sites and prints
//! what they publish.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, info};
use weft_cli::{demo_sites, load_config, load_program};
use weft_runtime::{
    Engine, Listener, LogTracer, RuntimeError, Value, WatchdogConfig, diagnostics, report,
    watchdog,
};

#[derive(ClapParser)]
#[command(name = "weft")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Weft - run token-passing orchestration graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program graph (.json or .toml) and print its publications
    Run {
        /// Program graph file
        input: PathBuf,

        /// Engine configuration (TOML); WEFT_* variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print each publication as a JSON line
        #[arg(long)]
        json: bool,

        /// Stop after this many publications
        #[arg(long, value_name = "N")]
        max_publications: Option<u64>,

        /// Grant a capability to privileged sites (repeatable)
        #[arg(long = "allow", value_name = "CAPABILITY")]
        allow: Vec<String>,

        /// Log every token event at trace level
        #[arg(long)]
        trace: bool,
    },

    /// Validate a program graph and check its sites exist
    Check {
        /// Program graph file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            config,
            json,
            max_publications,
            allow,
            trace,
        } => {
            let options = RunOptions {
                config,
                json,
                max_publications,
                allow,
                trace,
            };
            process::exit(run_program(&input, options));
        }
        Commands::Check { input } => {
            run_check(&input);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "weft", &mut io::stdout());
}

fn run_check(input: &Path) {
    let program = match load_program(input) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let registry = demo_sites();
    let missing: Vec<&str> = program
        .sites
        .iter()
        .map(String::as_str)
        .filter(|name| registry.get(name).is_none())
        .collect();
    if !missing.is_empty() {
        eprintln!("Error: unknown site(s): {}", missing.join(", "));
        process::exit(1);
    }

    println!(
        "{}: {} nodes, {} definitions, {} sites",
        input.display(),
        program.nodes.len(),
        program.defs.len(),
        program.sites.len()
    );
}

struct RunOptions {
    config: Option<PathBuf>,
    json: bool,
    max_publications: Option<u64>,
    allow: Vec<String>,
    trace: bool,
}

/// Prints publications to stdout and errors to stderr as they happen
struct Printer {
    json: bool,
}

impl Listener for Printer {
    fn on_publish(&self, value: &Value) {
        let line = if self.json {
            value_to_json(value).to_string()
        } else {
            value.to_string()
        };
        let _ = writeln!(io::stdout().lock(), "{}", line);
    }

    fn on_error(&self, error: &RuntimeError) {
        eprintln!("Error: {}", error);
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Signal => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(x) => Json::from(*x),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Tuple(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Closure(_) | Value::Site(_) => Json::String(value.to_string()),
    }
}

fn run_program(input: &Path, options: RunOptions) -> i32 {
    let program = match load_program(input) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut config = match load_config(options.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if let Some(n) = options.max_publications {
        config = config.with_max_publications(n);
    }
    for capability in options.allow {
        config = config.with_capability(capability, true);
    }
    debug!(?config, "engine config");

    let mut builder = Engine::builder()
        .with_config(config)
        .with_registry(&demo_sites())
        .with_listener(Arc::new(Printer { json: options.json }));
    if options.trace {
        builder = builder.with_tracer(Arc::new(LogTracer));
    }
    let engine = builder.build();

    diagnostics::install_signal_handler(&engine);
    install_interrupt_handler(&engine);
    let _watchdog = watchdog::install_watchdog(&engine, WatchdogConfig::from_env());

    if let Err(e) = engine.start(program) {
        eprintln!("Error: {}", e);
        return 1;
    }
    info!(program = %input.display(), "running");

    match engine.wait() {
        Ok(summary) => {
            report::emit_report(&summary);
            if summary.errors > 0 { 1 } else { 0 }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            report::emit_report(&engine.summary());
            2
        }
    }
}

/// Ctrl-C cancels every pending token instead of killing the process
#[cfg(unix)]
fn install_interrupt_handler(engine: &Engine) {
    use signal_hook::consts::SIGINT;
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT]) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: could not install SIGINT handler: {}", e);
            return;
        }
    };
    let engine = engine.clone();
    let spawned = std::thread::Builder::new()
        .name("weft-interrupt".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                info!("interrupted, terminating");
                engine.terminate();
            }
        });
    if let Err(e) = spawned {
        eprintln!("Warning: could not spawn interrupt thread: {}", e);
    }
}

#[cfg(not(unix))]
fn install_interrupt_handler(_engine: &Engine) {}
