//! Weft Runtime: a token-passing engine for orchestration programs
//!
//! Key design principles:
//! - Token: plain owned data, held by exactly one place at a time
//! - Region: the cancellation tree; closing one kills everything beneath it
//! - GroupCell: a pruning future, bound at most once
//! - Engine: one FIFO queue, dispatch workers, a separate pool for blocking sites
//!
//! A program is a graph from `weft-core`. The engine links its site names
//! against a [`SiteRegistry`], starts one token at the root and runs until
//! no token is pending:
//!
//! ```
//! use std::sync::Arc;
//! use weft_core::{Arg, Literal, ProgramBuilder};
//! use weft_runtime::{Engine, FnSite, Value};
//!
//! let mut b = ProgramBuilder::new();
//! let double = b.site("double");
//! let publish = b.publish();
//! let root = b.call(Arg::Site(double), vec![Arg::Lit(Literal::Int(21))], publish);
//! let program = b.build(root).unwrap();
//!
//! let engine = Engine::builder()
//!     .with_site(FnSite::new("double", |args| {
//!         args[0].as_int().map(|n| Value::Int(n * 2)).ok_or_else(|| "expected int".to_string())
//!     }))
//!     .build();
//! let summary = engine.run(program).unwrap();
//! assert_eq!(summary.publications, 1);
//! assert_eq!(summary.site_calls, 1);
//! ```

pub mod arena;
pub mod cell;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
mod interpreter;
pub mod listener;
mod pool;
#[cfg(feature = "diagnostics")]
pub mod report;
#[cfg(not(feature = "diagnostics"))]
#[path = "report_stub.rs"]
pub mod report;
pub mod scope;
pub mod site;
pub mod token;
pub mod tracer;
pub mod value;
pub mod watchdog;

pub use cell::CellState;
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineState, RunSummary};
pub use error::{EngineError, RuntimeError, TokenError, TokenException, format_panic_payload};
pub use listener::{Listener, NullListener};
pub use pool::PoolStats;
pub use scope::{RegionId, RegionInfo, TokenId, TokenInfo};
pub use site::{FnSite, Site, SiteCall, SiteRegistry};
pub use tracer::{LogTracer, TraceEvent, Tracer};
pub use value::{Closure, SiteRef, Value};
pub use watchdog::{WatchdogAction, WatchdogConfig};
