//! Weft Core: the immutable side of the token-passing engine
//!
//! This crate holds everything a compiler front end and the runtime agree on,
//! and nothing that moves at run time:
//!
//! - `program`: the compiled instruction graph (`Node`, `Arg`, `Literal`, `Def`)
//! - `builder`: incremental construction of a validated `Program`
//! - `env`: the persistent, offset-addressed binding chain shared by tokens
//! - `error`: validation failures for externally supplied graphs
//!
//! # Modules
//!
//! The graph is a closed, tagged enum. Every node kind is known here, so the
//! runtime can drive the whole transition function from a single `match`.

pub mod builder;
pub mod env;
pub mod error;
pub mod program;

pub use builder::ProgramBuilder;
pub use env::Env;
pub use error::ProgramError;
pub use program::{
    Arg, Def, DefId, Literal, Located, MAX_ARITY, Node, NodeId, Program, SiteId, SourceLocation,
};
