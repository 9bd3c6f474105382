//! Validation errors for program graphs

use crate::program::{DefId, NodeId, SiteId};
use thiserror::Error;

/// A program graph that would make the engine look up something missing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("root node {0} does not exist")]
    MissingRoot(NodeId),

    #[error("node {from} continues to missing node {target}")]
    DanglingNode { from: NodeId, target: NodeId },

    #[error("node {from} refers to missing definition #{}", def.0)]
    DanglingDef { from: NodeId, def: DefId },

    #[error("definition #{} has missing body {body}", def.0)]
    DanglingDefBody { def: DefId, body: NodeId },

    #[error("node {from} calls undeclared site #{}", site.0)]
    DanglingSite { from: NodeId, site: SiteId },

    #[error("defs node {0} binds no definitions")]
    EmptyDefs(NodeId),

    #[error("unwind node {0} has zero width")]
    ZeroUnwind(NodeId),

    #[error("definition #{} takes {arity} parameters; the limit is {limit}", def.0)]
    ArityLimit { def: DefId, arity: u32, limit: u32 },

    #[error("call node {from} passes {count} arguments; the limit is {limit}")]
    ArgumentLimit { from: NodeId, count: usize, limit: u32 },

    #[error("source location attached to missing node {0}")]
    DanglingLocation(NodeId),

    #[error("reserved node {0} was never filled in")]
    Unfilled(NodeId),
}
