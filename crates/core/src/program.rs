//! Compiled program graph
//!
//! A `Program` is produced by an external compiler and is never mutated by
//! the engine. Nodes refer to each other by index, so a graph is a plain
//! vector that can be serialized, validated once, and shared across worker
//! threads behind an `Arc` without any locking.
//!
//! Each node's successors are its continuations: a node that "publishes" to
//! the rest of the program simply names the node that consumes the value.
//! Sequential composition `f >x> g` therefore compiles to `f` whose leaves
//! flow into `Bind` followed by `g`.

use crate::error::ProgramError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Most parameters a definition may take, and arguments a call may pass
pub const MAX_ARITY: u32 = 255;

/// Index of a node in `Program::nodes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Index of a definition in `Program::defs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefId(pub u32);

/// Index of a site name in `Program::sites`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl DefId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl SiteId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Constant embedded in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Signal,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Operand of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    /// Variable, by offset from the innermost binding
    Var(u32),
    Lit(Literal),
    Site(SiteId),
}

/// A (possibly recursive) function definition
///
/// Definitions introduced by one `Defs` node form a group: inside each body
/// the whole group is in scope, followed by the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Def {
    pub name: String,
    pub arity: u32,
    pub body: NodeId,
}

/// Where a node came from in the source text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Source location attached to one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Located {
    pub node: NodeId,
    pub location: SourceLocation,
}

/// One instruction of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Node {
    /// Halt silently
    Stop,
    /// Hand the token's result to the top-level listener, then halt
    Publish,
    /// Parallel composition: a new token runs `right`, this one `left`
    Fork { left: NodeId, right: NodeId },
    /// Set the result to the (forced) value of `arg`
    Let { arg: Arg, next: NodeId },
    /// Push the result as a new innermost binding
    Bind { next: NodeId },
    /// Leave `width` binding scopes
    Unwind { width: u32, next: NodeId },
    /// Call a closure or a site; `tail` marks calls in tail position
    Call {
        target: Arg,
        #[serde(default)]
        args: Vec<Arg>,
        next: NodeId,
        #[serde(default)]
        tail: bool,
    },
    /// Bind a group of mutually recursive closures
    Defs { defs: Vec<DefId>, next: NodeId },
    /// Return from the current closure body
    Return,
    /// Pruning: `right` runs in its own scope until its first publication,
    /// which binds the variable `left` sees at offset 0
    Prune { left: NodeId, right: NodeId },
    /// Publish the result into the enclosing pruning scope, then halt
    Store,
    /// Run `left`; if it halts without publishing, run `right`
    Otherwise { left: NodeId, right: NodeId },
    /// A publication of `left` escaping its otherwise scope
    Leave { next: NodeId },
    /// Install an exception handler around `body`
    Try { body: NodeId, handler: NodeId },
    /// Leave the innermost handler scope
    EndTry { next: NodeId },
    /// Raise the value of `arg`
    Throw { arg: Arg },
}

impl Node {
    /// Nodes this node can transfer control to
    pub fn successors(&self) -> impl Iterator<Item = NodeId> {
        let pair = match self {
            Node::Stop | Node::Publish | Node::Return | Node::Store | Node::Throw { .. } => {
                [None, None]
            }
            Node::Fork { left, right }
            | Node::Prune { left, right }
            | Node::Otherwise { left, right } => [Some(*left), Some(*right)],
            Node::Try { body, handler } => [Some(*body), Some(*handler)],
            Node::Let { next, .. }
            | Node::Bind { next }
            | Node::Unwind { next, .. }
            | Node::Call { next, .. }
            | Node::Defs { next, .. }
            | Node::Leave { next }
            | Node::EndTry { next } => [Some(*next), None],
        };
        pair.into_iter().flatten()
    }

    /// Operands read by this node
    pub fn operands(&self) -> Vec<&Arg> {
        match self {
            Node::Let { arg, .. } | Node::Throw { arg } => vec![arg],
            Node::Call { target, args, .. } => std::iter::once(target).chain(args).collect(),
            _ => Vec::new(),
        }
    }

    /// Short name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Stop => "stop",
            Node::Publish => "publish",
            Node::Fork { .. } => "fork",
            Node::Let { .. } => "let",
            Node::Bind { .. } => "bind",
            Node::Unwind { .. } => "unwind",
            Node::Call { .. } => "call",
            Node::Defs { .. } => "defs",
            Node::Return => "return",
            Node::Prune { .. } => "prune",
            Node::Store => "store",
            Node::Otherwise { .. } => "otherwise",
            Node::Leave { .. } => "leave",
            Node::Try { .. } => "try",
            Node::EndTry { .. } => "end_try",
            Node::Throw { .. } => "throw",
        }
    }
}

/// A complete compiled program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub root: NodeId,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub defs: Vec<Def>,
    /// Names of the external sites the graph calls, resolved at link time
    #[serde(default)]
    pub sites: Vec<String>,
    #[serde(default)]
    pub locations: Vec<Located>,
}

impl Program {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn def(&self, id: DefId) -> Option<&Def> {
        self.defs.get(id.index())
    }

    pub fn site_name(&self, id: SiteId) -> Option<&str> {
        self.sites.get(id.index()).map(String::as_str)
    }

    /// Check that every index in the graph points at something and that no
    /// definition or call exceeds `MAX_ARITY`
    ///
    /// The engine relies on this: a validated program never makes it look up
    /// a node, definition or site that does not exist.
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.node(self.root).is_none() {
            return Err(ProgramError::MissingRoot(self.root));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let from = NodeId(index as u32);

            for target in node.successors() {
                if self.node(target).is_none() {
                    return Err(ProgramError::DanglingNode { from, target });
                }
            }

            for arg in node.operands() {
                if let Arg::Site(site) = arg
                    && self.site_name(*site).is_none()
                {
                    return Err(ProgramError::DanglingSite { from, site: *site });
                }
            }

            match node {
                Node::Defs { defs, .. } => {
                    if defs.is_empty() {
                        return Err(ProgramError::EmptyDefs(from));
                    }
                    for def in defs {
                        if self.def(*def).is_none() {
                            return Err(ProgramError::DanglingDef { from, def: *def });
                        }
                    }
                }
                Node::Unwind { width: 0, .. } => return Err(ProgramError::ZeroUnwind(from)),
                Node::Call { args, .. } if args.len() > MAX_ARITY as usize => {
                    return Err(ProgramError::ArgumentLimit {
                        from,
                        count: args.len(),
                        limit: MAX_ARITY,
                    });
                }
                _ => {}
            }
        }

        for (index, def) in self.defs.iter().enumerate() {
            if def.arity > MAX_ARITY {
                return Err(ProgramError::ArityLimit {
                    def: DefId(index as u32),
                    arity: def.arity,
                    limit: MAX_ARITY,
                });
            }
            if self.node(def.body).is_none() {
                return Err(ProgramError::DanglingDefBody {
                    def: DefId(index as u32),
                    body: def.body,
                });
            }
        }

        for located in &self.locations {
            if self.node(located.node).is_none() {
                return Err(ProgramError::DanglingLocation(located.node));
            }
        }

        Ok(())
    }

    /// Source locations indexed by node, for constant-time lookup
    pub fn location_table(&self) -> Vec<Option<SourceLocation>> {
        let mut table = vec![None; self.nodes.len()];
        for located in &self.locations {
            if let Some(slot) = table.get_mut(located.node.index()) {
                *slot = Some(located.location.clone());
            }
        }
        table
    }
}
