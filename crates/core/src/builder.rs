//! Incremental program construction
//!
//! Used by tests, by the CLI's built-in demos, and by front ends that emit
//! graphs directly. Nodes are usually added leaf-first so every successor
//! already exists; `reserve` and `set` cover back edges and forward
//! references (recursive definitions, shared continuations).
//!
//! # Example
//!
//! ```
//! use weft_core::{Arg, Literal, ProgramBuilder};
//!
//! // (1 | 2) >x> publish x
//! let mut b = ProgramBuilder::new();
//! let publish = b.publish();
//! let one = b.let_(Arg::Lit(Literal::Int(1)), publish);
//! let two = b.let_(Arg::Lit(Literal::Int(2)), publish);
//! let root = b.fork(one, two);
//! let program = b.build(root).unwrap();
//! assert_eq!(program.nodes.len(), 4);
//! ```

use crate::error::ProgramError;
use crate::program::{Arg, Def, DefId, Located, Node, NodeId, Program, SiteId, SourceLocation};

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    nodes: Vec<Option<Node>>,
    defs: Vec<Def>,
    sites: Vec<String>,
    locations: Vec<Located>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an external site; declaring the same name twice yields the same id
    pub fn site(&mut self, name: impl Into<String>) -> SiteId {
        let name = name.into();
        if let Some(index) = self.sites.iter().position(|s| *s == name) {
            return SiteId(index as u32);
        }
        self.sites.push(name);
        SiteId((self.sites.len() - 1) as u32)
    }

    pub fn node(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId((self.nodes.len() - 1) as u32)
    }

    /// Add a node with a source location for error reports
    pub fn node_at(&mut self, node: Node, location: SourceLocation) -> NodeId {
        let id = self.node(node);
        self.locations.push(Located { node: id, location });
        id
    }

    /// Allocate an id now and supply the node later with `set`
    pub fn reserve(&mut self) -> NodeId {
        self.nodes.push(None);
        NodeId((self.nodes.len() - 1) as u32)
    }

    /// Fill in (or replace) the node at `id`
    ///
    /// Panics if `id` was not handed out by this builder.
    pub fn set(&mut self, id: NodeId, node: Node) {
        self.nodes[id.index()] = Some(node);
    }

    pub fn def(&mut self, name: impl Into<String>, arity: u32, body: NodeId) -> DefId {
        self.defs.push(Def {
            name: name.into(),
            arity,
            body,
        });
        DefId((self.defs.len() - 1) as u32)
    }

    /// Finish the graph and validate it
    pub fn build(self, root: NodeId) -> Result<Program, ProgramError> {
        let nodes = self
            .nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| node.ok_or(ProgramError::Unfilled(NodeId(index as u32))))
            .collect::<Result<Vec<_>, _>>()?;

        let program = Program {
            root,
            nodes,
            defs: self.defs,
            sites: self.sites,
            locations: self.locations,
        };
        program.validate()?;
        Ok(program)
    }

    // Shorthands for the common node shapes

    pub fn stop(&mut self) -> NodeId {
        self.node(Node::Stop)
    }

    pub fn publish(&mut self) -> NodeId {
        self.node(Node::Publish)
    }

    pub fn fork(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.node(Node::Fork { left, right })
    }

    pub fn let_(&mut self, arg: Arg, next: NodeId) -> NodeId {
        self.node(Node::Let { arg, next })
    }

    pub fn bind(&mut self, next: NodeId) -> NodeId {
        self.node(Node::Bind { next })
    }

    pub fn unwind(&mut self, width: u32, next: NodeId) -> NodeId {
        self.node(Node::Unwind { width, next })
    }

    pub fn call(&mut self, target: Arg, args: Vec<Arg>, next: NodeId) -> NodeId {
        self.node(Node::Call {
            target,
            args,
            next,
            tail: false,
        })
    }

    /// Call in tail position; `next` should be a `Return`
    pub fn tail_call(&mut self, target: Arg, args: Vec<Arg>, next: NodeId) -> NodeId {
        self.node(Node::Call {
            target,
            args,
            next,
            tail: true,
        })
    }

    pub fn defs(&mut self, defs: Vec<DefId>, next: NodeId) -> NodeId {
        self.node(Node::Defs { defs, next })
    }

    pub fn ret(&mut self) -> NodeId {
        self.node(Node::Return)
    }

    pub fn prune(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.node(Node::Prune { left, right })
    }

    pub fn store(&mut self) -> NodeId {
        self.node(Node::Store)
    }

    pub fn otherwise(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.node(Node::Otherwise { left, right })
    }

    pub fn leave(&mut self, next: NodeId) -> NodeId {
        self.node(Node::Leave { next })
    }

    pub fn try_(&mut self, body: NodeId, handler: NodeId) -> NodeId {
        self.node(Node::Try { body, handler })
    }

    pub fn end_try(&mut self, next: NodeId) -> NodeId {
        self.node(Node::EndTry { next })
    }

    pub fn throw(&mut self, arg: Arg) -> NodeId {
        self.node(Node::Throw { arg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Literal;

    #[test]
    fn test_sites_deduplicate() {
        let mut b = ProgramBuilder::new();
        let a = b.site("println");
        let c = b.site("add");
        assert_eq!(b.site("println"), a);
        assert_ne!(a, c);
    }

    #[test]
    fn test_reserve_for_back_edge() {
        // def loop() = loop()
        let mut b = ProgramBuilder::new();
        let body = b.reserve();
        let f = b.def("loop", 0, body);
        let ret = b.ret();
        b.set(body, Node::Call {
            target: Arg::Var(0),
            args: vec![],
            next: ret,
            tail: true,
        });
        let stop = b.stop();
        let call = b.call(Arg::Var(0), vec![], stop);
        let root = b.defs(vec![f], call);
        let program = b.build(root).unwrap();
        assert_eq!(program.defs.len(), 1);
    }

    #[test]
    fn test_unfilled_reservation_fails() {
        let mut b = ProgramBuilder::new();
        let hole = b.reserve();
        let root = b.bind(hole);
        assert_eq!(b.build(root), Err(ProgramError::Unfilled(hole)));
    }

    #[test]
    fn test_locations_recorded() {
        let mut b = ProgramBuilder::new();
        let root = b.node_at(
            Node::Throw {
                arg: Arg::Lit(Literal::Str("boom".into())),
            },
            SourceLocation {
                file: "t.orc".into(),
                line: 1,
                column: 1,
            },
        );
        let program = b.build(root).unwrap();
        assert_eq!(program.locations.len(), 1);
        assert_eq!(program.locations[0].node, root);
    }
}
