//! Tokens: threads of control through the program graph
//!
//! A `Token` is plain owned data. At any moment exactly one place holds it:
//! the runnable queue, a dispatch worker, a cell's wait-list, an outstanding
//! site call, or an otherwise region waiting to release its fallback. That
//! ownership is what keeps a token from ever running on two threads at once.
//!
//! Liveness is the one piece of shared state. The `alive` flag is shared
//! with the token's record in the scope table and only ever goes from true
//! to false, under the scope lock, when the record is removed.

use crate::cell::GroupCell;
use crate::error::TokenException;
use crate::scope::{RegionId, TokenId};
use crate::value::{Binding, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use weft_core::{Env, NodeId};

/// Return point of a closure call
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Where to continue after the callee returns
    pub next: NodeId,
    /// The caller's environment, restored on return
    pub env: Env<Binding>,
    /// The call node, for backtraces
    pub call: NodeId,
}

/// Context captured by a `Try` node
#[derive(Debug, Clone)]
pub(crate) struct Handler {
    pub node: NodeId,
    pub env: Env<Binding>,
    pub frames: Vec<Frame>,
    pub region: RegionId,
    pub group: Option<Arc<GroupCell>>,
}

pub struct Token {
    pub(crate) id: TokenId,
    alive: Arc<AtomicBool>,
    pub(crate) node: NodeId,
    pub(crate) env: Env<Binding>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) handlers: Vec<Handler>,
    pub(crate) region: RegionId,
    /// Cell of the nearest enclosing pruning scope
    pub(crate) group: Option<Arc<GroupCell>>,
    pub(crate) result: Value,
}

impl Token {
    pub(crate) fn root(id: TokenId, alive: Arc<AtomicBool>, region: RegionId, node: NodeId) -> Self {
        Token {
            id,
            alive,
            node,
            env: Env::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            region,
            group: None,
            result: Value::Signal,
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Continuation depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// A copy of this token at `node`, registered as `id` in `region`
    ///
    /// Environment, continuation and result are shared; liveness is not.
    pub(crate) fn fork(
        &self,
        id: TokenId,
        alive: Arc<AtomicBool>,
        region: RegionId,
        group: Option<Arc<GroupCell>>,
        node: NodeId,
    ) -> Token {
        Token {
            id,
            alive,
            node,
            env: self.env.clone(),
            frames: self.frames.clone(),
            handlers: self.handlers.clone(),
            region,
            group,
            result: self.result.clone(),
        }
    }

    /// The token that runs `handler` for an exception raised by this one
    pub(crate) fn for_handler(
        &self,
        id: TokenId,
        alive: Arc<AtomicBool>,
        handler: Handler,
        value: Value,
    ) -> Token {
        let mut env = handler.env;
        env.push(Binding::Value(value.clone()));
        Token {
            id,
            alive,
            node: handler.node,
            env,
            frames: handler.frames,
            handlers: self.handlers.clone(),
            region: handler.region,
            group: handler.group,
            result: value,
        }
    }

    /// Transfer control into a closure body
    ///
    /// A call in tail position whose caller is itself a closure body reuses
    /// the caller's return frame, so tail recursion runs in constant stack.
    pub(crate) fn enter_closure(
        &mut self,
        body: NodeId,
        env: Env<Binding>,
        next: NodeId,
        tail: bool,
        stack_limit: Option<usize>,
    ) -> Result<(), TokenException> {
        if !(tail && !self.frames.is_empty()) {
            if let Some(limit) = stack_limit
                && self.frames.len() >= limit
            {
                return Err(TokenException::StackLimit(limit));
            }
            let caller = std::mem::replace(&mut self.env, env);
            self.frames.push(Frame {
                next,
                env: caller,
                call: self.node,
            });
        } else {
            self.env = env;
        }
        self.node = body;
        Ok(())
    }

    /// Return from the current closure; false if there is nothing to return to
    pub(crate) fn leave_closure(&mut self) -> bool {
        match self.frames.pop() {
            Some(frame) => {
                self.env = frame.env;
                self.node = frame.next;
                true
            }
            None => false,
        }
    }

    pub(crate) fn push_handler(&mut self, node: NodeId) {
        self.handlers.push(Handler {
            node,
            env: self.env.clone(),
            frames: self.frames.clone(),
            region: self.region,
            group: self.group.clone(),
        });
    }

    pub(crate) fn pop_handler(&mut self) -> Option<Handler> {
        self.handlers.pop()
    }

    /// Call nodes of the active closure calls, innermost first
    pub(crate) fn call_sites(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.frames.iter().rev().map(|frame| frame.call)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("region", &self.region)
            .field("depth", &self.frames.len())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeTable;

    fn token() -> (ScopeTable, Token) {
        let mut table = ScopeTable::new();
        let alive = Arc::new(AtomicBool::new(true));
        let (region, id) = table.open_root(alive.clone());
        (table, Token::root(id, alive, region, NodeId(0)))
    }

    #[test]
    fn test_call_and_return() {
        let (_table, mut token) = token();
        token.env.push(Binding::Value(Value::Int(1)));
        token.node = NodeId(5);

        let mut callee = Env::new();
        callee.push(Binding::Value(Value::Int(2)));
        token
            .enter_closure(NodeId(10), callee, NodeId(6), false, None)
            .unwrap();

        assert_eq!(token.node, NodeId(10));
        assert_eq!(token.depth(), 1);
        assert_eq!(token.call_sites().collect::<Vec<_>>(), vec![NodeId(5)]);

        assert!(token.leave_closure());
        assert_eq!(token.node, NodeId(6));
        assert!(matches!(token.env.lookup(0), Some(Binding::Value(Value::Int(1)))));
        assert!(!token.leave_closure());
    }

    #[test]
    fn test_tail_calls_reuse_frame() {
        let (_table, mut token) = token();
        token
            .enter_closure(NodeId(1), Env::new(), NodeId(2), false, None)
            .unwrap();
        for _ in 0..1000 {
            token
                .enter_closure(NodeId(1), Env::new(), NodeId(3), true, Some(4))
                .unwrap();
        }
        assert_eq!(token.depth(), 1);
        assert!(token.leave_closure());
        assert_eq!(token.node, NodeId(2));
    }

    #[test]
    fn test_stack_limit() {
        let (_table, mut token) = token();
        for _ in 0..3 {
            token
                .enter_closure(NodeId(1), Env::new(), NodeId(2), false, Some(3))
                .unwrap();
        }
        assert_eq!(
            token.enter_closure(NodeId(1), Env::new(), NodeId(2), false, Some(3)),
            Err(TokenException::StackLimit(3))
        );
    }

    #[test]
    fn test_fork_shares_context() {
        let (mut table, mut token) = token();
        token.env.push(Binding::Value(Value::str("shared")));
        token.result = Value::Int(9);

        let alive = Arc::new(AtomicBool::new(true));
        let id = table.add_token(token.region, alive.clone(), None).unwrap();
        let child = token.fork(id, alive, token.region, None, NodeId(7));

        assert_eq!(child.node, NodeId(7));
        assert_eq!(child.result, Value::Int(9));
        assert!(matches!(child.env.lookup(0), Some(Binding::Value(v)) if *v == Value::str("shared")));

        table.remove_token(child.id);
        assert!(!child.is_alive());
        assert!(token.is_alive());
    }
}
