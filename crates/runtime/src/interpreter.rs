//! The transition function
//!
//! `step` advances one token by one node. Everything a node can do comes out
//! of the single `match` in `advance`: continue at another node, fork, open a
//! scope, park on a cell, hand the token to a site, or end it.
//!
//! Operands are forced before use. A variable bound to an unresolved cell
//! parks the token on that cell; when the cell is bound the token is
//! re-activated at the same node and forces again, this time successfully.

use crate::cell::{GroupCell, Wait};
use crate::engine::Shared;
use crate::error::{EngineError, TokenException};
use crate::site::{self, SiteCall, SiteRegistry};
use crate::token::Token;
use crate::value::{Binding, Closure, SiteRef, Value};
use std::sync::Arc;
use weft_core::{Arg, Def, DefId, Node, NodeId, Program, SiteId, SourceLocation};

/// A validated program with its sites resolved
pub(crate) struct LinkedProgram {
    program: Program,
    sites: Vec<SiteRef>,
    locations: Vec<Option<SourceLocation>>,
}

impl LinkedProgram {
    pub fn link(program: Program, registry: &SiteRegistry) -> Result<Self, EngineError> {
        program.validate()?;
        let sites = program
            .sites
            .iter()
            .map(|name| {
                registry
                    .get(name)
                    .map(|site| SiteRef::new(site.clone()))
                    .ok_or_else(|| EngineError::UnknownSite(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let locations = program.location_table();
        Ok(LinkedProgram {
            program,
            sites,
            locations,
        })
    }

    pub fn root(&self) -> NodeId {
        self.program.root
    }

    // Indices were checked by `validate`
    fn node(&self, id: NodeId) -> &Node {
        &self.program.nodes[id.index()]
    }

    fn def(&self, id: DefId) -> &Def {
        &self.program.defs[id.index()]
    }

    fn site(&self, id: SiteId) -> &SiteRef {
        &self.sites[id.index()]
    }

    pub fn location(&self, id: NodeId) -> Option<&SourceLocation> {
        self.locations.get(id.index()).and_then(Option::as_ref)
    }

    pub fn node_kind(&self, id: NodeId) -> &'static str {
        self.program
            .nodes
            .get(id.index())
            .map(Node::kind)
            .unwrap_or("?")
    }
}

pub(crate) enum Step {
    /// The token can keep running
    Continue(Token),
    /// The token is parked on a cell or a site call
    Suspended,
    /// The token is gone
    Halted,
}

enum Fault {
    Raise(Token, TokenException),
    Fatal(Token, EngineError),
}

enum Operand {
    Ready(Value),
    Pending(Arc<GroupCell>),
}

/// Advance `token` by one node
pub(crate) fn step(shared: &Shared, program: &LinkedProgram, token: Token) -> Step {
    if !token.is_alive() {
        // Killed while queued; its record is already gone
        return Step::Halted;
    }
    match advance(shared, program, token) {
        Ok(step) => step,
        Err(Fault::Raise(token, exception)) => {
            shared.raise(token, exception);
            Step::Halted
        }
        Err(Fault::Fatal(token, error)) => {
            shared.fatal(token, error);
            Step::Halted
        }
    }
}

// Force an operand, parking the token if it is not available yet
macro_rules! force {
    ($shared:expr, $program:expr, $token:ident, $arg:expr) => {
        match operand($program, &$token, $arg) {
            Ok(Operand::Ready(value)) => value,
            Ok(Operand::Pending(cell)) => return Ok(block($shared, $token, &cell)),
            Err(error) => return Err(Fault::Fatal($token, error)),
        }
    };
}

fn advance(shared: &Shared, program: &LinkedProgram, mut token: Token) -> Result<Step, Fault> {
    match program.node(token.node) {
        Node::Stop => {
            shared.die(token);
            Ok(Step::Halted)
        }

        Node::Publish => {
            shared.publish(token);
            Ok(Step::Halted)
        }

        Node::Fork { left, right } => {
            match shared.fork(&token, token.region, token.group.clone(), *right) {
                Ok(Some(child)) => shared.activate(child),
                Ok(None) => {}
                Err(exception) => return Err(Fault::Raise(token, exception)),
            }
            token.node = *left;
            Ok(Step::Continue(token))
        }

        Node::Let { arg, next } => {
            token.result = force!(shared, program, token, arg);
            token.node = *next;
            Ok(Step::Continue(token))
        }

        Node::Bind { next } => {
            token.env.push(Binding::Value(token.result.clone()));
            token.node = *next;
            Ok(Step::Continue(token))
        }

        Node::Unwind { width, next } => {
            if !token.env.unwind(*width as usize) {
                let depth = token.env.len();
                return Err(Fault::Fatal(
                    token,
                    EngineError::EnvUnderflow {
                        width: *width,
                        depth,
                    },
                ));
            }
            token.node = *next;
            Ok(Step::Continue(token))
        }

        Node::Call {
            target,
            args,
            next,
            tail,
        } => match force!(shared, program, token, target) {
            Value::Closure(closure) => call_closure(shared, program, token, &closure, args, *next, *tail),
            Value::Site(site) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(force!(shared, program, token, arg));
                }
                call_site(shared, token, site, values, *next)
            }
            other => Err(Fault::Raise(token, TokenException::Uncallable(other.to_string()))),
        },

        Node::Defs { defs, next } => {
            let group: Arc<[DefId]> = defs.iter().copied().collect();
            let captured = token.env.clone();
            for index in 0..group.len() {
                token.env.push(Binding::Value(Value::Closure(Closure::new(
                    group.clone(),
                    index,
                    captured.clone(),
                ))));
            }
            token.node = *next;
            Ok(Step::Continue(token))
        }

        Node::Return => {
            if token.leave_closure() {
                Ok(Step::Continue(token))
            } else {
                Err(Fault::Fatal(token, EngineError::EmptyContinuation))
            }
        }

        Node::Prune { left, right } => {
            let cell = Arc::new(GroupCell::new());
            match shared.open_group(&token, cell.clone(), *right) {
                Ok(Some(child)) => shared.activate(child),
                Ok(None) => {}
                Err(exception) => return Err(Fault::Raise(token, exception)),
            }
            token.env.push(Binding::Cell(cell));
            token.node = *left;
            Ok(Step::Continue(token))
        }

        Node::Store => {
            let Some(cell) = token.group.clone() else {
                return Err(Fault::Fatal(token, EngineError::MissingGroup));
            };
            shared.store(token, &cell);
            Ok(Step::Halted)
        }

        Node::Otherwise { left, right } => {
            match shared.open_otherwise(&mut token, *right) {
                Ok(true) => {}
                Ok(false) => return Ok(Step::Halted),
                Err(exception) => return Err(Fault::Raise(token, exception)),
            }
            token.node = *left;
            Ok(Step::Continue(token))
        }

        Node::Leave { next } => match shared.leave(&mut token) {
            Ok(true) => {
                token.node = *next;
                Ok(Step::Continue(token))
            }
            Ok(false) => Ok(Step::Halted),
            Err(error) => Err(Fault::Fatal(token, error)),
        },

        Node::Try { body, handler } => {
            token.push_handler(*handler);
            token.node = *body;
            Ok(Step::Continue(token))
        }

        Node::EndTry { next } => {
            if token.pop_handler().is_none() {
                return Err(Fault::Fatal(token, EngineError::HandlerUnderflow));
            }
            token.node = *next;
            Ok(Step::Continue(token))
        }

        Node::Throw { arg } => {
            let value = force!(shared, program, token, arg);
            Err(Fault::Raise(token, TokenException::Thrown(value)))
        }
    }
}

fn operand(program: &LinkedProgram, token: &Token, arg: &Arg) -> Result<Operand, EngineError> {
    match arg {
        Arg::Lit(literal) => Ok(Operand::Ready(Value::from(literal))),
        Arg::Site(id) => Ok(Operand::Ready(Value::Site(program.site(*id).clone()))),
        Arg::Var(offset) => match token.env.lookup(*offset as usize) {
            Some(Binding::Value(value)) => Ok(Operand::Ready(value.clone())),
            Some(Binding::Cell(cell)) => Ok(match cell.value() {
                Some(value) => Operand::Ready(value),
                None => Operand::Pending(cell.clone()),
            }),
            None => Err(EngineError::UnboundVariable {
                offset: *offset,
                depth: token.env.len(),
            }),
        },
    }
}

/// Closure arguments are passed as they are; unresolved cells stay unresolved
fn binding(program: &LinkedProgram, token: &Token, arg: &Arg) -> Result<Binding, EngineError> {
    match arg {
        Arg::Var(offset) => token
            .env
            .lookup(*offset as usize)
            .cloned()
            .ok_or(EngineError::UnboundVariable {
                offset: *offset,
                depth: token.env.len(),
            }),
        Arg::Lit(literal) => Ok(Binding::Value(Value::from(literal))),
        Arg::Site(id) => Ok(Binding::Value(Value::Site(program.site(*id).clone()))),
    }
}

/// Park on an unresolved cell
fn block(shared: &Shared, token: Token, cell: &GroupCell) -> Step {
    let id = token.id;
    shared.parked(&token);
    match cell.wait(token) {
        Wait::Parked => Step::Suspended,
        Wait::Ready(token) => {
            // Bound in the meantime: force again
            shared.unparked(id);
            Step::Continue(token)
        }
        Wait::Dead(token) => {
            shared.die(token);
            Step::Halted
        }
    }
}

fn call_closure(
    shared: &Shared,
    program: &LinkedProgram,
    mut token: Token,
    closure: &Closure,
    args: &[Arg],
    next: NodeId,
    tail: bool,
) -> Result<Step, Fault> {
    let def = program.def(closure.def());
    if def.arity as usize != args.len() {
        return Err(Fault::Raise(
            token,
            TokenException::ArityMismatch {
                name: def.name.clone(),
                expected: def.arity as usize,
                got: args.len(),
            },
        ));
    }

    let mut bindings = Vec::with_capacity(args.len());
    for arg in args {
        match binding(program, &token, arg) {
            Ok(binding) => bindings.push(binding),
            Err(error) => return Err(Fault::Fatal(token, error)),
        }
    }

    let mut env = closure.env.clone();
    env.extend(closure.siblings());
    env.extend(bindings);

    match token.enter_closure(def.body, env, next, tail, shared.config().stack_limit) {
        Ok(()) => Ok(Step::Continue(token)),
        Err(exception) => Err(Fault::Raise(token, exception)),
    }
}

fn call_site(
    shared: &Shared,
    token: Token,
    site: SiteRef,
    args: Vec<Value>,
    next: NodeId,
) -> Result<Step, Fault> {
    if let Some(capability) = site.site().capability()
        && !shared.config().grants(capability)
    {
        let capability = capability.to_string();
        return Err(Fault::Raise(token, TokenException::Capability(capability)));
    }

    shared.site_called();
    shared.parked(&token);
    let call = SiteCall::new(shared.handle(), token, next, site.name());

    if site.site().blocking() {
        let job = Box::new(move || {
            if call.is_live() {
                site::invoke(&site, args, call);
            }
        });
        // A pool that is already shut down drops the job, halting the caller
        if let Err(job) = shared.submit(job) {
            drop(job);
        }
    } else {
        site::invoke(&site, args, call);
    }
    Ok(Step::Suspended)
}
