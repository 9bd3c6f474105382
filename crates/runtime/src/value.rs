use crate::cell::GroupCell;
use crate::site::Site;
use std::fmt;
use std::sync::Arc;
use weft_core::{DefId, Env, Literal};

/// Runtime value
///
/// Values are immutable once created. Strings and tuples are reference
/// counted so a value flowing into several forked tokens is never copied.
#[derive(Debug, Clone)]
pub enum Value {
    Signal,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    Closure(Closure),
    Site(SiteRef),
}

/// One entry of a token's environment
///
/// Closure arguments are passed unforced, so a variable may still be waiting
/// on the cell of an enclosing pruning combinator.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Cell(Arc<GroupCell>),
}

/// A definition from a `Defs` group, closed over the environment the group
/// was introduced in
///
/// Recursion does not go through the captured environment: the callee's
/// frame re-binds every member of the group, so closures never hold
/// references to themselves.
#[derive(Clone)]
pub struct Closure {
    pub(crate) group: Arc<[DefId]>,
    pub(crate) index: usize,
    pub(crate) env: Env<Binding>,
}

impl Closure {
    pub(crate) fn new(group: Arc<[DefId]>, index: usize, env: Env<Binding>) -> Self {
        Closure { group, index, env }
    }

    pub fn def(&self) -> DefId {
        self.group[self.index]
    }

    /// Every member of this closure's group, in definition order
    pub(crate) fn siblings(&self) -> impl Iterator<Item = Binding> + '_ {
        (0..self.group.len()).map(|index| {
            Binding::Value(Value::Closure(Closure::new(
                self.group.clone(),
                index,
                self.env.clone(),
            )))
        })
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("def", &self.def())
            .field("captured", &self.env.len())
            .finish()
    }
}

/// Reference to a linked external site
#[derive(Clone)]
pub struct SiteRef(pub(crate) Arc<dyn Site>);

impl SiteRef {
    pub fn new(site: Arc<dyn Site>) -> Self {
        SiteRef(site)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn site(&self) -> &Arc<dyn Site> {
        &self.0
    }
}

impl fmt::Debug for SiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteRef({})", self.name())
    }
}

impl PartialEq for SiteRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

// Closures and sites compare by identity; everything else structurally.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Signal, Value::Signal) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => {
                Arc::ptr_eq(&a.group, &b.group) && a.index == b.index
            }
            (Value::Site(a), Value::Site(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Signal => "signal",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Closure(_) => "closure",
            Value::Site(_) => "site",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Signal => Value::Signal,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(x) => Value::Float(*x),
            Literal::Str(s) => Value::str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

/// Values print the way they would be written in a program: strings quoted
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Signal => write!(f, "signal"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Closure(_) => write!(f, "<closure>"),
            Value::Site(site) => write!(f, "<site {}>", site.name()),
        }
    }
}
