//! Persistent lexical environments
//!
//! An environment is an append-only sequence of bindings addressed by offset
//! from the most recent binding (offset 0 is the innermost variable). Tokens
//! fork constantly, so environments are backed by `im::Vector`: cloning is
//! O(1) and every clone shares its history with the original. Pushing onto a
//! clone never disturbs a prefix some other token has already observed.

use im::Vector;

/// Offset-addressed binding chain
#[derive(Debug, Clone)]
pub struct Env<B: Clone> {
    bindings: Vector<B>,
}

impl<B: Clone> Default for Env<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Clone> Env<B> {
    /// Create an empty environment
    pub fn new() -> Self {
        Env {
            bindings: Vector::new(),
        }
    }

    /// Number of bindings in scope
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind a new innermost variable
    pub fn push(&mut self, binding: B) {
        self.bindings.push_back(binding);
    }

    /// Bind several variables; the last one yielded becomes offset 0
    pub fn extend(&mut self, bindings: impl IntoIterator<Item = B>) {
        for binding in bindings {
            self.bindings.push_back(binding);
        }
    }

    /// Look up a variable by its offset from the innermost binding
    pub fn lookup(&self, offset: usize) -> Option<&B> {
        let len = self.bindings.len();
        if offset >= len {
            return None;
        }
        self.bindings.get(len - 1 - offset)
    }

    /// Leave `width` binding scopes
    ///
    /// Returns false (and leaves the environment untouched) if fewer than
    /// `width` bindings are in scope.
    pub fn unwind(&mut self, width: usize) -> bool {
        let len = self.bindings.len();
        if width > len {
            return false;
        }
        self.bindings.truncate(len - width);
        true
    }

    /// Iterate bindings from innermost to outermost
    pub fn iter(&self) -> impl Iterator<Item = &B> {
        self.bindings.iter().rev()
    }
}
