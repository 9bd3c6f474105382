//! Group cells: the futures behind pruning
//!
//! A cell starts `Unbound` with a wait-list and leaves that state exactly
//! once, either to `Bound` (the first publication of its scope) or to `Dead`
//! (the scope finished or was cancelled without publishing). Every
//! transition happens under the cell's own lock and hands the drained
//! wait-list back to the caller, so waiters are woken exactly once and
//! outside the lock.

use crate::scope::RegionId;
use crate::token::Token;
use crate::value::Value;
use std::fmt;
use std::sync::{Mutex, OnceLock};

/// Observable state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Unbound,
    Bound,
    Dead,
}

/// Result of registering a waiter
#[derive(Debug)]
pub(crate) enum Wait<W> {
    /// Parked on the wait-list; it will be handed back on the next transition
    Parked,
    /// The cell was bound in the meantime; the waiter can proceed
    Ready(W),
    /// The cell is dead; the waiter must die
    Dead(W),
}

/// The cell state machine, independent of what waits on it
#[derive(Debug)]
pub(crate) enum Slot<W> {
    Unbound(Vec<W>),
    Bound(Value),
    Dead,
}

impl<W> Default for Slot<W> {
    fn default() -> Self {
        Slot::Unbound(Vec::new())
    }
}

impl<W> Slot<W> {
    pub(crate) fn state(&self) -> CellState {
        match self {
            Slot::Unbound(_) => CellState::Unbound,
            Slot::Bound(_) => CellState::Bound,
            Slot::Dead => CellState::Dead,
        }
    }

    pub(crate) fn value(&self) -> Option<&Value> {
        match self {
            Slot::Bound(value) => Some(value),
            _ => None,
        }
    }

    /// Bind the cell; returns the waiters if this call won
    pub(crate) fn bind(&mut self, value: Value) -> Option<Vec<W>> {
        match self {
            Slot::Unbound(waiters) => {
                let waiters = std::mem::take(waiters);
                *self = Slot::Bound(value);
                Some(waiters)
            }
            _ => None,
        }
    }

    /// Kill the cell; returns the waiters if it was still unbound
    pub(crate) fn kill(&mut self) -> Option<Vec<W>> {
        match self {
            Slot::Unbound(waiters) => {
                let waiters = std::mem::take(waiters);
                *self = Slot::Dead;
                Some(waiters)
            }
            _ => None,
        }
    }

    pub(crate) fn wait(&mut self, waiter: W) -> Wait<W> {
        match self {
            Slot::Unbound(waiters) => {
                waiters.push(waiter);
                Wait::Parked
            }
            Slot::Bound(_) => Wait::Ready(waiter),
            Slot::Dead => Wait::Dead(waiter),
        }
    }

    pub(crate) fn waiting(&self) -> usize {
        match self {
            Slot::Unbound(waiters) => waiters.len(),
            _ => 0,
        }
    }
}

/// Waiters are swept for cancelled tokens whenever the list grows past this
const SWEEP_THRESHOLD: usize = 32;

/// A pruning cell, paired with the group region whose first publication
/// binds it
#[derive(Default)]
pub struct GroupCell {
    slot: Mutex<Slot<Token>>,
    region: OnceLock<RegionId>,
}

impl GroupCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CellState {
        self.slot.lock().expect("group cell: lock poisoned").state()
    }

    /// The bound value, if any
    pub fn value(&self) -> Option<Value> {
        self.slot
            .lock()
            .expect("group cell: lock poisoned")
            .value()
            .cloned()
    }

    /// Number of tokens parked on this cell
    pub fn waiting(&self) -> usize {
        self.slot.lock().expect("group cell: lock poisoned").waiting()
    }

    /// The group region this cell closes when bound
    pub(crate) fn region(&self) -> Option<RegionId> {
        self.region.get().copied()
    }

    pub(crate) fn attach(&self, region: RegionId) {
        let _ = self.region.set(region);
    }

    /// Try to bind; the winner gets the wait-list, every later caller `None`
    pub(crate) fn bind(&self, value: Value) -> Option<Vec<Token>> {
        self.slot
            .lock()
            .expect("group cell: lock poisoned")
            .bind(value)
    }

    /// Cancel without a value; waiters are returned so they can be killed
    pub(crate) fn close(&self) -> Option<Vec<Token>> {
        self.slot.lock().expect("group cell: lock poisoned").kill()
    }

    /// Park `token` until the cell leaves `Unbound`
    pub(crate) fn wait(&self, token: Token) -> Wait<Token> {
        let mut slot = self.slot.lock().expect("group cell: lock poisoned");
        if let Slot::Unbound(waiters) = &mut *slot
            && waiters.len() >= SWEEP_THRESHOLD
        {
            // Tokens cancelled while parked are already accounted for;
            // dropping them here only reclaims memory.
            waiters.retain(Token::is_alive);
        }
        slot.wait(token)
    }
}

impl fmt::Debug for GroupCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock().expect("group cell: lock poisoned");
        f.debug_struct("GroupCell")
            .field("state", &slot.state())
            .field("waiting", &slot.waiting())
            .field("region", &self.region.get())
            .finish()
    }
}
