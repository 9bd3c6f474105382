//! Regions and token liveness
//!
//! The scope table is the single source of truth for which tokens are
//! alive and where they live. It holds two arenas behind one lock:
//!
//! - region records: the cancellation tree (parent, member tokens, child
//!   regions, and what the region means: a top-level execution, the group
//!   of a pruning cell, or the left side of an otherwise)
//! - token records: one per pending token, whatever currently owns the
//!   `Token` itself (the runnable queue, a worker, a cell's wait-list or an
//!   outstanding site call)
//!
//! A token is pending exactly as long as its record exists, so the engine
//! detects program termination by the record count reaching zero. Killing
//! a token removes its record and clears the shared `alive` flag in the same
//! critical section; whoever holds the `Token` notices at its next step and
//! drops it without further accounting.
//!
//! Regions close explicitly (a cell was bound, the engine terminates) or on
//! their own once they hold neither tokens nor child regions. Closing is
//! recursive. Effects that involve other locks (killing a cell's waiters,
//! activating an otherwise fallback) are collected into a `Fallout` and
//! carried out by the engine after this lock is released.

use crate::arena::{Arena, Id};
use crate::cell::GroupCell;
use crate::token::Token;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use weft_core::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(crate) Id);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub(crate) Id);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

pub(crate) enum RegionKind {
    Execution,
    Group(Arc<GroupCell>),
    Otherwise {
        published: bool,
        /// The right-hand side; its record lives in the parent region
        fallback: TokenId,
        parked: Option<Token>,
    },
}

impl RegionKind {
    fn label(&self) -> &'static str {
        match self {
            RegionKind::Execution => "execution",
            RegionKind::Group(_) => "group",
            RegionKind::Otherwise { .. } => "otherwise",
        }
    }
}

pub(crate) struct RegionRecord {
    parent: Option<RegionId>,
    kind: RegionKind,
    members: FxHashSet<TokenId>,
    children: FxHashSet<RegionId>,
}

pub(crate) struct TokenRecord {
    region: RegionId,
    alive: Arc<AtomicBool>,
    created: Instant,
    parked: Option<(NodeId, Instant)>,
}

/// Why a token could not be registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refused {
    /// The region (or the token asking) is already gone
    Closed,
    /// Registering would exceed the configured live-token limit
    Limit(usize),
}

/// Work left over from a scope change, to be done outside the lock
#[derive(Default)]
pub(crate) struct Fallout {
    /// Tokens killed by a closing region
    pub killed: Vec<TokenId>,
    /// Cells whose regions finished; they go dead unless already bound
    pub cells: Vec<Arc<GroupCell>>,
    /// Right-hand sides of otherwise regions that finished silently
    pub fallbacks: Vec<Token>,
    /// No token is pending any more
    pub drained: bool,
}

/// Snapshot of one live token, for introspection
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub id: TokenId,
    pub region: RegionId,
    pub age: Duration,
    /// Node the token is blocked at, and for how long
    pub parked: Option<(NodeId, Duration)>,
}

/// Snapshot of one open region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub id: RegionId,
    pub parent: Option<RegionId>,
    pub kind: &'static str,
    pub tokens: usize,
    pub children: usize,
}

#[derive(Default)]
pub(crate) struct ScopeTable {
    regions: Arena<RegionRecord>,
    tokens: Arena<TokenRecord>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending tokens
    pub fn live_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn open_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn is_open(&self, region: RegionId) -> bool {
        self.regions.contains(region.0)
    }

    pub fn region_of(&self, token: TokenId) -> Option<RegionId> {
        self.tokens.get(token.0).map(|record| record.region)
    }

    /// Create the root execution region together with its first token
    pub fn open_root(&mut self, alive: Arc<AtomicBool>) -> (RegionId, TokenId) {
        let region = RegionId(self.regions.insert(RegionRecord {
            parent: None,
            kind: RegionKind::Execution,
            members: FxHashSet::default(),
            children: FxHashSet::default(),
        }));
        let token = self.insert_token(region, alive);
        (region, token)
    }

    /// Register a new token in `region`
    pub fn add_token(
        &mut self,
        region: RegionId,
        alive: Arc<AtomicBool>,
        limit: Option<usize>,
    ) -> Result<TokenId, Refused> {
        if !self.is_open(region) {
            return Err(Refused::Closed);
        }
        self.check_limit(limit)?;
        Ok(self.insert_token(region, alive))
    }

    /// Open a child region of `parent` with its first member
    ///
    /// Both happen in one step: a region is never observable empty before
    /// its first token arrives.
    pub fn open_region(
        &mut self,
        parent: RegionId,
        kind: RegionKind,
        alive: Arc<AtomicBool>,
        limit: Option<usize>,
    ) -> Result<(RegionId, TokenId), Refused> {
        if !self.is_open(parent) {
            return Err(Refused::Closed);
        }
        self.check_limit(limit)?;
        let region = self.insert_region(parent, kind);
        let token = self.insert_token(region, alive);
        Ok((region, token))
    }

    /// Set up an otherwise combinator for `token`
    ///
    /// Registers the fallback token in the current region, opens an
    /// otherwise region beneath it and moves `token` in. The fallback
    /// itself is parked later with `stash_fallback`.
    pub fn open_otherwise(
        &mut self,
        token: TokenId,
        fallback_alive: Arc<AtomicBool>,
        limit: Option<usize>,
    ) -> Result<(RegionId, TokenId), Refused> {
        let current = self.region_of(token).ok_or(Refused::Closed)?;
        let fallback = self.add_token(current, fallback_alive, limit)?;
        let region = self.insert_region(
            current,
            RegionKind::Otherwise {
                published: false,
                fallback,
                parked: None,
            },
        );
        self.move_token(token, region);
        Ok((region, fallback))
    }

    /// Park the right-hand side of an otherwise; hands it back if the region
    /// has been closed in the meantime
    pub fn stash_fallback(&mut self, region: RegionId, fallback: Token) -> Result<(), Token> {
        match self.regions.get_mut(region.0) {
            Some(RegionRecord {
                kind: RegionKind::Otherwise { parked, .. },
                ..
            }) => {
                *parked = Some(fallback);
                Ok(())
            }
            _ => Err(fallback),
        }
    }

    /// Move a publication of an otherwise's left side out to the parent
    ///
    /// The first such publication cancels the fallback. Returns `Ok(None)`
    /// if the token has already been killed.
    pub fn leave(&mut self, token: TokenId) -> Result<Option<(RegionId, Fallout)>, TokenId> {
        let Some(region) = self.region_of(token) else {
            return Ok(None);
        };
        let mut fallout = Fallout::default();
        let record = self.regions.get_mut(region.0).ok_or(token)?;
        let parent = record.parent.ok_or(token)?;
        let cancelled = match &mut record.kind {
            RegionKind::Otherwise {
                published,
                fallback,
                parked,
            } => {
                let first = !std::mem::replace(published, true);
                drop(parked.take());
                first.then_some(*fallback)
            }
            _ => return Err(token),
        };

        if let Some(fallback) = cancelled {
            self.kill_token(fallback, &mut fallout);
        }
        self.move_token(token, parent);
        self.settle(region, &mut fallout);
        fallout.drained = self.tokens.is_empty();
        Ok(Some((parent, fallout)))
    }

    /// Unregister a token that finished on its own; idempotent
    pub fn remove_token(&mut self, token: TokenId) -> Fallout {
        let mut fallout = Fallout::default();
        if let Some(record) = self.tokens.remove(token.0) {
            record.alive.store(false, Ordering::Release);
            if let Some(region) = self.regions.get_mut(record.region.0) {
                region.members.remove(&token);
            }
            self.settle(record.region, &mut fallout);
        }
        fallout.drained = self.tokens.is_empty();
        fallout
    }

    /// Close a region and everything beneath it; idempotent
    ///
    /// Every token registered anywhere in the subtree is dead when this
    /// returns, and the subtree's regions no longer accept members.
    pub fn close_region(&mut self, region: RegionId) -> Fallout {
        let mut fallout = Fallout::default();
        let parent = match self.regions.get(region.0) {
            Some(record) => record.parent,
            None => {
                fallout.drained = self.tokens.is_empty();
                return fallout;
            }
        };

        let mut stack = vec![region];
        while let Some(id) = stack.pop() {
            let Some(record) = self.regions.remove(id.0) else {
                continue;
            };
            for member in record.members {
                if let Some(token) = self.tokens.remove(member.0) {
                    token.alive.store(false, Ordering::Release);
                    fallout.killed.push(member);
                }
            }
            stack.extend(record.children);
            if let RegionKind::Group(cell) = record.kind {
                fallout.cells.push(cell);
            }
            // An otherwise's parked fallback is registered in this subtree
            // and was killed with it.
        }

        if let Some(parent) = parent {
            if let Some(record) = self.regions.get_mut(parent.0) {
                record.children.remove(&region);
            }
            self.settle(parent, &mut fallout);
        }
        fallout.drained = self.tokens.is_empty();
        fallout
    }

    /// Record that a token is blocked at `node` (or running again)
    pub fn set_parked(&mut self, token: TokenId, node: Option<NodeId>) {
        if let Some(record) = self.tokens.get_mut(token.0) {
            record.parked = node.map(|node| (node, Instant::now()));
        }
    }

    pub fn tokens(&self) -> Vec<TokenInfo> {
        let now = Instant::now();
        self.tokens
            .iter()
            .map(|(id, record)| TokenInfo {
                id: TokenId(id),
                region: record.region,
                age: now.saturating_duration_since(record.created),
                parked: record
                    .parked
                    .map(|(node, since)| (node, now.saturating_duration_since(since))),
            })
            .collect()
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.regions
            .iter()
            .map(|(id, record)| RegionInfo {
                id: RegionId(id),
                parent: record.parent,
                kind: record.kind.label(),
                tokens: record.members.len(),
                children: record.children.len(),
            })
            .collect()
    }

    /// Every token registered in `region` or beneath it
    pub fn snapshot(&self, region: RegionId) -> Vec<TokenId> {
        let mut tokens = Vec::new();
        let mut stack = vec![region];
        while let Some(id) = stack.pop() {
            if let Some(record) = self.regions.get(id.0) {
                tokens.extend(record.members.iter().copied());
                stack.extend(record.children.iter().copied());
            }
        }
        tokens.sort_unstable();
        tokens
    }

    fn check_limit(&self, limit: Option<usize>) -> Result<(), Refused> {
        match limit {
            Some(limit) if self.tokens.len() >= limit => Err(Refused::Limit(limit)),
            _ => Ok(()),
        }
    }

    fn insert_region(&mut self, parent: RegionId, kind: RegionKind) -> RegionId {
        let region = RegionId(self.regions.insert(RegionRecord {
            parent: Some(parent),
            kind,
            members: FxHashSet::default(),
            children: FxHashSet::default(),
        }));
        if let Some(record) = self.regions.get_mut(parent.0) {
            record.children.insert(region);
        }
        region
    }

    fn insert_token(&mut self, region: RegionId, alive: Arc<AtomicBool>) -> TokenId {
        let token = TokenId(self.tokens.insert(TokenRecord {
            region,
            alive,
            created: Instant::now(),
            parked: None,
        }));
        if let Some(record) = self.regions.get_mut(region.0) {
            record.members.insert(token);
        }
        token
    }

    // The destination is joined before the source is left, so the source
    // can settle without the token ever being unaccounted for.
    fn move_token(&mut self, token: TokenId, to: RegionId) {
        let Some(record) = self.tokens.get_mut(token.0) else {
            return;
        };
        let from = std::mem::replace(&mut record.region, to);
        if let Some(region) = self.regions.get_mut(to.0) {
            region.members.insert(token);
        }
        if let Some(region) = self.regions.get_mut(from.0) {
            region.members.remove(&token);
        }
    }

    fn kill_token(&mut self, token: TokenId, fallout: &mut Fallout) {
        if let Some(record) = self.tokens.remove(token.0) {
            record.alive.store(false, Ordering::Release);
            fallout.killed.push(token);
            if let Some(region) = self.regions.get_mut(record.region.0) {
                region.members.remove(&token);
            }
            self.settle(record.region, fallout);
        }
    }

    /// Retire `region` and then its ancestors for as long as they are empty
    fn settle(&mut self, mut region: RegionId, fallout: &mut Fallout) {
        loop {
            match self.regions.get(region.0) {
                Some(record) if record.members.is_empty() && record.children.is_empty() => {}
                _ => return,
            }
            let Some(record) = self.regions.remove(region.0) else {
                return;
            };
            match record.kind {
                RegionKind::Group(cell) => fallout.cells.push(cell),
                RegionKind::Otherwise {
                    published: false,
                    parked: Some(fallback),
                    ..
                } => fallout.fallbacks.push(fallback),
                _ => {}
            }
            let Some(parent) = record.parent else {
                return;
            };
            if let Some(parent_record) = self.regions.get_mut(parent.0) {
                parent_record.children.remove(&region);
            }
            region = parent;
        }
    }
}
