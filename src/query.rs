// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Declarative queries over the archetype set.
//!
//! A query is an ordered list of terms (ALL / ANY / NOT), compiled by the
//! [`crate::vm`] into a tiny opcode program and executed incrementally:
//! per-term cursors remember how far each source archetype list has been
//! scanned, so re-execution only visits archetypes created since the last
//! run. Confirmed matches accumulate in a persistent per-query cache.

use ahash::AHashSet;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::archetype::ArchetypeId;
use crate::entity::Entity;
use crate::vm::Op;

/// Term operator: which list the id lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
    /// The archetype must contain the id.
    All = 0,
    /// The archetype must contain at least one of the ANY ids.
    Any = 1,
    /// The archetype must contain none of the NOT ids.
    Not = 2,
}

/// One query term.
#[derive(Debug, Clone, Copy)]
pub struct Term {
    pub id: Entity,
    pub op: TermOp,
    /// Fixed source entity; resolved statically at compile time.
    pub src: Option<Entity>,
}

/// Query lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    NotCompiled,
    Compiled,
    Executed,
}

pub(crate) const FLAG_COMPILED: u8 = 1 << 0;
pub(crate) const FLAG_RECOMPILE: u8 = 1 << 1;
pub(crate) const FLAG_EXECUTED: u8 = 1 << 2;

/// Per-query matching state: the persistent match cache, the incremental
/// scan cursors, and the per-execution scratch lists.
#[derive(Debug, Default)]
pub struct MatchingCtx {
    /// Every archetype matched so far, in discovery order.
    pub(crate) matched_arr: Vec<ArchetypeId>,
    /// Same archetypes as `matched_arr`; membership tests.
    pub(crate) matched_set: AHashSet<ArchetypeId>,
    /// Last-scanned index into the source archetype list, per term list
    /// (ALL/ANY/NOT) and per source key.
    pub(crate) cursors: [FxHashMap<Entity, u32>; 3],
    /// Archetypes confirmed during the current execution, ordered.
    pub(crate) scratch_arr: Vec<ArchetypeId>,
    /// Dedup set mirroring `scratch_arr`.
    pub(crate) scratch_set: AHashSet<ArchetypeId>,
    /// Matcher-hash early rejection toggle. Correctness must not depend on
    /// it; tests run both ways.
    pub use_mask: bool,
}

impl MatchingCtx {
    fn new() -> Self {
        MatchingCtx {
            use_mask: true,
            ..Default::default()
        }
    }

    pub(crate) fn clear_scratch(&mut self) {
        self.scratch_arr.clear();
        self.scratch_set.clear();
    }

    /// Drop all cached matches and cursors; `use_mask` survives. Runs on
    /// every recompile so edited terms cannot leak stale matches.
    pub(crate) fn reset(&mut self) {
        self.matched_arr.clear();
        self.matched_set.clear();
        for cursor in &mut self.cursors {
            cursor.clear();
        }
        self.clear_scratch();
    }

    pub(crate) fn merge_scratch(&mut self) {
        for &aid in &self.scratch_arr {
            if self.matched_set.insert(aid) {
                self.matched_arr.push(aid);
            }
        }
    }
}

/// A compiled query and its matching state.
///
/// Build terms with [`QueryCtx::with`], [`QueryCtx::with_any`] and
/// [`QueryCtx::without`]; execute through the VM. Editing terms flags the
/// query for recompilation on its next execution.
pub struct QueryCtx {
    pub(crate) terms: SmallVec<[Term; 8]>,
    pub(crate) ids_all: SmallVec<[Entity; 8]>,
    pub(crate) ids_any: SmallVec<[Entity; 8]>,
    pub(crate) ids_not: SmallVec<[Entity; 8]>,
    /// Bit per compiled id position (all, then any, then not) whose pair
    /// `first` is the `IS` tag.
    pub(crate) as_mask_0: u32,
    /// Same, for pair `second`.
    pub(crate) as_mask_1: u32,
    /// OR-folded splat mask over `ids_all`; non-zero only for simple ALL
    /// programs.
    pub(crate) query_mask: u64,
    pub(crate) ops: SmallVec<[Op; 3]>,
    pub(crate) flags: u8,
    /// A fixed-source term failed to resolve; the query matches nothing.
    pub(crate) statically_empty: bool,
    pub(crate) ctx: MatchingCtx,
}

impl QueryCtx {
    pub fn new() -> Self {
        QueryCtx {
            terms: SmallVec::new(),
            ids_all: SmallVec::new(),
            ids_any: SmallVec::new(),
            ids_not: SmallVec::new(),
            as_mask_0: 0,
            as_mask_1: 0,
            query_mask: 0,
            ops: SmallVec::new(),
            flags: 0,
            statically_empty: false,
            ctx: MatchingCtx::new(),
        }
    }

    /// Require the id (ALL term).
    pub fn with(mut self, id: Entity) -> Self {
        self.add_term(Term { id, op: TermOp::All, src: None });
        self
    }

    /// Require at least one of the ids added this way (ANY term).
    pub fn with_any(mut self, id: Entity) -> Self {
        self.add_term(Term { id, op: TermOp::Any, src: None });
        self
    }

    /// Exclude the id (NOT term).
    pub fn without(mut self, id: Entity) -> Self {
        self.add_term(Term { id, op: TermOp::Not, src: None });
        self
    }

    /// Require the id on a fixed source entity; resolved at compile time.
    pub fn with_src(mut self, src: Entity, id: Entity) -> Self {
        self.add_term(Term { id, op: TermOp::All, src: Some(src) });
        self
    }

    /// Append a term. Flags the query for recompilation.
    pub fn add_term(&mut self, term: Term) {
        self.terms.push(term);
        self.flags |= FLAG_RECOMPILE;
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Toggle matcher-hash early rejection.
    pub fn set_use_mask(mut self, use_mask: bool) -> Self {
        self.ctx.use_mask = use_mask;
        self
    }

    /// True once compilation produced a non-empty op program.
    pub fn is_compiled(&self) -> bool {
        !self.ops.is_empty()
    }

    pub fn state(&self) -> QueryState {
        if self.flags & FLAG_EXECUTED != 0 {
            QueryState::Executed
        } else if self.flags & FLAG_COMPILED != 0 {
            QueryState::Compiled
        } else {
            QueryState::NotCompiled
        }
    }

    pub(crate) fn needs_compile(&self) -> bool {
        self.flags & FLAG_COMPILED == 0 || self.flags & FLAG_RECOMPILE != 0
    }

    /// All archetypes matched so far, in discovery order.
    pub fn matches(&self) -> &[ArchetypeId] {
        &self.ctx.matched_arr
    }

    /// Membership test against the match cache.
    pub fn contains(&self, id: ArchetypeId) -> bool {
        self.ctx.matched_set.contains(&id)
    }

    /// Reset compiled state and caches, keeping the terms.
    pub fn reset(&mut self) {
        self.ids_all.clear();
        self.ids_any.clear();
        self.ids_not.clear();
        self.ops.clear();
        self.as_mask_0 = 0;
        self.as_mask_1 = 0;
        self.query_mask = 0;
        self.statically_empty = false;
        self.flags = FLAG_RECOMPILE;
        let use_mask = self.ctx.use_mask;
        self.ctx = MatchingCtx::new();
        self.ctx.use_mask = use_mask;
    }
}

impl Default for QueryCtx {
    fn default() -> Self {
        Self::new()
    }
}
