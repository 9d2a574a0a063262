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

//! Query virtual machine.
//!
//! Compiles a query's term lists into at most three ops (ALL, ANY, NOT)
//! and executes them against the archetype set. Each op returns a boolean;
//! `false` jumps to the terminating sentinel. Matching walks sorted id
//! lists with a two-pointer intersection; wildcard and `IS`-transitive ids
//! use widening comparators and restart the archetype-side cursor.

use crate::archetype::Archetype;
use crate::entity::{Entity, ALL, ENTITY_BAD};
use crate::query::{QueryCtx, MatchingCtx, TermOp, FLAG_COMPILED, FLAG_EXECUTED, FLAG_RECOMPILE};
use crate::utils::splat_mask;
use crate::world::World;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Terminating sentinel program counter.
pub(crate) const PC_END: u8 = u8::MAX;

/// Compiled opcode variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    /// ALL over exact ids; eligible for matcher-mask early rejection.
    AllSimple,
    /// ALL with wildcards or pair-wildcards.
    AllWildcard,
    /// ALL with `IS`-transitive ids.
    AllComplex,
    /// ANY sourcing its own archetype lists (no ALL ran).
    AnyNoAll,
    /// ANY filtering the ALL candidates in place.
    AnyWithAll,
    NotSimple,
    NotWildcard,
    NotComplex,
}

/// One compiled op with its control-flow labels.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Op {
    pub kind: OpKind,
    pub pc_ok: u8,
    pub pc_fail: u8,
}

type CmpFn = fn(&World, Entity, Entity) -> bool;

/// The query compiler/executor. Stateless; all state lives in the query.
pub struct VirtualMachine;

impl VirtualMachine {
    /// Compile a query's terms into an op program.
    ///
    /// Fixed-source terms resolve immediately: a missing source archetype
    /// (or a source lacking the id) makes the query statically empty and no
    /// ops are emitted. Ops are synthesized in ALL, ANY, NOT order.
    pub fn compile(world: &World, q: &mut QueryCtx) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("vm.compile", terms = q.terms.len()).entered();

        q.ids_all.clear();
        q.ids_any.clear();
        q.ids_not.clear();
        q.ops.clear();
        q.as_mask_0 = 0;
        q.as_mask_1 = 0;
        q.query_mask = 0;
        q.statically_empty = false;
        q.ctx.reset();

        for term in q.terms.clone() {
            if let Some(src) = term.src {
                // Statically resolved: either always satisfied (drops out)
                // or the whole query is empty.
                match world.entity_archetype(src) {
                    Some(arch) if arch.has_id(term.id) => {}
                    _ => {
                        q.statically_empty = true;
                        q.flags = (q.flags | FLAG_COMPILED) & !(FLAG_RECOMPILE | FLAG_EXECUTED);
                        return;
                    }
                }
                continue;
            }
            match term.op {
                TermOp::All => q.ids_all.push(term.id),
                TermOp::Any => q.ids_any.push(term.id),
                TermOp::Not => q.ids_not.push(term.id),
            }
        }

        // The intersection walker needs sorted id lists.
        q.ids_all.sort_unstable();
        q.ids_all.dedup();
        q.ids_any.sort_unstable();
        q.ids_any.dedup();
        q.ids_not.sort_unstable();
        q.ids_not.dedup();

        // Position bitmasks over the concatenated compiled lists.
        let mut pos = 0u32;
        for list in [&q.ids_all, &q.ids_any, &q.ids_not] {
            for id in list.iter() {
                if pos < 32 && id.is_pair() {
                    if id.first() == crate::entity::IS.id() {
                        q.as_mask_0 |= 1 << pos;
                    }
                    if id.second() == crate::entity::IS.id() {
                        q.as_mask_1 |= 1 << pos;
                    }
                }
                pos += 1;
            }
        }

        let not_start = q.ids_all.len() + q.ids_any.len();
        let mut ops: Vec<Op> = Vec::with_capacity(3);
        if !q.ids_all.is_empty() {
            let kind = if list_involves_is(&q.ids_all, q.as_mask_0, q.as_mask_1, 0) {
                OpKind::AllComplex
            } else if has_wildcard(&q.ids_all) {
                OpKind::AllWildcard
            } else {
                q.query_mask = q.ids_all.iter().fold(0, |m, &id| m | splat_mask(id));
                OpKind::AllSimple
            };
            ops.push(Op { kind, pc_ok: PC_END, pc_fail: PC_END });
        }
        if !q.ids_any.is_empty() {
            let kind = if q.ids_all.is_empty() {
                OpKind::AnyNoAll
            } else {
                OpKind::AnyWithAll
            };
            ops.push(Op { kind, pc_ok: PC_END, pc_fail: PC_END });
        }
        if !q.ids_not.is_empty() {
            let kind = if list_involves_is(&q.ids_not, q.as_mask_0, q.as_mask_1, not_start) {
                OpKind::NotComplex
            } else if has_wildcard(&q.ids_not) {
                OpKind::NotWildcard
            } else {
                OpKind::NotSimple
            };
            ops.push(Op { kind, pc_ok: PC_END, pc_fail: PC_END });
        }
        // Chain the ok labels; any failure terminates.
        for i in 0..ops.len() {
            ops[i].pc_ok = if i + 1 < ops.len() { (i + 1) as u8 } else { PC_END };
        }
        q.ops.extend(ops);

        q.flags = (q.flags | FLAG_COMPILED) & !(FLAG_RECOMPILE | FLAG_EXECUTED);
    }

    /// True iff compilation produced a non-empty op program.
    pub fn is_compiled(q: &QueryCtx) -> bool {
        q.is_compiled()
    }

    /// Execute a query, compiling it first if needed.
    ///
    /// Scratch results are cleared, the op program runs from pc 0, and the
    /// confirmed scratch merges into the query's persistent match cache.
    pub fn exec(world: &World, q: &mut QueryCtx) {
        if q.needs_compile() {
            Self::compile(world, q);
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!("vm.exec", ops = q.ops.len()).entered();

        q.ctx.clear_scratch();
        if q.ops.is_empty() {
            // Statically empty, or a query with no terms.
            q.flags |= FLAG_EXECUTED;
            return;
        }

        // Per-list slices of the compiled `IS` position mask; the walker
        // consults these instead of re-deriving from the ids.
        let all_is_mask = list_mask(q.as_mask_0, 0, q.ids_all.len());
        let not_is_mask = list_mask(
            q.as_mask_0,
            q.ids_all.len() + q.ids_any.len(),
            q.ids_not.len(),
        );

        let mut pc = 0usize;
        while pc < q.ops.len() {
            let op = q.ops[pc];
            let ok = match op.kind {
                OpKind::AllSimple | OpKind::AllWildcard | OpKind::AllComplex => {
                    exec_all(world, &q.ids_all, q.query_mask, all_is_mask, op.kind, &mut q.ctx)
                }
                OpKind::AnyNoAll => exec_any_no_all(world, &q.ids_any, &mut q.ctx),
                OpKind::AnyWithAll => exec_any_with_all(world, &q.ids_any, &mut q.ctx),
                OpKind::NotSimple | OpKind::NotWildcard | OpKind::NotComplex => {
                    exec_not(world, &q.ids_not, not_is_mask, op.kind, pc == 0, &mut q.ctx)
                }
            };
            let next = if ok { op.pc_ok } else { op.pc_fail };
            if next == PC_END {
                break;
            }
            pc = next as usize;
        }

        q.ctx.merge_scratch();
        q.flags |= FLAG_EXECUTED;
    }
}

fn has_wildcard(ids: &[Entity]) -> bool {
    ids.iter().any(|id| id.is_wildcard())
}

/// Slice a compiled position mask down to one list's range, rebased to
/// bit 0. Lists are concatenated ALL, ANY, NOT; positions past bit 31 are
/// not tracked (the walker falls back to inspecting the id there).
fn list_mask(mask: u32, start: usize, len: usize) -> u32 {
    if start >= 32 || len == 0 {
        return 0;
    }
    let shifted = mask >> start;
    if len >= 32 {
        shifted
    } else {
        shifted & ((1u32 << len) - 1)
    }
}

/// Key to look an id's source archetypes up under. `IS`-transitive ids
/// widen to `Pair(IS, ALL)`: any subtype pair may satisfy them.
fn source_key(id: Entity) -> Entity {
    if id.is_subtype_relation() {
        Entity::pair(crate::entity::IS, ALL)
    } else {
        id
    }
}

/// Pair with `IS` on either side.
fn pair_involves_is(id: Entity) -> bool {
    id.is_pair() && (id.first() == crate::entity::IS.id() || id.second() == crate::entity::IS.id())
}

/// Does a compiled list involve `IS` at any position? Reads the position
/// masks; positions past bit 31 inspect the id directly.
fn list_involves_is(ids: &[Entity], mask_0: u32, mask_1: u32, start: usize) -> bool {
    if list_mask(mask_0 | mask_1, start, ids.len()) != 0 {
        return true;
    }
    ids.iter()
        .enumerate()
        .any(|(i, &id)| start + i >= 32 && pair_involves_is(id))
}

fn cmp_for(kind: OpKind) -> CmpFn {
    match kind {
        OpKind::AllSimple | OpKind::NotSimple => cmp_ids,
        OpKind::AllWildcard | OpKind::NotWildcard => cmp_ids_pairs,
        _ => cmp_ids_is_pairs,
    }
}

/// Comparator for a single id outside a compiled op variant, picked by the
/// id's own shape.
fn cmp_for_id(id: Entity) -> CmpFn {
    if id.is_subtype_relation() {
        if id.is_wildcard() {
            cmp_ids_is_pairs
        } else {
            cmp_ids_is
        }
    } else if id.is_pair() || id.is_wildcard() {
        cmp_ids_pairs
    } else {
        cmp_ids
    }
}

/// Exact id equality.
fn cmp_ids(_world: &World, q: Entity, a: Entity) -> bool {
    q == a
}

/// Wildcard-aware comparison: `(ALL, ALL)` matches any pair, `(X, ALL)`
/// matches on `first`, `(ALL, X)` on `second`; the plain `ALL` id matches
/// anything.
fn cmp_ids_pairs(world: &World, q: Entity, a: Entity) -> bool {
    if q.is_pair() {
        if !a.is_pair() {
            return false;
        }
        let first_any = q.first() == ALL.id();
        let second_any = q.second() == ALL.id();
        match (first_any, second_any) {
            (true, true) => true,
            (false, true) => q.first() == a.first(),
            (true, false) => q.second() == a.second(),
            (false, false) => q == a,
        }
    } else if q == ALL {
        true
    } else {
        cmp_ids(world, q, a)
    }
}

/// `IS`-transitive comparison without pair wildcards.
fn cmp_ids_is(world: &World, q: Entity, a: Entity) -> bool {
    if q.is_subtype_relation() {
        cmp_is_transitive(world, q, a)
    } else {
        cmp_ids(world, q, a)
    }
}

/// `IS`-transitive comparison, falling back to the wildcard algebra.
fn cmp_ids_is_pairs(world: &World, q: Entity, a: Entity) -> bool {
    if q.is_subtype_relation() {
        cmp_is_transitive(world, q, a)
    } else {
        cmp_ids_pairs(world, q, a)
    }
}

/// Does archetype id `a` declare a subtype of the query's `IS` target?
///
/// `q` is `Pair(IS, base)`. `a` matches if it is `Pair(IS, x)` where `x` is
/// `base` itself or any id reachable from `base` through the transitive
/// closure of the `Is` relation.
fn cmp_is_transitive(world: &World, q: Entity, a: Entity) -> bool {
    debug_assert!(q.is_subtype_relation());
    if !a.is_subtype_relation() {
        return false;
    }
    let base = q.second();
    if base == ALL.id() {
        return true;
    }
    let x = a.second();
    if x == base {
        return true;
    }
    // Pair halves are id-only; resolve the live handle through the world.
    let base_entity = world.entity_from_id(base);
    if base_entity == ENTITY_BAD {
        return false;
    }
    world.relations_trav_if(base_entity, &mut |e| e.id() == x)
}

/// Intersection policy: how each op advances and judges the walk.
trait MatchOp {
    /// Restart the archetype cursor after every query id.
    const RESET_EACH: bool;
    fn can_continue(had_match: bool) -> bool;
    fn eval(query_ids: usize, matched: usize) -> bool;
}

struct PolicyAll;
impl MatchOp for PolicyAll {
    const RESET_EACH: bool = false;
    fn can_continue(had_match: bool) -> bool {
        had_match
    }
    fn eval(query_ids: usize, matched: usize) -> bool {
        matched == query_ids
    }
}

struct PolicyNot;
impl MatchOp for PolicyNot {
    const RESET_EACH: bool = true;
    fn can_continue(had_match: bool) -> bool {
        !had_match
    }
    fn eval(_query_ids: usize, matched: usize) -> bool {
        matched == 0
    }
}

/// Two-pointer linear intersection over sorted id lists.
///
/// Wildcard and `IS` query ids restart the archetype cursor: their match
/// can sit anywhere in the list. `IS` positions come from the compiled
/// `is_mask` rather than re-inspecting each id.
fn match_inter<P: MatchOp>(
    world: &World,
    query_ids: &[Entity],
    archetype_ids: &[Entity],
    cmp: CmpFn,
    is_mask: u32,
) -> bool {
    let mut j = 0usize;
    let mut matched = 0usize;
    for (i, &q) in query_ids.iter().enumerate() {
        let transitive = if i < 32 {
            (is_mask >> i) & 1 != 0
        } else {
            q.is_subtype_relation()
        };
        if q.is_wildcard() || transitive {
            j = 0;
        }
        let mut had = false;
        while j < archetype_ids.len() {
            if cmp(world, q, archetype_ids[j]) {
                had = true;
                break;
            }
            j += 1;
        }
        if had {
            matched += 1;
            j += 1;
        }
        if !P::can_continue(had) {
            return P::eval(query_ids.len(), matched);
        }
        if P::RESET_EACH {
            j = 0;
        }
    }
    P::eval(query_ids.len(), matched)
}

/// Does any archetype id satisfy this single query id?
fn match_one(world: &World, q: Entity, archetype_ids: &[Entity]) -> bool {
    let cmp = cmp_for_id(q);
    archetype_ids.iter().any(|&a| cmp(world, q, a))
}

fn match_all(
    world: &World,
    ids_all: &[Entity],
    arch: &Archetype,
    kind: OpKind,
    is_mask: u32,
) -> bool {
    match_inter::<PolicyAll>(world, ids_all, arch.ids_view(), cmp_for(kind), is_mask)
}

fn match_none(
    world: &World,
    ids_not: &[Entity],
    arch: &Archetype,
    kind: OpKind,
    is_mask: u32,
) -> bool {
    match_inter::<PolicyNot>(world, ids_not, arch.ids_view(), cmp_for(kind), is_mask)
}

/// ALL: scan archetypes registered under the first required id, from the
/// stored cursor on, and collect those containing every required id.
fn exec_all(
    world: &World,
    ids_all: &[Entity],
    query_mask: u64,
    is_mask: u32,
    kind: OpKind,
    ctx: &mut MatchingCtx,
) -> bool {
    let first = source_key(ids_all[0]);
    let src = world.entity_map().archetypes(first);

    let cursor = ctx.cursors[TermOp::All as usize].entry(first).or_insert(0);
    let start = (*cursor as usize).min(src.len());
    *cursor = src.len() as u32;

    let use_mask = ctx.use_mask && kind == OpKind::AllSimple;
    for &aid in &src[start..] {
        let arch = world.archetype(aid);
        if use_mask && !arch.matches_mask(query_mask) {
            continue;
        }
        if match_all(world, ids_all, arch, kind, is_mask) && ctx.scratch_set.insert(aid) {
            ctx.scratch_arr.push(aid);
        }
    }
    !ctx.scratch_arr.is_empty()
}

/// ANY after ALL: filter the candidate set in place.
fn exec_any_with_all(world: &World, ids_any: &[Entity], ctx: &mut MatchingCtx) -> bool {
    let kept: Vec<_> = ctx
        .scratch_arr
        .drain(..)
        .filter(|&aid| {
            let arch = world.archetype(aid);
            ids_any.iter().any(|&q| match_one(world, q, arch.ids_view()))
        })
        .collect();
    ctx.scratch_set.clear();
    ctx.scratch_set.extend(kept.iter().copied());
    ctx.scratch_arr = kept;
    !ctx.scratch_arr.is_empty()
}

/// ANY without ALL: union the per-id source lists, each with its own
/// cursor.
fn exec_any_no_all(world: &World, ids_any: &[Entity], ctx: &mut MatchingCtx) -> bool {
    for &qid in ids_any {
        let key = source_key(qid);
        let src = world.entity_map().archetypes(key);
        let cursor = ctx.cursors[TermOp::Any as usize].entry(key).or_insert(0);
        let start = (*cursor as usize).min(src.len());
        *cursor = src.len() as u32;

        for &aid in &src[start..] {
            let arch = world.archetype(aid);
            if match_one(world, qid, arch.ids_view()) && ctx.scratch_set.insert(aid) {
                ctx.scratch_arr.push(aid);
            }
        }
    }
    !ctx.scratch_arr.is_empty()
}

/// NOT: with candidates, filter them in place; standalone, scan the full
/// archetype list (cursor keyed under the wildcard) keeping archetypes that
/// match no excluded id.
fn exec_not(
    world: &World,
    ids_not: &[Entity],
    is_mask: u32,
    kind: OpKind,
    standalone: bool,
    ctx: &mut MatchingCtx,
) -> bool {
    if standalone {
        let len = world.archetypes().len() as u32;
        let cursor = ctx.cursors[TermOp::Not as usize].entry(ALL).or_insert(0);
        let start = *cursor;
        *cursor = len;

        for aid in start..len {
            let arch = world.archetype(aid);
            if match_none(world, ids_not, arch, kind, is_mask) && ctx.scratch_set.insert(aid) {
                ctx.scratch_arr.push(aid);
            }
        }
    } else {
        let kept: Vec<_> = ctx
            .scratch_arr
            .drain(..)
            .filter(|&aid| match_none(world, ids_not, world.archetype(aid), kind, is_mask))
            .collect();
        ctx.scratch_set.clear();
        ctx.scratch_set.extend(kept.iter().copied());
        ctx.scratch_arr = kept;
    }
    !ctx.scratch_arr.is_empty()
}
