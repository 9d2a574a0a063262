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

//! Archetypes: one per unique component signature.
//!
//! An archetype owns its chunk list and the solved chunk layout. Identity
//! is the pair of sorted id lists; the hashes are accelerators for the
//! lookup table and the query fast path. Archetypes are created on first
//! use and never move or die before world teardown.

use smallvec::SmallVec;

use crate::block::BlockAllocator;
use crate::chunk::{Chunk, ChunkLayout};
use crate::component::{ComponentCache, ComponentKind};
use crate::entity::{Entity, EntityContainer};
use crate::graph::ArchetypeGraph;
use crate::utils::{hash_combine, hash_ids, splat_mask};

/// Dense archetype identifier; index into the world's archetype list.
pub type ArchetypeId = u32;

/// The root archetype (empty signature) is always id 0.
pub const ROOT_ARCHETYPE_ID: ArchetypeId = 0;

/// Signature digests computed once at creation.
#[derive(Debug, Clone, Copy)]
pub struct ArchetypeHashes {
    /// Digest of the generic id list.
    pub generic_hash: u64,
    /// Digest of the chunk id list.
    pub chunk_hash: u64,
    /// Combined digest identifying the signature in the lookup table.
    pub lookup_hash: u64,
    /// Per-class OR-folded splat masks for query early rejection.
    pub matcher_hash: [u64; 2],
}

impl ArchetypeHashes {
    fn compute(ids_generic: &[Entity], ids_chunk: &[Entity]) -> Self {
        let generic_hash = hash_ids(ids_generic);
        let chunk_hash = hash_ids(ids_chunk);
        let matcher = |ids: &[Entity]| ids.iter().fold(0u64, |m, &id| m | splat_mask(id));
        ArchetypeHashes {
            generic_hash,
            chunk_hash,
            lookup_hash: hash_combine(generic_hash, chunk_hash),
            matcher_hash: [matcher(ids_generic), matcher(ids_chunk)],
        }
    }
}

/// Digest for a signature that may not have an archetype yet; used to probe
/// the lookup table before creation.
pub fn lookup_hash(ids_generic: &[Entity], ids_chunk: &[Entity]) -> u64 {
    hash_combine(hash_ids(ids_generic), hash_ids(ids_chunk))
}

pub struct Archetype {
    id: ArchetypeId,
    layout: ChunkLayout,
    hashes: ArchetypeHashes,
    /// Both id lists merged, sorted ascending; what queries match against.
    ids_match: SmallVec<[Entity; 16]>,
    chunks: Vec<Chunk>,
    edges: ArchetypeGraph,
}

impl Archetype {
    /// Create an archetype for a signature. Id lists must be sorted
    /// ascending and deduplicated; the chunk layout is solved here, once.
    pub fn new(
        id: ArchetypeId,
        cache: &ComponentCache,
        ids_generic: &[Entity],
        ids_chunk: &[Entity],
    ) -> Self {
        let layout = ChunkLayout::compute(cache, ids_generic, ids_chunk);

        let mut ids_match: SmallVec<[Entity; 16]> = SmallVec::new();
        ids_match.extend_from_slice(ids_generic);
        ids_match.extend_from_slice(ids_chunk);
        ids_match.sort_unstable();

        Archetype {
            id,
            hashes: ArchetypeHashes::compute(ids_generic, ids_chunk),
            layout,
            ids_match,
            chunks: Vec::new(),
            edges: ArchetypeGraph::new(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The solved chunk layout (capacity, size class, offsets).
    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn hashes(&self) -> &ArchetypeHashes {
        &self.hashes
    }

    /// Sorted component ids of one class.
    pub fn ids(&self, kind: ComponentKind) -> &[Entity] {
        self.layout.ids(kind)
    }

    /// Both classes' ids merged and sorted; the list queries match against.
    pub fn ids_view(&self) -> &[Entity] {
        &self.ids_match
    }

    pub fn has(&self, kind: ComponentKind, id: Entity) -> bool {
        self.layout.has(kind, id)
    }

    /// Does the archetype contain the id in either class?
    pub fn has_id(&self, id: Entity) -> bool {
        self.ids_match.binary_search(&id).is_ok()
    }

    /// Typed variant of [`Archetype::has_id`] through the descriptor cache.
    pub fn has_type<T: 'static>(&self, cache: &ComponentCache) -> bool {
        cache.entity_of::<T>().is_some_and(|id| self.has_id(id))
    }

    /// Signature equality against candidate id lists. The hashes are only
    /// an accelerator; this is the identity test.
    pub fn cmp_comp_ids(&self, ids_generic: &[Entity], ids_chunk: &[Entity]) -> bool {
        self.ids(ComponentKind::Generic) == ids_generic && self.ids(ComponentKind::Chunk) == ids_chunk
    }

    /// Query-mask early rejection: every bit of `mask` must be present in
    /// the archetype's combined matcher hash.
    pub fn matches_mask(&self, mask: u64) -> bool {
        let combined = self.hashes.matcher_hash[0] | self.hashes.matcher_hash[1];
        combined & mask == mask
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, idx: u32) -> &Chunk {
        &self.chunks[idx as usize]
    }

    pub fn chunk_mut(&mut self, idx: u32) -> &mut Chunk {
        &mut self.chunks[idx as usize]
    }

    /// Total live entities across all chunks.
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(|c| c.count() as usize).sum()
    }

    pub fn edges(&self) -> &ArchetypeGraph {
        &self.edges
    }

    /// Install both directions of a graph edge: `self` (missing the
    /// component) gains the add edge towards `other`, `other` the remove
    /// edge back. Edges are immutable once installed.
    pub fn build_graph_edges(&mut self, other: &mut Archetype, kind: ComponentKind, id: Entity) {
        debug_assert!(!self.has(kind, id));
        debug_assert!(other.has(kind, id));
        self.edges.set_edge_right(kind, id, other.id);
        other.edges.set_edge_left(kind, id, self.id);
    }

    /// Find or create a chunk with a free slot.
    ///
    /// Partial chunks are preferred over empty ones so defrag has less to
    /// do; a new chunk is allocated only when every existing one is full.
    /// Chunk components of a freshly allocated chunk are constructed here.
    pub fn foc_free_chunk(
        &mut self,
        allocator: &mut BlockAllocator,
        cache: &ComponentCache,
        version: u32,
    ) -> u32 {
        let mut empty = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.is_semi_full() {
                return i as u32;
            }
            if chunk.is_empty() && empty.is_none() {
                empty = Some(i as u32);
            }
        }
        if let Some(i) = empty {
            return i;
        }

        let idx = self.chunks.len() as u32;
        let block = allocator.alloc(self.layout.size_class());
        let chunk = Chunk::init(block, &self.layout, idx, version);
        for (i, &id) in self.layout.ids(ComponentKind::Chunk).iter().enumerate() {
            if self.layout.comp_size(ComponentKind::Chunk, i) == 0 {
                continue;
            }
            if let Some(ctor) = cache.desc(id).and_then(|d| d.ctor) {
                // SAFETY: pointer addresses the chunk component's solved,
                // aligned slot.
                unsafe { ctor(chunk.comp_ptr(&self.layout, ComponentKind::Chunk, i), 1) };
            }
        }
        self.chunks.push(chunk);
        idx
    }

    /// Free a chunk's block and swap-back-erase it from the chunk list.
    /// The chunk must be empty of entities; its chunk components are
    /// destructed. The displaced chunk's index and its entities' records
    /// are fixed up.
    pub fn remove_chunk(
        &mut self,
        allocator: &mut BlockAllocator,
        chunk_idx: u32,
        entities: &mut [EntityContainer],
        cache: &ComponentCache,
    ) {
        let idx = chunk_idx as usize;
        assert!(idx < self.chunks.len(), "chunk index out of bounds");
        assert!(self.chunks[idx].is_empty(), "removing a non-empty chunk");

        let chunk = self.chunks.swap_remove(idx);
        Self::run_chunk_dtors(&self.layout, &chunk, cache);
        // SAFETY: the block came from this allocator with this class.
        unsafe { allocator.free(chunk.into_block(), self.layout.size_class()) };

        if idx < self.chunks.len() {
            self.chunks[idx].set_index(chunk_idx);
            for e in self.chunks[idx].entities() {
                entities[e.id() as usize].chunk_idx = chunk_idx;
            }
        }
    }

    /// Append an entity to a chunk; see [`Chunk::add_entity`].
    pub fn add_entity_to_chunk(&mut self, chunk_idx: u32, e: Entity, version: u32) -> u16 {
        self.chunks[chunk_idx as usize].add_entity(&self.layout, e, version)
    }

    /// Remove an entity from a chunk; see [`Chunk::remove_entity`].
    pub fn remove_entity_from_chunk(
        &mut self,
        chunk_idx: u32,
        idx: u16,
        entities: &mut [EntityContainer],
        version: u32,
    ) {
        self.chunks[chunk_idx as usize].remove_entity(&self.layout, idx, entities, version)
    }

    /// Move an entity across a chunk's enabled/disabled boundary; see
    /// [`Chunk::enable_entity`]. Returns the entity's final slot.
    pub fn enable_entity_in_chunk(
        &mut self,
        chunk_idx: u32,
        idx: u16,
        enable: bool,
        entities: &mut [EntityContainer],
    ) -> u16 {
        self.chunks[chunk_idx as usize].enable_entity(&self.layout, idx, enable, entities)
    }

    /// Typed view over a generic component in one chunk.
    pub fn view_in_chunk<T: 'static>(&self, chunk_idx: u32, id: Entity) -> &[T] {
        self.chunks[chunk_idx as usize].view(&self.layout, id)
    }

    /// Mutable typed view; bumps the component's version.
    pub fn view_mut_in_chunk<T: 'static>(
        &mut self,
        chunk_idx: u32,
        id: Entity,
        version: u32,
    ) -> &mut [T] {
        self.chunks[chunk_idx as usize].view_mut(&self.layout, id, version)
    }

    /// Drop all chunks, running component dtors and returning blocks to the
    /// allocator. World teardown only.
    pub(crate) fn teardown(&mut self, allocator: &mut BlockAllocator, cache: &ComponentCache) {
        while let Some(chunk) = self.chunks.pop() {
            Self::run_entity_dtors(&self.layout, &chunk, cache);
            Self::run_chunk_dtors(&self.layout, &chunk, cache);
            // SAFETY: the block came from this allocator with this class.
            unsafe { allocator.free(chunk.into_block(), self.layout.size_class()) };
        }
    }

    /// Run dtors over every live generic component element of a chunk.
    fn run_entity_dtors(layout: &ChunkLayout, chunk: &Chunk, cache: &ComponentCache) {
        let count = chunk.count() as usize;
        if count == 0 {
            return;
        }
        for (i, &id) in layout.ids(ComponentKind::Generic).iter().enumerate() {
            if layout.comp_size(ComponentKind::Generic, i) == 0 {
                continue;
            }
            if let Some(dtor) = cache.desc(id).and_then(|d| d.dtor) {
                // SAFETY: elements `[0, count)` are initialized and packed.
                unsafe { dtor(chunk.comp_ptr(layout, ComponentKind::Generic, i), count) };
            }
        }
    }

    /// Run dtors over a chunk's per-chunk component instances.
    fn run_chunk_dtors(layout: &ChunkLayout, chunk: &Chunk, cache: &ComponentCache) {
        for (i, &id) in layout.ids(ComponentKind::Chunk).iter().enumerate() {
            if layout.comp_size(ComponentKind::Chunk, i) == 0 {
                continue;
            }
            if let Some(dtor) = cache.desc(id).and_then(|d| d.dtor) {
                // SAFETY: the instance was constructed when the chunk was
                // allocated.
                unsafe { dtor(chunk.comp_ptr(layout, ComponentKind::Chunk, i), 1) };
            }
        }
    }

    /// Compact partial chunks by moving entities from trailing partials
    /// into leading ones, at most `max_entities` moves. Emptied chunks are
    /// pushed onto `out_chunks_to_remove` (descending removal order is the
    /// caller's job). Component versions are not touched: the entities and
    /// their components are logically unchanged.
    pub fn defrag(
        &mut self,
        max_entities: u32,
        out_chunks_to_remove: &mut Vec<u32>,
        entities: &mut [EntityContainer],
    ) -> u32 {
        let len = self.chunks.len();
        if len < 2 || max_entities == 0 {
            return 0;
        }

        let mut front = 0;
        while front < len && !self.chunks[front].is_semi_full() {
            front += 1;
        }
        if front >= len {
            return 0;
        }
        let mut back = front + 1;
        while back < len && !self.chunks[back].is_semi_full() {
            back += 1;
        }

        let mut moved = 0u32;
        while back < len && front < back && moved < max_entities {
            {
                let (a, b) = self.chunks.split_at_mut(back);
                a[front].steal_last_entity(&self.layout, &mut b[0], entities);
            }
            moved += 1;

            if self.chunks[back].is_empty() {
                out_chunks_to_remove.push(back as u32);
                back += 1;
                while back < len && !self.chunks[back].is_semi_full() {
                    back += 1;
                }
            }
            if self.chunks[front].is_full() {
                front += 1;
                while front < len && (front == back || !self.chunks[front].is_semi_full()) {
                    front += 1;
                }
            }
        }
        moved
    }

    /// Lifespan sweep: empty chunks start dying, tick down, and are pushed
    /// onto `out_chunks_to_remove` once elapsed; repopulated chunks are
    /// revived by `add_entity`.
    pub fn update_chunk_gc(&mut self, out_chunks_to_remove: &mut Vec<u32>) {
        for (i, chunk) in self.chunks.iter_mut().enumerate() {
            if !chunk.is_empty() {
                continue;
            }
            if !chunk.is_dying() {
                chunk.start_dying();
            } else if chunk.progress_death() {
                out_chunks_to_remove.push(i as u32);
            }
        }
    }
}
