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

//! Chunks: fixed-size blocks storing entities of one archetype in SoA order.
//!
//! In-block layout, each section aligned: header, per-class component
//! version arrays, per-class cached component id arrays, the entity handle
//! array, each generic component's `capacity`-element array, then one
//! instance of each chunk component. Component data is addressed through
//! offsets held by [`ChunkLayout`]; pointers are derived at access time so
//! chunks stay relocatable.

use std::ptr::NonNull;

use smallvec::SmallVec;

use crate::block::{mem_block_size, MemBlockSize, MEM_BLOCK_USABLE_OFFSET};
use crate::component::{ComponentCache, ComponentKind, COMPONENT_KIND_COUNT};
use crate::entity::{Entity, EntityContainer};
use crate::utils::align_to;

/// Hard per-chunk entity cap for the root archetype (empty signature).
pub const MAX_CHUNK_ENTITIES: u16 = 1024;
/// Hard per-chunk entity cap for every other archetype.
pub const MAX_CHUNK_ENTITIES_NON_ROOT: u16 = 512;

/// Ticks an empty chunk survives before its memory is reclaimed.
pub const MAX_CHUNK_LIFESPAN: u8 = 4;

const ENTITY_SIZE: usize = std::mem::size_of::<Entity>();

/// Header written at the start of every chunk block.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    /// Index of this chunk in its archetype's chunk list.
    pub index: u32,
    /// Byte offset of the entity handle array within the block.
    pub off_entities: u32,
    /// Live entities in the chunk.
    pub count: u16,
    /// Enabled entities; always `count - first_enabled_idx`.
    pub count_enabled: u16,
    /// Disabled entities occupy `[0, first_enabled_idx)`.
    pub first_enabled_idx: u16,
    /// Maximum entities this chunk can hold.
    pub capacity: u16,
    /// Non-zero while the chunk is being iterated externally; structural
    /// changes assert against it.
    pub structural_locks: u16,
    /// Countdown to reclamation once the chunk is empty; 0 = not dying.
    pub lifespan: u8,
    /// Block size class, see [`MemBlockSize`].
    pub size_class: u8,
}

/// Computed per-archetype chunk layout: capacity, size class and the byte
/// offset of every section and component array.
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    ids: [SmallVec<[Entity; 8]>; COMPONENT_KIND_COUNT],
    comp_offs: [SmallVec<[u32; 8]>; COMPONENT_KIND_COUNT],
    comp_sizes: [SmallVec<[u32; 8]>; COMPONENT_KIND_COUNT],
    off_versions: [u32; COMPONENT_KIND_COUNT],
    off_ids: [u32; COMPONENT_KIND_COUNT],
    off_entities: u32,
    capacity: u16,
    size_class: MemBlockSize,
    data_bytes: u32,
}

impl ChunkLayout {
    /// Solve the chunk layout for an archetype signature.
    ///
    /// Id lists must be sorted ascending and deduplicated. Starts against
    /// the 16 KiB block; if the packed layout fits under the 8/16 midpoint
    /// the solve is repeated against the 8 KiB target. The empty signature
    /// is the root archetype's degenerate case: capacity
    /// [`MAX_CHUNK_ENTITIES`], no component data.
    pub fn compute(cache: &ComponentCache, ids_generic: &[Entity], ids_chunk: &[Entity]) -> Self {
        Self::compute_inner(cache, ids_generic, ids_chunk, None)
    }

    /// Solve against a forced block size class, skipping the block pick.
    pub fn compute_with_block(
        cache: &ComponentCache,
        ids_generic: &[Entity],
        ids_chunk: &[Entity],
        class: MemBlockSize,
    ) -> Self {
        Self::compute_inner(cache, ids_generic, ids_chunk, Some(class))
    }

    fn compute_inner(
        cache: &ComponentCache,
        ids_generic: &[Entity],
        ids_chunk: &[Entity],
        forced: Option<MemBlockSize>,
    ) -> Self {
        assert!(ids_sorted_unique(ids_generic), "generic ids not sorted");
        assert!(ids_sorted_unique(ids_chunk), "chunk ids not sorted");

        let ids: [SmallVec<[Entity; 8]>; 2] = [
            SmallVec::from_slice(ids_generic),
            SmallVec::from_slice(ids_chunk),
        ];
        let sizes: [SmallVec<[u32; 8]>; 2] = [
            ids_generic.iter().map(|&id| cache.size_of(id)).collect(),
            ids_chunk.iter().map(|&id| cache.size_of(id)).collect(),
        ];
        let aligs: [SmallVec<[u32; 8]>; 2] = [
            ids_generic.iter().map(|&id| cache.alig_of(id)).collect(),
            ids_chunk.iter().map(|&id| cache.alig_of(id)).collect(),
        ];

        // Fixed prefix: header, versions, cached ids, entity array.
        let mut off = std::mem::size_of::<ChunkHeader>() + MEM_BLOCK_USABLE_OFFSET;
        let mut off_versions = [0u32; 2];
        let mut off_ids = [0u32; 2];
        for kind in 0..COMPONENT_KIND_COUNT {
            off = align_to(off, 4);
            off_versions[kind] = off as u32;
            off += 4 * ids[kind].len();
        }
        for kind in 0..COMPONENT_KIND_COUNT {
            off = align_to(off, ENTITY_SIZE);
            off_ids[kind] = off as u32;
            off += ENTITY_SIZE * ids[kind].len();
        }
        let off_entities = align_to(off, ENTITY_SIZE) as u32;

        let is_root = ids[0].is_empty() && ids[1].is_empty();
        let (capacity, size_class) = if is_root {
            // Degenerate case: entity handles only, always the big block.
            (MAX_CHUNK_ENTITIES, MemBlockSize::Big)
        } else if let Some(class) = forced {
            (Self::solve(off_entities, &sizes, &aligs, class), class)
        } else {
            let n_big = Self::solve(off_entities, &sizes, &aligs, MemBlockSize::Big);
            let packed = Self::packed_bytes(off_entities, &sizes, &aligs, n_big);
            let midpoint = (mem_block_size(MemBlockSize::Small) + mem_block_size(MemBlockSize::Big)) / 2;
            if packed <= midpoint {
                let n_small = Self::solve(off_entities, &sizes, &aligs, MemBlockSize::Small);
                (n_small, MemBlockSize::Small)
            } else {
                (n_big, MemBlockSize::Big)
            }
        };
        assert!(capacity >= 1, "component set too large for a chunk block");

        // Final sweep: assign every component's offset.
        let mut comp_offs: [SmallVec<[u32; 8]>; 2] = [SmallVec::new(), SmallVec::new()];
        let mut off = off_entities as usize + ENTITY_SIZE * capacity as usize;
        for kind in 0..COMPONENT_KIND_COUNT {
            let per_entity = kind == ComponentKind::Generic.index();
            for i in 0..ids[kind].len() {
                let size = sizes[kind][i] as usize;
                if size == 0 {
                    comp_offs[kind].push(0);
                    continue;
                }
                off = align_to(off, aligs[kind][i] as usize);
                comp_offs[kind].push(off as u32);
                off += size * if per_entity { capacity as usize } else { 1 };
            }
        }
        let data_bytes = off as u32;
        assert!(
            data_bytes as usize <= mem_block_size(size_class),
            "chunk layout exceeds block size"
        );

        ChunkLayout {
            ids,
            comp_offs,
            comp_sizes: sizes,
            off_versions,
            off_ids,
            off_entities,
            capacity,
            size_class,
            data_bytes,
        }
    }

    /// Solve for the maximum entity count fitting the target block.
    fn solve(
        off_entities: u32,
        sizes: &[SmallVec<[u32; 8]>; 2],
        aligs: &[SmallVec<[u32; 8]>; 2],
        class: MemBlockSize,
    ) -> u16 {
        let target = mem_block_size(class);
        let sum_generic: usize = sizes[0].iter().map(|&s| s as usize).sum();
        let sum_chunk: usize = sizes[1].iter().map(|&s| s as usize).sum();
        let per_entity = sum_generic + ENTITY_SIZE;

        let budget = target
            .saturating_sub(off_entities as usize)
            .saturating_sub(sum_chunk)
            .saturating_sub(1);
        let mut n = (budget / per_entity).min(MAX_CHUNK_ENTITIES_NON_ROOT as usize);

        // Padding may push the estimate over; shrink and retry. Converges in
        // at most two iterations.
        loop {
            assert!(n >= 1, "component set too large for a chunk block");
            let packed = Self::packed_bytes(off_entities, sizes, aligs, n as u16);
            if packed <= target {
                return n as u16;
            }
            let overflow = packed - target;
            n -= overflow.div_ceil(per_entity).max(1);
        }
    }

    /// Bytes consumed by a fully packed chunk of `n` entities.
    fn packed_bytes(
        off_entities: u32,
        sizes: &[SmallVec<[u32; 8]>; 2],
        aligs: &[SmallVec<[u32; 8]>; 2],
        n: u16,
    ) -> usize {
        let mut off = off_entities as usize + ENTITY_SIZE * n as usize;
        for kind in 0..COMPONENT_KIND_COUNT {
            let per_entity = kind == ComponentKind::Generic.index();
            for i in 0..sizes[kind].len() {
                let size = sizes[kind][i] as usize;
                if size == 0 {
                    continue;
                }
                off = align_to(off, aligs[kind][i] as usize);
                off += size * if per_entity { n as usize } else { 1 };
            }
        }
        off
    }

    pub fn ids(&self, kind: ComponentKind) -> &[Entity] {
        &self.ids[kind.index()]
    }

    pub fn comp_count(&self, kind: ComponentKind) -> usize {
        self.ids[kind.index()].len()
    }

    /// Index of a component id within its class, by binary search.
    pub fn comp_idx(&self, kind: ComponentKind, id: Entity) -> Option<usize> {
        self.ids[kind.index()].binary_search(&id).ok()
    }

    pub fn has(&self, kind: ComponentKind, id: Entity) -> bool {
        self.comp_idx(kind, id).is_some()
    }

    pub fn comp_off(&self, kind: ComponentKind, idx: usize) -> u32 {
        self.comp_offs[kind.index()][idx]
    }

    pub fn comp_size(&self, kind: ComponentKind, idx: usize) -> u32 {
        self.comp_sizes[kind.index()][idx]
    }

    pub fn version_off(&self, kind: ComponentKind, idx: usize) -> u32 {
        self.off_versions[kind.index()] + 4 * idx as u32
    }

    pub fn ids_off(&self, kind: ComponentKind) -> u32 {
        self.off_ids[kind.index()]
    }

    pub fn off_entities(&self) -> u32 {
        self.off_entities
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn size_class(&self) -> MemBlockSize {
        self.size_class
    }

    /// Bytes consumed by a fully packed chunk.
    pub fn data_bytes(&self) -> u32 {
        self.data_bytes
    }
}

fn ids_sorted_unique(ids: &[Entity]) -> bool {
    ids.windows(2).all(|w| w[0] < w[1])
}

/// Wraparound-safe version comparison.
pub(crate) fn version_changed(stored: u32, since: u32) -> bool {
    let delta = stored.wrapping_sub(since);
    delta != 0 && delta < 0x8000_0000
}

/// A single chunk. The struct is only the block pointer; all state lives
/// in-block, so moving a `Chunk` value never invalidates entity data.
pub struct Chunk {
    data: NonNull<u8>,
}

impl Chunk {
    /// Take ownership of a freshly allocated, zeroed block and write the
    /// header, cached id arrays and initial component versions.
    pub(crate) fn init(data: NonNull<u8>, layout: &ChunkLayout, index: u32, version: u32) -> Self {
        let chunk = Chunk { data };
        // SAFETY: the block is at least `layout.data_bytes()` long, zeroed,
        // and 64-byte aligned; all offsets come from the layout solver.
        unsafe {
            std::ptr::write(
                chunk.data.as_ptr() as *mut ChunkHeader,
                ChunkHeader {
                    index,
                    off_entities: layout.off_entities(),
                    count: 0,
                    count_enabled: 0,
                    first_enabled_idx: 0,
                    capacity: layout.capacity(),
                    structural_locks: 0,
                    lifespan: 0,
                    size_class: layout.size_class() as u8,
                },
            );
            for kind in [ComponentKind::Generic, ComponentKind::Chunk] {
                let ids = layout.ids(kind);
                let dst = chunk.data.as_ptr().add(layout.ids_off(kind) as usize) as *mut Entity;
                std::ptr::copy_nonoverlapping(ids.as_ptr(), dst, ids.len());
                for i in 0..ids.len() {
                    chunk.write_version(layout, kind, i, version);
                }
            }
        }
        chunk
    }

    /// Release the block back to the caller for freeing.
    pub(crate) fn into_block(self) -> NonNull<u8> {
        self.data
    }

    fn header(&self) -> &ChunkHeader {
        // SAFETY: written by `init`, properly aligned at block start.
        unsafe { &*(self.data.as_ptr() as *const ChunkHeader) }
    }

    fn header_mut(&mut self) -> &mut ChunkHeader {
        // SAFETY: as above; `&mut self` gives exclusive access.
        unsafe { &mut *(self.data.as_ptr() as *mut ChunkHeader) }
    }

    pub fn index(&self) -> u32 {
        self.header().index
    }

    pub(crate) fn set_index(&mut self, index: u32) {
        self.header_mut().index = index;
    }

    pub fn count(&self) -> u16 {
        self.header().count
    }

    pub fn count_enabled(&self) -> u16 {
        self.header().count_enabled
    }

    pub fn first_enabled_idx(&self) -> u16 {
        self.header().first_enabled_idx
    }

    pub fn capacity(&self) -> u16 {
        self.header().capacity
    }

    pub fn size_class(&self) -> MemBlockSize {
        MemBlockSize::from_u8(self.header().size_class)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count() == self.capacity()
    }

    /// Non-empty with free slots left; defrag fills these first.
    pub fn is_semi_full(&self) -> bool {
        !self.is_empty() && !self.is_full()
    }

    pub fn has_free_slots(&self) -> bool {
        self.count() < self.capacity()
    }

    // ---- structural change lock ----

    pub fn lock(&mut self) {
        self.header_mut().structural_locks += 1;
    }

    pub fn unlock(&mut self) {
        let h = self.header_mut();
        assert!(h.structural_locks > 0, "unbalanced chunk unlock");
        h.structural_locks -= 1;
    }

    pub fn is_locked(&self) -> bool {
        self.header().structural_locks > 0
    }

    // ---- lifespan ----

    pub fn is_dying(&self) -> bool {
        self.header().lifespan > 0
    }

    /// Remaining death countdown; 0 when not dying.
    pub fn lifespan(&self) -> u8 {
        self.header().lifespan
    }

    pub(crate) fn start_dying(&mut self) {
        self.header_mut().lifespan = MAX_CHUNK_LIFESPAN;
    }

    /// Advance the death countdown. Returns true once it elapses.
    pub(crate) fn progress_death(&mut self) -> bool {
        let h = self.header_mut();
        debug_assert!(h.lifespan > 0);
        h.lifespan -= 1;
        h.lifespan == 0
    }

    pub(crate) fn revive(&mut self) {
        self.header_mut().lifespan = 0;
    }

    // ---- entities ----

    pub fn entities(&self) -> &[Entity] {
        let h = self.header();
        // SAFETY: the entity array holds `count` initialized handles.
        unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr().add(h.off_entities as usize) as *const Entity,
                h.count as usize,
            )
        }
    }

    pub fn entity_at(&self, idx: u16) -> Entity {
        assert!(idx < self.count(), "entity index out of bounds");
        self.entities()[idx as usize]
    }

    unsafe fn entity_ptr(&self, idx: u16) -> *mut Entity {
        let h = self.header();
        (self.data.as_ptr().add(h.off_entities as usize) as *mut Entity).add(idx as usize)
    }

    /// Append an entity. Returns the new slot index. Bumps both class
    /// versions.
    pub fn add_entity(&mut self, layout: &ChunkLayout, e: Entity, version: u32) -> u16 {
        assert!(!self.is_locked(), "structural change on a locked chunk");
        let idx = self.count();
        assert!(idx < self.capacity(), "chunk is full");

        // SAFETY: idx < capacity, slot is within the entity array.
        unsafe { std::ptr::write(self.entity_ptr(idx), e) };
        let h = self.header_mut();
        h.count += 1;
        h.count_enabled += 1;
        if self.is_dying() {
            self.revive();
        }
        self.bump_class_versions(layout, version);
        idx
    }

    /// Remove the entity at `idx`, swap-filling the hole from the end while
    /// keeping the disabled partition dense. The displaced entities'
    /// records in `entities` are updated. Bumps both class versions.
    pub fn remove_entity(
        &mut self,
        layout: &ChunkLayout,
        idx: u16,
        entities: &mut [EntityContainer],
        version: u32,
    ) {
        assert!(!self.is_locked(), "structural change on a locked chunk");
        let count = self.count();
        assert!(idx < count, "entity index out of bounds");

        let first_enabled = self.first_enabled_idx();
        let removed_disabled = idx < first_enabled;
        let mut hole = idx;
        if removed_disabled {
            // Fill the hole from the disabled partition's tail, then the
            // vacated boundary slot from the chunk's tail.
            let last_disabled = first_enabled - 1;
            if hole != last_disabled {
                self.move_slot(layout, last_disabled, hole, entities);
            }
            self.header_mut().first_enabled_idx -= 1;
            hole = last_disabled;
        }

        let last = count - 1;
        if hole != last {
            self.move_slot(layout, last, hole, entities);
        }

        let h = self.header_mut();
        h.count -= 1;
        if !removed_disabled {
            h.count_enabled -= 1;
        }
        self.bump_class_versions(layout, version);
    }

    /// Move an entity across the enabled/disabled boundary. No-op when the
    /// entity is already in the requested state. Versions are NOT bumped:
    /// component data is logically unchanged.
    pub fn enable_entity(
        &mut self,
        layout: &ChunkLayout,
        idx: u16,
        enable: bool,
        entities: &mut [EntityContainer],
    ) -> u16 {
        assert!(!self.is_locked(), "structural change on a locked chunk");
        assert!(idx < self.count(), "entity index out of bounds");

        let first_enabled = self.first_enabled_idx();
        if enable {
            if idx >= first_enabled {
                return idx;
            }
            let boundary = first_enabled - 1;
            if idx != boundary {
                self.swap_slots(layout, idx, boundary, entities);
            }
            let h = self.header_mut();
            h.first_enabled_idx -= 1;
            h.count_enabled += 1;
            boundary
        } else {
            if idx < first_enabled {
                return idx;
            }
            let boundary = first_enabled;
            if idx != boundary {
                self.swap_slots(layout, idx, boundary, entities);
            }
            let h = self.header_mut();
            h.first_enabled_idx += 1;
            h.count_enabled -= 1;
            boundary
        }
    }

    /// Copy slot `src` over slot `dst` (entity handle + every generic
    /// component) and point the moved entity's record at `dst`.
    fn move_slot(
        &mut self,
        layout: &ChunkLayout,
        src: u16,
        dst: u16,
        entities: &mut [EntityContainer],
    ) {
        debug_assert_ne!(src, dst);
        // SAFETY: both slots are below `count`; src != dst so the copies
        // never overlap.
        unsafe {
            let moved = std::ptr::read(self.entity_ptr(src));
            std::ptr::write(self.entity_ptr(dst), moved);
            for i in 0..layout.comp_count(ComponentKind::Generic) {
                let size = layout.comp_size(ComponentKind::Generic, i) as usize;
                if size == 0 {
                    continue;
                }
                let base = self
                    .data
                    .as_ptr()
                    .add(layout.comp_off(ComponentKind::Generic, i) as usize);
                std::ptr::copy_nonoverlapping(
                    base.add(size * src as usize),
                    base.add(size * dst as usize),
                    size,
                );
            }
            entities[moved.id() as usize].idx_in_chunk = dst;
        }
    }

    /// Swap two slots wholesale, updating both entity records.
    fn swap_slots(
        &mut self,
        layout: &ChunkLayout,
        a: u16,
        b: u16,
        entities: &mut [EntityContainer],
    ) {
        debug_assert_ne!(a, b);
        // SAFETY: both slots are below `count` and distinct.
        unsafe {
            std::ptr::swap(self.entity_ptr(a), self.entity_ptr(b));
            for i in 0..layout.comp_count(ComponentKind::Generic) {
                let size = layout.comp_size(ComponentKind::Generic, i) as usize;
                if size == 0 {
                    continue;
                }
                let base = self
                    .data
                    .as_ptr()
                    .add(layout.comp_off(ComponentKind::Generic, i) as usize);
                std::ptr::swap_nonoverlapping(
                    base.add(size * a as usize),
                    base.add(size * b as usize),
                    size,
                );
            }
            let ea = std::ptr::read(self.entity_ptr(a));
            let eb = std::ptr::read(self.entity_ptr(b));
            entities[ea.id() as usize].idx_in_chunk = a;
            entities[eb.id() as usize].idx_in_chunk = b;
        }
    }

    // ---- component data ----

    /// Raw pointer to a generic component's array or a chunk component's
    /// single instance.
    pub(crate) fn comp_ptr(&self, layout: &ChunkLayout, kind: ComponentKind, idx: usize) -> *mut u8 {
        debug_assert!(layout.comp_size(kind, idx) > 0);
        // SAFETY: offset is in-bounds per the layout solver.
        unsafe {
            self.data
                .as_ptr()
                .add(layout.comp_off(kind, idx) as usize)
        }
    }

    /// Typed view over a generic component's live elements.
    pub fn view<T: 'static>(&self, layout: &ChunkLayout, id: Entity) -> &[T] {
        let idx = layout
            .comp_idx(ComponentKind::Generic, id)
            .expect("component not present in archetype");
        let size = layout.comp_size(ComponentKind::Generic, idx);
        assert!(size > 0, "view of a zero-sized component");
        assert_eq!(size as usize, std::mem::size_of::<T>());
        // SAFETY: size/alignment asserted; `count` elements are initialized.
        unsafe {
            std::slice::from_raw_parts(
                self.comp_ptr(layout, ComponentKind::Generic, idx) as *const T,
                self.count() as usize,
            )
        }
    }

    /// Mutable typed view. Bumps the component's version.
    pub fn view_mut<T: 'static>(
        &mut self,
        layout: &ChunkLayout,
        id: Entity,
        version: u32,
    ) -> &mut [T] {
        let idx = layout
            .comp_idx(ComponentKind::Generic, id)
            .expect("component not present in archetype");
        let size = layout.comp_size(ComponentKind::Generic, idx);
        assert!(size > 0, "view of a zero-sized component");
        assert_eq!(size as usize, std::mem::size_of::<T>());
        self.write_version(layout, ComponentKind::Generic, idx, version);
        // SAFETY: as in `view`; `&mut self` gives exclusive access.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.comp_ptr(layout, ComponentKind::Generic, idx) as *mut T,
                self.count() as usize,
            )
        }
    }

    /// Shared view of a chunk component's single instance.
    pub fn chunk_view<T: 'static>(&self, layout: &ChunkLayout, id: Entity) -> &T {
        let idx = layout
            .comp_idx(ComponentKind::Chunk, id)
            .expect("chunk component not present in archetype");
        let size = layout.comp_size(ComponentKind::Chunk, idx);
        assert!(size > 0, "view of a zero-sized component");
        assert_eq!(size as usize, std::mem::size_of::<T>());
        // SAFETY: single aligned instance at the solved offset.
        unsafe { &*(self.comp_ptr(layout, ComponentKind::Chunk, idx) as *const T) }
    }

    /// Mutable view of a chunk component's single instance. Bumps its
    /// version.
    pub fn chunk_view_mut<T: 'static>(
        &mut self,
        layout: &ChunkLayout,
        id: Entity,
        version: u32,
    ) -> &mut T {
        let idx = layout
            .comp_idx(ComponentKind::Chunk, id)
            .expect("chunk component not present in archetype");
        let size = layout.comp_size(ComponentKind::Chunk, idx);
        assert!(size > 0, "view of a zero-sized component");
        assert_eq!(size as usize, std::mem::size_of::<T>());
        self.write_version(layout, ComponentKind::Chunk, idx, version);
        // SAFETY: as in `chunk_view`.
        unsafe { &mut *(self.comp_ptr(layout, ComponentKind::Chunk, idx) as *mut T) }
    }

    // ---- versions ----

    pub fn comp_version(&self, layout: &ChunkLayout, kind: ComponentKind, idx: usize) -> u32 {
        // SAFETY: version slot is in-bounds and 4-aligned.
        unsafe {
            *(self
                .data
                .as_ptr()
                .add(layout.version_off(kind, idx) as usize) as *const u32)
        }
    }

    fn write_version(&self, layout: &ChunkLayout, kind: ComponentKind, idx: usize, version: u32) {
        // SAFETY: as in `comp_version`.
        unsafe {
            *(self
                .data
                .as_ptr()
                .add(layout.version_off(kind, idx) as usize) as *mut u32) = version;
        }
    }

    fn bump_class_versions(&mut self, layout: &ChunkLayout, version: u32) {
        for kind in [ComponentKind::Generic, ComponentKind::Chunk] {
            for i in 0..layout.comp_count(kind) {
                self.write_version(layout, kind, i, version);
            }
        }
    }

    /// Did the component change since the version snapshot? Wraparound-safe.
    pub fn did_change(
        &self,
        layout: &ChunkLayout,
        kind: ComponentKind,
        since: u32,
        comp_idx: usize,
    ) -> bool {
        version_changed(self.comp_version(layout, kind, comp_idx), since)
    }

    /// Move the last entity of `src` into this chunk, preserving its
    /// enabled/disabled state. Raw byte moves only: neither chunk's
    /// component versions are touched (the entity and its components are
    /// logically unchanged). Used by defrag.
    pub(crate) fn steal_last_entity(
        &mut self,
        layout: &ChunkLayout,
        src: &mut Chunk,
        entities: &mut [EntityContainer],
    ) -> Entity {
        assert!(!self.is_locked() && !src.is_locked(), "structural change on a locked chunk");
        debug_assert!(self.has_free_slots());
        debug_assert!(!src.is_empty());

        let src_idx = src.count() - 1;
        // SAFETY: src_idx is the last live slot; dst slot is below capacity.
        let e = unsafe { std::ptr::read(src.entity_ptr(src_idx)) };
        let dst_idx = self.count();
        unsafe {
            std::ptr::write(self.entity_ptr(dst_idx), e);
            for i in 0..layout.comp_count(ComponentKind::Generic) {
                let size = layout.comp_size(ComponentKind::Generic, i) as usize;
                if size == 0 {
                    continue;
                }
                let off = layout.comp_off(ComponentKind::Generic, i) as usize;
                std::ptr::copy_nonoverlapping(
                    src.data.as_ptr().add(off + size * src_idx as usize),
                    self.data.as_ptr().add(off + size * dst_idx as usize),
                    size,
                );
            }
        }
        {
            let h = self.header_mut();
            h.count += 1;
            h.count_enabled += 1;
        }
        {
            let h = src.header_mut();
            let was_disabled = src_idx < h.first_enabled_idx;
            h.count -= 1;
            if was_disabled {
                h.first_enabled_idx -= 1;
            } else {
                h.count_enabled -= 1;
            }
        }

        let rec = &mut entities[e.id() as usize];
        rec.chunk_idx = self.index();
        rec.idx_in_chunk = dst_idx;
        if rec.disabled {
            let final_idx = self.enable_entity(layout, dst_idx, false, entities);
            entities[e.id() as usize].idx_in_chunk = final_idx;
        }
        e
    }

    /// The component ids cached in-block at init time.
    pub fn cached_ids(&self, layout: &ChunkLayout, kind: ComponentKind) -> &[Entity] {
        // SAFETY: written by `init`, aligned per the layout.
        unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr().add(layout.ids_off(kind) as usize) as *const Entity,
                layout.comp_count(kind),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockAllocator;
    use crate::component::ComponentDesc;

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
        z: f32,
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
        z: f32,
    }

    fn test_cache() -> (ComponentCache, Entity, Entity) {
        let mut cache = ComponentCache::new();
        let pos = Entity::new(10, 0);
        let vel = Entity::new(11, 0);
        cache.insert(ComponentDesc::of::<Position>(pos));
        cache.insert(ComponentDesc::of::<Velocity>(vel));
        (cache, pos, vel)
    }

    fn make_chunk(layout: &ChunkLayout, alloc: &mut BlockAllocator) -> Chunk {
        let block = alloc.alloc(layout.size_class());
        Chunk::init(block, layout, 0, 1)
    }

    fn free_chunk(chunk: Chunk, layout: &ChunkLayout, alloc: &mut BlockAllocator) {
        unsafe { alloc.free(chunk.into_block(), layout.size_class()) };
    }

    #[test]
    fn test_layout_two_components_small_block() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute_with_block(&cache, &[pos, vel], &[], MemBlockSize::Small);

        // 12+12 byte components pack into the 8 KiB block at roughly
        // (8192 - prefix) / (12 + 12 + 8) entities.
        assert_eq!(layout.size_class(), MemBlockSize::Small);
        assert!(layout.capacity() >= 240 && layout.capacity() <= 260);
        assert!(layout.data_bytes() as usize <= 8192);

        // offsets are aligned and disjoint
        let off_pos = layout.comp_off(ComponentKind::Generic, 0);
        let off_vel = layout.comp_off(ComponentKind::Generic, 1);
        assert_eq!(off_pos % 4, 0);
        assert_eq!(off_vel % 4, 0);
        assert!(off_vel >= off_pos + 12 * layout.capacity() as u32);
    }

    #[test]
    fn test_layout_dense_components_keep_big_block() {
        // A 16 KiB solve of Position+Velocity packs well past the 8/16
        // midpoint, so the pick keeps the big block.
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        assert_eq!(layout.size_class(), MemBlockSize::Big);
        assert!(layout.capacity() > 490 && layout.capacity() <= 512);
        assert!(layout.data_bytes() as usize <= 16384);
    }

    #[test]
    fn test_layout_sparse_component_drops_to_small_block() {
        // A single 12-byte component caps at 512 entities, fitting under
        // the midpoint; the solve repeats against the 8 KiB target.
        let (cache, pos, _) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos], &[]);
        assert_eq!(layout.size_class(), MemBlockSize::Small);
        assert!(layout.capacity() >= 390 && layout.capacity() <= 410);
    }

    #[test]
    fn test_layout_root_archetype() {
        let cache = ComponentCache::new();
        let layout = ChunkLayout::compute(&cache, &[], &[]);
        assert_eq!(layout.capacity(), MAX_CHUNK_ENTITIES);
        assert_eq!(layout.size_class(), MemBlockSize::Big);
        assert_eq!(layout.comp_count(ComponentKind::Generic), 0);
    }

    #[test]
    fn test_layout_large_component_picks_big_block() {
        let mut cache = ComponentCache::new();
        let big = Entity::new(12, 0);
        cache.insert(ComponentDesc {
            entity: big,
            name: "big",
            size: 4096,
            alig: 8,
            destructible: false,
            ctor: None,
            dtor: None,
        });
        let layout = ChunkLayout::compute(&cache, &[big], &[]);
        assert_eq!(layout.size_class(), MemBlockSize::Big);
        assert!(layout.capacity() >= 3);
    }

    #[test]
    fn test_layout_zero_sized_tag() {
        let (cache, pos, _) = test_cache();
        let tag = Entity::new(30, 0);
        let layout = ChunkLayout::compute(&cache, &[pos, tag], &[]);
        let tag_idx = layout.comp_idx(ComponentKind::Generic, tag).unwrap();
        assert_eq!(layout.comp_off(ComponentKind::Generic, tag_idx), 0);
        assert_eq!(layout.comp_size(ComponentKind::Generic, tag_idx), 0);
    }

    #[test]
    fn test_add_remove_swaps_last_into_hole() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        let mut alloc = BlockAllocator::new();
        let mut chunk = make_chunk(&layout, &mut alloc);
        let mut entities = vec![EntityContainer::new(); 64];

        for id in 20..23u32 {
            let e = Entity::new(id, 0);
            let idx = chunk.add_entity(&layout, e, 2);
            entities[id as usize].idx_in_chunk = idx;
        }
        {
            let v = chunk.view_mut::<Position>(&layout, pos, 2);
            v[0] = Position { x: 10.0, y: 0.0, z: 0.0 };
            v[1] = Position { x: 20.0, y: 0.0, z: 0.0 };
            v[2] = Position { x: 30.0, y: 0.0, z: 0.0 };
        }

        chunk.remove_entity(&layout, 0, &mut entities, 3);

        assert_eq!(chunk.count(), 2);
        assert_eq!(chunk.entity_at(0), Entity::new(22, 0));
        assert_eq!(chunk.entity_at(1), Entity::new(21, 0));
        assert_eq!(entities[22].idx_in_chunk, 0);
        let v = chunk.view::<Position>(&layout, pos);
        assert_eq!(v[0].x, 30.0);
        assert_eq!(v[1].x, 20.0);

        free_chunk(chunk, &layout, &mut alloc);
    }

    #[test]
    fn test_enable_disable_partition() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        let mut alloc = BlockAllocator::new();
        let mut chunk = make_chunk(&layout, &mut alloc);
        let mut entities = vec![EntityContainer::new(); 64];

        for id in 20..24u32 {
            let idx = chunk.add_entity(&layout, Entity::new(id, 0), 2);
            entities[id as usize].idx_in_chunk = idx;
        }
        assert_eq!(chunk.count_enabled(), 4);
        assert_eq!(chunk.first_enabled_idx(), 0);

        // disable e21 (slot 1): swaps with the boundary slot 0
        let idx21 = entities[21].idx_in_chunk;
        chunk.enable_entity(&layout, idx21, false, &mut entities);
        assert_eq!(chunk.count_enabled(), 3);
        assert_eq!(chunk.first_enabled_idx(), 1);
        assert_eq!(chunk.entity_at(0), Entity::new(21, 0));

        // disable another; both land in the front partition
        let idx23 = entities[23].idx_in_chunk;
        chunk.enable_entity(&layout, idx23, false, &mut entities);
        assert_eq!(chunk.first_enabled_idx(), 2);
        for i in 0..chunk.first_enabled_idx() {
            let e = chunk.entity_at(i);
            assert!(e == Entity::new(21, 0) || e == Entity::new(23, 0));
        }

        // re-enable e21
        let idx21 = entities[21].idx_in_chunk;
        chunk.enable_entity(&layout, idx21, true, &mut entities);
        assert_eq!(chunk.count_enabled(), 3);
        assert_eq!(chunk.first_enabled_idx(), 1);

        // idempotent
        let idx21 = entities[21].idx_in_chunk;
        chunk.enable_entity(&layout, idx21, true, &mut entities);
        assert_eq!(chunk.count_enabled(), 3);

        free_chunk(chunk, &layout, &mut alloc);
    }

    #[test]
    fn test_remove_disabled_keeps_partition_dense() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        let mut alloc = BlockAllocator::new();
        let mut chunk = make_chunk(&layout, &mut alloc);
        let mut entities = vec![EntityContainer::new(); 64];

        for id in 20..25u32 {
            let idx = chunk.add_entity(&layout, Entity::new(id, 0), 2);
            entities[id as usize].idx_in_chunk = idx;
        }
        // disable two entities
        chunk.enable_entity(&layout, entities[20].idx_in_chunk, false, &mut entities);
        chunk.enable_entity(&layout, entities[21].idx_in_chunk, false, &mut entities);
        assert_eq!(chunk.first_enabled_idx(), 2);

        // remove a disabled entity
        let idx20 = entities[20].idx_in_chunk;
        assert!(idx20 < chunk.first_enabled_idx());
        chunk.remove_entity(&layout, idx20, &mut entities, 3);

        assert_eq!(chunk.count(), 4);
        assert_eq!(chunk.first_enabled_idx(), 1);
        assert_eq!(chunk.count_enabled(), 3);
        assert_eq!(chunk.entity_at(0), Entity::new(21, 0));
        for i in chunk.first_enabled_idx()..chunk.count() {
            assert_ne!(chunk.entity_at(i), Entity::new(21, 0));
        }

        free_chunk(chunk, &layout, &mut alloc);
    }

    #[test]
    fn test_version_changed_wraparound() {
        assert!(!version_changed(5, 5));
        assert!(version_changed(6, 5));
        assert!(!version_changed(5, 6));
        // wraparound: stored just past u32::MAX
        assert!(version_changed(2, u32::MAX - 2));
    }

    #[test]
    fn test_view_mut_bumps_version() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        let mut alloc = BlockAllocator::new();
        let mut chunk = make_chunk(&layout, &mut alloc);
        let mut entities = vec![EntityContainer::new(); 64];
        let idx = chunk.add_entity(&layout, Entity::new(20, 0), 2);
        entities[20].idx_in_chunk = idx;

        let pos_idx = layout.comp_idx(ComponentKind::Generic, pos).unwrap();
        let vel_idx = layout.comp_idx(ComponentKind::Generic, vel).unwrap();
        let snapshot = 2;

        let _ = chunk.view_mut::<Position>(&layout, pos, 7);
        assert!(chunk.did_change(&layout, ComponentKind::Generic, snapshot, pos_idx));
        assert!(!chunk.did_change(&layout, ComponentKind::Generic, snapshot, vel_idx));

        // read-only views do not bump
        let _ = chunk.view::<Velocity>(&layout, vel);
        assert!(!chunk.did_change(&layout, ComponentKind::Generic, snapshot, vel_idx));

        free_chunk(chunk, &layout, &mut alloc);
    }

    #[test]
    fn test_cached_ids_match_layout() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        let mut alloc = BlockAllocator::new();
        let chunk = make_chunk(&layout, &mut alloc);
        assert_eq!(chunk.cached_ids(&layout, ComponentKind::Generic), &[pos, vel]);
        assert!(chunk.cached_ids(&layout, ComponentKind::Chunk).is_empty());
        free_chunk(chunk, &layout, &mut alloc);
    }

    #[test]
    #[should_panic(expected = "locked chunk")]
    fn test_locked_chunk_rejects_structural_change() {
        let (cache, pos, vel) = test_cache();
        let layout = ChunkLayout::compute(&cache, &[pos, vel], &[]);
        let mut alloc = BlockAllocator::new();
        let mut chunk = make_chunk(&layout, &mut alloc);
        chunk.lock();
        chunk.add_entity(&layout, Entity::new(20, 0), 2);
    }
}
