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

//! World: entity table, archetype registry and structural operations.
//!
//! A structural change follows (or lazily installs) a graph edge to find
//! the target archetype, asks it for a chunk with free space, and moves the
//! entity's data between chunks. The world also drives chunk GC and
//! defragmentation, and is the lookup surface the query VM executes
//! against.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{lookup_hash, Archetype, ArchetypeId, ROOT_ARCHETYPE_ID};
use crate::block::BlockAllocator;
use crate::component::{ComponentCache, ComponentDesc, ComponentKind};
use crate::entity::{Entity, EntityContainer, ARCHETYPE_ID_BAD, ENTITY_BAD, FIRST_USER_ID, IS, MAX_GEN};
use crate::error::{EcsError, Result};
use crate::query::QueryCtx;
use crate::vm::VirtualMachine;
use crate::archetype_map::EntityToArchetypeMap;

/// Central storage container.
pub struct World {
    /// Dense entity table indexed by entity id.
    containers: Vec<EntityContainer>,
    /// Recycled entity ids.
    free: Vec<u32>,
    cache: ComponentCache,
    allocator: BlockAllocator,
    archetypes: Vec<Archetype>,
    /// Signature digest -> archetype candidates. The digest is an
    /// accelerator; identity is resolved by comparing id lists.
    lookup: AHashMap<u64, SmallVec<[ArchetypeId; 1]>>,
    entity_map: EntityToArchetypeMap,
    version: u32,
    /// Scratch for chunk removal indices.
    chunks_to_remove: Vec<u32>,
}

impl World {
    pub fn new() -> Self {
        let mut world = World {
            containers: vec![EntityContainer::new(); FIRST_USER_ID as usize],
            free: Vec::new(),
            cache: ComponentCache::new(),
            allocator: BlockAllocator::new(),
            archetypes: Vec::with_capacity(64),
            lookup: AHashMap::with_capacity(64),
            entity_map: EntityToArchetypeMap::new(),
            version: 1,
            chunks_to_remove: Vec::new(),
        };
        // Bootstrap the root archetype (empty signature); always id 0.
        let root = world.foc_archetype(&[], &[]);
        debug_assert_eq!(root, ROOT_ARCHETYPE_ID);
        world
    }

    // ---- versioning ----

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn version_mut(&mut self) -> &mut u32 {
        &mut self.version
    }

    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
        if self.version == 0 {
            self.version = 1;
        }
    }

    // ---- components ----

    /// Register a Rust type as a component. The component is itself an
    /// entity; its descriptor is derived from the type.
    pub fn register_component<T: Default + 'static>(&mut self) -> Entity {
        if let Some(e) = self.cache.entity_of::<T>() {
            return e;
        }
        let e = self.add_entity();
        self.cache.insert(ComponentDesc::of::<T>(e));
        self.cache.bind_type::<T>(e);
        e
    }

    /// Register an entity as a raw-described component.
    pub fn register_component_raw(&mut self, desc: ComponentDesc) {
        self.cache.insert(desc);
    }

    pub fn component_cache(&self) -> &ComponentCache {
        &self.cache
    }

    // ---- entities ----

    /// Create an entity in the root archetype.
    pub fn add_entity(&mut self) -> Entity {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = self.containers.len() as u32;
                assert!(id != u32::MAX, "entity id space exhausted");
                self.containers.push(EntityContainer::new());
                id
            }
        };
        let gen = self.containers[id as usize].gen;
        let e = Entity::new(id, gen);

        self.bump_version();
        let version = self.version;
        let arch = &mut self.archetypes[ROOT_ARCHETYPE_ID as usize];
        let ci = arch.foc_free_chunk(&mut self.allocator, &self.cache, version);
        let idx = arch.add_entity_to_chunk(ci, e, version);

        let rec = &mut self.containers[id as usize];
        rec.archetype_id = ROOT_ARCHETYPE_ID;
        rec.chunk_idx = ci;
        rec.idx_in_chunk = idx;
        rec.disabled = false;
        rec.alive = true;
        e
    }

    /// Delete an entity: destruct its components, free its chunk slot and
    /// recycle the id with a bumped generation.
    pub fn del_entity(&mut self, e: Entity) -> Result<()> {
        self.container_checked(e)?;
        let rec = self.containers[e.id() as usize];

        // Destruct the entity's generic components in place; the chunk
        // swap-remove below only moves bytes.
        let arch = &self.archetypes[rec.archetype_id as usize];
        let layout = arch.layout();
        for (i, &id) in layout.ids(ComponentKind::Generic).iter().enumerate() {
            if layout.comp_size(ComponentKind::Generic, i) == 0 {
                continue;
            }
            if let Some(dtor) = self.cache.desc(id).and_then(|d| d.dtor) {
                let size = layout.comp_size(ComponentKind::Generic, i) as usize;
                let base = arch.chunk(rec.chunk_idx).comp_ptr(layout, ComponentKind::Generic, i);
                // SAFETY: the slot holds an initialized element.
                unsafe { dtor(base.add(size * rec.idx_in_chunk as usize), 1) };
            }
        }

        self.bump_version();
        let version = self.version;
        self.archetypes[rec.archetype_id as usize].remove_entity_from_chunk(
            rec.chunk_idx,
            rec.idx_in_chunk,
            &mut self.containers,
            version,
        );

        let rec = &mut self.containers[e.id() as usize];
        rec.archetype_id = ARCHETYPE_ID_BAD;
        rec.alive = false;
        rec.disabled = false;
        rec.gen = (rec.gen + 1) & MAX_GEN;
        self.free.push(e.id());
        Ok(())
    }

    pub fn is_alive(&self, e: Entity) -> bool {
        self.container_checked(e).is_ok()
    }

    /// Entity handle currently occupying an id slot, [`ENTITY_BAD`] for an
    /// id the world has never issued. Pair halves carry ids only; the
    /// query VM resolves them back to handles through this before
    /// traversing `Is` relations.
    pub fn entity_from_id(&self, id: u32) -> Entity {
        match self.containers.get(id as usize) {
            Some(rec) => Entity::new(id, rec.gen),
            None => ENTITY_BAD,
        }
    }

    pub fn entity_container(&self, e: Entity) -> Option<&EntityContainer> {
        self.container_checked(e).ok()
    }

    fn container_checked(&self, e: Entity) -> Result<&EntityContainer> {
        if e.is_pair() {
            return Err(EcsError::InvalidEntity);
        }
        let rec = self
            .containers
            .get(e.id() as usize)
            .ok_or(EcsError::EntityNotFound)?;
        if !rec.alive || rec.gen != e.gen() {
            return Err(EcsError::EntityNotFound);
        }
        Ok(rec)
    }

    // ---- archetypes ----

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id as usize]
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// The archetype an entity currently lives in.
    pub fn entity_archetype(&self, e: Entity) -> Option<&Archetype> {
        let rec = self.container_checked(e).ok()?;
        if rec.archetype_id == ARCHETYPE_ID_BAD {
            return None;
        }
        Some(&self.archetypes[rec.archetype_id as usize])
    }

    pub fn entity_map(&self) -> &EntityToArchetypeMap {
        &self.entity_map
    }

    /// Find or create the archetype for a signature. Id lists must be
    /// sorted and deduplicated.
    fn foc_archetype(&mut self, ids_generic: &[Entity], ids_chunk: &[Entity]) -> ArchetypeId {
        let hash = lookup_hash(ids_generic, ids_chunk);
        if let Some(bucket) = self.lookup.get(&hash) {
            for &aid in bucket {
                if self.archetypes[aid as usize].cmp_comp_ids(ids_generic, ids_chunk) {
                    return aid;
                }
            }
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!(
            "world.create_archetype",
            generic = ids_generic.len(),
            chunk = ids_chunk.len()
        )
        .entered();

        assert!(self.archetypes.len() < u32::MAX as usize, "archetype count overflow");
        let id = self.archetypes.len() as ArchetypeId;
        let arch = Archetype::new(id, &self.cache, ids_generic, ids_chunk);
        self.entity_map.register_archetype(&arch);
        self.archetypes.push(arch);
        self.lookup.entry(hash).or_default().push(id);
        id
    }

    // ---- structural changes ----

    /// Add a component to an entity, relocating it along the archetype
    /// graph's add edge (installed lazily on first transition).
    pub fn add_component(&mut self, e: Entity, kind: ComponentKind, comp: Entity) -> Result<()> {
        let rec = *self.container_checked(e)?;
        let src = rec.archetype_id;
        if self.archetypes[src as usize].has(kind, comp) {
            return Err(EcsError::ComponentAlreadyPresent);
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!("world.add_component", entity = e.id()).entered();

        let dst = match self.archetypes[src as usize].edges().find_edge_right(kind, comp) {
            Some(t) => t,
            None => {
                let (ids_g, ids_c) = self.signature_with(src, kind, comp);
                let t = self.foc_archetype(&ids_g, &ids_c);
                if t != src {
                    let (a, b) = two_archetypes(&mut self.archetypes, src, t);
                    a.build_graph_edges(b, kind, comp);
                }
                t
            }
        };

        self.bump_version();
        self.move_entity(e, dst);

        // Construct the new component's element for this entity.
        if kind == ComponentKind::Generic {
            let rec = self.containers[e.id() as usize];
            let arch = &self.archetypes[dst as usize];
            let layout = arch.layout();
            if let Some(i) = layout.comp_idx(kind, comp) {
                let size = layout.comp_size(kind, i) as usize;
                if size > 0 {
                    if let Some(ctor) = self.cache.desc(comp).and_then(|d| d.ctor) {
                        let base = arch.chunk(rec.chunk_idx).comp_ptr(layout, kind, i);
                        // SAFETY: freshly vacated, aligned slot.
                        unsafe { ctor(base.add(size * rec.idx_in_chunk as usize), 1) };
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove a component from an entity, relocating it along the remove
    /// edge.
    pub fn remove_component(&mut self, e: Entity, kind: ComponentKind, comp: Entity) -> Result<()> {
        let rec = *self.container_checked(e)?;
        let src = rec.archetype_id;
        if !self.archetypes[src as usize].has(kind, comp) {
            return Err(EcsError::ComponentNotFound);
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!("world.remove_component", entity = e.id()).entered();

        // Destruct the departing element before the byte moves.
        {
            let arch = &self.archetypes[src as usize];
            let layout = arch.layout();
            if kind == ComponentKind::Generic {
                if let Some(i) = layout.comp_idx(kind, comp) {
                    let size = layout.comp_size(kind, i) as usize;
                    if size > 0 {
                        if let Some(dtor) = self.cache.desc(comp).and_then(|d| d.dtor) {
                            let base = arch.chunk(rec.chunk_idx).comp_ptr(layout, kind, i);
                            // SAFETY: the slot holds an initialized element.
                            unsafe { dtor(base.add(size * rec.idx_in_chunk as usize), 1) };
                        }
                    }
                }
            }
        }

        let dst = match self.archetypes[src as usize].edges().find_edge_left(kind, comp) {
            Some(t) => t,
            None => {
                let (ids_g, ids_c) = self.signature_without(src, kind, comp);
                let t = self.foc_archetype(&ids_g, &ids_c);
                if t != src {
                    let (a, b) = two_archetypes(&mut self.archetypes, t, src);
                    a.build_graph_edges(b, kind, comp);
                }
                t
            }
        };

        self.bump_version();
        self.move_entity(e, dst);
        Ok(())
    }

    /// Park or unpark an entity in its chunk's disabled partition. Not a
    /// structural change: versions are untouched.
    pub fn enable_entity(&mut self, e: Entity, enable: bool) -> Result<()> {
        let rec = *self.container_checked(e)?;
        if rec.disabled == !enable {
            return Ok(());
        }
        let idx = self.archetypes[rec.archetype_id as usize].enable_entity_in_chunk(
            rec.chunk_idx,
            rec.idx_in_chunk,
            enable,
            &mut self.containers,
        );
        let rec = &mut self.containers[e.id() as usize];
        rec.idx_in_chunk = idx;
        rec.disabled = !enable;
        Ok(())
    }

    pub fn has_component(&self, e: Entity, comp: Entity) -> bool {
        self.entity_archetype(e).is_some_and(|a| a.has_id(comp))
    }

    /// Declare `sub` a subtype of `base` (`sub Is base`).
    pub fn add_is_relation(&mut self, sub: Entity, base: Entity) -> Result<()> {
        self.add_component(sub, ComponentKind::Generic, Entity::pair(IS, base))
    }

    // ---- component data access ----

    /// Read an entity's component value.
    pub fn get<T: 'static>(&self, e: Entity, comp: Entity) -> Option<&T> {
        let rec = self.container_checked(e).ok()?;
        let arch = &self.archetypes[rec.archetype_id as usize];
        arch.layout().comp_idx(ComponentKind::Generic, comp)?;
        let slice = arch.view_in_chunk::<T>(rec.chunk_idx, comp);
        slice.get(rec.idx_in_chunk as usize)
    }

    /// Write an entity's component value. Bumps the component's version.
    pub fn set<T: 'static>(&mut self, e: Entity, comp: Entity, value: T) -> Result<()> {
        let rec = *self.container_checked(e)?;
        let arch = &mut self.archetypes[rec.archetype_id as usize];
        if arch.layout().comp_idx(ComponentKind::Generic, comp).is_none() {
            return Err(EcsError::ComponentNotFound);
        }
        let version = self.version;
        let slice = arch.view_mut_in_chunk::<T>(rec.chunk_idx, comp, version);
        slice[rec.idx_in_chunk as usize] = value;
        Ok(())
    }

    // ---- relations ----

    /// Walk the transitive closure of the `Is` relation downward from
    /// `target`, invoking `pred` for every subtype entity; stops and
    /// returns true on the first `pred` hit.
    pub fn relations_trav_if(
        &self,
        target: Entity,
        pred: &mut dyn FnMut(Entity) -> bool,
    ) -> bool {
        let mut stack: SmallVec<[u32; 8]> = SmallVec::new();
        let mut seen: AHashSet<u32> = AHashSet::new();
        stack.push(target.id());
        seen.insert(target.id());

        while let Some(t) = stack.pop() {
            let key = Entity::pair(IS, Entity::new(t, 0));
            for &aid in self.entity_map.archetypes(key) {
                let arch = &self.archetypes[aid as usize];
                if !arch.has_id(key) {
                    // registered under a wildcard alias only
                    continue;
                }
                for chunk in arch.chunks() {
                    for &e in chunk.entities() {
                        if pred(e) {
                            return true;
                        }
                        if seen.insert(e.id()) {
                            stack.push(e.id());
                        }
                    }
                }
            }
        }
        false
    }

    // ---- queries ----

    /// Compile (if needed) and execute a query against this world.
    pub fn exec_query(&self, q: &mut QueryCtx) {
        VirtualMachine::exec(self, q);
    }

    // ---- maintenance ----

    /// Maintenance tick: bumps the world version and runs the chunk
    /// lifespan sweep, reclaiming chunks whose countdown elapsed.
    pub fn update(&mut self) {
        self.bump_version();
        let mut to_remove = std::mem::take(&mut self.chunks_to_remove);
        for arch in &mut self.archetypes {
            to_remove.clear();
            arch.update_chunk_gc(&mut to_remove);
            // Descending order keeps swap-back indices valid.
            to_remove.sort_unstable_by(|a, b| b.cmp(a));
            for &ci in &to_remove {
                arch.remove_chunk(&mut self.allocator, ci, &mut self.containers, &self.cache);
            }
        }
        to_remove.clear();
        self.chunks_to_remove = to_remove;
    }

    /// Budgeted defragmentation across all archetypes. Emptied chunks are
    /// reclaimed immediately. Returns the number of entity moves.
    pub fn defrag(&mut self, max_entities: u32) -> u32 {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.defrag", budget = max_entities).entered();

        let mut budget = max_entities;
        let mut moved_total = 0;
        let mut to_remove = std::mem::take(&mut self.chunks_to_remove);
        for arch in &mut self.archetypes {
            if budget == 0 {
                break;
            }
            to_remove.clear();
            let moved = arch.defrag(budget, &mut to_remove, &mut self.containers);
            budget -= moved;
            moved_total += moved;
            to_remove.sort_unstable_by(|a, b| b.cmp(a));
            for &ci in &to_remove {
                arch.remove_chunk(&mut self.allocator, ci, &mut self.containers, &self.cache);
            }
        }
        to_remove.clear();
        self.chunks_to_remove = to_remove;
        moved_total
    }

    pub fn block_allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    // ---- helpers ----

    /// Source signature plus one component, sorted.
    fn signature_with(
        &self,
        src: ArchetypeId,
        kind: ComponentKind,
        comp: Entity,
    ) -> (SmallVec<[Entity; 8]>, SmallVec<[Entity; 8]>) {
        let arch = &self.archetypes[src as usize];
        let mut g: SmallVec<[Entity; 8]> = SmallVec::from_slice(arch.ids(ComponentKind::Generic));
        let mut c: SmallVec<[Entity; 8]> = SmallVec::from_slice(arch.ids(ComponentKind::Chunk));
        let list = if kind == ComponentKind::Generic { &mut g } else { &mut c };
        let pos = list.binary_search(&comp).unwrap_err();
        list.insert(pos, comp);
        (g, c)
    }

    /// Source signature minus one component, sorted.
    fn signature_without(
        &self,
        src: ArchetypeId,
        kind: ComponentKind,
        comp: Entity,
    ) -> (SmallVec<[Entity; 8]>, SmallVec<[Entity; 8]>) {
        let arch = &self.archetypes[src as usize];
        let mut g: SmallVec<[Entity; 8]> = SmallVec::from_slice(arch.ids(ComponentKind::Generic));
        let mut c: SmallVec<[Entity; 8]> = SmallVec::from_slice(arch.ids(ComponentKind::Chunk));
        let list = if kind == ComponentKind::Generic { &mut g } else { &mut c };
        let pos = list.binary_search(&comp).expect("component not in signature");
        list.remove(pos);
        (g, c)
    }

    /// Relocate an entity between archetypes, copying the components both
    /// signatures share.
    fn move_entity(&mut self, e: Entity, dst: ArchetypeId) {
        let rec = self.containers[e.id() as usize];
        let src = rec.archetype_id;
        if src == dst {
            return;
        }
        let version = self.version;

        let (src_arch, dst_arch) = two_archetypes(&mut self.archetypes, src, dst);
        let dst_ci = dst_arch.foc_free_chunk(&mut self.allocator, &self.cache, version);
        let dst_idx = dst_arch.add_entity_to_chunk(dst_ci, e, version);

        // Copy shared generic components byte-wise; ctor/dtor glue never
        // runs for a relocation.
        let src_layout = src_arch.layout();
        let dst_layout = dst_arch.layout();
        let src_chunk = src_arch.chunk(rec.chunk_idx);
        let dst_chunk = dst_arch.chunk(dst_ci);
        for (di, &id) in dst_layout.ids(ComponentKind::Generic).iter().enumerate() {
            let size = dst_layout.comp_size(ComponentKind::Generic, di) as usize;
            if size == 0 {
                continue;
            }
            if let Some(si) = src_layout.comp_idx(ComponentKind::Generic, id) {
                // SAFETY: distinct chunks; both slots are sized and aligned
                // per their layouts.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        src_chunk
                            .comp_ptr(src_layout, ComponentKind::Generic, si)
                            .add(size * rec.idx_in_chunk as usize),
                        dst_chunk
                            .comp_ptr(dst_layout, ComponentKind::Generic, di)
                            .add(size * dst_idx as usize),
                        size,
                    );
                }
            }
        }

        src_arch.remove_entity_from_chunk(
            rec.chunk_idx,
            rec.idx_in_chunk,
            &mut self.containers,
            version,
        );

        let new_rec = &mut self.containers[e.id() as usize];
        new_rec.archetype_id = dst;
        new_rec.chunk_idx = dst_ci;
        new_rec.idx_in_chunk = dst_idx;

        if rec.disabled {
            let (_, dst_arch) = two_archetypes(&mut self.archetypes, src, dst);
            let idx = dst_arch.enable_entity_in_chunk(dst_ci, dst_idx, false, &mut self.containers);
            self.containers[e.id() as usize].idx_in_chunk = idx;
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        for arch in &mut self.archetypes {
            arch.teardown(&mut self.allocator, &self.cache);
        }
    }
}

/// Disjoint mutable borrows of two archetypes.
fn two_archetypes(
    archetypes: &mut [Archetype],
    a: ArchetypeId,
    b: ArchetypeId,
) -> (&mut Archetype, &mut Archetype) {
    assert_ne!(a, b);
    let (a, b) = (a as usize, b as usize);
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_entity_lifecycle_and_generation() {
        let mut world = World::new();
        let e = world.add_entity();
        assert!(world.is_alive(e));
        assert_eq!(e.id(), FIRST_USER_ID);

        world.del_entity(e).unwrap();
        assert!(!world.is_alive(e));
        assert_eq!(world.del_entity(e), Err(EcsError::EntityNotFound));

        // slot is recycled with a bumped generation
        let e2 = world.add_entity();
        assert_eq!(e2.id(), e.id());
        assert_eq!(e2.gen(), e.gen() + 1);
        assert!(world.is_alive(e2));
        assert!(!world.is_alive(e));
    }

    #[test]
    fn test_entity_from_id_reconstruction() {
        let mut world = World::new();
        let e = world.add_entity();
        assert_eq!(world.entity_from_id(e.id()), e);

        // the slot's current occupant carries the bumped generation
        world.del_entity(e).unwrap();
        let e2 = world.add_entity();
        assert_eq!(e2.id(), e.id());
        assert_eq!(world.entity_from_id(e.id()), e2);
        assert_ne!(world.entity_from_id(e.id()), e);

        // never-issued ids resolve to the invalid handle
        assert_eq!(world.entity_from_id(100_000), ENTITY_BAD);
    }

    #[test]
    fn test_add_component_moves_entity() {
        let mut world = World::new();
        let pos = world.register_component::<Position>();
        let e = world.add_entity();

        assert_eq!(world.entity_archetype(e).unwrap().id(), ROOT_ARCHETYPE_ID);
        world.add_component(e, ComponentKind::Generic, pos).unwrap();

        let arch = world.entity_archetype(e).unwrap();
        assert!(arch.has(ComponentKind::Generic, pos));
        assert_eq!(arch.entity_count(), 1);

        // value round-trip
        world.set(e, pos, Position { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(world.get::<Position>(e, pos), Some(&Position { x: 1.0, y: 2.0 }));

        // duplicate add is rejected
        assert_eq!(
            world.add_component(e, ComponentKind::Generic, pos),
            Err(EcsError::ComponentAlreadyPresent)
        );
    }

    #[test]
    fn test_remove_component_preserves_others() {
        let mut world = World::new();
        let pos = world.register_component::<Position>();
        let vel = world.register_component::<Velocity>();
        let e = world.add_entity();
        world.add_component(e, ComponentKind::Generic, pos).unwrap();
        world.add_component(e, ComponentKind::Generic, vel).unwrap();
        world.set(e, pos, Position { x: 5.0, y: 6.0 }).unwrap();

        world.remove_component(e, ComponentKind::Generic, vel).unwrap();
        assert!(world.has_component(e, pos));
        assert!(!world.has_component(e, vel));
        assert_eq!(world.get::<Position>(e, pos), Some(&Position { x: 5.0, y: 6.0 }));

        assert_eq!(
            world.remove_component(e, ComponentKind::Generic, vel),
            Err(EcsError::ComponentNotFound)
        );
    }

    #[test]
    fn test_droppable_components_survive_moves() {
        let mut world = World::new();
        let name = world.register_component::<String>();
        let pos = world.register_component::<Position>();
        let e = world.add_entity();
        world.add_component(e, ComponentKind::Generic, name).unwrap();
        world.set(e, name, String::from("hero")).unwrap();

        // relocation to another archetype carries the string bytes
        world.add_component(e, ComponentKind::Generic, pos).unwrap();
        assert_eq!(world.get::<String>(e, name).unwrap(), "hero");

        // removal runs the dtor; deletion and world drop must not
        // double-free
        world.remove_component(e, ComponentKind::Generic, name).unwrap();
        world.del_entity(e).unwrap();
    }

    #[test]
    fn test_enable_disable_roundtrip() {
        let mut world = World::new();
        let pos = world.register_component::<Position>();
        let a = world.add_entity();
        let b = world.add_entity();
        world.add_component(a, ComponentKind::Generic, pos).unwrap();
        world.add_component(b, ComponentKind::Generic, pos).unwrap();
        world.set(a, pos, Position { x: 1.0, y: 0.0 }).unwrap();
        world.set(b, pos, Position { x: 2.0, y: 0.0 }).unwrap();

        world.enable_entity(a, false).unwrap();
        let rec = world.entity_container(a).unwrap();
        assert!(rec.disabled);
        let arch = world.entity_archetype(a).unwrap();
        assert_eq!(arch.chunk(0).count_enabled(), 1);
        assert_eq!(arch.chunk(0).first_enabled_idx(), 1);

        // data survives the partition swap
        assert_eq!(world.get::<Position>(a, pos), Some(&Position { x: 1.0, y: 0.0 }));
        assert_eq!(world.get::<Position>(b, pos), Some(&Position { x: 2.0, y: 0.0 }));

        world.enable_entity(a, true).unwrap();
        assert!(!world.entity_container(a).unwrap().disabled);
        assert_eq!(world.entity_archetype(a).unwrap().chunk(0).count_enabled(), 2);
    }

    #[test]
    fn test_graph_edges_installed_lazily() {
        let mut world = World::new();
        let pos = world.register_component::<Position>();
        let e = world.add_entity();

        let root = world.archetype(ROOT_ARCHETYPE_ID);
        assert_eq!(root.edges().find_edge_right(ComponentKind::Generic, pos), None);

        world.add_component(e, ComponentKind::Generic, pos).unwrap();
        let dst = world.entity_container(e).unwrap().archetype_id;

        let root = world.archetype(ROOT_ARCHETYPE_ID);
        assert_eq!(
            root.edges().find_edge_right(ComponentKind::Generic, pos),
            Some(dst)
        );
        assert_eq!(
            world.archetype(dst).edges().find_edge_left(ComponentKind::Generic, pos),
            Some(ROOT_ARCHETYPE_ID)
        );
    }

    #[test]
    fn test_update_reclaims_empty_chunks() {
        let mut world = World::new();
        let pos = world.register_component::<Position>();
        let e = world.add_entity();
        world.add_component(e, ComponentKind::Generic, pos).unwrap();
        let arch_id = world.entity_container(e).unwrap().archetype_id;
        assert_eq!(world.archetype(arch_id).chunks().len(), 1);

        world.del_entity(e).unwrap();
        // arm + tick down + reclaim
        for _ in 0..=crate::chunk::MAX_CHUNK_LIFESPAN {
            world.update();
        }
        assert!(world.archetype(arch_id).chunks().is_empty());
    }
}
