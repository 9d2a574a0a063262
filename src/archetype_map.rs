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

//! Component id -> archetype list index.
//!
//! Appended whenever an archetype is created. Pair ids are additionally
//! registered under their wildcard aliases so wildcard query terms have a
//! source list to iterate; the per-key list order is creation order, which
//! the query cursors rely on.

use rustc_hash::FxHashMap;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::ComponentKind;
use crate::entity::{Entity, ALL};

/// Maps every component id (and wildcard alias) to the archetypes
/// containing it, in creation order.
#[derive(Debug, Default)]
pub struct EntityToArchetypeMap {
    map: FxHashMap<Entity, Vec<ArchetypeId>>,
}

impl EntityToArchetypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly created archetype under every id it contains.
    pub fn register_archetype(&mut self, archetype: &Archetype) {
        let id = archetype.id();
        for kind in [ComponentKind::Generic, ComponentKind::Chunk] {
            for &comp in archetype.ids(kind) {
                self.push(comp, id);
                if comp.is_pair() {
                    let first = Entity::new(comp.first(), 0);
                    let second = Entity::new(comp.second(), 0);
                    self.push(Entity::pair(first, ALL), id);
                    self.push(Entity::pair(ALL, second), id);
                    self.push(Entity::pair(ALL, ALL), id);
                }
                self.push(ALL, id);
            }
        }
    }

    fn push(&mut self, key: Entity, id: ArchetypeId) {
        let list = self.map.entry(key).or_default();
        // An archetype registers all its ids at once; only the tail can be
        // a duplicate.
        if list.last() != Some(&id) {
            list.push(id);
        }
    }

    /// Archetypes containing `id`, in creation order.
    pub fn archetypes(&self, id: Entity) -> &[ArchetypeId] {
        self.map.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn key_count(&self) -> usize {
        self.map.len()
    }
}
