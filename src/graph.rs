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

//! Archetype graph edges.
//!
//! Each archetype keeps two maps keyed by `(class, component id)`: the
//! add-component edge and the remove-component edge, each yielding the
//! target archetype. Edges are installed lazily, on the first observed
//! transition, and are immutable afterwards. A lookup miss means "target
//! not yet materialized" and is a signal, not an error.

use rustc_hash::FxHashMap;

use crate::archetype::ArchetypeId;
use crate::component::ComponentKind;
use crate::entity::Entity;

/// Per-archetype add/remove transition edges.
#[derive(Debug, Default)]
pub struct ArchetypeGraph {
    add_edges: FxHashMap<(ComponentKind, Entity), ArchetypeId>,
    del_edges: FxHashMap<(ComponentKind, Entity), ArchetypeId>,
}

impl ArchetypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the add-component edge for `(kind, id)`.
    pub(crate) fn set_edge_right(&mut self, kind: ComponentKind, id: Entity, target: ArchetypeId) {
        let prev = self.add_edges.insert((kind, id), target);
        debug_assert!(prev.is_none() || prev == Some(target), "edge reinstalled");
    }

    /// Install the remove-component edge for `(kind, id)`.
    pub(crate) fn set_edge_left(&mut self, kind: ComponentKind, id: Entity, target: ArchetypeId) {
        let prev = self.del_edges.insert((kind, id), target);
        debug_assert!(prev.is_none() || prev == Some(target), "edge reinstalled");
    }

    /// Target archetype after adding `(kind, id)`, if materialized.
    pub fn find_edge_right(&self, kind: ComponentKind, id: Entity) -> Option<ArchetypeId> {
        self.add_edges.get(&(kind, id)).copied()
    }

    /// Target archetype after removing `(kind, id)`, if materialized.
    pub fn find_edge_left(&self, kind: ComponentKind, id: Entity) -> Option<ArchetypeId> {
        self.del_edges.get(&(kind, id)).copied()
    }

    pub fn add_edge_count(&self) -> usize {
        self.add_edges.len()
    }

    pub fn del_edge_count(&self) -> usize {
        self.del_edges.len()
    }

    /// Iterate add edges, for diagnostics.
    pub fn add_edges(&self) -> impl Iterator<Item = (&(ComponentKind, Entity), &ArchetypeId)> {
        self.add_edges.iter()
    }

    /// Iterate remove edges, for diagnostics.
    pub fn del_edges(&self) -> impl Iterator<Item = (&(ComponentKind, Entity), &ArchetypeId)> {
        self.del_edges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_roundtrip() {
        let mut g = ArchetypeGraph::new();
        let pos = Entity::new(10, 0);

        assert_eq!(g.find_edge_right(ComponentKind::Generic, pos), None);
        g.set_edge_right(ComponentKind::Generic, pos, 3);
        assert_eq!(g.find_edge_right(ComponentKind::Generic, pos), Some(3));

        // classes are independent key spaces
        assert_eq!(g.find_edge_right(ComponentKind::Chunk, pos), None);
        assert_eq!(g.find_edge_left(ComponentKind::Generic, pos), None);
    }
}
