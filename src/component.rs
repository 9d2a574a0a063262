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

//! Component descriptors and the descriptor cache.
//!
//! A component is an entity that has been given descriptor metadata: size,
//! alignment and optional ctor/dtor glue. Components without a descriptor
//! (plain entities and pairs of them) act as zero-sized tags.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::entity::Entity;

/// Component storage class.
///
/// `Generic` components store one value per entity; `Chunk` components store
/// one value per chunk, shared by every entity in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Generic = 0,
    Chunk = 1,
}

/// Number of component storage classes.
pub const COMPONENT_KIND_COUNT: usize = 2;

impl ComponentKind {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Ctor/dtor glue invoked over `(ptr, count)` contiguous elements.
pub type ComponentFn = unsafe fn(*mut u8, usize);

/// Descriptor metadata for one component.
#[derive(Clone)]
pub struct ComponentDesc {
    /// The component's entity handle.
    pub entity: Entity,
    /// Diagnostic name.
    pub name: &'static str,
    /// Element size in bytes; 0 for tags.
    pub size: u32,
    /// Element alignment; always a power of two, 1 for tags.
    pub alig: u32,
    /// Elements need the dtor run on removal.
    pub destructible: bool,
    /// Optional in-place constructor.
    pub ctor: Option<ComponentFn>,
    /// Optional in-place destructor.
    pub dtor: Option<ComponentFn>,
}

impl ComponentDesc {
    /// Build a descriptor for a Rust type. Ctor glue default-constructs
    /// elements in place; drop glue is synthesized for types that need it.
    pub fn of<T: Default + 'static>(entity: Entity) -> Self {
        let ctor: ComponentFn = |ptr, count| unsafe {
            for i in 0..count {
                std::ptr::write((ptr as *mut T).add(i), T::default());
            }
        };
        let dtor: Option<ComponentFn> = if std::mem::needs_drop::<T>() {
            Some(|ptr, count| unsafe {
                for i in 0..count {
                    std::ptr::drop_in_place((ptr as *mut T).add(i));
                }
            })
        } else {
            None
        };

        ComponentDesc {
            entity,
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>() as u32,
            alig: std::mem::align_of::<T>().max(1) as u32,
            destructible: std::mem::needs_drop::<T>(),
            ctor: Some(ctor),
            dtor,
        }
    }

    /// Zero-sized tag descriptor.
    pub fn tag(entity: Entity, name: &'static str) -> Self {
        ComponentDesc {
            entity,
            name,
            size: 0,
            alig: 1,
            destructible: false,
            ctor: None,
            dtor: None,
        }
    }
}

impl std::fmt::Debug for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDesc")
            .field("entity", &self.entity)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("alig", &self.alig)
            .field("destructible", &self.destructible)
            .finish()
    }
}

/// World-owned descriptor cache: component id -> descriptor, plus a Rust
/// `TypeId` index for typed registration.
#[derive(Default)]
pub struct ComponentCache {
    descs: FxHashMap<u32, ComponentDesc>,
    by_type: FxHashMap<TypeId, Entity>,
}

impl ComponentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor keyed by its entity's id.
    pub fn insert(&mut self, desc: ComponentDesc) {
        debug_assert!(!desc.entity.is_pair());
        self.descs.insert(desc.entity.id(), desc);
    }

    /// Record the `TypeId` of a typed component registration.
    pub fn bind_type<T: 'static>(&mut self, entity: Entity) {
        self.by_type.insert(TypeId::of::<T>(), entity);
    }

    /// Component entity previously registered for `T`, if any.
    pub fn entity_of<T: 'static>(&self) -> Option<Entity> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Descriptor for a component id.
    ///
    /// Pairs resolve through `first`, then `second`; a pair with data on
    /// neither side (and any unregistered id) is a zero-sized tag and
    /// returns `None`.
    pub fn desc(&self, id: Entity) -> Option<&ComponentDesc> {
        if id.is_pair() {
            self.descs
                .get(&id.first())
                .or_else(|| self.descs.get(&id.second()))
        } else {
            self.descs.get(&id.id())
        }
    }

    /// Element size of a component id; 0 for tags.
    pub fn size_of(&self, id: Entity) -> u32 {
        self.desc(id).map_or(0, |d| d.size)
    }

    /// Element alignment of a component id; 1 for tags.
    pub fn alig_of(&self, id: Entity) -> u32 {
        self.desc(id).map_or(1, |d| d.alig)
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }
}
