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

//! Chunk ECS - chunked archetype storage core
//!
//! Entities are grouped by component signature into archetypes; each
//! archetype stores its entities in fixed-size (8/16 KiB) chunks, SoA per
//! component. Declarative queries compile into a small ALL/ANY/NOT opcode
//! program and match archetypes incrementally, with wildcard pairs and
//! transitive `Is` relationships.

pub mod archetype;
pub mod archetype_map;
pub mod block;
pub mod chunk;
pub mod component;
pub mod debug;
pub mod entity;
pub mod error;
pub mod graph;
pub mod query;
pub mod utils;
pub mod vm;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, ArchetypeId, ROOT_ARCHETYPE_ID};
pub use block::{BlockAllocator, MemBlockSize};
pub use chunk::{Chunk, ChunkLayout, MAX_CHUNK_ENTITIES};
pub use component::{ComponentCache, ComponentDesc, ComponentKind};
pub use entity::{Entity, EntityContainer, ALL, ENTITY_BAD, IS};
pub use error::{EcsError, Result};
pub use query::{QueryCtx, QueryState, Term, TermOp};
pub use vm::VirtualMachine;
pub use world::World;
