use std::fmt::Write;

use crate::archetype::Archetype;
use crate::component::ComponentKind;
use crate::world::World;

/// World inspector for debugging
pub struct WorldInspector;

impl WorldInspector {
    /// Get archetype summaries
    pub fn archetype_summary(world: &World) -> Vec<ArchetypeInfo> {
        world.archetypes().iter().map(ArchetypeInfo::of).collect()
    }

    /// Format a summary of archetypes, chunks and graph edges.
    pub fn diag(world: &World) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== World Summary ===");
        let _ = writeln!(out, "Archetypes: {}", world.archetype_count());
        let _ = writeln!(out, "Version: {}", world.version());

        for info in Self::archetype_summary(world) {
            let _ = writeln!(
                out,
                "Archetype {}: {} entities, {} chunks (cap {}, {} B), generic {:?}, chunk {:?}",
                info.id,
                info.entity_count,
                info.chunk_count,
                info.capacity,
                info.data_bytes,
                info.ids_generic,
                info.ids_chunk,
            );
            for c in &info.chunks {
                let _ = writeln!(
                    out,
                    "  chunk {}: {}/{} entities, {} enabled, lifespan {}",
                    c.index, c.count, c.capacity, c.count_enabled, c.lifespan
                );
            }
        }

        let _ = writeln!(out, "=== Graph Edges ===");
        for arch in world.archetypes() {
            for (&(kind, id), &target) in arch.edges().add_edges() {
                let _ = writeln!(out, "{} --add({:?}/{:?})--> {}", arch.id(), kind, id, target);
            }
            for (&(kind, id), &target) in arch.edges().del_edges() {
                let _ = writeln!(out, "{} --del({:?}/{:?})--> {}", arch.id(), kind, id, target);
            }
        }
        out
    }

    /// Print the diag summary to stdout.
    pub fn print_summary(world: &World) {
        println!("{}", Self::diag(world));
    }
}

/// Archetype information for debugging
#[derive(Clone, Debug)]
pub struct ArchetypeInfo {
    pub id: u32,
    pub ids_generic: Vec<String>,
    pub ids_chunk: Vec<String>,
    pub entity_count: usize,
    pub chunk_count: usize,
    pub capacity: u16,
    pub data_bytes: u32,
    pub chunks: Vec<ChunkInfo>,
}

impl ArchetypeInfo {
    fn of(arch: &Archetype) -> Self {
        ArchetypeInfo {
            id: arch.id(),
            ids_generic: arch
                .ids(ComponentKind::Generic)
                .iter()
                .map(|id| format!("{id:?}"))
                .collect(),
            ids_chunk: arch
                .ids(ComponentKind::Chunk)
                .iter()
                .map(|id| format!("{id:?}"))
                .collect(),
            entity_count: arch.entity_count(),
            chunk_count: arch.chunks().len(),
            capacity: arch.layout().capacity(),
            data_bytes: arch.layout().data_bytes(),
            chunks: arch
                .chunks()
                .iter()
                .map(|c| ChunkInfo {
                    index: c.index(),
                    count: c.count(),
                    count_enabled: c.count_enabled(),
                    capacity: c.capacity(),
                    lifespan: c.lifespan(),
                })
                .collect(),
        }
    }
}

/// Chunk information for debugging
#[derive(Clone, Debug)]
pub struct ChunkInfo {
    pub index: u32,
    pub count: u16,
    pub count_enabled: u16,
    pub capacity: u16,
    pub lifespan: u8,
}
