use chunk_ecs::{ComponentKind, Entity, QueryCtx, World, ROOT_ARCHETYPE_ID};

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
fn test_add_component_builds_symmetric_edges() {
    let mut world = World::new();
    let pos = world.register_component::<Position>();

    let e = world.add_entity();
    world.add_component(e, ComponentKind::Generic, pos).unwrap();
    let a1 = world.entity_container(e).unwrap().archetype_id;

    let root = world.archetype(ROOT_ARCHETYPE_ID);
    assert_eq!(
        root.edges().find_edge_right(ComponentKind::Generic, pos),
        Some(a1)
    );
    assert_eq!(
        world
            .archetype(a1)
            .edges()
            .find_edge_left(ComponentKind::Generic, pos),
        Some(ROOT_ARCHETYPE_ID)
    );

    // edge target signature = source signature plus the component
    let a1_arch = world.archetype(a1);
    assert_eq!(a1_arch.ids(ComponentKind::Generic), &[pos]);
    assert!(a1_arch.ids(ComponentKind::Chunk).is_empty());
}

#[test]
fn test_transitions_reuse_archetypes_and_edges() {
    let mut world = World::new();
    let pos = world.register_component::<Position>();
    let vel = world.register_component::<Velocity>();

    let mut archetype_ids = Vec::new();
    for _ in 0..10 {
        let e = world.add_entity();
        world.add_component(e, ComponentKind::Generic, pos).unwrap();
        world.add_component(e, ComponentKind::Generic, vel).unwrap();
        archetype_ids.push(world.entity_container(e).unwrap().archetype_id);
    }
    // every entity took the same path to the same archetype
    assert!(archetype_ids.windows(2).all(|w| w[0] == w[1]));

    // root, {pos}, {pos,vel}; no duplicates were created
    let distinct = world.archetype_count();
    assert_eq!(distinct, 3);
}

#[test]
fn test_remove_walks_the_edge_back() {
    let mut world = World::new();
    let pos = world.register_component::<Position>();
    let vel = world.register_component::<Velocity>();

    let e = world.add_entity();
    world.add_component(e, ComponentKind::Generic, pos).unwrap();
    let with_pos = world.entity_container(e).unwrap().archetype_id;
    world.add_component(e, ComponentKind::Generic, vel).unwrap();

    // removing the component returns to the original archetype, not a copy
    world.remove_component(e, ComponentKind::Generic, vel).unwrap();
    assert_eq!(world.entity_container(e).unwrap().archetype_id, with_pos);
    assert_eq!(world.archetype_count(), 3);
}

#[test]
fn test_round_trip_preserves_component_data() {
    let mut world = World::new();
    let pos = world.register_component::<Position>();
    let vel = world.register_component::<Velocity>();

    let e = world.add_entity();
    world.add_component(e, ComponentKind::Generic, pos).unwrap();
    world.set(e, pos, Position { x: 3.5, y: -1.0 }).unwrap();

    world.add_component(e, ComponentKind::Generic, vel).unwrap();
    world.set(e, vel, Velocity { x: 0.1, y: 0.2 }).unwrap();
    assert_eq!(world.get::<Position>(e, pos), Some(&Position { x: 3.5, y: -1.0 }));

    world.remove_component(e, ComponentKind::Generic, vel).unwrap();
    assert_eq!(world.get::<Position>(e, pos), Some(&Position { x: 3.5, y: -1.0 }));
    assert_eq!(world.get::<Velocity>(e, vel), None);
}

#[test]
fn test_chunk_class_edges_are_separate() {
    let mut world = World::new();
    let pos = world.register_component::<Position>();

    let e1 = world.add_entity();
    world.add_component(e1, ComponentKind::Generic, pos).unwrap();
    let generic_arch = world.entity_container(e1).unwrap().archetype_id;

    let e2 = world.add_entity();
    world.add_component(e2, ComponentKind::Chunk, pos).unwrap();
    let chunk_arch = world.entity_container(e2).unwrap().archetype_id;

    // the same id under a different class is a different signature
    assert_ne!(generic_arch, chunk_arch);
    let root = world.archetype(ROOT_ARCHETYPE_ID);
    assert_eq!(
        root.edges().find_edge_right(ComponentKind::Generic, pos),
        Some(generic_arch)
    );
    assert_eq!(
        root.edges().find_edge_right(ComponentKind::Chunk, pos),
        Some(chunk_arch)
    );
}

#[test]
fn test_queries_see_entities_through_transitions() {
    let mut world = World::new();
    let pos = world.register_component::<Position>();
    let vel = world.register_component::<Velocity>();

    let e = world.add_entity();
    world.add_component(e, ComponentKind::Generic, pos).unwrap();

    let mut q = QueryCtx::new().with(pos).with(vel);
    world.exec_query(&mut q);
    assert!(q.matches().is_empty());

    world.add_component(e, ComponentKind::Generic, vel).unwrap();
    world.exec_query(&mut q);
    let arch = world.entity_container(e).unwrap().archetype_id;
    assert_eq!(q.matches(), &[arch]);
    assert_eq!(world.archetype(arch).entity_count(), 1);
}

#[test]
fn test_wildcard_sees_new_pair_targets() {
    let mut world = World::new();
    let likes = world.add_entity();
    let apples = world.add_entity();
    let oranges = world.add_entity();

    let e1 = world.add_entity();
    world
        .add_component(e1, ComponentKind::Generic, Entity::pair(likes, apples))
        .unwrap();

    let mut q = QueryCtx::new().with(Entity::pair(likes, chunk_ecs::ALL));
    world.exec_query(&mut q);
    assert_eq!(q.matches().len(), 1);

    // a second relationship target creates a new archetype; the wildcard
    // query picks it up incrementally
    let e2 = world.add_entity();
    world
        .add_component(e2, ComponentKind::Generic, Entity::pair(likes, oranges))
        .unwrap();
    world.exec_query(&mut q);
    assert_eq!(q.matches().len(), 2);
}
