//! Read, write, and commit behaviour of single resources.

use strata_repo::{
    ExternalId, FieldKind, FieldReader, RepoError, Repository, RepositoryConfig, ResourceState,
    Rid, StreamHandle,
};
use strata_schema::{ResourceTypeSchema, TypeTag};

fn setup() -> (Repository, TypeTag) {
    let repo = Repository::new(RepositoryConfig::compact()).unwrap();
    let entity = repo
        .create_resource_type(
            &ResourceTypeSchema::new("Entity")
                .value("Health", 0, "u32")
                .value("Speed", 1, "f32")
                .sub_object("Transform", 2)
                .sub_object_set("Components", 3)
                .stream("Mesh", 4),
        )
        .unwrap();
    (repo, entity)
}

fn commit_health(repo: &Repository, rid: Rid, health: u32) -> u32 {
    let mut write = repo.write(rid).unwrap();
    write.set(0, &health).unwrap();
    write.commit().unwrap()
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[test]
fn health_scenario() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    assert_eq!(repo.version(rid).unwrap(), 0);
    assert_eq!(repo.state(rid).unwrap(), ResourceState::Empty);

    assert_eq!(commit_health(&repo, rid, 100), 1);

    let read = repo.read(rid).unwrap();
    assert_eq!(read.get::<u32>(0).unwrap(), Some(100));
    assert_eq!(repo.version(rid).unwrap(), 1);
    assert_eq!(repo.state(rid).unwrap(), ResourceState::Populated);
}

#[test]
fn every_field_kind_round_trips() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let child = repo.create_resource(entity).unwrap();
    let member = repo.create_resource(entity).unwrap();

    let mut write = repo.write(rid).unwrap();
    write.set(0, &42u32).unwrap();
    write.set(1, &2.5f32).unwrap();
    write.set_sub_object(2, child).unwrap();
    write.add_to_sub_object_set(3, &[member]).unwrap();
    write.set_stream(4, StreamHandle::new(9, 77)).unwrap();
    write.commit().unwrap();

    let read = repo.read(rid).unwrap();
    assert_eq!(read.get::<u32>(0).unwrap(), Some(42));
    assert_eq!(read.get::<f32>(1).unwrap(), Some(2.5));
    assert_eq!(read.sub_object(2).unwrap(), Some(child));
    assert_eq!(read.sub_object_set(3).unwrap(), vec![member]);
    assert_eq!(read.stream(4).unwrap(), Some(StreamHandle::new(9, 77)));
}

#[test]
fn field_metadata_is_exposed() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let read = repo.read(rid).unwrap();

    assert_eq!(read.value_count(), 5);
    assert_eq!(read.field_name(1), Some("Speed"));
    assert_eq!(read.field_index("Mesh"), Some(4));
    assert_eq!(read.field_kind(3), Some(FieldKind::SubObjectSet));
    assert_eq!(read.field_value_type(0).unwrap().name(), "u32");
    assert_eq!(read.field_name(5), None);
    assert!(!read.is_populated());
    assert!(!read.has(0).unwrap());
}

#[test]
fn raw_bytes_round_trip() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let mut write = repo.write(rid).unwrap();
    write.set_value(0, &7u32.to_ne_bytes()).unwrap();
    write.commit().unwrap();

    let read = repo.read(rid).unwrap();
    let value = read.get_value(0).unwrap().unwrap();
    assert_eq!(&*value, &7u32.to_ne_bytes()[..]);
    assert!(!value.is_inherited());
    assert!(read.has(0).unwrap());
    assert!(!read.has(1).unwrap());
    assert!(matches!(
        read.has(9),
        Err(RepoError::FieldOutOfRange { index: 9, .. })
    ));
}

// ---------------------------------------------------------------------------
// Isolation and versions
// ---------------------------------------------------------------------------

#[test]
fn read_handle_keeps_its_snapshot() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    commit_health(&repo, rid, 1);

    let before = repo.read(rid).unwrap();
    commit_health(&repo, rid, 2);

    assert_eq!(before.get::<u32>(0).unwrap(), Some(1));
    assert_eq!(repo.read(rid).unwrap().get::<u32>(0).unwrap(), Some(2));
}

#[test]
fn uncommitted_writes_are_invisible() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();

    let mut write = repo.write(rid).unwrap();
    write.set(0, &5u32).unwrap();
    assert_eq!(write.get::<u32>(0).unwrap(), Some(5));
    assert_eq!(repo.read(rid).unwrap().get::<u32>(0).unwrap(), None);

    drop(write);
    assert_eq!(repo.state(rid).unwrap(), ResourceState::Empty);
    assert_eq!(repo.version(rid).unwrap(), 0);
}

#[test]
fn versions_increase_by_one_per_commit() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    for expected in 1..=5 {
        assert_eq!(commit_health(&repo, rid, expected * 10), expected);
        assert_eq!(repo.version(rid).unwrap(), expected);
    }
}

#[test]
fn write_copies_forward_present_fields() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let mut write = repo.write(rid).unwrap();
    write.set(0, &10u32).unwrap();
    write.set(1, &1.5f32).unwrap();
    write.commit().unwrap();

    let mut write = repo.write(rid).unwrap();
    write.set(1, &3.0f32).unwrap();
    write.commit().unwrap();

    let read = repo.read(rid).unwrap();
    assert_eq!(read.get::<u32>(0).unwrap(), Some(10));
    assert_eq!(read.get::<f32>(1).unwrap(), Some(3.0));
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[test]
fn concurrent_first_commits_conflict() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();

    let mut first = repo.write(rid).unwrap();
    let mut second = repo.write(rid).unwrap();
    first.set(0, &1u32).unwrap();
    second.set(0, &2u32).unwrap();

    assert_eq!(first.commit().unwrap(), 1);
    assert_eq!(
        second.commit().unwrap_err(),
        RepoError::CommitConflict { rid, version: 1 }
    );
    assert_eq!(repo.read(rid).unwrap().get::<u32>(0).unwrap(), Some(1));
    assert_eq!(repo.version(rid).unwrap(), 1);
}

#[test]
fn stale_write_is_rejected_and_update_rebases() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    commit_health(&repo, rid, 10);

    let mut stale = repo.write(rid).unwrap();
    stale.set(0, &99u32).unwrap();

    let version = repo
        .update(rid, |write| {
            let health = write.get::<u32>(0)?.unwrap_or(0);
            write.set(0, &(health + 5))
        })
        .unwrap();
    assert_eq!(version, 2);

    assert!(matches!(
        stale.commit(),
        Err(RepoError::CommitConflict { version: 2, .. })
    ));
    assert_eq!(repo.read(rid).unwrap().get::<u32>(0).unwrap(), Some(15));
}

#[test]
fn update_propagates_edit_errors() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let err = repo.update(rid, |write| write.set(3, &1u32)).unwrap_err();
    assert!(matches!(err, RepoError::FieldKindMismatch { index: 3, .. }));
    assert_eq!(repo.version(rid).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[test]
fn wrong_sizes_are_rejected() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let mut write = repo.write(rid).unwrap();

    assert_eq!(
        write.set_value(0, &[1, 2]).unwrap_err(),
        RepoError::ValueSizeMismatch {
            rid,
            index: 0,
            expected: 4,
            actual: 2
        }
    );
    write.set(0, &3u32).unwrap();
    assert!(matches!(
        write.get::<u64>(0),
        Err(RepoError::ValueSizeMismatch { expected: 4, actual: 8, .. })
    ));
}

#[test]
fn wrong_kinds_and_indices_are_rejected() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    let mut write = repo.write(rid).unwrap();

    assert!(matches!(
        write.set(3, &1u32),
        Err(RepoError::FieldKindMismatch {
            expected: FieldKind::Value,
            found: FieldKind::SubObjectSet,
            ..
        })
    ));
    assert!(matches!(
        write.get_value(3),
        Err(RepoError::FieldKindMismatch { .. })
    ));
    assert!(matches!(
        write.sub_object_set(0),
        Err(RepoError::FieldKindMismatch { .. })
    ));
    assert!(matches!(
        write.set(9, &1u32),
        Err(RepoError::FieldOutOfRange { index: 9, count: 5, .. })
    ));
}

#[test]
fn unknown_type_and_invalid_ids_are_rejected() {
    let (repo, _) = setup();
    assert_eq!(
        repo.create_resource(TypeTag::new(42)).unwrap_err(),
        RepoError::UnknownType(TypeTag::new(42))
    );
    assert_eq!(
        repo.read(Rid::null()).unwrap_err(),
        RepoError::InvalidRid(Rid::null())
    );
    assert!(matches!(
        repo.write(Rid::from_raw(9_999)),
        Err(RepoError::InvalidRid(_))
    ));
}

#[test]
fn capacity_exhaustion_is_reported() {
    let repo = Repository::new(RepositoryConfig {
        max_pages: 1,
        ..Default::default()
    })
    .unwrap();
    let tag = repo
        .create_resource_type(&ResourceTypeSchema::new("Tiny").value("A", 0, "u8"))
        .unwrap();

    // Id 0 is reserved, leaving PAGE_SIZE - 1 usable slots.
    for _ in 1..strata_types::PAGE_SIZE {
        repo.create_resource(tag).unwrap();
    }
    assert_eq!(
        repo.create_resource(tag).unwrap_err(),
        RepoError::CapacityExhausted { max_pages: 1 }
    );
}

// ---------------------------------------------------------------------------
// Typed resources
// ---------------------------------------------------------------------------

#[test]
fn typed_resources_hold_one_value() {
    let (repo, entity) = setup();
    let typed = repo.create_typed_resource_type("u64").unwrap();
    let rid = repo.create_resource(typed).unwrap();

    assert_eq!(repo.read_typed::<u64>(rid).unwrap(), None);
    assert_eq!(repo.commit_typed(rid, &7u64).unwrap(), 1);
    assert_eq!(repo.commit_typed(rid, &8u64).unwrap(), 2);
    assert_eq!(repo.read_typed::<u64>(rid).unwrap(), Some(8));
    assert!(!repo.is_empty(rid).unwrap());

    assert!(matches!(
        repo.read_typed::<u32>(rid),
        Err(RepoError::ValueSizeMismatch { .. })
    ));

    let field_based = repo.create_resource(entity).unwrap();
    assert!(matches!(
        repo.commit_typed(field_based, &1u64),
        Err(RepoError::NotTyped { .. })
    ));

    // The superseded value waits for collection.
    assert_eq!(repo.garbage_collect().snapshots_released, 1);
}

// ---------------------------------------------------------------------------
// Maintenance operations
// ---------------------------------------------------------------------------

#[test]
fn clear_values_empties_the_resource() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    commit_health(&repo, rid, 100);
    assert!(!repo.is_empty(rid).unwrap());

    assert_eq!(repo.clear_values(rid).unwrap(), 2);
    assert!(repo.is_empty(rid).unwrap());
    assert_eq!(repo.read(rid).unwrap().get::<u32>(0).unwrap(), None);
}

#[test]
fn deactivate_resets_version() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    commit_health(&repo, rid, 1);
    assert!(repo.is_active(rid).unwrap());

    repo.deactivate(rid).unwrap();
    assert!(!repo.is_active(rid).unwrap());
    assert_eq!(repo.version(rid).unwrap(), 0);
    assert!(repo.is_alive(rid));
}

#[test]
fn shutdown_resets_the_repository() {
    let (mut repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();
    commit_health(&repo, rid, 1);
    repo.set_path("entities/one", rid).unwrap();

    repo.shutdown();
    assert_eq!(repo.resource_count(), 0);
    assert!(repo.types().is_empty());
    assert_eq!(repo.get_by_path("entities/one"), None);
    assert_eq!(
        repo.create_resource(entity).unwrap_err(),
        RepoError::UnknownType(entity)
    );

    let entity = repo
        .create_resource_type(&ResourceTypeSchema::new("Entity").value("Health", 0, "u32"))
        .unwrap();
    assert_eq!(repo.create_resource(entity).unwrap(), Rid::from_raw(1));
}

// ---------------------------------------------------------------------------
// External ids and paths
// ---------------------------------------------------------------------------

#[test]
fn external_ids_name_resources() {
    let (repo, entity) = setup();
    let id = ExternalId::new();
    let rid = repo.create_resource_with_id(entity, id).unwrap();

    assert_eq!(repo.get_by_external_id(id), Some(rid));
    assert_eq!(repo.external_id(rid).unwrap(), id);
    assert_eq!(
        repo.create_resource_with_id(entity, id).unwrap_err(),
        RepoError::ExternalIdInUse { id, rid }
    );
    assert_eq!(repo.get_or_create_by_external_id(id, Some(entity)).unwrap(), rid);

    let renamed = ExternalId::new();
    repo.set_external_id(rid, renamed).unwrap();
    assert_eq!(repo.get_by_external_id(id), None);
    assert_eq!(repo.get_by_external_id(renamed), Some(rid));
}

#[test]
fn placeholder_ids_gain_a_type_later() {
    let (repo, entity) = setup();
    let other = repo
        .create_resource_type(&ResourceTypeSchema::new("Other").value("A", 0, "u8"))
        .unwrap();
    let id = ExternalId::new();

    let rid = repo.get_or_create_by_external_id(id, None).unwrap();
    assert_eq!(repo.resource_type_of(rid).unwrap(), None);
    assert_eq!(repo.read(rid).unwrap_err(), RepoError::Untyped(rid));

    assert_eq!(repo.get_or_create_by_external_id(id, Some(entity)).unwrap(), rid);
    assert_eq!(repo.resource_type_of(rid).unwrap(), Some(entity));
    assert!(repo.read(rid).is_ok());

    assert!(matches!(
        repo.get_or_create_by_external_id(id, Some(other)),
        Err(RepoError::ExternalIdInUse { .. })
    ));
    assert_eq!(
        repo.get_or_create_by_external_id(ExternalId::nil(), None).unwrap_err(),
        RepoError::NilExternalId
    );
}

#[test]
fn paths_map_to_resources() {
    let (repo, entity) = setup();
    let rid = repo.create_resource(entity).unwrap();

    repo.set_path("assets/player", rid).unwrap();
    assert_eq!(repo.get_by_path("assets/player"), Some(rid));
    assert_eq!(repo.remove_path("assets/player"), Some(rid));
    assert_eq!(repo.get_by_path("assets/player"), None);

    assert!(repo.set_path("nowhere", Rid::from_raw(9_999)).is_err());
}
