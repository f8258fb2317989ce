//! Parent links, ancestor versions, destruction, and reclamation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_repo::{
    FieldReader, Owner, RepoError, Repository, RepositoryConfig, ResourceState, Rid,
};
use strata_schema::{ResourceTypeSchema, TypeTag, ValueType};

fn setup() -> (Repository, TypeTag) {
    setup_with(RepositoryConfig::compact())
}

fn setup_with(config: RepositoryConfig) -> (Repository, TypeTag) {
    let repo = Repository::new(config).unwrap();
    let node = repo
        .create_resource_type(
            &ResourceTypeSchema::new("Node")
                .value("Health", 0, "u32")
                .sub_object("Child", 1)
                .sub_object_set("Members", 2),
        )
        .unwrap();
    (repo, node)
}

fn adopt(repo: &Repository, owner: Rid, child: Rid) {
    let mut write = repo.write(owner).unwrap();
    write.set_sub_object(1, child).unwrap();
    write.commit().unwrap();
}

fn add_members(repo: &Repository, owner: Rid, members: &[Rid]) {
    let mut write = repo.write(owner).unwrap();
    write.add_to_sub_object_set(2, members).unwrap();
    write.commit().unwrap();
}

/// A four-byte value that counts destructions.
struct Tracked {
    destructs: Arc<AtomicUsize>,
}

impl ValueType for Tracked {
    fn name(&self) -> &str {
        "Tracked"
    }
    fn size(&self) -> usize {
        4
    }
    fn alignment(&self) -> usize {
        4
    }
    fn copy(&self, src: &[u8], dst: &mut [u8]) {
        dst.copy_from_slice(src);
    }
    fn destruct(&self, value: &mut [u8]) {
        self.destructs.fetch_add(1, Ordering::SeqCst);
        value.fill(0);
    }
}

// ---------------------------------------------------------------------------
// Parent links
// ---------------------------------------------------------------------------

#[test]
fn parent_links_are_set_on_commit() {
    let (repo, node) = setup();
    let parent = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();

    let mut write = repo.write(parent).unwrap();
    write.set_sub_object(1, child).unwrap();
    assert_eq!(repo.owner_of(child).unwrap(), None);
    write.commit().unwrap();

    assert_eq!(
        repo.owner_of(child).unwrap(),
        Some(Owner {
            rid: parent,
            field: 1
        })
    );
}

#[test]
fn failed_commits_leave_links_untouched() {
    let (repo, node) = setup();
    let parent = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();

    let mut stale = repo.write(parent).unwrap();
    stale.add_to_sub_object_set(2, &[child]).unwrap();
    let mut winner = repo.write(parent).unwrap();
    winner.set(0, &1u32).unwrap();
    winner.commit().unwrap();

    assert!(stale.commit().is_err());
    assert_eq!(repo.owner_of(child).unwrap(), None);
}

#[test]
fn replacing_a_sub_object_releases_the_old_child() {
    let (repo, node) = setup();
    let parent = repo.create_resource(node).unwrap();
    let first = repo.create_resource(node).unwrap();
    let second = repo.create_resource(node).unwrap();

    adopt(&repo, parent, first);
    adopt(&repo, parent, second);

    assert_eq!(repo.owner_of(first).unwrap(), None);
    assert_eq!(repo.owner_of(second).unwrap().map(|o| o.rid), Some(parent));
    assert_eq!(repo.read(parent).unwrap().sub_object(1).unwrap(), Some(second));
}

#[test]
fn set_removal_releases_the_member() {
    let (repo, node) = setup();
    let parent = repo.create_resource(node).unwrap();
    let member = repo.create_resource(node).unwrap();
    add_members(&repo, parent, &[member]);
    assert_eq!(repo.owner_of(member).unwrap().map(|o| o.field), Some(2));

    let mut write = repo.write(parent).unwrap();
    write.remove_from_sub_object_set(2, &[member]).unwrap();
    write.commit().unwrap();
    assert_eq!(repo.owner_of(member).unwrap(), None);
    assert!(repo.read(parent).unwrap().sub_object_set(2).unwrap().is_empty());
}

#[test]
fn ownership_cycles_are_rejected() {
    let (repo, node) = setup();
    let grandparent = repo.create_resource(node).unwrap();
    let parent = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();
    add_members(&repo, grandparent, &[parent]);
    adopt(&repo, parent, child);

    let mut write = repo.write(child).unwrap();
    assert_eq!(
        write.set_sub_object(1, grandparent).unwrap_err(),
        RepoError::OwnershipCycle {
            owner: child,
            child: grandparent
        }
    );
    assert!(matches!(
        write.add_to_sub_object_set(2, &[child]),
        Err(RepoError::OwnershipCycle { .. })
    ));
    assert!(write.add_to_sub_object_set(2, &[]).is_ok());
}

#[test]
fn commits_bump_every_ancestor_version() {
    let (repo, node) = setup();
    let grandparent = repo.create_resource(node).unwrap();
    let parent = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();

    add_members(&repo, grandparent, &[parent]);
    adopt(&repo, parent, child);
    assert_eq!(repo.version(grandparent).unwrap(), 2);
    assert_eq!(repo.version(parent).unwrap(), 1);

    let mut write = repo.write(child).unwrap();
    write.set(0, &5u32).unwrap();
    assert_eq!(write.commit().unwrap(), 1);

    assert_eq!(repo.version(child).unwrap(), 1);
    assert_eq!(repo.version(parent).unwrap(), 2);
    assert_eq!(repo.version(grandparent).unwrap(), 3);
}

#[test]
fn concurrent_handles_cannot_close_a_cycle() {
    let (repo, node) = setup();
    let a = repo.create_resource(node).unwrap();
    let b = repo.create_resource(node).unwrap();

    let mut write_a = repo.write(a).unwrap();
    write_a.set_sub_object(1, b).unwrap();
    let mut write_b = repo.write(b).unwrap();
    write_b.set_sub_object(1, a).unwrap();

    assert_eq!(write_a.commit().unwrap(), 1);
    assert_eq!(
        write_b.commit().unwrap_err(),
        RepoError::OwnershipCycle { owner: b, child: a }
    );

    assert_eq!(repo.owner_of(b).unwrap(), Some(Owner { rid: a, field: 1 }));
    assert_eq!(repo.owner_of(a).unwrap(), None);
    assert_eq!(repo.version(b).unwrap(), 0);
    assert!(!repo.read(b).unwrap().is_populated());
}

#[test]
fn bottom_up_chains_stay_within_depth_limit() {
    let (repo, node) = setup_with(RepositoryConfig {
        max_chain_depth: 4,
        ..RepositoryConfig::compact()
    });
    let chain: Vec<Rid> = (0..6).map(|_| repo.create_resource(node).unwrap()).collect();

    // Each new root adopts the previous one: four links fit.
    for pair in chain[..5].windows(2) {
        adopt(&repo, pair[1], pair[0]);
    }
    let mut write = repo.write(chain[5]).unwrap();
    assert_eq!(
        write.set_sub_object(1, chain[4]).unwrap_err(),
        RepoError::ChainTooDeep { rid: chain[5], limit: 4 }
    );

    // Nor can the chain grow below its leaf.
    let mut write = repo.write(chain[0]).unwrap();
    assert_eq!(
        write.set_sub_object(1, chain[5]).unwrap_err(),
        RepoError::ChainTooDeep { rid: chain[0], limit: 4 }
    );

    // A leaf commit reaches the root.
    for &ancestor in &chain[1..5] {
        assert_eq!(repo.version(ancestor).unwrap(), 1);
    }
    let mut write = repo.write(chain[0]).unwrap();
    write.set(0, &1u32).unwrap();
    write.commit().unwrap();
    for &ancestor in &chain[1..5] {
        assert_eq!(repo.version(ancestor).unwrap(), 2);
    }
}

// ---------------------------------------------------------------------------
// Destruction
// ---------------------------------------------------------------------------

#[test]
fn destruction_cascades_to_owned_resources() {
    let (repo, node) = setup();
    let root = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();
    let m1 = repo.create_resource(node).unwrap();
    let m2 = repo.create_resource(node).unwrap();
    let grandchild = repo.create_resource(node).unwrap();
    let bystander = repo.create_resource(node).unwrap();

    adopt(&repo, m1, grandchild);
    adopt(&repo, root, child);
    add_members(&repo, root, &[m1, m2]);
    assert_eq!(repo.resource_count(), 6);

    repo.destroy_resource(root).unwrap();
    assert_eq!(repo.state(root).unwrap(), ResourceState::MarkedToDestroy);
    assert_eq!(repo.write(root).unwrap_err(), RepoError::NotAlive(root));
    assert_eq!(repo.destroy_resource(root).unwrap_err(), RepoError::NotAlive(root));
    assert_eq!(repo.pending_reclamation(), 2);

    let report = repo.garbage_collect();
    assert_eq!(report.resources_destroyed, 5);
    for rid in [root, child, m1, m2, grandchild] {
        assert_eq!(repo.state(rid).unwrap(), ResourceState::Destroyed);
        assert!(!repo.is_alive(rid));
    }
    assert!(repo.is_alive(bystander));
    assert_eq!(repo.resource_count(), 1);
    assert_eq!(repo.pending_reclamation(), 0);
}

#[test]
fn destroyed_members_leave_their_owner() {
    let (repo, node) = setup();
    let owner = repo.create_resource(node).unwrap();
    let a = repo.create_resource(node).unwrap();
    let b = repo.create_resource(node).unwrap();
    add_members(&repo, owner, &[a, b]);
    let version = repo.version(owner).unwrap();

    repo.destroy_resource(a).unwrap();
    let report = repo.garbage_collect();
    assert_eq!(report.resources_destroyed, 1);
    // The owner's detaching commit supersedes one snapshot.
    assert_eq!(report.snapshots_released, 1);

    assert_eq!(repo.read(owner).unwrap().sub_object_set(2).unwrap(), vec![b]);
    assert!(repo.version(owner).unwrap() > version);
}

#[test]
fn destroyed_sub_object_is_cleared_from_its_owner() {
    let (repo, node) = setup();
    let owner = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();
    adopt(&repo, owner, child);

    repo.destroy_resource(child).unwrap();
    repo.garbage_collect();
    assert_eq!(repo.read(owner).unwrap().sub_object(1).unwrap(), None);
}

#[test]
fn reparented_children_survive_their_former_owner() {
    let (repo, node) = setup();
    let first = repo.create_resource(node).unwrap();
    let second = repo.create_resource(node).unwrap();
    let child = repo.create_resource(node).unwrap();
    adopt(&repo, first, child);
    adopt(&repo, second, child);

    repo.destroy_resource(first).unwrap();
    assert_eq!(repo.garbage_collect().resources_destroyed, 1);
    assert!(repo.is_alive(child));
    assert_eq!(repo.owner_of(child).unwrap().map(|o| o.rid), Some(second));
}

#[test]
fn destruction_drops_external_id_and_paths() {
    let (repo, node) = setup();
    let id = strata_repo::ExternalId::new();
    let rid = repo.create_resource_with_id(node, id).unwrap();
    repo.set_path("nodes/a", rid).unwrap();

    repo.destroy_resource(rid).unwrap();
    repo.garbage_collect();
    assert_eq!(repo.get_by_external_id(id), None);
    assert_eq!(repo.get_by_path("nodes/a"), None);
    assert_eq!(repo.read(rid).unwrap_err(), RepoError::NotAlive(rid));
}

// ---------------------------------------------------------------------------
// Reclamation
// ---------------------------------------------------------------------------

#[test]
fn superseded_snapshots_wait_for_collection() {
    let (repo, node) = setup();
    let rid = repo.create_resource(node).unwrap();
    for health in 0..3u32 {
        let mut write = repo.write(rid).unwrap();
        write.set(0, &health).unwrap();
        write.commit().unwrap();
    }
    assert_eq!(repo.pending_reclamation(), 2);
    assert_eq!(repo.garbage_collect().snapshots_released, 2);
    assert!(repo.garbage_collect().is_empty());
}

#[test]
fn readers_outlive_collection() {
    let (repo, node) = setup();
    let rid = repo.create_resource(node).unwrap();
    let mut write = repo.write(rid).unwrap();
    write.set(0, &1u32).unwrap();
    write.commit().unwrap();

    let pinned = repo.read(rid).unwrap();
    let mut write = repo.write(rid).unwrap();
    write.set(0, &2u32).unwrap();
    write.commit().unwrap();
    repo.garbage_collect();
    assert_eq!(pinned.get::<u32>(0).unwrap(), Some(1));

    repo.destroy_resource(rid).unwrap();
    repo.garbage_collect();
    assert_eq!(pinned.get::<u32>(0).unwrap(), Some(1));
}

#[test]
fn values_are_destructed_once_no_one_holds_them() {
    let repo = Repository::new(RepositoryConfig::compact()).unwrap();
    let destructs = Arc::new(AtomicUsize::new(0));
    repo.register_value_type(Arc::new(Tracked {
        destructs: Arc::clone(&destructs),
    }))
    .unwrap();
    let tag = repo
        .create_resource_type(&ResourceTypeSchema::new("Holder").value("Value", 0, "Tracked"))
        .unwrap();
    let rid = repo.create_resource(tag).unwrap();

    let mut write = repo.write(rid).unwrap();
    write.set_value(0, &[1, 0, 0, 0]).unwrap();
    write.commit().unwrap();
    assert_eq!(destructs.load(Ordering::SeqCst), 0);

    // Overwriting the copied-forward value destructs it in the new snapshot.
    let mut write = repo.write(rid).unwrap();
    write.set_value(0, &[2, 0, 0, 0]).unwrap();
    write.commit().unwrap();
    assert_eq!(destructs.load(Ordering::SeqCst), 1);

    repo.garbage_collect();
    assert_eq!(destructs.load(Ordering::SeqCst), 2);

    let pinned = repo.read(rid).unwrap();
    repo.destroy_resource(rid).unwrap();
    repo.garbage_collect();
    assert_eq!(destructs.load(Ordering::SeqCst), 2);

    drop(pinned);
    assert_eq!(destructs.load(Ordering::SeqCst), 3);
}

#[test]
fn discarded_writes_destruct_their_values() {
    let repo = Repository::new(RepositoryConfig::compact()).unwrap();
    let destructs = Arc::new(AtomicUsize::new(0));
    repo.register_value_type(Arc::new(Tracked {
        destructs: Arc::clone(&destructs),
    }))
    .unwrap();
    let tag = repo
        .create_resource_type(&ResourceTypeSchema::new("Holder").value("Value", 0, "Tracked"))
        .unwrap();
    let rid = repo.create_resource(tag).unwrap();

    let mut write = repo.write(rid).unwrap();
    write.set_value(0, &[1, 0, 0, 0]).unwrap();
    drop(write);
    assert_eq!(destructs.load(Ordering::SeqCst), 1);
    assert_eq!(repo.read(rid).unwrap().get_value(0).unwrap().map(|v| v.to_vec()), None);
}
