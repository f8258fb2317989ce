//! Multi-threaded readers, writers, and collectors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use strata_repo::{ExternalId, FieldReader, Repository, RepositoryConfig, Rid};
use strata_schema::{ResourceTypeSchema, TypeTag};

fn setup(config: RepositoryConfig) -> (Repository, TypeTag) {
    let repo = Repository::new(config).unwrap();
    let pair = repo
        .create_resource_type(
            &ResourceTypeSchema::new("Pair")
                .value("A", 0, "u64")
                .value("B", 1, "u64"),
        )
        .unwrap();
    (repo, pair)
}

#[test]
fn one_rid_per_external_id_under_contention() {
    let (repo, pair) = setup(RepositoryConfig::compact());
    let ids: Vec<ExternalId> = (0..50).map(|_| ExternalId::random()).collect();

    let (repo_ref, ids_ref) = (&repo, &ids);
    let results: Vec<HashMap<ExternalId, Rid>> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || {
                    ids_ref
                        .iter()
                        .map(|&id| (id, repo_ref.get_or_create_by_external_id(id, Some(pair)).unwrap()))
                        .collect::<HashMap<_, _>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for id in &ids {
        let expected = repo.get_by_external_id(*id).unwrap();
        for seen in &results {
            assert_eq!(seen[id], expected);
        }
    }
    assert_eq!(repo.resource_count(), ids.len());
}

#[test]
fn concurrent_updates_are_not_lost() {
    let (repo, pair) = setup(RepositoryConfig {
        max_commit_retries: u32::MAX,
        ..RepositoryConfig::compact()
    });
    let rid = repo.create_resource(pair).unwrap();
    const THREADS: u64 = 4;
    const INCREMENTS: u64 = 200;

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..INCREMENTS {
                    repo.update(rid, |write| {
                        let a = write.get::<u64>(0)?.unwrap_or(0);
                        write.set(0, &(a + 1))
                    })
                    .unwrap();
                }
            });
        }
    });

    let total = THREADS * INCREMENTS;
    assert_eq!(repo.read(rid).unwrap().get::<u64>(0).unwrap(), Some(total));
    assert_eq!(u64::from(repo.version(rid).unwrap()), total);
}

#[test]
fn readers_never_observe_partial_commits() {
    let (repo, pair) = setup(RepositoryConfig::compact());
    let rid = repo.create_resource(pair).unwrap();
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            for n in 1..=2_000u64 {
                let mut write = repo.write(rid).unwrap();
                write.set(0, &n).unwrap();
                write.set(1, &n).unwrap();
                write.commit().unwrap();
            }
            done.store(true, Ordering::Release);
        });

        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                repo.garbage_collect();
            }
        });

        for _ in 0..3 {
            s.spawn(|| {
                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    let read = repo.read(rid).unwrap();
                    let a = read.get::<u64>(0).unwrap().unwrap_or(0);
                    let b = read.get::<u64>(1).unwrap().unwrap_or(0);
                    assert_eq!(a, b);
                    assert!(a >= last);
                    last = a;
                }
            });
        }
    });

    repo.garbage_collect();
    assert_eq!(repo.version(rid).unwrap(), 2_000);
    assert_eq!(repo.pending_reclamation(), 0);
}

#[test]
fn parallel_creation_yields_distinct_rids() {
    let (repo, pair) = setup(RepositoryConfig::compact());
    let repo_ref = &repo;
    let rids: Vec<Rid> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(move || {
                    (0..500)
                        .map(|_| repo_ref.create_resource(pair).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    let mut sorted = rids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), 2_000);
    assert!(rids.iter().all(|&rid| repo.is_alive(rid)));
}
