//! Concurrency behavior: snapshot isolation across concurrent commits,
//! write-conflict detection, parallel disjoint commits, and growth under
//! many writers.

use std::sync::mpsc;
use std::sync::Barrier;

use raxdb::{Database, StoreError};
use tempfile::tempdir;

#[test]
fn view_snapshot_is_stable_across_a_concurrent_commit() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    db.set("test", "1").unwrap();

    let (first_read_done, after_first_read) = mpsc::channel::<()>();
    let (commit_done, after_commit) = mpsc::channel::<()>();

    std::thread::scope(|s| {
        let db = &db;
        s.spawn(move || {
            db.view(|tx| {
                assert_eq!(tx.get("test")?, b"1");
                first_read_done.send(()).unwrap();

                after_commit.recv().unwrap();
                // The concurrent update has committed, but this snapshot
                // still sees the version it first read.
                assert_eq!(tx.get("test")?, b"1");
                Ok(())
            })
            .unwrap();
        });

        after_first_read.recv().unwrap();
        db.set("test", "2").unwrap();
        commit_done.send(()).unwrap();
    });

    assert_eq!(db.get("test").unwrap(), b"2");
}

#[test]
fn view_snapshot_does_not_see_keys_created_later() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();

    let (checked, after_check) = mpsc::channel::<()>();
    let (created, after_create) = mpsc::channel::<()>();

    std::thread::scope(|s| {
        let db = &db;
        s.spawn(move || {
            db.view(|tx| {
                let err = tx.get("late").unwrap_err();
                assert_eq!(StoreError::of(&err), Some(StoreError::NotFound));
                checked.send(()).unwrap();

                after_create.recv().unwrap();
                // The key now exists, but only in versions created after
                // this snapshot began.
                let err = tx.get("late").unwrap_err();
                assert_eq!(StoreError::of(&err), Some(StoreError::NotFound));
                Ok(())
            })
            .unwrap();
        });

        after_check.recv().unwrap();
        db.set("late", "arrived").unwrap();
        created.send(()).unwrap();
    });

    assert_eq!(db.get("late").unwrap(), b"arrived");
}

#[test]
fn view_does_not_see_a_commit_from_an_earlier_started_writer() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    db.set("test", "1").unwrap();

    let (writer_started, after_writer_started) = mpsc::channel::<()>();
    let (view_read, after_view_read) = mpsc::channel::<()>();

    std::thread::scope(|s| {
        let db = &db;

        // The writer begins before the view but commits in the middle of it.
        s.spawn(move || {
            db.update(|tx| {
                tx.set("test", "2")?;
                writer_started.send(()).unwrap();
                after_view_read.recv().unwrap();
                Ok(())
            })
            .unwrap();
        });

        after_writer_started.recv().unwrap();
        db.view(|tx| {
            assert_eq!(tx.get("test")?, b"1");
            view_read.send(()).unwrap();

            // Give the writer time to commit, then read again: its txid
            // predates ours, but it was in flight when we began.
            for _ in 0..50 {
                std::thread::sleep(std::time::Duration::from_millis(1));
                assert_eq!(tx.get("test")?, b"1");
            }
            Ok(())
        })
        .unwrap();
    });

    assert_eq!(db.get("test").unwrap(), b"2");
}

#[test]
fn racing_commits_on_one_key_produce_exactly_one_conflict() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    db.set("contested", "initial").unwrap();

    let (entered, after_enter) = mpsc::channel::<()>();
    let (release, wait_release) = mpsc::channel::<()>();

    std::thread::scope(|s| {
        let db = &db;

        // First transaction begins, writes, and stalls before commit.
        let loser = s.spawn(move || {
            db.update(|tx| {
                tx.set("contested", "from-first")?;
                entered.send(()).unwrap();
                wait_release.recv().unwrap();
                Ok(())
            })
        });

        // A later transaction commits the same key first.
        after_enter.recv().unwrap();
        db.set("contested", "from-second").unwrap();

        // Now the stalled transaction tries to commit and must lose.
        release.send(()).unwrap();
        let err = loser.join().unwrap().unwrap_err();
        assert_eq!(StoreError::of(&err), Some(StoreError::WriteConflict));
    });

    assert_eq!(db.get("contested").unwrap(), b"from-second");
}

#[test]
fn racing_updates_always_leave_a_committed_winner() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    db.set("slot", "start").unwrap();

    let threads = 8;
    let barrier = Barrier::new(threads);

    let results: Vec<Result<(), eyre::Report>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let db = &db;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    db.update(|tx| tx.set("slot", format!("winner-{t}")))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut winners = Vec::new();
    for (t, result) in results.iter().enumerate() {
        match result {
            Ok(()) => winners.push(format!("winner-{t}").into_bytes()),
            Err(err) => {
                assert_eq!(StoreError::of(err), Some(StoreError::WriteConflict));
            }
        }
    }

    assert!(!winners.is_empty());
    let current = db.get("slot").unwrap();
    assert!(winners.contains(&current));
}

#[test]
fn disjoint_key_sets_commit_in_parallel() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();

    let threads = 8;
    let per_thread = 50;
    let barrier = Barrier::new(threads);

    std::thread::scope(|s| {
        for t in 0..threads {
            let db = &db;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    db.update(|tx| {
                        tx.set(format!("thread-{t}:key-{i}"), format!("value-{t}-{i}"))
                    })
                    .unwrap();
                }
            });
        }
    });

    for t in 0..threads {
        for i in 0..per_thread {
            assert_eq!(
                db.get(format!("thread-{t}:key-{i}")).unwrap(),
                format!("value-{t}-{i}").into_bytes()
            );
        }
    }
}

#[test]
fn concurrent_writers_grow_the_file_without_losing_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let db = Database::open(&path).unwrap();

    let threads = 8;
    let per_thread = 100;
    let payload = vec![0x5A_u8; 1024];
    let barrier = Barrier::new(threads);

    std::thread::scope(|s| {
        for t in 0..threads {
            let db = &db;
            let barrier = &barrier;
            let payload = &payload;
            s.spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let mut value = payload.clone();
                    value.extend_from_slice(format!("{t}:{i}").as_bytes());
                    db.set(format!("grow-{t}-{i}"), &value).unwrap();
                }
            });
        }
    });

    // Well past the initial 64 KiB: every record present and intact.
    let written = (threads * per_thread) as u64 * 1024;
    assert!(std::fs::metadata(&path).unwrap().len() >= written);

    for t in 0..threads {
        for i in 0..per_thread {
            let value = db.get(format!("grow-{t}-{i}")).unwrap();
            assert!(value.starts_with(&payload));
            assert!(value.ends_with(format!("{t}:{i}").as_bytes()));
        }
    }

    // And everything survives an index rebuild.
    db.close().unwrap();
    let db = Database::open(&path).unwrap();
    assert_eq!(db.get("grow-0-0").unwrap().len(), 1024 + "0:0".len());
}

#[test]
fn many_readers_share_one_key_under_churn() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    db.set("hot", "v0").unwrap();

    std::thread::scope(|s| {
        let db = &db;

        for _ in 0..4 {
            s.spawn(move || {
                for _ in 0..500 {
                    let value = db.get("hot").unwrap();
                    assert!(value.starts_with(b"v"));
                }
            });
        }

        s.spawn(move || {
            for i in 1..100 {
                db.set("hot", format!("v{i}")).unwrap();
            }
        });
    });

    assert_eq!(db.get("hot").unwrap(), b"v99");
}
