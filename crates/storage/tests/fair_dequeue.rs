#![forbid(unsafe_code)]

mod common;

use bx_core::model::JobState;
use bx_storage::{CancelFilter, ExecutionConfig, MarkFinalOptions, SqliteStore, WorkerStore};
use common::{Fixture, add_workspace, seed_workspace};
use std::collections::BTreeSet;
use std::time::Duration;

/// Enqueues `per_user` jobs for each user in turn (u1, u1, u2, u2, ...).
fn enqueue_round(fixture: &Fixture, store: &mut SqliteStore, users: &[i64], per_user: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    for user_id in users {
        let seeded = seed_workspace(store, *user_id, &format!("github.com/user-{user_id}/repo"));
        for n in 0..per_user {
            let workspace = if n == 0 {
                seeded.workspace.clone()
            } else {
                add_workspace(store, &seeded.batch_spec, &seeded.repo)
            };
            fixture.clock.advance_ms(1);
            ids.push(store.enqueue_execution_job(workspace.id).expect("enqueue").id);
        }
    }
    ids
}

#[test]
fn dequeue_interleaves_users_round_robin() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    let jobs = enqueue_round(&fixture, &mut store, &[1, 2, 3], 2);

    let ranked = store.ranked_queue().expect("ranked");
    let first_places: Vec<i64> = ranked.iter().take(3).map(|job| job.place_in_user_queue).collect();
    assert_eq!(first_places, vec![1, 1, 1]);

    let mut order = Vec::new();
    while let Some(job) = store.dequeue("worker-1").expect("dequeue") {
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.worker_hostname, "worker-1");
        order.push(job.id);
    }

    assert_eq!(
        order,
        vec![jobs[0], jobs[2], jobs[4], jobs[1], jobs[3], jobs[5]]
    );
    assert!(store.ranked_queue().expect("ranked").is_empty());
}

#[test]
fn dequeue_on_an_empty_queue_returns_none() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    assert!(store.dequeue("worker-1").expect("dequeue").is_none());
    assert!(store.dequeue("  ").is_err());
}

#[test]
fn canceled_jobs_are_never_dequeued() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    let jobs = enqueue_round(&fixture, &mut store, &[1], 2);

    let result = store
        .cancel_execution_jobs(&CancelFilter::Ids(vec![jobs[0]]))
        .expect("cancel");
    assert_eq!(result.canceled_ids, vec![jobs[0]]);

    let next = store.dequeue("worker-1").expect("dequeue").expect("job");
    assert_eq!(next.id, jobs[1]);
    assert!(store.dequeue("worker-1").expect("dequeue").is_none());
}

#[test]
fn errored_jobs_wait_for_their_retry_delay() {
    let fixture = Fixture::new();
    let mut config = ExecutionConfig::default();
    config.max_num_retries = 3;
    config.retry_delay = Duration::from_millis(1_000);
    let mut store = fixture.open_with(config);
    let jobs = enqueue_round(&fixture, &mut store, &[1], 1);
    let options = MarkFinalOptions::for_worker("worker-1");

    let job = store.dequeue("worker-1").expect("dequeue").expect("job");
    assert!(store.mark_errored(job.id, "executor crashed", &options).expect("mark errored"));

    let errored = store.execution_job(jobs[0]).expect("get").expect("job");
    assert_eq!(errored.state, JobState::Errored);
    assert_eq!(errored.num_failures, 1);
    assert_eq!(errored.process_after_ms, Some(errored.updated_at_ms + 1_000));

    assert!(store.dequeue("worker-2").expect("dequeue").is_none());
    fixture.clock.advance_ms(1_000);
    let retried = store.dequeue("worker-2").expect("dequeue").expect("retried job");
    assert_eq!(retried.id, jobs[0]);
    assert_eq!(retried.worker_hostname, "worker-2");
    assert_eq!(retried.failure_message, None);
}

#[test]
fn errored_jobs_in_their_retry_delay_do_not_hold_a_queue_place() {
    let fixture = Fixture::new();
    let mut config = ExecutionConfig::default();
    config.retry_delay = Duration::from_millis(60_000);
    let mut store = fixture.open_with(config);
    let jobs = enqueue_round(&fixture, &mut store, &[1, 2], 2);
    let options = MarkFinalOptions::for_worker("worker-1");

    let first = store.dequeue("worker-1").expect("dequeue").expect("job");
    assert_eq!(first.id, jobs[0]);
    let second = store.dequeue("worker-1").expect("dequeue").expect("job");
    assert_eq!(second.id, jobs[2]);
    assert!(store.mark_errored(first.id, "executor crashed", &options).expect("mark errored"));

    // User 1 dequeued least recently, so its queued job leads once the
    // delayed retry stops occupying its first place.
    let ranked = store.ranked_queue().expect("ranked");
    let order: Vec<(i64, i64)> = ranked.iter().map(|job| (job.id, job.place_in_user_queue)).collect();
    assert_eq!(order, vec![(jobs[1], 1), (jobs[3], 1)]);

    let next = store.dequeue("worker-1").expect("dequeue").expect("job");
    assert_eq!(next.id, jobs[1]);
}

#[test]
fn concurrent_workers_never_receive_the_same_job() {
    const WORKERS: usize = 8;

    let fixture = Fixture::new();
    let mut store = fixture.open();
    let jobs = enqueue_round(&fixture, &mut store, &[1, 2, 3], 10);

    // Open every connection up front; schema install is not meant to race.
    let stores: Vec<SqliteStore> = (0..WORKERS).map(|_| fixture.open()).collect();
    let handles: Vec<_> = stores
        .into_iter()
        .enumerate()
        .map(|(n, mut store)| {
            std::thread::spawn(move || {
                let hostname = format!("worker-{n}");
                let mut got = Vec::new();
                while let Some(job) = store.dequeue(&hostname).expect("dequeue") {
                    got.push(job.id);
                }
                got
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.join().expect("worker thread") {
            total += 1;
            assert!(seen.insert(id), "job {id} dequeued twice");
        }
    }
    assert_eq!(total, jobs.len());
    assert_eq!(seen, jobs.into_iter().collect::<BTreeSet<_>>());
}
