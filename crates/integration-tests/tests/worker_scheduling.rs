//! Worker scheduling over SQLite: priority order, concurrency bounds,
//! unregistered types and exclusive ownership across workers.

mod common;

use common::{wait_drained, TestDb};
use jobpool_core::application::worker::{HandlerError, JobCallback};
use jobpool_core::domain::{Job, JobFilter, JobId, JobStatus, NewJob};
use jobpool_core::port::JobStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_single_slot_dispatches_by_descending_priority() {
    let db = TestDb::new();
    let worker = db.worker(1).await;
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    worker
        .register_handler("ranked", move |job: Job, done: JobCallback| {
            seen.lock().unwrap().push(job.priority);
            done.complete(json!(job.priority));
        })
        .unwrap();

    for priority in [1, 5, 10] {
        worker
            .enqueue(NewJob::new("ranked", json!({})).with_priority(priority))
            .await
            .unwrap();
    }

    worker.start().await.unwrap();
    wait_drained(worker.store().as_ref()).await;
    worker.stop().await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec![10, 5, 1]);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit_and_reaches_it() {
    const LIMIT: usize = 3;
    const WORKLOAD: usize = 8;

    let db = TestDb::new();
    let worker = db.worker(LIMIT).await;
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (active_h, peak_h) = (active.clone(), peak.clone());
    worker
        .register_async_handler("overlap", move |_job: Job| {
            let active = active_h.clone();
            let peak = peak_h.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!(null))
            }
        })
        .unwrap();

    for _ in 0..WORKLOAD {
        worker.enqueue(NewJob::new("overlap", json!({}))).await.unwrap();
    }

    worker.start().await.unwrap();
    let store = worker.store().clone();
    let sampler = tokio::spawn(async move {
        let mut max_running = 0;
        for _ in 0..100 {
            let running = store.count_by_status(JobStatus::Running).await.unwrap();
            max_running = max_running.max(running);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        max_running
    });

    wait_drained(worker.store().as_ref()).await;
    worker.stop().await.unwrap();
    let max_running = sampler.await.unwrap();

    assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    assert_eq!(peak.load(Ordering::SeqCst), LIMIT.min(WORKLOAD));
    assert!(max_running <= LIMIT as i64);
    assert_eq!(
        worker.store().count_by_status(JobStatus::Completed).await.unwrap(),
        WORKLOAD as i64
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_handlers_only_hold_their_own_slots() {
    let db = TestDb::new();
    let worker = db.worker(3).await;
    worker
        .register_handler("stuck", |_job: Job, done: JobCallback| {
            std::thread::sleep(Duration::from_millis(1500));
            done.complete(json!(null));
        })
        .unwrap();
    worker
        .register_handler("quick", |_job: Job, done: JobCallback| {
            done.complete(json!("ok"));
        })
        .unwrap();

    // Two blocked slots, as many as the runtime has threads
    for _ in 0..2 {
        worker
            .enqueue(NewJob::new("stuck", json!({})).with_priority(10))
            .await
            .unwrap();
    }
    let quick = worker.enqueue(NewJob::new("quick", json!({}))).await.unwrap();

    let started = Instant::now();
    worker.start().await.unwrap();
    let done = common::wait_terminal(worker.store().as_ref(), &quick.id).await;
    let elapsed = started.elapsed();
    worker.stop().await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert!(
        elapsed < Duration::from_millis(1000),
        "quick job waited {:?} behind blocking handlers",
        elapsed
    );
    assert_eq!(
        worker.store().count_by_status(JobStatus::Completed).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_unregistered_type_stays_pending() {
    let db = TestDb::new();
    let worker = db.worker(2).await;
    worker
        .register_handler("known", |_job: Job, done: JobCallback| {
            done.complete(json!(1));
        })
        .unwrap();
    let orphan = worker.enqueue(NewJob::new("unknown", json!({}))).await.unwrap();
    let known = worker.enqueue(NewJob::new("known", json!({}))).await.unwrap();

    worker.start().await.unwrap();
    common::wait_terminal(worker.store().as_ref(), &known.id).await;
    // Many more poll cycles at a 10ms interval
    tokio::time::sleep(Duration::from_millis(150)).await;
    worker.stop().await.unwrap();

    let orphan = worker.get_job(&orphan.id).await.unwrap().unwrap();
    assert_eq!(orphan.status, JobStatus::Pending);
    assert_eq!(orphan.attempts, 0);
    assert!(orphan.started_at.is_none());

    let health = worker.health().await.unwrap();
    assert_eq!(health.unhandled.len(), 1);
    assert_eq!(health.unhandled[0].job_type, "unknown");
}

#[tokio::test]
async fn test_two_workers_on_one_database_never_share_a_job() {
    const JOBS: usize = 40;

    let db = TestDb::new();
    let invocations: Arc<Mutex<HashMap<JobId, usize>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut workers = Vec::new();
    for _ in 0..2 {
        let worker = db.worker(4).await;
        let seen = invocations.clone();
        worker
            .register_async_handler("shared", move |job: Job| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap().entry(job.id.clone()).or_default() += 1;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, HandlerError>(json!(job.id))
                }
            })
            .unwrap();
        workers.push(worker);
    }

    for i in 0..JOBS {
        workers[0]
            .enqueue(NewJob::new("shared", json!({ "i": i })))
            .await
            .unwrap();
    }
    for worker in &workers {
        worker.start().await.unwrap();
    }
    wait_drained(workers[0].store().as_ref()).await;
    for worker in &workers {
        worker.stop().await.unwrap();
    }

    let invocations = invocations.lock().unwrap();
    assert_eq!(invocations.len(), JOBS);
    assert!(invocations.values().all(|&count| count == 1));

    let completed = workers[1]
        .list_jobs(&JobFilter::all().with_status(JobStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), JOBS);
    assert!(completed.iter().all(|j| j.attempts == 1));
}

#[tokio::test]
async fn test_restart_after_stop_resumes_claiming() {
    let db = TestDb::new();
    let worker = db.worker(1).await;
    worker
        .register_handler("tick", |_job: Job, done: JobCallback| {
            done.complete(json!("ok"));
        })
        .unwrap();

    worker.start().await.unwrap();
    worker.stop().await.unwrap();

    let job = worker.enqueue(NewJob::new("tick", json!({}))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        worker.get_job(&job.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );

    worker.start().await.unwrap();
    let done = common::wait_terminal(worker.store().as_ref(), &job.id).await;
    worker.stop().await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}
