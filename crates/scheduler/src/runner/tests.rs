use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use triage_core::TriageConfig;

use crate::error::SchedulerError;
use crate::runner::{Scheduler, SchedulerState};
use crate::sink::MemorySink;

const WAIT: Duration = Duration::from_secs(10);

fn scheduler() -> (Scheduler, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let scheduler = Scheduler::new(TriageConfig::default(), sink.clone()).unwrap();
    (scheduler, sink)
}

/// A job that parks its worker until released.
struct Gate {
    started_rx: mpsc::Receiver<()>,
    release_tx: mpsc::Sender<()>,
}

impl Gate {
    fn submit(scheduler: &Scheduler, priority: i64) -> Self {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        scheduler
            .submit(
                move || {
                    started_tx.send(()).unwrap();
                    let _ = release_rx.recv();
                },
                priority,
            )
            .unwrap();
        Self {
            started_rx,
            release_tx,
        }
    }

    fn wait_started(&self) {
        self.started_rx.recv_timeout(WAIT).expect("gate job never started");
    }

    fn release(&self) {
        let _ = self.release_tx.send(());
    }
}

fn wait_for_state(scheduler: &Scheduler, state: SchedulerState) {
    let deadline = Instant::now() + WAIT;
    while scheduler.state() != state {
        assert!(Instant::now() < deadline, "scheduler never reached {state}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn scheduler_creation() {
    let (scheduler, _sink) = scheduler();
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(scheduler.queue_len(), 0);
    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_submitted, 0);
    assert_eq!(metrics.worker_count, 0);
}

#[test]
fn invalid_config_fails_fast() {
    let mut config = TriageConfig::default();
    config.scheduler.worker_threads = 0;
    let err = Scheduler::new(config, Arc::new(MemorySink::new())).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));

    let mut config = TriageConfig::default();
    config.detector.window_size = 0;
    let err = Scheduler::new(config, Arc::new(MemorySink::new())).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn small_window_is_accepted() {
    let mut config = TriageConfig::default();
    config.detector.window_size = 5;
    let scheduler = Scheduler::new(config, Arc::new(MemorySink::new())).unwrap();
    assert_eq!(scheduler.detector().lock().unwrap().capacity(), 5);
}

#[test]
fn start_with_zero_workers_rejected() {
    let (scheduler, _sink) = scheduler();
    assert!(matches!(
        scheduler.start(0),
        Err(SchedulerError::InvalidConfig(_))
    ));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[test]
fn start_twice_rejected() {
    let (scheduler, _sink) = scheduler();
    scheduler.start(2).unwrap();
    assert!(matches!(scheduler.start(2), Err(SchedulerError::AlreadyStarted)));
    assert_eq!(scheduler.metrics().worker_count, 2);
    scheduler.stop();
    assert!(matches!(scheduler.start(2), Err(SchedulerError::AlreadyStarted)));
}

#[test]
fn start_configured_uses_config_worker_count() {
    let mut config = TriageConfig::default();
    config.scheduler.worker_threads = 3;
    let scheduler = Scheduler::new(config, Arc::new(MemorySink::new())).unwrap();
    scheduler.start_configured().unwrap();
    assert_eq!(scheduler.metrics().worker_count, 3);
    assert_eq!(scheduler.workers.lock().unwrap().len(), 3);
}

#[test]
fn ids_start_at_one_and_increase() {
    let (scheduler, _sink) = scheduler();
    let ids: Vec<u64> = (0..5)
        .map(|p| scheduler.submit(|| {}, p).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(scheduler.queue_len(), 5);
    assert_eq!(scheduler.metrics().jobs_submitted, 5);
}

#[test]
fn jobs_submitted_before_start_run_after_start() {
    let (scheduler, sink) = scheduler();
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let ran = Arc::clone(&ran);
        scheduler
            .submit(
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                0,
            )
            .unwrap();
    }
    assert!(!scheduler.wait_idle(Duration::from_millis(20)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    scheduler.start(2).unwrap();
    assert!(scheduler.wait_idle(WAIT));
    assert_eq!(ran.load(Ordering::SeqCst), 3);
    assert_eq!(sink.completed_count(), 3);
}

#[test]
fn single_worker_runs_in_priority_order() {
    let (scheduler, sink) = scheduler();
    scheduler.start(1).unwrap();

    let gate = Gate::submit(&scheduler, i64::MAX);
    gate.wait_started();

    let order = Arc::new(Mutex::new(Vec::new()));
    let priorities = [3, 7, -1, 7, 0, 12, 3, 5];
    for p in priorities {
        let order = Arc::clone(&order);
        scheduler
            .submit(move || order.lock().unwrap().push(p), p)
            .unwrap();
    }
    gate.release();
    assert!(scheduler.wait_idle(WAIT));

    let order = order.lock().unwrap().clone();
    assert_eq!(order, vec![12, 7, 7, 5, 3, 3, 0, -1]);

    // Equal priorities complete in submission order.
    let records = sink.completed();
    let sevens: Vec<u64> = records
        .iter()
        .filter(|r| r.priority == 7)
        .map(|r| r.job_id)
        .collect();
    assert_eq!(sevens, vec![3, 5]);
}

#[test]
fn stop_discards_queued_jobs_and_finishes_in_flight() {
    let (scheduler, sink) = scheduler();
    scheduler.start(1).unwrap();

    let gate = Gate::submit(&scheduler, 0);
    gate.wait_started();

    let queued_ran = Arc::new(AtomicUsize::new(0));
    for p in 0..5 {
        let queued_ran = Arc::clone(&queued_ran);
        scheduler
            .submit(
                move || {
                    queued_ran.fetch_add(1, Ordering::SeqCst);
                },
                p,
            )
            .unwrap();
    }

    let release = gate.release_tx.clone();
    let discarded = thread::scope(|s| {
        let scheduler = &scheduler;
        s.spawn(move || {
            wait_for_state(scheduler, SchedulerState::Stopping);
            let _ = release.send(());
        });
        scheduler.stop()
    });

    assert_eq!(discarded, 5);
    assert_eq!(queued_ran.load(Ordering::SeqCst), 0);
    assert_eq!(sink.completed_count(), 1);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(scheduler.queue_len(), 0);

    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_discarded, 5);
    assert_eq!(metrics.active_workers, 0);
}

#[test]
fn submit_after_stop_not_accepted() {
    let (scheduler, _sink) = scheduler();
    scheduler.start(1).unwrap();
    scheduler.stop();
    assert!(matches!(
        scheduler.submit(|| {}, 1),
        Err(SchedulerError::NotAccepting)
    ));
}

#[test]
fn stop_is_idempotent() {
    let (scheduler, _sink) = scheduler();
    scheduler.start(2).unwrap();
    assert_eq!(scheduler.stop(), 0);
    assert_eq!(scheduler.stop(), 0);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(scheduler.workers.lock().unwrap().is_empty());
}

#[test]
fn stop_without_start_discards_backlog() {
    let (scheduler, sink) = scheduler();
    scheduler.submit(|| {}, 1).unwrap();
    scheduler.submit(|| {}, 2).unwrap();
    assert_eq!(scheduler.stop(), 2);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(sink.completed_count(), 0);
}

#[test]
fn panicking_job_does_not_shrink_pool() {
    let (scheduler, sink) = scheduler();
    scheduler.start(1).unwrap();

    scheduler.submit(|| panic!("job exploded"), 5).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let ran = Arc::clone(&ran);
        scheduler
            .submit(
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                1,
            )
            .unwrap();
    }
    assert!(scheduler.wait_idle(WAIT));

    assert_eq!(ran.load(Ordering::SeqCst), 3);
    let failed = sink.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id, 1);
    assert_eq!(failed[0].message, "job exploded");
    assert_eq!(sink.completed_count(), 3);

    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_failed, 1);
    assert_eq!(metrics.jobs_completed, 3);
}

#[test]
fn failed_jobs_are_not_fed_to_detector() {
    let (scheduler, _sink) = scheduler();
    scheduler.start(2).unwrap();
    for _ in 0..4 {
        scheduler.submit(|| panic!("nope"), 0).unwrap();
    }
    scheduler.submit(|| {}, 0).unwrap();
    assert!(scheduler.wait_idle(WAIT));
    assert_eq!(scheduler.detector().lock().unwrap().len(), 1);
}

#[test]
fn stop_from_inside_a_task_requests_shutdown() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = Arc::new(Scheduler::new(TriageConfig::default(), sink.clone()).unwrap());
    scheduler.start(2).unwrap();

    let (tx, rx) = mpsc::channel();
    let inner = Arc::clone(&scheduler);
    scheduler
        .submit(
            move || {
                tx.send(inner.stop()).unwrap();
            },
            0,
        )
        .unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0);
    wait_for_state(&scheduler, SchedulerState::Stopping);
    scheduler.stop();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(sink.completed_count(), 1);
}

#[test]
fn snapshots_never_show_more_completions_than_submissions() {
    let (scheduler, _sink) = scheduler();
    scheduler.start(4).unwrap();

    let done = std::sync::atomic::AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                let m = scheduler.metrics();
                assert!(
                    m.jobs_completed + m.jobs_failed <= m.jobs_submitted,
                    "completed {} > submitted {}",
                    m.jobs_completed,
                    m.jobs_submitted
                );
            }
        });
        for i in 0..500 {
            scheduler.submit(|| {}, i % 5).unwrap();
        }
        let idle = scheduler.wait_idle(WAIT);
        done.store(true, Ordering::SeqCst);
        assert!(idle);
    });

    assert_eq!(scheduler.metrics().jobs_submitted, 500);
}

#[test]
fn metrics_track_completions_per_worker() {
    let (scheduler, _sink) = scheduler();
    scheduler.start(3).unwrap();
    for i in 0..30 {
        scheduler.submit(|| {}, i % 3).unwrap();
    }
    assert!(scheduler.wait_idle(WAIT));

    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_submitted, 30);
    assert_eq!(metrics.jobs_completed, 30);
    assert_eq!(metrics.completed_by_worker.values().sum::<u64>(), 30);
    assert!(metrics.completed_by_worker.keys().all(|w| *w < 3));
    assert!(metrics.last_completed_at.is_some());
    assert_eq!(metrics.queue_depth, 0);
}

#[test]
fn drop_stops_workers() {
    let sink = Arc::new(MemorySink::new());
    {
        let scheduler = Scheduler::new(TriageConfig::default(), sink.clone()).unwrap();
        scheduler.start(2).unwrap();
        scheduler.submit(|| {}, 0).unwrap();
        assert!(scheduler.wait_idle(WAIT));
    }
    assert_eq!(sink.completed_count(), 1);
}
