use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dispatch_core::current_context;
use dispatch_core::execution::{ExecutionContext, TokioExecutionContext, job};
use dispatch_core::models::{ConcurrencyMode, ContextLabel, DispatchErrorKind};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

async fn receive_n<T>(receiver: &mut mpsc::UnboundedReceiver<T>, count: usize) -> Vec<T> {
    let mut received = Vec::with_capacity(count);
    for _ in 0..count {
        let item = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("timed out waiting for job")
            .expect("job channel closed");
        received.push(item);
    }
    received
}

fn track_peak(current: &AtomicUsize, peak: &AtomicUsize) {
    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serial_context_runs_jobs_in_submission_order_without_overlap() {
    let context = TokioExecutionContext::serial("serial", &Handle::current());
    assert_eq!(context.concurrency_mode(), ConcurrencyMode::Serial);

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (done, mut finished) = mpsc::unbounded_channel();

    for index in 0..5usize {
        let current = current.clone();
        let peak = peak.clone();
        let done = done.clone();
        context.submit(job(move || {
            track_peak(&current, &peak);
            // Later jobs are shorter so that reordering would show up.
            std::thread::sleep(Duration::from_millis(10 * (5 - index as u64)));
            current.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(index);
        }));
    }

    let order = receive_n(&mut finished, 5).await;
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_context_overlaps_jobs() {
    let context = TokioExecutionContext::concurrent("workers", &Handle::current());
    assert_eq!(context.concurrency_mode(), ConcurrencyMode::Concurrent);

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (done, mut finished) = mpsc::unbounded_channel();

    for _ in 0..3 {
        let current = current.clone();
        let peak = peak.clone();
        let done = done.clone();
        context.submit(job(move || {
            track_peak(&current, &peak);
            std::thread::sleep(Duration::from_millis(100));
            current.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(());
        }));
    }

    receive_n(&mut finished, 3).await;
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_job_does_not_run_before_its_delay() {
    let context = TokioExecutionContext::serial("delayed", &Handle::current());
    let (done, mut finished) = mpsc::unbounded_channel();
    let started = Instant::now();

    context.submit_after(
        job(move || {
            let _ = done.send(started.elapsed());
        }),
        Duration::from_millis(150),
    );

    let elapsed = receive_n(&mut finished, 1).await[0];
    assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_observe_the_label_of_their_context() {
    let context = TokioExecutionContext::concurrent("labelled", &Handle::current());
    let (done, mut finished) = mpsc::unbounded_channel();

    context.submit(job(move || {
        let _ = done.send(current_context());
    }));

    let observed = receive_n(&mut finished, 1).await.remove(0);
    assert_eq!(observed, Some(ContextLabel::new("labelled")));
    assert_eq!(current_context(), None);
}

#[test]
fn submit_and_wait_blocks_until_job_finishes() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let context = TokioExecutionContext::serial("blocking", runtime.handle());

    let finished = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(Mutex::new(None));
    context
        .submit_and_wait(job({
            let finished = finished.clone();
            let observed = observed.clone();
            move || {
                std::thread::sleep(Duration::from_millis(50));
                *observed.lock().unwrap() = current_context();
                finished.store(true, Ordering::SeqCst);
            }
        }))
        .unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(
        observed.lock().unwrap().clone(),
        Some(ContextLabel::new("blocking"))
    );
}

#[test]
fn submit_and_wait_reports_job_that_never_completed() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let context = TokioExecutionContext::serial("panicking", runtime.handle());

    let error = context
        .submit_and_wait(job(|| panic!("job failure")))
        .unwrap_err();
    assert_eq!(error.kind, DispatchErrorKind::ContextClosed);
    assert_eq!(error.context, Some(ContextLabel::new("panicking")));

    // The context keeps serving jobs after a panic.
    let ran = Arc::new(AtomicBool::new(false));
    context
        .submit_and_wait(job({
            let ran = ran.clone();
            move || ran.store(true, Ordering::SeqCst)
        }))
        .unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn barrier_runs_alone_between_earlier_and_later_jobs() {
    let context = TokioExecutionContext::concurrent("barrier", &Handle::current());
    let current = Arc::new(AtomicUsize::new(0));
    let events = Arc::new(Mutex::new(Vec::new()));
    let (done, mut finished) = mpsc::unbounded_channel();

    let record = |label: &'static str, hold: Duration| {
        let current = current.clone();
        let events = events.clone();
        let done = done.clone();
        job(move || {
            let running = current.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(hold);
            events.lock().unwrap().push((label, running));
            current.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(());
        })
    };

    for _ in 0..3 {
        context.submit(record("before", Duration::from_millis(60)));
    }
    context.submit_barrier(record("barrier", Duration::from_millis(20)));
    for _ in 0..3 {
        context.submit(record("after", Duration::from_millis(10)));
    }

    receive_n(&mut finished, 7).await;
    let events = events.lock().unwrap().clone();
    let labels: Vec<&str> = events.iter().map(|(label, _)| *label).collect();
    assert_eq!(
        labels,
        vec!["before", "before", "before", "barrier", "after", "after", "after"]
    );
    let (_, running_with_barrier) = events[3];
    assert_eq!(running_with_barrier, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_limit_caps_parallel_jobs() {
    let context =
        TokioExecutionContext::concurrent_with_limit("limited", &Handle::current(), 2).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (done, mut finished) = mpsc::unbounded_channel();

    for _ in 0..6 {
        let current = current.clone();
        let peak = peak.clone();
        let done = done.clone();
        context.submit(job(move || {
            track_peak(&current, &peak);
            std::thread::sleep(Duration::from_millis(40));
            current.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(());
        }));
    }

    receive_n(&mut finished, 6).await;
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak was {peak}");
}

#[tokio::test]
async fn zero_concurrency_limit_is_rejected() {
    let error = TokioExecutionContext::concurrent_with_limit("invalid", &Handle::current(), 0)
        .err()
        .unwrap();
    assert_eq!(error.kind, DispatchErrorKind::InvalidInput);
    assert_eq!(error.context, Some(ContextLabel::new("invalid")));
}
