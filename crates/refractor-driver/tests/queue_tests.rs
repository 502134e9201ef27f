//! 命令队列顺序性与故障策略测试

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use refractor_driver::{
    Command, CommandError, CommandOutcome, CommandQueue, DriverError, ErrorKind, ExecutionLog,
    FaultPolicy, MemoryReporter, QueueConfig, WorkerStatus,
};
use refractor_gpio::GpioError;

const FLUSH: Duration = Duration::from_secs(10);

fn queue_with(policy: FaultPolicy) -> (Arc<MemoryReporter>, Arc<ExecutionLog>, CommandQueue) {
    let reporter = MemoryReporter::new();
    let queue = CommandQueue::with_config(
        reporter.clone(),
        QueueConfig {
            fault_policy: policy,
            ..QueueConfig::default()
        },
    )
    .unwrap();
    let log = ExecutionLog::new();
    queue.add_observer(log.clone());
    (reporter, log, queue)
}

fn hardware_fault() -> CommandError {
    CommandError::from(GpioError::Injected(17))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_commands_run_in_submission_order_without_overlap(
        durations in prop::collection::vec(0u64..300, 1..20)
    ) {
        let (_reporter, log, queue) = queue_with(FaultPolicy::Continue);
        let running = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));

        for (i, micros) in durations.iter().copied().enumerate() {
            let running = running.clone();
            let overlaps = overlaps.clone();
            queue.submit(Command::new(format!("cmd-{i}"), move || {
                if running.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(micros));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })).unwrap();
        }
        queue.flush(FLUSH).unwrap();

        let expected: Vec<String> = (0..durations.len()).map(|i| format!("cmd-{i}")).collect();
        prop_assert_eq!(log.names(), expected);
        prop_assert_eq!(overlaps.load(Ordering::SeqCst), 0);

        let records = log.records();
        for pair in records.windows(2) {
            prop_assert!(pair[0].finished_at <= pair[1].started_at);
        }
    }
}

#[test]
fn test_continue_policy_survives_hardware_fault() {
    let (reporter, log, queue) = queue_with(FaultPolicy::Continue);

    queue.submit(Command::new("home", || Err(hardware_fault()))).unwrap();
    queue.submit(Command::new("open", || Ok(()))).unwrap();
    queue.flush(FLUSH).unwrap();

    assert_eq!(log.names(), vec!["home", "open"]);
    assert_eq!(
        log.records()[0].outcome,
        CommandOutcome::Failed(ErrorKind::HardwareFault)
    );
    assert!(reporter.contains("ERROR (home): hardware fault"));
    assert_eq!(queue.status(), WorkerStatus::Running);
}

#[test]
fn test_stop_policy_halts_on_hardware_fault() {
    let (reporter, log, queue) = queue_with(FaultPolicy::StopOnFault);

    queue.submit(Command::new("close", || Err(hardware_fault()))).unwrap();
    queue.submit(Command::new("open", || Ok(()))).unwrap();

    assert!(matches!(queue.flush(FLUSH), Err(DriverError::WorkerStopped)));
    assert_eq!(log.names(), vec!["close"]);
    assert!(reporter.contains("FATAL: close"));

    match queue.status() {
        WorkerStatus::Stopped { reason } => assert!(reason.starts_with("close")),
        WorkerStatus::Running => panic!("worker should have stopped"),
    }
    assert!(matches!(
        queue.submit(Command::new("open", || Ok(()))),
        Err(DriverError::WorkerStopped)
    ));
}

#[test]
fn test_stop_policy_survives_recoverable_errors() {
    let (reporter, log, queue) = queue_with(FaultPolicy::StopOnFault);

    queue
        .submit(Command::new("centroid", || {
            Err(CommandError::user("No exposure found"))
        }))
        .unwrap();
    queue
        .submit(Command::new("expose", || {
            Err(CommandError::external("capture", "exited with status 1"))
        }))
        .unwrap();
    queue
        .submit(Command::new("home", || Err(DriverError::Cancelled.into())))
        .unwrap();
    queue.submit(Command::new("open", || Ok(()))).unwrap();
    queue.flush(FLUSH).unwrap();

    assert_eq!(log.names(), vec!["centroid", "expose", "home", "open"]);
    assert!(reporter.contains("No exposure found"));
    assert!(reporter.contains("home cancelled"));
    assert!(queue.is_running());

    let metrics = queue.metrics();
    assert_eq!(metrics.failed, 2);
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.completed, 1);
}

#[test]
fn test_panic_is_contained_under_continue_policy() {
    let (reporter, log, queue) = queue_with(FaultPolicy::Continue);

    queue
        .submit(Command::new("view", || panic!("viewer exploded")))
        .unwrap();
    queue.submit(Command::new("open", || Ok(()))).unwrap();
    queue.flush(FLUSH).unwrap();

    assert_eq!(log.names(), vec!["view", "open"]);
    assert_eq!(log.records()[0].outcome, CommandOutcome::Panicked);
    assert!(reporter.contains("viewer exploded"));
    assert_eq!(queue.metrics().panicked, 1);
    assert!(queue.is_running());
}

#[test]
fn test_panic_stops_worker_under_stop_policy() {
    let (_reporter, _log, queue) = queue_with(FaultPolicy::StopOnFault);

    queue
        .submit(Command::new("view", || panic!("viewer exploded")))
        .unwrap();
    assert!(matches!(queue.flush(FLUSH), Err(DriverError::WorkerStopped)));
    assert!(!queue.is_running());
}

#[test]
fn test_cancel_current_stops_running_command_only() {
    let (_reporter, log, queue) = queue_with(FaultPolicy::Continue);
    let token = queue.cancel_token();
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);

    let t = token.clone();
    queue
        .submit(Command::new("expose", move || {
            let _ = started_tx.send(());
            loop {
                t.check()?;
                thread::sleep(Duration::from_millis(1));
            }
        }))
        .unwrap();
    queue.submit(Command::new("view", || Ok(()))).unwrap();

    started_rx.recv_timeout(FLUSH).unwrap();
    queue.cancel_current();
    queue.flush(FLUSH).unwrap();

    let records = log.records();
    assert_eq!(records[0].outcome, CommandOutcome::Failed(ErrorKind::Cancelled));
    assert_eq!(records[1].outcome, CommandOutcome::Completed);
}
