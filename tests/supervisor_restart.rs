//! Supervisor retries failed sessions and stops on shutdown requests.

mod common;

use std::thread;
use std::time::Duration;

use simstream::capture::{SyntheticConnector, SyntheticOptions};
use simstream::pipeline::ShutdownRequest;
use simstream::supervisor::{Supervisor, SupervisorExit};

use common::{init_test_tracing, test_config, MockLauncher};

#[test]
fn reconnects_after_failures_then_terminates() {
    init_test_tracing();
    let config = test_config();
    let launcher = MockLauncher::new(Some(Duration::ZERO));
    let connector =
        SyntheticConnector::new(SyntheticOptions::from_config(&config.source)).failing_first(2);

    let (tx, rx) = flume::unbounded();
    let mut supervisor = Supervisor::new(connector, launcher.clone(), config, rx);
    let handle = thread::spawn(move || {
        let exit = supervisor.run();
        (exit, supervisor)
    });

    assert!(launcher.recording.wait_for(5, Duration::from_secs(5)));
    tx.send(ShutdownRequest::Terminate).unwrap();

    let (exit, supervisor) = handle.join().unwrap();
    assert_eq!(exit, SupervisorExit::Terminated);
    assert_eq!(supervisor.connector().attempts(), 3);
    assert_eq!(launcher.log.launches(), 1);
}

#[test]
fn failed_session_is_restarted_from_scratch() {
    init_test_tracing();
    let config = test_config();
    let mut launcher = MockLauncher::new(Some(Duration::ZERO));
    launcher.fail_after = Some(3);
    let connector = SyntheticConnector::new(SyntheticOptions::from_config(&config.source));

    let (tx, rx) = flume::unbounded();
    let mut supervisor = Supervisor::new(connector, launcher.clone(), config, rx);
    let handle = thread::spawn(move || supervisor.run());

    // the pipe breaks after three writes; each restart gets a new encoder
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while launcher.log.launches() < 2 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    tx.send(ShutdownRequest::Interrupt).unwrap();

    assert_eq!(handle.join().unwrap(), SupervisorExit::Interrupted);
    assert!(launcher.log.launches() >= 2);
}

#[test]
fn interrupt_during_backoff_stops_without_retry() {
    init_test_tracing();
    let mut config = test_config();
    config.supervisor.initial_backoff_ms = 10_000;
    let connector =
        SyntheticConnector::new(SyntheticOptions::from_config(&config.source)).failing_first(100);

    let (tx, rx) = flume::unbounded();
    let mut supervisor = Supervisor::new(connector, MockLauncher::new(None), config, rx);
    let handle = thread::spawn(move || {
        let exit = supervisor.run();
        (exit, supervisor)
    });

    thread::sleep(Duration::from_millis(100));
    tx.send(ShutdownRequest::Interrupt).unwrap();

    let (exit, supervisor) = handle.join().unwrap();
    assert_eq!(exit, SupervisorExit::Interrupted);
    assert_eq!(supervisor.connector().attempts(), 1);
}
