//! Exercises the Lifecycle Manager / Agent Manager against real OS
//! processes, covering the testable properties named in the design: the
//! happy-path start/stop cycle, process-lost reconciliation, idempotent
//! start/stop, and force-stop of an already-dead PID. Uses `true` and
//! `sleep` as stand-ins for a real `agent-worker` binary — the state
//! machine under test only cares about PID liveness, never about what the
//! child actually does.

mod support;

use fleetctl::lifecycle::manager::{LifecycleManager, StepOutcome};
use fleetctl::process::SpawnSpec;
use fleetctl::status::{ProcessKey, StatusKind, StatusStore};
use std::sync::Arc;
use std::time::Duration;

fn spec(argv: Vec<String>) -> SpawnSpec {
    SpawnSpec {
        argv,
        working_dir: None,
        env: Vec::new(),
    }
}

#[tokio::test]
async fn happy_path_start_then_stop() {
    let Some(bus) = support::connect_test_bus().await else {
        eprintln!("skipping: no redis reachable at {}", support::redis_url());
        return;
    };
    let status = Arc::new(StatusStore::new(bus));
    let manager = LifecycleManager::new(Arc::clone(&status));
    let key = ProcessKey::agent("happy-path-a1");

    let outcome = manager.start(&key, &spec(support::long_lived_argv(30))).await;
    let pid = match outcome {
        StepOutcome::Started { pid } => pid,
        other => panic!("expected Started, got {other:?}"),
    };

    let record = status.get(&key).await.unwrap();
    assert_eq!(record.status, StatusKind::Running);
    assert_eq!(record.pid, Some(pid));

    let outcome = manager.stop(&key, false).await;
    assert_eq!(outcome, StepOutcome::Stopped);

    let record = status.get(&key).await.unwrap();
    assert_eq!(record.status, StatusKind::Stopped);
    assert!(record.pid.is_none());

    status.delete(&key).await.unwrap();
}

#[tokio::test]
async fn starting_an_already_running_agent_is_idempotent() {
    let Some(bus) = support::connect_test_bus().await else {
        eprintln!("skipping: no redis reachable at {}", support::redis_url());
        return;
    };
    let status = Arc::new(StatusStore::new(bus));
    let manager = LifecycleManager::new(Arc::clone(&status));
    let key = ProcessKey::agent("idempotent-start-a1");

    let first = manager.start(&key, &spec(support::long_lived_argv(30))).await;
    let StepOutcome::Started { pid: first_pid } = first else {
        panic!("expected Started, got {first:?}")
    };

    // A second start against the same key must not spawn a duplicate
    // process: at most one live process per key.
    let second = manager.start(&key, &spec(support::long_lived_argv(30))).await;
    assert_eq!(second, StepOutcome::AlreadyRunning);

    let record = status.get(&key).await.unwrap();
    assert_eq!(record.pid, Some(first_pid));

    manager.stop(&key, true).await;
    status.delete(&key).await.unwrap();
}

#[tokio::test]
async fn a_pid_killed_externally_is_reconciled_to_process_lost_on_read() {
    let Some(bus) = support::connect_test_bus().await else {
        eprintln!("skipping: no redis reachable at {}", support::redis_url());
        return;
    };
    let status = Arc::new(StatusStore::new(bus));
    let manager = LifecycleManager::new(Arc::clone(&status));
    let key = ProcessKey::agent("process-lost-a1");

    let StepOutcome::Started { pid } = manager.start(&key, &spec(support::long_lived_argv(30))).await else {
        panic!("expected Started");
    };

    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
    // Give the OS a moment to reap the process so `kill(pid, 0)` reliably
    // reports it gone.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let record = status.get(&key).await.unwrap();
    assert_eq!(record.status, StatusKind::ErrorProcessLost);
    assert!(record.pid.is_none());

    status.delete(&key).await.unwrap();
}

#[tokio::test]
async fn stopping_an_already_stopped_agent_is_a_noop() {
    let Some(bus) = support::connect_test_bus().await else {
        eprintln!("skipping: no redis reachable at {}", support::redis_url());
        return;
    };
    let status = Arc::new(StatusStore::new(bus));
    let manager = LifecycleManager::new(Arc::clone(&status));
    let key = ProcessKey::agent("already-stopped-a1");

    // Never started: stop against a not_found key is still a success no-op.
    let outcome = manager.stop(&key, false).await;
    assert_eq!(outcome, StepOutcome::AlreadyStopped);

    manager.start(&key, &spec(support::quick_exit_argv())).await;
    manager.stop(&key, false).await;

    let outcome = manager.stop(&key, false).await;
    assert_eq!(outcome, StepOutcome::AlreadyStopped);

    status.delete(&key).await.unwrap();
}

#[tokio::test]
async fn force_stopping_a_pid_that_no_longer_exists_is_a_noop() {
    let Some(bus) = support::connect_test_bus().await else {
        eprintln!("skipping: no redis reachable at {}", support::redis_url());
        return;
    };
    let status = Arc::new(StatusStore::new(bus));
    let manager = LifecycleManager::new(Arc::clone(&status));
    let key = ProcessKey::agent("force-stop-dead-pid-a1");

    let StepOutcome::Started { pid } = manager.start(&key, &spec(support::quick_exit_argv())).await else {
        panic!("expected Started");
    };
    // `true` exits almost immediately on its own; give it time to die
    // without anyone having told the status store yet.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!fleetctl::status::is_pid_alive(pid));

    let outcome = manager.stop(&key, true).await;
    assert_eq!(outcome, StepOutcome::AlreadyStopped);

    let record = status.get(&key).await.unwrap();
    assert_eq!(record.status, StatusKind::Stopped);

    status.delete(&key).await.unwrap();
}

#[tokio::test]
async fn restart_never_leaves_an_observer_seeing_not_found() {
    let Some(bus) = support::connect_test_bus().await else {
        eprintln!("skipping: no redis reachable at {}", support::redis_url());
        return;
    };
    let status = Arc::new(StatusStore::new(bus));
    let manager = LifecycleManager::new(Arc::clone(&status));
    let key = ProcessKey::agent("restart-atomicity-a1");

    manager.start(&key, &spec(support::long_lived_argv(30))).await;

    let watch_status = Arc::clone(&status);
    let watch_key = key.clone();
    let watcher = tokio::spawn(async move {
        let mut saw_not_found = false;
        for _ in 0..20 {
            let record = watch_status.get(&watch_key).await.unwrap();
            if record.status == StatusKind::NotFound {
                saw_not_found = true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        saw_not_found
    });

    let outcome = manager.restart(&key, &spec(support::long_lived_argv(30))).await;
    let saw_not_found = watcher.await.unwrap();

    assert!(!saw_not_found, "an observer saw not_found mid-restart");
    match outcome {
        StepOutcome::Restarted { .. } => {}
        other => panic!("expected Restarted, got {other:?}"),
    }

    manager.stop(&key, true).await;
    status.delete(&key).await.unwrap();
}
