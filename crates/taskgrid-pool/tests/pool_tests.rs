//! Pool lifecycle tests against fake workers.
//!
//! Workers here are in-process tasks speaking the wire protocol over a
//! socket pair, using the same handshake and framing a subprocess would,
//! without spawning one.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;

use taskgrid_core::config::{PoolConfig, WorkerRuntimeConfig};
use taskgrid_core::types::{ResourceVector, WorkerState};
use taskgrid_ledger::ResourceLedger;
use taskgrid_pool::{PoolError, PoolManager};
use taskgrid_proto::{Message, read_frame, write_frame};

fn worker_config(heartbeat_interval: &str, missed: u32) -> WorkerRuntimeConfig {
    WorkerRuntimeConfig {
        command: "false".to_string(),
        args: vec![],
        app_id: "test.app".to_string(),
        socket_dir: std::env::temp_dir(),
        startup_timeout: "2s".to_string(),
        heartbeat_interval: heartbeat_interval.to_string(),
        missed_heartbeats: missed,
        task_timeout: "5s".to_string(),
    }
}

fn manager(heartbeat_interval: &str, missed: u32) -> PoolManager {
    let ledger = Arc::new(ResourceLedger::new());
    let pools = vec![PoolConfig {
        name: "test".to_string(),
        count: 1,
        resources: ResourceVector::new(4.0, 1.0, 16.0),
        gpu_devices: vec![],
    }];
    PoolManager::new(worker_config(heartbeat_interval, missed), pools, ledger).unwrap()
}

/// Send the ready announcement for a fake worker.
async fn announce_ready(stream: &mut UnixStream, worker_id: &str, capability: ResourceVector) {
    let msg = Message::WorkerReady {
        worker_id: worker_id.to_string(),
        pid: 1000,
        cpus: capability.cpus,
        gpus: capability.gpus,
        memory_gb: capability.memory_gb,
    };
    write_frame(stream, &msg).await.unwrap();
}

/// A fake worker that answers every assignment by echoing its args.
async fn echo_worker(mut stream: UnixStream, worker_id: String, capability: ResourceVector) {
    announce_ready(&mut stream, &worker_id, capability).await;
    loop {
        match read_frame(&mut stream).await {
            Ok(Message::TaskAssignment { task_id, args, .. }) => {
                let reply = Message::TaskResult {
                    task_id,
                    success: true,
                    result: args,
                };
                write_frame(&mut stream, &reply).await.unwrap();
            }
            Ok(Message::Heartbeat { .. }) => {
                let reply = Message::Heartbeat {
                    worker_id: worker_id.clone(),
                };
                write_frame(&mut stream, &reply).await.unwrap();
            }
            Ok(Message::Shutdown { .. }) | Err(_) => break,
            Ok(_) => break,
        }
    }
}

#[tokio::test]
async fn adopt_registers_capability_in_ledger() {
    let manager = manager("5s", 3);
    let (ours, theirs) = UnixStream::pair().unwrap();

    let cap = ResourceVector::new(4.0, 1.0, 16.0);
    tokio::spawn(echo_worker(theirs, "test-0".to_string(), cap));

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();
    assert_eq!(handle.capability, cap);
    assert_eq!(handle.state(), WorkerState::Ready);
    assert_eq!(manager.worker_count().await, 1);
    assert_eq!(manager.ledger().available("test-0").unwrap(), cap);
}

#[tokio::test]
async fn adopt_without_ready_times_out() {
    let mut config = worker_config("5s", 3);
    config.startup_timeout = "100ms".to_string();
    let manager = PoolManager::new(config, vec![], Arc::new(ResourceLedger::new())).unwrap();

    let (ours, theirs) = UnixStream::pair().unwrap();
    // Fake worker connects but never announces.
    let _held = theirs;

    let result = manager.adopt("test-0", ours, None, None).await;
    assert!(matches!(result, Err(PoolError::StartupTimeout(_))));
    assert_eq!(manager.worker_count().await, 0);
}

#[tokio::test]
async fn adopt_rejects_wrong_first_message() {
    let manager = manager("5s", 3);
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    tokio::spawn(async move {
        let msg = Message::Heartbeat {
            worker_id: "test-0".to_string(),
        };
        write_frame(&mut theirs, &msg).await.unwrap();
    });

    let result = manager.adopt("test-0", ours, None, None).await;
    assert!(matches!(result, Err(PoolError::StartupFailed { .. })));
}

#[tokio::test]
async fn adopt_rejects_mismatched_worker_id() {
    let manager = manager("5s", 3);
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    tokio::spawn(async move {
        announce_ready(
            &mut theirs,
            "somebody-else",
            ResourceVector::new(1.0, 0.0, 1.0),
        )
        .await;
    });

    let result = manager.adopt("test-0", ours, None, None).await;
    assert!(matches!(result, Err(PoolError::StartupFailed { .. })));
}

#[tokio::test]
async fn execute_roundtrip() {
    let manager = manager("5s", 3);
    let (ours, theirs) = UnixStream::pair().unwrap();
    let cap = ResourceVector::new(4.0, 0.0, 16.0);
    tokio::spawn(echo_worker(theirs, "test-0".to_string(), cap));

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();

    let args = rmpv::Value::Map(vec![(
        rmpv::Value::from("x"),
        rmpv::Value::from(7u32),
    )]);
    let outcome = handle
        .execute("task-1", "app.echo", args.clone(), Duration::from_secs(2))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.result, args);
    assert_eq!(handle.in_flight(), 0);
}

#[tokio::test]
async fn replies_correlate_by_task_id_not_order() {
    let manager = manager("5s", 3);
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    // Worker that answers the two expected tasks in reverse order.
    tokio::spawn(async move {
        announce_ready(&mut theirs, "test-0", ResourceVector::new(4.0, 0.0, 16.0)).await;

        let mut assignments = Vec::new();
        for _ in 0..2 {
            match read_frame(&mut theirs).await.unwrap() {
                Message::TaskAssignment { task_id, .. } => assignments.push(task_id),
                other => panic!("unexpected: {other:?}"),
            }
        }

        for task_id in assignments.into_iter().rev() {
            let reply = Message::TaskResult {
                task_id: task_id.clone(),
                success: true,
                result: rmpv::Value::from(task_id.as_str()),
            };
            write_frame(&mut theirs, &reply).await.unwrap();
        }
    });

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();

    let first = handle.execute("task-a", "f", rmpv::Value::Nil, Duration::from_secs(2));
    let second = handle.execute("task-b", "f", rmpv::Value::Nil, Duration::from_secs(2));
    let (first, second) = tokio::join!(first, second);

    // Each waiter gets its own task's result despite the reversed send
    // order.
    assert_eq!(first.unwrap().result, rmpv::Value::from("task-a"));
    assert_eq!(second.unwrap().result, rmpv::Value::from("task-b"));
}

#[tokio::test]
async fn execute_times_out_and_discards_late_reply() {
    let manager = manager("5s", 3);
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    tokio::spawn(async move {
        announce_ready(&mut theirs, "test-0", ResourceVector::new(4.0, 0.0, 16.0)).await;

        // First task: sit on it until well past the caller's timeout,
        // then reply anyway.
        let first_id = match read_frame(&mut theirs).await.unwrap() {
            Message::TaskAssignment { task_id, .. } => task_id,
            other => panic!("unexpected: {other:?}"),
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        let late = Message::TaskResult {
            task_id: first_id,
            success: true,
            result: rmpv::Value::from("late"),
        };
        write_frame(&mut theirs, &late).await.unwrap();

        // Second task: answer immediately.
        if let Ok(Message::TaskAssignment { task_id, .. }) = read_frame(&mut theirs).await {
            let reply = Message::TaskResult {
                task_id,
                success: true,
                result: rmpv::Value::from("fresh"),
            };
            write_frame(&mut theirs, &reply).await.unwrap();
        }
    });

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();

    let result = handle
        .execute("task-slow", "f", rmpv::Value::Nil, Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(PoolError::TaskTimeout(_))));
    assert_eq!(handle.in_flight(), 0);

    // The late reply for task-slow must be discarded, and the
    // connection must remain usable for the next task.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcome = handle
        .execute("task-next", "f", rmpv::Value::Nil, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(outcome.result, rmpv::Value::from("fresh"));
}

#[tokio::test]
async fn failure_result_carried_through() {
    let manager = manager("5s", 3);
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    tokio::spawn(async move {
        announce_ready(&mut theirs, "test-0", ResourceVector::new(4.0, 0.0, 16.0)).await;
        if let Ok(Message::TaskAssignment { task_id, .. }) = read_frame(&mut theirs).await {
            let reply = Message::TaskResult {
                task_id,
                success: false,
                result: rmpv::Value::from("ValueError: bad input"),
            };
            write_frame(&mut theirs, &reply).await.unwrap();
        }
    });

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();
    let outcome = handle
        .execute("task-1", "f", rmpv::Value::Nil, Duration::from_secs(2))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.result, rmpv::Value::from("ValueError: bad input"));
}

#[tokio::test]
async fn connection_loss_fails_in_flight_and_reclaims_capacity() {
    let manager = manager("5s", 3);
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    tokio::spawn(async move {
        announce_ready(&mut theirs, "test-0", ResourceVector::new(4.0, 0.0, 16.0)).await;
        // Accept one assignment, then drop the connection.
        let _ = read_frame(&mut theirs).await;
        drop(theirs);
    });

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();
    let ledger = manager.ledger();
    assert!(ledger.try_reserve("test-0", &ResourceVector::new(2.0, 0.0, 8.0)));

    let result = handle
        .execute("task-1", "f", rmpv::Value::Nil, Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(PoolError::WorkerLost(_))));
    assert_eq!(handle.state(), WorkerState::Dead);

    // The ledger entry is gone, along with its allocation.
    assert!(ledger.available("test-0").is_none());

    // The next supervision pass removes the dead worker from the pool.
    manager.supervise_once().await;
    assert_eq!(manager.worker_count().await, 0);
}

#[tokio::test]
async fn heartbeat_timeout_fails_two_in_flight_tasks() {
    // 50ms heartbeat interval, lost after 2 missed beats.
    let manager = Arc::new(manager("50ms", 2));
    let (ours, mut theirs) = UnixStream::pair().unwrap();

    // Worker that announces, then goes completely silent.
    tokio::spawn(async move {
        announce_ready(&mut theirs, "test-0", ResourceVector::new(4.0, 1.0, 16.0)).await;
        loop {
            if read_frame(&mut theirs).await.is_err() {
                break;
            }
            // Never reply to anything.
        }
    });

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();
    let ledger = manager.ledger();
    assert!(ledger.try_reserve("test-0", &ResourceVector::new(1.0, 0.5, 4.0)));
    assert!(ledger.try_reserve("test-0", &ResourceVector::new(1.0, 0.5, 4.0)));

    let h1 = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move {
            handle
                .execute("task-1", "f", rmpv::Value::Nil, Duration::from_secs(5))
                .await
        })
    };
    let h2 = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move {
            handle
                .execute("task-2", "f", rmpv::Value::Nil, Duration::from_secs(5))
                .await
        })
    };

    // Wait past the heartbeat deadline, then supervise.
    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.supervise_once().await;

    let r1 = h1.await.unwrap();
    let r2 = h2.await.unwrap();
    assert!(matches!(r1, Err(PoolError::WorkerLost(_))), "got {r1:?}");
    assert!(matches!(r2, Err(PoolError::WorkerLost(_))), "got {r2:?}");

    // Full capability reclaimed: the worker no longer appears at all.
    assert!(ledger.available("test-0").is_none());
    assert_eq!(ledger.snapshot().total, ResourceVector::ZERO);
    assert_eq!(manager.worker_count().await, 0);
}

#[tokio::test]
async fn responsive_worker_survives_supervision() {
    let manager = manager("50ms", 2);
    let (ours, theirs) = UnixStream::pair().unwrap();
    tokio::spawn(echo_worker(
        theirs,
        "test-0".to_string(),
        ResourceVector::new(4.0, 0.0, 16.0),
    ));

    let _handle = manager.adopt("test-0", ours, None, None).await.unwrap();

    // Several supervision passes with heartbeat replies in between.
    for _ in 0..4 {
        manager.supervise_once().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert_eq!(manager.worker_count().await, 1);
    assert!(manager.ledger().available("test-0").is_some());
}

#[tokio::test]
async fn drain_excludes_worker_and_retires_when_idle() {
    let manager = manager("5s", 3);
    let (ours, theirs) = UnixStream::pair().unwrap();
    let cap = ResourceVector::new(4.0, 0.0, 16.0);
    tokio::spawn(echo_worker(theirs, "test-0".to_string(), cap));

    let handle = manager.adopt("test-0", ours, None, None).await.unwrap();
    manager.drain("test-0").await.unwrap();
    assert_eq!(handle.state(), WorkerState::Draining);

    // Draining workers accept no new reservations but still count
    // toward cluster capacity.
    let ledger = manager.ledger();
    assert!(!ledger.try_reserve("test-0", &ResourceVector::new(1.0, 0.0, 1.0)));
    assert_eq!(ledger.snapshot().total, cap);

    // Nothing in flight: the next pass retires it.
    manager.supervise_once().await;
    assert_eq!(manager.worker_count().await, 0);
    assert_eq!(ledger.snapshot().total, ResourceVector::ZERO);
}

#[tokio::test]
async fn drain_unknown_worker_errors() {
    let manager = manager("5s", 3);
    assert!(matches!(
        manager.drain("ghost").await,
        Err(PoolError::UnknownWorker(_))
    ));
}

#[tokio::test]
async fn shutdown_all_clears_pool() {
    let manager = manager("5s", 3);
    let (ours, theirs) = UnixStream::pair().unwrap();
    tokio::spawn(echo_worker(
        theirs,
        "test-0".to_string(),
        ResourceVector::new(4.0, 0.0, 16.0),
    ));

    manager.adopt("test-0", ours, None, None).await.unwrap();
    manager.shutdown_all().await;

    assert_eq!(manager.worker_count().await, 0);
    assert!(manager.ledger().is_empty());
}
