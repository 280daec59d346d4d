//! Per-worker connection handle.
//!
//! A [`WorkerHandle`] owns one worker's socket: writes are serialized
//! through a mutex on the write half, and a dedicated reader task owns
//! the read half, correlating `TaskResult` frames to waiting callers by
//! task id. Replies may arrive in any order, since a worker with
//! fractional reservations can hold several tasks at once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use taskgrid_core::types::{ResourceVector, TaskId, WorkerId, WorkerState};
use taskgrid_ledger::ResourceLedger;
use taskgrid_proto::{Message, read_frame, write_frame};

use crate::error::PoolError;

/// A worker's answer to one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub result: rmpv::Value,
}

type ReplySender = oneshot::Sender<Result<TaskOutcome, PoolError>>;

/// Owns one worker process's connection and lifecycle state.
pub struct WorkerHandle {
    pub worker_id: WorkerId,
    pub pid: u32,
    /// Declared at `WorkerReady` time; fixed for the worker's lifetime.
    pub capability: ResourceVector,
    state: Mutex<WorkerState>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    in_flight: Mutex<HashMap<TaskId, ReplySender>>,
    last_heartbeat: Mutex<Instant>,
    process: Mutex<Option<Child>>,
    socket_path: Option<PathBuf>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        worker_id: WorkerId,
        pid: u32,
        capability: ResourceVector,
        writer: OwnedWriteHalf,
        process: Option<Child>,
        socket_path: Option<PathBuf>,
    ) -> Self {
        Self {
            worker_id,
            pid,
            capability,
            state: Mutex::new(WorkerState::Ready),
            writer: tokio::sync::Mutex::new(writer),
            in_flight: Mutex::new(HashMap::new()),
            last_heartbeat: Mutex::new(Instant::now()),
            process: Mutex::new(process),
            socket_path,
            reader: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().expect("state lock")
    }

    pub fn set_state(&self, state: WorkerState) {
        *self.state.lock().expect("state lock") = state;
    }

    /// Number of tasks currently awaiting results from this worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().expect("in-flight lock").len()
    }

    /// Time since the last heartbeat (or readiness) was observed.
    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().expect("heartbeat lock").elapsed()
    }

    pub(crate) fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().expect("heartbeat lock") = Instant::now();
    }

    /// Send a task and await its correlated result.
    ///
    /// The caller must already hold a committed reservation; no ledger
    /// lock is held across this I/O. On timeout the waiting is
    /// cancelled, not the remote execution; a late reply for this task
    /// id is discarded by the reader.
    pub async fn execute(
        &self,
        task_id: &str,
        function_name: &str,
        args: rmpv::Value,
        timeout: Duration,
    ) -> Result<TaskOutcome, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.in_flight
            .lock()
            .expect("in-flight lock")
            .insert(task_id.to_string(), tx);

        let assignment = Message::TaskAssignment {
            task_id: task_id.to_string(),
            function_name: function_name.to_string(),
            args,
        };

        if let Err(err) = self.send(&assignment).await {
            self.in_flight.lock().expect("in-flight lock").remove(task_id);
            warn!(
                worker_id = %self.worker_id,
                %task_id,
                error = %err,
                "failed to send task assignment"
            );
            return Err(PoolError::WorkerLost(self.worker_id.clone()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Reply channel dropped: the worker was torn down.
            Ok(Err(_)) => Err(PoolError::WorkerLost(self.worker_id.clone())),
            Err(_) => {
                // Stop tracking so a late reply is discarded.
                self.in_flight.lock().expect("in-flight lock").remove(task_id);
                Err(PoolError::TaskTimeout(task_id.to_string()))
            }
        }
    }

    /// Write one frame to the worker. Writes are serialized per
    /// connection, so frames never interleave.
    pub(crate) async fn send(&self, msg: &Message) -> Result<(), PoolError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, msg).await?;
        Ok(())
    }

    pub(crate) async fn send_heartbeat(&self) -> Result<(), PoolError> {
        self.send(&Message::Heartbeat {
            worker_id: self.worker_id.clone(),
        })
        .await
    }

    pub(crate) async fn send_shutdown(&self, graceful: bool) -> Result<(), PoolError> {
        self.send(&Message::Shutdown { graceful }).await
    }

    /// Mark the worker dead and fail every in-flight task with
    /// `WorkerLost`. Returns false if it was already dead.
    pub(crate) fn mark_lost(&self) -> bool {
        {
            let mut state = self.state.lock().expect("state lock");
            if *state == WorkerState::Dead {
                return false;
            }
            *state = WorkerState::Dead;
        }

        let pending: Vec<(TaskId, ReplySender)> = self
            .in_flight
            .lock()
            .expect("in-flight lock")
            .drain()
            .collect();

        for (task_id, tx) in pending {
            debug!(worker_id = %self.worker_id, %task_id, "failing in-flight task, worker lost");
            let _ = tx.send(Err(PoolError::WorkerLost(self.worker_id.clone())));
        }
        true
    }

    /// Force-terminate the worker process, if one is attached.
    pub(crate) fn kill_process(&self) {
        let mut process = self.process.lock().expect("process lock");
        if let Some(child) = process.as_mut() {
            let _ = child.start_kill();
        }
        *process = None;
    }

    /// Non-blocking check for an unexpected process exit.
    pub(crate) fn process_exited(&self) -> bool {
        let mut process = self.process.lock().expect("process lock");
        match process.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(_)) | Err(_) => {
                    *process = None;
                    true
                }
                Ok(None) => false,
            },
            None => false,
        }
    }

    /// Wait for the process to exit after a graceful shutdown request,
    /// killing it if the deadline passes.
    pub(crate) async fn await_exit(&self, deadline: Duration) {
        let child = self.process.lock().expect("process lock").take();
        if let Some(mut child) = child {
            if tokio::time::timeout(deadline, child.wait()).await.is_err() {
                warn!(worker_id = %self.worker_id, "worker ignored shutdown, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }

    /// Spawn the reader task that owns this connection's read half.
    ///
    /// The reader routes `TaskResult` frames to waiting callers and
    /// records heartbeat replies. Any protocol error or EOF tears the
    /// worker down: in-flight tasks fail and the ledger entry is
    /// removed so its capacity returns to the cluster.
    pub(crate) fn spawn_reader(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        ledger: Arc<ResourceLedger>,
    ) {
        let handle = Arc::clone(&self);
        let task = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Message::TaskResult {
                        task_id,
                        success,
                        result,
                    }) => {
                        let waiter = handle
                            .in_flight
                            .lock()
                            .expect("in-flight lock")
                            .remove(&task_id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(Ok(TaskOutcome { success, result }));
                            }
                            None => {
                                // Task no longer tracked (timed out).
                                debug!(
                                    worker_id = %handle.worker_id,
                                    %task_id,
                                    "discarding late result"
                                );
                            }
                        }
                    }
                    Ok(Message::Heartbeat { .. }) => {
                        handle.touch_heartbeat();
                    }
                    Ok(other) => {
                        warn!(
                            worker_id = %handle.worker_id,
                            variant = other.variant_name(),
                            "unexpected message from worker, closing connection"
                        );
                        break;
                    }
                    Err(err) => {
                        if handle.state() != WorkerState::Dead {
                            debug!(
                                worker_id = %handle.worker_id,
                                error = %err,
                                "worker connection closed"
                            );
                        }
                        break;
                    }
                }
            }

            // Connection gone: fail outstanding work and reclaim
            // capacity. Registry removal happens on the next
            // supervision pass.
            if handle.mark_lost() {
                ledger.remove(&handle.worker_id);
            }
        });

        *self.reader.lock().expect("reader lock") = Some(task);
    }

    pub(crate) fn abort_reader(&self) {
        if let Some(task) = self.reader.lock().expect("reader lock").take() {
            task.abort();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Remove the socket file this worker connected through.
        if let Some(path) = &self.socket_path {
            let _ = std::fs::remove_file(path);
        }
    }
}
