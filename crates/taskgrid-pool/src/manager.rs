//! Pool manager — spawning, registry, and heartbeat supervision.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use taskgrid_core::config::{PoolConfig, WorkerRuntimeConfig};
use taskgrid_core::types::{ResourceVector, WorkerId, WorkerState};
use taskgrid_ledger::ResourceLedger;
use taskgrid_proto::{Message, read_frame};

use crate::error::PoolError;
use crate::handle::WorkerHandle;

/// How long a draining or shutting-down worker gets to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Spawns, registers, supervises, and removes workers.
///
/// The registry here and the [`ResourceLedger`] are the only
/// cluster-wide mutable state; both are mutated exclusively through
/// this type's narrow surface.
pub struct PoolManager {
    worker_config: WorkerRuntimeConfig,
    pools: Vec<PoolConfig>,
    ledger: Arc<ResourceLedger>,
    workers: RwLock<HashMap<WorkerId, Arc<WorkerHandle>>>,
    heartbeat_interval: Duration,
    missed_heartbeats: u32,
}

impl PoolManager {
    pub fn new(
        worker_config: WorkerRuntimeConfig,
        pools: Vec<PoolConfig>,
        ledger: Arc<ResourceLedger>,
    ) -> Result<Self, PoolError> {
        let heartbeat_interval = worker_config
            .heartbeat_interval()
            .map_err(|e| PoolError::InvalidConfig(e.to_string()))?;
        let missed_heartbeats = worker_config.missed_heartbeats;

        Ok(Self {
            worker_config,
            pools,
            ledger,
            workers: RwLock::new(HashMap::new()),
            heartbeat_interval,
            missed_heartbeats,
        })
    }

    pub fn ledger(&self) -> Arc<ResourceLedger> {
        Arc::clone(&self.ledger)
    }

    /// Spawn every configured pool's workers.
    ///
    /// Individual startup failures are logged and skipped (a slot
    /// failure is not fatal for the pool), but a pool that ends up
    /// empty is an error.
    pub async fn start(&self) -> Result<(), PoolError> {
        let total: usize = self.pools.iter().map(|p| p.count).sum();
        info!(
            workers = total,
            pools = self.pools.len(),
            "starting worker pools"
        );

        for pool in self.pools.clone() {
            info!(
                pool = %pool.name,
                count = pool.count,
                cpus = pool.resources.cpus,
                gpus = pool.resources.gpus,
                memory_gb = pool.resources.memory_gb,
                "spawning pool"
            );
            for index in 0..pool.count {
                let worker_id = format!("{}-{}", pool.name, index);
                if let Err(err) = self.spawn_worker(&pool, &worker_id, index).await {
                    warn!(%worker_id, error = %err, "worker startup failed");
                }
            }
        }

        let started = self.worker_count().await;
        info!(workers = started, "worker pools started");
        if started == 0 {
            return Err(PoolError::NoWorkersStarted);
        }
        Ok(())
    }

    /// Spawn one worker subprocess and run the ready handshake.
    pub async fn spawn_worker(
        &self,
        pool: &PoolConfig,
        worker_id: &str,
        index: usize,
    ) -> Result<(), PoolError> {
        let socket_path = self
            .worker_config
            .socket_dir
            .join(format!("taskgrid-{worker_id}.sock"));

        // Stale socket from a previous run.
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;

        let mut cmd = tokio::process::Command::new(&self.worker_config.command);
        cmd.args(&self.worker_config.args)
            .arg(&socket_path)
            .arg(worker_id)
            .arg(&self.worker_config.app_id)
            .arg(pool.resources.cpus.to_string())
            .arg(pool.resources.gpus.to_string())
            .arg(pool.resources.memory_gb.to_string())
            .kill_on_drop(true);

        // Accelerator isolation: pin the worker to its assigned devices,
        // or hide them all from CPU-only pools.
        if !pool.gpu_devices.is_empty() && pool.resources.gpus > 0.0 {
            let device = pool.gpu_devices[index % pool.gpu_devices.len()];
            cmd.env("CUDA_VISIBLE_DEVICES", device.to_string());
        } else if pool.resources.gpus == 0.0 {
            cmd.env("CUDA_VISIBLE_DEVICES", "");
        }

        let process = cmd.spawn()?;
        debug!(%worker_id, pid = process.id(), "worker process spawned");

        let startup_timeout = self
            .worker_config
            .startup_timeout()
            .unwrap_or(Duration::from_secs(10));

        let (stream, _addr) =
            match tokio::time::timeout(startup_timeout, listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(err)) => {
                    return Err(PoolError::StartupFailed {
                        worker_id: worker_id.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(_) => return Err(PoolError::StartupTimeout(worker_id.to_string())),
            };

        self.adopt(worker_id, stream, Some(process), Some(socket_path))
            .await?;
        Ok(())
    }

    /// Register an already-connected worker after running the ready
    /// handshake on its stream.
    ///
    /// The spawn path lands here after accepting the subprocess's
    /// connection; in-process harnesses and tests hand over their end
    /// of a socket pair directly.
    pub async fn adopt(
        &self,
        worker_id: &str,
        mut stream: UnixStream,
        process: Option<tokio::process::Child>,
        socket_path: Option<PathBuf>,
    ) -> Result<Arc<WorkerHandle>, PoolError> {
        let startup_timeout = self
            .worker_config
            .startup_timeout()
            .unwrap_or(Duration::from_secs(10));

        let ready = tokio::time::timeout(startup_timeout, read_frame(&mut stream))
            .await
            .map_err(|_| PoolError::StartupTimeout(worker_id.to_string()))??;

        let (announced_id, pid, capability) = match ready {
            Message::WorkerReady {
                worker_id,
                pid,
                cpus,
                gpus,
                memory_gb,
            } => (worker_id, pid, ResourceVector::new(cpus, gpus, memory_gb)),
            other => {
                return Err(PoolError::StartupFailed {
                    worker_id: worker_id.to_string(),
                    reason: format!("expected WorkerReady, got {}", other.variant_name()),
                });
            }
        };

        if announced_id != worker_id {
            return Err(PoolError::StartupFailed {
                worker_id: worker_id.to_string(),
                reason: format!("worker announced id {announced_id:?}"),
            });
        }

        info!(
            %worker_id,
            pid,
            cpus = capability.cpus,
            gpus = capability.gpus,
            memory_gb = capability.memory_gb,
            "worker ready"
        );

        let (read_half, write_half) = stream.into_split();
        let handle = Arc::new(WorkerHandle::new(
            worker_id.to_string(),
            pid,
            capability,
            write_half,
            process,
            socket_path,
        ));

        // Capacity becomes schedulable before the reader starts, so a
        // reservation can never precede registration.
        self.ledger.register(worker_id, capability);
        Arc::clone(&handle).spawn_reader(read_half, Arc::clone(&self.ledger));

        self.workers
            .write()
            .await
            .insert(worker_id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub async fn worker(&self, worker_id: &str) -> Option<Arc<WorkerHandle>> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Operator-initiated drain: in-flight tasks finish, no new
    /// reservations land. The worker exits once its last task resolves.
    pub async fn drain(&self, worker_id: &str) -> Result<(), PoolError> {
        let handle = self
            .worker(worker_id)
            .await
            .ok_or_else(|| PoolError::UnknownWorker(worker_id.to_string()))?;

        handle.set_state(WorkerState::Draining);
        self.ledger.set_state(worker_id, WorkerState::Draining);
        info!(%worker_id, in_flight = handle.in_flight(), "worker draining");
        Ok(())
    }

    /// Explicit operator respawn of a dead slot. Never happens
    /// automatically, so crash loops stay visible.
    pub async fn respawn(&self, worker_id: &str) -> Result<(), PoolError> {
        if self.worker(worker_id).await.is_some() {
            return Err(PoolError::StartupFailed {
                worker_id: worker_id.to_string(),
                reason: "worker is still registered".to_string(),
            });
        }

        let (pool, index) = self
            .slot_for(worker_id)
            .ok_or_else(|| PoolError::UnknownWorker(worker_id.to_string()))?;
        self.spawn_worker(&pool, worker_id, index).await
    }

    /// One supervision pass: detect dead and stale workers, complete
    /// drains, and heartbeat the rest.
    ///
    /// The background loop calls this every heartbeat interval; tests
    /// call it directly.
    pub async fn supervise_once(&self) {
        let handles: Vec<Arc<WorkerHandle>> =
            self.workers.read().await.values().cloned().collect();

        let stale_after = self.heartbeat_interval * self.missed_heartbeats;

        for handle in handles {
            match handle.state() {
                WorkerState::Dead => {
                    // Reader already failed in-flight tasks and
                    // reclaimed the ledger entry; finish the removal.
                    self.remove_worker(&handle).await;
                }
                WorkerState::Ready | WorkerState::Draining => {
                    if handle.process_exited() {
                        warn!(worker_id = %handle.worker_id, "worker process exited unexpectedly");
                        self.fail_worker(&handle).await;
                        continue;
                    }

                    if handle.heartbeat_age() > stale_after {
                        warn!(
                            worker_id = %handle.worker_id,
                            missed = self.missed_heartbeats,
                            "heartbeat timeout, declaring worker lost"
                        );
                        self.fail_worker(&handle).await;
                        continue;
                    }

                    if handle.state() == WorkerState::Draining && handle.in_flight() == 0 {
                        info!(worker_id = %handle.worker_id, "drain complete");
                        self.retire_worker(&handle).await;
                        continue;
                    }

                    if let Err(err) = handle.send_heartbeat().await {
                        debug!(
                            worker_id = %handle.worker_id,
                            error = %err,
                            "heartbeat send failed"
                        );
                        self.fail_worker(&handle).await;
                    }
                }
                WorkerState::Spawning => {}
            }
        }
    }

    /// Supervision loop. Runs until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.supervise_once().await;
                }
                _ = shutdown.changed() => {
                    debug!("supervision loop shutting down");
                    break;
                }
            }
        }
    }

    /// Gracefully shut down every worker and clear the pool.
    pub async fn shutdown_all(&self) {
        let handles: Vec<Arc<WorkerHandle>> =
            self.workers.write().await.drain().map(|(_, h)| h).collect();

        for handle in handles {
            info!(worker_id = %handle.worker_id, "shutting down worker");
            handle.set_state(WorkerState::Dead);
            self.ledger.remove(&handle.worker_id);
            if let Err(err) = handle.send_shutdown(true).await {
                debug!(worker_id = %handle.worker_id, error = %err, "shutdown send failed");
            }
            handle.await_exit(EXIT_GRACE).await;
            handle.abort_reader();
            handle.mark_lost();
        }
        info!("all workers shut down");
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Crash path: fail in-flight tasks, reclaim capacity, remove.
    async fn fail_worker(&self, handle: &Arc<WorkerHandle>) {
        if handle.mark_lost() {
            self.ledger.remove(&handle.worker_id);
        }
        handle.kill_process();
        self.remove_worker(handle).await;
    }

    /// Drain-complete path: ask the worker to exit and remove it.
    async fn retire_worker(&self, handle: &Arc<WorkerHandle>) {
        handle.set_state(WorkerState::Dead);
        self.ledger.remove(&handle.worker_id);
        if let Err(err) = handle.send_shutdown(true).await {
            debug!(worker_id = %handle.worker_id, error = %err, "shutdown send failed");
        }
        handle.await_exit(EXIT_GRACE).await;
        self.remove_worker(handle).await;
    }

    async fn remove_worker(&self, handle: &Arc<WorkerHandle>) {
        handle.abort_reader();
        let removed = self.workers.write().await.remove(&handle.worker_id);
        if removed.is_some() {
            debug!(worker_id = %handle.worker_id, "worker removed from pool");
        }
    }

    /// Map a worker id back to its pool config and slot index.
    fn slot_for(&self, worker_id: &str) -> Option<(PoolConfig, usize)> {
        let (pool_name, index) = worker_id.rsplit_once('-')?;
        let index: usize = index.parse().ok()?;
        let pool = self.pools.iter().find(|p| p.name == pool_name)?;
        if index >= pool.count {
            return None;
        }
        Some((pool.clone(), index))
    }
}
