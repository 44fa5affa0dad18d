//! Sync/async bridge
//!
//! The VM is synchronous; the LLM client is async. The bridge owns one
//! background thread running a current-thread tokio runtime. The
//! synchronous facade spawns a future onto that loop and blocks on a
//! oneshot for the result, with the deadline enforced inside the task.
//!
//! Lifecycle is explicit: `initialize` starts the worker and polls
//! (short sleep, bounded total) until the loop is runnable;
//! `shutdown` signals the loop, joins the thread, and releases the
//! connection pool with it. Dropping an initialized bridge shuts it
//! down.

use std::sync::Mutex;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Total time allowed for the worker loop to become runnable.
const INIT_DEADLINE: Duration = Duration::from_secs(5);
/// Sleep between readiness polls.
const INIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bridge failure, distinct from whatever the bridged future returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The worker loop did not come up within the deadline
    InitializationFailed(String),
    /// `run` called before `initialize` (or after `shutdown`)
    NotRunning,
    /// The submitted future missed its deadline
    Timeout,
    /// The worker disappeared mid-flight
    WorkerGone,
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::InitializationFailed(msg) => {
                write!(f, "bridge initialization failed: {}", msg)
            }
            BridgeError::NotRunning => write!(f, "bridge not running"),
            BridgeError::Timeout => write!(f, "bridged operation timed out"),
            BridgeError::WorkerGone => write!(f, "bridge worker exited unexpectedly"),
        }
    }
}

impl std::error::Error for BridgeError {}

struct Worker {
    handle: tokio::runtime::Handle,
    // Dropping the sender wakes the loop's shutdown future
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Synchronous facade over a dedicated event-loop thread.
#[derive(Default)]
pub struct SyncBridge {
    worker: Mutex<Option<Worker>>,
}

impl SyncBridge {
    pub fn new() -> Self {
        SyncBridge::default()
    }

    /// Start the worker thread and wait for its loop to become
    /// runnable. Idempotent. Never busy-waits without bound: polling
    /// sleeps between checks and gives up after [`INIT_DEADLINE`].
    pub fn initialize(&self) -> Result<(), BridgeError> {
        let mut worker = self
            .worker
            .lock()
            .expect("bridge worker lock poisoned");
        if worker.is_some() {
            return Ok(());
        }

        let (handle_tx, handle_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("sovereign-llm-bridge".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                // Park on the shutdown signal; spawned tasks keep
                // running on this loop until then
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                debug!("bridge worker stopped");
            })
            .map_err(|e| BridgeError::InitializationFailed(format!("spawn failed: {}", e)))?;

        let started = Instant::now();
        let handle = loop {
            match handle_rx.try_recv() {
                Ok(Ok(handle)) => break handle,
                Ok(Err(msg)) => {
                    return Err(BridgeError::InitializationFailed(format!(
                        "event loop build failed: {}",
                        msg
                    )));
                }
                Err(TryRecvError::Empty) => {
                    if started.elapsed() >= INIT_DEADLINE {
                        return Err(BridgeError::InitializationFailed(format!(
                            "event loop not runnable after {:?}",
                            INIT_DEADLINE
                        )));
                    }
                    thread::sleep(INIT_POLL_INTERVAL);
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(BridgeError::InitializationFailed(
                        "worker exited during startup".to_string(),
                    ));
                }
            }
        };

        debug!("bridge worker ready");
        *worker = Some(Worker {
            handle,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .expect("bridge worker lock poisoned")
            .is_some()
    }

    /// Run a future on the worker loop and block for its result, with
    /// `deadline` enforced inside the task.
    ///
    /// Must be called from a synchronous context (the VM thread), never
    /// from inside the worker loop.
    pub fn run<F>(&self, future: F, deadline: Duration) -> Result<F::Output, BridgeError>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = {
            let worker = self
                .worker
                .lock()
                .expect("bridge worker lock poisoned");
            worker
                .as_ref()
                .map(|w| w.handle.clone())
                .ok_or(BridgeError::NotRunning)?
        };

        let (result_tx, result_rx) = oneshot::channel();
        handle.spawn(async move {
            let result = tokio::time::timeout(deadline, future).await;
            let _ = result_tx.send(result);
        });

        match result_rx.blocking_recv() {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(_elapsed)) => Err(BridgeError::Timeout),
            Err(_) => Err(BridgeError::WorkerGone),
        }
    }

    /// Stop the loop and join the worker thread. Idempotent.
    pub fn shutdown(&self) {
        let taken = self
            .worker
            .lock()
            .expect("bridge worker lock poisoned")
            .take();
        if let Some(mut worker) = taken {
            drop(worker.shutdown_tx.take());
            if let Some(thread) = worker.thread.take()
                && thread.join().is_err()
            {
                warn!("bridge worker panicked during shutdown");
            }
        }
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
