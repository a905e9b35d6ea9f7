//! RPC server: lifecycle, method registration, and the I/O engine.
//!
//! ## Architecture
//!
//! - `acceptor`: accept thread with round-robin connection assignment
//! - `worker`: worker pool, one readiness set per worker
//!
//! Binding and listening happen on the caller's thread in [`Server::start`],
//! so the socket file exists by the time `start` returns. The engine then
//! runs in the background until [`Server::shutdown`] (or drop): the accept
//! thread feeds connections to the workers, each worker multiplexes its
//! share with an edge-triggered readiness set, and requests dispatch
//! through the shared method table.

mod acceptor;
mod worker;

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::UnixListener;
use mio::{Interest, Poll};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::methods::MethodTable;
use acceptor::{Acceptor, WorkerRef, LISTENER};
use worker::{Worker, WorkerSlot};

/// Longest socket path the platform accepts: `sun_path` less the
/// terminating byte.
const SUN_PATH_MAX: usize = 107;

/// Tuning knobs for the I/O engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of worker threads, each driving its own readiness set.
    pub workers: usize,
    /// Bound on every readiness wait. Shutdown is observed within one
    /// tick of this interval.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// RPC server bound to one Unix domain socket path.
///
/// Created detached from the filesystem; `start` binds the socket and
/// spawns the engine. Methods may be registered at any point before or
/// after `start`, from any thread. Dropping the server stops the engine,
/// joins its threads, and removes the socket file.
pub struct Server {
    path: PathBuf,
    config: ServerConfig,
    methods: Arc<MethodTable>,
    running: Arc<AtomicBool>,
    cursor: Arc<Mutex<usize>>,
    slots: Vec<WorkerSlot>,
    worker_threads: Vec<JoinHandle<()>>,
    acceptor_thread: Option<JoinHandle<()>>,
    started: bool,
    /// True once `bind` has created the socket file, even if the rest
    /// of startup failed; cleanup keys off this, not `started`.
    bound: bool,
}

impl Server {
    /// Create a server for `path` with the default engine configuration.
    ///
    /// Does not touch the filesystem; the socket is created by [`start`].
    ///
    /// [`start`]: Server::start
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, ServerConfig::default())
    }

    /// Create a server with an explicit engine configuration.
    pub fn with_config(path: impl AsRef<Path>, config: ServerConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().as_bytes().len() > SUN_PATH_MAX {
            return Err(Error::PathTooLong(path, SUN_PATH_MAX));
        }

        let workers = config.workers.max(1);
        let slots = (0..workers)
            .map(WorkerSlot::new)
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            path,
            config,
            methods: Arc::new(MethodTable::new()),
            running: Arc::new(AtomicBool::new(false)),
            cursor: Arc::new(Mutex::new(0)),
            slots,
            worker_threads: Vec::new(),
            acceptor_thread: None,
            started: false,
            bound: false,
        })
    }

    /// Register `handler` under `name`, replacing any previous handler
    /// with that name.
    ///
    /// Safe to call from any thread, before or after `start`. A
    /// registration that completes before a request arrives is visible
    /// to the worker dispatching that request. Registrations beyond the
    /// table capacity are ignored.
    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.methods.register(name, Arc::new(handler));
    }

    /// Bind the socket and spawn the engine. Returns immediately.
    ///
    /// On error the server is left unstarted and may still be dropped
    /// normally. A server that has already started (or stopped) is left
    /// untouched; the engine cannot be restarted.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        // A previous run may have left a stale socket file behind.
        let _ = fs::remove_file(&self.path);

        let mut listener = UnixListener::bind(&self.path)?;
        self.bound = true;

        let accept_poll = Poll::new()?;
        accept_poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        self.started = true;
        self.running.store(true, Ordering::Release);

        for slot in &mut self.slots {
            let worker = Worker {
                id: slot.id,
                poll: slot.poll.take().expect("worker slot started twice"),
                shared: Arc::clone(&slot.shared),
                methods: Arc::clone(&self.methods),
                running: Arc::clone(&self.running),
                interval: self.config.poll_interval,
            };
            let handle = thread::Builder::new()
                .name(format!("sockrpc-worker-{}", slot.id))
                .spawn(move || worker.run())?;
            self.worker_threads.push(handle);
        }

        let workers = self
            .slots
            .iter_mut()
            .map(|slot| WorkerRef {
                id: slot.id,
                registry: slot.registry.take().expect("worker slot started twice"),
                shared: Arc::clone(&slot.shared),
            })
            .collect();

        let acceptor = Acceptor {
            listener,
            poll: accept_poll,
            workers,
            cursor: Arc::clone(&self.cursor),
            running: Arc::clone(&self.running),
            interval: self.config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("sockrpc-acceptor".into())
            .spawn(move || acceptor.run())?;
        self.acceptor_thread = Some(handle);

        info!(
            path = %self.path.display(),
            workers = self.slots.len(),
            "server listening"
        );
        Ok(())
    }

    /// Number of connections currently assigned across all workers.
    pub fn active_connections(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.shared.lock().unwrap().active)
            .sum()
    }

    /// Stop the engine, join its threads, and remove the socket file.
    ///
    /// Idempotent, and valid on a server that never started. Runs
    /// automatically on drop.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);

        // The acceptor owns the listener; joining it first guarantees
        // the socket is no longer accepting before the path is removed.
        if let Some(handle) = self.acceptor_thread.take() {
            let _ = handle.join();
        }
        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }

        for slot in &self.slots {
            slot.shared.lock().unwrap().conns.clear();
        }

        if self.bound {
            let _ = fs::remove_file(&self.path);
            debug!(path = %self.path.display(), "server stopped");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
