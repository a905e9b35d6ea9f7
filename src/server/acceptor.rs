//! Accept loop: takes new connections and hands them to workers.
//!
//! A single thread polls the listening socket with a bounded wait so it
//! can observe shutdown, drains pending connections on each wakeup, and
//! assigns every accepted stream to a worker in round-robin order.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, error, warn};

use super::worker::WorkerShared;

/// Token for the listening socket in the acceptor's own readiness set.
pub(crate) const LISTENER: Token = Token(0);

/// Acceptor-side view of one worker: the registry handle new
/// connections are registered with, and the shared map they are
/// stashed in.
pub(crate) struct WorkerRef {
    pub(crate) id: usize,
    pub(crate) registry: Registry,
    pub(crate) shared: Arc<Mutex<WorkerShared>>,
}

pub(crate) struct Acceptor {
    pub(crate) listener: UnixListener,
    pub(crate) poll: Poll,
    pub(crate) workers: Vec<WorkerRef>,
    pub(crate) cursor: Arc<Mutex<usize>>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) interval: Duration,
}

impl Acceptor {
    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(1);
        debug!("acceptor started");

        while self.running.load(Ordering::Acquire) {
            match self.poll.poll(&mut events, Some(self.interval)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "acceptor wait failed");
                    break;
                }
            }

            if let Err(e) = self.drain_accepts() {
                error!(error = %e, "accept failed");
                break;
            }
        }

        debug!("acceptor shutting down");
    }

    /// Accept until the listener has nothing pending.
    fn drain_accepts(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.assign(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Register a new connection with the next worker in line.
    fn assign(&self, mut stream: UnixStream) {
        let selected = {
            let mut cursor = self.cursor.lock().unwrap();
            let selected = *cursor;
            *cursor = (selected + 1) % self.workers.len();
            selected
        };
        let worker = &self.workers[selected];

        let mut shared = worker.shared.lock().unwrap();
        let token = Token(shared.next_token);
        shared.next_token += 1;

        if let Err(e) = worker.registry.register(&mut stream, token, Interest::READABLE) {
            warn!(worker = worker.id, error = %e, "failed to register connection, dropping it");
            return;
        }

        shared.active += 1;
        shared.conns.insert(token, stream);
        debug!(worker = worker.id, connections = shared.active, "connection assigned");
    }
}
