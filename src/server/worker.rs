//! Worker threads: readiness loops and request servicing.
//!
//! Each worker owns one `mio::Poll` and drives the connections the
//! acceptor assigned to it. Readiness is edge-triggered, so a wakeup
//! reads everything currently buffered (up to the transport cap) before
//! going back to waiting. One request is parsed, dispatched, and
//! answered per wakeup; the connection then waits for its next request.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::UnixStream;
use mio::{Events, Poll, Registry, Token};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::methods::MethodTable;
use crate::protocol::{Request, BUFFER_SIZE};

/// Upper bound on readiness events handled per wait.
const MAX_EVENTS: usize = 10;

/// State a worker shares with the acceptor.
#[derive(Default)]
pub(crate) struct WorkerShared {
    /// Connections assigned to this worker, keyed by their poll token.
    pub(crate) conns: HashMap<Token, UnixStream>,
    /// Next token to hand out for this worker's readiness set.
    pub(crate) next_token: usize,
    /// Number of live connections. Tracked for observability only.
    pub(crate) active: usize,
}

/// Per-worker state held by the server.
///
/// The poll and registry handles are taken out of the slot when the
/// engine starts: the poll moves into the worker thread and the registry
/// clone moves into the acceptor.
pub(crate) struct WorkerSlot {
    pub(crate) id: usize,
    pub(crate) poll: Option<Poll>,
    pub(crate) registry: Option<Registry>,
    pub(crate) shared: Arc<Mutex<WorkerShared>>,
}

impl WorkerSlot {
    pub(crate) fn new(id: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            id,
            poll: Some(poll),
            registry: Some(registry),
            shared: Arc::new(Mutex::new(WorkerShared::default())),
        })
    }
}

/// The running half of a worker slot, owned by its thread.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) poll: Poll,
    pub(crate) shared: Arc<Mutex<WorkerShared>>,
    pub(crate) methods: Arc<MethodTable>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) interval: Duration,
}

impl Worker {
    /// Drive the readiness set until the server stops.
    ///
    /// The wait is bounded by `interval` so a cleared running flag is
    /// observed within one tick.
    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        debug!(worker = self.id, "worker started");

        while self.running.load(Ordering::Acquire) {
            match self.poll.poll(&mut events, Some(self.interval)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(worker = self.id, error = %e, "readiness wait failed");
                    break;
                }
            }

            for event in events.iter() {
                self.service(event.token());
            }
        }

        debug!(worker = self.id, "worker shutting down");
    }

    /// Handle one readable connection: read, dispatch, respond.
    fn service(&self, token: Token) {
        let stream = self.shared.lock().unwrap().conns.remove(&token);
        let Some(mut stream) = stream else {
            // Already closed; stale event.
            return;
        };

        let mut buf = [0u8; BUFFER_SIZE];
        let len = match read_request(&mut stream, &mut buf) {
            Ok(0) => {
                self.close(stream);
                return;
            }
            Ok(len) => len,
            Err(e) => {
                debug!(worker = self.id, error = %e, "read failed, closing connection");
                self.close(stream);
                return;
            }
        };

        let mut request: Request = match serde_json::from_slice(&buf[..len]) {
            Ok(request) => request,
            Err(e) => {
                debug!(worker = self.id, error = %e, "dropping malformed request");
                self.park(token, stream);
                return;
            }
        };
        if let Err(reason) = request.validate() {
            debug!(worker = self.id, reason, "dropping request");
            self.park(token, stream);
            return;
        }

        let params = request.params.take().unwrap_or(Value::Null);
        let Some(handler) = self.methods.lookup(&request.method) else {
            trace!(worker = self.id, method = %request.method, "no handler registered");
            self.park(token, stream);
            return;
        };

        // The handler owns `params` and runs outside the table lock, so
        // registration can proceed while it executes.
        if let Some(result) = handler(params) {
            let bytes = match serde_json::to_vec(&result) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(worker = self.id, method = %request.method, error = %e,
                        "response failed to serialize");
                    self.park(token, stream);
                    return;
                }
            };
            if let Err(e) = write_all(&mut stream, &bytes) {
                debug!(worker = self.id, error = %e, "write failed, closing connection");
                self.close(stream);
                return;
            }
        }

        self.park(token, stream);
    }

    /// Put a still-open connection back for its next request.
    fn park(&self, token: Token, stream: UnixStream) {
        self.shared.lock().unwrap().conns.insert(token, stream);
    }

    /// Tear down a finished connection and leave the readiness set.
    fn close(&self, mut stream: UnixStream) {
        if let Err(e) = self.poll.registry().deregister(&mut stream) {
            trace!(worker = self.id, error = %e, "deregister failed");
        }
        let mut shared = self.shared.lock().unwrap();
        shared.active = shared.active.saturating_sub(1);
        debug!(worker = self.id, connections = shared.active, "connection closed");
    }
}

/// Read until EOF, no more buffered data, or the transport cap.
///
/// Interrupted reads retry transparently. Returns the byte count; zero
/// means the peer is gone or the wakeup carried no data, and either way
/// the connection is done.
fn read_request(stream: &mut UnixStream, buf: &mut [u8; BUFFER_SIZE]) -> io::Result<usize> {
    let mut total = 0;
    while total < BUFFER_SIZE - 1 {
        match stream.read(&mut buf[total..BUFFER_SIZE - 1]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Write the whole buffer, retrying short and would-block writes.
fn write_all(stream: &mut UnixStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
