//! RPC client: a connected socket with a synchronous call path and a
//! fire-and-forget asynchronous shim on top of it.
//!
//! The client holds one connection for its whole lifetime. A mutex
//! serializes round-trips, so a handle may be shared freely across
//! threads; clones are cheap and refer to the same connection. Call
//! outcomes are binary: a parsed JSON value, or no result. The reasons
//! for a missing result (transport failure, unknown method, handler
//! declined) go to the log, not to the caller.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::protocol::{Request, BUFFER_SIZE};

/// Callback invoked with the outcome of an asynchronous call.
///
/// Receives ownership of the result, or `None` when the call produced
/// nothing. May run on any thread and must be reentrancy-safe.
pub type ResultCallback = Box<dyn FnOnce(Option<Value>) + Send>;

/// Thread-safe RPC client connected to one server socket.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    stream: Mutex<UnixStream>,
}

impl Client {
    /// Connect to the server listening at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                stream: Mutex::new(stream),
            }),
        })
    }

    /// Bound how long a call waits for a response.
    ///
    /// The server writes nothing for an unknown method or a handler
    /// that declined to produce a result; without a timeout such calls
    /// block until the connection drops.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.stream.lock().unwrap().set_read_timeout(timeout)
    }

    /// Invoke `method` and block until a response arrives.
    ///
    /// `params` is consumed by the call. Returns the parsed response,
    /// or `None` on transport failure, on a malformed response, or when
    /// the server produced nothing.
    pub fn call_sync(&self, method: &str, params: Option<Value>) -> Option<Value> {
        let request = Request::new(method, params);
        let buf = match serde_json::to_vec(&request) {
            Ok(buf) => buf,
            Err(e) => {
                debug!(method, error = %e, "failed to encode request");
                return None;
            }
        };

        // One round-trip at a time on this socket.
        let mut stream = self.inner.stream.lock().unwrap();

        if let Err(e) = stream.write_all(&buf) {
            debug!(method, error = %e, "request write failed");
            return None;
        }

        let mut response = [0u8; BUFFER_SIZE];
        let len = match stream.read(&mut response) {
            Ok(0) => {
                debug!(method, "connection closed before a response arrived");
                return None;
            }
            Ok(len) => len,
            Err(e) => {
                debug!(method, error = %e, "response read failed");
                return None;
            }
        };
        drop(stream);

        match serde_json::from_slice(&response[..len]) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(method, error = %e, "failed to parse response");
                None
            }
        }
    }

    /// Invoke `method` without waiting for the outcome.
    ///
    /// Returns immediately; a one-shot thread performs the call on the
    /// caller's behalf. `params` is consumed. When `callback` is
    /// present it receives ownership of the result; otherwise the
    /// result is discarded. Concurrent asynchronous calls against the
    /// same client serialize on its connection.
    pub fn call_async(
        &self,
        method: &str,
        params: Option<Value>,
        callback: Option<ResultCallback>,
    ) {
        let client = self.clone();
        let method = method.to_owned();

        let task = move || {
            let result = client.call_sync(&method, params);
            match callback {
                Some(callback) => callback(result),
                None => drop(result),
            }
        };

        if let Err(e) = thread::Builder::new()
            .name("sockrpc-call".into())
            .spawn(task)
        {
            debug!(error = %e, "failed to spawn async call thread");
        }
    }
}
