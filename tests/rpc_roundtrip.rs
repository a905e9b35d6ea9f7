//! End-to-end tests driving the public server and client API over real
//! sockets.

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use sockrpc::{Client, Request, Server, BUFFER_SIZE, MAX_METHODS};
use tempfile::TempDir;

/// A fresh socket path in a directory that outlives the test.
fn socket_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn echo_server(path: &PathBuf) -> Server {
    let mut server = Server::new(path).expect("create server");
    server.register("echo", |params| Some(params));
    server.start().expect("start server");
    server
}

/// Connect with a generous timeout so a broken server fails the test
/// instead of hanging it.
fn connect(path: &PathBuf) -> Client {
    let client = Client::connect(path).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set timeout");
    client
}

#[test]
fn server_lifecycle_creates_and_removes_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "lifecycle.sock");

    let mut server = Server::new(&path).unwrap();
    assert!(!path.exists(), "socket must not exist before start");

    server.start().unwrap();
    assert!(path.exists(), "socket must exist while running");

    let stream = UnixStream::connect(&path).expect("server accepts while running");
    // The acceptor picks the connection up on its next wakeup.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while server.active_connections() == 0 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.active_connections(), 1);
    drop(stream);

    server.shutdown();
    assert!(!path.exists(), "socket must be removed on shutdown");
    assert!(UnixStream::connect(&path).is_err());
}

#[test]
fn dropping_the_server_removes_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "drop.sock");

    {
        let mut server = Server::new(&path).unwrap();
        server.start().unwrap();
        assert!(path.exists());
    }

    assert!(!path.exists());
}

#[test]
fn sync_calls_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "sync.sock");

    let mut server = Server::new(&path).unwrap();
    server.register("echo", |params| Some(params));
    server.register("add", |params| {
        let a = params.get(0)?.as_i64()?;
        let b = params.get(1)?.as_i64()?;
        Some(json!(a + b))
    });
    server.start().unwrap();

    let client = connect(&path);

    let result = client.call_sync("echo", Some(json!({"message": "hello"})));
    assert_eq!(result, Some(json!({"message": "hello"})));

    let result = client.call_sync("add", Some(json!([5, 3])));
    assert_eq!(result, Some(json!(8)));
}

#[test]
fn async_call_delivers_result_to_callback() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "async.sock");

    let mut server = Server::new(&path).unwrap();
    server.register("string", |params| {
        let text = params.get("text")?.as_str()?;
        Some(json!(text.to_uppercase()))
    });
    server.start().unwrap();

    let client = connect(&path);
    let (tx, rx) = mpsc::channel();
    client.call_async(
        "string",
        Some(json!({"text": "hello world"})),
        Some(Box::new(move |result| {
            tx.send(result).unwrap();
        })),
    );

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("callback never ran");
    assert_eq!(result, Some(json!("HELLO WORLD")));
}

#[test]
fn methods_can_be_registered_after_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "dynamic.sock");

    // Start with no methods at all.
    let mut server = Server::new(&path).unwrap();
    server.start().unwrap();

    let client = connect(&path);

    server.register("multiply", |params| {
        let a = params.get(0)?.as_i64()?;
        let b = params.get(1)?.as_i64()?;
        Some(json!(a * b))
    });
    assert_eq!(
        client.call_sync("multiply", Some(json!([6, 7]))),
        Some(json!(42))
    );

    server.register("divide", |params| {
        let a = params.get(0)?.as_f64()?;
        let b = params.get(1)?.as_f64()?;
        if b == 0.0 {
            return None;
        }
        Some(json!(a / b))
    });
    assert_eq!(
        client.call_sync("divide", Some(json!([6, 2]))),
        Some(json!(3.0))
    );
}

#[test]
fn reregistration_takes_effect_for_later_calls() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "replace.sock");

    let mut server = Server::new(&path).unwrap();
    server.register("greet", |_| Some(json!("hello")));
    server.start().unwrap();

    let client = connect(&path);
    assert_eq!(client.call_sync("greet", None), Some(json!("hello")));

    server.register("greet", |_| Some(json!("goodbye")));
    assert_eq!(client.call_sync("greet", None), Some(json!("goodbye")));
}

#[test]
fn unknown_method_yields_no_result_and_server_survives() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "missing.sock");

    let mut server = Server::new(&path).unwrap();
    server.register("known", |_| Some(json!(1)));
    server.start().unwrap();

    let client = Client::connect(&path).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    assert_eq!(client.call_sync("nope", Some(json!({}))), None);

    // The same connection keeps serving registered methods.
    assert_eq!(client.call_sync("known", None), Some(json!(1)));
}

#[test]
fn handler_sentinel_yields_no_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "sentinel.sock");

    let mut server = Server::new(&path).unwrap();
    server.register("silent", |_| None);
    server.register("null", |_| Some(Value::Null));
    server.start().unwrap();

    let client = Client::connect(&path).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    // The sentinel is distinguishable from a present JSON null.
    assert_eq!(client.call_sync("silent", None), None);
    assert_eq!(client.call_sync("null", None), Some(Value::Null));
}

#[test]
fn request_at_buffer_limit_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "boundary.sock");
    let _server = echo_server(&path);

    let client = connect(&path);

    // Pad the payload so the serialized request is exactly one byte
    // under the transport cap.
    let overhead = serde_json::to_vec(&Request::new("echo", Some(json!(""))))
        .unwrap()
        .len();
    let payload = "x".repeat(BUFFER_SIZE - 1 - overhead);
    let request_len = serde_json::to_vec(&Request::new("echo", Some(json!(payload.clone()))))
        .unwrap()
        .len();
    assert_eq!(request_len, BUFFER_SIZE - 1);

    let result = client.call_sync("echo", Some(json!(payload.clone())));
    assert_eq!(result, Some(json!(payload)));
}

#[test]
fn oversize_request_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "oversize.sock");
    let _server = echo_server(&path);

    let client = Client::connect(&path).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();

    let payload = "x".repeat(BUFFER_SIZE);
    assert_eq!(client.call_sync("echo", Some(json!(payload))), None);
}

#[test]
fn method_capacity_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "capacity.sock");

    let mut server = Server::new(&path).unwrap();
    for i in 0..MAX_METHODS {
        server.register(&format!("m{i}"), move |_| Some(json!(i)));
    }
    // One past capacity is silently ignored.
    server.register("overflow", |_| Some(json!("nope")));
    server.start().unwrap();

    let client = Client::connect(&path).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    assert_eq!(
        client.call_sync(&format!("m{}", MAX_METHODS - 1), None),
        Some(json!(MAX_METHODS - 1))
    );
    assert_eq!(client.call_sync("overflow", None), None);

    // Replacing an existing name still works at capacity.
    server.register("m0", |_| Some(json!("replaced")));
    assert_eq!(client.call_sync("m0", None), Some(json!("replaced")));
}

#[test]
fn multiple_clients_round_trip_independently() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "multi.sock");
    let _server = echo_server(&path);

    let handles: Vec<_> = (0..4)
        .map(|id| {
            let path = path.clone();
            thread::spawn(move || {
                let client = Client::connect(&path).expect("connect");
                client
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .expect("set timeout");
                for call in 0..10 {
                    let payload = json!({"client": id, "call": call});
                    let result = client.call_sync("echo", Some(payload.clone()));
                    assert_eq!(result, Some(payload));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("client thread panicked");
    }
}
