//! Method table: named handlers and their dispatch semantics.
//!
//! Handlers are registered under a case-sensitive name and invoked by
//! worker threads. Registration is insert-or-replace and may happen
//! before or after the server starts, from any thread. Lookup copies the
//! handler reference out of the table so it is never invoked under the
//! table lock.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

/// Maximum number of distinct method names a server will hold.
pub const MAX_METHODS: usize = 100;

/// A registered method handler.
///
/// The handler owns its input value (absent params arrive as
/// `Value::Null`) and returns either an owned result value or `None`,
/// the explicit no-result sentinel. Handlers must be reentrant: the same
/// handler may run concurrently on distinct worker threads.
pub type Handler = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

struct MethodEntry {
    name: String,
    handler: Handler,
}

/// Mutex-guarded, bounded name-to-handler table.
pub(crate) struct MethodTable {
    entries: Mutex<Vec<MethodEntry>>,
}

impl MethodTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Insert a handler, replacing any existing entry with the same name.
    ///
    /// Empty names and registrations beyond [`MAX_METHODS`] distinct
    /// names are ignored.
    pub(crate) fn register(&self, name: &str, handler: Handler) {
        if name.is_empty() {
            warn!("ignoring registration with empty method name");
            return;
        }

        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            entry.handler = handler;
            return;
        }

        if entries.len() >= MAX_METHODS {
            warn!(method = name, "method table full, registration ignored");
            return;
        }

        entries.push(MethodEntry {
            name: name.to_owned(),
            handler,
        });
    }

    /// Look up a handler by exact name.
    ///
    /// Returns a clone of the handler reference so the caller can invoke
    /// it after the lock is released.
    pub(crate) fn lookup(&self, name: &str) -> Option<Handler> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: i64) -> Handler {
        Arc::new(move |_| Some(Value::from(v)))
    }

    #[test]
    fn lookup_finds_registered_handler() {
        let table = MethodTable::new();
        table.register("answer", constant(42));

        let handler = table.lookup("answer").expect("handler registered");
        assert_eq!(handler(Value::Null), Some(Value::from(42)));
    }

    #[test]
    fn lookup_unknown_name_is_none() {
        let table = MethodTable::new();
        table.register("answer", constant(42));

        assert!(table.lookup("nope").is_none());
        assert!(table.lookup("Answer").is_none(), "names are case-sensitive");
    }

    #[test]
    fn reregistration_replaces_handler() {
        let table = MethodTable::new();
        table.register("answer", constant(1));
        table.register("answer", constant(2));

        let handler = table.lookup("answer").unwrap();
        assert_eq!(handler(Value::Null), Some(Value::from(2)));
    }

    #[test]
    fn empty_name_is_ignored() {
        let table = MethodTable::new();
        table.register("", constant(1));

        assert!(table.lookup("").is_none());
    }

    #[test]
    fn capacity_bounds_distinct_names_only() {
        let table = MethodTable::new();
        for i in 0..MAX_METHODS {
            table.register(&format!("m{i}"), constant(i as i64));
        }

        // One past capacity is dropped.
        table.register("overflow", constant(-1));
        assert!(table.lookup("overflow").is_none());
        assert!(table.lookup(&format!("m{}", MAX_METHODS - 1)).is_some());

        // Replacing an existing name still works at capacity.
        table.register("m0", constant(-2));
        let handler = table.lookup("m0").unwrap();
        assert_eq!(handler(Value::Null), Some(Value::from(-2)));
    }
}
