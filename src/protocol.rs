//! Wire protocol types.
//!
//! A request is a single JSON object `{"method": ..., "params": ...}`
//! where `params` may be any JSON value or absent. A response is a bare
//! JSON value of whatever shape the handler chose, so it needs no type
//! here. Neither direction carries framing or correlation ids; the
//! transport is one request and one response per round-trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport buffer size, shared by both sides.
///
/// A request or response longer than `BUFFER_SIZE - 1` bytes is
/// truncated by the reader and dropped as a parse failure.
pub const BUFFER_SIZE: usize = 4096;

/// RPC request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Method name to invoke. Case-sensitive.
    pub method: String,
    /// Optional parameters (any JSON value). Omitted from the wire when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Check the envelope is dispatchable.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.method.is_empty() {
            return Err("method must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_with_params() {
        let json = r#"{"method":"kv.set","params":{"key":"a","value":"b"}}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert_eq!(req.method, "kv.set");
        assert_eq!(req.params.unwrap()["key"], "a");
    }

    #[test]
    fn parse_request_without_params() {
        let json = r#"{"method":"ping"}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert_eq!(req.method, "ping");
        assert!(req.params.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn parse_request_with_array_params() {
        let json = r#"{"method":"add","params":[5,3]}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert_eq!(req.params.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn serialize_omits_absent_params() {
        let req = Request::new("ping", None);
        let json = serde_json::to_string(&req).unwrap();

        assert_eq!(json, r#"{"method":"ping"}"#);
    }

    #[test]
    fn empty_method_fails_validation() {
        let req = Request::new("", Some(Value::Null));
        assert!(req.validate().is_err());
    }

    #[test]
    fn missing_method_fails_to_parse() {
        let json = r#"{"params":[1,2]}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }
}
