//! Handler registry
//!
//! Handlers are registered with concrete request and response types. Registration wraps
//! each one in a closure that owns the decode, invoke and encode steps for those types,
//! so dispatch only ever sees bytes in and bytes out.

use rpcmesh_core::frame::is_probe_name;
use rpcmesh_core::{RpcError, RpcResult, DELIMITER, REGISTER_SERVER};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::debug;

/// Error returned by a handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Result type handlers return
pub type HandlerResult = Result<(), HandlerError>;

type Invoke = Box<dyn Fn(&[u8]) -> RpcResult<Vec<u8>> + Send + Sync>;

struct HandlerEntry {
    request_shape: &'static str,
    response_shape: &'static str,
    invoke: Invoke,
}

/// Registered operation as reported by [`HandlerRegistry::operations`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: String,
    pub request_shape: &'static str,
    pub response_shape: &'static str,
}

/// Operation name to handler table owned by one worker
///
/// Filled in before the worker starts serving, then shared behind an `Arc` and only read.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// Each call gets a fresh `Req::default()` overlaid with the decoded JSON payload, so
    /// absent fields stay zero, and a fresh `Resp::default()` for the handler to fill in.
    pub fn register<Req, Resp, F>(&mut self, name: impl Into<String>, handler: F) -> RpcResult<()>
    where
        Req: DeserializeOwned + Serialize + Default + 'static,
        Resp: Serialize + Default + 'static,
        F: Fn(&Req, &mut Resp) -> HandlerResult + Send + Sync + 'static,
    {
        let name = name.into();
        validate_name(&name)?;
        if self.handlers.contains_key(&name) {
            return Err(RpcError::Config(format!(
                "operation '{}' is already registered",
                name
            )));
        }

        let invoke: Invoke = Box::new(move |raw: &[u8]| {
            let request: Req = decode_payload(raw)?;
            let mut response = Resp::default();
            handler(&request, &mut response).map_err(|e| RpcError::HandlerFailed(e.to_string()))?;
            serde_json::to_vec(&response)
                .map_err(|e| RpcError::HandlerFailed(format!("failed to encode response: {}", e)))
        });

        debug!(
            operation = %name,
            request = type_name::<Req>(),
            response = type_name::<Resp>(),
            "Registered handler"
        );

        self.handlers.insert(
            name,
            HandlerEntry {
                request_shape: type_name::<Req>(),
                response_shape: type_name::<Resp>(),
                invoke,
            },
        );
        Ok(())
    }

    /// Dispatch a raw payload to the handler registered under `name`.
    ///
    /// Handler errors and panics come back as `RpcError::HandlerFailed`.
    pub fn dispatch(&self, name: &str, payload: &[u8]) -> RpcResult<Vec<u8>> {
        let entry = self
            .handlers
            .get(name)
            .ok_or_else(|| RpcError::UnknownOperation(name.to_string()))?;

        match catch_unwind(AssertUnwindSafe(|| (entry.invoke)(payload))) {
            Ok(result) => result,
            Err(panic) => Err(RpcError::HandlerFailed(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Registered operations, sorted by name
    pub fn operations(&self) -> Vec<OperationInfo> {
        let mut ops: Vec<OperationInfo> = self
            .handlers
            .iter()
            .map(|(name, entry)| OperationInfo {
                name: name.clone(),
                request_shape: entry.request_shape,
                response_shape: entry.response_shape,
            })
            .collect();
        ops.sort_by(|a, b| a.name.cmp(&b.name));
        ops
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn validate_name(name: &str) -> RpcResult<()> {
    if is_probe_name(name) || name == REGISTER_SERVER {
        return Err(RpcError::Config(format!(
            "operation name '{}' is reserved",
            name
        )));
    }
    if name
        .as_bytes()
        .windows(DELIMITER.len())
        .any(|w| w == DELIMITER)
    {
        return Err(RpcError::Config(
            "operation name contains the frame delimiter".to_string(),
        ));
    }
    Ok(())
}

/// Decode `raw` on top of `Req::default()`, so fields absent from the payload keep their
/// zero values even when the type has no `#[serde(default)]`
fn decode_payload<Req>(raw: &[u8]) -> RpcResult<Req>
where
    Req: DeserializeOwned + Serialize + Default,
{
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Req::default());
    }

    let overlay: Value = serde_json::from_slice(raw).map_err(|e| RpcError::Decode(e.to_string()))?;
    let mut request = serde_json::to_value(Req::default())
        .map_err(|e| RpcError::Decode(format!("failed to encode default request: {}", e)))?;
    merge(&mut request, overlay);
    serde_json::from_value(request).map_err(|e| RpcError::Decode(e.to_string()))
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Text {
        text: String,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Words {
        words: Vec<String>,
    }

    fn create_test_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register("echoUpper", |req: &Text, res: &mut Text| {
                res.text = req.text.to_uppercase();
                Ok(())
            })
            .unwrap();
        registry
            .register("secondWord", |req: &Words, res: &mut Text| {
                res.text = req.words[1].clone();
                Ok(())
            })
            .unwrap();
        registry
            .register("alwaysFails", |_: &Text, _: &mut Text| {
                Err(HandlerError::new("unrecoverable failure"))
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_dispatch_round_trip() {
        let registry = create_test_registry();
        let out = registry.dispatch("echoUpper", br#"{"text":"hi"}"#).unwrap();
        let decoded: Text = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded.text, "HI");
    }

    #[test]
    fn test_unknown_operation() {
        let registry = create_test_registry();
        let err = registry.dispatch("missing", b"{}").unwrap_err();
        assert!(matches!(err, RpcError::UnknownOperation(name) if name == "missing"));
    }

    #[test]
    fn test_malformed_payload() {
        let registry = create_test_registry();
        let err = registry.dispatch("echoUpper", b"{not json").unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[test]
    fn test_empty_payload_uses_default_request() {
        let registry = create_test_registry();
        let out = registry.dispatch("echoUpper", b"").unwrap();
        let decoded: Text = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded, Text::default());
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counted {
        text: String,
        count: u32,
        tags: Vec<String>,
    }

    #[test]
    fn test_missing_fields_take_zero_values() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("describe", |req: &Counted, res: &mut Text| {
                res.text = format!("{}:{}:{}", req.text, req.count, req.tags.len());
                Ok(())
            })
            .unwrap();

        let out = registry.dispatch("describe", br#"{"text":"hi"}"#).unwrap();
        let decoded: Text = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded.text, "hi:0:0");

        // Present fields still have to match their types
        let err = registry
            .dispatch("describe", br#"{"count":"three"}"#)
            .unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[test]
    fn test_handler_error_becomes_handler_failed() {
        let registry = create_test_registry();
        let err = registry.dispatch("alwaysFails", b"{}").unwrap_err();
        assert!(matches!(err, RpcError::HandlerFailed(msg) if msg == "unrecoverable failure"));
    }

    #[test]
    fn test_panic_is_contained() {
        let registry = create_test_registry();

        // Index out of bounds inside the handler
        let err = registry
            .dispatch("secondWord", br#"{"words":["only one"]}"#)
            .unwrap_err();
        assert!(matches!(err, RpcError::HandlerFailed(msg) if msg.contains("panicked")));

        let out = registry
            .dispatch("secondWord", br#"{"words":["he makes", "databases"]}"#)
            .unwrap();
        let decoded: Text = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded.text, "databases");
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut registry = HandlerRegistry::new();
        for name in ["", "health-check", "register-server", "a\r\n\r\nb"] {
            let result = registry.register(name, |_: &Text, _: &mut Text| Ok(()));
            assert!(result.is_err(), "{:?} should be rejected", name);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = create_test_registry();
        let result = registry.register("echoUpper", |_: &Text, _: &mut Text| Ok(()));
        assert!(result.is_err());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_operations_report_shapes() {
        let registry = create_test_registry();
        let ops = registry.operations();
        let names: Vec<&str> = ops.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["alwaysFails", "echoUpper", "secondWord"]);
        assert!(ops[2].request_shape.ends_with("Words"));
        assert!(ops[2].response_shape.ends_with("Text"));
    }

    #[test]
    fn test_concurrent_dispatch() {
        let registry = Arc::new(create_test_registry());

        std::thread::scope(|scope| {
            for i in 0..8 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    let payload = format!(r#"{{"text":"call {}"}}"#, i);
                    let out = registry.dispatch("echoUpper", payload.as_bytes()).unwrap();
                    let decoded: Text = serde_json::from_slice(&out).unwrap();
                    assert_eq!(decoded.text, format!("CALL {}", i));
                });
            }
        });
    }
}
