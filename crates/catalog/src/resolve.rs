//! Invocation resolution.
//!
//! The reasoning component names a worker operation in one of two forms:
//!
//! - canonical: tool `"CBS"` with arguments `{"tool": "get_statistics", ...}`
//! - dotted: tool `"CBS.get_statistics"` with the remaining arguments
//!
//! [`resolve`] maps both onto the same [`ResolvedInvocation`] before any
//! transport work happens, and shapes the arguments for the operation:
//! discovery operations get `query`, everything else gets `location_id`
//! when one was supplied.

use rustedbridge_core::error::ResolutionError;
use serde_json::{Map, Value};

use crate::cache::{Catalog, CatalogEntry};

/// A fully resolved worker operation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInvocation {
    pub worker: String,
    pub operation: String,
    pub arguments: Value,
}

/// Resolve a proposed invocation against `catalog`.
///
/// `raw_arguments` is the JSON text the reasoning component produced; an
/// empty string counts as `{}`.
pub fn resolve(
    catalog: &Catalog,
    discovery_tools: &[String],
    name: &str,
    raw_arguments: &str,
) -> Result<ResolvedInvocation, ResolutionError> {
    let arguments = parse_arguments(raw_arguments)?;

    let (entry, operation) = match catalog.entry(name) {
        Some(entry) => {
            let operation = arguments
                .get("tool")
                .and_then(Value::as_str)
                .filter(|op| !op.is_empty())
                .ok_or_else(|| ResolutionError::MissingArgument {
                    operation: name.to_string(),
                    argument: "tool".into(),
                })?;
            (entry, operation.to_string())
        }
        None => match name.split_once('.') {
            Some((worker, operation)) => {
                let entry = catalog
                    .entry(worker)
                    .ok_or_else(|| ResolutionError::UnknownWorker(worker.to_string()))?;
                (entry, operation.to_string())
            }
            None => return Err(ResolutionError::UnknownWorker(name.to_string())),
        },
    };

    check_operation(entry, &operation)?;

    let arguments = if discovery_tools.iter().any(|t| *t == operation) {
        discovery_arguments(&operation, &arguments)?
    } else {
        retrieval_arguments(&arguments)
    };

    Ok(ResolvedInvocation {
        worker: entry.worker.name.clone(),
        operation,
        arguments,
    })
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ResolutionError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(ResolutionError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ResolutionError::InvalidArguments(e.to_string())),
    }
}

fn check_operation(entry: &CatalogEntry, operation: &str) -> Result<(), ResolutionError> {
    if entry.has_operation(operation) {
        Ok(())
    } else {
        Err(ResolutionError::UnknownOperation {
            worker: entry.worker.name.clone(),
            operation: operation.to_string(),
        })
    }
}

fn discovery_arguments(operation: &str, arguments: &Map<String, Value>) -> Result<Value, ResolutionError> {
    match arguments.get("query") {
        Some(Value::String(q)) if !q.trim().is_empty() => Ok(serde_json::json!({ "query": q })),
        Some(Value::Number(n)) => Ok(serde_json::json!({ "query": n.to_string() })),
        _ => Err(ResolutionError::MissingArgument {
            operation: operation.to_string(),
            argument: "query".into(),
        }),
    }
}

fn retrieval_arguments(arguments: &Map<String, Value>) -> Value {
    let mut shaped = Map::new();
    if let Some(location) = arguments.get("location_id").filter(|v| !v.is_null()) {
        shaped.insert("location_id".into(), location.clone());
    }
    Value::Object(shaped)
}
