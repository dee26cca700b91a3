//! Selector schema synthesis.
//!
//! The reasoning component sees one tool per worker. Its input schema
//! offers an enumerated `tool` field naming the worker's operations plus
//! the two argument slots the operations use.

use rustedbridge_core::rpc::ToolSchema;
use rustedbridge_core::worker::WorkerSpec;
use serde_json::json;

/// Build the selector schema for `worker` from its discovered operations.
pub fn selector_schema(worker: &WorkerSpec, tools: &[ToolSchema]) -> ToolSchema {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();

    let mut description = if worker.description.trim().is_empty() {
        format!("Query the {} service.", worker.name)
    } else {
        worker.description.trim().to_string()
    };
    description.push_str("\n\nAvailable tools:");
    for tool in tools {
        let summary = tool.description.lines().next().unwrap_or_default().trim();
        if summary.is_empty() {
            description.push_str(&format!("\n- {}", tool.name));
        } else {
            description.push_str(&format!("\n- {}: {summary}", tool.name));
        }
    }

    ToolSchema {
        name: worker.name.clone(),
        description,
        input_schema: json!({
            "type": "object",
            "properties": {
                "tool": {
                    "type": "string",
                    "enum": names,
                    "description": format!("The {} tool to call", worker.name),
                },
                "query": {
                    "type": "string",
                    "description": "Search text for find_* tools (place, street or area name)",
                },
                "location_id": {
                    "type": "string",
                    "description": "Location identifier such as LOC001, for data retrieval tools",
                },
            },
            "required": ["tool"],
        }),
    }
}
