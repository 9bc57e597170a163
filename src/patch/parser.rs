//! Textual patch format -> [`PatchGraph`].
//!
//! Patches are UTF-8 JSON:
//!
//! ```json
//! {
//!   "modules":     [ {"id": 1, "name": "sine_gen", "data": {"freq": 440.0}} ],
//!   "connections": [ {"from": "1:out", "to": "2:in"} ]
//! }
//! ```
//!
//! The parser is purely structural. It does not know port names, module
//! ids, or graph shape; those are the compiler's concern. Unknown keys are
//! ignored, absent `modules`/`connections` arrays are treated as empty.

use serde_json::Value;
use thiserror::Error;

use super::{Connection, ConstantInput, PatchGraph, PatchNode};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("patch text is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid connection string {string:?}: {reason}")]
    InvalidConnectionString {
        string: String,
        reason: &'static str,
    },
}

/// Split a `"<node_id>:<port_name>"` endpoint.
fn parse_endpoint(text: &str) -> Result<(u32, String), ParseError> {
    let Some((id_part, port_part)) = text.split_once(':') else {
        return Err(ParseError::InvalidConnectionString {
            string: text.to_owned(),
            reason: "missing ':' separator",
        });
    };
    let node_id = id_part
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidConnectionString {
            string: text.to_owned(),
            reason: "node id is not an unsigned integer",
        })?;
    if port_part.is_empty() {
        return Err(ParseError::InvalidConnectionString {
            string: text.to_owned(),
            reason: "empty port name",
        });
    }
    Ok((node_id, port_part.to_owned()))
}

pub fn parse_patch(text: &str) -> Result<PatchGraph, ParseError> {
    let root: Value = serde_json::from_str(text)?;
    let mut graph = PatchGraph::default();

    if let Some(modules) = root.get("modules").and_then(Value::as_array) {
        for entry in modules {
            let id = entry.get("id").and_then(Value::as_u64).unwrap_or(0) as u32;
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();

            let mut constants = Vec::new();
            if let Some(data) = entry.get("data").and_then(Value::as_object) {
                for (port, value) in data {
                    if let Some(number) = value.as_f64() {
                        constants.push(ConstantInput {
                            port: port.clone(),
                            value: number as f32,
                        });
                    }
                }
            }

            graph.nodes.push(PatchNode {
                id,
                name,
                constants,
            });
        }
    }

    if let Some(connections) = root.get("connections").and_then(Value::as_array) {
        for entry in connections {
            let from = entry.get("from").and_then(Value::as_str);
            let to = entry.get("to").and_then(Value::as_str);
            if let (Some(from), Some(to)) = (from, to) {
                let (from_node, from_port) = parse_endpoint(from)?;
                let (to_node, to_port) = parse_endpoint(to)?;
                graph.connections.push(Connection {
                    from_node,
                    from_port,
                    to_node,
                    to_port,
                });
            }
        }
    }

    Ok(graph)
}
