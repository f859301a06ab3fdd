//! JSON-RPC flavored in-process engine for the CLI.

use chainbridge_core::{ChainId, SimEngine};
use serde_json::{json, Value};

/// JSON-RPC 2.0 parse error code
const PARSE_ERROR: i64 = -32700;

/// Build an engine whose chains answer each request with a JSON-RPC result
/// naming the method and the chain.
pub fn json_rpc_engine() -> SimEngine {
    SimEngine::with_responder(|chain, request| vec![respond(chain, request).into_bytes()])
}

fn respond(chain: ChainId, request: &str) -> String {
    let reply = match serde_json::from_str::<Value>(request) {
        Ok(request) => json!({
            "jsonrpc": "2.0",
            "id": request.get("id").cloned().unwrap_or(Value::Null),
            "result": {
                "chain": chain.as_u32(),
                "method": request.get("method").cloned().unwrap_or(Value::Null),
            },
        }),
        Err(err) => json!({
            "jsonrpc": "2.0",
            "id": Value::Null,
            "error": { "code": PARSE_ERROR, "message": format!("Parse error: {err}") },
        }),
    };
    reply.to_string()
}

/// Make `engine` reject `spec` the way a real engine rejects an
/// unparseable chain specification.
pub fn reject_invalid_spec(engine: &SimEngine, spec: &str) {
    if let Err(err) = serde_json::from_str::<Value>(spec) {
        engine.fail_spec(spec, format!("invalid chain specification: {err}"));
    }
}
