//! RPC tool server implementing JSON-RPC 2.0 over stdin/stdout.
//!
//! Exposes every registry command as a tool under its `rpc_name`, for
//! LLM-driven callers speaking the tool protocol. Protocol messages are
//! newline-delimited JSON-RPC on stdin/stdout; logging goes to stderr
//! (stdout is reserved for protocol messages).
//!
//! The server keeps one piece of per-connection state: the last agent name
//! used for a claim, so an anonymous caller keeps its identity across
//! `get_next_task` calls.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::commands::{registry, CommandContext, CommandSpec};

pub struct RpcServer {
    ctx: Arc<CommandContext>,
    /// Remembered agent name for claim calls that omit one.
    last_agent_name: Mutex<Option<String>>,
}

impl RpcServer {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        Self {
            ctx,
            last_agent_name: Mutex::new(None),
        }
    }

    /// Run the stdio loop until stdin closes.
    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        tracing::info!("rpc server started");

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let response = self.handle_message(line).await;
            if response.is_empty() {
                continue;
            }
            let mut bytes = response.into_bytes();
            bytes.push(b'\n');
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }

        tracing::info!("rpc server stopped");
        Ok(())
    }

    async fn handle_message(&self, line: &str) -> String {
        let request: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return error_response(
                    serde_json::Value::Null,
                    -32700,
                    &format!("Parse error: {e}"),
                )
            }
        };

        let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request
            .get("params")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        match method {
            "initialize" => self.handle_initialize(id),
            "tools/list" => handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, &params).await,
            // Client notification; no response.
            "notifications/initialized" => String::new(),
            _ => error_response(id, -32601, &format!("Method not found: {method}")),
        }
    }

    fn handle_initialize(&self, id: serde_json::Value) -> String {
        let result = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "foreman",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        success_response(id, result)
    }

    async fn handle_tools_call(&self, id: serde_json::Value, params: &serde_json::Value) -> String {
        let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let Some(spec) = registry().iter().find(|c| c.rpc_name == tool_name) else {
            return error_response(id, -32602, &format!("Unknown tool: {tool_name}"));
        };

        let mut args = params
            .get("arguments")
            .and_then(|a| a.as_object())
            .cloned()
            .unwrap_or_default();

        // Claims without an explicit agent name reuse the connection's last
        // identity rather than minting a new one per call.
        if spec.rpc_name == "get_next_task" && !args.contains_key("agentName") {
            if let Some(name) = self.last_agent_name.lock().await.clone() {
                args.insert("agentName".to_string(), serde_json::json!(name));
            }
        }

        let outcome = (spec.handler)(self.ctx.clone(), args).await;

        let (payload, is_error) = match outcome {
            Ok(data) => {
                if spec.rpc_name == "get_next_task" {
                    if let Some(name) = data.get("agentName").and_then(|n| n.as_str()) {
                        *self.last_agent_name.lock().await = Some(name.to_string());
                    }
                }
                (serde_json::json!({ "success": true, "data": data }), false)
            }
            Err(e) => (
                serde_json::json!({ "success": false, "error": e.to_string() }),
                true,
            ),
        };

        let text = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
        success_response(
            id,
            serde_json::json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error,
            }),
        )
    }
}

fn handle_tools_list(id: serde_json::Value) -> String {
    let tools: Vec<serde_json::Value> = registry().iter().map(tool_descriptor).collect();
    success_response(id, serde_json::json!({ "tools": tools }))
}

/// JSON Schema for a command's parameter list.
pub fn tool_descriptor(spec: &CommandSpec) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in &spec.params {
        let mut schema = serde_json::Map::new();
        schema.insert(
            "type".to_string(),
            serde_json::json!(param.kind.schema_type()),
        );
        schema.insert(
            "description".to_string(),
            serde_json::json!(param.description),
        );
        if !param.choices.is_empty() {
            schema.insert("enum".to_string(), serde_json::json!(param.choices));
        }
        if let Some(default) = param.default {
            schema.insert("default".to_string(), default_value(param, default));
        }
        properties.insert(param.name.to_string(), serde_json::Value::Object(schema));
        if param.required {
            required.push(param.name);
        }
    }
    serde_json::json!({
        "name": spec.rpc_name,
        "description": spec.description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

fn default_value(param: &crate::commands::ParamSpec, raw: &str) -> serde_json::Value {
    use crate::commands::ParamKind;
    match param.kind {
        ParamKind::Boolean => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .unwrap_or_else(|_| serde_json::json!(raw)),
        ParamKind::Number => raw
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::json!(raw)),
        _ => serde_json::json!(raw),
    }
}

fn success_response(id: serde_json::Value, result: serde_json::Value) -> String {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
}

fn error_response(id: serde_json::Value, code: i64, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_descriptors_cover_registry() {
        for spec in registry() {
            let descriptor = tool_descriptor(spec);
            assert_eq!(descriptor["name"], spec.rpc_name);
            assert_eq!(descriptor["inputSchema"]["type"], "object");
        }
    }

    #[test]
    fn test_descriptor_marks_required_params() {
        let spec = registry()
            .iter()
            .find(|c| c.rpc_name == "create_task")
            .unwrap();
        let descriptor = tool_descriptor(spec);
        let required: Vec<&str> = descriptor["inputSchema"]["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"project"));
        assert!(required.contains(&"type"));
        assert!(!required.contains(&"variables"));
    }

    #[test]
    fn test_descriptor_choices_become_enum() {
        let spec = registry()
            .iter()
            .find(|c| c.rpc_name == "create_task_type")
            .unwrap();
        let descriptor = tool_descriptor(spec);
        let choices = &descriptor["inputSchema"]["properties"]["duplicateHandling"]["enum"];
        assert_eq!(choices, &serde_json::json!(["allow", "ignore", "fail"]));
    }

    #[test]
    fn test_error_response_shape() {
        let raw = error_response(serde_json::json!(7), -32601, "nope");
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["error"]["code"], -32601);
    }
}
