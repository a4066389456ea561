use mvquery_core::error::codes;
use mvquery_core::expression::Operation;
use mvquery_core::request::AggregationRequest;
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::error::QueryError;
use crate::executor::MetricsViewClient;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "mvquery-mcp";

/// JSON-RPC 2.0 tool server in front of a [`MetricsViewClient`].
pub struct McpServer {
    client: MetricsViewClient,
    session_id: String,
}

impl McpServer {
    pub fn new(client: MetricsViewClient) -> Self {
        Self {
            client,
            session_id: format!("stdio-{}", Uuid::now_v7()),
        }
    }

    pub async fn serve_stdio(&self) -> Result<(), String> {
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Reads messages until EOF. Each reply uses the framing of the message
    /// that caused it.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(session_id = %self.session_id, "MCP session started");
        loop {
            let frame = read_frame(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(frame) = frame else {
                break;
            };

            let responses = match serde_json::from_slice::<Value>(&frame.payload) {
                Ok(incoming) => self.handle_incoming_message(incoming).await,
                Err(e) => vec![rpc_response(
                    Value::Null,
                    Err(RpcError::parse_error(format!("Invalid JSON payload: {e}"))),
                )],
            };
            for response in responses {
                write_frame(&mut writer, &response, frame.framing)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }
        tracing::info!(session_id = %self.session_id, "MCP session closed");
        Ok(())
    }

    /// Replies for one decoded payload. A batch answers every request in it
    /// and stays silent for its notifications.
    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let messages = match incoming {
            Value::Array(batch) if batch.is_empty() => {
                return vec![rpc_response(
                    Value::Null,
                    Err(RpcError::invalid_request("Batch request must not be empty")),
                )];
            }
            Value::Array(batch) => batch,
            single => vec![single],
        };

        let mut responses = Vec::with_capacity(messages.len());
        for message in messages {
            responses.extend(self.handle_single_message(message).await);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(rpc_response(
                Value::Null,
                Err(RpcError::invalid_request("Request must be a JSON object")),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(rpc_response(
                id,
                Err(RpcError::invalid_request("jsonrpc must be '2.0'")),
            ));
        }

        // No method: a client response. This server never issues requests.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(rpc_response(id, self.handle_request(method, params).await)),
            None => {
                self.handle_notification(method);
                None
            }
        }
    }

    /// Notifications carry no id and never get a reply. None of them change
    /// server state; they are only logged.
    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => {
                tracing::info!(session_id = %self.session_id, "MCP client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!(session_id = %self.session_id, "cancellation ignored; calls run to completion");
            }
            _ => tracing::debug!(session_id = %self.session_id, method, "notification ignored"),
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        tracing::info!(session_id = %self.session_id, tool = name, "tool call");
        Ok(match self.call_tool(name, args).await {
            Ok(payload) => tool_result(&payload, false),
            Err(err) => {
                tracing::warn!(
                    tool = name,
                    error = %err.code,
                    message = %err.message,
                    "tool call failed"
                );
                tool_result(&err.to_value(), true)
            }
        })
    }

    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, ToolError> {
        match name {
            "list_metrics_views" => {
                let names = self.client.list_metrics_views().await?;
                Ok(json!(names))
            }
            "get_metrics_view_spec" => {
                let view = required_string(&args, "name")?;
                Ok(self.client.get_metrics_view_spec(&view).await?)
            }
            "get_metrics_view_time_range_summary" => {
                let view = required_string(&args, "metrics_view")?;
                Ok(self.client.get_metrics_view_time_range_summary(&view).await?)
            }
            "get_metrics_view_aggregation" => {
                let request = AggregationRequest::from_json(Value::Object(args))
                    .map_err(QueryError::from)?;
                Ok(self.client.get_metrics_view_aggregation(&request).await?)
            }
            "refresh_session" => {
                let session = self.client.refresh_session().await?;
                Ok(json!({
                    "refreshed": true,
                    "host": session.host,
                    "instance_id": session.instance_id,
                }))
            }
            _ => Err(ToolError::new(codes::UNKNOWN_TOOL, format!("Unknown tool: {name}"))
                .with_field("name")
                .with_docs_hint("Call tools/list for the available tools.")),
        }
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "instructions": "Call list_metrics_views first, then get_metrics_view_spec to learn a view's dimensions and measures, and get_metrics_view_time_range_summary before choosing a time range. Build aggregations from names found in the spec only. If a call fails with session_unavailable or an HTTP 401, call refresh_session and retry once."
    })
}

struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn expression_schema() -> Value {
    let operations: Vec<&str> = Operation::ALL.iter().map(|op| op.as_str()).collect();
    json!({
        "type": "object",
        "description": "Filter expression. Set exactly one of ident, val, cond, subquery.",
        "properties": {
            "ident": {"type": "string", "description": "Dimension or measure name"},
            "val": {"description": "Literal: string, number, boolean or array"},
            "cond": {
                "type": "object",
                "properties": {
                    "op": {"type": "string", "enum": operations},
                    "exprs": {"type": "array", "items": {"type": "object"}}
                },
                "required": ["op"]
            },
            "subquery": {
                "type": "object",
                "properties": {
                    "dimension": {"type": "string"},
                    "measures": {"type": "array", "items": {"type": "string"}},
                    "where": {"type": "object"},
                    "having": {"type": "object"}
                }
            }
        }
    })
}

fn time_range_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start": {"type": "string", "format": "date-time"},
            "end": {"type": "string", "format": "date-time"}
        },
        "required": ["start", "end"]
    })
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list_metrics_views",
            description: "List the names of the metrics views available in the project.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "get_metrics_view_spec",
            description: "Get the dimensions, measures and time dimension of a metrics view. Empty fields are omitted.",
            input_schema: json!({
                "type": "object",
                "properties": {"name": {"type": "string", "description": "Metrics view name"}},
                "required": ["name"]
            }),
        },
        ToolDefinition {
            name: "get_metrics_view_time_range_summary",
            description: "Get the minimum and maximum timestamps of a metrics view's time dimension.",
            input_schema: json!({
                "type": "object",
                "properties": {"metrics_view": {"type": "string"}},
                "required": ["metrics_view"]
            }),
        },
        ToolDefinition {
            name: "get_metrics_view_aggregation",
            description: "Aggregate measures of a metrics view, grouped by dimensions, with optional filters, sorting, time ranges and paging.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "metrics_view": {"type": "string"},
                    "dimensions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "time_grain": {"type": "string", "description": "TIME_GRAIN_* token"}
                            },
                            "required": ["name"]
                        }
                    },
                    "measures": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"name": {"type": "string"}},
                            "required": ["name"]
                        }
                    },
                    "sort": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "desc": {"type": "boolean"}
                            },
                            "required": ["name"]
                        }
                    },
                    "time_range": time_range_schema(),
                    "comparison_time_range": time_range_schema(),
                    "pivot_on": {"type": "array", "items": {"type": "string"}},
                    "where": expression_schema(),
                    "having": expression_schema(),
                    "limit": {"type": ["integer", "string"], "minimum": 0},
                    "offset": {"type": ["integer", "string"], "minimum": 0},
                    "exact": {"type": "boolean"},
                    "fill_missing": {"type": "boolean"},
                    "rows": {"type": "boolean"}
                },
                "required": ["metrics_view", "dimensions", "measures"]
            }),
        },
        ToolDefinition {
            name: "refresh_session",
            description: "Fetch a new runtime credential; the current one is kept if the lookup fails.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn tool_result(payload: &Value, is_error: bool) -> Value {
    let text = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
    details: Option<Value>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    /// Tool-level error payload. Optional fields are omitted when unset.
    fn to_value(&self) -> Value {
        let optional = [
            ("field", self.field.clone().map(Value::String)),
            ("docs_hint", self.docs_hint.clone().map(Value::String)),
            ("details", self.details.clone()),
        ];
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::String(self.code.clone()));
        payload.insert("message".to_string(), Value::String(self.message.clone()));
        payload.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (key.to_string(), v))),
        );
        Value::Object(payload)
    }
}

/// Query failures keep their code, field path, hint and details so the
/// caller can fix the request without reading logs.
impl From<QueryError> for ToolError {
    fn from(err: QueryError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            field: err.field().map(str::to_string),
            docs_hint: err.docs_hint().map(str::to_string),
            details: err.details(),
        }
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("Missing required field '{key}'"),
        )
        .with_field(key)
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Value::String(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must not be empty"),
        )
        .with_field(key)),
        _ => Err(
            ToolError::new(codes::VALIDATION_FAILED, format!("'{key}' must be a string"))
                .with_field(key),
        ),
    }
}

/// JSON-RPC envelope carrying either `result` or `error`.
fn rpc_response(id: Value, outcome: Result<Value, RpcError>) -> Value {
    let (key, body) = match outcome {
        Ok(result) => ("result", result),
        Err(error) => (
            "error",
            json!({"code": error.code, "message": error.message}),
        ),
    };
    let mut envelope = Map::new();
    envelope.insert("jsonrpc".to_string(), json!("2.0"));
    envelope.insert("id".to_string(), id);
    envelope.insert(key.to_string(), body);
    Value::Object(envelope)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// LSP-style `Content-Length` header block followed by the body
    ContentLength,
    /// One JSON document per line
    Newline,
}

struct Frame {
    framing: Framing,
    payload: Vec<u8>,
}

fn parse_content_length(line: &str) -> Result<Option<usize>, std::io::Error> {
    if !line.to_ascii_lowercase().starts_with("content-length:") {
        return Ok(None);
    }
    let raw_len = line
        .split_once(':')
        .map(|(_, right)| right.trim())
        .unwrap_or_default();
    raw_len.parse::<usize>().map(Some).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Invalid Content-Length header",
        )
    })
}

/// `Name: value` with a token-like name, as in `Content-Length: 12`.
fn is_header_line(line: &str) -> bool {
    line.split_once(':').is_some_and(|(name, _)| {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Next message from the stream, or `None` at EOF. Blank lines between
/// messages are skipped. A `Name: value` line opens a header block; any
/// other line is one newline-delimited message, parsed or not.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let first = line.trim();
    if first.starts_with('{') || first.starts_with('[') || !is_header_line(first) {
        return Ok(Some(Frame {
            framing: Framing::Newline,
            payload: first.as_bytes().to_vec(),
        }));
    }

    let mut content_length = parse_content_length(first)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }
        let header = header.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        if let Some(len) = parse_content_length(header)? {
            content_length = Some(len);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame {
        framing: Framing::ContentLength,
        payload,
    }))
}

async fn write_frame<W>(writer: &mut W, value: &Value, framing: Framing) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Newline => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
