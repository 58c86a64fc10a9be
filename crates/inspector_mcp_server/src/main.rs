use std::future::Future;
use std::sync::Arc;

use rmcp::{
    handler::server::{tool::Parameters, tool::ToolRouter, ServerHandler},
    model::*,
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use inspector_bridge_core::ops::control::{self, ContextBundle, ControlResponse};
use inspector_bridge_core::ops::{breakpoints, inspect};
use inspector_bridge_core::types::summarize_frame;
use inspector_bridge_core::{BridgeConfig, BridgeError, DebugSession, SessionManager};

type BridgeResult<T> = inspector_bridge_core::Result<T>;

fn default_depth() -> usize {
    10
}
fn default_scope_props() -> usize {
    15
}
fn default_object_props() -> usize {
    50
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StartParams {
    script_path: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StopParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ResumeExecutionParams {
    #[serde(default)]
    include_stack: bool,
    #[serde(default)]
    include_scopes: bool,
    #[serde(default)]
    include_console: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StepOverParams {
    #[serde(default)]
    include_stack: bool,
    #[serde(default)]
    include_scopes: bool,
    #[serde(default)]
    include_console: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StepIntoParams {
    #[serde(default)]
    include_stack: bool,
    #[serde(default)]
    include_scopes: bool,
    #[serde(default)]
    include_console: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StepOutParams {
    #[serde(default)]
    include_stack: bool,
    #[serde(default)]
    include_scopes: bool,
    #[serde(default)]
    include_console: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ContinueToLocationParams {
    file_path: String,
    line: u32,
    #[serde(default)]
    column: Option<u32>,
    #[serde(default)]
    include_stack: bool,
    #[serde(default)]
    include_scopes: bool,
    #[serde(default)]
    include_console: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct RestartFrameParams {
    frame_index: usize,
    #[serde(default)]
    pause_id: Option<u64>,
    #[serde(default)]
    include_stack: bool,
    #[serde(default)]
    include_scopes: bool,
    #[serde(default)]
    include_console: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SetBreakpointParams {
    file_path: String,
    line: u32,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SetBreakpointConditionParams {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    url_regex: Option<String>,
    line: u32,
    #[serde(default)]
    column: Option<u32>,
    condition: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct AddLogpointParams {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    url_regex: Option<String>,
    line: u32,
    #[serde(default)]
    column: Option<u32>,
    /// Message template; `{expr}` segments are evaluated in scope.
    message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SetExceptionBreakpointsParams {
    /// One of: none, uncaught, all.
    state: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct BlackboxScriptsParams {
    patterns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct RemoveBreakpointParams {
    breakpoint_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListBreakpointsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct GetPauseInfoParams {
    #[serde(default)]
    pause_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListCallStackParams {
    #[serde(default = "default_depth")]
    depth: usize,
    #[serde(default)]
    pause_id: Option<u64>,
    #[serde(default)]
    include_this: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct InspectScopesParams {
    #[serde(default)]
    pause_id: Option<u64>,
    #[serde(default)]
    frame_index: usize,
    #[serde(default = "default_scope_props")]
    max_props: usize,
    #[serde(default = "default_true")]
    include_this_preview: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct EvaluateExpressionParams {
    expression: String,
    #[serde(default)]
    pause_id: Option<u64>,
    #[serde(default)]
    frame_index: usize,
    #[serde(default = "default_true")]
    return_by_value: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct GetObjectPropertiesParams {
    object_id: String,
    #[serde(default = "default_object_props")]
    max_props: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListScriptsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct GetScriptSourceParams {
    #[serde(default)]
    script_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ReadConsoleParams {}

/// Carries a JSON payload as the tool result content.
fn structured(value: Value) -> CallToolResult {
    match rmcp::model::Content::json(value) {
        Ok(content) => CallToolResult::success(vec![content]),
        Err(e) => CallToolResult::error(vec![rmcp::model::Content::text(e.to_string())]),
    }
}

/// Tool-level failures stay inside the response envelope with a stable tag;
/// only host faults become MCP protocol errors.
fn error_result(error: &BridgeError) -> CallToolResult {
    structured(json!({
        "ok": false,
        "error": error.kind(),
        "message": error.to_string(),
    }))
}

fn ok_result<T: Serialize>(payload: &T) -> Result<CallToolResult, McpError> {
    let mut value = serde_json::to_value(payload)
        .map_err(|e| McpError::internal_error(format!("serialize response: {e}"), None))?;
    if let Value::Object(map) = &mut value {
        map.insert("ok".to_string(), json!(true));
    }
    Ok(structured(value))
}

/// Transport loss terminates the session; every other error leaves it alone.
fn session_fatal(error: &BridgeError) -> bool {
    matches!(
        error,
        BridgeError::TransportClosed | BridgeError::WebSocket(_)
    )
}

async fn finish<T: Serialize>(
    manager: &mut SessionManager,
    result: BridgeResult<T>,
) -> Result<CallToolResult, McpError> {
    match result {
        Ok(payload) => ok_result(&payload),
        Err(e) => {
            if session_fatal(&e) {
                if let Some(session) = manager.session.take() {
                    session.shutdown().await;
                }
            }
            Ok(error_result(&e))
        }
    }
}

/// Like `finish`, but a completion outcome also tears the session down.
async fn finish_control(
    manager: &mut SessionManager,
    result: BridgeResult<ControlResponse>,
) -> Result<CallToolResult, McpError> {
    if let Ok(response) = &result {
        if response.terminated {
            if let Some(session) = manager.session.take() {
                session.shutdown().await;
            }
        }
    }
    finish(manager, result).await
}

#[derive(Clone)]
struct InspectorMcpServer {
    tool_router: ToolRouter<Self>,
    manager: Arc<Mutex<SessionManager>>,
}

#[tool_router]
impl InspectorMcpServer {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
            manager: Arc::new(Mutex::new(SessionManager::new(BridgeConfig::from_env()))),
        }
    }

    #[tool(description = "Launch a script under the debugger and wait at its entry pause")]
    async fn start(&self, params: Parameters<StartParams>) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;

        if manager.session.is_some() {
            return Ok(error_result(&BridgeError::SessionAlreadyActive));
        }

        match DebugSession::start(&manager.config, &params.script_path, &params.args).await {
            Ok((session, entry)) => {
                let scripts = session.scripts_map().await;
                let frame = entry
                    .call_frames
                    .first()
                    .map(|f| summarize_frame(f, &scripts));
                let status = match &frame {
                    Some(f) => {
                        format!("Paused at {}:{} (reason: {})", f.url, f.line, entry.reason)
                    }
                    None => format!("Paused (reason: {})", entry.reason),
                };
                manager.session = Some(session);
                Ok(structured(json!({
                    "ok": true,
                    "status": status,
                    "pause_id": entry.id,
                    "frame": frame,
                })))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Stop the debug session and kill the target")]
    async fn stop(&self, _params: Parameters<StopParams>) -> Result<CallToolResult, McpError> {
        let mut manager = self.manager.lock().await;
        match manager.session.take() {
            Some(session) => {
                session.shutdown().await;
                Ok(structured(json!({
                    "ok": true,
                    "status": "stopped",
                })))
            }
            None => Ok(structured(json!({
                "ok": true,
                "status": "no-session",
            }))),
        }
    }

    #[tool(description = "Resume execution until the next pause or target exit")]
    async fn resume_execution(
        &self,
        params: Parameters<ResumeExecutionParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let bundle = ContextBundle {
            include_stack: params.include_stack,
            include_scopes: params.include_scopes,
            include_console: params.include_console,
        };
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => control::resume(session, bundle).await,
            Err(e) => Err(e),
        };
        finish_control(&mut manager, result).await
    }

    #[tool(description = "Step over the current line")]
    async fn step_over(
        &self,
        params: Parameters<StepOverParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let bundle = ContextBundle {
            include_stack: params.include_stack,
            include_scopes: params.include_scopes,
            include_console: params.include_console,
        };
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => control::step_over(session, bundle).await,
            Err(e) => Err(e),
        };
        finish_control(&mut manager, result).await
    }

    #[tool(description = "Step into the call on the current line")]
    async fn step_into(
        &self,
        params: Parameters<StepIntoParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let bundle = ContextBundle {
            include_stack: params.include_stack,
            include_scopes: params.include_scopes,
            include_console: params.include_console,
        };
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => control::step_into(session, bundle).await,
            Err(e) => Err(e),
        };
        finish_control(&mut manager, result).await
    }

    #[tool(description = "Step out of the current function")]
    async fn step_out(
        &self,
        params: Parameters<StepOutParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let bundle = ContextBundle {
            include_stack: params.include_stack,
            include_scopes: params.include_scopes,
            include_console: params.include_console,
        };
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => control::step_out(session, bundle).await,
            Err(e) => Err(e),
        };
        finish_control(&mut manager, result).await
    }

    #[tool(description = "Run to a specific file location (1-based line and column)")]
    async fn continue_to_location(
        &self,
        params: Parameters<ContinueToLocationParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let bundle = ContextBundle {
            include_stack: params.include_stack,
            include_scopes: params.include_scopes,
            include_console: params.include_console,
        };
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                control::continue_to_location(
                    session,
                    &params.file_path,
                    params.line,
                    params.column,
                    bundle,
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish_control(&mut manager, result).await
    }

    #[tool(description = "Restart a call frame of a pause snapshot and run to the resulting pause")]
    async fn restart_frame(
        &self,
        params: Parameters<RestartFrameParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let bundle = ContextBundle {
            include_stack: params.include_stack,
            include_scopes: params.include_scopes,
            include_console: params.include_console,
        };
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                control::restart_frame(session, params.frame_index, params.pause_id, bundle).await
            }
            Err(e) => Err(e),
        };
        finish_control(&mut manager, result).await
    }

    #[tool(description = "Set an unconditional breakpoint at a file and 1-based line")]
    async fn set_breakpoint(
        &self,
        params: Parameters<SetBreakpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                breakpoints::set_breakpoint(session, &params.file_path, params.line).await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Set a conditional breakpoint by file path or url regex")]
    async fn set_breakpoint_condition(
        &self,
        params: Parameters<SetBreakpointConditionParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                breakpoints::set_breakpoint_condition(
                    session,
                    params.file_path.as_deref(),
                    params.url_regex.as_deref(),
                    params.line,
                    params.column,
                    &params.condition,
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Add a logpoint: prints its message template without ever pausing")]
    async fn add_logpoint(
        &self,
        params: Parameters<AddLogpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                breakpoints::add_logpoint(
                    session,
                    params.file_path.as_deref(),
                    params.url_regex.as_deref(),
                    params.line,
                    params.column,
                    &params.message,
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Set the pause-on-exceptions state (none, uncaught, or all)")]
    async fn set_exception_breakpoints(
        &self,
        params: Parameters<SetExceptionBreakpointsParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => breakpoints::set_exception_breakpoints(session, &params.state)
                .await
                .map(|_| json!({"state": params.state})),
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Blackbox scripts matching the given url patterns")]
    async fn blackbox_scripts(
        &self,
        params: Parameters<BlackboxScriptsParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => breakpoints::blackbox_scripts(session, &params.patterns)
                .await
                .map(|_| json!({"blackboxed_patterns": params.patterns.len()})),
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Remove a breakpoint by its id")]
    async fn remove_breakpoint(
        &self,
        params: Parameters<RemoveBreakpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => breakpoints::remove_breakpoint(session, &params.breakpoint_id)
                .await
                .map(|removed| json!({"removed": removed})),
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "List the breakpoints created in this session")]
    async fn list_breakpoints(
        &self,
        _params: Parameters<ListBreakpointsParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut manager = self.manager.lock().await;
        let result = manager
            .active()
            .map(|session| json!({"breakpoints": breakpoints::list_breakpoints(session)}));
        finish(&mut manager, result).await
    }

    #[tool(description = "Describe the current or a named pause snapshot")]
    async fn get_pause_info(
        &self,
        params: Parameters<GetPauseInfoParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => inspect::pause_info(session, params.pause_id).await,
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "List the top frames of a pause snapshot")]
    async fn list_call_stack(
        &self,
        params: Parameters<ListCallStackParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                inspect::list_call_stack(session, params.depth, params.pause_id, params.include_this)
                    .await
                    .map(|frames| json!({"frames": frames}))
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "List scope variables for a frame of a pause snapshot")]
    async fn inspect_scopes(
        &self,
        params: Parameters<InspectScopesParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                inspect::inspect_scopes(
                    session,
                    params.pause_id,
                    params.frame_index,
                    params.max_props,
                    params.include_this_preview,
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Evaluate an expression on a paused call frame")]
    async fn evaluate_expression(
        &self,
        params: Parameters<EvaluateExpressionParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                inspect::evaluate_expression(
                    session,
                    &params.expression,
                    params.pause_id,
                    params.frame_index,
                    params.return_by_value,
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Enumerate own properties of a remote object by id")]
    async fn get_object_properties(
        &self,
        params: Parameters<GetObjectPropertiesParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                inspect::get_object_properties(session, &params.object_id, params.max_props).await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "List the scripts the target has parsed")]
    async fn list_scripts(
        &self,
        _params: Parameters<ListScriptsParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                let scripts = inspect::list_scripts(session).await;
                Ok(json!({"scripts": scripts}))
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Fetch the source of a script by id or url")]
    async fn get_script_source(
        &self,
        params: Parameters<GetScriptSourceParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                inspect::get_script_source(
                    session,
                    params.script_id.as_deref(),
                    params.url.as_deref(),
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }

    #[tool(description = "Take and clear the buffered console output")]
    async fn read_console(
        &self,
        _params: Parameters<ReadConsoleParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut manager = self.manager.lock().await;
        let result = match manager.active() {
            Ok(session) => {
                let entries = inspect::read_console(session).await;
                Ok(json!({"console": entries}))
            }
            Err(e) => Err(e),
        };
        finish(&mut manager, result).await
    }
}

#[tool_handler]
impl ServerHandler for InspectorMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Debugger bridge for Node.js scripts: start a script, set breakpoints, \
                 step, and inspect pauses over the inspector protocol"
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let server = InspectorMcpServer::new();
    let manager = server.manager.clone();

    tracing::info!("Starting Inspector MCP Server on stdio...");

    let service = server.serve(transport::stdio()).await?;

    tokio::select! {
        result = service.waiting() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, tearing down session");
            let mut manager = manager.lock().await;
            if let Some(session) = manager.session.take() {
                session.shutdown().await;
            }
        }
    }

    Ok(())
}
