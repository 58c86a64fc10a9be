use serde::Serialize;
use serde_json::json;

use super::{inspect, to_file_url};
use crate::session::DebugSession;
use crate::types::{summarize_frame, FrameSummary, PauseSnapshot, RunOutcome, ScopeSummary};
use crate::{BridgeError, Result};

/// Optional context attached to every execution-control response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextBundle {
    pub include_stack: bool,
    pub include_scopes: bool,
    pub include_console: bool,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: String,
    /// True when the target exited instead of pausing; the session is gone.
    pub terminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<FrameSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<ScopeSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

pub async fn resume(session: &mut DebugSession, bundle: ContextBundle) -> Result<ControlResponse> {
    run_control(session, "Debugger.resume", json!({}), bundle).await
}

pub async fn step_over(
    session: &mut DebugSession,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    run_control(session, "Debugger.stepOver", json!({}), bundle).await
}

pub async fn step_into(
    session: &mut DebugSession,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    run_control(session, "Debugger.stepInto", json!({}), bundle).await
}

pub async fn step_out(
    session: &mut DebugSession,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    run_control(session, "Debugger.stepOut", json!({}), bundle).await
}

/// Run to a 1-based file location. The file must already be in the script
/// catalog; a path the target never parsed is `UnknownScript`.
pub async fn continue_to_location(
    session: &mut DebugSession,
    file_path: &str,
    line: u32,
    column: Option<u32>,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    let url = to_file_url(file_path);
    let script_id = session
        .script_id_for_url(&url)
        .await
        .ok_or_else(|| BridgeError::UnknownScript(file_path.to_string()))?;

    let mut location = json!({
        "scriptId": script_id,
        "lineNumber": line.saturating_sub(1),
    });
    if let Some(column) = column {
        location["columnNumber"] = json!(column.saturating_sub(1));
    }

    run_control(
        session,
        "Debugger.continueToLocation",
        json!({"location": location}),
        bundle,
    )
    .await
}

/// Restart the frame at `frame_index` of the named pause (default current),
/// then race for the resulting pause.
pub async fn restart_frame(
    session: &mut DebugSession,
    frame_index: usize,
    pause_id: Option<u64>,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    let snapshot = session.resolve_pause(pause_id).await?;
    let frame = snapshot
        .call_frames
        .get(frame_index)
        .ok_or(BridgeError::InvalidFrame {
            index: frame_index,
            available: snapshot.call_frames.len(),
        })?;

    run_control(
        session,
        "Debugger.restartFrame",
        json!({"callFrameId": frame.call_frame_id, "mode": "StepInto"}),
        bundle,
    )
    .await
}

async fn run_control(
    session: &mut DebugSession,
    method: &str,
    params: serde_json::Value,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    match session.run_until_pause_or_exit(method, params).await? {
        RunOutcome::Paused(snapshot) => paused_response(session, snapshot, bundle).await,
        RunOutcome::Exited { code } => {
            // Whatever the target printed on its way out still belongs to
            // the caller.
            let console = session.drain_console().await;
            Ok(ControlResponse {
                status: completion_status(code),
                terminated: true,
                pause_id: None,
                reason: None,
                frame: None,
                stack: None,
                scopes: None,
                console: Some(console),
                exit_code: code,
            })
        }
    }
}

async fn paused_response(
    session: &mut DebugSession,
    snapshot: PauseSnapshot,
    bundle: ContextBundle,
) -> Result<ControlResponse> {
    let scripts = session.scripts_map().await;
    let frame = snapshot
        .call_frames
        .first()
        .map(|f| summarize_frame(f, &scripts));

    let stack = bundle.include_stack.then(|| {
        snapshot
            .call_frames
            .iter()
            .map(|f| summarize_frame(f, &scripts))
            .collect::<Vec<_>>()
    });

    let scopes = if bundle.include_scopes {
        Some(inspect::scope_summaries(session, &snapshot, 0, inspect::DEFAULT_SCOPE_PROPS).await?)
    } else {
        None
    };

    let console = if bundle.include_console {
        Some(session.drain_console().await)
    } else {
        None
    };

    Ok(ControlResponse {
        status: paused_status(&snapshot, frame.as_ref()),
        terminated: false,
        pause_id: Some(snapshot.id),
        reason: Some(snapshot.reason.clone()),
        frame,
        stack,
        scopes,
        console,
        exit_code: None,
    })
}

fn paused_status(snapshot: &PauseSnapshot, frame: Option<&FrameSummary>) -> String {
    match frame {
        Some(frame) => format!(
            "Paused at {}:{} (reason: {})",
            frame.url, frame.line, snapshot.reason
        ),
        None => format!("Paused (reason: {})", snapshot.reason),
    }
}

fn completion_status(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("Target exited with code {code}"),
        None => "Target exited".to_string(),
    }
}
