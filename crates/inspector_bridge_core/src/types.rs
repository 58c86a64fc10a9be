use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Location in a parsed script, in target coordinates (0-based).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

/// Mirror of the target's RemoteObject: an opaque handle plus whatever
/// preview data the target chose to inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// One of: global, local, closure, with, catch, block, script, module, eval.
    #[serde(rename = "type")]
    pub scope_type: String,
    pub object: RemoteObject,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
    #[serde(default)]
    pub this: Option<RemoteObject>,
}

/// Payload of a `Debugger.paused` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    pub reason: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
}

/// Own-property descriptor from `Runtime.getProperties`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

/// A pause observed by the intake task. Snapshots stay in the catalog for
/// the lifetime of the session so earlier pauses remain inspectable by id;
/// their frame and object handles go stale as soon as the target resumes.
#[derive(Debug, Clone)]
pub struct PauseSnapshot {
    pub id: u64,
    pub reason: String,
    pub call_frames: Vec<CallFrame>,
    pub hit_breakpoints: Vec<String>,
}

/// Outcome of the resume-until-next-pause-or-exit race.
#[derive(Debug)]
pub enum RunOutcome {
    Paused(PauseSnapshot),
    Exited { code: Option<i32> },
}

/// Tool-facing frame summary (1-based coordinates).
#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub function_name: Option<String>,
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// Tool-facing source location (1-based coordinates).
#[derive(Debug, Clone, Serialize)]
pub struct SourceLocation {
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// Summary of a single own property of a remote object.
#[derive(Debug, Clone, Serialize)]
pub struct PropertySummary {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    #[serde(rename = "type")]
    pub scope_type: String,
    pub properties: Vec<PropertySummary>,
    pub truncated: bool,
}

/// Shallow summary of a receiver or other remote object, without properties.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiverSummary {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl ReceiverSummary {
    pub fn from_remote(object: &RemoteObject) -> Self {
        Self {
            value_type: object.object_type.clone(),
            class_name: object.class_name.clone(),
            description: object.description.clone(),
            object_id: object.object_id.clone(),
        }
    }
}

/// A breakpoint the session created, kept so it can be listed and removed.
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointRecord {
    pub breakpoint_id: String,
    /// The url or url regex the breakpoint was requested against.
    pub locator: String,
    /// Requested line, 1-based as the caller supplied it.
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub kind: BreakpointKind,
    pub resolved: Vec<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKind {
    Breakpoint,
    Conditional,
    Logpoint,
}

/// 1-based tool-facing summary of a call frame. Frames whose url the target
/// omitted fall back to the script catalog, then to `<anonymous>`.
pub fn summarize_frame(frame: &CallFrame, scripts: &HashMap<String, String>) -> FrameSummary {
    let url = frame
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| scripts.get(&frame.location.script_id).cloned())
        .unwrap_or_else(|| "<anonymous>".to_string());

    FrameSummary {
        function_name: if frame.function_name.is_empty() {
            None
        } else {
            Some(frame.function_name.clone())
        },
        url,
        line: frame.location.line_number + 1,
        column: frame.location.column_number.unwrap_or(0) + 1,
    }
}
