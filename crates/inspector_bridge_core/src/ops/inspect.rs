use serde::Serialize;
use serde_json::{json, Value};

use super::to_file_url;
use crate::session::DebugSession;
use crate::types::{
    summarize_frame, FrameSummary, PauseSnapshot, PropertyDescriptor, PropertySummary,
    ReceiverSummary, RemoteObject, ScopeSummary, SourceLocation,
};
use crate::{BridgeError, Result};

pub(crate) const DEFAULT_SCOPE_PROPS: usize = 15;
pub(crate) const GLOBAL_SCOPE_PROPS: usize = 5;

#[derive(Debug, Serialize)]
pub struct PauseInfo {
    pub pause_id: u64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub scope_types: Vec<String>,
}

pub async fn pause_info(session: &DebugSession, pause_id: Option<u64>) -> Result<PauseInfo> {
    let snapshot = session.resolve_pause(pause_id).await?;
    let scripts = session.scripts_map().await;

    let top = snapshot.call_frames.first();
    let summary = top.map(|frame| summarize_frame(frame, &scripts));

    Ok(PauseInfo {
        pause_id: snapshot.id,
        reason: snapshot.reason.clone(),
        location: summary.as_ref().map(|s| SourceLocation {
            url: s.url.clone(),
            line: s.line,
            column: s.column,
        }),
        function_name: summary.and_then(|s| s.function_name),
        scope_types: top
            .map(|frame| {
                frame
                    .scope_chain
                    .iter()
                    .map(|scope| scope.scope_type.clone())
                    .collect()
            })
            .unwrap_or_default(),
    })
}

#[derive(Debug, Serialize)]
pub struct StackEntry {
    pub index: usize,
    #[serde(flatten)]
    pub frame: FrameSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub this: Option<ReceiverSummary>,
}

pub async fn list_call_stack(
    session: &DebugSession,
    depth: usize,
    pause_id: Option<u64>,
    include_this: bool,
) -> Result<Vec<StackEntry>> {
    let snapshot = session.resolve_pause(pause_id).await?;
    let scripts = session.scripts_map().await;

    Ok(snapshot
        .call_frames
        .iter()
        .take(depth)
        .enumerate()
        .map(|(index, frame)| StackEntry {
            index,
            frame: summarize_frame(frame, &scripts),
            this: if include_this {
                frame.this.as_ref().map(ReceiverSummary::from_remote)
            } else {
                None
            },
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct ScopesResponse {
    pub pause_id: u64,
    pub frame_index: usize,
    pub scopes: Vec<ScopeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub this: Option<ReceiverPreview>,
}

#[derive(Debug, Serialize)]
pub struct ReceiverPreview {
    #[serde(flatten)]
    pub summary: ReceiverSummary,
    pub preview: Vec<PropertySummary>,
}

pub async fn inspect_scopes(
    session: &DebugSession,
    pause_id: Option<u64>,
    frame_index: usize,
    max_props: usize,
    include_this_preview: bool,
) -> Result<ScopesResponse> {
    let snapshot = session.resolve_pause(pause_id).await?;
    let scopes = scope_summaries(session, &snapshot, frame_index, max_props).await?;

    let this = if include_this_preview {
        let frame = &snapshot.call_frames[frame_index];
        match &frame.this {
            Some(receiver) => {
                let preview = match &receiver.object_id {
                    Some(object_id) => {
                        object_properties(session, object_id, GLOBAL_SCOPE_PROPS)
                            .await?
                            .0
                    }
                    None => Vec::new(),
                };
                Some(ReceiverPreview {
                    summary: ReceiverSummary::from_remote(receiver),
                    preview,
                })
            }
            None => None,
        }
    } else {
        None
    };

    Ok(ScopesResponse {
        pause_id: snapshot.id,
        frame_index,
        scopes,
        this,
    })
}

/// Summaries for every scope in the frame that carries an object handle.
/// The global scope is capped harder than the rest.
pub(crate) async fn scope_summaries(
    session: &DebugSession,
    snapshot: &PauseSnapshot,
    frame_index: usize,
    max_props: usize,
) -> Result<Vec<ScopeSummary>> {
    let frame = snapshot
        .call_frames
        .get(frame_index)
        .ok_or(BridgeError::InvalidFrame {
            index: frame_index,
            available: snapshot.call_frames.len(),
        })?;

    let mut scopes = Vec::with_capacity(frame.scope_chain.len());
    for scope in &frame.scope_chain {
        let Some(object_id) = &scope.object.object_id else {
            continue;
        };
        let cap = if scope.scope_type == "global" {
            GLOBAL_SCOPE_PROPS.min(max_props)
        } else {
            max_props
        };
        let (properties, truncated) = object_properties(session, object_id, cap).await?;
        scopes.push(ScopeSummary {
            scope_type: scope.scope_type.clone(),
            properties,
            truncated,
        });
    }
    Ok(scopes)
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub pause_id: u64,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub console: Vec<String>,
}

/// Evaluate on the selected frame with the command-line API enabled. A
/// target-reported exception envelope becomes `EvaluationException`.
pub async fn evaluate_expression(
    session: &DebugSession,
    expr: &str,
    pause_id: Option<u64>,
    frame_index: usize,
    return_by_value: bool,
) -> Result<EvaluateResponse> {
    let snapshot = session.resolve_pause(pause_id).await?;
    let frame = snapshot
        .call_frames
        .get(frame_index)
        .ok_or(BridgeError::InvalidFrame {
            index: frame_index,
            available: snapshot.call_frames.len(),
        })?;

    let reply = session
        .client
        .send(
            "Debugger.evaluateOnCallFrame",
            json!({
                "callFrameId": frame.call_frame_id,
                "expression": expr,
                "includeCommandLineAPI": true,
                "returnByValue": return_by_value,
            }),
        )
        .await?;

    if let Some(details) = reply.get("exceptionDetails") {
        return Err(BridgeError::EvaluationException(exception_description(
            details,
        )));
    }

    let object: RemoteObject = serde_json::from_value(
        reply
            .get("result")
            .cloned()
            .unwrap_or_else(|| json!({"type": "undefined"})),
    )?;

    let value = match (&object.value, return_by_value) {
        (Some(value), true) => value.clone(),
        _ => Value::String(
            object
                .description
                .clone()
                .unwrap_or_else(|| object.object_type.clone()),
        ),
    };

    let console = session.drain_console().await;
    Ok(EvaluateResponse {
        pause_id: snapshot.id,
        value_type: object.object_type,
        value,
        object_id: object.object_id,
        console,
    })
}

#[derive(Debug, Serialize)]
pub struct ObjectPropertiesResponse {
    pub object_id: String,
    pub properties: Vec<PropertySummary>,
    pub truncated: bool,
}

pub async fn get_object_properties(
    session: &DebugSession,
    object_id: &str,
    max_props: usize,
) -> Result<ObjectPropertiesResponse> {
    let (properties, truncated) = object_properties(session, object_id, max_props).await?;
    Ok(ObjectPropertiesResponse {
        object_id: object_id.to_string(),
        properties,
        truncated,
    })
}

#[derive(Debug, Serialize)]
pub struct ScriptRecord {
    pub script_id: String,
    pub url: String,
}

pub async fn list_scripts(session: &DebugSession) -> Vec<ScriptRecord> {
    let mut records: Vec<ScriptRecord> = session
        .scripts_map()
        .await
        .into_iter()
        .map(|(script_id, url)| ScriptRecord { script_id, url })
        .collect();
    // Script ids are decimal strings; sort numerically where possible.
    records.sort_by_key(|r| (r.script_id.parse::<u64>().ok(), r.script_id.clone()));
    records
}

#[derive(Debug, Serialize)]
pub struct ScriptSourceResponse {
    pub script_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source: String,
}

pub async fn get_script_source(
    session: &DebugSession,
    script_id: Option<&str>,
    url: Option<&str>,
) -> Result<ScriptSourceResponse> {
    let script_id = match (script_id, url) {
        (Some(id), _) => id.to_string(),
        (None, Some(url)) => {
            match session.script_id_for_url(url).await {
                Some(id) => id,
                None => session
                    .script_id_for_url(&to_file_url(url))
                    .await
                    .ok_or_else(|| BridgeError::UnknownScript(url.to_string()))?,
            }
        }
        (None, None) => return Err(BridgeError::MissingLocator),
    };

    let reply = session
        .client
        .send(
            "Debugger.getScriptSource",
            json!({"scriptId": script_id}),
        )
        .await?;
    let source = reply
        .get("scriptSource")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            BridgeError::target_command_failed(
                "Debugger.getScriptSource",
                "missing scriptSource in reply",
            )
        })?
        .to_string();

    let url = session.scripts_map().await.get(&script_id).cloned();
    Ok(ScriptSourceResponse {
        script_id,
        url,
        source,
    })
}

pub async fn read_console(session: &DebugSession) -> Vec<String> {
    session.drain_console().await
}

pub(crate) async fn object_properties(
    session: &DebugSession,
    object_id: &str,
    cap: usize,
) -> Result<(Vec<PropertySummary>, bool)> {
    let reply = session
        .client
        .send(
            "Runtime.getProperties",
            json!({"objectId": object_id, "ownProperties": true}),
        )
        .await?;
    let descriptors: Vec<PropertyDescriptor> = serde_json::from_value(
        reply.get("result").cloned().unwrap_or_else(|| json!([])),
    )?;
    Ok(summarize_descriptors(descriptors, cap))
}

fn summarize_descriptors(
    descriptors: Vec<PropertyDescriptor>,
    cap: usize,
) -> (Vec<PropertySummary>, bool) {
    let total = descriptors.len();
    let summaries = descriptors
        .into_iter()
        .take(cap)
        .map(property_summary)
        .collect();
    (summaries, total > cap)
}

fn property_summary(descriptor: PropertyDescriptor) -> PropertySummary {
    match descriptor.value {
        Some(object) => {
            let value = object.value.clone().unwrap_or_else(|| {
                Value::String(
                    object
                        .description
                        .clone()
                        .unwrap_or_else(|| object.object_type.clone()),
                )
            });
            PropertySummary {
                name: descriptor.name,
                value_type: object.object_type,
                value,
                object_id: object.object_id,
            }
        }
        // Accessor properties carry no materialized value.
        None => PropertySummary {
            name: descriptor.name,
            value_type: "accessor".to_string(),
            value: Value::Null,
            object_id: None,
        },
    }
}

fn exception_description(details: &Value) -> String {
    let exception = details.get("exception");
    if let Some(description) = exception
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
    {
        return description.to_string();
    }
    // Thrown primitives arrive as a bare value with no description.
    if let Some(value) = exception.and_then(|e| e.get("value")) {
        return value.to_string();
    }
    details
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("evaluation threw")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptors(count: usize) -> Vec<PropertyDescriptor> {
        (0..count)
            .map(|i| {
                serde_json::from_value(json!({
                    "name": format!("p{i}"),
                    "value": {"type": "number", "value": i}
                }))
                .expect("descriptor json")
            })
            .collect()
    }

    #[test]
    fn test_summarize_descriptors_caps_and_flags_truncation() {
        let (summaries, truncated) = summarize_descriptors(descriptors(8), 5);
        assert_eq!(summaries.len(), 5);
        assert!(truncated);
        assert_eq!(summaries[0].name, "p0");
        assert_eq!(summaries[4].value, json!(4));

        let (summaries, truncated) = summarize_descriptors(descriptors(3), 5);
        assert_eq!(summaries.len(), 3);
        assert!(!truncated);
    }

    #[test]
    fn test_property_summary_prefers_value_then_description() {
        let with_value: PropertyDescriptor = serde_json::from_value(json!({
            "name": "tag",
            "value": {"type": "string", "value": "C"}
        }))
        .expect("descriptor json");
        let summary = property_summary(with_value);
        assert_eq!(summary.value, json!("C"));
        assert_eq!(summary.value_type, "string");
        assert_eq!(summary.object_id, None);

        let with_handle: PropertyDescriptor = serde_json::from_value(json!({
            "name": "nested",
            "value": {"type": "object", "className": "Object", "description": "Object",
                      "objectId": "obj-7"}
        }))
        .expect("descriptor json");
        let summary = property_summary(with_handle);
        assert_eq!(summary.value, json!("Object"));
        assert_eq!(summary.object_id.as_deref(), Some("obj-7"));
    }

    #[test]
    fn test_property_summary_accessor_without_value() {
        let accessor: PropertyDescriptor =
            serde_json::from_value(json!({"name": "computed"})).expect("descriptor json");
        let summary = property_summary(accessor);
        assert_eq!(summary.value_type, "accessor");
        assert_eq!(summary.value, Value::Null);
    }

    #[test]
    fn test_exception_description_variants() {
        let thrown_error = json!({
            "text": "Uncaught",
            "exception": {"type": "object", "className": "ReferenceError",
                          "description": "ReferenceError: missing is not defined"}
        });
        assert_eq!(
            exception_description(&thrown_error),
            "ReferenceError: missing is not defined"
        );

        let thrown_primitive = json!({
            "text": "Uncaught",
            "exception": {"type": "number", "value": 42}
        });
        assert_eq!(exception_description(&thrown_primitive), "42");

        let bare = json!({"text": "Uncaught"});
        assert_eq!(exception_description(&bare), "Uncaught");

        assert_eq!(exception_description(&json!({})), "evaluation threw");
    }
}
