use serde_json::{json, Value};

use super::to_file_url;
use crate::session::DebugSession;
use crate::types::{BreakpointKind, BreakpointRecord, Location};
use crate::{BridgeError, Result};

/// Unconditional breakpoint at a file + 1-based line. No column is
/// accepted; the target always gets column 0.
pub async fn set_breakpoint(
    session: &mut DebugSession,
    file_path: &str,
    line: u32,
) -> Result<BreakpointRecord> {
    let url = to_file_url(file_path);
    let params = json!({
        "url": url,
        "lineNumber": line.saturating_sub(1),
        "columnNumber": 0,
    });
    create(session, params, url, line, None, BreakpointKind::Breakpoint).await
}

pub async fn set_breakpoint_condition(
    session: &mut DebugSession,
    file_path: Option<&str>,
    url_regex: Option<&str>,
    line: u32,
    column: Option<u32>,
    condition: &str,
) -> Result<BreakpointRecord> {
    let (mut params, locator) = locator_params(file_path, url_regex, line, column)?;
    params["condition"] = json!(condition);
    create(
        session,
        params,
        locator,
        line,
        Some(condition.to_string()),
        BreakpointKind::Conditional,
    )
    .await
}

/// A logpoint is a conditional breakpoint whose condition prints the
/// expanded message and evaluates false, so execution never pauses.
pub async fn add_logpoint(
    session: &mut DebugSession,
    file_path: Option<&str>,
    url_regex: Option<&str>,
    line: u32,
    column: Option<u32>,
    message: &str,
) -> Result<BreakpointRecord> {
    let (mut params, locator) = locator_params(file_path, url_regex, line, column)?;
    let condition = logpoint_condition(message);
    params["condition"] = json!(condition);
    create(
        session,
        params,
        locator,
        line,
        Some(condition),
        BreakpointKind::Logpoint,
    )
    .await
}

pub async fn remove_breakpoint(session: &mut DebugSession, breakpoint_id: &str) -> Result<bool> {
    session
        .client
        .send(
            "Debugger.removeBreakpoint",
            json!({"breakpointId": breakpoint_id}),
        )
        .await?;
    Ok(session.breakpoints.remove(breakpoint_id).is_some())
}

pub fn list_breakpoints(session: &DebugSession) -> Vec<BreakpointRecord> {
    let mut records: Vec<_> = session.breakpoints.values().cloned().collect();
    records.sort_by(|a, b| a.breakpoint_id.cmp(&b.breakpoint_id));
    records
}

/// `state` is forwarded verbatim; the target validates it.
pub async fn set_exception_breakpoints(session: &DebugSession, state: &str) -> Result<()> {
    session
        .client
        .send("Debugger.setPauseOnExceptions", json!({"state": state}))
        .await?;
    Ok(())
}

pub async fn blackbox_scripts(session: &DebugSession, patterns: &[String]) -> Result<()> {
    session
        .client
        .send("Debugger.setBlackboxPatterns", json!({"patterns": patterns}))
        .await?;
    Ok(())
}

async fn create(
    session: &mut DebugSession,
    params: Value,
    locator: String,
    line: u32,
    condition: Option<String>,
    kind: BreakpointKind,
) -> Result<BreakpointRecord> {
    let reply = session
        .client
        .send("Debugger.setBreakpointByUrl", params)
        .await?;

    let breakpoint_id = reply
        .get("breakpointId")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            BridgeError::target_command_failed(
                "Debugger.setBreakpointByUrl",
                "missing breakpointId in reply",
            )
        })?
        .to_string();

    let resolved: Vec<Location> = reply
        .get("locations")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    let record = BreakpointRecord {
        breakpoint_id: breakpoint_id.clone(),
        locator,
        line,
        condition,
        kind,
        resolved,
    };
    session.breakpoints.insert(breakpoint_id, record.clone());
    Ok(record)
}

fn locator_params(
    file_path: Option<&str>,
    url_regex: Option<&str>,
    line: u32,
    column: Option<u32>,
) -> Result<(Value, String)> {
    let mut params = json!({"lineNumber": line.saturating_sub(1)});
    let locator = match (file_path, url_regex) {
        (Some(path), None) => {
            let url = to_file_url(path);
            params["url"] = json!(url);
            url
        }
        (None, Some(regex)) => {
            params["urlRegex"] = json!(regex);
            regex.to_string()
        }
        _ => return Err(BridgeError::MissingLocator),
    };
    if let Some(column) = column {
        params["columnNumber"] = json!(column.saturating_sub(1));
    }
    Ok((params, locator))
}

/// Turn a `{expr}`-templated message into a target-side condition that
/// logs and stays false. Backticks and backslashes in the message are
/// escaped so they cannot break out of the template literal.
fn logpoint_condition(message: &str) -> String {
    let mut template = String::with_capacity(message.len() + 8);
    for c in message.chars() {
        match c {
            '`' => template.push_str("\\`"),
            '\\' => template.push_str("\\\\"),
            '{' => template.push_str("${"),
            _ => template.push(c),
        }
    }
    format!("console.log(`{template}`), false")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logpoint_condition_interpolates_expressions() {
        assert_eq!(
            logpoint_condition("x={x}"),
            "console.log(`x=${x}`), false"
        );
        assert_eq!(
            logpoint_condition("sum of {a} and {b} is {a + b}"),
            "console.log(`sum of ${a} and ${b} is ${a + b}`), false"
        );
    }

    #[test]
    fn test_logpoint_condition_escapes_backticks_and_backslashes() {
        assert_eq!(
            logpoint_condition("tick ` and slash \\"),
            "console.log(`tick \\` and slash \\\\`), false"
        );
    }

    #[test]
    fn test_logpoint_condition_plain_message() {
        assert_eq!(
            logpoint_condition("reached hot path"),
            "console.log(`reached hot path`), false"
        );
    }

    #[test]
    fn test_locator_params_requires_exactly_one_locator() {
        let err = locator_params(None, None, 3, None).expect_err("no locator");
        assert!(matches!(err, BridgeError::MissingLocator));

        let err = locator_params(Some("/tmp/a.js"), Some("a\\.js$"), 3, None)
            .expect_err("both locators");
        assert!(matches!(err, BridgeError::MissingLocator));
    }

    #[test]
    fn test_locator_params_converts_to_target_coordinates() {
        let (params, locator) =
            locator_params(Some("/tmp/a.js"), None, 7, Some(12)).expect("file locator");
        assert_eq!(locator, "file:///tmp/a.js");
        assert_eq!(params["url"], "file:///tmp/a.js");
        assert_eq!(params["lineNumber"], 6);
        assert_eq!(params["columnNumber"], 11);
        assert!(params.get("urlRegex").is_none());
    }

    #[test]
    fn test_locator_params_url_regex_without_column() {
        let (params, locator) =
            locator_params(None, Some("sample\\.js$"), 2, None).expect("regex locator");
        assert_eq!(locator, "sample\\.js$");
        assert_eq!(params["urlRegex"], "sample\\.js$");
        assert_eq!(params["lineNumber"], 1);
        assert!(params.get("columnNumber").is_none());
        assert!(params.get("url").is_none());
    }
}
