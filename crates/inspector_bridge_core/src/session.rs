use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::launcher::{self, LaunchedTarget};
use crate::types::{BreakpointRecord, PauseSnapshot, PausedEvent, RunOutcome};
use crate::{BridgeConfig, BridgeError, Result};

/// Catalogs shared between the event-intake task and tool handlers.
pub(crate) struct SessionShared {
    /// script id -> source url, populated by `Debugger.scriptParsed`.
    pub scripts: HashMap<String, String>,
    /// Formatted console lines, drained take-and-clear by readers.
    pub console: Vec<String>,
    /// Every pause observed this session, keyed by locally minted id.
    pub pauses: HashMap<u64, PauseSnapshot>,
    pub current_pause: Option<u64>,
    next_pause_id: u64,
    /// One-shot waiter armed by `start` and by each resume race.
    pub pause_waiter: Option<oneshot::Sender<PauseSnapshot>>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            console: Vec::new(),
            pauses: HashMap::new(),
            current_pause: None,
            next_pause_id: 1,
            pause_waiter: None,
        }
    }
}

/// One live debug session: the target process, the CDP client, and all
/// catalogs. The session is the only mutator of its state; the intake task
/// communicates with tool handlers through the shared catalogs and the
/// pause-waiter slot.
pub struct DebugSession {
    pub(crate) client: CdpClient,
    child: Child,
    shared: Arc<Mutex<SessionShared>>,
    intake_task: JoinHandle<()>,
    stderr_drain: JoinHandle<()>,
    pub(crate) breakpoints: HashMap<String, BreakpointRecord>,
}

impl DebugSession {
    /// Launch the target, attach to its inspector, and wait for the entry
    /// pause. On any failure the partial session is torn down before the
    /// error is returned.
    pub async fn start(
        config: &BridgeConfig,
        script_path: &str,
        args: &[String],
    ) -> Result<(Self, PauseSnapshot)> {
        let LaunchedTarget {
            mut child,
            endpoint,
            stderr_drain,
        } = launcher::launch(config, script_path, args).await?;

        let client = match CdpClient::connect(&endpoint, config.command_timeout).await {
            Ok(client) => client,
            Err(e) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                stderr_drain.abort();
                return Err(BridgeError::StartFailed(format!(
                    "inspector connect failed: {e}"
                )));
            }
        };

        // Subscriptions and the entry-pause waiter must exist before the
        // target is released, so the first pause cannot be missed.
        let script_events = client.subscribe("Debugger.scriptParsed").await;
        let console_events = client.subscribe("Runtime.consoleAPICalled").await;
        let paused_events = client.subscribe("Debugger.paused").await;

        let shared = Arc::new(Mutex::new(SessionShared::new()));
        let (entry_tx, entry_rx) = oneshot::channel();
        shared.lock().await.pause_waiter = Some(entry_tx);

        let intake_task = tokio::spawn(intake_loop(
            Arc::clone(&shared),
            script_events,
            console_events,
            paused_events,
        ));

        let session = Self {
            client,
            child,
            shared,
            intake_task,
            stderr_drain,
            breakpoints: HashMap::new(),
        };

        let enable = async {
            session.client.send("Debugger.enable", json!({})).await?;
            session.client.send("Runtime.enable", json!({})).await?;
            // The target was halted before user code; without this release
            // no pause is ever delivered.
            session
                .client
                .send("Runtime.runIfWaitingForDebugger", json!({}))
                .await?;
            Ok::<(), BridgeError>(())
        }
        .await;

        if let Err(e) = enable {
            session.shutdown().await;
            return Err(BridgeError::StartFailed(format!("attach failed: {e}")));
        }

        let entry_pause = match timeout(config.launch_timeout, entry_rx).await {
            Ok(Ok(snapshot)) => snapshot,
            _ => {
                session.shutdown().await;
                return Err(BridgeError::StartFailed(
                    "target never reached its entry pause".to_string(),
                ));
            }
        };

        info!(pause_id = entry_pause.id, "debug session attached");
        Ok((session, entry_pause))
    }

    /// The resume race: arm a one-shot pause waiter, issue the command that
    /// makes the target run, then wait for the next pause or target exit,
    /// whichever comes first. The waiter is armed strictly before the
    /// command goes out, so the resulting pause can never be lost.
    pub async fn run_until_pause_or_exit(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<RunOutcome> {
        let (pause_tx, pause_rx) = oneshot::channel();
        self.shared.lock().await.pause_waiter = Some(pause_tx);

        if let Err(e) = self.client.send(method, params).await {
            self.shared.lock().await.pause_waiter = None;
            return Err(e);
        }

        tokio::select! {
            paused = pause_rx => match paused {
                Ok(snapshot) => {
                    debug!(pause_id = snapshot.id, reason = %snapshot.reason, "resume race: paused");
                    Ok(RunOutcome::Paused(snapshot))
                }
                Err(_) => Err(BridgeError::TransportClosed),
            },
            status = self.child.wait() => {
                self.shared.lock().await.pause_waiter = None;
                let code = status.ok().and_then(|s| s.code());
                info!(?code, "resume race: target exited");
                Ok(RunOutcome::Exited { code })
            }
        }
    }

    /// Resolve an explicit pause id, falling back to the current pause.
    pub async fn resolve_pause(&self, pause_id: Option<u64>) -> Result<PauseSnapshot> {
        let shared = self.shared.lock().await;
        let id = match pause_id {
            Some(id) => id,
            None => shared.current_pause.ok_or(BridgeError::NoPause)?,
        };
        shared
            .pauses
            .get(&id)
            .cloned()
            .ok_or(BridgeError::InvalidPause(id))
    }

    /// Take-and-clear the console buffer.
    pub async fn drain_console(&self) -> Vec<String> {
        std::mem::take(&mut self.shared.lock().await.console)
    }

    pub async fn scripts_map(&self) -> HashMap<String, String> {
        self.shared.lock().await.scripts.clone()
    }

    pub async fn script_id_for_url(&self, url: &str) -> Option<String> {
        self.shared
            .lock()
            .await
            .scripts
            .iter()
            .find(|(_, catalog_url)| catalog_url.as_str() == url)
            .map(|(id, _)| id.clone())
    }

    /// Kill the target, close the CDP client, clear all catalogs.
    /// Safe to call on an already-dead target.
    pub async fn shutdown(mut self) {
        self.intake_task.abort();
        self.client.close().await;
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.stderr_drain.abort();

        let mut shared = self.shared.lock().await;
        shared.scripts.clear();
        shared.console.clear();
        shared.pauses.clear();
        shared.current_pause = None;
        shared.pause_waiter = None;
        info!("debug session closed");
    }
}

/// Process-wide holder of the at-most-one active session.
pub struct SessionManager {
    pub config: BridgeConfig,
    pub session: Option<DebugSession>,
}

impl SessionManager {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn active(&mut self) -> Result<&mut DebugSession> {
        self.session.as_mut().ok_or(BridgeError::NoSession)
    }
}

async fn intake_loop(
    shared: Arc<Mutex<SessionShared>>,
    mut script_events: mpsc::UnboundedReceiver<Value>,
    mut console_events: mpsc::UnboundedReceiver<Value>,
    mut paused_events: mpsc::UnboundedReceiver<Value>,
) {
    loop {
        tokio::select! {
            event = script_events.recv() => match event {
                Some(params) => on_script_parsed(&shared, params).await,
                None => break,
            },
            event = console_events.recv() => match event {
                Some(params) => on_console_api_called(&shared, params).await,
                None => break,
            },
            event = paused_events.recv() => match event {
                Some(params) => on_paused(&shared, params).await,
                None => break,
            },
        }
    }
    debug!("event intake ended");
}

async fn on_script_parsed(shared: &Arc<Mutex<SessionShared>>, params: Value) {
    let Some(script_id) = params.get("scriptId").and_then(Value::as_str) else {
        return;
    };
    let Some(url) = params.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) else {
        return;
    };
    shared
        .lock()
        .await
        .scripts
        .insert(script_id.to_string(), url.to_string());
}

async fn on_console_api_called(shared: &Arc<Mutex<SessionShared>>, params: Value) {
    let line = format_console_event(&params);
    shared.lock().await.console.push(line);
}

async fn on_paused(shared: &Arc<Mutex<SessionShared>>, params: Value) {
    let event: PausedEvent = match serde_json::from_value(params) {
        Ok(event) => event,
        Err(e) => {
            warn!("malformed Debugger.paused event: {e}");
            return;
        }
    };

    let mut shared = shared.lock().await;
    let id = shared.next_pause_id;
    shared.next_pause_id += 1;

    let snapshot = PauseSnapshot {
        id,
        reason: event.reason,
        call_frames: event.call_frames,
        hit_breakpoints: event.hit_breakpoints,
    };
    shared.pauses.insert(id, snapshot.clone());
    shared.current_pause = Some(id);
    debug!(pause_id = id, reason = %snapshot.reason, "target paused");

    if let Some(waiter) = shared.pause_waiter.take() {
        let _ = waiter.send(snapshot);
    }
}

/// `[level] arg arg ...` — primitive value if present, else description,
/// else the type tag.
fn format_console_event(params: &Value) -> String {
    let level = params
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("log");
    let text = params
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .map(format_remote_value)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    format!("[{level}] {text}")
}

fn format_remote_value(arg: &Value) -> String {
    if let Some(value) = arg.get("value") {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    } else if let Some(description) = arg.get("description").and_then(Value::as_str) {
        description.to_string()
    } else {
        arg.get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> Arc<Mutex<SessionShared>> {
        Arc::new(Mutex::new(SessionShared::new()))
    }

    fn paused_params(reason: &str) -> Value {
        json!({
            "callFrames": [{
                "callFrameId": "frame-0",
                "functionName": "main",
                "location": {"scriptId": "1", "lineNumber": 0, "columnNumber": 0},
                "url": "file:///tmp/sample.js",
                "scopeChain": []
            }],
            "reason": reason,
            "hitBreakpoints": []
        })
    }

    #[tokio::test]
    async fn test_on_script_parsed_records_url() {
        let shared = shared();
        on_script_parsed(&shared, json!({"scriptId": "9", "url": "file:///a.js"})).await;
        // Anonymous scripts are skipped.
        on_script_parsed(&shared, json!({"scriptId": "10", "url": ""})).await;
        on_script_parsed(&shared, json!({"scriptId": "11"})).await;

        let state = shared.lock().await;
        assert_eq!(state.scripts.len(), 1);
        assert_eq!(state.scripts.get("9").map(String::as_str), Some("file:///a.js"));
    }

    #[tokio::test]
    async fn test_on_paused_mints_monotonic_ids_and_sets_current() {
        let shared = shared();
        on_paused(&shared, paused_params("Break on start")).await;
        on_paused(&shared, paused_params("breakpoint")).await;
        on_paused(&shared, paused_params("step")).await;

        let state = shared.lock().await;
        assert_eq!(state.pauses.len(), 3);
        assert_eq!(state.current_pause, Some(3));
        let mut ids: Vec<u64> = state.pauses.keys().copied().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(state.pauses[&2].reason, "breakpoint");
    }

    #[tokio::test]
    async fn test_on_paused_fires_armed_waiter_once() {
        let shared = shared();
        let (tx, rx) = oneshot::channel();
        shared.lock().await.pause_waiter = Some(tx);

        on_paused(&shared, paused_params("breakpoint")).await;
        let snapshot = rx.await.expect("waiter fired");
        assert_eq!(snapshot.id, 1);
        assert_eq!(snapshot.reason, "breakpoint");

        // A second pause with no armed waiter still updates the catalog.
        on_paused(&shared, paused_params("step")).await;
        let state = shared.lock().await;
        assert!(state.pause_waiter.is_none());
        assert_eq!(state.current_pause, Some(2));
    }

    #[tokio::test]
    async fn test_on_paused_ignores_malformed_event() {
        let shared = shared();
        on_paused(&shared, json!({"callFrames": "not-an-array"})).await;
        let state = shared.lock().await;
        assert!(state.pauses.is_empty());
        assert!(state.current_pause.is_none());
    }

    #[tokio::test]
    async fn test_console_intake_formats_and_appends_in_order() {
        let shared = shared();
        on_console_api_called(
            &shared,
            json!({
                "type": "log",
                "args": [
                    {"type": "string", "value": "sum is"},
                    {"type": "number", "value": 5}
                ]
            }),
        )
        .await;
        on_console_api_called(
            &shared,
            json!({
                "type": "error",
                "args": [{"type": "object", "className": "Error", "description": "Error: boom"}]
            }),
        )
        .await;

        let state = shared.lock().await;
        assert_eq!(state.console, vec!["[log] sum is 5", "[error] Error: boom"]);
    }

    #[test]
    fn test_format_remote_value_falls_back_to_type_tag() {
        assert_eq!(format_remote_value(&json!({"type": "symbol"})), "symbol");
        assert_eq!(
            format_remote_value(&json!({"type": "function", "description": "function f() {}"})),
            "function f() {}"
        );
        assert_eq!(format_remote_value(&json!({"type": "boolean", "value": true})), "true");
        assert_eq!(format_remote_value(&json!({})), "unknown");
    }

    #[test]
    fn test_format_console_event_defaults_level_to_log() {
        let line = format_console_event(&json!({"args": [{"type": "string", "value": "hi"}]}));
        assert_eq!(line, "[log] hi");
    }
}
