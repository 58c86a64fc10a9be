use std::process::Stdio;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::{BridgeConfig, BridgeError, Result};

/// A launched target: the halted child plus the inspector endpoint it
/// announced on stderr, and the drain task that keeps the pipe from
/// backing up for the rest of the session.
#[derive(Debug)]
pub struct LaunchedTarget {
    pub child: Child,
    pub endpoint: String,
    pub stderr_drain: JoinHandle<()>,
}

/// Spawn the runtime with an ephemeral-port inspect-and-break flag and scan
/// its stderr for the announced WebSocket endpoint. The first match wins;
/// stderr keeps draining after that. A child that exits before announcing
/// anything fails with `LauncherExitedEarly`.
pub async fn launch(
    config: &BridgeConfig,
    script_path: &str,
    args: &[String],
) -> Result<LaunchedTarget> {
    let mut command = Command::new(&config.runtime);
    command
        .arg(format!("--inspect-brk={}:0", config.host))
        .arg(script_path)
        .args(args)
        // An inherited inspector flag would fight over the port.
        .env_remove("NODE_OPTIONS")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        BridgeError::StartFailed(format!("failed to spawn '{}': {e}", config.runtime))
    })?;

    let stderr = child.stderr.take().ok_or_else(|| {
        BridgeError::StartFailed("missing stderr pipe for target process".to_string())
    })?;
    let mut lines = BufReader::new(stderr).lines();

    let endpoint = match timeout(
        config.launch_timeout,
        scan_for_endpoint(&mut lines, &mut child),
    )
    .await
    {
        Ok(Ok(endpoint)) => endpoint,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(BridgeError::StartFailed(format!(
                "no inspector endpoint within {:?}",
                config.launch_timeout
            )));
        }
    };

    info!(%endpoint, script = script_path, "target launched");

    let stderr_drain = tokio::spawn(drain_stderr(lines));

    Ok(LaunchedTarget {
        child,
        endpoint,
        stderr_drain,
    })
}

async fn scan_for_endpoint(
    lines: &mut Lines<BufReader<ChildStderr>>,
    child: &mut Child,
) -> Result<String> {
    loop {
        match lines.next_line().await? {
            Some(line) => {
                debug!(target: "target-stderr", "{line}");
                if let Some(endpoint) = extract_inspector_url(&line) {
                    return Ok(endpoint);
                }
            }
            None => {
                // stderr closed without an endpoint: the child is gone or
                // is about to be.
                let status = match child.try_wait() {
                    Ok(Some(status)) => Some(status),
                    _ => {
                        let _ = child.kill().await;
                        child.wait().await.ok()
                    }
                };
                return Err(BridgeError::LauncherExitedEarly {
                    status: status.and_then(|s| s.code()),
                });
            }
        }
    }
}

async fn drain_stderr(mut lines: Lines<BufReader<ChildStderr>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "target-stderr", "{line}");
    }
}

/// Pull the `ws://host:port/token` endpoint out of an inspector banner line.
pub fn extract_inspector_url(line: &str) -> Option<String> {
    let pattern = Regex::new(r"ws://[^\s'\x22]+").expect("static pattern compiles");
    pattern.find(line).map(|m| m.as_str().to_string())
}
