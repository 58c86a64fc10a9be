use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("a debug session is already active; stop it before starting another")]
    SessionAlreadyActive,

    #[error("no active debug session")]
    NoSession,

    #[error("the target is not paused and no pause snapshot is available")]
    NoPause,

    #[error("unknown pause id: {0}")]
    InvalidPause(u64),

    #[error("frame index {index} out of range: pause has {available} frames")]
    InvalidFrame { index: usize, available: usize },

    #[error("either file_path or url_regex must be provided")]
    MissingLocator,

    #[error("no loaded script matches '{0}'")]
    UnknownScript(String),

    #[error("target exited (status {status:?}) before announcing an inspector endpoint")]
    LauncherExitedEarly { status: Option<i32> },

    #[error("inspector transport closed")]
    TransportClosed,

    #[error("failed to start debug session: {0}")]
    StartFailed(String),

    #[error("expression threw: {0}")]
    EvaluationException(String),

    #[error("inspector command '{method}' failed: {message}")]
    TargetCommandFailed { method: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn target_command_failed(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TargetCommandFailed {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Stable tag carried in every error response on the tool surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionAlreadyActive => "session-already-active",
            Self::NoSession => "no-session",
            Self::NoPause => "no-pause",
            Self::InvalidPause(_) => "invalid-pause",
            Self::InvalidFrame { .. } => "invalid-frame",
            Self::MissingLocator => "missing-locator",
            Self::UnknownScript(_) => "unknown-script",
            Self::LauncherExitedEarly { .. } => "launcher-exited-early",
            Self::TransportClosed => "transport-closed",
            Self::StartFailed(_) => "start-failed",
            Self::EvaluationException(_) => "evaluation-exception",
            Self::TargetCommandFailed { .. } => "target-command-failed",
            Self::Io(_) => "io",
            Self::WebSocket(_) => "websocket",
            Self::Serialize(_) => "serialize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_command_failed_construction() {
        let err = BridgeError::target_command_failed("Debugger.resume", "Not paused");
        match &err {
            BridgeError::TargetCommandFailed { method, message } => {
                assert_eq!(method, "Debugger.resume");
                assert_eq!(message, "Not paused");
            }
            _ => panic!("Expected TargetCommandFailed variant"),
        }
        assert_eq!(err.kind(), "target-command-failed");
    }

    #[test]
    fn test_error_display_messages() {
        let err = BridgeError::InvalidFrame {
            index: 4,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "frame index 4 out of range: pause has 2 frames"
        );

        let err = BridgeError::UnknownScript("/tmp/app.js".to_string());
        assert_eq!(err.to_string(), "no loaded script matches '/tmp/app.js'");

        let err = BridgeError::EvaluationException("ReferenceError: x is not defined".into());
        assert_eq!(
            err.to_string(),
            "expression threw: ReferenceError: x is not defined"
        );
    }

    #[test]
    fn test_kinds_are_stable_tags() {
        assert_eq!(BridgeError::SessionAlreadyActive.kind(), "session-already-active");
        assert_eq!(BridgeError::NoSession.kind(), "no-session");
        assert_eq!(BridgeError::NoPause.kind(), "no-pause");
        assert_eq!(BridgeError::InvalidPause(9).kind(), "invalid-pause");
        assert_eq!(BridgeError::MissingLocator.kind(), "missing-locator");
        assert_eq!(
            BridgeError::LauncherExitedEarly { status: Some(1) }.kind(),
            "launcher-exited-early"
        );
        assert_eq!(BridgeError::TransportClosed.kind(), "transport-closed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: BridgeError = io_err.into();
        match err {
            BridgeError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io variant"),
        }
    }
}
