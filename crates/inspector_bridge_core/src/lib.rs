//! Inspector Bridge Core
//!
//! An async library for driving a debug session against a Node.js-style
//! inspector endpoint speaking the Chrome DevTools Protocol over WebSocket.
//! Provides the target launcher, the CDP client, the session state machine
//! with its pause/exit race, and the breakpoint and inspection operations
//! that an RPC tool surface exposes.

pub mod cdp;
pub mod config;
pub mod error;
pub mod launcher;
pub mod ops;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use cdp::CdpClient;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use session::{DebugSession, SessionManager};

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
