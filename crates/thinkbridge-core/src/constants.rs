//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for upstream requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Streaming timeout - reasoning models can think for several minutes
    pub const STREAM_TIMEOUT: Duration = Duration::from_secs(600);

    /// Capacity of the bounded channel between the upstream reader and the client sink
    pub const SINK_CAPACITY: usize = 64;
}

/// Stream transformation configuration
pub mod stream {
    /// Literal `data:` payload that terminates an upstream stream
    pub const DONE_MARKER: &str = "[DONE]";

    /// Event name given to the terminator frame
    pub const DONE_EVENT: &str = "done";

    /// Number of hex characters in a thinking block signature
    pub const SIGNATURE_HEX_LEN: usize = 16;

    /// Consecutive empty thinking blocks that trip the loop breaker
    pub const EMPTY_THINKING_LOOP_LIMIT: u32 = 3;
}

/// Diagnostics configuration
pub mod debug {
    /// Environment toggle that forces diagnostic logging on
    pub const DEBUG_ENV_VAR: &str = "THINKBRIDGE_DEBUG";

    /// Config directory name
    pub const CONFIG_DIR_NAME: &str = ".thinkbridge";

    /// Logs subdirectory name
    pub const LOGS_DIR_NAME: &str = "logs";
}
