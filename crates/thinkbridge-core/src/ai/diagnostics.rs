//! Opt-in request diagnostics
//!
//! When enabled, each request gets its own directory holding four artifacts:
//! the inbound Anthropic request, the translated upstream request, the raw
//! upstream response and the translated outbound response. Write failures are
//! logged and swallowed. When disabled, every entry point returns after a
//! single `Option` check.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

/// The four per-request artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    InboundRequest,
    UpstreamRequest,
    UpstreamResponse,
    OutboundResponse,
}

impl Artifact {
    fn stem(&self) -> &'static str {
        match self {
            Artifact::InboundRequest => "1-inbound-request",
            Artifact::UpstreamRequest => "2-upstream-request",
            Artifact::UpstreamResponse => "3-upstream-response",
            Artifact::OutboundResponse => "4-outbound-response",
        }
    }

    /// File name for a JSON or raw text capture
    pub fn file_name(&self, raw_text: bool) -> String {
        let ext = if raw_text { "txt" } else { "json" };
        format!("{}.{}", self.stem(), ext)
    }
}

/// Process-level diagnostics switch, resolved once at transformer construction
#[derive(Debug, Clone)]
pub struct DebugLog {
    root: Option<PathBuf>,
}

impl DebugLog {
    pub fn new(enabled: bool, dir: impl Into<PathBuf>) -> Self {
        Self {
            root: enabled.then(|| dir.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Diagnostics handle for one request
    pub fn begin(&self, request_id: &str) -> RequestLog {
        let Some(root) = &self.root else {
            return RequestLog::disabled();
        };
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        RequestLog {
            dir: Some(root.join(format!("{}-{}", stamp, request_id))),
        }
    }
}

/// Per-request artifact writer
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    dir: Option<PathBuf>,
}

impl RequestLog {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Directory artifacts are written to
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Write a JSON artifact
    pub fn write_json<T: Serialize + ?Sized>(&self, artifact: Artifact, value: &T) {
        let Some(dir) = &self.dir else {
            return;
        };
        let result = serde_json::to_vec_pretty(value)
            .map_err(io::Error::from)
            .and_then(|bytes| write_artifact(dir, &artifact.file_name(false), &bytes));
        report(artifact, result);
    }

    /// Write a raw text artifact
    pub fn write_text(&self, artifact: Artifact, text: &str) {
        let Some(dir) = &self.dir else {
            return;
        };
        report(
            artifact,
            write_artifact(dir, &artifact.file_name(true), text.as_bytes()),
        );
    }
}

fn write_artifact(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(file_name), bytes)
}

fn report(artifact: Artifact, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("Diagnostics: wrote {}", artifact.stem()),
        Err(e) => warn!("Diagnostics: failed to write {}: {}", artifact.stem(), e),
    }
}
