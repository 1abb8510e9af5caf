//! Captured daemon output and the readiness predicate.
//!
//! One [`CaptureState`] exists per daemon launch. The stream pump tasks are
//! its only writers: they append each chunk as it arrives and re-evaluate
//! the readiness probe immediately afterwards, so detection never waits on a
//! polling interval.

use regex::Regex;
use serde_json::Value;

use crate::json_scan::JsonScanner;

/// Which captured stream the readiness probe watches.
///
/// With `--json` enabled the daemon keeps stdout for structured output and
/// moves human-readable diagnostics to stderr, so the listen notice usually
/// appears on stderr. Both are supported; the watched stream is
/// configuration, not a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStream {
    Stdout,
    Stderr,
}

/// Readiness predicate: a literal marker substring expected on one stream.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pub stream: ProbeStream,
    pub marker: String,
}

impl ReadinessProbe {
    /// Probe `stream` for the literal `marker`.
    pub fn new(stream: ProbeStream, marker: impl Into<String>) -> Self {
        Self {
            stream,
            marker: marker.into(),
        }
    }
}

/// Accumulated daemon output for a single launch.
///
/// Buffers are append-only; the embedded [`JsonScanner`] finalises the first
/// balanced object seen on stdout.
#[derive(Debug, Default)]
pub struct CaptureState {
    stdout: String,
    stderr: String,
    scanner: JsonScanner,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stdout chunk and feed it to the payload scanner.
    pub fn append_stdout(&mut self, chunk: &str) {
        self.stdout.push_str(chunk);
        self.scanner.feed(chunk);
    }

    /// Append a stderr chunk.
    pub fn append_stderr(&mut self, chunk: &str) {
        self.stderr.push_str(chunk);
    }

    /// Full stdout captured so far.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Full stderr captured so far.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Whether the probe marker has appeared on its watched stream.
    ///
    /// Substring search over the accumulated buffer, so a marker split
    /// across chunk boundaries is still found once its last byte lands.
    pub fn is_ready(&self, probe: &ReadinessProbe) -> bool {
        let buffer = match probe.stream {
            ProbeStream::Stdout => &self.stdout,
            ProbeStream::Stderr => &self.stderr,
        };
        buffer.contains(&probe.marker)
    }

    /// Parse the startup payload out of the captured stdout.
    ///
    /// The scanner's balanced-object candidate is tried first. If it does
    /// not parse, the largest `{...}` span of the full stdout is re-tried.
    /// Total failure yields an empty object; a missing payload is not fatal
    /// to the launch.
    pub fn payload(&self) -> Value {
        if let Some(candidate) = self.scanner.candidate() {
            match serde_json::from_str(candidate) {
                Ok(value) => return value,
                Err(error) => {
                    tracing::warn!(%error, "startup payload candidate did not parse");
                }
            }
        }

        // Greedy span from the first `{` to the last `}` in the stream.
        let span = Regex::new(r"(?s)\{.*\}").expect("static pattern");
        if let Some(found) = span.find(&self.stdout) {
            match serde_json::from_str(found.as_str()) {
                Ok(value) => return value,
                Err(error) => {
                    tracing::warn!(%error, "fallback payload extraction did not parse");
                }
            }
        }

        Value::Object(serde_json::Map::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
