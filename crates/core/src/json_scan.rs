//! Incremental extraction of a JSON object embedded in log text.
//!
//! With `--json` enabled, `peerd` prints its startup payload as a single
//! JSON object somewhere inside otherwise free-form stdout. The payload can
//! arrive split across arbitrarily many stream chunks, including mid-token,
//! so extraction has to be incremental: feed text as it arrives, track brace
//! depth character by character, and finalise the capture when the first
//! top-level object closes.

/// Incremental brace-depth scanner.
///
/// Feed stream chunks in arrival order via [`feed`](Self::feed). Once a
/// balanced top-level `{...}` span has been seen, [`candidate`](Self::candidate)
/// returns its exact text. Only the first completed object is kept; later
/// top-level objects in the same stream are ignored.
#[derive(Debug, Default)]
pub struct JsonScanner {
    depth: u32,
    buffer: String,
    capturing: bool,
    candidate: Option<String>,
}

impl JsonScanner {
    /// Create a scanner with no captured state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of stream text.
    pub fn feed(&mut self, text: &str) {
        for ch in text.chars() {
            self.feed_char(ch);
        }
    }

    fn feed_char(&mut self, ch: char) {
        match ch {
            '{' => {
                if !self.capturing {
                    self.capturing = true;
                    self.buffer.clear();
                }
                self.depth += 1;
                self.buffer.push(ch);
            }
            '}' if self.capturing => {
                self.depth = self.depth.saturating_sub(1);
                self.buffer.push(ch);
                if self.depth == 0 {
                    self.capturing = false;
                    if self.candidate.is_none() {
                        self.candidate = Some(self.buffer.clone());
                    }
                }
            }
            _ if self.capturing => self.buffer.push(ch),
            _ => {}
        }
    }

    /// The first balanced top-level object seen so far, if any.
    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    /// Whether a capture is in progress (an object has opened but not yet
    /// closed).
    pub fn capturing(&self) -> bool {
        self.capturing
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
