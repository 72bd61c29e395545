//! Incremental splitter for `text/event-stream` bodies.
//!
//! Providers deliver SSE over a byte stream whose chunk boundaries fall
//! anywhere, including mid-line. `SseFeed` buffers the tail and hands back
//! the `data:` payloads of whatever lines a chunk completed. Event-name
//! lines, comments, and blank separators carry no payload and are dropped
//! here; both adapters dispatch on the JSON payload alone.

pub(crate) struct SseFeed {
    pending: String,
}

impl SseFeed {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    /// Absorb a chunk of bytes and return the completed `data:` payloads.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(payload) = line.trim_end().strip_prefix("data:") {
                let payload = payload.trim_start();
                if !payload.is_empty() {
                    payloads.push(payload.to_string());
                }
            }
        }
        payloads
    }
}
