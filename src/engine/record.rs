// Per-request transfer state: body capture while in flight, metadata once done.

use bytes::Bytes;
use curl::easy::{Handler, WriteError};
use tracing::debug;

use super::buffer::GrowableBuffer;
use crate::config::ERROR_TEXT_CAPACITY;

/// Metadata read from a finished transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferOutcome {
    pub error: Option<String>,
    pub remote_ip: String,
    pub remote_port: u16,
    pub response_code: u32,
    pub effective_url: String,
    pub announced_length: Option<u64>,
}

#[derive(Debug, Default)]
pub struct RequestRecord {
    done: bool,
    discard_body: bool,
    /// Sticky: once set, later body bytes are dropped.
    buffer_alloc_failed: bool,
    buffer: GrowableBuffer,
    bytes_seen: u64,
    error_text: String,
    remote_ip: String,
    remote_port: u16,
    response_code: u32,
    effective_url: String,
    announced_length: Option<u64>,
}

impl RequestRecord {
    pub fn new(discard_body: bool, max_body_bytes: Option<usize>) -> Self {
        let buffer = match max_body_bytes {
            Some(limit) => GrowableBuffer::with_limit(limit),
            None => GrowableBuffer::new(),
        };
        Self {
            discard_body,
            buffer,
            ..Self::default()
        }
    }

    /// Consume a chunk of body bytes. Always accepts the whole chunk so the
    /// transfer keeps going even when the bytes cannot be kept.
    pub fn accept(&mut self, data: &[u8]) -> usize {
        self.bytes_seen += data.len() as u64;
        if self.discard_body || self.buffer_alloc_failed {
            return data.len();
        }
        if self.buffer.append(data).is_err() {
            debug!(
                "body buffer growth failed at {} bytes, dropping the rest",
                self.buffer.len()
            );
            self.buffer_alloc_failed = true;
        }
        data.len()
    }

    /// Record the outcome and mark the request done. Called once per transfer.
    pub fn finish(&mut self, outcome: TransferOutcome) {
        debug_assert!(!self.done, "transfer finished twice");
        self.error_text = outcome
            .error
            .map(|text| clamp_error_text(&text))
            .unwrap_or_default();
        self.remote_ip = outcome.remote_ip;
        self.remote_port = outcome.remote_port;
        self.response_code = outcome.response_code;
        self.effective_url = outcome.effective_url;
        self.announced_length = outcome.announced_length;
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn discards_body(&self) -> bool {
        self.discard_body
    }

    pub fn buffer_alloc_failed(&self) -> bool {
        self.buffer_alloc_failed
    }

    /// Body bytes actually stored.
    pub fn bytes_received(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Body bytes delivered by the transfer, stored or not.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn content(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    pub fn remote_ip(&self) -> &str {
        &self.remote_ip
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn response_code(&self) -> u32 {
        self.response_code
    }

    pub fn effective_url(&self) -> &str {
        &self.effective_url
    }

    pub fn announced_length(&self) -> Option<u64> {
        self.announced_length
    }

    /// Stored body is shorter than what the transfer delivered or announced.
    pub fn is_truncated(&self) -> bool {
        if self.discard_body {
            return false;
        }
        if self.buffer_alloc_failed {
            return true;
        }
        self.announced_length
            .is_some_and(|announced| (self.buffer.len() as u64) < announced)
    }

    /// Give up the stored body. `None` when nothing was ever allocated for it.
    pub fn take_content(&mut self) -> Option<Bytes> {
        std::mem::take(&mut self.buffer).into_bytes()
    }
}

impl Handler for RequestRecord {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        Ok(self.accept(data))
    }
}

/// Fit `text` into the fixed error capacity, leaving room for a terminator.
fn clamp_error_text(text: &str) -> String {
    let max = ERROR_TEXT_CAPACITY - 1;
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_stores_body() {
        let mut record = RequestRecord::new(false, None);
        assert_eq!(record.accept(b"miss"), 4);
        assert_eq!(record.accept(b"ing"), 3);
        assert_eq!(record.content(), b"missing");
        assert_eq!(record.bytes_received(), 7);
        assert_eq!(record.bytes_seen(), 7);
        assert!(record.bytes_received() <= record.buffer_capacity());
    }

    #[test]
    fn test_discard_body_counts_without_storing() {
        let mut record = RequestRecord::new(true, None);
        assert_eq!(record.accept(&[0u8; 10 * 1024]), 10 * 1024);
        assert_eq!(record.bytes_seen(), 10 * 1024);
        assert_eq!(record.bytes_received(), 0);
        assert_eq!(record.buffer_capacity(), 0);
        assert!(record.take_content().is_none());
    }

    #[test]
    fn test_alloc_failure_is_sticky() {
        let mut record = RequestRecord::new(false, Some(2048));
        record.accept(&[1u8; 600]);
        assert!(!record.buffer_alloc_failed());

        // Needs 2600 bytes of capacity: refused.
        assert_eq!(record.accept(&[2u8; 700]), 700);
        assert!(record.buffer_alloc_failed());
        assert_eq!(record.bytes_received(), 600);

        // Would fit, but the flag never clears.
        assert_eq!(record.accept(&[3u8; 10]), 10);
        assert!(record.buffer_alloc_failed());
        assert_eq!(record.bytes_received(), 600);
        assert_eq!(record.bytes_seen(), 1310);

        record.finish(TransferOutcome {
            response_code: 200,
            ..TransferOutcome::default()
        });
        assert!(record.is_done());
        assert!(record.buffer_alloc_failed());
        assert!(record.is_truncated());
    }

    #[test]
    fn test_finish_populates_metadata() {
        let mut record = RequestRecord::new(false, None);
        record.accept(b"ok");
        assert!(!record.is_done());
        record.finish(TransferOutcome {
            error: None,
            remote_ip: "127.0.0.1".to_string(),
            remote_port: 8080,
            response_code: 404,
            effective_url: "http://127.0.0.1:8080/x".to_string(),
            announced_length: Some(2),
        });
        assert!(record.is_done());
        assert_eq!(record.response_code(), 404);
        assert_eq!(record.remote_ip(), "127.0.0.1");
        assert_eq!(record.remote_port(), 8080);
        assert_eq!(record.effective_url(), "http://127.0.0.1:8080/x");
        assert_eq!(record.error_text(), "");
        assert!(!record.is_truncated());
    }

    #[test]
    fn test_error_text_is_clamped() {
        let mut record = RequestRecord::new(true, None);
        let long = "é".repeat(ERROR_TEXT_CAPACITY);
        record.finish(TransferOutcome {
            error: Some(long),
            ..TransferOutcome::default()
        });
        assert!(record.error_text().len() < ERROR_TEXT_CAPACITY);
        assert!(record.error_text().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_short_body_against_announced_length_is_truncated() {
        let mut record = RequestRecord::new(false, None);
        record.accept(b"abc");
        record.finish(TransferOutcome {
            response_code: 200,
            announced_length: Some(10),
            ..TransferOutcome::default()
        });
        assert!(record.is_truncated());
    }
}
