//! Mock model backend for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ModelBackend, ModelError, ModelRequest};

/// A configurable mock reply for [`MockModel`].
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub enum MockReply {
    /// Raw response text (usually a JSON record).
    Text(String),
    /// Simulate a 429.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate endpoint trouble.
    Unavailable(String),
    /// Simulate a refusal.
    Refused,
}

/// A hand-rolled mock implementing [`ModelBackend`] for tests.
///
/// Supports a fixed reply, or a sequence of replies (the last one
/// repeats when exhausted), optional per-call latency, and call
/// counting via [`call_count()`](MockModel::call_count).
pub struct MockModel {
    /// Each call pops the next reply; empty means single-reply mode.
    replies: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    /// Most recent request document, for prompt-content assertions.
    last_document: Mutex<Option<String>>,
}

impl MockModel {
    /// Create a mock that always returns `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            fallback: reply,
            delay: None,
            call_count: AtomicUsize::new(0),
            last_document: Mutex::new(None),
        }
    }

    /// Create a mock that returns replies in order, repeating the last.
    #[allow(dead_code)]
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "sequence must have at least one reply");
        // Reverse so we can pop() from the front cheaply.
        replies.reverse();
        let fallback = replies.first().cloned().unwrap();
        Self {
            replies: Mutex::new(replies),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
            last_document: Mutex::new(None),
        }
    }

    #[allow(dead_code)]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `invoke()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Document text of the most recent call.
    #[allow(dead_code)]
    pub fn last_document(&self) -> Option<String> {
        self.last_document.lock().unwrap().clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut seq = self.replies.lock().unwrap();
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl ModelBackend for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn invoke<'a>(
        &'a self,
        request: &'a ModelRequest,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_document.lock().unwrap() = Some(request.document.clone());
        let reply = self.next_reply();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match reply {
                MockReply::Text(text) => Ok(text),
                MockReply::RateLimited { retry_after } => {
                    Err(ModelError::RateLimited { retry_after })
                }
                MockReply::Unavailable(reason) => Err(ModelError::Unavailable { reason }),
                MockReply::Refused => Err(ModelError::Refused("mock refusal".to_string())),
            }
        })
    }
}
