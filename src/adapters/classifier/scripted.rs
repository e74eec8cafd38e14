//! Scripted classifier for tests and offline demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ports::{Classification, ClassifierError, IntentClassifier};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Label {
        intent: String,
        confidence: f64,
    },
    Fail(String),
    /// Sleep before answering, to exercise routing timeouts.
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn label(intent: impl Into<String>, confidence: f64) -> Self {
        Self::Label {
            intent: intent.into(),
            confidence,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// Replays queued replies in order, then repeats the fallback reply.
pub struct ScriptedClassifier {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    /// Always answers with `reply`.
    pub fn always(reply: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: reply,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers with `replies` in order, then fails.
    pub fn sequence(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: ScriptedReply::fail("script exhausted"),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl IntentClassifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut reply = self.next_reply();
        loop {
            match reply {
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                ScriptedReply::Label { intent, confidence } => {
                    return Ok(Classification {
                        intent,
                        confidence,
                        reasoning: "scripted".to_string(),
                    })
                }
                ScriptedReply::Fail(message) => return Err(ClassifierError::Http(message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_then_exhausted() {
        let classifier = ScriptedClassifier::sequence([ScriptedReply::label("sweep", 0.9)]);
        assert_eq!(classifier.classify("x").await.unwrap().intent, "sweep");
        assert!(classifier.classify("x").await.is_err());
        assert_eq!(classifier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_delayed_reply() {
        let classifier =
            ScriptedClassifier::always(ScriptedReply::label("query", 0.7).delayed(Duration::from_millis(30)));
        let started = tokio::time::Instant::now();
        classifier.classify("x").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
