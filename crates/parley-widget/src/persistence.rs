//! Detached message persistence.
//!
//! Writes are queued to a single worker task and never awaited by the
//! conversational flow. Failures are logged and counted, nothing more.
//! A single worker keeps writes in enqueue order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use parley_core::types::{ConversationId, Message};
use parley_storage::DurableBackend;

struct PersistJob {
    conversation_id: ConversationId,
    message: Message,
}

/// Fire-and-forget queue in front of a [`DurableBackend`].
pub struct PersistenceQueue {
    tx: mpsc::UnboundedSender<PersistJob>,
    pending: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl PersistenceQueue {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(backend: Arc<dyn DurableBackend>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();
        let pending = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let worker_pending = Arc::clone(&pending);
        let worker_failures = Arc::clone(&failures);
        let worker_idle = Arc::clone(&idle);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = backend
                    .insert_message(job.conversation_id.as_str(), &job.message)
                    .await
                {
                    worker_failures.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        error = %e,
                        conversation_id = %job.conversation_id,
                        message_id = %job.message.id,
                        "Message persistence failed"
                    );
                }
                if worker_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_idle.notify_waiters();
                }
            }
            tracing::debug!("Persistence worker stopped");
        });

        Self {
            tx,
            pending,
            failures,
            idle,
        }
    }

    pub fn enqueue(&self, conversation_id: &ConversationId, message: &Message) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let job = PersistJob {
            conversation_id: conversation_id.clone(),
            message: message.clone(),
        };
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(conversation_id = %conversation_id, "Persistence worker is gone, dropping write");
        }
    }

    /// Writes enqueued but not yet attempted.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Writes that failed since the queue started.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Resolve once every enqueued write has been attempted.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::error::ParleyError;
    use parley_core::types::{MessageType, Timestamp};
    use parley_storage::NewConversation;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        written: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl DurableBackend for RecordingBackend {
        async fn probe(&self) -> Result<(), ParleyError> {
            Ok(())
        }
        async fn upsert_visitor_profile(&self, _visitor_id: &str) -> Result<String, ParleyError> {
            Ok("p".into())
        }
        async fn insert_conversation(&self, _c: &NewConversation) -> Result<String, ParleyError> {
            Ok("c".into())
        }
        async fn insert_message(&self, _cid: &str, message: &Message) -> Result<(), ParleyError> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if self.fail {
                return Err(ParleyError::Storage("write refused".into()));
            }
            self.written.lock().unwrap().push(message.text.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writes_in_order() {
        let backend = Arc::new(RecordingBackend::default());
        let queue = PersistenceQueue::spawn(backend.clone());
        let cid = ConversationId::persisted("c");

        for text in ["one", "two", "three"] {
            queue.enqueue(&cid, &Message::bot(text, MessageType::Text));
        }
        queue.wait_idle().await;

        assert_eq!(*backend.written.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(queue.failures(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_does_not_wait_for_write() {
        let backend = Arc::new(RecordingBackend::default());
        let queue = PersistenceQueue::spawn(backend.clone());
        queue.enqueue(
            &ConversationId::persisted("c"),
            &Message::user("hi", None),
        );
        assert!(backend.written.lock().unwrap().is_empty());
        queue.wait_idle().await;
        assert_eq!(backend.written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..RecordingBackend::default()
        });
        let queue = PersistenceQueue::spawn(backend);
        queue.enqueue(
            &ConversationId::offline(Timestamp(1)),
            &Message::user("hi", None),
        );
        queue.wait_idle().await;
        assert_eq!(queue.failures(), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue() {
        let queue = PersistenceQueue::spawn(Arc::new(RecordingBackend::default()));
        queue.wait_idle().await;
    }
}
