//! Automatic webhook delivery
//!
//! Watches accumulated-text changes and, when auto-send is enabled and a
//! destination is configured, collapses each burst of changes into at most
//! one delivery per quiet period. The debounce is one abortable task;
//! re-arming aborts the previous task and schedules a fresh one, so only the
//! most recent pending send survives.
//!
//! Policy (deliberate, see DESIGN.md): a successful delivery records the sent
//! text and clears the source buffer; a failed delivery leaves the buffer
//! untouched so the user can retry. Disabling auto-send suppresses future
//! triggers but cancels neither an armed timer nor a delivery in flight.

use crate::config::SharedConfig;
use crate::notice::NoticeSender;
use crate::webhook::{WebhookError, WebhookSender};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Quiet period after the last text change before a delivery fires
pub const AUTO_SEND_DEBOUNCE: Duration = Duration::from_millis(500);

/// Delivery backend, injectable for tests
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, url: &str, text: &str) -> Result<(), WebhookError>;
}

#[async_trait]
impl Delivery for WebhookSender {
    async fn deliver(&self, url: &str, text: &str) -> Result<(), WebhookError> {
        self.send(url, text).await
    }
}

/// Called after a successful delivery to clear the source text buffer
pub type ClearFn = Box<dyn Fn() + Send + Sync>;

pub struct AutoSendCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    delivery: Arc<dyn Delivery>,
    config: SharedConfig,
    clear: ClearFn,
    notices: NoticeSender,
    debounce: Duration,
    last_sent: Mutex<String>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl AutoSendCoordinator {
    pub fn new(
        delivery: Arc<dyn Delivery>,
        config: SharedConfig,
        clear: ClearFn,
        notices: NoticeSender,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                delivery,
                config,
                clear,
                notices,
                debounce,
                last_sent: Mutex::new(String::new()),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Consume text-change notifications until the text channel closes
    pub fn spawn(self, mut text_rx: watch::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while text_rx.changed().await.is_ok() {
                let text = text_rx.borrow_and_update().clone();
                Arc::clone(&self.inner).on_text_changed(text, text_rx.clone());
            }
        })
    }
}

impl Inner {
    /// Arm (or re-arm) the debounce for one text change
    fn on_text_changed(self: Arc<Self>, text: String, text_rx: watch::Receiver<String>) {
        {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            if !config.auto_send || !config.has_url() {
                return;
            }
        }
        if text.trim().is_empty() {
            return;
        }
        if *self.last_sent.lock().unwrap_or_else(|e| e.into_inner()) == text {
            return;
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let inner = Arc::clone(&self);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.fire(text_rx).await;
        }));
    }

    /// The debounce elapsed uninterrupted; deliver the text as of now
    async fn fire(&self, text_rx: watch::Receiver<String>) {
        let text = text_rx.borrow().clone();
        let url = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.url.clone()
        };

        if text.trim().is_empty() || url.trim().is_empty() {
            return;
        }
        if *self.last_sent.lock().unwrap_or_else(|e| e.into_inner()) == text {
            return;
        }

        match self.delivery.deliver(&url, &text).await {
            Ok(()) => {
                tracing::info!(chars = text.len(), "Auto-sent text to webhook");
                *self.last_sent.lock().unwrap_or_else(|e| e.into_inner()) = text;
                (self.clear)();
                self.notices.info("Text sent to webhook");
            }
            Err(e) => {
                // Buffer stays intact; the next change re-triggers the debounce
                tracing::warn!(error = %e, "Auto-send delivery failed");
                self.notices.error(format!("{}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::notice::Severity;

    struct MockDelivery {
        calls: Mutex<Vec<(String, String)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl MockDelivery {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Delivery for MockDelivery {
        async fn deliver(&self, url: &str, text: &str) -> Result<(), WebhookError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), text.to_string()));
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                Err(WebhookError::Transport("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        text_tx: Arc<watch::Sender<String>>,
        delivery: Arc<MockDelivery>,
        config: SharedConfig,
        cleared: Arc<std::sync::atomic::AtomicUsize>,
        notices_rx: tokio::sync::mpsc::UnboundedReceiver<crate::notice::Notice>,
    }

    fn harness(url: &str, enabled: bool) -> Harness {
        let (text_tx, text_rx) = watch::channel(String::new());
        let text_tx = Arc::new(text_tx);
        let delivery = MockDelivery::new();
        let config: SharedConfig = Arc::new(Mutex::new(WebhookConfig {
            url: url.to_string(),
            auto_send: enabled,
        }));
        let cleared = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (notices, notices_rx) = NoticeSender::channel();

        let clear: ClearFn = {
            let text_tx = Arc::clone(&text_tx);
            let cleared = Arc::clone(&cleared);
            Box::new(move || {
                cleared.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                text_tx.send_replace(String::new());
            })
        };

        let coordinator = AutoSendCoordinator::new(
            delivery.clone(),
            Arc::clone(&config),
            clear,
            notices,
            AUTO_SEND_DEBOUNCE,
        );
        coordinator.spawn(text_rx);

        Harness {
            text_tx,
            delivery,
            config,
            cleared,
            notices_rx,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_delivery_with_final_text() {
        let h = harness("https://example.com/hook", true);

        for text in ["h", "he", "hel", "hello ", "hello world "] {
            h.text_tx.send_replace(text.to_string());
            settle().await;
            tokio::time::advance(Duration::from_millis(100)).await;
            settle().await;
        }

        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;

        let calls = h.delivery.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://example.com/hook");
        assert_eq!(calls[0].1, "hello world ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_and_clears_buffer() {
        let mut h = harness("https://example.com/hook", true);

        h.text_tx.send_replace("hello world ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;

        assert_eq!(h.delivery.calls().len(), 1);
        assert_eq!(h.cleared.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(*h.text_tx.borrow(), "");

        let mut saw_info = false;
        while let Ok(notice) = h.notices_rx.try_recv() {
            saw_info |= notice.severity == Severity::Info;
        }
        assert!(saw_info, "expected a success notice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_triggers() {
        let h = harness("https://example.com/hook", false);

        h.text_tx.send_replace("hello ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert!(h.delivery.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_url_never_triggers() {
        let h = harness("", true);

        h.text_tx.send_replace("hello ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert!(h.delivery.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_preserves_buffer_and_retriggers_on_change() {
        let mut h = harness("https://example.com/hook", true);
        h.delivery
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        h.text_tx.send_replace("hello ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;

        assert_eq!(h.delivery.calls().len(), 1);
        assert_eq!(h.cleared.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(*h.text_tx.borrow(), "hello ");
        let mut saw_error = false;
        while let Ok(notice) = h.notices_rx.try_recv() {
            saw_error |= notice.severity == Severity::Error;
        }
        assert!(saw_error, "expected a failure notice");

        // Delivery recovers; the next change sends the grown buffer
        h.delivery
            .fail
            .store(false, std::sync::atomic::Ordering::SeqCst);
        h.text_tx.send_replace("hello world ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;

        let calls = h.delivery.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, "hello world ");
        assert_eq!(h.cleared.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_after_arm_does_not_cancel_pending_delivery() {
        let h = harness("https://example.com/hook", true);

        h.text_tx.send_replace("hello ".to_string());
        settle().await;

        // Toggle off while the debounce is armed
        h.config.lock().unwrap().auto_send = false;

        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;

        assert_eq!(h.delivery.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_sent_text_is_not_resent() {
        let h = harness("https://example.com/hook", true);

        h.text_tx.send_replace("hello ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;
        assert_eq!(h.delivery.calls().len(), 1);

        // The clear callback reset the buffer; putting the identical text
        // back must not produce a second delivery
        h.text_tx.send_replace("hello ".to_string());
        settle().await;
        tokio::time::advance(Duration::from_millis(510)).await;
        settle().await;

        assert_eq!(h.delivery.calls().len(), 1);
    }
}
