//! Socket server hosting the voicehook daemon
//!
//! Composes the recognition manager, the level sampler, the auto-send
//! coordinator, and webhook delivery behind the NDJSON control protocol.
//! Subscribed clients receive periodic status events (state, audio level,
//! accumulated text) plus every user-facing notice.

mod handler;

use crate::audio::LevelSampler;
use crate::autosend::AutoSendCoordinator;
use crate::config::{SharedConfig, WebhookConfig};
use crate::notice::{Notice, NoticeSender, Severity};
use crate::protocol::{ServerMessage, State};
use crate::recognition::RecognitionManager;
use crate::socket::SocketError;
use crate::speech::{EngineConfig, SpeechCapability};
use crate::transport::encode_server_message;
use crate::webhook::{WebhookError, WebhookSender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tokio::sync::{Notify, mpsc};

use handler::handle_connection;

// Server result type using SocketError for structured error handling
type ServerResult<T> = std::result::Result<T, SocketError>;

/// How often subscribers get a status event regardless of changes
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(250);

/// Daemon construction options, resolved by the CLI
pub struct ServiceOptions {
    pub socket_path: String,
    pub config_path: PathBuf,
    pub engine_config: EngineConfig,
    pub silence_timeout: Duration,
    pub debounce: Duration,
}

pub struct SocketServer {
    inner: Arc<ServerInner>,
    listener: UnixListener,
    notices_rx: mpsc::UnboundedReceiver<Notice>,
    debounce: Duration,
}

impl SocketServer {
    pub fn new(options: ServiceOptions) -> ServerResult<Self> {
        // Remove existing socket file if it exists
        let socket_path = PathBuf::from(&options.socket_path);
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                SocketError::Connection(format!(
                    "Service already running at socket: {}. Stop it before starting another.",
                    socket_path.display()
                ))
            } else {
                SocketError::Connection(format!("Failed to bind socket: {}", e))
            }
        })?;

        // Set socket permissions to 0600 (owner read/write only) for security
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = std::fs::metadata(&socket_path)
                .map_err(|e| {
                    SocketError::Connection(format!("Failed to read socket metadata: {}", e))
                })?
                .permissions();
            permissions.set_mode(0o600);
            std::fs::set_permissions(&socket_path, permissions).map_err(|e| {
                SocketError::Connection(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        let config: SharedConfig =
            Arc::new(Mutex::new(WebhookConfig::load(&options.config_path)));
        tracing::info!(path = %options.config_path.display(), "Loaded webhook config");

        let (notices, notices_rx) = NoticeSender::channel();
        let sampler = Arc::new(LevelSampler::new(notices.clone()));

        let engine_config = options.engine_config;
        let factory = Box::new(move || SpeechCapability::detect(&engine_config));
        let session = Arc::new(RecognitionManager::new(
            factory,
            Arc::clone(&sampler),
            notices.clone(),
            options.silence_timeout,
        ));

        let inner = Arc::new(ServerInner {
            session,
            sampler,
            config,
            config_path: options.config_path,
            webhook: Arc::new(WebhookSender::new()),
            notices,
            subscribers: Mutex::new(Vec::new()),
            start_time: Instant::now(),
            shutdown_notify: Notify::new(),
        });

        Ok(Self {
            inner,
            listener,
            notices_rx,
            debounce: options.debounce,
        })
    }

    pub async fn run(&mut self) -> ServerResult<()> {
        tracing::info!("Socket server listening for connections");

        // Auto-send watches accumulated-text changes; on success it clears
        // the buffer through the session manager
        let coordinator = AutoSendCoordinator::new(
            Arc::clone(&self.inner.webhook) as Arc<dyn crate::autosend::Delivery>,
            Arc::clone(&self.inner.config),
            {
                let session = Arc::clone(&self.inner.session);
                Box::new(move || session.clear())
            },
            self.inner.notices.clone(),
            self.debounce,
        );
        let auto_send = coordinator.spawn(self.inner.session.subscribe_text());

        // Broadcast immediately on text changes so subscribers track dictation
        let text_monitor = tokio::spawn(Self::text_monitor(Arc::clone(&self.inner)));

        // Heartbeat keeps the audio level fresh for subscribers
        let heartbeat = tokio::spawn(Self::heartbeat_monitor(Arc::clone(&self.inner)));

        // Forward component notices to every subscriber
        let mut notices_rx = std::mem::replace(&mut self.notices_rx, mpsc::unbounded_channel().1);
        let notice_inner = Arc::clone(&self.inner);
        let notice_pump = tokio::spawn(async move {
            while let Some(notice) = notices_rx.recv().await {
                match notice.severity {
                    Severity::Info => tracing::info!(message = %notice.message, "notice"),
                    Severity::Error => tracing::warn!(message = %notice.message, "notice"),
                }
                notice_inner
                    .broadcast_event(ServerMessage::new_notice(notice.severity, notice.message));
            }
        });

        let shutdown_notify = Arc::clone(&self.inner);

        let result = tokio::select! {
            _ = shutdown_notify.shutdown_notify.notified() => {
                tracing::info!("Shutdown signal received, stopping server");
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping server");
                Ok(())
            }
            result = Self::accept_loop(&self.listener, &self.inner) => result,
        };

        auto_send.abort();
        text_monitor.abort();
        heartbeat.abort();
        notice_pump.abort();
        self.inner.session.stop();
        self.cleanup().await?;
        result
    }

    async fn text_monitor(inner: Arc<ServerInner>) {
        let mut text_rx = inner.session.subscribe_text();
        while text_rx.changed().await.is_ok() {
            inner.broadcast_status();
        }
    }

    async fn heartbeat_monitor(inner: Arc<ServerInner>) {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            inner.broadcast_status();
        }
    }

    async fn accept_loop(listener: &UnixListener, inner: &Arc<ServerInner>) -> ServerResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let inner = Arc::clone(inner);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, inner).await {
                            tracing::warn!(error = %e, "Error handling connection");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn cleanup(&self) -> ServerResult<()> {
        let addr = self.listener.local_addr().ok();

        if let Some(path) = addr
            .as_ref()
            .and_then(|a| a.as_pathname())
            .filter(|p| p.exists())
            && let Err(e) = std::fs::remove_file(path)
        {
            tracing::warn!(error = %e, "Failed to remove socket file");
        }
        Ok(())
    }
}

struct SubscriberHandle {
    id: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Inner server state shared with connection handlers
struct ServerInner {
    pub session: Arc<RecognitionManager>,
    pub sampler: Arc<LevelSampler>,
    pub config: SharedConfig,
    pub config_path: PathBuf,
    pub webhook: Arc<WebhookSender>,
    pub notices: NoticeSender,
    pub subscribers: Mutex<Vec<SubscriberHandle>>,
    pub start_time: Instant,
    pub shutdown_notify: Notify,
}

impl ServerInner {
    /// Get monotonic timestamp in milliseconds since server start
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Current session state for status events
    pub fn state(&self) -> State {
        if self.session.is_active() {
            State::Listening
        } else if self.session.has_failed() {
            State::Error
        } else {
            State::Idle
        }
    }

    /// Broadcast a typed event to all subscribers
    fn broadcast_event(&self, event: ServerMessage) {
        let encoded = match encode_server_message(&event) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode broadcast event");
                return;
            }
        };
        let bytes = encoded.into_bytes();

        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        // Try to send, remove if channel is closed
        subs.retain(|sub| sub.tx.send(bytes.clone()).is_ok());
    }

    /// Broadcast the current state, audio level, and accumulated text
    pub fn broadcast_status(&self) {
        let event = ServerMessage::new_status_event(
            self.state(),
            self.sampler.level(),
            self.session.current_text(),
            self.elapsed_ms(),
        );
        self.broadcast_event(event);
    }

    /// Register a subscriber connection
    pub fn add_subscriber(&self, id: String, tx: mpsc::UnboundedSender<Vec<u8>>) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(SubscriberHandle { id, tx });
    }

    /// Remove a subscriber on disconnect
    pub fn remove_subscriber(&self, id: &str) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| s.id != id);
    }

    /// Apply a config mutation and persist it
    pub fn update_config(&self, mutate: impl FnOnce(&mut WebhookConfig)) {
        let snapshot = {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            mutate(&mut config);
            config.clone()
        };
        if let Err(e) = snapshot.save(&self.config_path) {
            tracing::warn!(error = %e, "Failed to persist webhook config");
        }
    }

    /// Deliver the current accumulated text now (manual send path)
    ///
    /// Shares the auto-send clearing policy: success clears the buffer.
    pub async fn deliver_current(&self) -> Result<(), WebhookError> {
        let url = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.url.clone()
        };
        let text = self.session.current_text();

        match self.webhook.send(&url, &text).await {
            Ok(()) => {
                self.session.clear();
                self.notices.info("Text sent to webhook");
                Ok(())
            }
            Err(e) => {
                self.notices.error(format!("{}", e));
                Err(e)
            }
        }
    }

    /// Status response fields
    pub fn status_fields(&self) -> (bool, bool, bool, u64, usize) {
        let (auto_send, has_url) = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            (config.auto_send, config.has_url())
        };
        (
            self.session.is_active(),
            auto_send,
            has_url,
            self.start_time.elapsed().as_secs(),
            self.session.current_text().chars().count(),
        )
    }
}
