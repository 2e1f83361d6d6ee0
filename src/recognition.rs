//! Recognition session management
//!
//! One [`RecognitionManager`] lives for the daemon's lifetime and owns at
//! most one active speech-to-text session. A session is a single driver task
//! that serializes every state transition: engine events, the silence
//! watchdog, and stop requests all land in one `select!` loop, so no two
//! handlers ever race on session state. The watchdog is a single re-armable
//! sleep; re-arming is reset-in-place, never a second timer.
//!
//! Accumulated text only grows while a session runs: every finalized segment
//! is appended with a trailing separator. It resets to empty only through an
//! explicit clear or a successful webhook delivery.

use crate::audio::LevelSampler;
use crate::notice::NoticeSender;
use crate::speech::{EngineEvent, SpeechCapability, SpeechEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Stop a session after this long without any speech activity
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(3);

/// Separator appended after every finalized segment
pub const SEGMENT_SEPARATOR: char = ' ';

/// How long a stopped engine gets to confirm with `Ended` before the session
/// is torn down anyway
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Produces a fresh engine (or an unavailability verdict) per session
pub type EngineFactory = Box<dyn Fn() -> SpeechCapability + Send + Sync>;

enum SessionCommand {
    Stop,
}

pub struct RecognitionManager {
    factory: EngineFactory,
    active: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    text: Arc<watch::Sender<String>>,
    sampler: Arc<LevelSampler>,
    notices: NoticeSender,
    silence_timeout: Duration,
    control: Mutex<Option<mpsc::UnboundedSender<SessionCommand>>>,
}

impl RecognitionManager {
    pub fn new(
        factory: EngineFactory,
        sampler: Arc<LevelSampler>,
        notices: NoticeSender,
        silence_timeout: Duration,
    ) -> Self {
        let (text, _) = watch::channel(String::new());
        Self {
            factory,
            active: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            text: Arc::new(text),
            sampler,
            notices,
            silence_timeout,
            control: Mutex::new(None),
        }
    }

    /// Whether a session is currently open
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the last session ended with an engine error
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Current accumulated text
    pub fn current_text(&self) -> String {
        self.text.borrow().clone()
    }

    /// Watch accumulated-text changes
    pub fn subscribe_text(&self) -> watch::Receiver<String> {
        self.text.subscribe()
    }

    /// Reset the accumulated text to empty
    pub fn clear(&self) {
        self.text.send_replace(String::new());
    }

    /// Open a recognition session
    ///
    /// A start while a session is active is a no-op: two concurrent engine
    /// instances never exist. When the platform offers no speech recognition
    /// this reports the reason and creates nothing.
    pub fn start(&self) -> Result<(), String> {
        // Held across the whole start so concurrent starts serialize
        let mut control = self.control.lock().unwrap_or_else(|e| e.into_inner());

        if self.active.load(Ordering::Acquire) {
            tracing::debug!("Start requested while a session is active; ignoring");
            return Ok(());
        }

        let mut engine = match (self.factory)() {
            SpeechCapability::Available(engine) => engine,
            SpeechCapability::Unavailable(reason) => {
                tracing::warn!(%reason, "Speech recognition unavailable");
                self.notices
                    .error("Speech recognition is not available on this system");
                return Err(format!("Speech recognition unavailable: {}", reason));
            }
        };

        let events = match engine.start() {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start speech engine");
                self.notices.error("Could not start speech recognition");
                return Err(format!("Failed to start speech engine: {}", e));
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.active.store(true, Ordering::Release);
        self.failed.store(false, Ordering::Release);
        self.sampler.activate();
        *control = Some(command_tx);

        tokio::spawn(drive_session(
            engine,
            events,
            command_rx,
            Arc::clone(&self.active),
            Arc::clone(&self.failed),
            Arc::clone(&self.text),
            Arc::clone(&self.sampler),
            self.notices.clone(),
            self.silence_timeout,
        ));

        Ok(())
    }

    /// Request graceful termination of the active session
    ///
    /// The session transitions to inactive regardless of whether the engine
    /// is mid-utterance. A stop with no active session is a no-op.
    pub fn stop(&self) {
        let control = self.control.lock().unwrap_or_else(|e| e.into_inner());

        if !self.active.load(Ordering::Acquire) {
            return;
        }

        if let Some(command_tx) = control.as_ref()
            && command_tx.send(SessionCommand::Stop).is_ok()
        {
            self.notices.info("Stopped listening");
        }
    }
}

/// Session driver: the single owner of all session state transitions
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    mut engine: Box<dyn SpeechEngine>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    active: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    text: Arc<watch::Sender<String>>,
    sampler: Arc<LevelSampler>,
    notices: NoticeSender,
    silence_timeout: Duration,
) {
    // Armed from session open; every engine event re-arms it
    let watchdog = tokio::time::sleep(silence_timeout);
    tokio::pin!(watchdog);
    let mut stopping = false;

    loop {
        tokio::select! {
            command = commands.recv(), if !stopping => {
                // A closed control channel counts as a stop request
                let _: Option<SessionCommand> = command;
                stopping = true;
                engine.stop();
                watchdog.as_mut().reset(Instant::now() + TEARDOWN_GRACE);
            }

            event = events.recv() => match event {
                Some(EngineEvent::Started) => {
                    watchdog.as_mut().reset(Instant::now() + silence_timeout);
                    notices.info("Listening");
                }
                Some(EngineEvent::Result(segments)) => {
                    if !stopping {
                        watchdog.as_mut().reset(Instant::now() + silence_timeout);
                    }
                    // Interim segments only count as speech activity; finals
                    // append in arrival order, each with one separator
                    let mut finals = String::new();
                    for segment in segments.iter().filter(|s| s.is_final) {
                        finals.push_str(&segment.text);
                        finals.push(SEGMENT_SEPARATOR);
                    }
                    if !finals.is_empty() {
                        text.send_modify(|t| t.push_str(&finals));
                    }
                }
                Some(EngineEvent::Error(kind)) => {
                    tracing::error!(error = %kind, "Speech recognition error");
                    failed.store(true, Ordering::Release);
                    notices.error("Speech recognition failed");
                    break;
                }
                Some(EngineEvent::Ended) | None => break,
            },

            _ = &mut watchdog => {
                if stopping {
                    tracing::warn!("Engine did not confirm stop; closing session");
                    break;
                }
                // Force-stop as if the user had asked, with a notice that
                // says why
                stopping = true;
                engine.stop();
                watchdog.as_mut().reset(Instant::now() + TEARDOWN_GRACE);
                notices.info("Stopped listening after silence");
            }
        }
    }

    sampler.deactivate();
    active.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::{Notice, Severity};
    use crate::speech::TranscriptSegment;
    use std::sync::atomic::AtomicUsize;

    /// Scripted engine: the test holds the event sender and pushes events
    /// manually; `stop` optionally confirms with `Ended`.
    struct ScriptedEngine {
        events: Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>,
        stop_calls: Arc<AtomicUsize>,
        end_on_stop: bool,
    }

    impl SpeechEngine for ScriptedEngine {
        fn start(&mut self) -> anyhow::Result<mpsc::UnboundedReceiver<EngineEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        fn stop(&mut self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            if self.end_on_stop {
                if let Some(tx) = self.events.lock().unwrap().as_ref() {
                    let _ = tx.send(EngineEvent::Ended);
                }
            }
        }
    }

    struct Harness {
        manager: RecognitionManager,
        events: Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>,
        stop_calls: Arc<AtomicUsize>,
        factory_calls: Arc<AtomicUsize>,
        notices_rx: mpsc::UnboundedReceiver<Notice>,
    }

    impl Harness {
        fn new(end_on_stop: bool) -> Self {
            let (notices, notices_rx) = NoticeSender::channel();
            let sampler = Arc::new(LevelSampler::new(notices.clone()));

            let events = Arc::new(Mutex::new(None));
            let stop_calls = Arc::new(AtomicUsize::new(0));
            let factory_calls = Arc::new(AtomicUsize::new(0));

            let factory: EngineFactory = {
                let events = Arc::clone(&events);
                let stop_calls = Arc::clone(&stop_calls);
                let factory_calls = Arc::clone(&factory_calls);
                Box::new(move || {
                    factory_calls.fetch_add(1, Ordering::SeqCst);
                    SpeechCapability::Available(Box::new(ScriptedEngine {
                        events: Arc::clone(&events),
                        stop_calls: Arc::clone(&stop_calls),
                        end_on_stop,
                    }))
                })
            };

            let manager =
                RecognitionManager::new(factory, sampler, notices, Duration::from_secs(3));

            Self {
                manager,
                events,
                stop_calls,
                factory_calls,
                notices_rx,
            }
        }

        fn emit(&self, event: EngineEvent) {
            let guard = self.events.lock().unwrap();
            guard.as_ref().expect("engine not started").send(event).unwrap();
        }

        fn stop_calls(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }

        fn drain_notices(&mut self) -> Vec<Notice> {
            let mut notices = Vec::new();
            while let Ok(notice) = self.notices_rx.try_recv() {
                notices.push(notice);
            }
            notices
        }
    }

    /// Let spawned tasks run without advancing the paused clock
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalized_segments_accumulate_in_arrival_order() {
        let h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;

        h.emit(EngineEvent::Started);
        h.emit(EngineEvent::Result(vec![TranscriptSegment::final_text(
            "hello",
        )]));
        settle().await;

        // Interim segments never touch the buffer
        h.emit(EngineEvent::Result(vec![TranscriptSegment::partial("wor")]));
        settle().await;
        assert_eq!(h.manager.current_text(), "hello ");

        h.emit(EngineEvent::Result(vec![TranscriptSegment::final_text(
            "world",
        )]));
        settle().await;
        assert_eq!(h.manager.current_text(), "hello world ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_batch_appends_only_finals() {
        let h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;

        h.emit(EngineEvent::Started);
        h.emit(EngineEvent::Result(vec![
            TranscriptSegment::final_text("one"),
            TranscriptSegment::partial("tw"),
            TranscriptSegment::final_text("two"),
        ]));
        settle().await;

        assert_eq!(h.manager.current_text(), "one two ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_after_silence_and_stops_once() {
        let mut h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        settle().await;

        tokio::time::advance(Duration::from_millis(3010)).await;
        settle().await;

        assert_eq!(h.stop_calls(), 1);
        assert!(!h.manager.is_active());

        let notices = h.drain_notices();
        assert!(
            notices
                .iter()
                .any(|n| n.severity == Severity::Info && n.message.contains("silence")),
            "expected a silence notice, got {:?}",
            notices
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_activity_rearms_watchdog() {
        let h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        settle().await;

        // Interim activity every 2s keeps the 3s watchdog from firing
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(2)).await;
            settle().await;
            h.emit(EngineEvent::Result(vec![TranscriptSegment::partial("...")]));
            settle().await;
        }
        assert!(h.manager.is_active());
        assert_eq!(h.stop_calls(), 0);

        tokio::time::advance(Duration::from_millis(3010)).await;
        settle().await;
        assert!(!h.manager.is_active());
        assert_eq!(h.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_active_creates_no_second_engine() {
        let h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        settle().await;

        h.manager.start().unwrap();
        settle().await;

        assert_eq!(h.factory_calls.load(Ordering::SeqCst), 1);
        assert!(h.manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_capability_reports_and_creates_nothing() {
        let (notices, mut notices_rx) = NoticeSender::channel();
        let sampler = Arc::new(LevelSampler::new(notices.clone()));
        let factory: EngineFactory =
            Box::new(|| SpeechCapability::Unavailable("no model".to_string()));
        let manager = RecognitionManager::new(factory, sampler, notices, Duration::from_secs(3));

        assert!(manager.start().is_err());
        assert!(!manager.is_active());

        let notice = notices_rx.try_recv().unwrap();
        assert_eq!(notice.severity, Severity::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_stop_ends_session_and_keeps_text() {
        let h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        h.emit(EngineEvent::Result(vec![TranscriptSegment::final_text("hi")]));
        settle().await;

        h.manager.stop();
        settle().await;

        assert_eq!(h.stop_calls(), 1);
        assert!(!h.manager.is_active());
        assert_eq!(h.manager.current_text(), "hi ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_arriving_with_engine_stop_is_kept() {
        // stop() requests graceful termination; a final the engine flushes
        // before Ended still lands in the buffer
        let h = Harness::new(false);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        settle().await;

        h.manager.stop();
        settle().await;
        h.emit(EngineEvent::Result(vec![TranscriptSegment::final_text(
            "tail",
        )]));
        h.emit(EngineEvent::Ended);
        settle().await;

        assert!(!h.manager.is_active());
        assert_eq!(h.manager.current_text(), "tail ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_error_ends_session_and_flags_failure() {
        let mut h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        settle().await;

        h.emit(EngineEvent::Error("network".to_string()));
        settle().await;

        assert!(!h.manager.is_active());
        assert!(h.manager.has_failed());
        let notices = h.drain_notices();
        assert!(
            notices.iter().any(|n| n.severity == Severity::Error),
            "expected an error notice"
        );

        // A fresh start clears the failure flag
        h.manager.start().unwrap();
        settle().await;
        assert!(!h.manager.has_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_engine_is_torn_down_after_grace() {
        let h = Harness::new(false);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        settle().await;

        h.manager.stop();
        settle().await;
        assert_eq!(h.stop_calls(), 1);
        assert!(h.manager.is_active());

        tokio::time::advance(TEARDOWN_GRACE + Duration::from_millis(10)).await;
        settle().await;
        assert!(!h.manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_accumulated_text() {
        let h = Harness::new(true);
        h.manager.start().unwrap();
        settle().await;
        h.emit(EngineEvent::Started);
        h.emit(EngineEvent::Result(vec![TranscriptSegment::final_text(
            "hello",
        )]));
        settle().await;
        assert_eq!(h.manager.current_text(), "hello ");

        h.manager.clear();
        assert_eq!(h.manager.current_text(), "");
    }
}
