//! ElevenLabs stream-input TTS client.
//!
//! One duplex WebSocket session per agent reply: text tokens are sent as they
//! stream in from the agent, the backend accumulates them, and an idle timer
//! on the token stream triggers the flush (end marker) that makes the backend
//! speak. Interrupts preempt everything: they never wait behind an in-flight
//! submission, discard accumulated and queued text, and close the session
//! without waiting for pending audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    AudioCallback, AudioData, BaseTTS, InterruptCallback, TTSConfig, TTSError, TTSResult,
};
use super::session::SessionState;
use crate::core::events::now_ms;

pub const ELEVENLABS_STREAM_URL: &str = "wss://api.elevenlabs.io/v1/text-to-speech";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

/// First message of a session: carries the api key and voice settings. The
/// single-space text is part of the handshake and does not count as real text.
#[derive(Debug, Serialize)]
struct InitMessage<'a> {
    text: &'a str,
    voice_settings: &'a VoiceSettings,
    xi_api_key: &'a str,
}

/// Message received from the ElevenLabs stream-input API.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    /// Base64-encoded PCM chunk.
    audio: Option<String>,
    /// Set when all audio for the flushed text has been delivered.
    #[serde(rename = "isFinal")]
    is_final: Option<bool>,
    error: Option<String>,
    message: Option<String>,
}

/// State shared between the client handle, the connection task and timers.
struct SynthShared {
    config: TTSConfig,
    voice_settings: VoiceSettings,
    state: parking_lot::Mutex<SessionState>,
    ws_tx: parking_lot::RwLock<Option<mpsc::UnboundedSender<Message>>>,
    reader_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    idle_timer: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    audio_cb: parking_lot::RwLock<Option<Arc<dyn AudioCallback>>>,
    interrupt_cb: parking_lot::RwLock<Option<InterruptCallback>>,
    /// Once set, received audio is dropped and the session tears down early.
    sink_closed: AtomicBool,
    /// Timestamp of the last effective interrupt, for debouncing.
    last_interrupt_ms: AtomicU64,
    /// Bumped per effective interrupt; the cooldown task clears the
    /// interrupted flag only if no newer interrupt arrived meanwhile.
    interrupt_epoch: AtomicU64,
    /// Notified when the completion acknowledgement for the current flush
    /// arrives, or when an interrupt resolves the wait.
    flush_done: tokio::sync::Notify,
    /// Serializes text submissions and flushes.
    submit_lock: tokio::sync::Mutex<()>,
    /// Coalesces concurrent connection attempts.
    connect_lock: tokio::sync::Mutex<()>,
}

impl SynthShared {
    fn discard_connection(&self) {
        *self.ws_tx.write() = None;
        self.state.lock().close();
    }

    fn cancel_idle_timer(&self) {
        if let Some(handle) = self.idle_timer.lock().take() {
            handle.abort();
        }
    }
}

/// ElevenLabs streaming synthesizer.
pub struct ElevenLabsTTS {
    shared: Arc<SynthShared>,
}

impl ElevenLabsTTS {
    pub fn new(config: TTSConfig) -> TTSResult<Self> {
        if config.api_key.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "API key is required for ElevenLabs".to_string(),
            ));
        }
        if config.voice_id.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "Voice ID is required for ElevenLabs".to_string(),
            ));
        }

        let voice_settings = VoiceSettings {
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        };

        Ok(Self {
            shared: Arc::new(SynthShared {
                config,
                voice_settings,
                state: parking_lot::Mutex::new(SessionState::new()),
                ws_tx: parking_lot::RwLock::new(None),
                reader_handle: parking_lot::Mutex::new(None),
                idle_timer: parking_lot::Mutex::new(None),
                audio_cb: parking_lot::RwLock::new(None),
                interrupt_cb: parking_lot::RwLock::new(None),
                sink_closed: AtomicBool::new(false),
                last_interrupt_ms: AtomicU64::new(0),
                interrupt_epoch: AtomicU64::new(0),
                flush_done: tokio::sync::Notify::new(),
                submit_lock: tokio::sync::Mutex::new(()),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

fn build_websocket_url(config: &TTSConfig) -> TTSResult<String> {
    let root = config.base_url.as_deref().unwrap_or(ELEVENLABS_STREAM_URL);
    let base = format!("{root}/{}/stream-input", config.voice_id);
    let mut url = Url::parse(&base)
        .map_err(|e| TTSError::InvalidConfiguration(format!("Invalid WebSocket URL: {e}")))?;

    url.query_pairs_mut()
        .append_pair("model_id", &config.model)
        .append_pair("output_format", &config.output_format);

    Ok(url.to_string())
}

/// Open a session if none is open, coalescing concurrent attempts.
async fn ensure_connected(shared: &Arc<SynthShared>) -> TTSResult<()> {
    if shared.ws_tx.read().is_some() {
        return Ok(());
    }

    let _guard = shared.connect_lock.lock().await;
    if shared.ws_tx.read().is_some() {
        return Ok(());
    }

    let ws_url = build_websocket_url(&shared.config)?;
    let gen = shared.state.lock().begin_connect();

    let (ws_stream, _) = match connect_async(&ws_url).await {
        Ok(result) => result,
        Err(e) => {
            shared.state.lock().connect_failed();
            return Err(TTSError::ConnectionFailed(format!(
                "Failed to connect to ElevenLabs: {e}"
            )));
        }
    };

    info!("Connected to ElevenLabs stream-input WebSocket");

    let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();

    // The init handshake goes through the channel like everything else so
    // ordering relative to the first token is preserved.
    let init = InitMessage {
        text: " ",
        voice_settings: &shared.voice_settings,
        xi_api_key: &shared.config.api_key,
    };
    let init_json = serde_json::to_string(&init)
        .map_err(|e| TTSError::InternalError(format!("Failed to serialize init message: {e}")))?;
    ws_tx
        .send(Message::Text(init_json.into()))
        .map_err(|_| TTSError::ConnectionFailed("Connection task unavailable".to_string()))?;

    // An interrupt that fired while the handshake was in flight bumped the
    // generation; the connection it outdated must not be installed.
    {
        let mut state = shared.state.lock();
        if state.generation() != gen || state.is_interrupted() {
            debug!("Discarding connection superseded during connect");
            state.close();
            return Err(TTSError::ConnectionFailed(
                "Session superseded during connect".to_string(),
            ));
        }
        *shared.ws_tx.write() = Some(ws_tx);
        state.session_opened();
    }

    let task_shared = shared.clone();
    let handle = tokio::spawn(async move {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        loop {
            tokio::select! {
                outbound = ws_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            if let Err(e) = ws_sink.send(message).await {
                                error!("Failed to send to ElevenLabs: {e}");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = ws_stream.next() => {
                    match inbound {
                        Some(Ok(msg)) => {
                            if handle_stream_message(&task_shared, msg).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("ElevenLabs WebSocket error: {e}");
                            let cb = task_shared.audio_cb.read().clone();
                            if let Some(cb) = cb {
                                cb.on_error(TTSError::NetworkError(e.to_string())).await;
                            }
                            break;
                        }
                        None => {
                            debug!("ElevenLabs WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        *task_shared.ws_tx.write() = None;
        task_shared.state.lock().close();
        // A flush waiting on the acknowledgement must not hang on a dead
        // connection.
        task_shared.flush_done.notify_waiters();
    });

    *shared.reader_handle.lock() = Some(handle);
    Ok(())
}

/// Handle one inbound message. Returns true when the connection task should
/// exit.
async fn handle_stream_message(shared: &Arc<SynthShared>, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            let parsed: StreamResponse = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse ElevenLabs message, dropping: {e}");
                    return false;
                }
            };

            if let Some(err) = parsed.error.or(parsed.message) {
                warn!("ElevenLabs reported error: {err}");
                let cb = shared.audio_cb.read().clone();
                if let Some(cb) = cb {
                    cb.on_error(TTSError::ProviderError(err)).await;
                }
                return false;
            }

            if let Some(encoded) = parsed.audio {
                if shared.sink_closed.load(Ordering::Acquire) {
                    debug!("Sink closed, tearing down synthesis session");
                    return true;
                }
                if shared.state.lock().is_interrupted() {
                    debug!("Dropping audio received after interrupt");
                } else {
                    match BASE64.decode(encoded.as_bytes()) {
                        Ok(chunk) => {
                            let aligned = shared.state.lock().align_audio(chunk);
                            if !aligned.is_empty() {
                                let cb = shared.audio_cb.read().clone();
                                if let Some(cb) = cb {
                                    cb.on_audio(AudioData {
                                        data: aligned,
                                        sample_rate: shared.config.sample_rate,
                                        format: "pcm".to_string(),
                                    })
                                    .await;
                                }
                            }
                        }
                        Err(e) => warn!("Failed to decode audio payload, dropping: {e}"),
                    }
                }
            }

            if parsed.is_final == Some(true) {
                // A completion acknowledgement before the end marker was sent
                // belongs to the init exchange and means nothing.
                if shared.state.lock().end_marker_sent() {
                    shared.flush_done.notify_waiters();
                    let cb = shared.audio_cb.read().clone();
                    if let Some(cb) = cb {
                        cb.on_complete().await;
                    }
                    return true;
                }
                debug!("Ignoring stale completion acknowledgement");
            }

            false
        }
        Message::Close(frame) => {
            debug!("ElevenLabs closed the connection: {frame:?}");
            true
        }
        Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => false,
    }
}

/// Send one token over the open session. Caller holds the submit lock.
async fn submit_token(shared: &Arc<SynthShared>, text: &str) {
    if let Err(e) = ensure_connected(shared).await {
        // Dropped without retry; the next submission dials fresh.
        warn!("Dropping token, connection unavailable: {e}");
        return;
    }

    // The connect may have raced an interrupt even when it succeeded.
    if shared.state.lock().is_interrupted() {
        debug!("Dropping token, interrupt arrived during connect");
        return;
    }

    let payload = serde_json::json!({ "text": format!("{text} ") }).to_string();
    let sent = {
        let tx = shared.ws_tx.read().clone();
        match tx {
            Some(tx) => tx.send(Message::Text(payload.into())).is_ok(),
            None => false,
        }
    };

    if !sent {
        warn!("Dropping token, connection task has stopped");
        shared.discard_connection();
        return;
    }

    shared.state.lock().note_real_text();
}

/// Flush the accumulated text: send the end marker and wait (bounded) for the
/// completion acknowledgement. Caller holds the submit lock.
///
/// `expected_gen` guards timer-driven flushes: if the session generation moved
/// on while the timer task waited for the lock (a new token arrived, or an
/// interrupt fired), the flush is abandoned.
async fn run_flush(shared: &Arc<SynthShared>, wait_ms: u64, expected_gen: Option<u64>) {
    {
        let mut state = shared.state.lock();
        if let Some(expected) = expected_gen {
            if state.generation() != expected {
                debug!("Abandoning stale idle flush");
                return;
            }
        }
        if !state.begin_flush() {
            return;
        }
    }

    // Arm the waiter before sending so the acknowledgement cannot slip
    // between send and wait.
    let notified = shared.flush_done.notified();

    let sent = {
        let tx = shared.ws_tx.read().clone();
        match tx {
            Some(tx) => tx
                .send(Message::Text(r#"{"text": ""}"#.to_string().into()))
                .is_ok(),
            None => false,
        }
    };

    if sent {
        if timeout(Duration::from_millis(wait_ms), notified).await.is_err() {
            // Non-fatal: the backend has probably already spoken. Audio that
            // still arrives is forwarded until the session closes below.
            warn!("Flush acknowledgement not received within {wait_ms}ms, proceeding");
        }
    } else {
        debug!("Connection already gone at flush time");
    }

    if let Some(handle) = shared.reader_handle.lock().take() {
        handle.abort();
    }
    shared.discard_connection();

    // Tokens that arrived mid-flush start the next session, in order.
    let queued = shared.state.lock().drain_queued();
    let mut resubmitted = false;
    for token in queued {
        if shared.state.lock().is_interrupted() {
            break;
        }
        submit_token(shared, &token).await;
        resubmitted = true;
    }
    if resubmitted && shared.state.lock().real_text_sent() {
        schedule_idle_flush(shared);
    }
}

/// Arm (or re-arm) the idle-flush timer. Each arm invalidates the previous
/// one both by aborting its task and by bumping the session generation.
fn schedule_idle_flush(shared: &Arc<SynthShared>) {
    shared.cancel_idle_timer();

    let gen = shared.state.lock().next_generation();
    let timer_shared = shared.clone();
    let delay = Duration::from_millis(shared.config.idle_flush_ms);

    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if timer_shared.state.lock().generation() != gen {
            return;
        }
        let _guard = timer_shared.submit_lock.lock().await;
        run_flush(
            &timer_shared,
            timer_shared.config.flush_ack_timeout_ms,
            Some(gen),
        )
        .await;
    });

    *shared.idle_timer.lock() = Some(handle);
}

#[async_trait::async_trait]
impl BaseTTS for ElevenLabsTTS {
    async fn speak(&self, text: &str) -> TTSResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        if self.shared.state.lock().is_interrupted() {
            debug!("Dropping token during interrupt cooldown");
            return Ok(());
        }

        self.shared.cancel_idle_timer();

        // Mid-flush tokens go into the FIFO without touching the submit lock,
        // which the flush is holding for up to its full acknowledgement wait.
        {
            let mut state = self.shared.state.lock();
            if state.is_flushing() {
                state.queue_token(text.to_string());
                return Ok(());
            }
        }

        let _guard = self.shared.submit_lock.lock().await;

        // Re-check: an interrupt or a flush may have begun while we waited.
        {
            let mut state = self.shared.state.lock();
            if state.is_interrupted() {
                return Ok(());
            }
            if state.is_flushing() {
                state.queue_token(text.to_string());
                return Ok(());
            }
        }

        submit_token(&self.shared, text).await;

        if self.shared.state.lock().real_text_sent() {
            schedule_idle_flush(&self.shared);
        }
        Ok(())
    }

    async fn flush(&self) -> TTSResult<()> {
        self.shared.cancel_idle_timer();
        let _guard = self.shared.submit_lock.lock().await;
        run_flush(&self.shared, self.shared.config.flush_ack_timeout_ms, None).await;
        Ok(())
    }

    async fn interrupt(&self) -> TTSResult<()> {
        let now = now_ms();
        let last = self.shared.last_interrupt_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < self.shared.config.interrupt_debounce_ms {
            debug!("Interrupt debounced");
            return Ok(());
        }
        self.shared.last_interrupt_ms.store(now, Ordering::Release);

        let epoch = self.shared.interrupt_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        self.shared.cancel_idle_timer();
        self.shared.state.lock().mark_interrupted();

        if let Some(handle) = self.shared.reader_handle.lock().take() {
            handle.abort();
        }
        self.shared.discard_connection();

        // Anything waiting on a flush acknowledgement resolves now.
        self.shared.flush_done.notify_waiters();

        let cb = self.shared.interrupt_cb.read().clone();
        if let Some(cb) = cb {
            cb().await;
        }

        let cooldown_shared = self.shared.clone();
        let cooldown = Duration::from_millis(self.shared.config.interrupt_cooldown_ms);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if cooldown_shared.interrupt_epoch.load(Ordering::Acquire) == epoch {
                cooldown_shared.state.lock().clear_interrupted();
                debug!("Interrupt cooldown over, accepting tokens again");
            }
        });

        Ok(())
    }

    async fn finish(&self) -> TTSResult<()> {
        self.shared.cancel_idle_timer();

        // Waits for any in-flight submission or flush before tearing down.
        let _guard = self.shared.submit_lock.lock().await;

        let has_real_text = {
            let state = self.shared.state.lock();
            state.is_open() && state.real_text_sent() && !state.is_interrupted()
        };

        if has_real_text {
            run_flush(&self.shared, self.shared.config.teardown_timeout_ms, None).await;
        }

        if let Some(handle) = self.shared.reader_handle.lock().take() {
            handle.abort();
        }
        self.shared.discard_connection();
        Ok(())
    }

    fn on_audio(&self, callback: Arc<dyn AudioCallback>) {
        *self.shared.audio_cb.write() = Some(callback);
    }

    fn on_interrupt(&self, callback: InterruptCallback) {
        *self.shared.interrupt_cb.write() = Some(callback);
    }

    fn mark_sink_closed(&self) {
        self.shared.sink_closed.store(true, Ordering::Release);
        self.shared.cancel_idle_timer();
        if let Some(handle) = self.shared.reader_handle.lock().take() {
            handle.abort();
        }
        self.shared.discard_connection();
        self.shared.flush_done.notify_waiters();
    }

    fn is_ready(&self) -> bool {
        self.shared.ws_tx.read().is_some()
    }

    fn provider_info(&self) -> &'static str {
        "ElevenLabs stream-input"
    }
}

impl Drop for ElevenLabsTTS {
    fn drop(&mut self) {
        self.shared.cancel_idle_timer();
        if let Some(handle) = self.shared.reader_handle.lock().take() {
            handle.abort();
        }
    }
}
