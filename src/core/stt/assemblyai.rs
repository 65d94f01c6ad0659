use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    BaseSTT, STTConfig, STTConnectionState, STTError, STTErrorCallback, STTResult,
    SpeechStartCallback, TranscriptCallback, TranscriptEvent, TranscriptWord,
};

pub const ASSEMBLYAI_STREAMING_URL: &str = "wss://streaming.assemblyai.com/v3/ws";

/// Message received from the AssemblyAI v3 streaming API.
///
/// The API tags messages with a `type` field (`Begin`, `Turn`, `Termination`)
/// but error payloads carry only an `error` field, so this is parsed as one
/// permissive structure rather than a tagged enum.
#[derive(Debug, Deserialize, Serialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub id: Option<String>,
    pub expires_at: Option<f64>,
    pub transcript: Option<String>,
    pub turn_is_formatted: Option<bool>,
    pub end_of_turn: Option<bool>,
    pub end_of_turn_confidence: Option<f32>,
    pub words: Option<Vec<RealtimeWord>>,
    pub audio_duration_seconds: Option<f64>,
    pub session_duration_seconds: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RealtimeWord {
    pub text: String,
    pub start: u64,
    pub end: u64,
    pub confidence: f32,
}

/// Shared state between the client handle and the connection task.
struct TranscriberShared {
    state: parking_lot::RwLock<STTConnectionState>,
    /// Sender into the connection task's outbound queue. `None` when no
    /// connection is open.
    ws_tx: parking_lot::RwLock<Option<mpsc::UnboundedSender<Message>>>,
    reader_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    transcript_cb: parking_lot::RwLock<Option<TranscriptCallback>>,
    error_cb: parking_lot::RwLock<Option<STTErrorCallback>>,
    speech_start_cb: parking_lot::RwLock<Option<SpeechStartCallback>>,
    /// Set on the first non-empty partial of an utterance, cleared on that
    /// utterance's final. Guarantees exactly one speech-start per utterance.
    speech_started: AtomicBool,
    /// Notified when the connection task exits for any reason.
    closed: tokio::sync::Notify,
}

impl TranscriberShared {
    fn discard_connection(&self) {
        *self.ws_tx.write() = None;
        *self.state.write() = STTConnectionState::Disconnected;
    }
}

/// AssemblyAI v3 streaming STT client.
///
/// Holds one persistent duplex WebSocket. The connection is dialed lazily on
/// the first audio frame; concurrent senders coalesce into a single in-flight
/// connection attempt. A closed or errored connection is discarded and the
/// next frame dials fresh.
pub struct AssemblyAISTT {
    config: STTConfig,
    shared: Arc<TranscriberShared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl AssemblyAISTT {
    pub fn new(config: STTConfig) -> STTResult<Self> {
        if config.api_key.is_empty() {
            return Err(STTError::AuthenticationFailed(
                "API key is required for AssemblyAI".to_string(),
            ));
        }

        Ok(Self {
            config,
            shared: Arc::new(TranscriberShared {
                state: parking_lot::RwLock::new(STTConnectionState::Disconnected),
                ws_tx: parking_lot::RwLock::new(None),
                reader_handle: parking_lot::Mutex::new(None),
                transcript_cb: parking_lot::RwLock::new(None),
                error_cb: parking_lot::RwLock::new(None),
                speech_start_cb: parking_lot::RwLock::new(None),
                speech_started: AtomicBool::new(false),
                closed: tokio::sync::Notify::new(),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Build the WebSocket URL with query parameters.
    fn build_websocket_url(&self) -> STTResult<String> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(ASSEMBLYAI_STREAMING_URL);
        let mut url = Url::parse(base)
            .map_err(|e| STTError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("sample_rate", &self.config.sample_rate.to_string())
            .append_pair("format_turns", &self.config.format_turns.to_string());

        Ok(url.to_string())
    }

    /// Ensure a connection is open, coalescing concurrent attempts.
    async fn ensure_connected(&self) -> STTResult<()> {
        if self.shared.ws_tx.read().is_some() {
            return Ok(());
        }

        let _guard = self.connect_lock.lock().await;
        // Another caller may have connected while we waited for the lock.
        if self.shared.ws_tx.read().is_some() {
            return Ok(());
        }

        let ws_url = self.build_websocket_url()?;
        *self.shared.state.write() = STTConnectionState::Connecting;

        let mut request = ws_url
            .into_client_request()
            .map_err(|e| STTError::ConfigurationError(format!("Invalid request: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| STTError::AuthenticationFailed(format!("Invalid API key: {e}")))?,
        );

        let (ws_stream, _) = match connect_async(request).await {
            Ok(result) => result,
            Err(e) => {
                let msg = format!("Failed to connect to AssemblyAI: {e}");
                *self.shared.state.write() = STTConnectionState::Error(msg.clone());
                return Err(STTError::ConnectionFailed(msg));
            }
        };

        info!("Connected to AssemblyAI streaming WebSocket");
        *self.shared.state.write() = STTConnectionState::Connected;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        *self.shared.ws_tx.write() = Some(ws_tx);

        let shared = self.shared.clone();
        let format_turns = self.config.format_turns;
        let handle = tokio::spawn(async move {
            let (mut ws_sink, mut ws_stream) = ws_stream.split();

            loop {
                tokio::select! {
                    outbound = ws_rx.recv() => {
                        match outbound {
                            Some(message) => {
                                if let Err(e) = ws_sink.send(message).await {
                                    error!("Failed to send to AssemblyAI: {e}");
                                    break;
                                }
                            }
                            // All senders dropped: the connection was discarded.
                            None => break,
                        }
                    }
                    inbound = ws_stream.next() => {
                        match inbound {
                            Some(Ok(msg)) => {
                                if handle_server_message(&shared, msg, format_turns).await {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!("AssemblyAI WebSocket error: {e}");
                                let cb = shared.error_cb.read().clone();
                                if let Some(cb) = cb {
                                    cb(STTError::NetworkError(e.to_string())).await;
                                }
                                break;
                            }
                            None => {
                                info!("AssemblyAI WebSocket stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            shared.discard_connection();
            shared.closed.notify_waiters();
        });

        *self.shared.reader_handle.lock() = Some(handle);
        Ok(())
    }

    fn send_terminate(&self) {
        let tx = self.shared.ws_tx.read().clone();
        if let Some(tx) = tx {
            let terminate = serde_json::json!({ "type": "Terminate" }).to_string();
            let _ = tx.send(Message::Text(terminate.into()));
        }
    }
}

/// Handle one inbound server message. Returns true when the session is over
/// and the connection task should exit.
async fn handle_server_message(
    shared: &Arc<TranscriberShared>,
    message: Message,
    format_turns: bool,
) -> bool {
    match message {
        Message::Text(text) => {
            let parsed: RealtimeMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    // Malformed payloads are dropped; the connection stays up.
                    warn!("Failed to parse AssemblyAI message, dropping: {e}");
                    return false;
                }
            };

            if let Some(err) = parsed.error {
                warn!("AssemblyAI reported error: {err}");
                let cb = shared.error_cb.read().clone();
                if let Some(cb) = cb {
                    cb(STTError::ProviderError(err)).await;
                }
                return false;
            }

            match parsed.msg_type.as_deref() {
                Some("Begin") => {
                    info!(
                        session_id = parsed.id.as_deref().unwrap_or("unknown"),
                        "AssemblyAI session started"
                    );
                }
                Some("Turn") => {
                    handle_turn(shared, &parsed, format_turns).await;
                }
                Some("Termination") => {
                    info!(
                        audio_seconds = parsed.audio_duration_seconds.unwrap_or(0.0),
                        session_seconds = parsed.session_duration_seconds.unwrap_or(0.0),
                        "AssemblyAI session terminated"
                    );
                    return true;
                }
                other => {
                    debug!("Unknown AssemblyAI message type: {other:?}");
                }
            }
        }
        Message::Close(frame) => {
            info!("AssemblyAI closed the connection: {frame:?}");
            return true;
        }
        Message::Binary(data) => {
            warn!("Unexpected binary message from AssemblyAI ({} bytes)", data.len());
        }
        // Pings are answered by the library.
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
    }

    false
}

async fn handle_turn(shared: &Arc<TranscriberShared>, msg: &RealtimeMessage, format_turns: bool) {
    let transcript = msg.transcript.clone().unwrap_or_default();

    let is_final = if format_turns {
        msg.turn_is_formatted.unwrap_or(false)
    } else {
        msg.end_of_turn.unwrap_or(false)
    };

    if is_final {
        // The utterance is over; the next non-empty partial belongs to a new
        // one and may fire speech-start again.
        shared.speech_started.store(false, Ordering::Release);

        if transcript.trim().is_empty() {
            debug!("Skipping empty final transcript");
            return;
        }

        let words: Vec<TranscriptWord> = msg
            .words
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|w| TranscriptWord {
                text: w.text.clone(),
                start_ms: w.start,
                end_ms: w.end,
                confidence: w.confidence,
            })
            .collect();

        let confidence = msg.end_of_turn_confidence.unwrap_or_else(|| {
            if words.is_empty() {
                0.0
            } else {
                words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
            }
        });

        debug!(transcript = %transcript, confidence, "Final transcript");

        let cb = shared.transcript_cb.read().clone();
        if let Some(cb) = cb {
            cb(TranscriptEvent::Final {
                transcript,
                confidence,
                words,
            })
            .await;
        }
    } else {
        if transcript.is_empty() {
            return;
        }

        // First non-empty partial of the utterance: exactly one speech-start.
        if !shared.speech_started.swap(true, Ordering::AcqRel) {
            let cb = shared.speech_start_cb.read().clone();
            if let Some(cb) = cb {
                cb().await;
            }
        }

        let cb = shared.transcript_cb.read().clone();
        if let Some(cb) = cb {
            cb(TranscriptEvent::Partial { transcript }).await;
        }
    }
}

#[async_trait::async_trait]
impl BaseSTT for AssemblyAISTT {
    async fn send_audio(&self, audio_data: Vec<u8>) -> STTResult<()> {
        self.ensure_connected().await?;

        let tx = self.shared.ws_tx.read().clone();
        let Some(tx) = tx else {
            return Err(STTError::ConnectionFailed(
                "Connection closed before audio could be sent".to_string(),
            ));
        };

        if tx.send(Message::Binary(audio_data.into())).is_err() {
            // The connection task died; drop the session so the next frame
            // dials a fresh one.
            self.shared.discard_connection();
            return Err(STTError::NetworkError(
                "AssemblyAI connection task has stopped".to_string(),
            ));
        }

        Ok(())
    }

    fn on_transcript(&self, callback: TranscriptCallback) {
        *self.shared.transcript_cb.write() = Some(callback);
    }

    fn on_error(&self, callback: STTErrorCallback) {
        *self.shared.error_cb.write() = Some(callback);
    }

    fn on_speech_start(&self, callback: SpeechStartCallback) {
        *self.shared.speech_start_cb.write() = Some(callback);
    }

    fn is_ready(&self) -> bool {
        self.shared.ws_tx.read().is_some()
    }

    fn connection_state(&self) -> STTConnectionState {
        self.shared.state.read().clone()
    }

    async fn finish(&self) -> STTResult<()> {
        if !self.is_ready() {
            return Ok(());
        }

        let notified = self.shared.closed.notified();
        self.send_terminate();

        let wait = Duration::from_millis(self.config.termination_timeout_ms);
        if timeout(wait, notified).await.is_err() {
            warn!(
                "AssemblyAI did not acknowledge termination within {}ms, force-closing",
                self.config.termination_timeout_ms
            );
            if let Some(handle) = self.shared.reader_handle.lock().take() {
                handle.abort();
            }
            self.shared.discard_connection();
        }

        Ok(())
    }

    async fn interrupt(&self) -> STTResult<()> {
        self.send_terminate();
        // Dropping the sender lets the connection task drain the queued
        // termination message through the sink before it exits on its own.
        self.shared.discard_connection();
        if let Some(handle) = self.shared.reader_handle.lock().take() {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                handle.abort();
            });
        }
        Ok(())
    }

    fn provider_info(&self) -> &'static str {
        "AssemblyAI streaming v3"
    }
}

impl Drop for AssemblyAISTT {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.reader_handle.lock().take() {
            handle.abort();
        }
    }
}
