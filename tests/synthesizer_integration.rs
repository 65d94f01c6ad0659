//! Synthesizer lifecycle tests against a local mock stream-input backend.
//!
//! The mock server records every JSON message it receives and answers an end
//! marker with one audio chunk followed by the completion acknowledgement,
//! which is enough to drive the full accumulate → flush → close lifecycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use voxpipe::core::tts::{
    AudioCallback, AudioData, BaseTTS, ElevenLabsTTS, TTSConfig, TTSError,
};

/// Start a mock TTS backend. Returns its ws:// URL and a receiver of every
/// JSON message any connection delivered.
async fn start_mock_server() -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
    start_mock_server_with_delay(Duration::ZERO).await
}

/// Same as [`start_mock_server`], holding the handshake open for `delay`
/// before accepting each connection.
async fn start_mock_server_with_delay(
    delay: Duration,
) -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let msg_tx = msg_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    let is_end_marker =
                        value.get("text").and_then(|t| t.as_str()) == Some("");
                    let _ = msg_tx.send(value);

                    if is_end_marker {
                        let audio = BASE64.encode([1u8, 2, 3, 4]);
                        let _ = ws
                            .send(Message::Text(
                                format!(r#"{{"audio": "{audio}"}}"#).into(),
                            ))
                            .await;
                        let _ = ws
                            .send(Message::Text(r#"{"isFinal": true}"#.to_string().into()))
                            .await;
                    }
                }
            });
        }
    });

    (format!("ws://127.0.0.1:{port}"), msg_rx)
}

#[derive(Default)]
struct RecordingCallback {
    audio: parking_lot::Mutex<Vec<Vec<u8>>>,
    completes: AtomicUsize,
}

impl AudioCallback for RecordingCallback {
    fn on_audio(&self, audio_data: AudioData) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.audio.lock().push(audio_data.data);
        })
    }

    fn on_error(&self, _error: TTSError) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {})
    }

    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.completes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

fn config(base_url: String, idle_flush_ms: u64) -> TTSConfig {
    TTSConfig {
        api_key: "test_key".to_string(),
        voice_id: "test_voice".to_string(),
        idle_flush_ms,
        base_url: Some(base_url),
        ..Default::default()
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<serde_json::Value>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(value) = rx.try_recv() {
        out.push(value);
    }
    out
}

fn count_end_markers(messages: &[serde_json::Value]) -> usize {
    messages
        .iter()
        .filter(|m| m.get("text").and_then(|t| t.as_str()) == Some(""))
        .count()
}

#[tokio::test]
async fn idle_flush_sends_one_end_marker_and_closes() {
    let (url, mut server_msgs) = start_mock_server().await;
    let tts = ElevenLabsTTS::new(config(url, 100)).unwrap();
    let cb = Arc::new(RecordingCallback::default());
    tts.on_audio(cb.clone());

    tts.speak("Hello").await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let messages = drain(&mut server_msgs);
    // Init handshake carries the api key before any real text.
    assert_eq!(messages[0]["xi_api_key"], "test_key");
    assert!(
        messages
            .iter()
            .any(|m| m.get("text").and_then(|t| t.as_str()) == Some("Hello "))
    );
    assert_eq!(count_end_markers(&messages), 1);

    // Session closed after the acknowledgement, audio delivered once.
    assert!(!tts.is_ready());
    assert_eq!(cb.completes.load(Ordering::SeqCst), 1);
    assert_eq!(cb.audio.lock().as_slice(), &[vec![1, 2, 3, 4]]);
}

#[tokio::test]
async fn interrupt_before_flush_discards_everything() {
    let (url, mut server_msgs) = start_mock_server().await;
    // Idle flush far in the future so the interrupt races nothing.
    let tts = ElevenLabsTTS::new(config(url, 5_000)).unwrap();
    let cb = Arc::new(RecordingCallback::default());
    tts.on_audio(cb.clone());

    tts.speak("A").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    tts.speak("B").await.unwrap();
    tts.interrupt().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = drain(&mut server_msgs);
    assert_eq!(count_end_markers(&messages), 0);
    assert!(cb.audio.lock().is_empty());
    assert_eq!(cb.completes.load(Ordering::SeqCst), 0);
    assert!(!tts.is_ready());
}

#[tokio::test]
async fn interrupt_during_connect_discards_token_and_connection() {
    // The handshake outlives both the interrupt and its cooldown, so the
    // connect completes for a session that no longer exists.
    let (url, mut server_msgs) = start_mock_server_with_delay(Duration::from_millis(300)).await;
    let tts = Arc::new(ElevenLabsTTS::new(config(url, 100)).unwrap());
    let cb = Arc::new(RecordingCallback::default());
    tts.on_audio(cb.clone());

    let speak_tts = tts.clone();
    let speak = tokio::spawn(async move { speak_tts.speak("Hello").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tts.interrupt().await.unwrap();
    speak.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let messages = drain(&mut server_msgs);
    assert!(
        !messages
            .iter()
            .any(|m| m.get("text").and_then(|t| t.as_str()) == Some("Hello "))
    );
    assert_eq!(count_end_markers(&messages), 0);
    assert!(cb.audio.lock().is_empty());
    assert_eq!(cb.completes.load(Ordering::SeqCst), 0);
    assert!(!tts.is_ready());
}

#[tokio::test]
async fn finish_flushes_remaining_text() {
    let (url, mut server_msgs) = start_mock_server().await;
    let tts = ElevenLabsTTS::new(config(url, 5_000)).unwrap();
    let cb = Arc::new(RecordingCallback::default());
    tts.on_audio(cb.clone());

    tts.speak("Parting words").await.unwrap();
    tts.finish().await.unwrap();

    let messages = drain(&mut server_msgs);
    assert_eq!(count_end_markers(&messages), 1);
    assert_eq!(cb.completes.load(Ordering::SeqCst), 1);
    assert!(!tts.is_ready());
}

#[tokio::test]
async fn next_turn_reconnects_after_flush() {
    let (url, mut server_msgs) = start_mock_server().await;
    let tts = ElevenLabsTTS::new(config(url, 100)).unwrap();
    let cb = Arc::new(RecordingCallback::default());
    tts.on_audio(cb.clone());

    tts.speak("First turn").await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    tts.speak("Second turn").await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let messages = drain(&mut server_msgs);
    // Two sessions: two init handshakes, two end markers.
    let inits = messages
        .iter()
        .filter(|m| m.get("xi_api_key").is_some())
        .count();
    assert_eq!(inits, 2);
    assert_eq!(count_end_markers(&messages), 2);
    assert_eq!(cb.completes.load(Ordering::SeqCst), 2);
}
