//! Transcriber lifecycle tests against a local mock streaming backend.
//!
//! The mock server speaks just enough of the v3 protocol: a `Begin` on
//! connect, a partial then a formatted final `Turn` for each audio frame, and
//! a `Termination` when asked to terminate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use voxpipe::core::stt::{AssemblyAISTT, BaseSTT, STTConfig, TranscriptEvent};

/// Start the mock backend. Returns its ws:// URL and a receiver of every text
/// message any connection delivered to the server.
async fn start_mock_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let msg_tx = msg_tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                let _ = ws
                    .send(Message::Text(
                        r#"{"type": "Begin", "id": "mock-session"}"#.to_string().into(),
                    ))
                    .await;

                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Binary(_) => {
                            let partial = r#"{"type": "Turn", "transcript": "hello", "turn_is_formatted": false, "end_of_turn": false}"#;
                            let fin = r#"{
                                "type": "Turn",
                                "transcript": "Hello there.",
                                "turn_is_formatted": true,
                                "end_of_turn": true,
                                "end_of_turn_confidence": 0.9,
                                "words": [
                                    {"text": "Hello", "start": 0, "end": 300, "confidence": 0.95},
                                    {"text": "there.", "start": 320, "end": 700, "confidence": 0.85}
                                ]
                            }"#;
                            let _ = ws.send(Message::Text(partial.to_string().into())).await;
                            let _ = ws.send(Message::Text(fin.to_string().into())).await;
                        }
                        Message::Text(text) => {
                            let _ = msg_tx.send(text.to_string());
                            if text.contains("Terminate") {
                                let _ = ws
                                    .send(Message::Text(
                                        r#"{"type": "Termination", "audio_duration_seconds": 1.0}"#
                                            .to_string()
                                            .into(),
                                    ))
                                    .await;
                                let _ = ws.close(None).await;
                                return;
                            }
                        }
                        Message::Close(_) => return,
                        _ => {}
                    }
                }
            });
        }
    });

    (format!("ws://127.0.0.1:{port}"), msg_rx)
}

fn config(base_url: String) -> STTConfig {
    STTConfig {
        api_key: "test_key".to_string(),
        base_url: Some(base_url),
        ..Default::default()
    }
}

type EventLog = Arc<parking_lot::Mutex<Vec<TranscriptEvent>>>;

fn wire_callbacks(stt: &AssemblyAISTT) -> (EventLog, Arc<AtomicUsize>) {
    let events: EventLog = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let speech_starts = Arc::new(AtomicUsize::new(0));

    let events_clone = events.clone();
    stt.on_transcript(Arc::new(move |event| {
        let events = events_clone.clone();
        Box::pin(async move {
            events.lock().push(event);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    }));

    let starts_clone = speech_starts.clone();
    stt.on_speech_start(Arc::new(move || {
        let starts = starts_clone.clone();
        Box::pin(async move {
            starts.fetch_add(1, Ordering::SeqCst);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    }));

    (events, speech_starts)
}

#[tokio::test]
async fn audio_produces_partial_then_final_with_one_speech_start() {
    let (url, _server_msgs) = start_mock_server().await;
    let stt = AssemblyAISTT::new(config(url)).unwrap();
    let (events, speech_starts) = wire_callbacks(&stt);

    // Connection is dialed lazily by the first frame.
    assert!(!stt.is_ready());
    stt.send_audio(vec![0u8; 3200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(stt.is_ready());

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], TranscriptEvent::Partial { transcript } if transcript == "hello"));
    match &events[1] {
        TranscriptEvent::Final {
            transcript,
            confidence,
            words,
        } => {
            assert_eq!(transcript, "Hello there.");
            assert_eq!(*confidence, 0.9);
            assert_eq!(words.len(), 2);
            assert_eq!(words[1].start_ms, 320);
        }
        other => panic!("expected final, got {other:?}"),
    }

    assert_eq!(speech_starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn finish_terminates_within_bound() {
    let (url, _server_msgs) = start_mock_server().await;
    let stt = AssemblyAISTT::new(config(url)).unwrap();
    let (_events, _starts) = wire_callbacks(&stt);

    stt.send_audio(vec![0u8; 3200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    stt.finish().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!stt.is_ready());
}

#[tokio::test]
async fn next_frame_redials_after_termination() {
    let (url, _server_msgs) = start_mock_server().await;
    let stt = AssemblyAISTT::new(config(url)).unwrap();
    let (events, speech_starts) = wire_callbacks(&stt);

    stt.send_audio(vec![0u8; 3200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    stt.finish().await.unwrap();
    assert!(!stt.is_ready());

    // A dead session is discarded entirely; this frame opens a fresh one.
    stt.send_audio(vec![0u8; 3200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(stt.is_ready());

    assert_eq!(events.lock().len(), 4);
    // Speech-start fired once per utterance.
    assert_eq!(speech_starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn interrupt_force_closes() {
    let (url, _server_msgs) = start_mock_server().await;
    let stt = AssemblyAISTT::new(config(url)).unwrap();
    let (_events, _starts) = wire_callbacks(&stt);

    stt.send_audio(vec![0u8; 3200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    stt.interrupt().await.unwrap();
    assert!(!stt.is_ready());
}

#[tokio::test]
async fn interrupt_delivers_termination_message() {
    let (url, mut server_msgs) = start_mock_server().await;
    let stt = AssemblyAISTT::new(config(url)).unwrap();
    let (_events, _starts) = wire_callbacks(&stt);

    stt.send_audio(vec![0u8; 3200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The force-close must still get the termination request onto the wire.
    stt.interrupt().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut received = Vec::new();
    while let Ok(text) = server_msgs.try_recv() {
        received.push(text);
    }
    assert!(received.iter().any(|text| text.contains("Terminate")));
}
