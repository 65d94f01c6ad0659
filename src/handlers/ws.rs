//! WebSocket session handler.
//!
//! The client sends binary PCM frames in and receives binary PCM frames out;
//! everything else is JSON. One `VoicePipeline` is built per connection and
//! torn down with it.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::events::PipelineEvent;
use crate::core::pipeline::VoicePipeline;
use crate::core::stt::AssemblyAISTT;
use crate::core::tts::ElevenLabsTTS;
use crate::state::AppState;

/// Control messages from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Flush the active utterance and end the session gracefully.
    Finish,
    /// Client-side barge-in: stop playback and synthesis now.
    Interrupt,
}

/// Session-level messages to the client. Pipeline events are serialized
/// directly; these cover what happens around the pipeline.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SessionMessage {
    Ready { sample_rate: u32 },
    Error { message: String },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &impl Serialize,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).unwrap_or_default();
    sender.send(Message::Text(json.into())).await
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (Some(stt_config), Some(tts_config)) =
        (state.config.stt_config(), state.config.tts_config())
    else {
        warn!("Rejecting voice session, providers not configured");
        let _ = send_json(
            &mut sender,
            &SessionMessage::Error {
                message: "Speech providers are not configured".to_string(),
            },
        )
        .await;
        return;
    };

    let stt = match AssemblyAISTT::new(stt_config) {
        Ok(stt) => Arc::new(stt),
        Err(e) => {
            let _ = send_json(
                &mut sender,
                &SessionMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    let tts = match ElevenLabsTTS::new(tts_config) {
        Ok(tts) => Arc::new(tts),
        Err(e) => {
            let _ = send_json(
                &mut sender,
                &SessionMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let (pipeline, mut events_rx) = VoicePipeline::new(
        stt,
        tts,
        state.agent.clone(),
        state.composer.clone(),
        state.config.pipeline_config(),
    );

    info!("Voice session started");
    if send_json(
        &mut sender,
        &SessionMessage::Ready {
            sample_rate: state.config.sample_rate,
        },
    )
    .await
    .is_err()
    {
        return;
    }

    // Outbound: drain pipeline events to the client. Audio goes as binary,
    // everything else as JSON. Ends when the pipeline (all senders) drops.
    let outbound = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let result = match event {
                PipelineEvent::TtsChunk { audio, .. } => {
                    sender.send(Message::Binary(bytes::Bytes::from(audio))).await
                }
                // Raw input audio is never echoed back.
                PipelineEvent::UserAudio { .. } => continue,
                other => send_json(&mut sender, &other).await,
            };
            if result.is_err() {
                debug!("Client went away, stopping outbound task");
                break;
            }
        }
    });

    // Inbound: binary PCM feeds the pipeline, JSON carries control.
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Binary(audio) => {
                pipeline.process_audio(&audio).await;
            }
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Finish) => {
                    debug!("Client requested finish");
                    pipeline.finish().await;
                    break;
                }
                Ok(ClientMessage::Interrupt) => {
                    debug!("Client requested interrupt");
                    pipeline.barge_in().await;
                }
                Err(e) => {
                    warn!("Ignoring malformed control message: {e}");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }

        if pipeline.is_ended() {
            debug!("Conversation over, closing session");
            break;
        }
    }

    if !pipeline.is_ended() {
        pipeline.finish().await;
    }
    drop(pipeline);
    let _ = outbound.await;
    info!("Voice session closed");
}
