//! Agent collaborator seam.
//!
//! The pipeline hands the agent one finalized transcript per turn and
//! receives a stream of outputs: text tokens, an optional suspension carrying
//! an opaque resume token, or an end-conversation signal. The agent's actual
//! reasoning lives behind this trait; a scripted implementation is provided
//! for demos and tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::VecDeque;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Agent unavailable: {0}")]
    Unavailable(String),
    #[error("Agent failed: {0}")]
    Failed(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// One item of an agent's streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// A text token to be spoken.
    Token(String),
    /// The agent suspended mid-turn (e.g. waiting on a tool or a human).
    /// The opaque token must be handed back unchanged with exactly the next
    /// user transcript.
    Suspend { resume_token: String },
    /// The agent wants to end the conversation. Teardown is deferred until
    /// the in-flight audio finishes playing.
    EndConversation,
}

/// A conversational agent consuming one final transcript per turn.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce the response stream for one user turn. `resume_token` is
    /// present exactly when the previous turn ended in a suspension.
    async fn respond(
        &self,
        transcript: &str,
        resume_token: Option<String>,
    ) -> AgentResult<BoxStream<'static, AgentOutput>>;
}

/// Canned-response agent for demos and tests.
///
/// Replies are consumed in order, one per turn, falling back to an echo once
/// exhausted. A transcript containing a farewell ends the conversation after
/// a spoken goodbye.
pub struct ScriptedAgent {
    replies: parking_lot::Mutex<VecDeque<String>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: parking_lot::Mutex::new(replies.into()),
        }
    }

    fn is_farewell(transcript: &str) -> bool {
        let lower = transcript.to_lowercase();
        lower.contains("goodbye") || lower.contains("bye")
    }

    /// Split a reply into word tokens the way an LLM would stream them.
    fn tokenize(reply: &str) -> Vec<AgentOutput> {
        reply
            .split_whitespace()
            .map(|word| AgentOutput::Token(format!("{word} ")))
            .collect()
    }
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new(vec![
            "Hello! How can I help you today?".to_string(),
            "That's interesting, tell me more.".to_string(),
        ])
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn respond(
        &self,
        transcript: &str,
        _resume_token: Option<String>,
    ) -> AgentResult<BoxStream<'static, AgentOutput>> {
        let mut outputs = if Self::is_farewell(transcript) {
            Self::tokenize("Goodbye! It was nice talking to you.")
        } else {
            let reply = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| format!("You said: {transcript}"));
            Self::tokenize(&reply)
        };

        if Self::is_farewell(transcript) {
            outputs.push(AgentOutput::EndConversation);
        }

        Ok(Box::pin(futures::stream::iter(outputs)))
    }
}
