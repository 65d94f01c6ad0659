//! Per-session synthesis state.
//!
//! All lifecycle state for one synthesis session lives in a single record
//! behind one lock, transitioned only through the named methods here. Timers
//! and spawned tasks capture the generation at arm time and compare it on
//! fire, so a stale timer from a previous session (or a previous arm) can
//! never act on the current one.

use std::collections::VecDeque;

/// Lifecycle phase of a synthesis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session open.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Session open, tokens are being accumulated by the backend.
    Accumulating,
    /// End marker sent, waiting for the completion acknowledgement.
    Flushing,
    /// Session closed; a new one must be opened for further speech.
    Closed,
}

#[derive(Debug)]
pub struct SessionState {
    phase: SessionPhase,
    /// Orthogonal to the phase: set by interrupt, cleared after cooldown.
    interrupted: bool,
    /// Whether any real text (not the init handshake) was sent this session.
    real_text_sent: bool,
    /// Whether the end marker was sent. A completion acknowledgement arriving
    /// before this is set belongs to the init exchange and is ignored.
    end_marker_sent: bool,
    /// Bumped on every session open, timer arm and interrupt.
    generation: u64,
    /// Odd trailing byte carried between audio chunks so emitted chunks are
    /// always even length.
    pending_byte: Option<u8>,
    /// Tokens that arrived while a flush was in progress, drained in order
    /// once the flush completes.
    queued_tokens: VecDeque<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            interrupted: false,
            real_text_sent: false,
            end_marker_sent: false,
            generation: 0,
            pending_byte: None,
            queued_tokens: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Accumulating | SessionPhase::Flushing
        )
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn real_text_sent(&self) -> bool {
        self.real_text_sent
    }

    pub fn end_marker_sent(&self) -> bool {
        self.end_marker_sent
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bump and return the new generation, invalidating outstanding timers.
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn begin_connect(&mut self) -> u64 {
        self.phase = SessionPhase::Connecting;
        self.real_text_sent = false;
        self.end_marker_sent = false;
        self.pending_byte = None;
        self.next_generation()
    }

    pub fn session_opened(&mut self) {
        self.phase = SessionPhase::Accumulating;
    }

    pub fn connect_failed(&mut self) {
        self.phase = SessionPhase::Idle;
    }

    pub fn note_real_text(&mut self) {
        self.real_text_sent = true;
    }

    /// Enter the flushing phase. Returns false if there is nothing to flush
    /// (no open session or no real text sent).
    pub fn begin_flush(&mut self) -> bool {
        if self.phase != SessionPhase::Accumulating || !self.real_text_sent {
            return false;
        }
        self.phase = SessionPhase::Flushing;
        self.end_marker_sent = true;
        true
    }

    pub fn is_flushing(&self) -> bool {
        self.phase == SessionPhase::Flushing
    }

    pub fn queue_token(&mut self, token: String) {
        self.queued_tokens.push_back(token);
    }

    pub fn drain_queued(&mut self) -> Vec<String> {
        self.queued_tokens.drain(..).collect()
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
        self.pending_byte = None;
        self.next_generation();
    }

    /// Interrupt: discard accumulation and queued tokens, invalidate timers.
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
        self.queued_tokens.clear();
        self.pending_byte = None;
        self.next_generation();
    }

    pub fn clear_interrupted(&mut self) {
        self.interrupted = false;
    }

    /// Align an incoming audio chunk to an even byte length, carrying an odd
    /// trailing byte into the next chunk. Returns the bytes safe to emit now.
    pub fn align_audio(&mut self, chunk: Vec<u8>) -> Vec<u8> {
        let mut data = match self.pending_byte.take() {
            Some(byte) => {
                let mut joined = Vec::with_capacity(chunk.len() + 1);
                joined.push(byte);
                joined.extend_from_slice(&chunk);
                joined
            }
            None => chunk,
        };

        if data.len() % 2 != 0 {
            self.pending_byte = data.pop();
        }
        data
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_requires_open_session_with_real_text() {
        let mut state = SessionState::new();
        assert!(!state.begin_flush());

        state.begin_connect();
        state.session_opened();
        // Init handshake only, no real text yet.
        assert!(!state.begin_flush());

        state.note_real_text();
        assert!(state.begin_flush());
        assert!(state.end_marker_sent());
        assert_eq!(state.phase(), SessionPhase::Flushing);
    }

    #[test]
    fn test_generation_invalidates_on_interrupt_and_close() {
        let mut state = SessionState::new();
        let gen = state.begin_connect();
        state.session_opened();

        state.mark_interrupted();
        assert!(state.is_interrupted());
        assert_ne!(state.generation(), gen);

        let gen = state.generation();
        state.close();
        assert_ne!(state.generation(), gen);
    }

    #[test]
    fn test_interrupt_discards_queued_tokens() {
        let mut state = SessionState::new();
        state.queue_token("hello".to_string());
        state.queue_token("world".to_string());
        state.mark_interrupted();
        assert!(state.drain_queued().is_empty());
    }

    #[test]
    fn test_audio_alignment_carries_odd_byte() {
        let mut state = SessionState::new();

        let out = state.align_audio(vec![1, 2, 3]);
        assert_eq!(out, vec![1, 2]);

        // The carried byte leads the next chunk.
        let out = state.align_audio(vec![4, 5]);
        assert_eq!(out, vec![3, 4]);

        // Still one byte pending; an even chunk drains it plus all but one.
        let out = state.align_audio(vec![6]);
        assert_eq!(out, vec![5, 6]);

        let out = state.align_audio(vec![7, 8]);
        assert_eq!(out, vec![7, 8]);
    }

    #[test]
    fn test_connect_resets_session_flags() {
        let mut state = SessionState::new();
        state.begin_connect();
        state.session_opened();
        state.note_real_text();
        assert!(state.begin_flush());
        state.close();

        state.begin_connect();
        assert!(!state.real_text_sent());
        assert!(!state.end_marker_sent());
        assert_eq!(state.phase(), SessionPhase::Connecting);
    }
}
