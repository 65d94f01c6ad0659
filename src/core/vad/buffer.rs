//! Energy-based voice activity buffering.
//!
//! Groups a continuous raw PCM byte stream into discrete utterances. Frames
//! are fixed-size sample windows; a frame is "speech" when its mean absolute
//! sample magnitude exceeds the energy threshold.
//!
//! # State Transitions
//!
//! ```text
//! [Silence] ── N consecutive speech frames ──► [Speaking]
//!     │              (run < N resets on any quiet frame)
//!     ▲
//!     └── M consecutive quiet frames ◄── [Speaking]
//!              (utterance emitted, hangover frames included)
//! ```
//!
//! The utterance spans from the first frame of the confirming run through the
//! full hangover window, so plosive onsets and natural trailing audio are
//! preserved for the transcriber.

use tracing::debug;

/// Configuration for the voice activity buffer.
#[derive(Debug, Clone, Copy)]
pub struct VADConfig {
    /// Sample rate of the incoming PCM in Hz.
    pub sample_rate: u32,

    /// Samples per analysis frame. 512 samples is 32 ms at 16 kHz.
    pub frame_samples: usize,

    /// Mean absolute sample magnitude above which a frame counts as speech.
    pub energy_threshold: f32,

    /// Consecutive speech frames required to confirm an utterance. Debounces
    /// transient noise; a single quiet frame resets the run.
    pub min_speech_frames: usize,

    /// Consecutive quiet frames after confirmed speech that end the
    /// utterance. The hangover frames are retained in the utterance.
    pub silence_frames: usize,
}

impl Default for VADConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_samples: 512,
            energy_threshold: 300.0,
            min_speech_frames: 3,
            silence_frames: 15,
        }
    }
}

impl VADConfig {
    /// Bytes per analysis frame (16-bit samples).
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * 2
    }
}

/// Groups raw PCM bytes into discrete utterances.
///
/// Not thread-safe by itself; callers wrap it in a lock when shared.
pub struct VoiceActivityBuffer {
    config: VADConfig,
    /// Bytes not yet aligned to a full frame. Never dropped.
    carry: Vec<u8>,
    /// Above-threshold frames seen while still unconfirmed.
    pending_run: Vec<u8>,
    pending_frames: usize,
    /// Bytes of the confirmed in-progress utterance.
    active: Vec<u8>,
    speaking: bool,
    silence_run: usize,
}

/// Interpret a little-endian byte slice as 16-bit samples.
fn bytes_to_samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Mean absolute sample magnitude of one frame.
fn frame_energy(frame: &[u8]) -> f32 {
    let count = frame.len() / 2;
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = bytes_to_samples(frame)
        .map(|sample| (sample as f64).abs())
        .sum();
    (sum / count as f64) as f32
}

impl VoiceActivityBuffer {
    pub fn new(config: VADConfig) -> Self {
        Self {
            config,
            carry: Vec::new(),
            pending_run: Vec::new(),
            pending_frames: 0,
            active: Vec::new(),
            speaking: false,
            silence_run: 0,
        }
    }

    pub fn config(&self) -> &VADConfig {
        &self.config
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed raw PCM bytes. Returns every utterance completed by this input,
    /// in order. Splitting the same bytes across arbitrarily many calls
    /// yields the identical utterance sequence.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.carry.extend_from_slice(bytes);

        let frame_bytes = self.config.frame_bytes();
        let mut emitted = Vec::new();

        while self.carry.len() >= frame_bytes {
            let frame: Vec<u8> = self.carry.drain(..frame_bytes).collect();
            if let Some(utterance) = self.process_frame(frame) {
                emitted.push(utterance);
            }
        }

        emitted
    }

    fn process_frame(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        let is_speech = frame_energy(&frame) > self.config.energy_threshold;

        if !self.speaking {
            if is_speech {
                self.pending_run.extend_from_slice(&frame);
                self.pending_frames += 1;
                if self.pending_frames >= self.config.min_speech_frames {
                    debug!(
                        frames = self.pending_frames,
                        "Speech confirmed, utterance started"
                    );
                    self.speaking = true;
                    self.silence_run = 0;
                    self.active = std::mem::take(&mut self.pending_run);
                    self.pending_frames = 0;
                }
            } else {
                // A quiet frame breaks the run; sub-threshold audio never
                // starts an utterance.
                self.pending_run.clear();
                self.pending_frames = 0;
            }
            return None;
        }

        self.active.extend_from_slice(&frame);

        if is_speech {
            self.silence_run = 0;
            return None;
        }

        self.silence_run += 1;
        if self.silence_run >= self.config.silence_frames {
            debug!(
                bytes = self.active.len(),
                "Trailing silence reached, emitting utterance"
            );
            self.speaking = false;
            self.silence_run = 0;
            return Some(std::mem::take(&mut self.active));
        }

        None
    }

    /// Teardown: emit the in-progress utterance instead of discarding it.
    /// Unconfirmed pending audio is dropped; leftover unaligned bytes of an
    /// active utterance are kept with it.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.pending_run.clear();
        self.pending_frames = 0;

        if !self.speaking {
            self.carry.clear();
            return None;
        }

        self.speaking = false;
        self.silence_run = 0;
        let mut utterance = std::mem::take(&mut self.active);
        utterance.append(&mut self.carry);
        Some(utterance)
    }
}
