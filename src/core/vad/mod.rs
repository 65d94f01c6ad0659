pub mod buffer;

pub use buffer::{VADConfig, VoiceActivityBuffer};
