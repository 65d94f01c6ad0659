pub mod composer;
pub mod coordinator;
pub mod manager;

pub use composer::{Seam, Stage, StageComposer};
pub use coordinator::BargeInCoordinator;
pub use manager::{PipelineConfig, VoicePipeline};
