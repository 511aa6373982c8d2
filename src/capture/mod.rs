pub mod crop;
pub mod delivery;
pub mod filename;
pub mod orchestrator;

pub use delivery::{DeliverySink, DownloadsDir};
pub use orchestrator::{CaptureMode, CaptureOrchestrator, CaptureOutcome};
