pub mod controller;
pub mod ffmpeg;

pub use controller::{RecorderController, StartedRecording, StoppedRecording, ToggleOutcome};
