pub mod frame;
pub mod page;
pub mod probe;
pub mod watcher;

pub use frame::{FrameRequest, OutputFormat, RasterFrame};
pub use page::{Delivery, FrameSource, PageSession};
pub use probe::{PageMeasurements, Rect, RecordRegion, VideoInfo};
pub use watcher::{NavigationWatcher, WatcherStatus};

/// Host pattern identifying tabs this daemon is willing to capture from.
pub const HOST_PATTERN: &str = "youtube.com";

/// Pages on which a video rectangle is expected to become available.
pub const WATCH_PATTERN: &str = "youtube.com/watch";
