//! Page-side measurement and the geometry derived from it.
//!
//! The script below runs inside the target tab and reports raw DOM
//! measurements; everything derived from them (chrome-adjusted capture
//! rectangle, absolute screen region for the recorder) is computed here so
//! the math stays testable without a browser.

use serde::Deserialize;

/// Inward margin applied to the video rectangle on all sides, trimming
/// rounded player corners out of the crop.
pub const CHROME_INSET_PX: f64 = 12.0;

/// Axis-aligned rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Bounding box as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

/// Window placement metrics used to convert viewport coordinates into
/// absolute screen coordinates.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowMetrics {
    pub screen_x: f64,
    pub screen_y: f64,
    pub outer_width: f64,
    pub outer_height: f64,
    pub inner_width: f64,
    pub inner_height: f64,
}

/// One round-trip's worth of raw page state. Produced fresh on every query,
/// never cached.
#[derive(Debug, Clone, Deserialize)]
pub struct PageMeasurements {
    pub rect: RawRect,
    pub masthead_bottom: Option<f64>,
    pub device_pixel_ratio: f64,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub host: String,
    pub href: String,
    pub video_width: u32,
    pub video_height: u32,
    pub window: WindowMetrics,
}

/// Chrome-adjusted capture geometry plus the metadata that feeds filenames.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub rect: Rect,
    pub title: Option<String>,
    pub host: String,
    pub channel: String,
    pub device_pixel_ratio: f64,
    pub video_width: u32,
    pub video_height: u32,
}

/// Integer screen-space region handed to the recorder, already scaled to
/// device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRegion {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Shared element-selection snippet: the host's main-video class first, then
/// the largest rendered/intrinsic area, then plain document order.
pub(crate) const PICK_VIDEO_JS: &str = r#"
function pickVideo() {
  var main = document.querySelector("video.html5-main-video");
  if (main) return main;
  var all = Array.prototype.slice.call(document.querySelectorAll("video"));
  if (!all.length) return null;
  var best = null;
  var bestArea = 0;
  for (var i = 0; i < all.length; i++) {
    var r = all[i].getBoundingClientRect();
    var area = Math.max(r.width * r.height, (all[i].videoWidth || 0) * (all[i].videoHeight || 0));
    if (area > bestArea) { best = all[i]; bestArea = area; }
  }
  return best || all[0];
}
"#;

/// Builds the synchronous measurement script. Returns a tagged record; a
/// missing video element comes back as `{ok:false}` rather than a thrown
/// error.
pub(crate) fn measure_script() -> String {
    format!(
        r##"{PICK_VIDEO_JS}
var video = pickVideo();
if (!video) return {{ ok: false, error: "no video element found" }};
var rect = video.getBoundingClientRect();
var masthead = document.getElementById("masthead-container") || document.getElementById("masthead");
var mastheadBottom = masthead ? masthead.getBoundingClientRect().bottom : null;
var h1 = document.querySelector("h1.title yt-formatted-string")
  || document.querySelector("h1.title")
  || document.querySelector("h1#title");
var title = (h1 && h1.textContent ? h1.textContent : document.title || "").trim();
var channel = "";
var channelSelectors = ["#owner #text-container a", "#owner ytd-channel-name a", "ytd-channel-name a"];
for (var i = 0; i < channelSelectors.length; i++) {{
  var el = document.querySelector(channelSelectors[i]);
  if (el && el.textContent) {{ channel = el.textContent.trim(); break; }}
}}
return {{
  ok: true,
  rect: {{
    left: rect.left, top: rect.top, right: rect.right, bottom: rect.bottom,
    width: rect.width, height: rect.height
  }},
  masthead_bottom: mastheadBottom,
  device_pixel_ratio: window.devicePixelRatio || 1,
  title: title || null,
  channel: channel || null,
  host: window.location.host || "",
  href: window.location.href || "",
  video_width: video.videoWidth || 0,
  video_height: video.videoHeight || 0,
  window: {{
    screen_x: window.screenX || window.screenLeft || 0,
    screen_y: window.screenY || window.screenTop || 0,
    outer_width: window.outerWidth || window.innerWidth,
    outer_height: window.outerHeight || window.innerHeight,
    inner_width: window.innerWidth,
    inner_height: window.innerHeight
  }}
}};"##
    )
}

pub(crate) const LOCATION_SCRIPT: &str = r#"return window.location.href || "";"#;

/// Chrome-adjusted capture rectangle: when the page header overlaps the
/// video's top edge, the effective top is raised to the header's bottom, then
/// a fixed inward margin is applied with width/height clamped at zero.
pub fn video_rect(rect: &RawRect, masthead_bottom: Option<f64>) -> Rect {
    let mut top = rect.top;
    if let Some(bottom) = masthead_bottom {
        if bottom > top {
            top = bottom;
        }
    }

    let top = top + CHROME_INSET_PX;
    let bottom = rect.bottom - CHROME_INSET_PX;

    Rect {
        x: rect.left + CHROME_INSET_PX,
        y: top,
        width: (rect.width - CHROME_INSET_PX * 2.0).max(0.0),
        height: (bottom - top).max(0.0),
    }
}

pub fn video_info(m: &PageMeasurements) -> VideoInfo {
    VideoInfo {
        rect: video_rect(&m.rect, m.masthead_bottom),
        title: m.title.clone().filter(|t| !t.is_empty()),
        host: m.host.clone(),
        channel: m.channel.clone().unwrap_or_default(),
        device_pixel_ratio: if m.device_pixel_ratio > 0.0 {
            m.device_pixel_ratio
        } else {
            1.0
        },
        video_width: m.video_width,
        video_height: m.video_height,
    }
}

/// Absolute screen region of the raw (unadjusted) video rectangle in device
/// pixels. The window's frame border is estimated from the outer/inner size
/// difference, split evenly left/right with the remainder assumed to be the
/// title bar.
pub fn record_region(m: &PageMeasurements) -> RecordRegion {
    let win = &m.window;
    let dpr = if m.device_pixel_ratio > 0.0 {
        m.device_pixel_ratio
    } else {
        1.0
    };

    let border_x = ((win.outer_width - win.inner_width) / 2.0).max(0.0);
    let border_y = (win.outer_height - win.inner_height).max(0.0);

    RecordRegion {
        x: ((win.screen_x + border_x + m.rect.left) * dpr).round() as i64,
        y: ((win.screen_y + border_y + m.rect.top) * dpr).round() as i64,
        width: (m.rect.width * dpr).round() as i64,
        height: (m.rect.height * dpr).round() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(left: f64, top: f64, width: f64, height: f64) -> RawRect {
        RawRect {
            left,
            top,
            right: left + width,
            bottom: top + height,
            width,
            height,
        }
    }

    #[test]
    fn margin_applied_without_header_overlap() {
        let rect = video_rect(&raw(100.0, 80.0, 640.0, 360.0), Some(56.0));
        assert_eq!(rect.x, 112.0);
        assert_eq!(rect.y, 92.0);
        assert_eq!(rect.width, 616.0);
        assert_eq!(rect.height, 336.0);
    }

    #[test]
    fn header_overlap_raises_top() {
        let masthead_bottom = 150.0;
        let rect = video_rect(&raw(0.0, 100.0, 800.0, 450.0), Some(masthead_bottom));
        assert!(rect.y >= masthead_bottom);
        assert_eq!(rect.y, masthead_bottom + CHROME_INSET_PX);
        // Height shrinks by the overlap plus both margins.
        assert_eq!(rect.height, 550.0 - masthead_bottom - CHROME_INSET_PX * 2.0);
    }

    #[test]
    fn degenerate_rects_clamp_to_zero() {
        let rect = video_rect(&raw(10.0, 10.0, 10.0, 10.0), None);
        assert_eq!(rect.width, 0.0);
        assert_eq!(rect.height, 0.0);
        assert!(rect.is_empty());

        // Header entirely below the video.
        let rect = video_rect(&raw(0.0, 0.0, 300.0, 100.0), Some(500.0));
        assert_eq!(rect.height, 0.0);
    }

    #[test]
    fn record_region_scales_and_offsets() {
        let m = PageMeasurements {
            rect: raw(10.0, 20.0, 640.0, 360.0),
            masthead_bottom: None,
            device_pixel_ratio: 2.0,
            title: None,
            channel: None,
            host: "youtube.com".into(),
            href: "https://youtube.com/watch?v=x".into(),
            video_width: 1920,
            video_height: 1080,
            window: WindowMetrics {
                screen_x: 100.0,
                screen_y: 50.0,
                outer_width: 1300.0,
                outer_height: 900.0,
                inner_width: 1280.0,
                inner_height: 800.0,
            },
        };

        let region = record_region(&m);
        // border_x = (1300-1280)/2 = 10, border_y = 100
        assert_eq!(region.x, ((100.0 + 10.0 + 10.0) * 2.0) as i64);
        assert_eq!(region.y, ((50.0 + 100.0 + 20.0) * 2.0) as i64);
        assert_eq!(region.width, 1280);
        assert_eq!(region.height, 720);
    }

    #[test]
    fn video_info_defaults_missing_metadata() {
        let m = PageMeasurements {
            rect: raw(0.0, 0.0, 640.0, 360.0),
            masthead_bottom: None,
            device_pixel_ratio: 0.0,
            title: Some(String::new()),
            channel: None,
            host: "youtube.com".into(),
            href: "https://youtube.com/watch?v=x".into(),
            video_width: 0,
            video_height: 0,
            window: WindowMetrics {
                screen_x: 0.0,
                screen_y: 0.0,
                outer_width: 0.0,
                outer_height: 0.0,
                inner_width: 0.0,
                inner_height: 0.0,
            },
        };

        let info = video_info(&m);
        assert_eq!(info.title, None);
        assert_eq!(info.channel, "");
        assert_eq!(info.device_pixel_ratio, 1.0);
    }
}
