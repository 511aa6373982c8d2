//! Direct in-page rasterization of the video element.
//!
//! The drawing surface is sized at twice the video's intrinsic (or rendered)
//! resolution, clamped so neither dimension exceeds [`MAX_SURFACE_PX`], with
//! the aspect ratio preserved by a uniform scale-down. The page-side script
//! waits for decode readiness before drawing, bounded by
//! [`READINESS_TIMEOUT_MS`], and always replies with a tagged record instead
//! of throwing across the transport.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::probe::{VideoInfo, PICK_VIDEO_JS};

pub const FRAME_SCALE: f64 = 2.0;
pub const MAX_SURFACE_PX: f64 = 4096.0;
pub const READINESS_TIMEOUT_MS: u64 = 4000;
pub const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    /// Encoder quality in the 0..1 range the canvas API expects; lossless
    /// formats take none.
    pub fn canvas_quality(&self) -> Option<f64> {
        match self {
            OutputFormat::Jpeg => Some(f64::from(JPEG_QUALITY) / 100.0),
            OutputFormat::Png => None,
        }
    }
}

/// Parameters for one rasterization round-trip.
#[derive(Debug, Clone, Copy)]
pub struct FrameRequest {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

/// A decoded frame as it came back from the page.
#[derive(Debug, Clone)]
pub struct RasterFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Drawing-surface dimensions for a source of the given size, or `None` when
/// the source reports zero resolution.
pub fn surface_size(source_width: f64, source_height: f64) -> Option<(u32, u32)> {
    if source_width <= 0.0 || source_height <= 0.0 {
        return None;
    }

    let mut width = source_width * FRAME_SCALE;
    let mut height = source_height * FRAME_SCALE;

    let largest = width.max(height);
    if largest > MAX_SURFACE_PX {
        let scale = MAX_SURFACE_PX / largest;
        width *= scale;
        height *= scale;
    }

    Some(((width.round() as u32).max(1), (height.round() as u32).max(1)))
}

/// Surface size for a probed video: intrinsic resolution when the element
/// reports one, the rendered rectangle otherwise.
pub fn capture_surface(info: &VideoInfo) -> Option<(u32, u32)> {
    if info.video_width > 0 && info.video_height > 0 {
        surface_size(f64::from(info.video_width), f64::from(info.video_height))
    } else {
        surface_size(info.rect.width, info.rect.height)
    }
}

/// Builds the asynchronous rasterization script. Arguments, in order: target
/// width, target height, mime type, canvas quality, readiness timeout in ms.
pub(crate) fn rasterize_script() -> String {
    format!(
        r#"var targetW = arguments[0];
var targetH = arguments[1];
var mime = arguments[2];
var quality = arguments[3];
var timeoutMs = arguments[4];
var done = arguments[arguments.length - 1];
{PICK_VIDEO_JS}
var video = pickVideo();
if (!video) {{ done({{ ok: false, error: "no video element found" }}); return; }}
var finished = false;
function finish() {{
  if (finished) return;
  finished = true;
  try {{
    var w = video.videoWidth || video.getBoundingClientRect().width;
    var h = video.videoHeight || video.getBoundingClientRect().height;
    if (!w || !h) {{ done({{ ok: false, error: "video has zero resolution" }}); return; }}
    var canvas = document.createElement("canvas");
    canvas.width = targetW;
    canvas.height = targetH;
    var ctx = canvas.getContext("2d");
    if (!ctx) {{ done({{ ok: false, error: "2d drawing surface unavailable" }}); return; }}
    ctx.drawImage(video, 0, 0, targetW, targetH);
    var dataUrl;
    try {{
      dataUrl = quality != null ? canvas.toDataURL(mime, quality) : canvas.toDataURL(mime);
    }} catch (e) {{
      dataUrl = canvas.toDataURL("image/png");
    }}
    done({{ ok: true, data_url: dataUrl, width: canvas.width, height: canvas.height }});
  }} catch (e) {{
    done({{ ok: false, error: String(e && e.message ? e.message : e) }});
  }}
}}
if (video.readyState >= 2 && (video.videoWidth > 0 || video.getBoundingClientRect().width > 0)) {{
  finish();
  return;
}}
video.addEventListener("loadedmetadata", finish, {{ once: true }});
video.addEventListener("loadeddata", finish, {{ once: true }});
video.addEventListener("resize", finish, {{ once: true }});
setTimeout(finish, timeoutMs);"#
    )
}

/// Decodes a `data:<mime>;base64,<payload>` URL into raw image bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let Some((header, payload)) = data_url.split_once(',') else {
        bail!("data URL missing payload separator");
    };
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        bail!("unexpected data URL header '{header}'");
    }

    BASE64
        .decode(payload.trim())
        .context("failed to decode data URL payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::probe::Rect;

    #[test]
    fn surface_doubles_small_sources() {
        assert_eq!(surface_size(640.0, 360.0), Some((1280, 720)));
        assert_eq!(surface_size(1.0, 1.0), Some((2, 2)));
    }

    #[test]
    fn surface_clamps_to_max_dimension() {
        // 1080p doubles cleanly without hitting the clamp.
        assert_eq!(surface_size(1920.0, 1080.0), Some((3840, 2160)));

        // 1440p doubled would be 5120 wide; 2880 scaled by 4096/5120 keeps 16:9.
        let (w, h) = surface_size(2560.0, 1440.0).unwrap();
        assert_eq!((w, h), (4096, 2304));
        assert!(w as f64 <= MAX_SURFACE_PX && (h as f64) <= MAX_SURFACE_PX);

        let (w, h) = surface_size(1440.0, 2560.0).unwrap();
        assert_eq!((w, h), (2304, 4096));
    }

    #[test]
    fn zero_resolution_has_no_surface() {
        assert_eq!(surface_size(0.0, 360.0), None);
        assert_eq!(surface_size(640.0, 0.0), None);
        assert_eq!(surface_size(-10.0, 10.0), None);
    }

    #[test]
    fn capture_surface_prefers_intrinsic_resolution() {
        let mut info = VideoInfo {
            rect: Rect {
                x: 0.0,
                y: 0.0,
                width: 640.0,
                height: 360.0,
            },
            title: None,
            host: String::new(),
            channel: String::new(),
            device_pixel_ratio: 1.0,
            video_width: 1280,
            video_height: 720,
        };
        assert_eq!(capture_surface(&info), Some((2560, 1440)));

        info.video_width = 0;
        info.video_height = 0;
        assert_eq!(capture_surface(&info), Some((1280, 720)));
    }

    #[test]
    fn data_url_roundtrip() {
        let bytes = b"not really a jpeg";
        let url = format!("data:image/jpeg;base64,{}", BASE64.encode(bytes));
        assert_eq!(decode_data_url(&url).unwrap(), bytes);

        assert!(decode_data_url("data:image/jpeg;base64").is_err());
        assert!(decode_data_url("plain,payload").is_err());
    }
}
