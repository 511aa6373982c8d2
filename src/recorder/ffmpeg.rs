//! ffmpeg grab command construction for region recordings.

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use std::path::Path;
use tokio::process::Command;

use crate::inspector::RecordRegion;

pub const DEFAULT_FPS: u32 = 30;

/// Longest sanitized title carried into a recording filename.
const MAX_TITLE_LEN: usize = 60;

/// Rounds the region down to even dimensions; yuv420p output cannot encode
/// odd sizes.
pub fn even_region(region: RecordRegion) -> RecordRegion {
    RecordRegion {
        width: region.width - region.width % 2,
        height: region.height - region.height % 2,
        ..region
    }
}

pub fn validate_region(region: &RecordRegion) -> Result<()> {
    if region.width <= 0 || region.height <= 0 {
        bail!(
            "recording region {}x{} has no area",
            region.width,
            region.height
        );
    }
    Ok(())
}

/// `<title>_<YYYYMMDD_HHMMSS>.mp4`, with the title reduced to a conservative
/// character set.
pub fn recording_filename(title: Option<&str>, when: NaiveDateTime) -> String {
    let raw = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or("yt_clip");

    let mut safe = String::with_capacity(raw.len().min(MAX_TITLE_LEN));
    for ch in raw.chars() {
        if safe.len() >= MAX_TITLE_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '#') {
            safe.push(ch);
        } else {
            safe.push('_');
        }
    }

    format!("{safe}_{}.mp4", when.format("%Y%m%d_%H%M%S"))
}

/// The grab command for the current platform.
pub fn grab_command(region: &RecordRegion, fps: u32, output: &Path) -> Result<Command> {
    let args = grab_args(region, fps, output)?;
    let mut command = Command::new("ffmpeg");
    command.args(&args);
    Ok(command)
}

pub fn grab_args(region: &RecordRegion, fps: u32, output: &Path) -> Result<Vec<String>> {
    #[cfg(target_os = "windows")]
    {
        Ok(windows_args(region, fps, output))
    }

    #[cfg(target_os = "linux")]
    {
        let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string());
        Ok(linux_args(region, fps, output, &display))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(macos_args(fps, output))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        let _ = (region, fps, output);
        bail!("no screen grab backend for this platform");
    }
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn windows_args(region: &RecordRegion, fps: u32, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    push_all(&mut args, &["-f", "gdigrab", "-framerate"]);
    args.push(fps.to_string());
    push_all(&mut args, &["-offset_x"]);
    args.push(region.x.to_string());
    push_all(&mut args, &["-offset_y"]);
    args.push(region.y.to_string());
    push_all(&mut args, &["-video_size"]);
    args.push(format!("{}x{}", region.width, region.height));
    // System audio rides along via the dshow loopback device.
    push_all(&mut args, &["-i", "desktop", "-f", "dshow", "-i", "audio=virtual-audio-capturer"]);
    push_all(&mut args, ENCODE_ARGS);
    push_all(&mut args, &["-c:a", "aac", "-b:a", "160k", "-y"]);
    args.push(output.to_string_lossy().into_owned());
    args
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn linux_args(region: &RecordRegion, fps: u32, output: &Path, display: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    push_all(&mut args, &["-f", "x11grab", "-framerate"]);
    args.push(fps.to_string());
    push_all(&mut args, &["-video_size"]);
    args.push(format!("{}x{}", region.width, region.height));
    push_all(&mut args, &["-i"]);
    args.push(format!("{display}+{},{}", region.x, region.y));
    push_all(&mut args, ENCODE_ARGS);
    push_all(&mut args, &["-y"]);
    args.push(output.to_string_lossy().into_owned());
    args
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn macos_args(fps: u32, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    push_all(&mut args, &["-f", "avfoundation", "-framerate"]);
    args.push(fps.to_string());
    push_all(&mut args, &["-i", "1:none"]);
    push_all(&mut args, ENCODE_ARGS);
    push_all(&mut args, &["-y"]);
    args.push(output.to_string_lossy().into_owned());
    args
}

const ENCODE_ARGS: &[&str] = &[
    "-c:v", "libx264", "-preset", "fast", "-crf", "16", "-pix_fmt", "yuv420p",
];

fn push_all(args: &mut Vec<String>, fixed: &[&str]) {
    args.extend(fixed.iter().map(|s| s.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn region() -> RecordRegion {
        RecordRegion {
            x: 120,
            y: 230,
            width: 1280,
            height: 720,
        }
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap()
    }

    #[test]
    fn odd_dimensions_round_down() {
        let even = even_region(RecordRegion {
            x: 1,
            y: 2,
            width: 1281,
            height: 719,
        });
        assert_eq!(even.width, 1280);
        assert_eq!(even.height, 718);
        assert_eq!(even.x, 1);
        assert_eq!(even.y, 2);
    }

    #[test]
    fn empty_regions_are_rejected() {
        assert!(validate_region(&RecordRegion { x: 0, y: 0, width: 0, height: 720 }).is_err());
        assert!(validate_region(&RecordRegion { x: 0, y: 0, width: 1280, height: -2 }).is_err());
        assert!(validate_region(&region()).is_ok());

        // A 1x1 request rounds down to nothing.
        let tiny = even_region(RecordRegion { x: 0, y: 0, width: 1, height: 1 });
        assert!(validate_region(&tiny).is_err());
    }

    #[test]
    fn recording_filename_sanitizes_title() {
        let name = recording_filename(Some("Clip: part #2 / final"), at());
        assert_eq!(name, "Clip__part_#2___final_20250307_140509.mp4");

        let name = recording_filename(None, at());
        assert_eq!(name, "yt_clip_20250307_140509.mp4");

        let name = recording_filename(Some("   "), at());
        assert_eq!(name, "yt_clip_20250307_140509.mp4");
    }

    #[test]
    fn linux_grab_places_region_in_input() {
        let args = linux_args(&region(), 30, &PathBuf::from("/tmp/out.mp4"), ":1.0");
        assert!(args.contains(&"x11grab".to_string()));
        assert!(args.contains(&"1280x720".to_string()));
        assert!(args.contains(&":1.0+120,230".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn windows_grab_uses_offsets() {
        let args = windows_args(&region(), 24, &PathBuf::from("out.mp4"));
        assert!(args.contains(&"gdigrab".to_string()));
        let offset_x = args.iter().position(|a| a == "-offset_x").unwrap();
        assert_eq!(args[offset_x + 1], "120");
        assert!(args.contains(&"24".to_string()));
    }

    #[test]
    fn macos_grab_records_display() {
        let args = macos_args(30, &PathBuf::from("out.mp4"));
        assert!(args.contains(&"avfoundation".to_string()));
        assert!(args.contains(&"1:none".to_string()));
    }
}
