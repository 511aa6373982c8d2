//! Output naming for captured frames.

use chrono::NaiveDateTime;

/// Hard cap on each sanitized name component.
const MAX_COMPONENT_LEN: usize = 80;

const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replaces runs of filesystem-hostile characters and whitespace with single
/// underscores and truncates to [`MAX_COMPONENT_LEN`] characters. Idempotent:
/// sanitizing an already-sanitized string returns it unchanged.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_COMPONENT_LEN));
    let mut in_run = false;
    let mut len = 0;

    for ch in input.chars() {
        if len >= MAX_COMPONENT_LEN {
            break;
        }
        if FORBIDDEN.contains(&ch) || ch.is_whitespace() {
            if !in_run {
                out.push('_');
                in_run = true;
                len += 1;
            }
        } else {
            out.push(ch);
            in_run = false;
            len += 1;
        }
    }

    out
}

/// Builds `host__channel__title_YYYYMMDD_HHMMSS[_fNNN].<ext>`. Missing
/// metadata falls back to stable placeholders so a file is always nameable.
pub fn build_filename(
    title: Option<&str>,
    index: Option<u32>,
    host: &str,
    channel: &str,
    when: NaiveDateTime,
    extension: &str,
) -> String {
    let base_title = match title.filter(|t| !t.is_empty()) {
        Some(title) => sanitize(title),
        None => "youtube-video".to_string(),
    };
    let base_host = if host.is_empty() {
        "site".to_string()
    } else {
        sanitize(host)
    };
    let base_channel = if channel.is_empty() {
        "channel".to_string()
    } else {
        sanitize(channel)
    };

    let stamp = when.format("%Y%m%d_%H%M%S");
    let index_part = index
        .map(|i| format!("_f{i:03}"))
        .unwrap_or_default();

    format!("{base_host}__{base_channel}__{base_title}_{stamp}{index_part}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap()
    }

    #[test]
    fn sanitize_replaces_forbidden_runs() {
        assert_eq!(sanitize("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize("How to: cook // eat"), "How_to_cook_eat");
        assert_eq!(sanitize("  spaced\tout  "), "_spaced_out_");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let cases = [
            "plain",
            "a/b: c",
            "   ",
            "emoji 🎥 title / test",
            &"x".repeat(200),
        ];
        for case in cases {
            let once = sanitize(case);
            assert_eq!(sanitize(&once), once, "not idempotent for {case:?}");
        }
    }

    #[test]
    fn sanitize_truncates_and_stays_clean() {
        let long = "word ".repeat(50);
        let out = sanitize(&long);
        assert!(out.chars().count() <= 80);
        for ch in out.chars() {
            assert!(!FORBIDDEN.contains(&ch));
            assert!(!ch.is_whitespace());
        }
    }

    #[test]
    fn filename_with_all_metadata() {
        let name = build_filename(
            Some("Great Video: Part 2"),
            Some(3),
            "www.youtube.com",
            "Some Channel",
            at(),
            "jpg",
        );
        assert_eq!(
            name,
            "www.youtube.com__Some_Channel__Great_Video_Part_2_20250307_140509_f003.jpg"
        );
    }

    #[test]
    fn filename_defaults_for_missing_metadata() {
        let name = build_filename(None, None, "", "", at(), "jpg");
        assert_eq!(name, "site__channel__youtube-video_20250307_140509.jpg");

        let name = build_filename(Some(""), Some(12), "youtube.com", "", at(), "png");
        assert_eq!(name, "youtube.com__channel__youtube-video_20250307_140509_f012.png");
    }

    #[test]
    fn filename_index_is_zero_padded() {
        let name = build_filename(Some("t"), Some(7), "h", "c", at(), "jpg");
        assert!(name.ends_with("_f007.jpg"));
        let name = build_filename(Some("t"), Some(123), "h", "c", at(), "jpg");
        assert!(name.ends_with("_f123.jpg"));
    }
}
