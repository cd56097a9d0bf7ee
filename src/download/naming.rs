//! On-disk naming for downloaded media.
//!
//! Names follow `{date}_{id}_{channel}_{original}.{ext}` and are
//! sanitised for the target filesystem: no path separators, no control
//! characters, no reserved device names, bounded length, never empty.

use crate::client::{MediaKind, Message};

/// Longest file stem kept after sanitisation. Leaves headroom for the
/// extension under common 255-byte name limits.
const MAX_STEM_CHARS: usize = 180;

/// Windows reserved device names (case-insensitive, extension or not).
const RESERVED: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Build the on-disk file name for one message's media.
pub fn file_name_for(message: &Message) -> String {
    let date = message.date.format("%Y%m%d");
    let channel = sanitize(message.channel.display_name());
    let original = message
        .file_name
        .as_deref()
        .map(sanitize)
        .filter(|s| s != "file");

    let stem = match original {
        Some(original) => format!("{date}_{}_{channel}_{original}", message.id),
        None => format!("{date}_{}_{channel}", message.id),
    };

    // Split a trailing extension back out if the original carried one;
    // otherwise derive one from the media kind.
    match stem.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(char::is_alphanumeric) => {
            stem
        }
        _ => format!("{stem}.{}", default_extension(message.kind)),
    }
}

fn default_extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "jpg",
        MediaKind::Video | MediaKind::VideoNote => "mp4",
        MediaKind::Audio => "mp3",
        MediaKind::Voice => "ogg",
        MediaKind::Animation => "gif",
        MediaKind::Document | MediaKind::None => "bin",
    }
}

/// Sanitise one name component.
///
/// Strips path separators, control characters and characters the
/// common filesystems reject, collapses the result, renames reserved
/// device names and truncates to a safe length. Never returns an empty
/// string.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    out = out.trim_matches(|c: char| c.is_whitespace() || c == '.').to_string();

    if out.chars().count() > MAX_STEM_CHARS {
        out = out.chars().take(MAX_STEM_CHARS).collect();
    }

    let stem = out.split('.').next().unwrap_or("");
    if RESERVED.iter().any(|r| stem.eq_ignore_ascii_case(r)) {
        out = format!("_{out}");
    }

    if out.is_empty() {
        out = "file".to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChannelRef;
    use chrono::{TimeZone, Utc};

    fn message_named(file_name: Option<&str>, kind: MediaKind) -> Message {
        Message {
            channel: ChannelRef::new("@src"),
            id: 101,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            text: None,
            caption: None,
            group_id: None,
            kind,
            size: 1,
            file_name: file_name.map(str::to_string),
        }
    }

    #[test]
    fn pattern_includes_date_id_channel_and_original() {
        let name = file_name_for(&message_named(Some("report.pdf"), MediaKind::Document));
        assert_eq!(name, "20240501_101_src_report.pdf");
    }

    #[test]
    fn missing_original_falls_back_to_kind_extension() {
        let name = file_name_for(&message_named(None, MediaKind::Photo));
        assert_eq!(name, "20240501_101_src.jpg");
    }

    #[test]
    fn separators_are_stripped() {
        let name = sanitize("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
        assert!(!name.is_empty());
    }

    #[test]
    fn control_characters_are_stripped() {
        let name = sanitize("a\x00b\x1fc\nd");
        assert!(name.chars().all(|c| !c.is_control()));
    }

    #[test]
    fn reserved_names_are_renamed() {
        assert_ne!(sanitize("CON").to_uppercase(), "CON");
        assert_ne!(sanitize("con.txt").split('.').next().unwrap().to_uppercase(), "CON");
        assert_ne!(sanitize("lpt1").to_uppercase(), "LPT1");
    }

    #[test]
    fn never_empty() {
        assert!(!sanitize("").is_empty());
        assert!(!sanitize("...").is_empty());
        assert!(!sanitize("///").is_empty());
        assert!(!sanitize("\u{0}\u{1}").is_empty());
    }

    #[test]
    fn long_names_truncate() {
        let name = sanitize(&"x".repeat(1000));
        assert!(name.chars().count() <= MAX_STEM_CHARS);
    }

    #[test]
    fn arbitrary_unicode_survives() {
        for raw in ["файл.mp4", "图片🙂", "a\u{202e}b", "mixed/含\\路:径"] {
            let name = sanitize(raw);
            assert!(!name.is_empty());
            assert!(!name.contains('/') && !name.contains('\\'));
            assert!(name.chars().all(|c| !c.is_control()));
        }
    }
}
