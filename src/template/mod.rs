//! Caption templating: a pure renderer from `{name}` placeholders and
//! a flat variable map to the outgoing caption string.

use std::collections::HashMap;

use crate::client::Message;

/// Template applied when the caller does not supply one: original text
/// followed by the original caption.
pub const PASSTHROUGH_TEMPLATE: &str = "{original_text}{original_caption}";

/// Substitute `{name}` placeholders from `vars`.
///
/// Unknown placeholders reduce to empty; an unterminated brace is
/// emitted literally. `\n` escapes become newlines.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let template = template.replace("\\n", "\n");
    let mut out = String::with_capacity(template.len());
    let mut rest = template.as_str();

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open + 1..].find('}') {
            Some(close) => {
                let name = &rest[open + 1..open + 1 + close];
                if let Some(value) = vars.get(name.trim()) {
                    out.push_str(value);
                }
                rest = &rest[open + close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build the variable map for one source message.
pub fn variables_for(message: &Message) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert(
        "original_text".to_string(),
        message.text.clone().unwrap_or_default(),
    );
    vars.insert(
        "original_caption".to_string(),
        message.caption.clone().unwrap_or_default(),
    );
    vars.insert(
        "file_name".to_string(),
        message.file_name.clone().unwrap_or_default(),
    );
    vars.insert("file_size".to_string(), format_size(message.size));
    vars.insert(
        "channel_name".to_string(),
        message.channel.display_name().to_string(),
    );
    vars.insert("message_id".to_string(), message.id.to_string());
    vars.insert(
        "date".to_string(),
        message.date.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    vars
}

/// Human-readable size: `1.5 MB`, `320 KB`, `17 B`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Truncate a caption to `cap` characters at a word boundary.
///
/// Returns the (possibly shortened) caption and whether truncation
/// happened, so the report can flag it.
pub fn truncate_caption(caption: &str, cap: usize) -> (String, bool) {
    if caption.chars().count() <= cap {
        return (caption.to_string(), false);
    }

    let hard: String = caption.chars().take(cap).collect();
    let cut = match hard.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => hard[..pos].trim_end().to_string(),
        _ => hard,
    };
    (cut, true)
}

/// Short single-line preview of a rendered caption for logging.
pub fn preview(caption: &str) -> String {
    let single_line = caption.replace('\n', " ");
    let mut chars = single_line.chars();
    let head: String = chars.by_ref().take(64).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
