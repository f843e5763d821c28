//! Turns output records into bounded text for callers that cannot render media.

use crate::model::OutputRecord;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const PLAIN_TEXT: &str = "text/plain";

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("regex"));
static TRUNCATED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(?P<body>.*)\n\.\.\. \[truncated \d+ characters\]$").expect("regex")
});

/// Renders and bounds every record independently.
pub fn normalize_outputs(outputs: &[OutputRecord], max_chars: usize) -> Vec<String> {
    outputs
        .iter()
        .map(|record| truncate_output(&render_output(record), max_chars))
        .collect()
}

pub fn render_output(record: &OutputRecord) -> String {
    match record {
        OutputRecord::Stream { text, .. } => text.clone(),
        OutputRecord::Error {
            name,
            message,
            traceback,
        } => {
            let mut out = format!("{name}: {message}");
            if !traceback.is_empty() {
                out.push('\n');
                out.push_str(&strip_ansi(&traceback.join("\n")));
            }
            out
        }
        OutputRecord::Rich { data, .. } => {
            if let Some(Value::String(text)) = data.get(PLAIN_TEXT) {
                return text.clone();
            }
            let placeholders: Vec<String> = data
                .iter()
                .map(|(mime, value)| placeholder(mime, value))
                .collect();
            if placeholders.is_empty() {
                "[empty output]".to_string()
            } else {
                placeholders.join(" ")
            }
        }
    }
}

/// Cuts `text` to `max_chars` characters and appends a marker with the omitted count.
///
/// A string this function already produced for the same limit comes back unchanged.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    if let Some(caps) = TRUNCATED_RE.captures(text)
        && caps["body"].chars().count() <= max_chars
    {
        return text.to_string();
    }

    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n... [truncated {} characters]", total - max_chars)
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

fn placeholder(mime: &str, value: &Value) -> String {
    if mime.starts_with("image/")
        && let Value::String(encoded) = value
    {
        let compact: String = encoded.split_whitespace().collect();
        if let Ok(bytes) = STANDARD.decode(compact.as_bytes()) {
            return format!("[{mime} output, {} bytes]", bytes.len());
        }
    }
    format!("[{mime} output]")
}
