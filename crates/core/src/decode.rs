use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

const SCHEME_DELIMITER: &str = "://";

/// Decode base64 text into UTF-8, trying each alphabet in turn.
///
/// Whitespace is ignored, missing padding is tolerated and both the standard
/// and URL-safe alphabets are accepted. Returns `None` when no attempt yields
/// valid UTF-8.
pub fn decode_base64(raw: &str) -> Option<String> {
    let filtered: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if filtered.is_empty() {
        return None;
    }

    let padded = pad_base64(&filtered);
    let attempts = [
        STANDARD.decode(&padded),
        URL_SAFE.decode(&padded),
        URL_SAFE_NO_PAD.decode(filtered.trim_end_matches('=')),
    ];

    attempts
        .into_iter()
        .filter_map(Result::ok)
        .find_map(|bytes| String::from_utf8(bytes).ok())
}

pub(crate) fn pad_base64(input: &str) -> String {
    let mut padded = input.trim().to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

/// Expand one input line into the link candidates it carries.
///
/// Lines that already carry a scheme pass through untouched. Otherwise the
/// line is treated as base64: a decoded multi-line body is split into its
/// non-empty lines as long as one of them looks like a link, a decoded single
/// link is returned alone, and anything else falls back to the original line.
pub fn expand_line(line: &str) -> Vec<String> {
    if line.contains(SCHEME_DELIMITER) {
        return vec![line.to_string()];
    }

    let Some(decoded) = decode_base64(line) else {
        return vec![line.to_string()];
    };

    if decoded.contains('\n') {
        let lines: Vec<String> = split_lines(&decoded);
        if lines.iter().any(|l| l.contains(SCHEME_DELIMITER)) {
            return lines;
        }
    }

    let single = decoded.trim();
    if single.contains(SCHEME_DELIMITER) {
        return vec![single.to_string()];
    }

    vec![line.to_string()]
}

pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn looks_like_links(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && line.contains(SCHEME_DELIMITER))
}
