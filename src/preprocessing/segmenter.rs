use crate::domain::entities::{Script, Segment};
use crate::domain::errors::{NarrationError, Result};
use regex::Regex;
use std::sync::LazyLock;

static BREAK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<break\s+time\s*=\s*(?:"([^"]*)"|'([^']*)')\s*/>"#)
        .expect("break marker pattern is valid")
});

/// Longest pause a single break marker may ask for.
pub const MAX_PAUSE_SECONDS: f64 = 3600.0;

/// A piece of the source text: either prose or a break marker with its raw duration.
#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Break {
        marker: &'a str,
        value: &'a str,
        offset: usize,
    },
}

/// Splits `text` on break markers, keeping the markers as their own tokens.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    for caps in BREAK_MARKER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > cursor {
            tokens.push(Token::Text(&text[cursor..whole.start()]));
        }
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        tokens.push(Token::Break {
            marker: whole.as_str(),
            value,
            offset: whole.start(),
        });
        cursor = whole.end();
    }
    if cursor < text.len() {
        tokens.push(Token::Text(&text[cursor..]));
    }

    tokens
}

/// Parses a break duration in seconds. Accepts a bare number (seconds) or an
/// SSML-style `s` / `ms` suffix.
fn parse_duration(value: &str) -> std::result::Result<f64, String> {
    let value = value.trim();
    let (number, scale) = if let Some(ms) = value.strip_suffix("ms") {
        (ms.trim_end(), 1e-3)
    } else if let Some(s) = value.strip_suffix('s') {
        (s.trim_end(), 1.0)
    } else {
        (value, 1.0)
    };

    let parsed: f64 = number
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", value))?;
    if !parsed.is_finite() {
        return Err(format!("`{}` is not a finite duration", value));
    }
    if parsed < 0.0 {
        return Err(format!("duration `{}` is negative", value));
    }
    let seconds = parsed * scale;
    if seconds > MAX_PAUSE_SECONDS {
        return Err(format!(
            "duration `{}` exceeds the {}s limit",
            value, MAX_PAUSE_SECONDS
        ));
    }
    Ok(seconds)
}

/// Parses break-annotated prose into an ordered [`Script`].
///
/// Text between markers becomes trimmed [`Segment::Speech`]; each marker
/// becomes its own [`Segment::Pause`]. Whitespace-only stretches are dropped.
pub fn parse_script(text: &str) -> Result<Script> {
    let mut segments = Vec::new();

    for token in tokenize(text) {
        match token {
            Token::Text(chunk) => {
                let trimmed = chunk.trim();
                if !trimmed.is_empty() {
                    segments.push(Segment::speech(trimmed));
                }
            }
            Token::Break {
                marker,
                value,
                offset,
            } => {
                let seconds = parse_duration(value).map_err(|reason| NarrationError::Parse {
                    marker: marker.to_string(),
                    offset,
                    reason,
                })?;
                segments.push(Segment::pause(seconds));
            }
        }
    }

    if segments.is_empty() {
        return Err(NarrationError::EmptyScript);
    }
    Ok(Script::from_segments(segments))
}
