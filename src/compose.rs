//! Reply composition: subject normalization and the RFC 822 raw reply
//! handed to `drafts.create`.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::EmailMessage;

static REPLY_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:\s*re\s*:\s*)+").expect("valid reply marker regex"));

/// Strip any leading reply markers and trim
pub fn strip_reply_markers(subject: &str) -> String {
    REPLY_MARKERS.replace(subject, "").trim().to_string()
}

/// Reply subject with exactly one leading `Re: `
///
/// Idempotent: normalizing an already normalized subject returns it unchanged.
pub fn normalize_subject(subject: &str) -> String {
    format!("Re: {}", strip_reply_markers(subject))
}

// Header values must stay on one line
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

// UTF-8 bytes per encoded word, keeping each word within 75 characters
const ENCODED_WORD_BYTES: usize = 45;

/// RFC 2047 `B` encoding for non-ASCII header text
///
/// ASCII text is returned as is. Long text is split on character
/// boundaries into several encoded words joined by folding whitespace.
pub fn encode_header_text(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(std::mem::take(&mut chunk));
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(chunk);
    }

    words
        .iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Build the RFC 822 reply with CRLF line endings
pub fn build_reply(original: &EmailMessage, body: &str) -> String {
    let message_id = format!("<{}>", header_value(&original.message_id_header));
    let lines = [
        format!("In-Reply-To: {}", message_id),
        format!("References: {}", message_id),
        format!("To: {}", header_value(&original.sender)),
        format!(
            "Subject: {}",
            encode_header_text(&header_value(&normalize_subject(&original.subject)))
        ),
        "Content-Type: text/plain; charset=\"utf-8\"".to_string(),
        String::new(),
        body.replace("\r\n", "\n").replace('\n', "\r\n"),
    ];
    lines.join("\r\n")
}

/// URL-safe base64 without padding, as Gmail expects for `raw`
pub fn encode_raw(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}
