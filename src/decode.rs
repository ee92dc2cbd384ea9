//! Downstream text decoding for captured bodies.
//!
//! The parsers store body octets exactly as received; the keyword stage
//! wants readable text. These helpers cover the common transport seen in
//! the field: a `text/plain` part, Base64 transfer encoding, and a charset
//! label that needs converting to UTF-8. Nothing here is invoked by the
//! parsers themselves.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use encoding_rs::Encoding;
use thiserror::Error;

use crate::message::Email;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 in body text: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unknown charset label `{0}`")]
    UnknownCharset(String),
}

/// Decodes the body of `email` when its headers declare `text/plain`.
///
/// Returns `Ok(None)` when the email carries no text or no `text/plain`
/// content type. Otherwise the text is Base64-decoded (tolerating embedded
/// CRLF line breaks) and converted from the declared charset to UTF-8;
/// without a charset label the decoded octets are taken as UTF-8 (lossy).
pub fn text_plain(email: &Email) -> Result<Option<String>, DecodeError> {
    if email.body.text.is_empty() {
        return Ok(None);
    }

    let Some(content_type) = email.body.header.optional_first("Content-Type") else {
        return Ok(None);
    };
    if !content_type.to_ascii_lowercase().contains("text/plain") {
        return Ok(None);
    }

    let stripped: Vec<u8> = email
        .body
        .text
        .iter()
        .copied()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let octets = BASE64.decode(stripped)?;

    match charset_label(content_type) {
        None => Ok(Some(String::from_utf8_lossy(&octets).into_owned())),
        Some(label) => {
            let encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| DecodeError::UnknownCharset(label.clone()))?;
            let (text, _, _) = encoding.decode(&octets);
            Ok(Some(text.into_owned()))
        }
    }
}

/// Pulls the charset label out of a `Content-Type` value, tolerating both
/// `charset="x"` and the spaced `charset = "x"` spelling, with or without
/// quotes.
fn charset_label(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let start = lower.find("charset")? + "charset".len();
    let rest = lower[start..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();

    let label: String = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.chars().take_while(|&c| c != '"').collect()
    } else {
        rest.chars()
            .take_while(|c| !c.is_whitespace() && *c != ';')
            .collect()
    };

    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}
