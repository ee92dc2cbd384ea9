//! Header and body extraction from FETCH literal payloads.

use log::warn;
use memchr::memmem;

use crate::{message::Body, utils::escape_bytes};

/// Splits a header+body octet blob into `body`.
///
/// With `has_header`, CRLF-separated header lines are consumed from the
/// front: each field is cut at the first `:`, lines starting with SP/HTAB
/// fold into the previous value joined by a single space, and both name
/// and value are trimmed. The header section ends at an empty line or when
/// the input runs out. With `has_text`, whatever follows the header
/// section is stored verbatim as the body text.
///
/// A header line without a colon stops header parsing; what was already
/// classified is kept and the rest of the blob is abandoned.
pub fn resolve_imap_body(blob: &[u8], body: &mut Body, has_header: bool, has_text: bool) {
    let mut rest = blob;

    if has_header {
        loop {
            let Some(line_end) = memmem::find(rest, b"\r\n") else {
                // Header section runs to the end of the blob.
                if !rest.is_empty() && !consume_field(&mut rest, body) {
                    return;
                }
                rest = b"";
                break;
            };

            if line_end == 0 {
                // Empty line: end of the header section.
                rest = &rest[2..];
                break;
            }

            if !consume_field(&mut rest, body) {
                return;
            }
        }
    }

    if has_text {
        body.text = rest.to_vec();
    }
}

/// Consumes one header field (with folded continuations) from the front of
/// `rest` and files it. Returns `false` when the field is malformed.
fn consume_field(rest: &mut &[u8], body: &mut Body) -> bool {
    let line_end = memmem::find(rest, b"\r\n").unwrap_or(rest.len());
    let line = &rest[..line_end];

    let Some(colon) = line.iter().position(|&byte| byte == b':') else {
        warn!(
            "header line without colon, abandoning header parse: {}",
            escape_bytes(line)
        );
        return false;
    };

    let name = String::from_utf8_lossy(&line[..colon]).trim().to_owned();
    let mut value = String::from_utf8_lossy(&line[colon + 1..])
        .trim()
        .to_owned();

    // Folded continuations: subsequent lines starting with SP or HTAB.
    let mut cursor = (line_end + 2).min(rest.len());
    while cursor < rest.len() && (rest[cursor] == b' ' || rest[cursor] == b'\t') {
        let cont_end = memmem::find(&rest[cursor..], b"\r\n")
            .map(|i| cursor + i)
            .unwrap_or(rest.len());
        let continuation = String::from_utf8_lossy(&rest[cursor..cont_end]);
        let continuation = continuation.trim();
        if !continuation.is_empty() {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(continuation);
        }
        cursor = (cont_end + 2).min(rest.len());
    }

    body.header.insert(&name, value);
    *rest = &rest[cursor.min(rest.len())..];
    true
}
