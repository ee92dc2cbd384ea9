//! Server-to-client responses.
//!
//! Three top-level shapes, discriminated by the first byte:
//!
//! | First byte | Shape | Handling |
//! |---|---|---|
//! | `+` | continuation request | skipped to the next CRLF |
//! | `*` | untagged response | FETCH fully parsed; anything else captured raw |
//! | other | tagged status | `tag OK/NO/BAD text` |
//!
//! Untagged FETCH is the involved case: a `(ITEM value ...)` bag over a
//! fixed item vocabulary, where the message-data items (`RFC822`,
//! `RFC822.HEADER`, `RFC822.TEXT`, `BODY[...]`) carry `{n}` literals that
//! in turn contain RFC 2822 header and body octets.

use nom::{
    bytes::streaming::{tag, tag_no_case, take_until},
    combinator::cut,
    error::{make_error, ErrorKind},
    sequence::tuple,
    IResult, Needed,
};

use crate::{
    message::Email,
    parse::{
        balanced_group, is_wsp, literal, number_u32, number_u64, quoted_raw,
        rfc2822::resolve_imap_body, token, wsp0, wsp1,
    },
    utils::lossy,
};

/// One parsed unit of the server stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    /// `+ ...` continuation request; nothing is recorded.
    Continuation,
    /// One untagged `* <n> FETCH (...)` response.
    Fetch(Email),
    /// Tagged completion status.
    Status {
        tag: String,
        /// `OK`, `NO` or `BAD`, uppercased.
        command: String,
        text: String,
    },
    /// Any other untagged response, captured tagged-like under `tag = "*"`.
    Untagged { command: String, text: String },
}

/// One complete response unit, CRLF included.
pub fn response(input: &[u8]) -> IResult<&[u8], ResponseEvent> {
    match input.first() {
        None => Err(nom::Err::Incomplete(Needed::new(1))),
        Some(b'+') => continuation(input),
        Some(b'*') => untagged(input),
        Some(_) => tagged_status(input),
    }
}

/// `+ ...`: currently skipped to the next CRLF.
fn continuation(input: &[u8]) -> IResult<&[u8], ResponseEvent> {
    let (remaining, _) = tuple((tag(b"+"), take_until("\r\n"), tag(b"\r\n")))(input)?;

    Ok((remaining, ResponseEvent::Continuation))
}

fn untagged(input: &[u8]) -> IResult<&[u8], ResponseEvent> {
    match fetch_response(input) {
        Ok((remaining, email)) => Ok((remaining, ResponseEvent::Fetch(email))),
        // A recognized FETCH that goes wrong mid-line is malformed, not a
        // candidate for raw capture.
        Err(nom::Err::Failure(error)) => Err(nom::Err::Failure(error)),
        Err(nom::Err::Incomplete(needed)) => Err(nom::Err::Incomplete(needed)),
        Err(nom::Err::Error(_)) => untagged_other(input),
    }
}

/// `* <n> FETCH (<ITEM> <value> ...)` CRLF
fn fetch_response(input: &[u8]) -> IResult<&[u8], Email> {
    let (remaining, (_, _, sequence_number, _, _)) =
        tuple((tag(b"*"), wsp1, number_u64, wsp1, tag_no_case(b"FETCH")))(input)?;
    // Token boundary: `FETCHX` is some other response, not a FETCH.
    match remaining.first() {
        None => return Err(nom::Err::Incomplete(Needed::new(1))),
        Some(&byte) if is_wsp(byte) => {}
        Some(_) => return Err(nom::Err::Error(make_error(remaining, ErrorKind::Verify))),
    }
    // From here on this line is committed to being a FETCH.
    let (remaining, _) = cut(tuple((wsp1, tag(b"("))))(remaining)?;

    let mut email = Email::new(sequence_number);
    let mut remaining = remaining;
    loop {
        let (rest, _) = wsp0(remaining)?;
        match rest.first() {
            None => return Err(nom::Err::Incomplete(Needed::new(1))),
            Some(b')') => {
                remaining = &rest[1..];
                break;
            }
            Some(_) => {}
        }

        let (rest, name) = cut(fetch_item_name)(rest)?;
        let (rest, _) = cut(wsp1)(rest)?;
        let (rest, ()) = fetch_item_value(rest, &name, &mut email)?;
        remaining = rest;
    }

    let (remaining, _) = cut(tuple((wsp0, abnf_core::streaming::crlf)))(remaining)?;

    Ok((remaining, email))
}

/// A FETCH item name: a printable run in which `(`/`[` suspend the run
/// until the brackets balance again, so `BODY[HEADER.FIELDS (FROM DATE)]`
/// is a single name.
fn fetch_item_name(input: &[u8]) -> IResult<&[u8], String> {
    let mut depth = 0usize;
    let mut end = 0usize;

    loop {
        match input.get(end) {
            None => return Err(nom::Err::Incomplete(Needed::new(1))),
            Some(&byte) => {
                if depth == 0 {
                    if !(33..=126).contains(&byte) {
                        break;
                    }
                    if byte == b'(' || byte == b'[' {
                        depth += 1;
                    }
                } else {
                    if !(32..=126).contains(&byte) {
                        return Err(nom::Err::Error(make_error(&input[end..], ErrorKind::Char)));
                    }
                    if byte == b'(' || byte == b'[' {
                        depth += 1;
                    } else if byte == b')' || byte == b']' {
                        depth -= 1;
                    }
                }
                end += 1;
            }
        }
    }

    if end == 0 {
        return Err(nom::Err::Error(make_error(input, ErrorKind::TakeWhile1)));
    }

    Ok((&input[end..], lossy(&input[..end])))
}

/// Reads one item value into `email`, dispatching on the uppercased item
/// name. An item outside the vocabulary fails the whole line.
fn fetch_item_value<'a>(
    input: &'a [u8],
    name: &str,
    email: &mut Email,
) -> IResult<&'a [u8], ()> {
    let upper = name.to_ascii_uppercase();

    match upper.as_str() {
        "BODYSTRUCTURE" => {
            let (remaining, raw) = cut(balanced_group(b'(', b')'))(input)?;
            email.bodystructure = lossy(raw);
            Ok((remaining, ()))
        }
        "ENVELOPE" => {
            let (remaining, raw) = cut(balanced_group(b'(', b')'))(input)?;
            email.envelope = lossy(raw);
            Ok((remaining, ()))
        }
        "FLAGS" => {
            let (remaining, raw) = cut(balanced_group(b'(', b')'))(input)?;
            email.flags = lossy(raw);
            Ok((remaining, ()))
        }
        "INTERNALDATE" => {
            let (remaining, raw) = cut(quoted_raw)(input)?;
            email.internaldate = lossy(raw);
            Ok((remaining, ()))
        }
        "RFC822.SIZE" => {
            let (remaining, size) = cut(number_u64)(input)?;
            email.rfc822_size = size;
            Ok((remaining, ()))
        }
        "UID" => {
            let (remaining, uid) = cut(number_u32)(input)?;
            email.uid = uid;
            Ok((remaining, ()))
        }
        "RFC822" => literal_into_body(input, email, true, true),
        "RFC822.HEADER" => literal_into_body(input, email, true, false),
        "RFC822.TEXT" => literal_into_body(input, email, false, true),
        _ if upper.starts_with("BODY[") => {
            let (has_header, has_text) = section_flags(&upper);
            literal_into_body(input, email, has_header, has_text)
        }
        _ => Err(nom::Err::Failure(make_error(input, ErrorKind::Tag))),
    }
}

fn literal_into_body<'a>(
    input: &'a [u8],
    email: &mut Email,
    has_header: bool,
    has_text: bool,
) -> IResult<&'a [u8], ()> {
    let (remaining, data) = cut(literal)(input)?;
    resolve_imap_body(data, &mut email.body, has_header, has_text);

    Ok((remaining, ()))
}

/// Decides header/text extraction for a `BODY[...]` section name
/// (uppercased): the `HEADER` and `TEXT` tokens are looked for between the
/// outer brackets but outside any `(...)` region; with neither present the
/// whole message is assumed.
fn section_flags(upper: &str) -> (bool, bool) {
    let inner = upper
        .strip_prefix("BODY[")
        .map(|rest| match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        })
        .unwrap_or("");

    let mut outside = String::with_capacity(inner.len());
    let mut depth = 0usize;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => outside.push(c),
            _ => {}
        }
    }

    let has_header = outside.contains("HEADER");
    let has_text = outside.contains("TEXT");
    if !has_header && !has_text {
        (true, true)
    } else {
        (has_header, has_text)
    }
}

/// `<tag> SP OK/NO/BAD SP <text>` CRLF
fn tagged_status(input: &[u8]) -> IResult<&[u8], ResponseEvent> {
    let (remaining, status_tag) = token(input)?;
    let (remaining, _) = wsp1(remaining)?;
    let (remaining, command) = status_word(remaining)?;
    let (remaining, _) = wsp0(remaining)?;
    let (remaining, text) = take_until("\r\n")(remaining)?;
    let (remaining, _) = tag(b"\r\n")(remaining)?;

    Ok((
        remaining,
        ResponseEvent::Status {
            tag: lossy(status_tag),
            command,
            text: lossy(text).trim_end().to_owned(),
        },
    ))
}

/// `OK`, `NO` or `BAD`, case-insensitive, followed by a non-token byte.
fn status_word(input: &[u8]) -> IResult<&[u8], String> {
    for word in [&b"OK"[..], &b"NO"[..], &b"BAD"[..]] {
        if input.len() < word.len() + 1 {
            if input
                .iter()
                .zip(word.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
            {
                return Err(nom::Err::Incomplete(Needed::new(1)));
            }
            continue;
        }
        if input[..word.len()].eq_ignore_ascii_case(word)
            && !crate::parse::is_token_char(input[word.len()])
        {
            return Ok((
                &input[word.len()..],
                String::from_utf8_lossy(word).into_owned(),
            ));
        }
    }

    Err(nom::Err::Error(make_error(input, ErrorKind::Alt)))
}

/// Untagged responses other than FETCH: captured as a tagged-like message,
/// `* <command> <raw text>`.
fn untagged_other(input: &[u8]) -> IResult<&[u8], ResponseEvent> {
    let (remaining, _) = tuple((tag(b"*"), wsp1))(input)?;
    let (remaining, command) = token(remaining)?;
    let (remaining, _) = wsp0(remaining)?;
    let (remaining, text) = take_until("\r\n")(remaining)?;
    let (remaining, _) = tag(b"\r\n")(remaining)?;

    Ok((
        remaining,
        ResponseEvent::Untagged {
            command: lossy(command),
            text: lossy(text).trim_end().to_owned(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &[u8]) -> ResponseEvent {
        let (remaining, event) = response(input).unwrap();
        assert!(remaining.is_empty());
        event
    }

    fn fetched(input: &[u8]) -> Email {
        match parsed(input) {
            ResponseEvent::Fetch(email) => email,
            other => panic!("expected FETCH, got {:?}", other),
        }
    }

    #[test]
    fn test_tagged_status() {
        assert_eq!(
            parsed(b"a1 OK LOGIN completed\r\n"),
            ResponseEvent::Status {
                tag: "a1".to_owned(),
                command: "OK".to_owned(),
                text: "LOGIN completed".to_owned(),
            }
        );
    }

    #[test]
    fn test_tagged_status_case_and_no() {
        assert_eq!(
            parsed(b"a2 no [ALERT] invalid credentials\r\n"),
            ResponseEvent::Status {
                tag: "a2".to_owned(),
                command: "NO".to_owned(),
                text: "[ALERT] invalid credentials".to_owned(),
            }
        );
        assert_eq!(
            parsed(b"xyz BAD\r\n"),
            ResponseEvent::Status {
                tag: "xyz".to_owned(),
                command: "BAD".to_owned(),
                text: String::new(),
            }
        );
    }

    #[test]
    fn test_status_word_must_be_delimited() {
        // "OKAY" is not a status; the line falls through to malformed.
        assert!(matches!(
            response(b"a1 OKAY nope\r\n"),
            Err(nom::Err::Error(_))
        ));
    }

    #[test]
    fn test_continuation_skipped() {
        assert_eq!(
            parsed(b"+ Ready for literal data\r\n"),
            ResponseEvent::Continuation
        );
    }

    #[test]
    fn test_untagged_non_fetch_captured_raw() {
        assert_eq!(
            parsed(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n"),
            ResponseEvent::Untagged {
                command: "OK".to_owned(),
                text: "[UIDVALIDITY 3857529045] UIDs valid".to_owned(),
            }
        );
        assert_eq!(
            parsed(b"* 23 EXISTS\r\n"),
            ResponseEvent::Untagged {
                command: "23".to_owned(),
                text: "EXISTS".to_owned(),
            }
        );
    }

    #[test]
    fn test_fetch_needs_a_token_boundary() {
        assert_eq!(
            parsed(b"* 2 FETCHED something\r\n"),
            ResponseEvent::Untagged {
                command: "2".to_owned(),
                text: "FETCHED something".to_owned(),
            }
        );
    }

    #[test]
    fn test_fetch_scalar_items() {
        let email = fetched(b"* 12 FETCH (UID 26 RFC822.SIZE 4196 FLAGS (\\Seen \\Answered))\r\n");
        assert_eq!(email.sequence_number, 12);
        assert_eq!(email.uid, 26);
        assert_eq!(email.rfc822_size, 4196);
        assert_eq!(email.flags, "(\\Seen \\Answered)");
    }

    #[test]
    fn test_fetch_envelope_and_internaldate() {
        let email = fetched(
            b"* 3 FETCH (INTERNALDATE \"08-Apr-2025 12:53:48 +0000\" \
              ENVELOPE (\"Tue, 8 Apr\" \"hi\" ((\"a\" NIL \"a\" \"b.com\")) NIL))\r\n",
        );
        assert_eq!(email.internaldate, "08-Apr-2025 12:53:48 +0000");
        assert_eq!(
            email.envelope,
            "(\"Tue, 8 Apr\" \"hi\" ((\"a\" NIL \"a\" \"b.com\")) NIL)"
        );
    }

    #[test]
    fn test_fetch_header_fields_literal() {
        let email = fetched(
            b"* 1 FETCH (UID 26 FLAGS () BODY[HEADER.FIELDS (FROM SUBJECT DATE)] {68}\r\n\
              From: a@b.com\r\nSubject: hi\r\nDate: Tue, 8 Apr 2025 12:53:48 +0000\r\n\r\n)\r\n",
        );
        assert_eq!(email.sequence_number, 1);
        assert_eq!(email.uid, 26);
        assert_eq!(email.flags, "()");
        assert_eq!(email.body.header.from.as_deref(), Some("a@b.com"));
        assert_eq!(email.body.header.subject, vec!["hi"]);
        assert_eq!(
            email.body.header.date.as_deref(),
            Some("Tue, 8 Apr 2025 12:53:48 +0000")
        );
        assert!(email.body.text.is_empty());
    }

    #[test]
    fn test_fetch_rfc822_header_and_text_split() {
        let email = fetched(b"* 2 FETCH (RFC822.TEXT {12}\r\nhello world\n)\r\n");
        assert_eq!(email.body.text, b"hello world\n");
        assert!(email.body.header.from.is_none());

        let email = fetched(b"* 2 FETCH (RFC822.HEADER {17}\r\nFrom: a@b.com\r\n\r\n)\r\n");
        assert_eq!(email.body.header.from.as_deref(), Some("a@b.com"));
        assert!(email.body.text.is_empty());
    }

    #[test]
    fn test_fetch_full_rfc822_literal() {
        let email = fetched(
            b"* 4 FETCH (RFC822 {36}\r\nFrom: a@b.com\r\n\r\nbody line\r\nsecond\r\n)\r\n",
        );
        assert_eq!(email.body.header.from.as_deref(), Some("a@b.com"));
        assert_eq!(email.body.text, b"body line\r\nsecond\r\n");
    }

    #[test]
    fn test_fetch_body_section_defaults_to_full_message() {
        let email = fetched(b"* 5 FETCH (BODY[1.2] {20}\r\nFrom: x@y.z\r\n\r\nhello)\r\n");
        assert_eq!(email.body.header.from.as_deref(), Some("x@y.z"));
        assert_eq!(email.body.text, b"hello");
    }

    #[test]
    fn test_fetch_literal_needs_all_octets() {
        // 70 promised, fewer present: nothing must be consumed.
        let input: &[u8] =
            b"* 1 FETCH (UID 26 FLAGS () BODY[HEADER.FIELDS (FROM SUBJECT DATE)] {70}\r\nFrom: a@b";
        assert!(matches!(response(input), Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn test_fetch_unknown_item_is_fatal() {
        assert!(matches!(
            response(b"* 1 FETCH (X-UNKNOWN 7)\r\n"),
            Err(nom::Err::Failure(_))
        ));
    }

    #[test]
    fn test_section_flags() {
        assert_eq!(section_flags("BODY[]"), (true, true));
        assert_eq!(section_flags("BODY[HEADER]"), (true, false));
        assert_eq!(section_flags("BODY[HEADER.FIELDS (FROM TEXT)]"), (true, false));
        assert_eq!(section_flags("BODY[TEXT]"), (false, true));
        assert_eq!(section_flags("BODY[1.2]"), (true, true));
        assert_eq!(section_flags("BODY[1.TEXT]"), (false, true));
    }

    #[test]
    fn test_multiple_items_with_literals() {
        let email = fetched(
            b"* 7 FETCH (UID 9 BODY[HEADER] {17}\r\nFrom: a@b.com\r\n\r\n RFC822.SIZE 120)\r\n",
        );
        assert_eq!(email.uid, 9);
        assert_eq!(email.rfc822_size, 120);
        assert_eq!(email.body.header.from.as_deref(), Some("a@b.com"));
    }
}
