//! Client-to-server command lines.
//!
//! The accepted grammar is deliberately permissive:
//!
//! ```text
//! command-line = tag SP command (SP arg)* CRLF
//! tag          = 1*(printable non-space)
//! command      = 1*(printable non-space)
//! arg          = paren-group / atom
//! ```
//!
//! Inside a parenthesized group, spaces do not separate arguments; the
//! group runs until its matching `)`. Command literals (`{n}` continuation
//! payloads, e.g. the APPEND message) have no dedicated state: the payload
//! lines fail to parse as commands and are skipped line by line.

use nom::{
    error::{make_error, ErrorKind},
    IResult, Needed,
};

use crate::{
    message::Message,
    parse::{is_token_char, is_wsp, token, wsp1},
    utils::lossy,
};

/// One complete command line, CRLF included.
///
/// `+` and `*` are server sigils; a client line starting with either is
/// rejected outright.
pub fn command_line(input: &[u8]) -> IResult<&[u8], Message> {
    match input.first() {
        None => return Err(nom::Err::Incomplete(Needed::new(1))),
        Some(b'+') | Some(b'*') => {
            return Err(nom::Err::Error(make_error(input, ErrorKind::Verify)))
        }
        Some(_) => {}
    }

    let (remaining, tag) = token(input)?;
    let (remaining, _) = wsp1(remaining)?;
    let (remaining, command) = token(remaining)?;

    let mut message = Message {
        tag: lossy(tag),
        command: lossy(command),
        args: Vec::new(),
        fetch: Vec::new(),
    };

    let mut remaining = remaining;
    loop {
        match remaining.first() {
            None => return Err(nom::Err::Incomplete(Needed::new(1))),
            Some(b'\r') => {
                let (rest, _) = abnf_core::streaming::crlf(remaining)?;
                remaining = rest;
                break;
            }
            Some(&byte) if is_wsp(byte) => {
                let (rest, _) = wsp1(remaining)?;
                match rest.first() {
                    None => return Err(nom::Err::Incomplete(Needed::new(1))),
                    Some(b'\r') => {
                        // Trailing whitespace before the line end.
                        remaining = rest;
                    }
                    Some(_) => {
                        let (rest, arg) = argument(rest)?;
                        message.args.push(arg);
                        remaining = rest;
                    }
                }
            }
            Some(_) => return Err(nom::Err::Error(make_error(remaining, ErrorKind::Char))),
        }
    }

    Ok((remaining, message))
}

/// One argument: an atom of printable non-space bytes, except that an
/// opening parenthesis suspends space-splitting until the depth counter
/// returns to zero.
fn argument(input: &[u8]) -> IResult<&[u8], String> {
    let mut depth = 0usize;
    let mut end = 0usize;

    loop {
        match input.get(end) {
            None => return Err(nom::Err::Incomplete(Needed::new(1))),
            Some(&byte) => {
                if depth == 0 {
                    if is_wsp(byte) || byte == b'\r' {
                        break;
                    }
                    if !is_token_char(byte) {
                        return Err(nom::Err::Error(make_error(&input[end..], ErrorKind::Char)));
                    }
                    if byte == b'(' {
                        depth += 1;
                    }
                } else {
                    // Group interior also admits the space.
                    if !(32..=126).contains(&byte) {
                        return Err(nom::Err::Error(make_error(&input[end..], ErrorKind::Char)));
                    }
                    if byte == b'(' {
                        depth += 1;
                    } else if byte == b')' {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &[u8]) -> Message {
        let (remaining, message) = command_line(input).unwrap();
        assert!(remaining.is_empty());
        message
    }

    #[test]
    fn test_login() {
        let message = parsed(b"A001 LOGIN user password\r\n");
        assert_eq!(message.tag, "A001");
        assert_eq!(message.command, "LOGIN");
        assert_eq!(message.args, vec!["user", "password"]);
    }

    #[test]
    fn test_select_quoted_mailbox() {
        let message = parsed(b"a2 SELECT \"INBOX\"\r\n");
        assert_eq!(message.command, "SELECT");
        assert_eq!(message.args, vec!["\"INBOX\""]);
    }

    #[test]
    fn test_paren_group_swallows_spaces() {
        let message =
            parsed(b"a3 FETCH 1:10 (UID FLAGS BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE)])\r\n");
        assert_eq!(message.command, "FETCH");
        assert_eq!(
            message.args,
            vec![
                "1:10",
                "(UID FLAGS BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE)])"
            ]
        );
    }

    #[test]
    fn test_status_with_item_list() {
        let message = parsed(b"B003 STATUS INBOX (MESSAGES RECENT UNSEEN)\r\n");
        assert_eq!(message.args, vec!["INBOX", "(MESSAGES RECENT UNSEEN)"]);
    }

    #[test]
    fn test_command_without_args() {
        let message = parsed(b"a6 logout\r\n");
        assert_eq!(message.command, "logout");
        assert!(message.args.is_empty());
        assert!(message.command.eq_ignore_ascii_case("LOGOUT"));
    }

    #[test]
    fn test_server_sigils_rejected() {
        assert!(matches!(
            command_line(b"* 1 FETCH (UID 1)\r\n"),
            Err(nom::Err::Error(_))
        ));
        assert!(matches!(
            command_line(b"+ go ahead\r\n"),
            Err(nom::Err::Error(_))
        ));
    }

    #[test]
    fn test_incomplete_line() {
        assert!(matches!(
            command_line(b"A001 LOGIN us"),
            Err(nom::Err::Incomplete(_))
        ));
        assert!(matches!(command_line(b""), Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn test_bare_cr_is_malformed() {
        assert!(matches!(
            command_line(b"A001 LOGIN a\rb\r\n"),
            Err(nom::Err::Error(_))
        ));
    }
}
