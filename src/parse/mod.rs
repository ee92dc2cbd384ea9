//! Incremental, restartable parsers for both directions of an IMAP flow.
//!
//! The parsers are nom streaming functions over the contiguous view of a
//! flow buffer. Hitting end-of-input anywhere inside a unit surfaces as
//! `nom::Err::Incomplete`, which the [`Step`] driver maps to
//! [`Step::NeedMore`] without touching the buffer or the message list, so
//! the next append resumes seamlessly. Parse failures skip the offending
//! line through its CRLF and carry on.

use log::warn;
use memchr::memmem;
use nom::{
    bytes::streaming::{take, take_while, take_while1},
    character::streaming::digit1,
    combinator::map_res,
    error::{make_error, ErrorKind},
    sequence::delimited,
    IResult, Needed,
};

use crate::{table::Direction, utils::escape_bytes};

pub mod command;
pub mod response;
pub mod rfc2822;

/// Longest malformed-line prefix reproduced in the log.
const MAX_DUMP: usize = 1024;

/// Outcome of trying to cut one unit from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step<T> {
    /// A complete unit; `consumed` bytes are ready to be erased.
    Unit { consumed: usize, value: T },
    /// A malformed unit was skipped through its terminating CRLF.
    Skip { consumed: usize },
    /// The buffer ends mid-unit; retry after the next append.
    NeedMore,
}

/// Runs `parser` on `input` and folds the nom outcome into a [`Step`].
///
/// On a parse failure the unit is discarded through the first CRLF at or
/// after the failure position. Without such a CRLF the line is still
/// incomplete and nothing can be discarded yet.
pub(crate) fn step_with<'a, O, P>(input: &'a [u8], direction: Direction, parser: P) -> Step<O>
where
    P: Fn(&'a [u8]) -> IResult<&'a [u8], O>,
{
    match parser(input) {
        Ok((remaining, value)) => Step::Unit {
            consumed: input.len() - remaining.len(),
            value,
        },
        Err(nom::Err::Incomplete(_)) => Step::NeedMore,
        Err(nom::Err::Error(error)) | Err(nom::Err::Failure(error)) => {
            let failed_at = input.len() - error.input.len();
            match memmem::find(&input[failed_at..], b"\r\n") {
                Some(offset) => {
                    let line_end = failed_at + offset;
                    warn!(
                        "dropping malformed {} unit: {}",
                        direction.label(),
                        escape_bytes(&input[..line_end.min(MAX_DUMP)])
                    );
                    Step::Skip {
                        consumed: line_end + 2,
                    }
                }
                None => Step::NeedMore,
            }
        }
    }
}

// ----- shared lexers -----

pub(crate) fn is_wsp(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Printable ASCII, the permissive token alphabet for tags and commands.
pub(crate) fn is_token_char(byte: u8) -> bool {
    (33..=126).contains(&byte)
}

pub(crate) fn wsp0(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(is_wsp)(input)
}

pub(crate) fn wsp1(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_wsp)(input)
}

pub(crate) fn token(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_token_char)(input)
}

/// Unsigned 64-bit decimal.
///
/// `number = 1*DIGIT`
pub(crate) fn number_u64(input: &[u8]) -> IResult<&[u8], u64> {
    map_res(map_res(digit1, std::str::from_utf8), str::parse::<u64>)(input)
}

/// Unsigned 32-bit decimal.
pub(crate) fn number_u32(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(map_res(digit1, std::str::from_utf8), str::parse::<u32>)(input)
}

/// `literal = "{" number "}" CRLF *OCTET`
///
/// The payload is returned byte-exact. Fewer than `n` octets in the buffer
/// is not an error, just not enough input yet.
pub(crate) fn literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (remaining, n) = delimited(
        nom::bytes::streaming::tag(b"{"),
        number_u64,
        nom::bytes::streaming::tag(b"}"),
    )(input)?;
    let (remaining, _) = abnf_core::streaming::crlf(remaining)?;
    let (remaining, data) = take(n as usize)(remaining)?;

    Ok((remaining, data))
}

/// A `"..."` quoted string, captured without the quotes. No escape
/// processing; the capture runs to the next double quote.
pub(crate) fn quoted_raw(input: &[u8]) -> IResult<&[u8], &[u8]> {
    delimited(
        nom::bytes::streaming::tag(b"\""),
        take_while(|byte| byte != b'"'),
        nom::bytes::streaming::tag(b"\""),
    )(input)
}

/// A balanced `open ... close` group captured verbatim, delimiters
/// included. Nested groups extend the capture; any byte may appear inside.
pub(crate) fn balanced_group(
    open: u8,
    close: u8,
) -> impl Fn(&[u8]) -> IResult<&[u8], &[u8]> {
    move |input: &[u8]| {
        if input.is_empty() {
            return Err(nom::Err::Incomplete(Needed::new(1)));
        }
        if input[0] != open {
            return Err(nom::Err::Error(make_error(input, ErrorKind::Char)));
        }

        let mut depth = 0usize;
        for (i, &byte) in input.iter().enumerate() {
            if byte == open {
                depth += 1;
            } else if byte == close {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[i + 1..], &input[..=i]));
                }
            }
        }

        Err(nom::Err::Incomplete(Needed::new(1)))
    }
}
