//! Plain data records for parsed traffic: RFC 2822 headers, message bodies,
//! FETCH data items, and the per-direction message list entries.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// RFC 2822 header fields of one message.
///
/// `Date` and `From` are expected once and keep the last value seen; the
/// remaining known fields collect every occurrence in order. Classification
/// is case-sensitive against the canonical names; anything unknown lands in
/// [`Header::optional`] with its name case preserved.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub date: Option<String>,
    pub from: Option<String>,
    pub sender: Vec<String>,
    pub reply_to: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub message_id: Vec<String>,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,
    pub subject: Vec<String>,
    pub comments: Vec<String>,
    pub keywords: Vec<String>,
    pub resent_date: Vec<String>,
    pub resent_from: Vec<String>,
    pub resent_sender: Vec<String>,
    pub resent_to: Vec<String>,
    pub resent_cc: Vec<String>,
    pub resent_bcc: Vec<String>,
    pub resent_message_id: Vec<String>,
    pub return_path: Vec<String>,
    pub received: Vec<String>,
    pub optional: HashMap<String, Vec<String>>,
}

impl Header {
    /// Files one header field under its canonical slot.
    pub fn insert(&mut self, name: &str, value: String) {
        match name {
            "Date" => self.date = Some(value),
            "From" => self.from = Some(value),
            "Sender" => self.sender.push(value),
            "Reply-To" => self.reply_to.push(value),
            "To" => self.to.push(value),
            "Cc" => self.cc.push(value),
            "Bcc" => self.bcc.push(value),
            "Message-ID" => self.message_id.push(value),
            "In-Reply-To" => self.in_reply_to.push(value),
            "References" => self.references.push(value),
            "Subject" => self.subject.push(value),
            "Comments" => self.comments.push(value),
            "Keywords" => self.keywords.push(value),
            "Resent-Date" => self.resent_date.push(value),
            "Resent-From" => self.resent_from.push(value),
            "Resent-Sender" => self.resent_sender.push(value),
            "Resent-To" => self.resent_to.push(value),
            "Resent-Cc" => self.resent_cc.push(value),
            "Resent-Bcc" => self.resent_bcc.push(value),
            "Resent-Message-ID" => self.resent_message_id.push(value),
            "Return-Path" => self.return_path.push(value),
            "Received" => self.received.push(value),
            _ => self
                .optional
                .entry(name.to_owned())
                .or_default()
                .push(value),
        }
    }

    /// Value of an `optional` (non-canonical) header, first occurrence.
    pub fn optional_first(&self, name: &str) -> Option<&str> {
        self.optional
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Header plus literal body octets of one message (or message section).
///
/// `text` holds the body bytes exactly as they came off the wire; any
/// transfer decoding is left to [`crate::decode`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub header: Header,
    pub text: Vec<u8>,
}

/// The FETCH data items observed for one message number.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    /// Message sequence number from the untagged `*` response.
    pub sequence_number: u64,
    /// `UID` item, 0 when not observed.
    pub uid: u32,
    /// `RFC822.SIZE` item, 0 when not observed.
    pub rfc822_size: u64,
    /// `FLAGS (...)` capture, outer parentheses included.
    pub flags: String,
    /// `ENVELOPE (...)` capture, outer parentheses included.
    pub envelope: String,
    /// `BODYSTRUCTURE (...)` capture, outer parentheses included.
    pub bodystructure: String,
    /// `INTERNALDATE` quoted string, without the quotes.
    pub internaldate: String,
    /// Populated from `RFC822`, `RFC822.HEADER`, `RFC822.TEXT` and
    /// `BODY[...]` literals.
    pub body: Body,
}

impl Email {
    pub fn new(sequence_number: u64) -> Self {
        Self {
            sequence_number,
            ..Self::default()
        }
    }

    /// Interprets the captured `INTERNALDATE` as an IMAP date-time
    /// (`dd-Mon-yyyy HH:MM:SS +zzzz`, one-digit days space-padded).
    pub fn internaldate_parsed(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.internaldate.trim();
        DateTime::parse_from_str(raw, "%d-%b-%Y %H:%M:%S %z")
            .or_else(|_| DateTime::parse_from_str(raw, "%e-%b-%Y %H:%M:%S %z"))
            .ok()
    }
}

/// One parsed protocol unit.
///
/// For C→S this is a command: `tag`, `command` and the lexed `args`. For a
/// S→C tagged status, `command` is `OK`/`NO`/`BAD` and `args[0]` carries the
/// trailing text. A burst of untagged FETCH responses accumulates its
/// [`Email`]s in `fetch` under `tag = "*"`, `command = "FETCH"`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub tag: String,
    pub command: String,
    pub args: Vec<String>,
    pub fetch: Vec<Email>,
}

impl Message {
    pub(crate) fn fetch_group(email: Email) -> Self {
        Self {
            tag: "*".to_owned(),
            command: "FETCH".to_owned(),
            args: Vec::new(),
            fetch: vec![email],
        }
    }

    pub(crate) fn is_fetch_group(&self) -> bool {
        self.command == "FETCH" && self.tag == "*" && self.args.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_classification_is_case_sensitive() {
        let mut header = Header::default();
        header.insert("Subject", "hi".to_owned());
        header.insert("SUBJECT", "shouting".to_owned());
        header.insert("X-Mailer", "imap-inspect".to_owned());

        assert_eq!(header.subject, vec!["hi"]);
        assert_eq!(header.optional_first("SUBJECT"), Some("shouting"));
        assert_eq!(header.optional_first("X-Mailer"), Some("imap-inspect"));
        assert_eq!(header.optional_first("x-mailer"), None);
    }

    #[test]
    fn test_single_value_fields_keep_last() {
        let mut header = Header::default();
        header.insert("From", "a@b.com".to_owned());
        header.insert("From", "c@d.com".to_owned());
        assert_eq!(header.from.as_deref(), Some("c@d.com"));
    }

    #[test]
    fn test_internaldate_parsed() {
        let mut email = Email::new(1);
        email.internaldate = "08-Apr-2025 12:53:48 +0000".to_owned();
        let parsed = email.internaldate_parsed().unwrap();
        assert_eq!(parsed.timestamp(), 1_744_116_828);

        email.internaldate = " 8-Apr-2025 12:53:48 +0000".to_owned();
        assert!(email.internaldate_parsed().is_some());

        email.internaldate = "not a date".to_owned();
        assert!(email.internaldate_parsed().is_none());
    }
}
