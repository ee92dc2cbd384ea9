//! One bidirectional IMAP conversation.

use std::io::{self, Write};

use log::{debug, trace};

use crate::{
    buffer::CircularBuffer,
    message::Message,
    parse::{
        command::command_line,
        response::{response, ResponseEvent},
        step_with, Step,
    },
    table::Direction,
};

/// A reassembled flow: the two direction buffers, the messages parsed out
/// of them, and the activity timestamp driving idle expiry.
///
/// The flow owns no timers; [`crate::table::FlowTable`] drives parsing and
/// reclamation from its `process` calls.
#[derive(Debug)]
pub struct Flow {
    c2s_buffer: CircularBuffer,
    s2c_buffer: CircularBuffer,
    c2s_messages: Vec<Message>,
    s2c_messages: Vec<Message>,
    last_activity_ms: u64,
}

impl Flow {
    pub(crate) fn new(buffer_capacity: usize, now_ms: u64) -> Self {
        Self {
            c2s_buffer: CircularBuffer::with_capacity(buffer_capacity),
            s2c_buffer: CircularBuffer::with_capacity(buffer_capacity),
            c2s_messages: Vec::new(),
            s2c_messages: Vec::new(),
            last_activity_ms: now_ms,
        }
    }

    /// Appends client bytes and refreshes the activity timestamp.
    pub fn append_c2s(&mut self, payload: &[u8], now_ms: u64) {
        self.c2s_buffer.append(payload);
        self.touch(now_ms);
    }

    /// Appends server bytes and refreshes the activity timestamp.
    pub fn append_s2c(&mut self, payload: &[u8], now_ms: u64) {
        self.s2c_buffer.append(payload);
        self.touch(now_ms);
    }

    /// Consumes every complete command currently in the client buffer.
    ///
    /// Returns `true` when one of the freshly parsed commands is `LOGOUT`
    /// (case-insensitive); the caller is expected to tear the flow down.
    pub fn parse_c2s(&mut self) -> bool {
        let mut logout = false;

        loop {
            if self.c2s_buffer.is_empty() {
                break;
            }

            let step = step_with(self.c2s_buffer.make_contiguous(), Direction::C2s, command_line);
            match step {
                Step::Unit { consumed, value } => {
                    trace!("c2s command: {} {}", value.tag, value.command);
                    logout |= value.command.eq_ignore_ascii_case("LOGOUT");
                    self.c2s_messages.push(value);
                    self.c2s_buffer.erase_up_to(consumed - 1);
                }
                Step::Skip { consumed } => self.c2s_buffer.erase_up_to(consumed - 1),
                Step::NeedMore => break,
            }
        }

        logout
    }

    /// Consumes every complete response currently in the server buffer.
    pub fn parse_s2c(&mut self) {
        loop {
            if self.s2c_buffer.is_empty() {
                break;
            }

            let step = step_with(self.s2c_buffer.make_contiguous(), Direction::S2c, response);
            match step {
                Step::Unit { consumed, value } => {
                    self.apply_s2c_event(value);
                    self.s2c_buffer.erase_up_to(consumed - 1);
                }
                Step::Skip { consumed } => self.s2c_buffer.erase_up_to(consumed - 1),
                Step::NeedMore => break,
            }
        }
    }

    /// Folds one parsed server unit into the message list.
    ///
    /// Consecutive FETCH responses accumulate their emails into the FETCH
    /// message at the tail of the list; any other message ends that run.
    /// The grouping depends only on the byte stream, never on how the
    /// stream was sliced into appends.
    fn apply_s2c_event(&mut self, event: ResponseEvent) {
        match event {
            ResponseEvent::Continuation => debug!("skipping continuation request"),
            ResponseEvent::Fetch(email) => {
                trace!(
                    "fetch response for message {} (uid {})",
                    email.sequence_number,
                    email.uid
                );
                match self.s2c_messages.last_mut() {
                    Some(tail) if tail.is_fetch_group() => tail.fetch.push(email),
                    _ => self.s2c_messages.push(Message::fetch_group(email)),
                }
            }
            ResponseEvent::Status { tag, command, text } => {
                self.s2c_messages.push(Message {
                    tag,
                    command,
                    args: vec![text],
                    fetch: Vec::new(),
                });
            }
            ResponseEvent::Untagged { command, text } => {
                self.s2c_messages.push(Message {
                    tag: "*".to_owned(),
                    command,
                    args: vec![text],
                    fetch: Vec::new(),
                });
            }
        }
    }

    pub fn c2s_messages(&self) -> &[Message] {
        &self.c2s_messages
    }

    pub fn s2c_messages(&self) -> &[Message] {
        &self.s2c_messages
    }

    pub(crate) fn touch(&mut self, now_ms: u64) {
        // Timestamps only move forward, even if the caller's clock jumps.
        if now_ms > self.last_activity_ms {
            self.last_activity_ms = now_ms;
        }
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn is_timeout(&self, now_ms: u64, threshold_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) > threshold_ms
    }

    /// Writes a human-readable dump of every accumulated message, both
    /// directions, including all populated per-email fields.
    pub fn emit<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        writeln!(sink, "--- C2S ({} messages) ---", self.c2s_messages.len())?;
        for message in &self.c2s_messages {
            emit_message(sink, message)?;
        }

        writeln!(sink, "--- S2C ({} messages) ---", self.s2c_messages.len())?;
        for message in &self.s2c_messages {
            emit_message(sink, message)?;
        }

        Ok(())
    }
}

fn emit_message<W: Write>(sink: &mut W, message: &Message) -> io::Result<()> {
    writeln!(
        sink,
        "message tag={} command={} args={:?}",
        message.tag, message.command, message.args
    )?;

    for email in &message.fetch {
        writeln!(sink, "  email seq={}", email.sequence_number)?;
        if email.uid != 0 {
            writeln!(sink, "    uid: {}", email.uid)?;
        }
        if email.rfc822_size != 0 {
            writeln!(sink, "    rfc822.size: {}", email.rfc822_size)?;
        }
        if !email.flags.is_empty() {
            writeln!(sink, "    flags: {}", email.flags)?;
        }
        if !email.internaldate.is_empty() {
            writeln!(sink, "    internaldate: {}", email.internaldate)?;
        }
        if !email.envelope.is_empty() {
            writeln!(sink, "    envelope: {}", email.envelope)?;
        }
        if !email.bodystructure.is_empty() {
            writeln!(sink, "    bodystructure: {}", email.bodystructure)?;
        }

        let header = &email.body.header;
        if let Some(date) = &header.date {
            writeln!(sink, "    date: {}", date)?;
        }
        if let Some(from) = &header.from {
            writeln!(sink, "    from: {}", from)?;
        }
        for (label, values) in [
            ("sender", &header.sender),
            ("reply-to", &header.reply_to),
            ("to", &header.to),
            ("cc", &header.cc),
            ("bcc", &header.bcc),
            ("message-id", &header.message_id),
            ("in-reply-to", &header.in_reply_to),
            ("references", &header.references),
            ("subject", &header.subject),
            ("comments", &header.comments),
            ("keywords", &header.keywords),
            ("resent-date", &header.resent_date),
            ("resent-from", &header.resent_from),
            ("resent-sender", &header.resent_sender),
            ("resent-to", &header.resent_to),
            ("resent-cc", &header.resent_cc),
            ("resent-bcc", &header.resent_bcc),
            ("resent-message-id", &header.resent_message_id),
            ("return-path", &header.return_path),
            ("received", &header.received),
        ] {
            for value in values {
                writeln!(sink, "    {}: {}", label, value)?;
            }
        }
        for (name, values) in &header.optional {
            for value in values {
                writeln!(sink, "    {}: {}", name, value)?;
            }
        }
        if !email.body.text.is_empty() {
            writeln!(
                sink,
                "    text ({} bytes): {}",
                email.body.text.len(),
                String::from_utf8_lossy(&email.body.text)
            )?;
        }
    }

    Ok(())
}
