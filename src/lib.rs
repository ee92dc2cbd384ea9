//! Passive inspection of IMAP (RFC 3501) traffic.
//!
//! The crate sits downstream of a packet capture and TCP reassembly layer:
//! it receives whole payload slices with the direction already known,
//! reassembles the client and server byte streams per connection, parses
//! them into structured [`Message`]s, including decoded RFC 2822 headers
//! and bodies inside FETCH literals, and hands the results to whatever
//! wants to look at them (typically a keyword matcher).
//!
//! ## Example
//!
//! ```
//! use imap_inspect::{Direction, FlowKey, FlowTable};
//!
//! let mut table = FlowTable::with_defaults();
//! let tuple = FlowKey::new(
//!     "192.168.1.100".parse().unwrap(),
//!     49152,
//!     "10.0.0.1".parse().unwrap(),
//!     143,
//! );
//!
//! // Capture timestamps are milliseconds since the Unix epoch.
//! table.process(0, Direction::S2c, &tuple.reversed(), b"* OK ready\r\n");
//! table.process(5, Direction::C2s, &tuple, b"a1 LOGIN user pass\r\n");
//!
//! let flow = table.lookup(imap_inspect::Direction::C2s, &tuple).unwrap();
//! assert_eq!(flow.c2s_messages()[0].command, "LOGIN");
//! ```
//!
//! Parsers are incremental and restartable: a unit split across any number
//! of `process` calls parses exactly as if it had arrived in one piece.
//! Malformed lines are logged and skipped to the next CRLF; the flow
//! survives. A client `LOGOUT` tears its flow down immediately, and flows
//! idle past the configured timeout are reclaimed opportunistically.

#![deny(missing_debug_implementations)]

pub mod buffer;
pub mod config;
pub mod decode;
pub mod flow;
pub mod message;
pub mod parse;
pub mod table;

mod utils;

pub use buffer::CircularBuffer;
pub use config::Config;
pub use flow::Flow;
pub use message::{Body, Email, Header, Message};
pub use table::{Direction, FlowKey, FlowTable, ProcessStatus};
