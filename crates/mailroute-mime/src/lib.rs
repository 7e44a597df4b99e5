//! # mailroute-mime
//!
//! Fault-tolerant MIME parsing for the incoming-mail routing engine.
//!
//! Unlike a strict RFC parser, this crate is built around the contract
//! that the routing layer imposes: parsing **never** raises an error
//! to its caller. Arbitrary bytes from the MTA (malformed multipart
//! structures, missing headers, non-UTF-8 content, broken transfer
//! encodings) all produce a [`ParsedMail`] with best-effort fields,
//! and the router turns unusable input into a terminal outcome.
//!
//! ## Quick start
//!
//! ```
//! use mailroute_mime::ParsedMail;
//!
//! let raw = b"From: sender@example.com\r\n\
//!             Subject: OFFER: Chair (Bristol)\r\n\
//!             \r\n\
//!             Lovely chair.";
//! let mail = ParsedMail::parse(raw, "sender@example.com", "bristol@groups.example.org");
//! assert_eq!(mail.subject.as_deref(), Some("OFFER: Chair (Bristol)"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod content_type;
pub mod encoding;
mod error;
pub mod header;
pub mod message;
mod parsed;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Part, TransferEncoding};
pub use parsed::{AttachmentInfo, DsnInfo, ParsedMail};
