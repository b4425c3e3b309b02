// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Hand-off of received messages

use anyhow::{Context, Result};
use std::{fs, io::Write, path::PathBuf, sync::Mutex};

use crate::smtp::syntax::Parameter;

/// A complete message, as received at the end of `DATA`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path; empty for the null sender (`<>`)
    pub mail_from: String,
    /// Forward paths, never empty
    pub rcpt_tos: Vec<String>,
    /// Message text with dot-stuffing removed and lines terminated by `\n`
    pub content: Vec<u8>,
    /// ESMTP parameters given with `MAIL`
    pub mail_options: Vec<Parameter>,
    /// ESMTP parameters given with `RCPT`, in recipient order
    pub rcpt_options: Vec<Vec<Parameter>>,
}

/// Receiver of finished messages
///
/// `accept` is called exactly once per completed `DATA` phase. Returning
/// `Ok(None)` accepts the message with `250 OK`; `Ok(Some(reply))` sends
/// `reply` verbatim instead, which lets the sink refuse a message with its
/// own code. `Err` is reserved for unexpected faults, which are logged and
/// reported to the client as a transient failure.
///
/// A sink is shared by all connections and runs on a blocking thread.
pub trait Sink: Send + Sync {
    fn accept(&self, envelope: &Envelope) -> Result<Option<String>>;
}

/// Sink writing the most recent message into a single file
///
/// Every accepted message replaces the file's contents with one
/// `X-RCPT: <address>` line per recipient, followed by the message text
/// (invalid UTF-8 replaced) and a final newline. Writers are serialized, so
/// at most one connection writes the file at a time.
#[derive(Debug)]
pub struct MailboxSink {
    path: Mutex<PathBuf>,
}

impl MailboxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MailboxSink { path: Mutex::new(path.into()) }
    }
}

impl Sink for MailboxSink {
    fn accept(&self, envelope: &Envelope) -> Result<Option<String>> {
        log::debug!("data received from: {:?}", envelope.mail_from);
        log::debug!("data received for: {:?}", envelope.rcpt_tos);
        log::debug!("data size: {} bytes", envelope.content.len());

        let mut data = Vec::with_capacity(envelope.content.len() + 64);
        for recipient in &envelope.rcpt_tos {
            writeln!(data, "X-RCPT: {recipient}")?;
        }
        data.extend_from_slice(String::from_utf8_lossy(&envelope.content).as_bytes());
        data.push(b'\n');

        let path = self.path.lock()
            .map_err(|_| anyhow::anyhow!("mailbox lock poisoned"))?;
        fs::write(&*path, data)
            .with_context(|| format!("could not write mailbox {}", path.display()))?;

        Ok(None)
    }
}
