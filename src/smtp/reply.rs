// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! SMTP replies

use std::{borrow::Cow, fmt};

/// A reply, possibly spanning several lines
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<Cow<'static, str>>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<Cow<'static, str>>) -> Self {
        Reply { code, lines: vec![text.into()] }
    }

    /// Multi-line reply; every line but the last is sent with a `-`
    /// continuation marker
    pub fn multiline<I, S>(code: u16, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        let lines: Vec<_> = lines.into_iter().map(Into::into).collect();
        debug_assert!(!lines.is_empty());
        Reply { code, lines }
    }

    /// Parse a single reply line supplied by a collaborator, such as
    /// `451 Try again later`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let digits = line.get(..3)?;
        let text = match line.get(3..)? {
            "" => "",
            rest => rest.strip_prefix(' ')?,
        };

        if !digits.bytes().all(|b| b.is_ascii_digit())
        || !matches!(digits.as_bytes()[0], b'2'..=b'5')
        || text.contains(['\r', '\n']) {
            return None;
        }

        Some(Reply::new(digits.parse().ok()?, text.to_owned()))
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn ok() -> Self {
        Reply::new(250, "OK")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);

        for (inx, line) in self.lines.iter().enumerate() {
            let separator = if inx == last { ' ' } else { '-' };

            if line.is_empty() && inx == last {
                write!(f, "{}\r\n", self.code)?;
            } else {
                write!(f, "{}{separator}{line}\r\n", self.code)?;
            }
        }

        Ok(())
    }
}
