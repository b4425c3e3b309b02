// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use std::fmt;

/// Longest prefix of a protocol line rendered in logs
const LOG_LIMIT: usize = 200;

/// Render raw protocol bytes for logging, escaping anything that isn't
/// printable ASCII and eliding overly long input.
pub fn maybe_ascii(ascii: &[u8]) -> MaybeAscii {
    MaybeAscii(ascii)
}

pub struct MaybeAscii<'a>(&'a [u8]);

impl MaybeAscii<'_> {
    fn write_escaped(&self, f: &mut fmt::Formatter, quote: bool) -> fmt::Result {
        let data = self.0.strip_suffix(b"\r\n").unwrap_or(self.0);
        let (shown, elided) = if data.len() > LOG_LIMIT {
            (&data[..LOG_LIMIT], data.len() - LOG_LIMIT)
        } else {
            (data, 0)
        };

        for &byte in shown {
            match byte {
                b'"' if quote => f.write_str("\\\"")?,
                b' ' | 0x21..=0x7e => write!(f, "{}", byte as char)?,
                b'\r' => f.write_str("\\r")?,
                b'\n' => f.write_str("\\n")?,
                b'\t' => f.write_str("\\t")?,
                _ => write!(f, "\\x{:02x}", byte)?,
            }
        }

        if elided > 0 {
            write!(f, "... ({elided} more bytes)")?;
        }

        Ok(())
    }
}

impl fmt::Display for MaybeAscii<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write_escaped(f, false)
    }
}

impl fmt::Debug for MaybeAscii<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("\"")?;
        self.write_escaped(f, true)?;
        f.write_str("\"")
    }
}
