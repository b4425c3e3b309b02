//! Grammar of SMTP command arguments ([RFC 5321 section 4.1.2](
//! https://datatracker.ietf.org/doc/html/rfc5321#section-4.1.2))

use std::str;

pub type Result<T, E = SyntaxError> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntaxError;

pub trait SliceExt<'a> {
    /// Advance this slice by `number` positions
    fn advance(&mut self, number: usize);

    /// Execute `f`, advancing `self` only if it succeeds
    fn atomic<T: 'a>(&mut self, f: impl FnOnce(&mut &'a [u8]) -> Result<T>) -> Result<T>;

    /// Return `Ok(())` and advance this slice if it begins with `needle`
    fn expect(&mut self, needle: &[u8]) -> Result<()>;

    /// Return `Ok(())` and advance this slice if it begins (case insensitive)
    /// with `needle`
    fn expect_caseless(&mut self, needle: &[u8]) -> Result<()>;

    /// Return `Ok(())` if this slice is empty
    fn expect_empty(&self) -> Result<()>;

    /// Return longest prefix whose characters match `test`, advancing this
    /// slice by its length
    fn take_while(&mut self, test: impl FnMut(u8, usize) -> bool) -> &'a [u8];

    /// Run `f` and return the part of this slice it consumed
    fn recognize(&mut self, f: impl FnOnce(&mut &'a [u8]) -> Result<()>) -> Result<&'a [u8]>;
}

impl<'a> SliceExt<'a> for &'a [u8] {
    fn atomic<T: 'a>(&mut self, f: impl FnOnce(&mut &'a [u8]) -> Result<T>) -> Result<T> {
        let mut cursor = *self;
        let value = f(&mut cursor)?;
        *self = cursor;
        Ok(value)
    }

    fn advance(&mut self, by: usize) {
        *self = &self[by..];
    }

    fn expect(&mut self, needle: &[u8]) -> Result<()> {
        if self.starts_with(needle) {
            self.advance(needle.len());
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn expect_caseless(&mut self, needle: &[u8]) -> Result<()> {
        if needle.len() <= self.len() && self[..needle.len()].eq_ignore_ascii_case(needle) {
            self.advance(needle.len());
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn expect_empty(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn take_while(&mut self, mut test: impl FnMut(u8, usize) -> bool) -> &'a [u8] {
        let mut offset = 0;

        while offset < self.len() && test(self[offset], offset) {
            offset += 1;
        }

        let result = &self[..offset];
        self.advance(offset);
        result
    }

    fn recognize(&mut self, f: impl FnOnce(&mut &'a [u8]) -> Result<()>) -> Result<&'a [u8]> {
        let start = *self;
        self.atomic(f)?;
        Ok(&start[..start.len() - self.len()])
    }
}

/// Split a command line into its verb and the remaining arguments
pub fn verb<'a>(line: &mut &'a [u8]) -> Result<&'a [u8]> {
    let verb = line.take_while(|c, _| c.is_ascii_alphanumeric());

    if verb.is_empty() || !(line.is_empty() || line[0] == b' ') {
        Err(SyntaxError)
    } else {
        Ok(verb)
    }
}

/// Skip one or more spaces
pub fn spaces(line: &mut &[u8]) -> Result<()> {
    if line.take_while(|c, _| c == b' ').is_empty() {
        Err(SyntaxError)
    } else {
        Ok(())
    }
}

/// Remaining argument text after a separating space, with surrounding
/// whitespace removed; `None` if there is no argument.
pub fn argument<'a>(line: &mut &'a [u8]) -> Result<Option<&'a str>> {
    let rest = str::from_utf8(*line).map_err(|_| SyntaxError)?.trim();
    line.advance(line.len());
    Ok(Some(rest).filter(|rest| !rest.is_empty()))
}

/// `"MAIL FROM:" Reverse-path`, returns the address (empty for `<>`)
pub fn reverse_path<'a>(line: &mut &'a [u8]) -> Result<&'a str> {
    // Reverse-path = Path / "<>"
    if line.expect(b"<>").is_ok() {
        return Ok("");
    }

    path(line, false)
}

/// `"RCPT TO:" Forward-path`, returns the address
pub fn forward_path<'a>(line: &mut &'a [u8]) -> Result<&'a str> {
    // Forward-path = Path / "<Postmaster>"
    path(line, true)
}

fn path<'a>(line: &mut &'a [u8], allow_postmaster: bool) -> Result<&'a str> {
    // Path = "<" [ A-d-l ":" ] Mailbox ">"
    line.atomic(|line| {
        line.expect(b"<")?;

        // A-d-l     = At-domain *( "," At-domain )
        // At-domain = "@" Domain
        // Source routes are accepted and ignored (RFC 5321 appendix C)
        if line.starts_with(b"@") {
            loop {
                line.expect(b"@")?;
                domain(line)?;

                if line.expect(b":").is_ok() {
                    break;
                }
                line.expect(b",")?;
            }
        }

        let mailbox = match line.recognize(mailbox) {
            Ok(mailbox) => mailbox,
            Err(_) if allow_postmaster => {
                let local = line.take_while(|c, _| c != b'>');
                if !local.eq_ignore_ascii_case(b"postmaster") {
                    return Err(SyntaxError);
                }
                local
            }
            Err(err) => return Err(err),
        };
        line.expect(b">")?;

        str::from_utf8(mailbox).map_err(|_| SyntaxError)
    })
}

fn mailbox(line: &mut &[u8]) -> Result<()> {
    // Mailbox    = Local-part "@" ( Domain / address-literal )
    // Local-part = Dot-string / Quoted-string
    quoted_string(line).or_else(|_| dot_string(line))?;
    line.expect(b"@")?;
    domain(line).or_else(|_| address_literal(line))
}

/// Characters allowed in an atom; anything outside ASCII is accepted as
/// UTF-8 (RFC 6531)
fn is_atext(c: u8) -> bool {
    match c {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'/' | b'=' | b'?' |
        b'^' | b'_' | b'`' | b'{' | b'|' | b'}' | b'~' => true,
        _ => c.is_ascii_alphanumeric() || c >= 0x80,
    }
}

fn atom(line: &mut &[u8]) -> Result<()> {
    // Atom = 1*atext
    if line.take_while(|c, _| is_atext(c)).is_empty() {
        Err(SyntaxError)
    } else {
        Ok(())
    }
}

fn dot_string(line: &mut &[u8]) -> Result<()> {
    // Dot-string = Atom *("."  Atom)
    line.atomic(|line| {
        atom(line)?;
        while line.expect(b".").is_ok() {
            atom(line)?;
        }
        Ok(())
    })
}

fn quoted_string(line: &mut &[u8]) -> Result<()> {
    // Quoted-string = DQUOTE *QcontentSMTP DQUOTE
    line.atomic(|line| {
        line.expect(b"\"")?;

        // QcontentSMTP    = qtextSMTP / quoted-pairSMTP
        // qtextSMTP       = %d32-33 / %d35-91 / %d93-126
        // quoted-pairSMTP = %d92 %d32-126
        let mut escaped = false;
        line.take_while(|c, _| match c {
            _ if escaped => {
                escaped = false;
                (32..=126).contains(&c)
            }
            b'\\' => {
                escaped = true;
                true
            }
            b'"' => false,
            _ => matches!(c, 32..=126) || c >= 0x80,
        });

        if escaped {
            return Err(SyntaxError);
        }

        line.expect(b"\"")
    })
}

fn domain(line: &mut &[u8]) -> Result<()> {
    // Domain     = sub-domain *("." sub-domain)
    // sub-domain = Let-dig [Ldh-str]
    line.atomic(|line| {
        loop {
            let label = line.take_while(|c, _| c.is_ascii_alphanumeric() || c == b'-' || c >= 0x80);

            if label.is_empty() || label.starts_with(b"-") || label.ends_with(b"-") {
                return Err(SyntaxError);
            }

            if line.expect(b".").is_err() {
                return Ok(());
            }
        }
    })
}

fn address_literal(line: &mut &[u8]) -> Result<()> {
    // address-literal = "[" ( IPv4-address-literal / IPv6-address-literal /
    //                   General-address-literal ) "]"
    line.atomic(|line| {
        line.expect(b"[")?;
        let literal = line.take_while(|c, _| matches!(c, 33..=90 | 94..=126));
        if literal.is_empty() {
            return Err(SyntaxError);
        }
        line.expect(b"]")
    })
}

/// ESMTP parameter from a MAIL or RCPT command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    /// Keyword, upper-cased
    pub keyword: String,
    pub value: Option<String>,
}

/// `*(SP esmtp-param)` trailing a path
pub fn parameters(line: &mut &[u8]) -> Result<Vec<Parameter>> {
    // esmtp-param   = esmtp-keyword ["=" esmtp-value]
    // esmtp-keyword = (ALPHA / DIGIT) *(ALPHA / DIGIT / "-")
    // esmtp-value   = 1*(%d33-60 / %d62-126)
    let mut parameters = vec![];

    loop {
        line.take_while(|c, _| c == b' ');
        if line.is_empty() {
            return Ok(parameters);
        }

        let keyword = line.take_while(|c, inx| c.is_ascii_alphanumeric() || c == b'-' && inx > 0);
        if keyword.is_empty() {
            return Err(SyntaxError);
        }

        let value = if line.expect(b"=").is_ok() {
            let value = line.take_while(|c, _| matches!(c, 33..=60 | 62..=126) || c >= 0x80);
            if value.is_empty() {
                return Err(SyntaxError);
            }
            Some(str::from_utf8(value).map_err(|_| SyntaxError)?.to_owned())
        } else {
            None
        };

        if !line.is_empty() && line[0] != b' ' {
            return Err(SyntaxError);
        }

        parameters.push(Parameter {
            keyword: str::from_utf8(keyword).map_err(|_| SyntaxError)?.to_ascii_uppercase(),
            value,
        });
    }
}
