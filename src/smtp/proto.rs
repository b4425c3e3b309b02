//! SMTP protocol state machine

use std::{fmt, mem, net::SocketAddr};

use crate::{
    auth::{AuthResult, Mechanism},
    config,
    delivery::Envelope,
    keywords,
    util,
};
use super::{
    framer::Line,
    reply::Reply,
    sasl::{self, Credential, DecodeError},
    syntax::{self, Parameter, SliceExt},
};

keywords! {
    enum Verb {
        Hello = "HELO",
        Extended = "EHLO",
        Mail = "MAIL",
        Recipient = "RCPT",
        Data = "DATA",
        Reset = "RSET",
        Verify = "VRFY",
        Expand = "EXPN",
        Help = "HELP",
        Noop = "NOOP",
        Quit = "QUIT",
        Auth = "AUTH",
    }
}

enum Command<'a> {
    Hello(Hello<'a>),
    Mail(Mail<'a>),
    Recipient(Recipient<'a>),
    Data,
    Reset,
    Verify,
    Expand,
    Help,
    Noop,
    Quit,
    Auth(Auth<'a>),
}

struct Hello<'a> {
    /// Is this an Extended HELO (EHLO)?
    extended: bool,
    client: &'a str,
}

struct Mail<'a> {
    from: &'a str,
    parameters: Vec<Parameter>,
}

struct Recipient<'a> {
    to: &'a str,
    parameters: Vec<Parameter>,
}

struct Auth<'a> {
    mechanism: &'a [u8],
    initial_response: Option<&'a [u8]>,
}

impl<'a> Command<'a> {
    /// Parse a command line (without its terminator). Errors are returned
    /// as the reply to send.
    fn parse(mut line: &'a [u8]) -> Result<Self, Reply> {
        if line.trim_ascii().is_empty() {
            return Err(Reply::new(500, "Error: bad syntax"));
        }

        let whole = line;
        let verb = match syntax::verb(&mut line).ok().and_then(Verb::from_keyword) {
            Some(verb) => verb,
            None => {
                let word = whole.split(|&c| c == b' ').next().unwrap_or_default();
                return Err(Reply::new(500,
                    format!("Error: command \"{}\" not recognized", util::maybe_ascii(word))));
            }
        };

        let syntax_error = |usage: &'static str| Reply::new(501, usage);

        let command = match verb {
            Verb::Hello | Verb::Extended => {
                let extended = verb == Verb::Extended;
                let client = syntax::argument(&mut line).ok().flatten().ok_or_else(|| {
                    syntax_error(if extended { "Syntax: EHLO hostname" } else { "Syntax: HELO hostname" })
                })?;
                Command::Hello(Hello { extended, client })
            }
            Verb::Mail => Command::parse_mail(&mut line)
                .map_err(|_| syntax_error("Syntax: MAIL FROM: <address>"))?,
            Verb::Recipient => Command::parse_rcpt(&mut line)
                .map_err(|_| syntax_error("Syntax: RCPT TO: <address>"))?,
            Verb::Data => Command::no_arguments(line, Command::Data, "Syntax: DATA")?,
            Verb::Reset => Command::no_arguments(line, Command::Reset, "Syntax: RSET")?,
            Verb::Quit => Command::no_arguments(line, Command::Quit, "Syntax: QUIT")?,
            Verb::Verify => match syntax::argument(&mut line) {
                Ok(Some(_)) => Command::Verify,
                _ => return Err(syntax_error("Syntax: VRFY <address>")),
            },
            Verb::Expand => Command::Expand,
            Verb::Help => Command::Help,
            Verb::Noop => Command::Noop,
            Verb::Auth => Command::parse_auth(&mut line)?,
        };

        Ok(command)
    }

    fn no_arguments(line: &[u8], command: Self, usage: &'static str) -> Result<Self, Reply> {
        match line.trim_ascii().expect_empty() {
            Ok(()) => Ok(command),
            Err(_) => Err(Reply::new(501, usage)),
        }
    }

    fn parse_mail(line: &mut &'a [u8]) -> syntax::Result<Self> {
        line.expect_caseless(b" FROM:")?;
        line.take_while(|c, _| c == b' ');
        let from = syntax::reverse_path(line)?;
        let parameters = syntax::parameters(line)?;
        Ok(Command::Mail(Mail { from, parameters }))
    }

    fn parse_rcpt(line: &mut &'a [u8]) -> syntax::Result<Self> {
        line.expect_caseless(b" TO:")?;
        line.take_while(|c, _| c == b' ');
        let to = syntax::forward_path(line)?;
        let parameters = syntax::parameters(line)?;
        Ok(Command::Recipient(Recipient { to, parameters }))
    }

    fn parse_auth(line: &mut &'a [u8]) -> Result<Self, Reply> {
        if syntax::spaces(line).is_err() {
            return Err(Reply::new(501, "Not enough value"));
        }

        let mechanism = line.take_while(|c, _| c != b' ');
        line.take_while(|c, _| c == b' ');
        let initial_response = line.take_while(|c, _| c != b' ');
        let rest = line.trim_ascii();

        if mechanism.is_empty() {
            Err(Reply::new(501, "Not enough value"))
        } else if !rest.is_empty() {
            Err(Reply::new(501, "Too many values"))
        } else {
            Ok(Command::Auth(Auth {
                mechanism,
                initial_response: Some(initial_response).filter(|r| !r.is_empty()),
            }))
        }
    }
}

/// Render a client line for logs. Whatever follows the mechanism of an
/// `AUTH` command is hidden.
pub fn loggable(line: &[u8]) -> Loggable<'_> {
    Loggable(line)
}

pub struct Loggable<'a>(&'a [u8]);

impl fmt::Display for Loggable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut rest = self.0;

        if syntax::verb(&mut rest).ok().and_then(Verb::from_keyword) != Some(Verb::Auth) {
            return write!(f, "{}", util::maybe_ascii(self.0));
        }

        rest.take_while(|c, _| c == b' ');
        match Mechanism::from_keyword(rest.take_while(|c, _| c != b' ')) {
            Some(mechanism) => write!(f, "AUTH {mechanism} <credentials>"),
            None => f.write_str("AUTH <credentials>"),
        }
    }
}

/// State of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a command
    Command,
    /// Waiting for the PLAIN response
    AuthPlainPending,
    /// Waiting for the LOGIN username
    AuthLoginUserPending,
    /// Waiting for the LOGIN password
    AuthLoginPassPending { login: String },
    /// Receiving message text
    Data,
    /// Client has quit
    Closed,
}

/// What the session driver has to do after a line was processed
#[derive(Debug)]
pub enum Action {
    /// Send a reply
    Reply(Reply),
    /// Verify credentials and report back with [`Connection::authenticated`]
    Authenticate { mechanism: Mechanism, credential: Credential },
    /// Pass a finished message to the sink; its verdict is the reply
    Deliver(Envelope),
    /// Send a reply and close the connection
    Close(Reply),
}

/// Reason to refuse a message once its text has been received
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataError {
    LineTooLong,
    TooMuchData,
}

/// One SMTP session
pub struct Connection {
    config: config::Smtp,
    peer: SocketAddr,
    state: SessionState,
    /// Client name given in HELO/EHLO
    seen_greeting: Option<String>,
    extended_smtp: bool,
    authenticated: Option<String>,
    mail_from: Option<String>,
    mail_options: Vec<Parameter>,
    rcpt_tos: Vec<String>,
    rcpt_options: Vec<Vec<Parameter>>,
    /// Message text received so far
    received: Vec<u8>,
    data_bytes: usize,
    data_error: Option<DataError>,
}

impl Connection {
    pub fn new(config: config::Smtp, peer: SocketAddr) -> Self {
        Connection {
            config,
            peer,
            state: SessionState::Command,
            seen_greeting: None,
            extended_smtp: false,
            authenticated: None,
            mail_from: None,
            mail_options: vec![],
            rcpt_tos: vec![],
            rcpt_options: vec![],
            received: vec![],
            data_bytes: 0,
            data_error: None,
        }
    }

    /// Reply sent as soon as the client connects
    pub fn connect(&self) -> Reply {
        Reply::new(220, format!("{} ESMTP {} {}",
            self.config.hostname, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Identity established with AUTH
    pub fn identity(&self) -> Option<&str> {
        self.authenticated.as_deref()
    }

    /// Is the next line part of an AUTH exchange?
    pub fn awaiting_credentials(&self) -> bool {
        matches!(self.state, SessionState::AuthPlainPending
            | SessionState::AuthLoginUserPending
            | SessionState::AuthLoginPassPending { .. })
    }

    /// Longest line accepted in the current state, terminator included
    pub fn line_limit(&self) -> usize {
        match self.state {
            SessionState::Data => self.config.line_length_limit,
            _ => self.config.command_size_limit,
        }
    }

    /// Process one line received from the client
    pub fn line(&mut self, line: Line) -> Option<Action> {
        match mem::replace(&mut self.state, SessionState::Command) {
            SessionState::Data => {
                self.state = SessionState::Data;
                self.data_line(line)
            }
            SessionState::Closed => {
                self.state = SessionState::Closed;
                None
            }
            _ if line == Line::TooLong => Some(Action::Reply(Reply::new(500, "Error: line too long"))),
            SessionState::Command => match line {
                Line::Complete(line) => self.command(&line),
                Line::TooLong => None,
            },
            pending => match line {
                Line::Complete(line) => self.auth_response(pending, &line),
                Line::TooLong => None,
            },
        }
    }

    /// Report outcome of an authentication requested with
    /// [`Action::Authenticate`]
    pub fn authenticated(&mut self, result: AuthResult) -> Reply {
        if result.success {
            let identity = result.identity.unwrap_or_default();
            log::info!("{}: authenticated as {identity}", self.peer);
            self.authenticated = Some(identity);
            Reply::new(235, "Accepted")
        } else if result.handled {
            log::debug!("{}: authenticator refused the mechanism", self.peer);
            Reply::new(500, "Error: mechanism not supported")
        } else {
            log::warn!("{}: authentication failed", self.peer);
            Reply::new(535, "Username and Password not accepted")
        }
    }

    fn command(&mut self, line: &[u8]) -> Option<Action> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(reply) => {
                log::debug!("{}: rejected \"{}\": {}", self.peer, loggable(line), reply.code());
                return Some(Action::Reply(reply));
            }
        };

        let reply = match command {
            Command::Hello(hello) => self.hello(hello),
            Command::Mail(mail) => self.mail(mail),
            Command::Recipient(recipient) => self.recipient(recipient),
            Command::Data => self.data(),
            Command::Reset => {
                self.reset_transaction();
                Reply::ok()
            }
            Command::Verify => {
                Reply::new(252, "Cannot VRFY user, but will accept message and attempt delivery")
            }
            Command::Expand => Reply::new(502, "EXPN not implemented"),
            Command::Help => {
                let verbs: Vec<_> = Verb::ALL.iter().map(|verb| verb.keyword()).collect();
                Reply::new(250, format!("Supported commands: {}", verbs.join(" ")))
            }
            Command::Noop => Reply::ok(),
            Command::Quit => {
                self.state = SessionState::Closed;
                return Some(Action::Close(Reply::new(221, "Bye")));
            }
            Command::Auth(auth) => return Some(self.auth(auth)),
        };

        Some(Action::Reply(reply))
    }

    fn hello(&mut self, Hello { extended, client }: Hello) -> Reply {
        if self.seen_greeting.is_some() {
            return Reply::new(503, "Duplicate HELO/EHLO");
        }

        self.reset_transaction();
        self.seen_greeting = Some(client.to_owned());
        self.extended_smtp = extended;
        log::debug!("{}: client introduced itself as {client}", self.peer);

        if !extended {
            return Reply::new(250, self.config.hostname.clone());
        }

        let mut lines = vec![self.config.hostname.clone()];
        lines.push(match self.config.data_size_limit {
            0 => "SIZE".to_owned(),
            limit => format!("SIZE {limit}"),
        });
        lines.push("8BITMIME".to_owned());
        if self.config.enable_smtputf8 {
            lines.push("SMTPUTF8".to_owned());
        }
        let mechanisms: Vec<_> = self.mechanisms().map(Mechanism::keyword).collect();
        lines.push(format!("AUTH {}", mechanisms.join(" ")));
        lines.push("HELP".to_owned());

        Reply::multiline(250, lines)
    }

    fn mail(&mut self, Mail { from, parameters }: Mail) -> Reply {
        if self.seen_greeting.is_none() {
            return Reply::new(503, "Error: send HELO first");
        }

        if self.config.auth_required && self.authenticated.is_none() {
            return Reply::new(530, "5.7.0 Authentication required");
        }

        if self.mail_from.is_some() {
            return Reply::new(503, "Error: nested MAIL command");
        }

        if !parameters.is_empty() && !self.extended_smtp {
            return Reply::new(501, "Syntax: MAIL FROM: <address>");
        }

        for parameter in &parameters {
            let value = parameter.value.as_deref();

            match (parameter.keyword.as_str(), value) {
                ("SIZE", Some(size)) => match size.parse::<usize>() {
                    Ok(size) if self.config.data_size_limit > 0
                        && size > self.config.data_size_limit => {
                        return Reply::new(552,
                            "Error: message size exceeds fixed maximum message size");
                    }
                    Ok(_) => {}
                    Err(_) => return Reply::new(501, "Syntax: MAIL FROM: <address> [SP <mail-parameters>]"),
                },
                ("BODY", Some(body))
                    if body.eq_ignore_ascii_case("7BIT") || body.eq_ignore_ascii_case("8BITMIME") => {}
                ("BODY", _) => return Reply::new(501, "Error: BODY can only be one of 7BIT, 8BITMIME"),
                ("SMTPUTF8", None) if self.config.enable_smtputf8 => {}
                _ => return Reply::new(555, "MAIL FROM parameters not recognized or not implemented"),
            }
        }

        log::debug!("{}: sender {from:?}", self.peer);
        self.mail_from = Some(from.to_owned());
        self.mail_options = parameters;
        Reply::ok()
    }

    fn recipient(&mut self, Recipient { to, parameters }: Recipient) -> Reply {
        if self.seen_greeting.is_none() {
            return Reply::new(503, "Error: send HELO first");
        }

        if self.mail_from.is_none() {
            return Reply::new(503, "Error: need MAIL command");
        }

        if !parameters.is_empty() {
            return Reply::new(555, "RCPT TO parameters not recognized or not implemented");
        }

        log::debug!("{}: recipient {to:?}", self.peer);
        self.rcpt_tos.push(to.to_owned());
        self.rcpt_options.push(parameters);
        Reply::ok()
    }

    fn data(&mut self) -> Reply {
        if self.mail_from.is_none() || self.rcpt_tos.is_empty() {
            return Reply::new(503, "Bad sequence of commands");
        }

        self.state = SessionState::Data;
        self.received.clear();
        self.data_bytes = 0;
        self.data_error = None;
        Reply::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    fn data_line(&mut self, line: Line) -> Option<Action> {
        let line = match line {
            Line::Complete(line) => line,
            Line::TooLong => {
                self.data_error.get_or_insert(DataError::LineTooLong);
                self.received = vec![];
                return None;
            }
        };

        if line == b"." {
            return Some(self.end_of_data());
        }

        if self.data_error.is_some() {
            return None;
        }

        // RFC 5321 section 4.5.2
        let text = line.strip_prefix(b".").unwrap_or(&line[..]);
        let size = text.len() + 1;
        let limit = self.config.data_size_limit;

        if limit > 0 && self.data_bytes + size > limit {
            log::debug!("{}: message exceeds {limit} bytes", self.peer);
            self.data_error = Some(DataError::TooMuchData);
            self.received = vec![];
            return None;
        }

        self.data_bytes += size;
        self.received.extend_from_slice(text);
        self.received.push(b'\n');
        None
    }

    fn end_of_data(&mut self) -> Action {
        self.state = SessionState::Command;
        let content = mem::take(&mut self.received);
        self.data_bytes = 0;

        // The transaction stays open, the client may retry with a smaller
        // message or RSET
        match self.data_error.take() {
            Some(DataError::LineTooLong) => {
                return Action::Reply(Reply::new(500, "Error: line too long"));
            }
            Some(DataError::TooMuchData) => {
                return Action::Reply(Reply::new(552, "Error: Too much mail data"));
            }
            None => {}
        }

        Action::Deliver(Envelope {
            mail_from: self.mail_from.take().unwrap_or_default(),
            rcpt_tos: mem::take(&mut self.rcpt_tos),
            content,
            mail_options: mem::take(&mut self.mail_options),
            rcpt_options: mem::take(&mut self.rcpt_options),
        })
    }

    fn reset_transaction(&mut self) {
        self.mail_from = None;
        self.mail_options.clear();
        self.rcpt_tos.clear();
        self.rcpt_options.clear();
        self.received.clear();
        self.data_bytes = 0;
        self.data_error = None;
    }

    /// Mechanisms advertised and accepted
    fn mechanisms(&self) -> impl Iterator<Item = Mechanism> + '_ {
        Mechanism::ALL.iter()
            .copied()
            .filter(|&mechanism| mechanism != Mechanism::Login || self.config.auth_login)
    }

    fn auth(&mut self, Auth { mechanism, initial_response }: Auth) -> Action {
        let reply = |code: u16, text: &'static str| Action::Reply(Reply::new(code, text));

        if !self.extended_smtp {
            return reply(503, "Error: send EHLO first");
        }

        if self.authenticated.is_some() {
            return reply(503, "Already authenticated");
        }

        if self.mail_from.is_some() {
            return reply(503, "Error: AUTH not permitted during a mail transaction");
        }

        let mechanism = match Mechanism::from_keyword(mechanism)
            .filter(|&m| self.mechanisms().any(|offered| offered == m))
        {
            Some(mechanism) => mechanism,
            None => {
                log::debug!("{}: AUTH {} not supported", self.peer, util::maybe_ascii(mechanism));
                return reply(500, "Error: mechanism not supported");
            }
        };

        // A single "=" stands for an empty initial response (RFC 4954)
        let initial_response = initial_response.map(|r| if r == b"=" { &b""[..] } else { r });

        match (mechanism, initial_response) {
            (Mechanism::Plain, None) => {
                self.state = SessionState::AuthPlainPending;
                Action::Reply(Reply::new(334, ""))
            }
            (Mechanism::Plain, Some(response)) => self.finish_plain(response),
            (Mechanism::Login, None) => {
                self.state = SessionState::AuthLoginUserPending;
                Action::Reply(Reply::new(334, sasl::LOGIN_USERNAME_PROMPT))
            }
            (Mechanism::Login, Some(response)) => self.login_username(response),
        }
    }

    fn auth_response(&mut self, pending: SessionState, line: &[u8]) -> Option<Action> {
        let line = line.trim_ascii();

        if line == b"*" {
            return Some(Action::Reply(Reply::new(501, "Auth aborted")));
        }

        // Let a confused client get out of the exchange
        if line.eq_ignore_ascii_case(b"RSET") || line.eq_ignore_ascii_case(b"QUIT") {
            log::debug!("{}: AUTH abandoned", self.peer);
            return self.command(line);
        }

        Some(match pending {
            SessionState::AuthPlainPending => self.finish_plain(line),
            SessionState::AuthLoginUserPending => self.login_username(line),
            SessionState::AuthLoginPassPending { login } => match sasl::decode_login_step(line) {
                Ok(password) => Action::Authenticate {
                    mechanism: Mechanism::Login,
                    credential: Credential { authzid: String::new(), authcid: login, password },
                },
                Err(err) => self.malformed_credentials(Mechanism::Login, err),
            },
            // Only pending states get here
            _ => return None,
        })
    }

    fn finish_plain(&mut self, response: &[u8]) -> Action {
        match sasl::decode_plain(response) {
            Ok(credential) => Action::Authenticate { mechanism: Mechanism::Plain, credential },
            Err(err) => self.malformed_credentials(Mechanism::Plain, err),
        }
    }

    fn login_username(&mut self, response: &[u8]) -> Action {
        match sasl::decode_login_step(response) {
            Ok(login) => {
                self.state = SessionState::AuthLoginPassPending { login };
                Action::Reply(Reply::new(334, sasl::LOGIN_PASSWORD_PROMPT))
            }
            Err(err) => self.malformed_credentials(Mechanism::Login, err),
        }
    }

    fn malformed_credentials(&mut self, mechanism: Mechanism, err: DecodeError) -> Action {
        log::debug!("{}: malformed AUTH {mechanism} response: {err}", self.peer);
        self.state = SessionState::Command;
        Action::Reply(Reply::new(535, "5.7.8 Authentication credentials invalid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        connection_with(config::Smtp::default())
    }

    fn connection_with(config: config::Smtp) -> Connection {
        Connection::new(config, "127.0.0.1:40000".parse().unwrap())
    }

    fn send(smtp: &mut Connection, line: &str) -> Option<Action> {
        smtp.line(Line::Complete(line.as_bytes().to_vec()))
    }

    /// Send a line expecting a plain reply, return its code
    fn code(smtp: &mut Connection, line: &str) -> u16 {
        match send(smtp, line) {
            Some(Action::Reply(reply)) | Some(Action::Close(reply)) => reply.code(),
            other => panic!("unexpected action for {line:?}: {other:?}"),
        }
    }

    fn reply(smtp: &mut Connection, line: &str) -> String {
        match send(smtp, line) {
            Some(Action::Reply(reply)) | Some(Action::Close(reply)) => reply.to_string(),
            other => panic!("unexpected action for {line:?}: {other:?}"),
        }
    }

    fn transaction(smtp: &mut Connection) {
        assert_eq!(code(smtp, "EHLO test"), 250);
        assert_eq!(code(smtp, "MAIL FROM:<a@x>"), 250);
        assert_eq!(code(smtp, "RCPT TO:<b@y>"), 250);
    }

    fn deliver(smtp: &mut Connection, lines: &[&str]) -> Envelope {
        assert_eq!(code(smtp, "DATA"), 354);
        for line in lines {
            assert!(send(smtp, line).is_none(), "reply to data line {line:?}");
        }
        match send(smtp, ".") {
            Some(Action::Deliver(envelope)) => envelope,
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    fn plain(data: &[u8]) -> String {
        base64::encode(data)
    }

    #[test]
    fn greeting_names_server() {
        let smtp = connection();
        let greeting = smtp.connect().to_string();
        assert!(greeting.starts_with("220 localhost ESMTP smtp-mock-server "), "{greeting}");
    }

    #[test]
    fn loggable_hides_auth_arguments() {
        let show = |line: &[u8]| loggable(line).to_string();
        assert_eq!(show(b"auth plain AGZvbwBiYXI="), "AUTH PLAIN <credentials>");
        assert_eq!(show(b"AUTH LOGIN Zm9v"), "AUTH LOGIN <credentials>");
        assert_eq!(show(b"AUTH PLAIN a b"), "AUTH PLAIN <credentials>");
        assert_eq!(show(b"AUTH AGZvbwBiYXI="), "AUTH <credentials>");
        assert_eq!(show(b"MAIL FROM:<a@x>"), "MAIL FROM:<a@x>");
        assert_eq!(show(b"AUTHX PLAIN"), "AUTHX PLAIN");
    }

    #[test]
    fn bare_commands_refuse_arguments() {
        let mut smtp = connection();
        assert_eq!(reply(&mut smtp, "DATA now"), "501 Syntax: DATA\r\n");
        assert_eq!(reply(&mut smtp, "RSET all"), "501 Syntax: RSET\r\n");
        assert_eq!(reply(&mut smtp, "QUIT please"), "501 Syntax: QUIT\r\n");
        assert!(!smtp.is_closed());
        assert_eq!(code(&mut smtp, "RSET  "), 250);
    }

    #[test]
    fn ehlo_advertises_extensions() {
        let mut smtp = connection();
        assert_eq!(reply(&mut smtp, "EHLO test"), "250-localhost\r\n250-SIZE 33554432\r\n\
            250-8BITMIME\r\n250-SMTPUTF8\r\n250-AUTH PLAIN LOGIN\r\n250 HELP\r\n");
    }

    #[test]
    fn ehlo_respects_configuration() {
        let mut smtp = connection_with(config::Smtp {
            data_size_limit: 0,
            enable_smtputf8: false,
            auth_login: false,
            ..config::Smtp::default()
        });
        assert_eq!(reply(&mut smtp, "ehlo test"),
            "250-localhost\r\n250-SIZE\r\n250-8BITMIME\r\n250-AUTH PLAIN\r\n250 HELP\r\n");
    }

    #[test]
    fn helo_is_not_extended() {
        let mut smtp = connection();
        assert_eq!(reply(&mut smtp, "HELO test"), "250 localhost\r\n");
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> SIZE=10"), 501);
        assert_eq!(code(&mut smtp, "AUTH PLAIN"), 503);
    }

    #[test]
    fn greeting_requires_hostname() {
        let mut smtp = connection();
        assert_eq!(reply(&mut smtp, "EHLO"), "501 Syntax: EHLO hostname\r\n");
        assert_eq!(reply(&mut smtp, "HELO  "), "501 Syntax: HELO hostname\r\n");
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
    }

    #[test]
    fn duplicate_greeting_changes_nothing() {
        for second in ["EHLO test", "HELO other.example", "ehlo [127.0.0.1]"] {
            let mut smtp = connection();
            transaction(&mut smtp);

            assert_eq!(reply(&mut smtp, second), "503 Duplicate HELO/EHLO\r\n");
            assert_eq!(smtp.mail_from.as_deref(), Some("a@x"));
            assert_eq!(smtp.rcpt_tos, ["b@y"]);
            assert!(smtp.extended_smtp);
            assert_eq!(smtp.state(), &SessionState::Command);
        }
    }

    #[test]
    fn complete_transaction() {
        let mut smtp = connection();
        transaction(&mut smtp);

        let envelope = deliver(&mut smtp, &["hello"]);
        assert_eq!(envelope.mail_from, "a@x");
        assert_eq!(envelope.rcpt_tos, ["b@y"]);
        assert_eq!(envelope.content, b"hello\n");

        // Transaction is over, a new one may start
        assert!(smtp.mail_from.is_none());
        assert!(smtp.rcpt_tos.is_empty());
        assert_eq!(code(&mut smtp, "RCPT TO:<b@y>"), 503);
        assert_eq!(code(&mut smtp, "MAIL FROM:<c@x>"), 250);
    }

    #[test]
    fn multiple_recipients_keep_order() {
        let mut smtp = connection();
        transaction(&mut smtp);
        assert_eq!(code(&mut smtp, "rcpt to: <c@z>"), 250);
        assert_eq!(code(&mut smtp, "RCPT TO:<Postmaster>"), 250);

        let envelope = deliver(&mut smtp, &["x"]);
        assert_eq!(envelope.rcpt_tos, ["b@y", "c@z", "Postmaster"]);
        assert_eq!(envelope.rcpt_options.len(), 3);
    }

    #[test]
    fn dot_transparency() {
        let mut smtp = connection();
        transaction(&mut smtp);

        let envelope = deliver(&mut smtp, &["..", "...leading", "a.b", ""]);
        assert_eq!(envelope.content, b".\n..leading\na.b\n\n");
    }

    #[test]
    fn data_requires_mail_and_recipient() {
        let mut smtp = connection();
        assert_eq!(reply(&mut smtp, "DATA"), "503 Bad sequence of commands\r\n");
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "DATA"), 503);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);
        assert_eq!(code(&mut smtp, "DATA"), 503);
        assert_eq!(smtp.state(), &SessionState::Command);
        assert_eq!(code(&mut smtp, "DATA now"), 501);
    }

    #[test]
    fn sequencing_errors() {
        let mut smtp = connection();
        assert_eq!(reply(&mut smtp, "MAIL FROM:<a@x>"), "503 Error: send HELO first\r\n");
        assert_eq!(code(&mut smtp, "RCPT TO:<b@y>"), 503);
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(reply(&mut smtp, "RCPT TO:<b@y>"), "503 Error: need MAIL command\r\n");
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);
        assert_eq!(reply(&mut smtp, "MAIL FROM:<a@x>"), "503 Error: nested MAIL command\r\n");
    }

    #[test]
    fn address_syntax() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(reply(&mut smtp, "MAIL FROM:a@x"), "501 Syntax: MAIL FROM: <address>\r\n");
        assert_eq!(code(&mut smtp, "MAIL TO:<a@x>"), 501);
        assert_eq!(code(&mut smtp, "MAIL FROM:<>"), 250);
        assert_eq!(smtp.mail_from.as_deref(), Some(""));
        assert_eq!(reply(&mut smtp, "RCPT TO:<>"), "501 Syntax: RCPT TO: <address>\r\n");
        assert_eq!(code(&mut smtp, "RCPT TO:<b@y> NOTIFY=NEVER"), 555);
    }

    #[test]
    fn mail_parameters() {
        let mut smtp = connection_with(config::Smtp { data_size_limit: 100, ..config::Smtp::default() });
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> SIZE=101"), 552);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> SIZE=many"), 501);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> BODY=BINARYMIME"), 501);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> RET=HDRS"), 555);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> SIZE=100 BODY=8bitmime SMTPUTF8"), 250);
        assert_eq!(smtp.mail_options.len(), 3);

        assert_eq!(code(&mut smtp, "RCPT TO:<b@y>"), 250);
        let envelope = deliver(&mut smtp, &["hi"]);
        assert_eq!(envelope.mail_options[1],
            Parameter { keyword: "BODY".into(), value: Some("8bitmime".into()) });
    }

    #[test]
    fn smtputf8_can_be_disabled() {
        let mut smtp = connection_with(config::Smtp { enable_smtputf8: false, ..config::Smtp::default() });
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x> SMTPUTF8"), 555);
    }

    #[test]
    fn reset_always_allows_new_transaction() {
        // Idle
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "RSET"), 250);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);

        // Mid transaction
        let mut smtp = connection();
        transaction(&mut smtp);
        assert_eq!(code(&mut smtp, "RSET"), 250);
        assert!(smtp.rcpt_tos.is_empty());
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);

        // Mid AUTH
        for mechanism in ["PLAIN", "LOGIN"] {
            let mut smtp = connection();
            assert_eq!(code(&mut smtp, "EHLO test"), 250);
            assert_eq!(code(&mut smtp, &format!("AUTH {mechanism}")), 334);
            assert_eq!(code(&mut smtp, "RSET"), 250);
            assert_eq!(smtp.state(), &SessionState::Command);
            assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);
        }

        // Post DATA
        let mut smtp = connection();
        transaction(&mut smtp);
        deliver(&mut smtp, &["hello"]);
        assert_eq!(code(&mut smtp, "RSET"), 250);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);
    }

    #[test]
    fn unknown_command() {
        let mut smtp = connection();
        transaction(&mut smtp);
        assert_eq!(reply(&mut smtp, "FOO bar"), "500 Error: command \"FOO\" not recognized\r\n");
        assert_eq!(code(&mut smtp, "MAIL:FROM"), 500);
        assert_eq!(reply(&mut smtp, "   "), "500 Error: bad syntax\r\n");
        assert_eq!(smtp.mail_from.as_deref(), Some("a@x"));
        assert_eq!(smtp.rcpt_tos, ["b@y"]);
    }

    #[test]
    fn overlong_command_line() {
        let mut smtp = connection();
        transaction(&mut smtp);
        match smtp.line(Line::TooLong) {
            Some(Action::Reply(reply)) => assert_eq!(reply.to_string(), "500 Error: line too long\r\n"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(smtp.rcpt_tos, ["b@y"]);
        assert_eq!(code(&mut smtp, "DATA"), 354);
    }

    #[test]
    fn miscellaneous_commands() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "NOOP"), 250);
        assert_eq!(code(&mut smtp, "NOOP whatever"), 250);
        assert_eq!(code(&mut smtp, "VRFY someone"), 252);
        assert_eq!(code(&mut smtp, "VRFY"), 501);
        assert_eq!(code(&mut smtp, "EXPN list"), 502);
        assert!(reply(&mut smtp, "HELP").starts_with("250 Supported commands: HELO EHLO MAIL"));
        assert_eq!(code(&mut smtp, "RSET now"), 501);
    }

    #[test]
    fn quit_closes() {
        let mut smtp = connection();
        match send(&mut smtp, "QUIT") {
            Some(Action::Close(reply)) => assert_eq!(reply.to_string(), "221 Bye\r\n"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(smtp.is_closed());
        assert!(send(&mut smtp, "NOOP").is_none());
    }

    #[test]
    fn data_over_limit_keeps_transaction() {
        let mut smtp = connection_with(config::Smtp { data_size_limit: 10, ..config::Smtp::default() });
        transaction(&mut smtp);

        assert_eq!(code(&mut smtp, "DATA"), 354);
        for line in ["12345", "67890", "more text"] {
            assert!(send(&mut smtp, line).is_none());
        }
        assert!(smtp.received.is_empty());
        assert_eq!(reply(&mut smtp, "."), "552 Error: Too much mail data\r\n");

        assert_eq!(smtp.state(), &SessionState::Command);
        assert_eq!(smtp.mail_from.as_deref(), Some("a@x"));
        assert_eq!(smtp.rcpt_tos, ["b@y"]);

        let envelope = deliver(&mut smtp, &["short"]);
        assert_eq!(envelope.content, b"short\n");
    }

    #[test]
    fn overlong_data_line_is_reported_at_end() {
        let mut smtp = connection();
        transaction(&mut smtp);

        assert_eq!(code(&mut smtp, "DATA"), 354);
        assert_eq!(smtp.line_limit(), 1001);
        assert!(send(&mut smtp, "fine").is_none());
        assert!(smtp.line(Line::TooLong).is_none());
        assert!(send(&mut smtp, "QUIT").is_none());
        assert_eq!(reply(&mut smtp, "."), "500 Error: line too long\r\n");
        assert_eq!(smtp.line_limit(), 512);
        assert_eq!(smtp.rcpt_tos, ["b@y"]);
    }

    fn expect_auth(action: Option<Action>) -> (Mechanism, Credential) {
        match action {
            Some(Action::Authenticate { mechanism, credential }) => (mechanism, credential),
            other => panic!("expected authentication, got {other:?}"),
        }
    }

    #[test]
    fn auth_plain_with_continuation() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(reply(&mut smtp, "AUTH PLAIN"), "334\r\n");
        assert!(smtp.awaiting_credentials());

        let (mechanism, credential) = expect_auth(send(&mut smtp, &plain(b"\0foo@example.org\0bar")));
        assert_eq!(mechanism, Mechanism::Plain);
        assert_eq!(credential.authzid, "");
        assert_eq!(credential.authcid, "foo@example.org");
        assert_eq!(credential.password, "bar");
        assert_eq!(smtp.state(), &SessionState::Command);

        let reply = smtp.authenticated(AuthResult::accepted("foo@example.org"));
        assert_eq!(reply.to_string(), "235 Accepted\r\n");
        assert_eq!(smtp.identity(), Some("foo@example.org"));
        assert_eq!(code(&mut smtp, "AUTH PLAIN"), 503);
    }

    #[test]
    fn auth_plain_initial_response() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        let line = format!("auth plain {}", plain(b"\0foo@example.org\0bar"));
        let (_, credential) = expect_auth(send(&mut smtp, &line));
        assert_eq!(credential.password, "bar");

        assert_eq!(smtp.authenticated(AuthResult::rejected()).to_string(),
            "535 Username and Password not accepted\r\n");
        assert_eq!(smtp.identity(), None);

        assert_eq!(code(&mut smtp, "AUTH PLAIN ="), 535);
        assert_eq!(code(&mut smtp, "AUTH PLAIN a b"), 501);
    }

    #[test]
    fn auth_plain_malformed() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);

        for response in [plain(b"foo\0bar"), "!!!".to_owned(), plain(b"\0\xff\0bar")] {
            assert_eq!(code(&mut smtp, "AUTH PLAIN"), 334);
            assert_eq!(code(&mut smtp, &response), 535);
            assert_eq!(smtp.state(), &SessionState::Command);
        }
    }

    #[test]
    fn auth_login_dialog() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(reply(&mut smtp, "AUTH LOGIN"), "334 VXNlcm5hbWU6\r\n");
        assert_eq!(reply(&mut smtp, &plain(b"foo@example.org")), "334 UGFzc3dvcmQ6\r\n");
        assert_eq!(smtp.state(),
            &SessionState::AuthLoginPassPending { login: "foo@example.org".into() });

        let (mechanism, credential) = expect_auth(send(&mut smtp, &plain(b"bar")));
        assert_eq!(mechanism, Mechanism::Login);
        assert_eq!(credential.authcid, "foo@example.org");
        assert_eq!(credential.password, "bar");
    }

    #[test]
    fn auth_login_initial_response_skips_username_prompt() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(reply(&mut smtp, &format!("AUTH LOGIN {}", plain(b"foo"))), "334 UGFzc3dvcmQ6\r\n");
        let (_, credential) = expect_auth(send(&mut smtp, &plain(b"bar")));
        assert_eq!(credential.authcid, "foo");
    }

    #[test]
    fn auth_can_be_cancelled() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "AUTH LOGIN"), 334);
        assert_eq!(code(&mut smtp, &plain(b"foo")), 334);
        assert_eq!(reply(&mut smtp, "*"), "501 Auth aborted\r\n");
        assert_eq!(smtp.state(), &SessionState::Command);
    }

    #[test]
    fn unsupported_mechanism() {
        let mut smtp = connection_with(config::Smtp { auth_login: false, ..config::Smtp::default() });
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(reply(&mut smtp, "AUTH CRAM-MD5"), "500 Error: mechanism not supported\r\n");
        assert_eq!(code(&mut smtp, "AUTH LOGIN"), 500);
        assert_eq!(code(&mut smtp, "AUTH"), 501);
        assert_eq!(smtp.state(), &SessionState::Command);

        // Authenticator refusing the mechanism gets the same answer
        assert!(matches!(send(&mut smtp, &format!("AUTH PLAIN {}", plain(b"\0a\0b"))),
            Some(Action::Authenticate { .. })));
        assert_eq!(smtp.authenticated(AuthResult::unsupported()).code(), 500);
    }

    #[test]
    fn auth_not_allowed_in_transaction() {
        let mut smtp = connection();
        transaction(&mut smtp);
        assert_eq!(code(&mut smtp, "AUTH PLAIN"), 503);
    }

    #[test]
    fn auth_required() {
        let mut smtp = connection_with(config::Smtp { auth_required: true, ..config::Smtp::default() });
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 530);

        expect_auth(send(&mut smtp, &format!("AUTH PLAIN {}", plain(b"\0a\0b"))));
        assert_eq!(smtp.authenticated(AuthResult::accepted("a")).code(), 235);
        assert_eq!(code(&mut smtp, "MAIL FROM:<a@x>"), 250);
    }

    #[test]
    fn overlong_auth_response_abandons_exchange() {
        let mut smtp = connection();
        assert_eq!(code(&mut smtp, "EHLO test"), 250);
        assert_eq!(code(&mut smtp, "AUTH PLAIN"), 334);
        match smtp.line(Line::TooLong) {
            Some(Action::Reply(reply)) => assert_eq!(reply.code(), 500),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(smtp.state(), &SessionState::Command);
    }
}
