use std::fmt;

use base64::{engine::general_purpose, Engine};

use super::{SmtpError, SmtpResult};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StatusCode {
    ServiceReady,
    ServiceClosingChannel,
    AuthSuccess,
    Okay,
    UserNotLocal,
    ServerChallenge,
    StartMailInput,
    ServiceNotAvailable,
    MailboxUnavailable,
    TempAuthFailure,
    AuthRequired,
    AuthMechWeak,
    AuthInvalidCred,
    AuthEncryptRequired,
    NoAccess,
    UserNotLocalError,
    MailBoxNameNotAllowed,
    TransactionFailed,
    Other(u32),
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        match code {
            220 => StatusCode::ServiceReady,
            221 => StatusCode::ServiceClosingChannel,
            235 => StatusCode::AuthSuccess,
            250 => StatusCode::Okay,
            251 => StatusCode::UserNotLocal,
            334 => StatusCode::ServerChallenge,
            354 => StatusCode::StartMailInput,
            421 => StatusCode::ServiceNotAvailable,
            450 => StatusCode::MailboxUnavailable,
            454 => StatusCode::TempAuthFailure,
            530 => StatusCode::AuthRequired,
            534 => StatusCode::AuthMechWeak,
            535 => StatusCode::AuthInvalidCred,
            538 => StatusCode::AuthEncryptRequired,
            550 => StatusCode::NoAccess,
            551 => StatusCode::UserNotLocalError,
            553 => StatusCode::MailBoxNameNotAllowed,
            554 => StatusCode::TransactionFailed,
            other => StatusCode::Other(other),
        }
    }
}

#[derive(Debug)]
pub struct Line {
    code: u32,
    text: String,
    last: bool,
}

impl Line {
    pub fn new(code: u32, text: String, last: bool) -> Line {
        Line { code, text, last }
    }

    pub fn expect(&self, code: StatusCode) -> SmtpResult<()> {
        if self.code() != code {
            Err(self.unexpected())
        } else {
            Ok(())
        }
    }
    pub fn unexpected(&self) -> SmtpError {
        SmtpError::Protocol {
            code: self.code,
            text: self.text.clone(),
        }
    }
    pub fn code(&self) -> StatusCode {
        StatusCode::from(self.code)
    }
    pub fn text(&self) -> &str {
        &self.text
    }
    pub fn last(&self) -> bool {
        self.last
    }
}

pub enum EhloLine {
    Pipelining,
    StartTls,
    EightBitMime,
    Auth,
}

impl EhloLine {
    pub fn keyword(&self) -> &'static str {
        match self {
            EhloLine::Pipelining => "PIPELINING",
            EhloLine::StartTls => "STARTTLS",
            EhloLine::EightBitMime => "8BITMIME",
            EhloLine::Auth => "AUTH",
        }
    }
}

pub enum AuthMech {
    Plain,
    Login,
}

impl AuthMech {
    pub fn keyword(&self) -> &'static str {
        match self {
            AuthMech::Plain => "PLAIN",
            AuthMech::Login => "LOGIN",
        }
    }
}

pub enum Command {
    Ehlo(String),
    Quit,
    StartTls,
    /// Sender, and whether the body is announced as `BODY=8BITMIME`.
    MailFrom(String, bool),
    RcptTo(String),
    Data,
    AuthPlain(String, String),
    AuthLogin,
}

impl Command {
    /// The command as it may appear in logs: credentials are masked.
    pub fn redacted(&self) -> String {
        match self {
            Command::AuthPlain(..) => "AUTH PLAIN ****\r\n".to_string(),
            other => other.to_string(),
        }
    }
}

pub fn get_auth_plain(username: &str, password: &str) -> String {
    let mut s = Vec::with_capacity(username.len() + password.len() + 2);
    s.push(0u8);
    s.extend_from_slice(username.as_bytes());
    s.push(0u8);
    s.extend_from_slice(password.as_bytes());
    general_purpose::STANDARD.encode(s)
}

pub fn get_auth_login(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Data => f.write_str("DATA")?,
            Command::Ehlo(me) => write!(f, "EHLO {}", me)?,
            Command::StartTls => f.write_str("STARTTLS")?,
            Command::Quit => f.write_str("QUIT")?,
            Command::MailFrom(from, false) => write!(f, "MAIL FROM:<{}>", from)?,
            Command::MailFrom(from, true) => write!(f, "MAIL FROM:<{}> BODY=8BITMIME", from)?,
            Command::RcptTo(to) => write!(f, "RCPT TO:<{}>", to)?,
            Command::AuthPlain(un, pw) => write!(f, "AUTH PLAIN {}", get_auth_plain(un, pw))?,
            Command::AuthLogin => f.write_str("AUTH LOGIN")?,
        }
        f.write_str("\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_plain_encodes_nul_separated_credentials() {
        // base64("\0user\0pass")
        assert_eq!(get_auth_plain("user", "pass"), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn auth_plain_keeps_utf8_bytes() {
        let encoded = get_auth_plain("ü", "p");
        let decoded = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"\0\xc3\xbc\0p");
    }

    #[test]
    fn commands_end_with_crlf() {
        assert_eq!(Command::Ehlo("me".into()).to_string(), "EHLO me\r\n");
        assert_eq!(
            Command::RcptTo("a@example.com".into()).to_string(),
            "RCPT TO:<a@example.com>\r\n"
        );
    }

    #[test]
    fn mail_from_announces_8bit_bodies() {
        assert_eq!(
            Command::MailFrom("me@example.com".into(), false).to_string(),
            "MAIL FROM:<me@example.com>\r\n"
        );
        assert_eq!(
            Command::MailFrom("me@example.com".into(), true).to_string(),
            "MAIL FROM:<me@example.com> BODY=8BITMIME\r\n"
        );
    }

    #[test]
    fn redacted_auth_hides_credentials() {
        let cmd = Command::AuthPlain("user".into(), "hunter2".into());
        assert_eq!(cmd.redacted(), "AUTH PLAIN ****\r\n");
        assert_eq!(Command::Quit.redacted(), "QUIT\r\n");
    }

    #[test]
    fn unknown_codes_are_kept() {
        assert_eq!(StatusCode::from(252), StatusCode::Other(252));
        assert_eq!(StatusCode::from(235), StatusCode::AuthSuccess);
    }
}
