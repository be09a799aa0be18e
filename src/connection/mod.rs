//! A small synchronous SMTP client.
//!
//! [`SmtpSession`] drives one conversation over any `Read + Write` stream:
//! greeting, EHLO, an optional STARTTLS upgrade, authentication, one
//! transaction and QUIT. Opening the stream is left to the caller.

mod parser;
mod protocol;

use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::{OwnedTrustAnchor, RootCertStore};
use thiserror::Error;

use crate::logger::Logger;
use protocol::{get_auth_login, AuthMech, Command, EhloLine, Line, StatusCode};

type TlsCon = rustls::ClientConnection;

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("failed to resolve {0}")]
    Dns(String),
    #[error("can't reach the server")]
    ServerUnreachable(#[source] io::Error),
    #[error("network failure")]
    Network(#[source] io::Error),
    #[error("server closed the connection")]
    ServerUnavailable,
    #[error("malformed reply from server")]
    MalformedReply,
    #[error("unexpected reply {code} {text}")]
    Protocol { code: u32, text: String },
    #[error("tls: {0}")]
    Tls(String),
    #[error("credentials rejected by the server: {0}")]
    InvalidCredentials(String),
    #[error("server offers no supported AUTH mechanism")]
    AuthUnsupported,
    #[error("rejected by server policy: {0}")]
    Policy(String),
    #[error("invalid mailbox <{0}>")]
    Mailbox(String),
    #[error("mailbox has moved: {0}")]
    Forward(String),
    #[error("server does not accept 8-bit message bodies")]
    EightBitUnsupported,
    #[error("refusing to authenticate over an unencrypted connection")]
    PlaintextAuth,
}

pub type SmtpResult<T> = Result<T, SmtpError>;

#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: String, password: String) -> Credentials {
        Credentials { username, password }
    }
}

/// Sender and recipients as announced with MAIL FROM and RCPT TO.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    /// The payload carries raw 8-bit bytes and needs the 8BITMIME extension.
    pub eight_bit: bool,
}

/// Extensions the server advertised in its last EHLO reply.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerMeta {
    pub tls: bool,
    pub auth_plain: bool,
    pub auth_login: bool,
    pub pipelining: bool,
    pub eight_bit_mime: bool,
}

fn create_tls_conn(server_address: &str) -> SmtpResult<TlsCon> {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let server_name = rustls::ServerName::try_from(server_address)
        .map_err(|e| SmtpError::Tls(e.to_string()))?;

    TlsCon::new(Arc::new(config), server_name).map_err(|e| SmtpError::Tls(e.to_string()))
}

pub struct SmtpSession<S, L>
where
    S: Read + Write,
    L: Logger,
{
    name: String,
    host: String,
    stream: S,
    tlscon: Option<TlsCon>,
    meta: ServerMeta,
    allow_plaintext: bool,
    logger: L,
}

impl<S, L> SmtpSession<S, L>
where
    S: Read + Write,
    L: Logger,
{
    pub fn new(host: &str, stream: S, logger: L) -> SmtpSession<S, L> {
        SmtpSession {
            name: "localhost".to_string(),
            host: host.to_string(),
            stream,
            tlscon: None,
            meta: ServerMeta::default(),
            allow_plaintext: false,
            logger,
        }
    }

    /// Lets credentials go out when the server offers no STARTTLS.
    pub fn allow_plaintext(mut self, allow: bool) -> SmtpSession<S, L> {
        self.allow_plaintext = allow;
        self
    }

    pub fn meta(&self) -> ServerMeta {
        self.meta
    }

    pub fn is_tls(&self) -> bool {
        self.tlscon.is_some()
    }

    fn recv_reply(&mut self) -> SmtpResult<Vec<Line>> {
        let lines = match self.tlscon.as_mut() {
            Some(tlscon) => {
                let mut tls = rustls::Stream::new(tlscon, &mut self.stream);
                parser::Parser::new(&mut tls, &mut self.logger).recv_reply()?
            }
            None => parser::Parser::new(&mut self.stream, &mut self.logger).recv_reply()?,
        };
        if lines
            .iter()
            .any(|l| l.code() == StatusCode::ServiceNotAvailable)
        {
            self.terminate();
            return Err(SmtpError::ServerUnavailable);
        }
        Ok(lines)
    }

    /// Reads a whole reply and returns its last line, which carries the
    /// final status.
    fn recv_line(&mut self) -> SmtpResult<Line> {
        self.recv_reply()?
            .pop()
            .ok_or(SmtpError::MalformedReply)
    }

    fn write_logged(&mut self, data: &[u8], logged: &[u8]) -> SmtpResult<()> {
        self.logger.client(logged);
        tracing::trace!(
            "C: {}",
            String::from_utf8_lossy(logged).trim_end_matches("\r\n")
        );
        let result = match self.tlscon.as_mut() {
            Some(tlscon) => {
                let mut tls = rustls::Stream::new(tlscon, &mut self.stream);
                tls.write_all(data).and_then(|_| tls.flush())
            }
            None => self
                .stream
                .write_all(data)
                .and_then(|_| self.stream.flush()),
        };
        result.map_err(SmtpError::Network)
    }

    fn write(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.write_logged(data, data)
    }

    fn send(&mut self, cmd: Command) -> SmtpResult<()> {
        self.write_logged(cmd.to_string().as_bytes(), cmd.redacted().as_bytes())
    }

    fn greeting(&mut self) -> SmtpResult<()> {
        self.recv_line()?.expect(StatusCode::ServiceReady)
    }

    fn handshake(&mut self) -> SmtpResult<()> {
        self.send(Command::Ehlo(self.name.clone()))?;
        let rep = self.recv_reply()?;

        let mut meta = ServerMeta::default();
        for l in rep.iter() {
            l.expect(StatusCode::Okay)?;
            let text = l.text().to_uppercase();
            let mut words = text.split(|c: char| c == ' ' || c == '=');
            match words.next() {
                Some(w) if w == EhloLine::StartTls.keyword() => meta.tls = true,
                Some(w) if w == EhloLine::EightBitMime.keyword() => meta.eight_bit_mime = true,
                Some(w) if w == EhloLine::Pipelining.keyword() => meta.pipelining = true,
                Some(w) if w == EhloLine::Auth.keyword() => {
                    for mech in words {
                        if mech == AuthMech::Plain.keyword() {
                            meta.auth_plain = true;
                        } else if mech == AuthMech::Login.keyword() {
                            meta.auth_login = true;
                        }
                    }
                }
                _ => {}
            }
        }
        tracing::debug!(?meta, "server capabilities");
        self.meta = meta;
        Ok(())
    }

    fn start_tls(&mut self) -> SmtpResult<()> {
        self.send(Command::StartTls)?;
        self.recv_line()?.expect(StatusCode::ServiceReady)?;
        self.tlscon = Some(create_tls_conn(&self.host)?);
        tracing::debug!("connection encrypted");
        Ok(())
    }

    fn reply_auth_result(&mut self) -> SmtpResult<()> {
        let line = self.recv_line()?;
        match line.code() {
            StatusCode::AuthSuccess => Ok(()),
            StatusCode::AuthInvalidCred | StatusCode::NoAccess | StatusCode::AuthMechWeak => {
                Err(SmtpError::InvalidCredentials(line.text().to_string()))
            }
            _ => Err(line.unexpected()),
        }
    }

    fn auth_plain(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        self.send(Command::AuthPlain(
            credentials.username.clone(),
            credentials.password.clone(),
        ))?;
        self.reply_auth_result()
    }

    fn auth_login(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        self.send(Command::AuthLogin)?;
        self.recv_line()?.expect(StatusCode::ServerChallenge)?;
        let username = format!("{}\r\n", get_auth_login(&credentials.username));
        self.write_logged(username.as_bytes(), b"****\r\n")?;
        self.recv_line()?.expect(StatusCode::ServerChallenge)?;
        let password = format!("{}\r\n", get_auth_login(&credentials.password));
        self.write_logged(password.as_bytes(), b"****\r\n")?;
        self.reply_auth_result()
    }

    /// Greeting, EHLO, STARTTLS when offered, then authentication.
    pub fn open(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        self.greeting()?;
        self.handshake()?;
        if self.meta.tls {
            self.start_tls()?;
            self.handshake()?;
        }
        if !self.is_tls() && !self.allow_plaintext {
            return Err(SmtpError::PlaintextAuth);
        }
        if self.meta.auth_plain {
            self.auth_plain(credentials)
        } else if self.meta.auth_login {
            self.auth_login(credentials)
        } else {
            Err(SmtpError::AuthUnsupported)
        }
    }

    fn reply_mail_from(&mut self, from: &str) -> SmtpResult<()> {
        let line = self.recv_line()?;
        match line.code() {
            StatusCode::Okay => Ok(()),
            StatusCode::NoAccess => Err(SmtpError::Policy(line.text().to_string())),
            StatusCode::MailBoxNameNotAllowed => Err(SmtpError::Mailbox(from.to_string())),
            _ => Err(line.unexpected()),
        }
    }

    fn reply_rcpt_to(&mut self, to: &str) -> SmtpResult<()> {
        let line = self.recv_line()?;
        match line.code() {
            StatusCode::Okay | StatusCode::UserNotLocal => Ok(()),
            StatusCode::NoAccess | StatusCode::MailboxUnavailable => {
                Err(SmtpError::Policy(line.text().to_string()))
            }
            StatusCode::MailBoxNameNotAllowed => Err(SmtpError::Mailbox(to.to_string())),
            StatusCode::UserNotLocalError => Err(SmtpError::Forward(line.text().to_string())),
            _ => Err(line.unexpected()),
        }
    }

    fn reply_data(&mut self) -> SmtpResult<()> {
        self.recv_line()?.expect(StatusCode::StartMailInput)
    }

    fn command_payload(&mut self, payload: &[u8]) -> SmtpResult<()> {
        self.write(payload)?;
        if payload.ends_with(b"\r\n") {
            self.write(b".\r\n")
        } else {
            self.write(b"\r\n.\r\n")
        }
    }

    fn reply_payload(&mut self) -> SmtpResult<()> {
        let line = self.recv_line()?;
        match line.code() {
            StatusCode::Okay => Ok(()),
            StatusCode::NoAccess | StatusCode::MailboxUnavailable | StatusCode::TransactionFailed => {
                Err(SmtpError::Policy(line.text().to_string()))
            }
            _ => Err(line.unexpected()),
        }
    }

    /// Runs one MAIL/RCPT/DATA transaction. `payload` must already be
    /// dot-stuffed.
    pub fn send_mail(&mut self, envelope: &Envelope, payload: &[u8]) -> SmtpResult<()> {
        if envelope.eight_bit && !self.meta.eight_bit_mime {
            return Err(SmtpError::EightBitUnsupported);
        }
        let mail_from = Command::MailFrom(envelope.from.clone(), envelope.eight_bit);
        if self.meta.pipelining {
            self.send(mail_from)?;
            for to in envelope.to.iter() {
                self.send(Command::RcptTo(to.clone()))?;
            }
            self.send(Command::Data)?;
            self.reply_mail_from(&envelope.from)?;
            for to in envelope.to.iter() {
                self.reply_rcpt_to(to)?;
            }
            self.reply_data()?;
        } else {
            self.send(mail_from)?;
            self.reply_mail_from(&envelope.from)?;
            for to in envelope.to.iter() {
                self.send(Command::RcptTo(to.clone()))?;
                self.reply_rcpt_to(to)?;
            }
            self.send(Command::Data)?;
            self.reply_data()?;
        }
        self.command_payload(payload)?;
        self.reply_payload()
    }

    pub fn quit(&mut self) -> SmtpResult<()> {
        self.send(Command::Quit)?;
        self.recv_line()?.expect(StatusCode::ServiceClosingChannel)?;
        self.terminate();
        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(mut tlscon) = self.tlscon.take() {
            tlscon.send_close_notify();
            let _ = tlscon.complete_io(&mut self.stream);
        }
        self.meta = ServerMeta::default();
    }

    pub fn into_inner(self) -> (S, L) {
        (self.stream, self.logger)
    }
}
