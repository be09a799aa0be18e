//! Delivery over SMTP with PLAIN authentication.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::SmtpConfig;
use crate::connection::{Credentials, Envelope, SmtpError, SmtpResult, SmtpSession};
use crate::error::Result;
use crate::logger::{Logger, NoLogger};
use crate::message::Message;
use crate::template::{Renderer, TemplateData};
use crate::{check_address, check_recipients, Mailer};

/// Opens the byte stream an SMTP session runs over.
pub trait Connector {
    type Stream: Read + Write;

    fn connect(&self, host: &str, port: u16, timeout: Option<Duration>) -> SmtpResult<Self::Stream>;
}

/// Plain TCP; the session upgrades it with STARTTLS when the server offers it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, host: &str, port: u16, timeout: Option<Duration>) -> SmtpResult<TcpStream> {
        let target = format!("{}:{}", host, port);
        let address = target
            .to_socket_addrs()
            .map_err(|_| SmtpError::Dns(target.clone()))?
            .next()
            .ok_or_else(|| SmtpError::Dns(target.clone()))?;

        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&address, timeout),
            None => TcpStream::connect(address),
        }
        .map_err(SmtpError::ServerUnreachable)?;
        stream
            .set_read_timeout(timeout)
            .map_err(SmtpError::Network)?;
        stream
            .set_write_timeout(timeout)
            .map_err(SmtpError::Network)?;
        Ok(stream)
    }
}

pub struct SmtpMailer<C = TcpConnector> {
    config: SmtpConfig,
    renderer: Renderer,
    connector: C,
    logger: Mutex<Box<dyn Logger + Send>>,
}

impl SmtpMailer<TcpConnector> {
    pub fn new(config: SmtpConfig, renderer: Renderer) -> Result<SmtpMailer<TcpConnector>> {
        SmtpMailer::with_connector(config, renderer, TcpConnector)
    }
}

impl<C: Connector> SmtpMailer<C> {
    pub fn with_connector(
        config: SmtpConfig,
        renderer: Renderer,
        connector: C,
    ) -> Result<SmtpMailer<C>> {
        config.validate()?;
        check_address(&config.from)?;
        Ok(SmtpMailer {
            config,
            renderer,
            connector,
            logger: Mutex::new(Box::new(NoLogger)),
        })
    }

    /// Records the wire conversation of every send.
    pub fn with_transcript(mut self, logger: impl Logger + Send + 'static) -> SmtpMailer<C> {
        self.logger = Mutex::new(Box::new(logger));
        self
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn deliver(&self, message: &Message, recipients: &[String]) -> Result<()> {
        let mut logger = self.logger.lock().unwrap_or_else(PoisonError::into_inner);

        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting");
        let stream = self
            .connector
            .connect(&self.config.host, self.config.port, self.config.timeout())?;
        let mut session = SmtpSession::new(&self.config.host, stream, &mut **logger)
            .allow_plaintext(self.config.allow_plaintext);

        let credentials = Credentials::new(
            self.config.username().to_string(),
            self.config.password.clone(),
        );
        session.open(&credentials)?;

        let eight_bit_mime = session.meta().eight_bit_mime;
        let envelope = Envelope {
            from: self.config.from.clone(),
            to: recipients.to_vec(),
            eight_bit: message.is_eight_bit() && eight_bit_mime,
        };
        session.send_mail(&envelope, &message.smtp_payload(eight_bit_mime))?;
        session.quit()?;
        Ok(())
    }
}

impl<C: Connector> Mailer for SmtpMailer<C> {
    fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        data: &TemplateData,
        template_name: &str,
    ) -> Result<()> {
        check_recipients(recipients)?;
        let body = self.renderer.render(template_name, data)?;
        let message = Message::new(recipients, subject, body).with_from(&self.config.from);

        self.deliver(&message, recipients)?;
        tracing::info!(subject, recipients = recipients.len(), "email sent over smtp");
        Ok(())
    }
}
