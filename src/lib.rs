//! Send one templated plain-text email, either straight to an SMTP server
//! or through the Gmail API.
//!
//! Both backends implement [`Mailer`]: render a template from the
//! configured directory, wrap it in an RFC 2822 message and hand it to the
//! transport. Nothing is retried.

pub mod config;
pub mod connection;
pub mod error;
pub mod gmail;
pub mod logger;
pub mod message;
pub mod smtp;
pub mod template;

use std::sync::OnceLock;

pub use config::{GmailConfig, SmtpConfig};
pub use connection::SmtpError;
pub use error::{Error, Result, TransportError};
pub use gmail::GmailMailer;
pub use logger::{FileLogger, Logger};
pub use message::Message;
pub use smtp::{Connector, SmtpMailer, TcpConnector};
pub use template::{Renderer, TemplateData};

pub trait Mailer {
    /// Renders `template_name` with `data` and sends the result to every
    /// address in `recipients` as a single message.
    fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        data: &TemplateData,
        template_name: &str,
    ) -> Result<()>;
}

pub fn check_address(address: &str) -> connection::SmtpResult<()> {
    static ADDRESS: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = ADDRESS.get_or_init(|| {
        regex::Regex::new(
            r"^[A-Za-z0-9_+\-]([A-Za-z0-9_+.\-]*[A-Za-z0-9_+\-])?@[A-Za-z0-9]+([\-.][A-Za-z0-9]+)*\.[A-Za-z]{2,}$",
        )
        .expect("address pattern compiles")
    });
    if pattern.is_match(address) {
        Ok(())
    } else {
        Err(SmtpError::Mailbox(address.to_string()))
    }
}

pub(crate) fn check_recipients(recipients: &[String]) -> Result<()> {
    if recipients.is_empty() {
        return Err(Error::Config("at least one recipient is required".to_string()));
    }
    for to in recipients {
        check_address(to)?;
    }
    Ok(())
}
