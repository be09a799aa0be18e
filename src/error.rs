use thiserror::Error;

use crate::connection::SmtpError;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a send, from loading settings to the final
/// transport call. Nothing in the crate recovers from these locally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("syntax error in template {name}: {reason}")]
    TemplateSyntax { name: String, reason: String },

    #[error("failed to render template {name}: {reason}")]
    Render { name: String, reason: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to construct mailer: {0}")]
    Construction(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Smtp(#[from] SmtpError),

    #[error("http request failed")]
    Http(#[from] reqwest::Error),

    #[error("gmail api responded with {status}: {body}")]
    Api { status: u16, body: String },
}

impl From<SmtpError> for Error {
    fn from(err: SmtpError) -> Self {
        Error::Transport(TransportError::Smtp(err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Joins an error and its sources into one line, the way it gets logged.
pub(crate) fn chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
