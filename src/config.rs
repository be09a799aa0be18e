//! Backend settings read from environment variables.
//!
//! | Variable | Required | Description |
//! |----------|----------|-------------|
//! | `EMAIL_HOST` | Yes | SMTP server hostname |
//! | `EMAIL_FROM` | Yes | Sender address |
//! | `EMAIL_PASSWORD` | Yes | SMTP password |
//! | `EMAIL_PORT` | No | Port (default: 587) |
//! | `EMAIL_USERNAME` | No | Login name (default: `EMAIL_FROM`) |
//! | `EMAIL_TIMEOUT` | No | Socket timeout in seconds (default: 30) |
//! | `EMAIL_ALLOW_PLAINTEXT` | No | Authenticate without STARTTLS (default: false) |
//! | `GMAIL_CLIENT_ID` | Yes | OAuth2 client id |
//! | `GMAIL_CLIENT_SECRET` | Yes | OAuth2 client secret |
//! | `GMAIL_ACCESS_TOKEN` | Yes | Last issued access token |
//! | `GMAIL_REFRESH_TOKEN` | Yes | Refresh token |

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_derive::Deserialize;

use crate::error::{Error, Result};

const REDACTED: &str = "<redacted>";

fn load<T: DeserializeOwned>(prefix: &str, vars: Option<HashMap<String, String>>) -> Result<T> {
    let settings = config::Config::builder()
        .add_source(config::Environment::with_prefix(prefix).source(vars))
        .build()?;
    Ok(settings.try_deserialize()?)
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Config(format!("{} must not be empty", name)))
    } else {
        Ok(())
    }
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub from: String,
    pub password: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub allow_plaintext: bool,
}

fn default_port() -> u16 {
    587
}

fn default_timeout() -> u64 {
    30
}

impl SmtpConfig {
    pub fn from_env() -> Result<SmtpConfig> {
        SmtpConfig::load(None)
    }

    /// Reads from `vars` instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<SmtpConfig> {
        SmtpConfig::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<SmtpConfig> {
        let config: SmtpConfig = load("EMAIL", vars)?;
        config.validate()?;
        tracing::debug!(?config, "loaded smtp configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require("EMAIL_HOST", &self.host)?;
        require("EMAIL_FROM", &self.from)?;
        require("EMAIL_PASSWORD", &self.password)?;
        if let Some(username) = self.username.as_deref() {
            require("EMAIL_USERNAME", username)?;
        }
        Ok(())
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.from)
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("from", &self.from)
            .field("password", &REDACTED)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .field("allow_plaintext", &self.allow_plaintext)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl GmailConfig {
    pub fn from_env() -> Result<GmailConfig> {
        GmailConfig::load(None)
    }

    /// Reads from `vars` instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<GmailConfig> {
        GmailConfig::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<GmailConfig> {
        let config: GmailConfig = load("GMAIL", vars)?;
        config.validate()?;
        tracing::debug!(?config, "loaded gmail configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require("GMAIL_CLIENT_ID", &self.client_id)?;
        require("GMAIL_CLIENT_SECRET", &self.client_secret)?;
        require("GMAIL_ACCESS_TOKEN", &self.access_token)?;
        require("GMAIL_REFRESH_TOKEN", &self.refresh_token)
    }
}

impl fmt::Debug for GmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmailConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("access_token", &REDACTED)
            .field("refresh_token", &REDACTED)
            .finish()
    }
}
