//! Delivery through the Gmail API.
//!
//! Messages are posted as base64url-encoded raw RFC 2822 text to
//! `users/me/messages/send`, authorized with an OAuth2 bearer token. The
//! token is refreshed through the `oauth2` crate whenever it has expired.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use oauth2::basic::BasicClient;
use oauth2::reqwest::http_client;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl,
};
use serde_derive::{Deserialize, Serialize};

use crate::config::GmailConfig;
use crate::error::{chain, Error, Result, TransportError};
use crate::message::Message;
use crate::template::{Renderer, TemplateData};
use crate::{check_recipients, Mailer};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SEND_ENDPOINT: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// Hands out a bearer token that is valid right now.
pub trait TokenSource {
    fn token(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy)]
enum Expiry {
    Expired,
    At(Instant),
    Never,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expiry: Expiry,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.expiry {
            Expiry::Expired => false,
            Expiry::At(at) => now + EXPIRY_MARGIN < at,
            Expiry::Never => true,
        }
    }
}

pub struct OAuthTokenSource {
    client: BasicClient,
    refresh_token: RefreshToken,
    cached: Mutex<CachedToken>,
}

impl OAuthTokenSource {
    /// The stored access token has no known lifetime, so it counts as
    /// expired and the first request refreshes it.
    pub fn new(config: &GmailConfig) -> Result<OAuthTokenSource> {
        OAuthTokenSource::with_token_url(config, GOOGLE_TOKEN_URL)
    }

    /// Refreshes against `token_url` instead of Google's token endpoint.
    pub fn with_token_url(config: &GmailConfig, token_url: &str) -> Result<OAuthTokenSource> {
        let auth_url = AuthUrl::new(GOOGLE_AUTH_URL.to_string())
            .map_err(|e| Error::Construction(e.to_string()))?;
        let token_url = TokenUrl::new(token_url.to_string())
            .map_err(|e| Error::Construction(e.to_string()))?;
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        );
        Ok(OAuthTokenSource {
            client,
            refresh_token: RefreshToken::new(config.refresh_token.clone()),
            cached: Mutex::new(CachedToken {
                access_token: config.access_token.clone(),
                expiry: Expiry::Expired,
            }),
        })
    }

    fn refresh(&self) -> Result<CachedToken> {
        tracing::debug!("refreshing gmail access token");
        let response = self
            .client
            .exchange_refresh_token(&self.refresh_token)
            .request(http_client)
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(response) => Error::Auth(response.to_string()),
                other => Error::Auth(chain(&other)),
            })?;
        let expiry = match response.expires_in() {
            Some(lifetime) => Expiry::At(Instant::now() + lifetime),
            None => Expiry::Never,
        };
        Ok(CachedToken {
            access_token: response.access_token().secret().clone(),
            expiry,
        })
    }
}

impl TokenSource for OAuthTokenSource {
    fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if !cached.is_fresh(Instant::now()) {
            *cached = self.refresh()?;
        }
        Ok(cached.access_token.clone())
    }
}

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
    #[serde(rename = "threadId", default)]
    thread_id: Option<String>,
}

pub struct GmailMailer {
    renderer: Renderer,
    tokens: Box<dyn TokenSource>,
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl GmailMailer {
    pub fn new(config: GmailConfig, renderer: Renderer) -> Result<GmailMailer> {
        config.validate()?;
        let tokens = OAuthTokenSource::new(&config)?;
        GmailMailer::with_token_source(renderer, tokens)
    }

    pub fn with_token_source(
        renderer: Renderer,
        tokens: impl TokenSource + 'static,
    ) -> Result<GmailMailer> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Construction(chain(&e)))?;
        tracing::info!("email service is initialized");
        Ok(GmailMailer {
            renderer,
            tokens: Box::new(tokens),
            http,
            endpoint: SEND_ENDPOINT.to_string(),
        })
    }

    /// Posts to `endpoint` instead of the public Gmail API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> GmailMailer {
        self.endpoint = endpoint.into();
        self
    }

    fn post(&self, raw: String) -> Result<SentMessage> {
        let token = self.tokens.token()?;
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&SendRequest { raw })
            .send()
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(response.json().map_err(TransportError::from)?)
    }
}

impl Mailer for GmailMailer {
    fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        data: &TemplateData,
        template_name: &str,
    ) -> Result<()> {
        check_recipients(recipients)?;
        let body = self.renderer.render(template_name, data)?;
        let message = Message::new(recipients, subject, body);

        let sent = self.post(message.encode_raw())?;
        tracing::info!(
            id = %sent.id,
            thread = sent.thread_id.as_deref().unwrap_or("-"),
            "email sent through gmail"
        );
        Ok(())
    }
}
