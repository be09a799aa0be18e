#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailsend::connection::{SmtpError, SmtpResult};
use mailsend::{Connector, Renderer, SmtpConfig, TemplateData};

pub fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/templates")
}

pub fn renderer() -> Renderer {
    Renderer::new(fixtures())
}

pub fn demo_data() -> TemplateData {
    TemplateData::new()
        .with("receiver_name", "Alessandro")
        .with("sender_name", "Golang")
}

pub fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Scripted servers never offer STARTTLS, so plaintext auth is allowed.
pub fn smtp_config() -> SmtpConfig {
    SmtpConfig::from_vars(vars(&[
        ("EMAIL_HOST", "smtp.example.com"),
        ("EMAIL_FROM", "me@example.com"),
        ("EMAIL_PASSWORD", "hunter2"),
        ("EMAIL_ALLOW_PLAINTEXT", "true"),
    ]))
    .unwrap()
}

/// Replays canned server replies and records what the client wrote.
pub struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out a [`ScriptedStream`] per connection and remembers where it
/// was asked to connect.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    replies: String,
    refuse: bool,
    pub output: Arc<Mutex<Vec<u8>>>,
    pub attempts: Arc<Mutex<Vec<(String, u16)>>>,
}

impl ScriptedConnector {
    pub fn new(replies: &str) -> ScriptedConnector {
        ScriptedConnector {
            replies: replies.to_string(),
            ..ScriptedConnector::default()
        }
    }

    pub fn refusing() -> ScriptedConnector {
        ScriptedConnector {
            refuse: true,
            ..ScriptedConnector::default()
        }
    }

    pub fn written(&self) -> String {
        String::from_utf8(self.output.lock().unwrap().clone()).unwrap()
    }

    pub fn attempts(&self) -> Vec<(String, u16)> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    fn connect(&self, host: &str, port: u16, _timeout: Option<Duration>) -> SmtpResult<ScriptedStream> {
        self.attempts.lock().unwrap().push((host.to_string(), port));
        if self.refuse {
            return Err(SmtpError::ServerUnreachable(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(ScriptedStream {
            input: Cursor::new(self.replies.as_bytes().to_vec()),
            output: self.output.clone(),
        })
    }
}

pub const ACCEPTING_SERVER: &str = concat!(
    "220 smtp.example.com ESMTP ready\r\n",
    "250-smtp.example.com greets localhost\r\n",
    "250-8BITMIME\r\n",
    "250 AUTH PLAIN LOGIN\r\n",
    "235 2.7.0 Authentication successful\r\n",
    "250 2.1.0 Ok\r\n",
    "250 2.1.5 Ok\r\n",
    "354 End data with <CR><LF>.<CR><LF>\r\n",
    "250 2.0.0 Ok: queued\r\n",
    "221 2.0.0 Bye\r\n",
);

/// Accepts mail but does not advertise 8BITMIME.
pub const SEVEN_BIT_SERVER: &str = concat!(
    "220 smtp.example.com ESMTP ready\r\n",
    "250-smtp.example.com greets localhost\r\n",
    "250 AUTH PLAIN\r\n",
    "235 2.7.0 Authentication successful\r\n",
    "250 2.1.0 Ok\r\n",
    "250 2.1.5 Ok\r\n",
    "354 End data with <CR><LF>.<CR><LF>\r\n",
    "250 2.0.0 Ok: queued\r\n",
    "221 2.0.0 Bye\r\n",
);

pub const REJECTING_SERVER: &str = concat!(
    "220 smtp.example.com ESMTP ready\r\n",
    "250-smtp.example.com greets localhost\r\n",
    "250 AUTH PLAIN\r\n",
    "535 5.7.8 Username and Password not accepted\r\n",
);
