use base64::{engine::general_purpose, Engine};

/// RFC 2045 limit for encoded lines, without the CRLF.
const BASE64_LINE: usize = 76;

/// A plain-text message: headers, a blank line, then the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Message {
    pub fn new(to: &[String], subject: &str, body: String) -> Message {
        Message {
            from: None,
            to: to.to_vec(),
            subject: subject.to_string(),
            body,
        }
    }

    pub fn with_from(mut self, from: &str) -> Message {
        self.from = Some(from.to_string());
        self
    }

    /// The body has bytes outside 7-bit ASCII.
    pub fn is_eight_bit(&self) -> bool {
        !self.body.is_ascii()
    }

    fn headers(&self, encoding: &str) -> String {
        let mut headers = String::new();
        if let Some(from) = self.from.as_ref() {
            headers.push_str(&format!("From: {}\r\n", single_line(from)));
        }
        let to: Vec<String> = self.to.iter().map(|to| single_line(to)).collect();
        headers.push_str(&format!("To: {}\r\n", to.join(", ")));
        headers.push_str(&format!("Subject: {}\r\n", encode_subject(&self.subject)));
        headers.push_str("MIME-Version: 1.0\r\n");
        headers.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
        headers.push_str(&format!("Content-Transfer-Encoding: {}\r\n", encoding));
        headers
    }

    /// The raw message with CRLF line endings throughout.
    pub fn formatted(&self) -> Vec<u8> {
        let encoding = if self.is_eight_bit() { "8bit" } else { "7bit" };
        let mut raw = self.headers(encoding);
        raw.push_str("\r\n");
        raw.push_str(&crlf(&self.body));
        raw.into_bytes()
    }

    /// Same message with the body in base64, for servers without 8BITMIME.
    pub fn formatted_base64(&self) -> Vec<u8> {
        let encoded = general_purpose::STANDARD.encode(crlf(&self.body));
        let mut raw = self.headers("base64");
        raw.push_str("\r\n");
        for line in encoded.as_bytes().chunks(BASE64_LINE) {
            raw.push_str(&String::from_utf8_lossy(line));
            raw.push_str("\r\n");
        }
        raw.into_bytes()
    }

    /// The message prepared for the SMTP DATA phase. An 8-bit body goes out
    /// as is only when the server takes 8BITMIME. Every line that starts
    /// with `.` gets a second one.
    pub fn smtp_payload(&self, eight_bit_mime: bool) -> Vec<u8> {
        let raw = if self.is_eight_bit() && !eight_bit_mime {
            self.formatted_base64()
        } else {
            self.formatted()
        };
        let mut out = Vec::with_capacity(raw.len());
        let mut at_line_start = true;
        for &b in raw.iter() {
            if at_line_start && b == b'.' {
                out.push(b'.');
            }
            out.push(b);
            at_line_start = b == b'\n';
        }
        out
    }

    /// The raw message as the Gmail API expects it in the `raw` field.
    pub fn encode_raw(&self) -> String {
        general_purpose::URL_SAFE.encode(self.formatted())
    }
}

fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn crlf(text: &str) -> String {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// RFC 2047 encoded-word for non-ASCII subjects.
pub fn encode_subject(subject: &str) -> String {
    let subject = single_line(subject);
    if subject.is_ascii() {
        subject
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            general_purpose::STANDARD.encode(subject.as_bytes())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Message {
        Message::new(
            &["a@example.com".to_string()],
            "Test email",
            "Hello Alessandro, from Golang".to_string(),
        )
    }

    #[test]
    fn headers_blank_line_body() {
        let raw = String::from_utf8(sample().formatted()).unwrap();
        assert_eq!(
            raw,
            concat!(
                "To: a@example.com\r\n",
                "Subject: Test email\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: text/plain; charset=\"UTF-8\"\r\n",
                "Content-Transfer-Encoding: 7bit\r\n",
                "\r\n",
                "Hello Alessandro, from Golang",
            )
        );
    }

    #[test]
    fn recipients_share_one_header() {
        let msg = Message::new(
            &["a@example.com".to_string(), "b@example.com".to_string()],
            "hi",
            String::new(),
        )
        .with_from("me@example.com");
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.starts_with("From: me@example.com\r\nTo: a@example.com, b@example.com\r\n"));
    }

    #[test]
    fn raw_encoding_round_trips() {
        let msg = sample();
        let decoded = general_purpose::URL_SAFE.decode(msg.encode_raw()).unwrap();
        assert_eq!(decoded, msg.formatted());
    }

    #[test]
    fn raw_encoding_is_url_safe() {
        let msg = Message::new(&["a@example.com".to_string()], "??>>", "~~~???>>>".repeat(8));
        let encoded = msg.encode_raw();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn body_lines_become_crlf() {
        let msg = Message::new(&[], "s", "one\ntwo\r\nthree\n".to_string());
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.ends_with("\r\n\r\none\r\ntwo\r\nthree\r\n"));
    }

    #[test]
    fn leading_dots_are_doubled() {
        let msg = Message::new(&[], "s", ".hidden\nnot.this\n.\n".to_string());
        let stuffed = String::from_utf8(msg.smtp_payload(false)).unwrap();
        assert!(stuffed.ends_with("\r\n\r\n..hidden\r\nnot.this\r\n..\r\n"));
    }

    #[test]
    fn newlines_cannot_inject_headers() {
        let msg = Message::new(&["a@example.com".to_string()], "hi\r\nBcc: x@evil.test", String::new());
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: hi Bcc: x@evil.test\r\n"));
        assert!(!raw.contains("\r\nBcc:"));
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        assert_eq!(encode_subject("Grüße"), "=?UTF-8?B?R3LDvMOfZQ==?=");
        assert_eq!(encode_subject("plain"), "plain");
    }

    #[test]
    fn non_ascii_body_is_marked_8bit() {
        let msg = Message::new(&[], "s", "Grüße".to_string());
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Content-Transfer-Encoding: 8bit\r\n"));
        assert!(msg.is_eight_bit());
    }

    #[test]
    fn eight_bit_body_kept_for_8bitmime_servers() {
        let msg = Message::new(&[], "s", "Grüße".to_string());
        assert_eq!(msg.smtp_payload(true), msg.formatted());
    }

    #[test]
    fn eight_bit_body_falls_back_to_base64() {
        let msg = Message::new(&[], "s", "Grüße\n".to_string());
        let raw = String::from_utf8(msg.smtp_payload(false)).unwrap();
        assert!(raw.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(raw.ends_with("\r\n\r\nR3LDvMOfZQ0K\r\n"));
        assert!(raw.is_ascii());
    }

    #[test]
    fn base64_lines_stay_short() {
        let msg = Message::new(&[], "s", "ü".repeat(200));
        let raw = String::from_utf8(msg.formatted_base64()).unwrap();
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        assert!(body.split("\r\n").all(|line| line.len() <= 76));
        let joined: String = body.split("\r\n").collect();
        assert_eq!(
            general_purpose::STANDARD.decode(joined).unwrap(),
            "ü".repeat(200).into_bytes()
        );
    }

    #[test]
    fn ascii_body_is_the_same_either_way() {
        let msg = sample();
        assert_eq!(msg.smtp_payload(false), msg.smtp_payload(true));
    }
}
