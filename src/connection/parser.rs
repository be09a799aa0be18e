use super::{protocol::Line, Logger, SmtpError, SmtpResult};
use std::io::{self, Read};

/// Reads SMTP replies one byte at a time, keeping a single byte of
/// lookahead so that nothing past the final `\n` is consumed.
pub(crate) struct Parser<'a, T, L>
where
    T: Read,
    L: Logger,
{
    pub(crate) stream: &'a mut T,
    pub(crate) logger: &'a mut L,
    pub(crate) next_byte: u8,
}

impl<'a, T, L> Parser<'a, T, L>
where
    T: Read,
    L: Logger,
{
    pub(crate) fn new(stream: &'a mut T, logger: &'a mut L) -> Parser<'a, T, L> {
        Parser {
            logger,
            stream,
            next_byte: 0,
        }
    }
    fn recv_byte(&mut self) -> SmtpResult<u8> {
        let mut buf = [0u8; 1];
        self.stream.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => SmtpError::ServerUnavailable,
            _ => SmtpError::Network(e),
        })?;
        let b = self.next_byte;
        self.next_byte = buf[0];
        self.logger.server(&buf);
        Ok(b)
    }
    fn peek_byte(&self) -> u8 {
        self.next_byte
    }
    fn malformed(&self) -> SmtpError {
        SmtpError::MalformedReply
    }
    fn recv_digit(&mut self) -> SmtpResult<u32> {
        let b = self.recv_byte()?;
        if b.is_ascii_digit() {
            Ok((b - b'0') as u32)
        } else {
            Err(self.malformed())
        }
    }
    fn expect_end(&mut self) -> SmtpResult<()> {
        if self.recv_byte()? == b'\r' && self.peek_byte() == b'\n' {
            Ok(())
        } else {
            Err(self.malformed())
        }
    }
    fn recv_text(&mut self) -> SmtpResult<String> {
        let mut text = Vec::new();
        loop {
            let b = self.recv_byte()?;
            if b == b'\r' && self.peek_byte() == b'\n' {
                return Ok(String::from_utf8_lossy(&text).into_owned());
            }
            text.push(b);
        }
    }
    pub(crate) fn recv_line(&mut self) -> SmtpResult<Line> {
        // shifts the first byte of the line into the lookahead slot
        self.recv_byte()?;
        let code = self.recv_digit()? * 100 + self.recv_digit()? * 10 + self.recv_digit()?;
        let next = self.peek_byte();
        let text = if next == b' ' || next == b'-' {
            self.recv_byte()?;
            self.recv_text()?
        } else {
            self.expect_end()?;
            String::new()
        };
        Ok(Line::new(code, text, next != b'-'))
    }
    pub(crate) fn recv_reply(&mut self) -> SmtpResult<Vec<Line>> {
        let mut lines = vec![self.recv_line()?];
        while !lines[lines.len() - 1].last() {
            lines.push(self.recv_line()?);
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::protocol::StatusCode;
    use crate::logger::NoLogger;
    use std::io::Cursor;

    #[test]
    fn reads_a_multiline_reply() {
        let mut stream = Cursor::new(b"250-smtp.example.com\r\n250-PIPELINING\r\n250 AUTH PLAIN LOGIN\r\n".to_vec());
        let mut logger = NoLogger;
        let lines = Parser::new(&mut stream, &mut logger).recv_reply().unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text(), "PIPELINING");
        assert_eq!(lines[2].text(), "AUTH PLAIN LOGIN");
        assert!(lines[2].last());
        assert_eq!(lines[0].code(), StatusCode::Okay);
    }

    #[test]
    fn stops_after_the_line_terminator() {
        let mut stream = Cursor::new(b"220 ready\r\n250 ok\r\n".to_vec());
        let mut logger = NoLogger;
        Parser::new(&mut stream, &mut logger).recv_line().unwrap();
        assert_eq!(stream.position(), 11);

        let line = Parser::new(&mut stream, &mut logger).recv_line().unwrap();
        assert_eq!(line.text(), "ok");
    }

    #[test]
    fn accepts_a_bare_code() {
        let mut stream = Cursor::new(b"354\r\n".to_vec());
        let mut logger = NoLogger;
        let line = Parser::new(&mut stream, &mut logger).recv_line().unwrap();
        assert_eq!(line.code(), StatusCode::StartMailInput);
        assert_eq!(line.text(), "");
    }

    #[test]
    fn rejects_non_numeric_codes() {
        let mut stream = Cursor::new(b"HELLO\r\n".to_vec());
        let mut logger = NoLogger;
        let err = Parser::new(&mut stream, &mut logger).recv_line().unwrap_err();
        assert!(matches!(err, SmtpError::MalformedReply));
    }

    #[test]
    fn eof_means_the_server_went_away() {
        let mut stream = Cursor::new(b"250 partial".to_vec());
        let mut logger = NoLogger;
        let err = Parser::new(&mut stream, &mut logger).recv_line().unwrap_err();
        assert!(matches!(err, SmtpError::ServerUnavailable));
    }
}
