//! Wire transcript of an SMTP conversation.
//!
//! The session reports every byte it writes and reads through [`Logger`].
//! Credentials never reach a logger: AUTH commands are handed over in
//! their redacted form.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub trait Logger {
    fn client(&mut self, data: &[u8]);
    fn server(&mut self, data: &[u8]);
}

/// Discards the transcript.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLogger;

impl Logger for NoLogger {
    fn client(&mut self, _data: &[u8]) {}
    fn server(&mut self, _data: &[u8]) {}
}

/// Writes the transcript to a file, prefixing each turn with `C: ` or `S: `.
pub struct FileLogger {
    file: fs::File,
    is_client: bool,
    is_server: bool,
}

impl FileLogger {
    pub fn file(path: &Path) -> io::Result<FileLogger> {
        let file = fs::OpenOptions::new()
            .truncate(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(FileLogger {
            file,
            is_client: false,
            is_server: false,
        })
    }
}

impl Logger for FileLogger {
    fn client(&mut self, data: &[u8]) {
        if !self.is_client {
            self.is_client = true;
            self.is_server = false;
            let _ = self.file.write_all(b"C: ");
        }
        let _ = self.file.write_all(data);
    }

    fn server(&mut self, data: &[u8]) {
        if !self.is_server {
            self.is_server = true;
            self.is_client = false;
            let _ = self.file.write_all(b"S: ");
        }
        let _ = self.file.write_all(data);
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryLogger {
    pub transcript: Vec<u8>,
}

#[cfg(test)]
impl Logger for MemoryLogger {
    fn client(&mut self, data: &[u8]) {
        self.transcript.extend_from_slice(data);
    }
    fn server(&mut self, data: &[u8]) {
        self.transcript.extend_from_slice(data);
    }
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn client(&mut self, data: &[u8]) {
        (**self).client(data)
    }
    fn server(&mut self, data: &[u8]) {
        (**self).server(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logger_marks_each_turn() {
        let path = std::env::temp_dir()
            .join(format!("mailsend-transcript-{}.log", std::process::id()));
        {
            let mut logger = FileLogger::file(&path).unwrap();
            logger.server(b"220 ");
            logger.server(b"ready\r\n");
            logger.client(b"EHLO me\r\n");
            logger.server(b"250 ok\r\n");
        }
        let text = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(text, "S: 220 ready\r\nC: EHLO me\r\nS: 250 ok\r\n");
    }

    #[test]
    fn opening_truncates_an_old_transcript() {
        let path = std::env::temp_dir()
            .join(format!("mailsend-truncate-{}.log", std::process::id()));
        fs::write(&path, "stale contents from an earlier run\n").unwrap();
        {
            let mut logger = FileLogger::file(&path).unwrap();
            logger.client(b"QUIT\r\n");
        }
        let text = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(text, "C: QUIT\r\n");
    }
}
