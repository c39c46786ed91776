//! We use this mocking module in unit tests to emulate an instrument on a serial port.

use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Our mock type used to emulate a serial port with an instrument on the other end.
///
/// Replies are scripted per command line: once a complete line matching a scripted command has
/// been written, its reply becomes readable.
pub struct MockSerial {
    /// Data written to the mock serial port
    written: Vec<u8>,
    /// Offset of the first byte of the line currently being written
    line_start: usize,
    /// Bytes available to read
    readable: VecDeque<u8>,
    /// Scripted (command line, reply, delay) entries, consumed in order of matching
    script: Vec<(String, Vec<u8>, Duration)>,
    /// Replies released once their instant has passed
    late: Vec<(Instant, Vec<u8>)>,
    /// Unread byte count observed at each call to `write`
    unread_at_write: Vec<usize>,
    /// Maximum bytes handed out per read
    read_chunk: usize,
    /// Maximum bytes accepted per write, zero accepts nothing
    write_limit: Option<usize>,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
    /// Report end of stream once nothing is left to read
    end_of_stream: bool,
    /// Set when the mock is dropped
    dropped: Arc<AtomicBool>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSerialError {
    /// Simulated read timeout, no data available
    #[error("timed out")]
    Timeout,
    /// Generic simulated error for testing
    #[error("simulated failure")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.unread_at_write.push(self.readable.len());

        let accepted = match self.write_limit {
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        for &byte in &buf[..accepted] {
            self.written.push(byte);
            if byte == b'\n' {
                self.complete_line();
            }
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }
        self.release_late();
        if self.readable.is_empty() {
            return if self.end_of_stream {
                Ok(0)
            } else {
                Err(MockSerialError::Timeout)
            };
        }

        let count = buf.len().min(self.read_chunk).min(self.readable.len());
        for slot in buf.iter_mut().take(count) {
            // Length checked above.
            *slot = self.readable.pop_front().unwrap_or_default();
        }
        Ok(count)
    }
}

impl Drop for MockSerial {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with nothing scripted
    pub fn new() -> Self {
        Self {
            written: Vec::new(),
            line_start: 0,
            readable: VecDeque::new(),
            script: Vec::new(),
            late: Vec::new(),
            unread_at_write: Vec::new(),
            read_chunk: usize::MAX,
            write_limit: None,
            should_error_on_write: false,
            should_error_on_read: false,
            end_of_stream: false,
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reply with `reply` once the line `command` has been written.
    pub fn respond_to(self, command: &str, reply: impl AsRef<[u8]>) -> Self {
        self.respond_late(command, reply, Duration::ZERO)
    }

    /// Reply with `reply` only once `delay` has passed after the line `command` was written.
    pub fn respond_late(mut self, command: &str, reply: impl AsRef<[u8]>, delay: Duration) -> Self {
        self.script
            .push((command.to_string(), reply.as_ref().to_vec(), delay));
        self
    }

    /// Make bytes readable straight away, as if they were left over on the line.
    pub fn with_pending(mut self, data: impl AsRef<[u8]>) -> Self {
        self.readable.extend(data.as_ref());
        self
    }

    /// Hand out at most `chunk` bytes per read.
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = chunk.max(1);
        self
    }

    /// Accept at most `limit` bytes per write.
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Report end of stream instead of timing out when nothing is readable.
    pub fn with_end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.written
    }

    /// Written data as text, for readable assertions.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    /// Unread byte count seen by each write.
    pub fn unread_at_write(&self) -> &[usize] {
        &self.unread_at_write
    }

    /// Number of scripted replies not yet triggered.
    pub fn remaining_replies(&self) -> usize {
        self.script.len()
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }

    /// A flag which becomes true once this mock has been dropped.
    pub fn drop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dropped)
    }

    fn complete_line(&mut self) {
        let line = String::from_utf8_lossy(&self.written[self.line_start..])
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.line_start = self.written.len();

        if let Some(index) = self.script.iter().position(|(command, _, _)| *command == line) {
            let (_, reply, delay) = self.script.remove(index);
            if delay.is_zero() {
                self.readable.extend(reply);
            } else {
                self.late.push((Instant::now() + delay, reply));
            }
        }
    }

    fn release_late(&mut self) {
        let now = Instant::now();
        while let Some(index) = self.late.iter().position(|(due, _)| *due <= now) {
            let (_, reply) = self.late.remove(index);
            self.readable.extend(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_write_data() {
        let mut mock = MockSerial::new();
        let test_data = b"Hello, World!";

        let result = mock.write(test_data);
        assert_eq!(result.unwrap(), test_data.len());
        assert_eq!(mock.written_data(), test_data);
    }

    #[test]
    fn test_scripted_reply_released_after_line() {
        let mut mock = MockSerial::new().respond_to("VOUT?", "12.34\n");
        let mut buffer = [0u8; 16];

        mock.write(b"VOUT").unwrap();
        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::Timeout)));

        mock.write(b"?\n").unwrap();
        let count = mock.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..count], b"12.34\n");
        assert_eq!(mock.remaining_replies(), 0);
    }

    #[test]
    fn test_late_reply() {
        let mut mock = MockSerial::new().respond_late("A?", "1\n", Duration::from_millis(20));
        let mut buffer = [0u8; 4];
        mock.write(b"A?\n").unwrap();
        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::Timeout)));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"1\n");
    }

    #[test]
    fn test_unscripted_line_has_no_reply() {
        let mut mock = MockSerial::new().respond_to("A?", "1\n");
        mock.write(b"*RST\n").unwrap();
        let mut buffer = [0u8; 4];
        assert!(mock.read(&mut buffer).is_err());
        assert_eq!(mock.remaining_replies(), 1);
    }

    #[test]
    fn test_read_chunking() {
        let mut mock = MockSerial::new().with_pending("Hello World").with_read_chunk(5);
        let mut buffer = [0u8; 16];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer[..5], b"Hello");
    }

    #[test]
    fn test_write_limit() {
        let mut mock = MockSerial::new().with_write_limit(3);
        assert_eq!(mock.write(b"*RST\n").unwrap(), 3);
        assert_eq!(mock.written_data(), b"*RS");
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new().with_pending("data");
        mock.set_write_error(true);
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());

        mock.set_read_error(true);
        let mut buffer = [0u8; 8];
        assert!(matches!(
            mock.read(&mut buffer),
            Err(MockSerialError::SimulatedError)
        ));
    }

    #[test]
    fn test_end_of_stream() {
        let mut mock = MockSerial::new().with_end_of_stream();
        let mut buffer = [0u8; 8];
        assert_eq!(mock.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            MockSerialError::Timeout.kind(),
            embedded_io::ErrorKind::TimedOut
        ));
        assert!(matches!(
            MockSerialError::SimulatedError.kind(),
            embedded_io::ErrorKind::Other
        ));
    }

    #[test]
    fn test_drop_flag() {
        let mock = MockSerial::new();
        let flag = mock.drop_flag();
        assert!(!flag.load(Ordering::SeqCst));
        drop(mock);
        assert!(flag.load(Ordering::SeqCst));
    }
}
