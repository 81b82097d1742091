use std::fmt;
use std::io::{self, Cursor, Read};

use bytes::Bytes;

/// Request body handed to handlers.
///
/// The lifetime ties the body to a single dispatch: whatever it reads from
/// cannot be kept once the handler returns.
pub struct RequestBody<'a> {
    reader: Box<dyn Read + 'a>,
}

impl<'a> RequestBody<'a> {
    pub fn new(reader: impl Read + 'a) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    /// Drain the remaining body into memory.
    pub fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl Read for RequestBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl From<Bytes> for RequestBody<'static> {
    fn from(bytes: Bytes) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl Default for RequestBody<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").finish_non_exhaustive()
    }
}
