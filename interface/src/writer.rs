use std::io;

use http::{HeaderMap, StatusCode};

use crate::error::BridgeResult;

/// Per-request response sink.
///
/// Headers stay mutable until the response is committed, either explicitly
/// with [`write_header`](ResponseWriter::write_header) or implicitly by the
/// first body write (status 200). After that only body bytes follow.
pub trait ResponseWriter: io::Write {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line and headers. Calls after the first are ignored.
    fn write_header(&mut self, status: StatusCode) -> BridgeResult<()>;

    /// Send body bytes, committing with `200 OK` first if needed.
    fn write_body(&mut self, buf: &[u8]) -> BridgeResult<usize>;

    fn is_committed(&self) -> bool;
}

/// In-memory [`ResponseWriter`] for exercising handlers without a bridge.
#[derive(Debug, Default)]
pub struct RecordedResponse {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: Vec<u8>,
}

impl RecordedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl ResponseWriter for RecordedResponse {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) -> BridgeResult<()> {
        self.status.get_or_insert(status);
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> BridgeResult<usize> {
        if self.status.is_none() {
            self.write_header(StatusCode::OK)?;
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn is_committed(&self) -> bool {
        self.status.is_some()
    }
}

impl io::Write for RecordedResponse {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_body(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
