//! The response sink handed to handlers, writing through the core.

use std::io;

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode, Version};
use tracing::{debug, warn};
use uwsgi_interface::{BridgeError, BridgeResult, ResponseWriter};

use crate::native::{NativeCore, RequestHandle};

/// Response for one native request.
///
/// Headers are committed exactly once, before any body byte: by the first
/// `write_header` or implicitly by the first body write. A native write
/// failure aborts the response; nothing more is sent afterwards.
pub struct ResponseSink<'a> {
    core: &'a dyn NativeCore,
    req: RequestHandle,
    version: Version,
    default_content_type: &'a HeaderValue,
    headers: HeaderMap,
    status: Option<StatusCode>,
    failed: bool,
}

impl<'a> ResponseSink<'a> {
    pub fn new(
        core: &'a dyn NativeCore,
        req: RequestHandle,
        version: Version,
        default_content_type: &'a HeaderValue,
    ) -> Self {
        Self {
            core,
            req,
            version,
            default_content_type,
            headers: HeaderMap::new(),
            status: None,
            failed: false,
        }
    }

    /// Status sent with the header block, once committed.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn fail(&mut self, code: i32, what: &str) -> BridgeError {
        warn!(req = ?self.req, code, "native {what} write failed; aborting response");
        self.failed = true;
        BridgeError::TransportWrite(code)
    }
}

impl ResponseWriter for ResponseSink<'_> {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) -> BridgeResult<()> {
        if self.failed {
            return Err(BridgeError::ResponseAborted);
        }
        if let Some(committed) = self.status {
            debug!(req = ?self.req, %committed, %status, "headers already committed; ignoring");
            return Ok(());
        }
        self.status = Some(status);
        self.core.set_status(self.req, status.as_u16());

        if self.headers.get(CONTENT_TYPE).is_none_or(HeaderValue::is_empty) {
            self.headers.insert(CONTENT_TYPE, self.default_content_type.clone());
        }
        let block = header_block(self.version, status, &self.headers);
        for _ in 0..self.headers.len() {
            self.core.count_header(self.req);
        }

        let rc = self.core.write_header_block(self.req, &block);
        if rc < 0 {
            return Err(self.fail(rc, "header"));
        }
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> BridgeResult<usize> {
        if self.status.is_none() {
            self.write_header(StatusCode::OK)?;
        }
        if self.failed {
            return Err(BridgeError::ResponseAborted);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let rc = self.core.write_body_chunk(self.req, buf);
        if rc < 0 {
            return Err(self.fail(rc, "body"));
        }
        Ok(buf.len())
    }

    fn is_committed(&self) -> bool {
        self.status.is_some()
    }
}

impl io::Write for ResponseSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_body(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `HTTP/1.x <code> <reason>\r\n`, every header, then the blank line.
pub fn header_block(version: Version, status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let proto = if version == Version::HTTP_09 || version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    let mut block = format!(
        "{proto} {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in headers {
        block.extend_from_slice(canonical_header_name(name.as_str()).as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(&sanitize_header_value(value.as_bytes()));
        block.extend_from_slice(b"\r\n");
    }
    block.extend_from_slice(b"\r\n");
    block
}

/// `x-request-id` -> `X-Request-Id`.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// CR and LF become spaces and surrounding whitespace is trimmed, so a value
/// can never start a new header line. Other bytes pass through untouched.
pub fn sanitize_header_value(value: &[u8]) -> Vec<u8> {
    let flattened: Vec<u8> = value
        .iter()
        .map(|&b| if b == b'\r' || b == b'\n' { b' ' } else { b })
        .collect();
    flattened.trim_ascii().to_vec()
}
