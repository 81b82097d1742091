//! Turns a request environment into an `http::Request`.

use std::io::{self, Read};

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri, Version};
use tracing::debug;
use uwsgi_interface::{BridgeError, BridgeResult, RequestBody};

use crate::environ::Environment;
use crate::native::{NativeCore, RequestHandle};

/// Reads the request body straight from the core, one native read per call.
pub struct BodyReader<'a> {
    core: &'a dyn NativeCore,
    req: RequestHandle,
}

impl<'a> BodyReader<'a> {
    pub fn new(core: &'a dyn NativeCore, req: RequestHandle) -> Self {
        Self { core, req }
    }
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.core.read_chunk(self.req, buf);
        if n < 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request body ended unexpectedly",
            ));
        }
        Ok(n as usize)
    }
}

/// Peer address as reported by the core (`REMOTE_ADDR[:REMOTE_PORT]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

fn malformed(reason: impl Into<String>) -> BridgeError {
    BridgeError::MalformedRequest(reason.into())
}

/// Build the handler-facing request. The environment ends up in the request's extensions.
pub fn build_request<'a>(env: Environment, body: RequestBody<'a>) -> BridgeResult<Request<RequestBody<'a>>> {
    let method = env
        .get_non_empty("REQUEST_METHOD")
        .ok_or_else(|| malformed("missing REQUEST_METHOD"))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| malformed(format!("invalid REQUEST_METHOD {method:?}")))?;

    let version = match env.get_non_empty("SERVER_PROTOCOL") {
        Some(proto) => {
            parse_protocol(proto).ok_or_else(|| malformed(format!("invalid SERVER_PROTOCOL {proto:?}")))?
        }
        None => Version::HTTP_11,
    };

    let uri = build_uri(&env)?;
    let headers = build_headers(&env)?;
    let remote = remote_addr(&env);

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .version(version)
        .body(body)
        .map_err(|err| malformed(err.to_string()))?;
    *request.headers_mut() = headers;
    if let Some(remote) = remote {
        request.extensions_mut().insert(remote);
    }
    request.extensions_mut().insert(env);
    Ok(request)
}

fn parse_protocol(proto: &str) -> Option<Version> {
    match proto {
        "HTTP/0.9" => Some(Version::HTTP_09),
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/1.1" => Some(Version::HTTP_11),
        "HTTP/2" | "HTTP/2.0" => Some(Version::HTTP_2),
        _ => None,
    }
}

fn is_https(env: &Environment) -> bool {
    let https = env
        .get("HTTPS")
        .is_some_and(|v| v.eq_ignore_ascii_case("on") || v == "1");
    https || env.get("UWSGI_SCHEME").is_some_and(|v| v.eq_ignore_ascii_case("https"))
}

fn build_uri(env: &Environment) -> BridgeResult<Uri> {
    let path_and_query = match env.get_non_empty("REQUEST_URI") {
        Some(uri) => uri.to_string(),
        None => {
            let mut path = format!(
                "{}{}",
                env.get("SCRIPT_NAME").unwrap_or(""),
                env.get("PATH_INFO").unwrap_or("")
            );
            if path.is_empty() {
                path.push('/');
            }
            if let Some(query) = env.get_non_empty("QUERY_STRING") {
                path.push('?');
                path.push_str(query);
            }
            path
        }
    };

    let mut builder = Uri::builder();
    if let Some(host) = env.get_non_empty("HTTP_HOST") {
        let scheme = if is_https(env) { "https" } else { "http" };
        builder = builder.scheme(scheme).authority(host);
    }
    builder
        .path_and_query(path_and_query)
        .build()
        .map_err(|err| malformed(format!("invalid request uri: {err}")))
}

/// `HTTP_ACCEPT_LANGUAGE` -> `accept-language`; `CONTENT_TYPE`/`CONTENT_LENGTH` map to their headers.
pub(crate) fn header_name_for(key: &str) -> Option<HeaderName> {
    match key {
        "CONTENT_TYPE" => Some(CONTENT_TYPE),
        "CONTENT_LENGTH" => Some(CONTENT_LENGTH),
        _ => {
            let name = key.strip_prefix("HTTP_")?;
            if name.is_empty() {
                return None;
            }
            let name = name.to_ascii_lowercase().replace('_', "-");
            HeaderName::from_bytes(name.as_bytes()).ok()
        }
    }
}

fn build_headers(env: &Environment) -> BridgeResult<HeaderMap> {
    if let Some(len) = env.get_non_empty("CONTENT_LENGTH") {
        len.parse::<u64>()
            .map_err(|_| malformed(format!("invalid CONTENT_LENGTH {len:?}")))?;
    }

    let mut headers = HeaderMap::new();
    for (key, value) in env.iter() {
        let Some(name) = header_name_for(key) else {
            continue;
        };
        if value.is_empty() && (name == CONTENT_TYPE || name == CONTENT_LENGTH) {
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => debug!("skipping unrepresentable value for header {name}"),
        }
    }
    Ok(headers)
}

fn remote_addr(env: &Environment) -> Option<RemoteAddr> {
    let addr = env.get_non_empty("REMOTE_ADDR")?;
    Some(match env.get_non_empty("REMOTE_PORT") {
        Some(port) => RemoteAddr(format!("{addr}:{port}")),
        None => RemoteAddr(addr.to_string()),
    })
}
