//! Incremental HTTP/1.x request parser
//!
//! Frames one request from an arbitrarily fragmented byte stream: bytes are
//! fed in as they arrive from the socket, the header block is recognized at
//! the `\r\n\r\n` terminator wherever it lands, and the body is accumulated
//! until it reaches the declared `Content-Length`. Reassembly is byte-exact
//! regardless of how the stream was split into reads.

use std::collections::BTreeMap;

const CRLF2: &[u8] = b"\r\n\r\n";

/// Largest accepted header block. A request that exceeds it without
/// presenting the terminator is malformed, not "still arriving".
const MAX_HEADER_BYTES: usize = 8192;

/// The two methods this server speaks. Anything else is a 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One fully framed request.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Body interpreted as text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// URI path without the query string.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    /// Query string after `?`, empty if absent.
    pub fn query(&self) -> &str {
        self.uri.split_once('?').map(|(_, q)| q).unwrap_or("")
    }
}

/// Result of feeding bytes to the parser.
#[derive(Debug)]
pub enum Feed {
    /// Frame incomplete, keep reading.
    NeedMore,
    /// One complete request; surplus bytes (there should be none with a
    /// well-behaved single-request client) are discarded.
    Complete(Request),
    /// Unparseable request; respond 400 and close.
    Malformed(&'static str),
}

/// Parser state across reads.
#[derive(Default)]
pub struct RequestParser {
    buf: Vec<u8>,
    parsed: Option<PartialRequest>,
}

struct PartialRequest {
    method: Method,
    uri: String,
    headers: BTreeMap<String, String>,
    content_length: usize,
    body: Vec<u8>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk read from the socket.
    pub fn feed(&mut self, chunk: &[u8]) -> Feed {
        match self.parsed.take() {
            Some(mut partial) => {
                partial.body.extend_from_slice(chunk);
                self.finish_or_stash(partial)
            }
            None => {
                self.buf.extend_from_slice(chunk);
                match find_terminator(&self.buf) {
                    Some(end) => self.parse_header(end),
                    None if self.buf.len() > MAX_HEADER_BYTES => {
                        Feed::Malformed("header block too large or unterminated")
                    }
                    None => Feed::NeedMore,
                }
            }
        }
    }

    fn parse_header(&mut self, terminator: usize) -> Feed {
        let header_bytes = &self.buf[..terminator];
        let header_text = String::from_utf8_lossy(header_bytes).into_owned();
        let mut lines = header_text.split("\r\n");

        let start_line = lines.next().unwrap_or("");
        let mut tokens = start_line.split(' ');
        let method = match tokens.next() {
            Some("GET") => Method::Get,
            Some("POST") => Method::Post,
            _ => return Feed::Malformed("unsupported or missing method"),
        };
        let uri = match tokens.next() {
            Some(uri) if !uri.is_empty() => uri.to_string(),
            _ => return Feed::Malformed("missing request URI"),
        };

        let mut headers = BTreeMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = match headers.get("content-length") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(len) => len,
                Err(_) => return Feed::Malformed("unparseable content length"),
            },
            None => 0,
        };

        // Whatever followed the terminator in the same read is body.
        let body = self.buf[terminator + CRLF2.len()..].to_vec();
        self.buf.clear();

        self.finish_or_stash(PartialRequest {
            method,
            uri,
            headers,
            content_length,
            body,
        })
    }

    fn finish_or_stash(&mut self, mut partial: PartialRequest) -> Feed {
        if partial.body.len() >= partial.content_length {
            partial.body.truncate(partial.content_length);
            Feed::Complete(Request {
                method: partial.method,
                uri: partial.uri,
                headers: partial.headers,
                body: partial.body,
            })
        } else {
            self.parsed = Some(partial);
            Feed::NeedMore
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF2.len()).position(|w| w == CRLF2)
}
