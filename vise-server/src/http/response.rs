//! HTTP/1.0 response writer
//!
//! Every response carries `Connection: close`; the server never reuses a
//! connection.

use chrono::Utc;

/// Response status codes this server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
}

impl Status {
    fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
        }
    }
}

/// One complete response, written exactly once per connection.
#[derive(Debug)]
pub struct Response {
    pub status: Status,
    content_type: String,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: Status, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body,
        }
    }

    pub fn ok(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Status::Ok, content_type, body)
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::ok("text/html", body.into().into_bytes())
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::ok("text/plain", body.into().into_bytes())
    }

    pub fn json(body: String) -> Self {
        Self::ok("application/json", body.into_bytes())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: Status::BadRequest,
            content_type: "text/plain".to_string(),
            body: message.into().into_bytes(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: Status::NotFound,
            content_type: "text/plain".to_string(),
            body: message.into().into_bytes(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Serialize status line, headers, and body into the wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
        let head = format!(
            "HTTP/1.0 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Date: {}\r\n\
             Cache-Control: no-cache\r\n\
             Connection: close\r\n\r\n",
            self.status.code(),
            self.status.reason(),
            self.content_type,
            self.body.len(),
            date,
        );

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}
