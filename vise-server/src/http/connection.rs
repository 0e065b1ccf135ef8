//! Per-connection state machine
//!
//! Lifecycle of one accepted socket: frame one request (across however many
//! reads it takes), dispatch it, write the single response, shut the socket
//! down. Nothing is reused across requests.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::request::{Feed, RequestParser};
use super::response::Response;
use super::routes::{self, ServerContext};

pub struct Connection {
    socket: TcpStream,
    ctx: Arc<ServerContext>,
    /// Short random name tying this connection's log lines together.
    session: String,
}

impl Connection {
    pub fn new(socket: TcpStream, ctx: Arc<ServerContext>) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let session = format!("s{}", &id[..12]);
        Self {
            socket,
            ctx,
            session,
        }
    }

    /// Serve the single request/response pair this connection exists for.
    pub async fn serve(mut self) {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 8192];

        let request = loop {
            let read = match self.socket.read(&mut buf).await {
                Ok(0) => {
                    debug!(session = %self.session, "peer closed before a full request arrived");
                    self.write_and_close(Response::bad_request("Malformed request"))
                        .await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(session = %self.session, "read error: {}", e);
                    return;
                }
            };

            match parser.feed(&buf[..read]) {
                Feed::Complete(request) => break request,
                Feed::NeedMore => continue,
                Feed::Malformed(reason) => {
                    info!(session = %self.session, reason, "rejecting malformed request");
                    self.write_and_close(Response::bad_request("Malformed request"))
                        .await;
                    return;
                }
            }
        };

        info!(
            session = %self.session,
            method = request.method.as_str(),
            uri = %request.uri,
            body_bytes = request.body.len(),
            "request"
        );

        let response = routes::dispatch(&request, &self.ctx).await;
        debug!(
            session = %self.session,
            status = ?response.status,
            body_bytes = response.body_len(),
            "response"
        );
        self.write_and_close(response).await;
    }

    /// Write the response and shut the socket down in both directions.
    async fn write_and_close(&mut self, response: Response) {
        if let Err(e) = self.socket.write_all(&response.to_bytes()).await {
            warn!(session = %self.session, "write error: {}", e);
            return;
        }
        if let Err(e) = self.socket.shutdown().await {
            debug!(session = %self.session, "shutdown error: {}", e);
        }
    }
}
