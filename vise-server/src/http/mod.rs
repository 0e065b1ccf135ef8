//! Hand-rolled HTTP/1.x plumbing
//!
//! One request per TCP connection, no keep-alive, no pipelining: the
//! per-connection state machine stays trivially sequential, which is the
//! point of framing the protocol by hand instead of pulling in a server
//! framework.

pub mod connection;
pub mod request;
pub mod response;
pub mod routes;
pub mod server;

pub use connection::Connection;
pub use request::{Method, Request, RequestParser};
pub use response::Response;
pub use routes::ServerContext;
