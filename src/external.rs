//! # Summary
//!
//! This module abstracts over connections between clients and nodes.
//!
//! Currently uses `tokio-serde`'s bincode format on top of `tokio-util`'s
//! length-delimited codec, which in turn wraps a TCP stream. This lets both
//! ends exchange Rust structs with minimal boilerplate.

use tokio::net::TcpStream;
use tokio_serde::formats::Bincode;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::message::Operation;
use crate::state::Response;
use crate::thread::node::RequestError;

/// What a client sends.
pub type Request = Operation;

/// What a node answers.
pub type Reply = Result<Response, RequestError>;

/// Bidirectional channel receiving `R` and sending `T`, bincode-encoded and
/// length-delimited over TCP.
pub type Channel<R, T> = tokio_serde::Framed<
    Framed<TcpStream, LengthDelimitedCodec>,
    R,
    T,
    Bincode<R, T>,
>;

/// Wraps a connected stream.
pub fn new<R, T>(stream: TcpStream) -> Channel<R, T> {
    tokio_serde::Framed::new(
        Framed::new(stream, LengthDelimitedCodec::new()),
        Bincode::default(),
    )
}
