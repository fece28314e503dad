//! # Summary
//!
//! This module abstracts over the connection between a node and the coordinator.
//!
//! Wraps `tokio-util`'s `LinesCodec` around the two halves of a TCP stream, so
//! that each frame is one line of text, and converts lines to and from
//! `Message` on the way through.
//!
//! `FramedRead` ends the stream after any decoder error, so the read side
//! uses `LineCodec`, which reports an oversized or non-UTF-8 line as a
//! skipped frame instead. Only errors from the stream itself are fatal.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::message::{Message, ParseError};

/// Longest accepted frame, in bytes.
pub const MAX_FRAME: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] LinesCodecError),
    #[error("unreadable frame: {0}")]
    Unreadable(LinesCodecError),
    #[error("malformed frame: {0}")]
    Malformed(#[from] ParseError),
}

impl Error {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
        | Error::Transport(_) => true,
        | Error::Unreadable(_) | Error::Malformed(_) => false,
        }
    }
}

/// One decoded line, or the reason a line was thrown away.
#[derive(Debug)]
pub enum Frame {
    Line(String),
    Skipped(LinesCodecError),
}

/// Line decoder that survives bad lines.
///
/// `LinesCodec` consumes an invalid UTF-8 line before reporting it, and
/// keeps discarding an oversized line up to its newline on the calls that
/// follow, so turning both errors into `Frame::Skipped` leaves the buffer
/// at the start of the next line.
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        LineCodec(LinesCodec::new_with_max_length(max_length))
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.0.decode(src) {
        | Ok(line) => Ok(line.map(Frame::Line)),
        | Err(error) => Ok(Some(Frame::Skipped(error))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.0.decode_eof(src) {
        | Ok(line) => Ok(line.map(Frame::Line)),
        | Err(error) => Ok(Some(Frame::Skipped(error))),
        }
    }
}

/// Receiving half of a coordinator link.
pub struct Rx(FramedRead<OwnedReadHalf, LineCodec>);

/// Transmitting half of a coordinator link.
pub struct Tx(FramedWrite<OwnedWriteHalf, LinesCodec>);

/// Split a `TcpStream` into a pair of message channels.
pub fn split(stream: TcpStream) -> (Rx, Tx) {
    let (rx, tx) = stream.into_split();
    let rx = FramedRead::new(rx, LineCodec::new(MAX_FRAME));
    let tx = FramedWrite::new(tx, LinesCodec::new_with_max_length(MAX_FRAME));
    (Rx(rx), Tx(tx))
}

impl Rx {
    /// Reads the next frame. `None` means the peer closed the connection.
    pub async fn recv(&mut self) -> Option<Result<Message, Error>> {
        let line = match self.0.next().await? {
        | Ok(Frame::Line(line)) => line,
        | Ok(Frame::Skipped(error)) => return Some(Err(Error::Unreadable(error))),
        | Err(error) => return Some(Err(Error::from(error))),
        };
        Some(line.parse::<Message>().map_err(Error::from))
    }
}

impl Tx {
    pub async fn send(&mut self, message: &Message) -> Result<(), Error> {
        trace!("sending {}", message);
        self.0.send(message.to_string()).await?;
        Ok(())
    }
}
