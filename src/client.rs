//! # Summary
//!
//! This module implements the client side of a node's request port, along
//! with the parser for the interactive shell's commands.

use std::io;
use std::str::FromStr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::external::{self, Reply, Request};
use crate::message::Operation;
use crate::state::Response;
use crate::thread::node::RequestError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Io(#[from] io::Error),

    #[error("node closed the connection")]
    Closed,

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Connection to a single node.
pub struct Client {
    channel: external::Channel<Reply, Request>,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client { channel: external::new(stream) })
    }

    /// Submits `operation` and waits until the node reports its outcome.
    pub async fn execute(&mut self, operation: Operation) -> Result<Response, ClientError> {
        self.channel.send(operation).await?;
        match self.channel.next().await {
        | Some(reply) => Ok(reply??),
        | None => Err(ClientError::Closed),
        }
    }

    pub async fn put(&mut self, key: i32, value: f32) -> Result<Response, ClientError> {
        self.execute(Operation::Put { key, value }).await
    }

    pub async fn get(&mut self, key: i32) -> Result<Response, ClientError> {
        self.execute(Operation::Get { key }).await
    }

    pub async fn delete(&mut self, key: i32) -> Result<Response, ClientError> {
        self.execute(Operation::Delete { key }).await
    }
}

/// One line of shell input.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    Run(Operation),
    Exit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid command. Command must be PUT(Key, Val), GET(Key), or DELETE(Key)")]
    Invalid,

    #[error("Key must be int. Value must be float")]
    Number,
}

impl FromStr for Command {
    type Err = CommandError;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            return Ok(Command::Exit)
        }

        let tokens = line
            .split(|c: char| c == '(' || c == ')' || c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();

        let key = |token: &str| token.parse::<i32>().map_err(|_| CommandError::Number);
        let operation = match tokens.as_slice() {
        | [tag, k, v] if tag.eq_ignore_ascii_case("put") => Operation::Put {
            key: key(*k)?,
            value: v.parse::<f32>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or(CommandError::Number)?,
        },
        | [tag, k] if tag.eq_ignore_ascii_case("get") => Operation::Get { key: key(*k)? },
        | [tag, k] if tag.eq_ignore_ascii_case("delete") => Operation::Delete { key: key(*k)? },
        | _ => return Err(CommandError::Invalid),
        };
        Ok(Command::Run(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_syntax() {
        assert_eq!(
            "put(1000, 3.86)".parse::<Command>(),
            Ok(Command::Run(Operation::Put { key: 1000, value: 3.86 })),
        );
        assert_eq!(
            "GET 1000".parse::<Command>(),
            Ok(Command::Run(Operation::Get { key: 1000 })),
        );
        assert_eq!(
            "delete(1000)".parse::<Command>(),
            Ok(Command::Run(Operation::Delete { key: 1000 })),
        );
        assert_eq!(" Exit ".parse::<Command>(), Ok(Command::Exit));
    }

    #[test]
    fn rejects_bad_input_locally() {
        assert_eq!("put 1000".parse::<Command>(), Err(CommandError::Invalid));
        assert_eq!("frobnicate 3".parse::<Command>(), Err(CommandError::Invalid));
        assert_eq!("".parse::<Command>(), Err(CommandError::Invalid));
        assert_eq!("get abc".parse::<Command>(), Err(CommandError::Number));
        assert_eq!("put(1000, high)".parse::<Command>(), Err(CommandError::Number));
    }

    #[test]
    fn rejects_non_finite_values() {
        assert_eq!("put(1, NaN)".parse::<Command>(), Err(CommandError::Number));
        assert_eq!("put 1 inf".parse::<Command>(), Err(CommandError::Number));
        assert_eq!("PUT(1, -infinity)".parse::<Command>(), Err(CommandError::Number));
    }
}
