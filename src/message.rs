//! # Summary
//!
//! This module defines the control messages exchanged between the coordinator
//! and participant nodes, along with their textual encoding.
//!
//! Every frame is a single line of UTF-8 text. Tokens are separated by any mix
//! of whitespace, commas, parentheses and brackets, and the first token is the
//! message tag. Encoding is provided by `Display`, decoding by `FromStr`.

use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

/// Characters that separate tokens in addition to whitespace.
const DELIMITERS: [char; 5] = [',', '(', ')', '[', ']'];

/// Unique, totally ordered proposal identifier.
///
/// Ordered by `counter` first, with `node` breaking ties between
/// proposers that picked the same counter.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalId {
    pub counter: u64,
    pub node: u32,
}

impl ProposalId {
    pub fn new(counter: u64, node: u32) -> Self {
        ProposalId { counter, node }
    }
}

/// Key-value operation under vote.
///
/// Values compare by bit pattern, so equality is total.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug)]
pub enum Operation {
    Put { key: i32, value: f32 },
    Get { key: i32 },
    Delete { key: i32 },
}

impl Operation {
    pub fn key(&self) -> i32 {
        match self {
        | Operation::Put { key, .. }
        | Operation::Get { key }
        | Operation::Delete { key } => *key,
        }
    }

    /// Whether the operation can be stored. Rejects NaN and infinite values.
    pub fn is_valid(&self) -> bool {
        match self {
        | Operation::Put { value, .. } => value.is_finite(),
        | Operation::Get { .. } | Operation::Delete { .. } => true,
        }
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
        | (Operation::Put { key: a, value: x }, Operation::Put { key: b, value: y }) => {
            a == b && x.to_bits() == y.to_bits()
        }
        | (Operation::Get { key: a }, Operation::Get { key: b }) => a == b,
        | (Operation::Delete { key: a }, Operation::Delete { key: b }) => a == b,
        | _ => false,
        }
    }
}

impl Eq for Operation {}

/// Participant role in a round.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Proposer,
    Acceptor,
    Learner,
}

impl Role {
    /// Decodes the numeric role override accepted on the node command line.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
        | 1 => Some(Role::Proposer),
        | 2 => Some(Role::Acceptor),
        | 3 => Some(Role::Learner),
        | _ => None,
        }
    }
}

/// Why the coordinator gave up on a round.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// Quorum was not reached before the round deadline.
    Timeout,

    /// No acceptor was connected when the round started.
    NoAcceptors,

    /// Too many acceptors left for a quorum to remain possible.
    NoQuorum,

    /// Acceptors refused because they promised a higher proposal.
    Preempted(ProposalId),
}

/// Wire-level control message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Declares a non-default role at connect time.
    Role(Role),

    /// Asks the coordinator to start a round.
    Request(ProposalId, Operation),

    /// Phase one broadcast.
    Prepare(ProposalId),

    /// Phase one vote, carrying any previously accepted proposal.
    Promise(ProposalId, Option<(ProposalId, Operation)>),

    /// Rejection of a stale PREPARE or ACCEPT, with the acceptor's promise.
    Ignored(ProposalId, Option<ProposalId>),

    /// Phase two broadcast.
    Accept(ProposalId, Operation),

    /// Phase two vote.
    Accepted(ProposalId, Operation),

    /// Decided value, to be applied locally.
    Commit(ProposalId, Operation),

    /// Round complete, acceptors reset.
    Done,

    /// Round failed, sent to the originating proposer.
    Abort(ProposalId, AbortReason),

    /// Liveness heartbeat.
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty frame")]
    Empty,
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {what} `{token}`")]
    Invalid { what: &'static str, token: String },
    #[error("unexpected token `{0}`")]
    Trailing(String),
}

/// Cursor over the tokens of a single frame.
struct Tokens<'a>(std::vec::IntoIter<&'a str>);

impl<'a> Tokens<'a> {
    fn new(frame: &'a str) -> Self {
        let tokens = frame
            .split(|c: char| c.is_whitespace() || DELIMITERS.contains(&c))
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();
        Tokens(tokens.into_iter())
    }

    fn peek(&self) -> Option<&'a str> {
        self.0.as_slice().first().copied()
    }

    fn next(&mut self, what: &'static str) -> Result<&'a str, ParseError> {
        self.0.next().ok_or(ParseError::Missing(what))
    }

    fn parse<T: FromStr>(&mut self, what: &'static str) -> Result<T, ParseError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| ParseError::Invalid {
            what,
            token: token.to_string(),
        })
    }

    fn proposal(&mut self) -> Result<ProposalId, ParseError> {
        self.parse("proposal id")
    }

    fn operation(&mut self) -> Result<Operation, ParseError> {
        let kind = self.next("operation")?;
        match kind.to_ascii_lowercase().as_str() {
        | "put" => {
            let key = self.parse("key")?;
            let token = self.next("value")?;
            match token.parse::<f32>() {
            | Ok(value) if value.is_finite() => Ok(Operation::Put { key, value }),
            | _ => Err(ParseError::Invalid { what: "value", token: token.to_string() }),
            }
        }
        | "get" => Ok(Operation::Get { key: self.parse("key")? }),
        | "delete" => Ok(Operation::Delete { key: self.parse("key")? }),
        | _ => Err(ParseError::Invalid {
            what: "operation",
            token: kind.to_string(),
        }),
        }
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.0.next() {
        | None => Ok(()),
        | Some(token) => Err(ParseError::Trailing(token.to_string())),
        }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.counter, self.node)
    }
}

impl FromStr for ProposalId {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Invalid {
            what: "proposal id",
            token: s.to_string(),
        };
        let (counter, node) = s.split_once(':').ok_or_else(invalid)?;
        Ok(ProposalId {
            counter: counter.parse().map_err(|_| invalid())?,
            node: node.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Operation::Put { key, value } => write!(fmt, "[put,{},{}]", key, value),
        | Operation::Get { key } => write!(fmt, "[get,{}]", key),
        | Operation::Delete { key } => write!(fmt, "[delete,{}]", key),
        }
    }
}

/// Accepts both the wire form `[put,1000,3.86]` and the
/// command-line form `put(1000, 3.86)`.
impl FromStr for Operation {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Tokens::new(s);
        if tokens.peek().is_none() {
            return Err(ParseError::Empty)
        }
        let operation = tokens.operation()?;
        tokens.finish()?;
        Ok(operation)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Role::Proposer => write!(fmt, "PROPOSER"),
        | Role::Acceptor => write!(fmt, "ACCEPTOR"),
        | Role::Learner => write!(fmt, "LEARNER"),
        }
    }
}

impl FromStr for Role {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
        | "PROPOSER" => Ok(Role::Proposer),
        | "ACCEPTOR" => Ok(Role::Acceptor),
        | "LEARNER" => Ok(Role::Learner),
        | _ => Err(ParseError::Invalid { what: "role", token: s.to_string() }),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | AbortReason::Timeout => write!(fmt, "TIMEOUT"),
        | AbortReason::NoAcceptors => write!(fmt, "NO_ACCEPTORS"),
        | AbortReason::NoQuorum => write!(fmt, "NO_QUORUM"),
        | AbortReason::Preempted(promised) => write!(fmt, "PREEMPTED {}", promised),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Message::Role(role) => write!(fmt, "ROLE {}", role),
        | Message::Request(id, op) => write!(fmt, "REQUEST {} {}", id, op),
        | Message::Prepare(id) => write!(fmt, "PREPARE {}", id),
        | Message::Promise(id, None) => write!(fmt, "PROMISE {}", id),
        | Message::Promise(id, Some((accepted, op))) => {
            write!(fmt, "PROMISE {} ACCEPTED {} {}", id, accepted, op)
        }
        | Message::Ignored(id, None) => write!(fmt, "IGNORED {}", id),
        | Message::Ignored(id, Some(promised)) => write!(fmt, "IGNORED {} {}", id, promised),
        | Message::Accept(id, op) => write!(fmt, "ACCEPT {} {}", id, op),
        | Message::Accepted(id, op) => write!(fmt, "ACCEPTED {} {}", id, op),
        | Message::Commit(id, op) => write!(fmt, "COMMIT {} {}", id, op),
        | Message::Done => write!(fmt, "DONE"),
        | Message::Abort(id, reason) => write!(fmt, "ABORT {} {}", id, reason),
        | Message::Ping => write!(fmt, "PING"),
        }
    }
}

impl FromStr for Message {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Tokens::new(s);
        let tag = tokens.next("tag").map_err(|_| ParseError::Empty)?;
        let message = match tag.to_ascii_uppercase().as_str() {
        | "ROLE" => Message::Role(tokens.parse("role")?),
        | "REQUEST" => Message::Request(tokens.proposal()?, tokens.operation()?),
        | "PREPARE" => Message::Prepare(tokens.proposal()?),
        | "PROMISE" => {
            let id = tokens.proposal()?;
            match tokens.peek() {
            | None => Message::Promise(id, None),
            | Some(keyword) if keyword.eq_ignore_ascii_case("ACCEPTED") => {
                tokens.next("ACCEPTED")?;
                Message::Promise(id, Some((tokens.proposal()?, tokens.operation()?)))
            }
            | Some(other) => return Err(ParseError::Trailing(other.to_string())),
            }
        }
        | "IGNORED" => {
            let id = tokens.proposal()?;
            let promised = match tokens.peek() {
            | None => None,
            | Some(_) => Some(tokens.proposal()?),
            };
            Message::Ignored(id, promised)
        }
        | "ACCEPT" => Message::Accept(tokens.proposal()?, tokens.operation()?),
        | "ACCEPTED" => Message::Accepted(tokens.proposal()?, tokens.operation()?),
        | "COMMIT" => Message::Commit(tokens.proposal()?, tokens.operation()?),
        | "DONE" => Message::Done,
        | "ABORT" => {
            let id = tokens.proposal()?;
            let reason = tokens.next("abort reason")?;
            let reason = match reason.to_ascii_uppercase().as_str() {
            | "TIMEOUT" => AbortReason::Timeout,
            | "NO_ACCEPTORS" => AbortReason::NoAcceptors,
            | "NO_QUORUM" => AbortReason::NoQuorum,
            | "PREEMPTED" => AbortReason::Preempted(tokens.proposal()?),
            | _ => return Err(ParseError::Invalid {
                what: "abort reason",
                token: reason.to_string(),
            }),
            };
            Message::Abort(id, reason)
        }
        | "PING" => Message::Ping,
        | _ => return Err(ParseError::UnknownTag(tag.to_string())),
        };
        tokens.finish()?;
        Ok(message)
    }
}
