//! # Summary
//!
//! This module implements a node's half of the coordinator link. Each node
//! holds exactly one connection to the coordinator and answers whatever the
//! coordinator sends it according to its current role:
//!
//! - As an acceptor, it answers `PREPARE` and `ACCEPT` from its local
//!   `Acceptor` state and clears that state on `DONE`.
//! - In every role, it applies `COMMIT` to its local store.
//! - Once a local caller submits an operation, the node becomes a proposer
//!   and sends `REQUEST`s, one at a time, until each operation is decided.
//!
//! A proposer whose round is preempted raises its ballot past the highest
//! promise it learned about and tries again. A proposer whose round decides
//! a different operation applies it and re-proposes its own. Both retries
//! are bounded by the configured attempt count and the request deadline.

use std::collections::VecDeque;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::NodeConfig;
use crate::external::Reply;
use crate::internal;
use crate::message::{AbortReason, Message, Operation, ProposalId, Role};
use crate::participant::{Acceptor, Assignment, Ballots};
use crate::socket;
use crate::state::State;

/// Why a submitted operation produced no result.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("round aborted: {0}")]
    Aborted(AbortReason),

    #[error("other proposals won {0} rounds in a row")]
    Superseded(usize),

    /// The deadline passed while the request was still queued or voting at
    /// the coordinator. The operation may yet commit.
    #[error("no decision before the request deadline; outcome unknown")]
    Unresolved,

    /// The coordinator link closed. A round already under way may still
    /// commit without this node.
    #[error("lost connection to the coordinator")]
    Disconnected,

    #[error("cannot store {0}: value must be finite")]
    Rejected(Operation),
}

/// Operation submitted by a local caller.
pub struct Submit {
    pub operation: Operation,
    pub reply: oneshot::Sender<Reply>,
}

/// Local entry point for submitting operations to a running node.
#[derive(Clone, Debug)]
pub struct Handle {
    tx: internal::Tx<Submit>,
}

impl Handle {
    pub(crate) fn new(tx: internal::Tx<Submit>) -> Self {
        Handle { tx }
    }

    /// Proposes `operation` and waits for the round that decides it.
    pub async fn execute(&self, operation: Operation) -> Reply {
        if !operation.is_valid() {
            return Err(RequestError::Rejected(operation))
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submit { operation, reply })
            .map_err(|_| RequestError::Disconnected)?;
        rx.await.unwrap_or(Err(RequestError::Disconnected))
    }

    pub async fn put(&self, key: i32, value: f32) -> Reply {
        self.execute(Operation::Put { key, value }).await
    }

    pub async fn get(&self, key: i32) -> Reply {
        self.execute(Operation::Get { key }).await
    }

    pub async fn delete(&self, key: i32) -> Reply {
        self.execute(Operation::Delete { key }).await
    }
}

/// Operation currently being proposed.
struct Pending {
    id: ProposalId,
    operation: Operation,
    attempts: usize,
    deadline: Instant,
    reply: oneshot::Sender<Reply>,
}

pub struct Node<S: State> {
    rx: socket::Rx,
    tx: socket::Tx,
    requests: internal::Rx<Submit>,
    accepting: bool,

    assignment: Assignment,
    acceptor: Acceptor,
    ballots: Ballots,
    state: S,

    pending: Option<Pending>,
    queue: VecDeque<Submit>,

    timeout: Duration,
    heartbeat: Duration,
    max_attempts: usize,
}

impl<S: State> Node<S> {
    /// Announces the configured role on a fresh coordinator connection.
    /// The coordinator assumes acceptor until told otherwise.
    pub async fn connect(
        config: &NodeConfig<S>,
        stream: TcpStream,
        requests: internal::Rx<Submit>,
    ) -> Result<Self, socket::Error> {
        let (rx, mut tx) = socket::split(stream);
        let role = config.role();
        if role != Role::Acceptor {
            tx.send(&Message::Role(role)).await?;
        }
        info!("node {} connected as {}", config.id(), role);
        Ok(Node {
            rx,
            tx,
            requests,
            accepting: true,
            assignment: Assignment::new(role),
            acceptor: Acceptor::default(),
            ballots: Ballots::new(config.id()),
            state: S::default(),
            pending: None,
            queue: VecDeque::new(),
            timeout: config.timeout(),
            heartbeat: config.heartbeat(),
            max_attempts: config.attempts(),
        })
    }

    pub async fn run(mut self) {
        let mut heartbeat = time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.pending.as_ref().map(|pending| pending.deadline);
            let result = tokio::select! {
                frame = self.rx.recv() => match frame {
                | None => {
                    warn!("coordinator closed the connection");
                    break
                }
                | Some(Ok(message)) => self.respond(message).await,
                | Some(Err(error)) if error.is_fatal() => Err(error),
                | Some(Err(error)) => {
                    warn!("dropping frame from coordinator: {}", error);
                    Ok(())
                }
                },
                submit = self.requests.recv(), if self.accepting => match submit {
                | Some(submit) => self.submit(submit).await,
                | None => {
                    self.accepting = false;
                    Ok(())
                }
                },
                _ = heartbeat.tick() => self.tx.send(&Message::Ping).await,
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire().await
                }
            };
            if let Err(error) = result {
                warn!("coordinator link failed: {}", error);
                break
            }
        }

        self.fail_all(RequestError::Disconnected);
    }

    async fn respond(&mut self, message: Message) -> Result<(), socket::Error> {
        trace!("received {}", message);
        match message {
        | Message::Prepare(id) if self.is_acceptor() => {
            let reply = self.acceptor.prepare(id);
            self.tx.send(&reply).await?;
        }
        | Message::Accept(id, operation) if self.is_acceptor() => {
            let reply = self.acceptor.accept(id, operation);
            self.tx.send(&reply).await?;
        }
        | Message::Prepare(id) | Message::Accept(id, _) => {
            debug!("not an acceptor, skipping round {}", id);
        }
        | Message::Done => self.acceptor.reset(),
        | Message::Commit(id, operation) => self.commit(id, operation).await?,
        | Message::Abort(id, reason) => self.abort(id, reason).await?,
        | other => warn!("unexpected {} from coordinator", other),
        }
        Ok(())
    }

    fn is_acceptor(&self) -> bool {
        self.assignment.role() == Role::Acceptor
    }

    async fn commit(&mut self, id: ProposalId, operation: Operation) -> Result<(), socket::Error> {
        let response = self.state.execute(operation);
        info!("round {} committed {}: {}", id, operation, response);

        let pending = match self.take_pending(id) {
        | Some(pending) => pending,
        | None => return Ok(()),
        };

        if pending.operation == operation {
            pending.reply.send(Ok(response)).ok();
            self.advance().await
        } else {
            info!("round {} decided {} instead of {}", id, operation, pending.operation);
            let error = RequestError::Superseded(pending.attempts);
            self.retry(pending, error).await
        }
    }

    async fn abort(&mut self, id: ProposalId, reason: AbortReason) -> Result<(), socket::Error> {
        let pending = match self.take_pending(id) {
        | Some(pending) => pending,
        | None => return Ok(()),
        };
        warn!("round {} aborted: {}", id, reason);
        match reason {
        | AbortReason::Preempted(promised) => {
            self.ballots.observe(promised);
            self.retry(pending, RequestError::Aborted(reason)).await
        }
        | _ => {
            pending.reply.send(Err(RequestError::Aborted(reason))).ok();
            self.advance().await
        }
        }
    }

    async fn expire(&mut self) -> Result<(), socket::Error> {
        if let Some(pending) = self.pending.take() {
            warn!("no decision on {} after {:?}", pending.operation, self.timeout);
            pending.reply.send(Err(RequestError::Unresolved)).ok();
        }
        self.advance().await
    }

    /// Removes the pending request if it belongs to round `id`.
    fn take_pending(&mut self, id: ProposalId) -> Option<Pending> {
        match &self.pending {
        | Some(pending) if pending.id == id => self.pending.take(),
        | _ => None,
        }
    }

    async fn submit(&mut self, submit: Submit) -> Result<(), socket::Error> {
        if self.pending.is_some() {
            debug!("queueing {} ({} waiting)", submit.operation, self.queue.len() + 1);
            self.queue.push_back(submit);
            return Ok(())
        }
        let deadline = Instant::now() + self.timeout;
        self.propose(submit.operation, 1, deadline, submit.reply).await
    }

    /// Starts the next queued request, skipping callers that gave up.
    async fn advance(&mut self) -> Result<(), socket::Error> {
        while self.pending.is_none() {
            let submit = match self.queue.pop_front() {
            | Some(submit) => submit,
            | None => break,
            };
            if submit.reply.is_closed() {
                continue
            }
            let deadline = Instant::now() + self.timeout;
            self.propose(submit.operation, 1, deadline, submit.reply).await?;
        }
        Ok(())
    }

    async fn retry(&mut self, pending: Pending, error: RequestError) -> Result<(), socket::Error> {
        if pending.attempts >= self.max_attempts || pending.reply.is_closed() {
            pending.reply.send(Err(error)).ok();
            return self.advance().await
        }
        self.propose(pending.operation, pending.attempts + 1, pending.deadline, pending.reply).await
    }

    async fn propose(
        &mut self,
        operation: Operation,
        attempts: usize,
        deadline: Instant,
        reply: oneshot::Sender<Reply>,
    ) -> Result<(), socket::Error> {
        match self.assignment.transition(Role::Proposer) {
        | Ok(true) => info!("now acting as {}", Role::Proposer),
        | Ok(false) => (),
        | Err(error) => warn!("{}", error),
        }
        self.acceptor.reset();

        let id = self.ballots.next();
        info!("proposing {} as {} (attempt {})", operation, id, attempts);
        self.pending = Some(Pending { id, operation, attempts, deadline, reply });
        self.tx.send(&Message::Request(id, operation)).await
    }

    fn fail_all(&mut self, error: RequestError) {
        if let Some(pending) = self.pending.take() {
            pending.reply.send(Err(error.clone())).ok();
        }
        for submit in self.queue.drain(..) {
            submit.reply.send(Err(error.clone())).ok();
        }
    }
}
