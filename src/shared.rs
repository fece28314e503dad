//! # Summary
//!
//! This module implements the coordinator's central hub. The participant
//! records, the single active `Round` and the queue of waiting requests live
//! together behind one `parking_lot::Mutex`, so every role change and every
//! vote is applied atomically no matter which connection task delivered it.
//!
//! Connection tasks never touch counters directly: they hand decoded messages
//! to `Shared::receive`, and the hub performs whatever broadcasts the round
//! asks for through each participant's outbound channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap as Map;
use parking_lot::{Mutex, MutexGuard};

use crate::internal;
use crate::message::{Message, Operation, ProposalId, Role};
use crate::participant::Assignment;
use crate::round::{Phase, Round, Step};

/// Coordinator-side view of one connected participant.
pub struct Record {
    assignment: Assignment,
    tx: internal::Tx<Message>,
}

impl Record {
    pub fn role(&self) -> Role {
        self.assignment.role()
    }
}

/// Number of connected participants per role.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Census {
    pub acceptors: usize,
    pub proposers: usize,
    pub learners: usize,
}

/// Request waiting for the active round to finish.
#[derive(Debug)]
struct Waiting {
    participant: usize,
    id: ProposalId,
    operation: Operation,
}

/// Thread-safe handle to the coordinator hub.
#[derive(Clone)]
pub struct Shared {
    hub: Arc<Mutex<Hub>>,

    /// Bound on how long a round may wait for a quorum
    timeout: Duration,
}

impl Shared {
    pub fn new(timeout: Duration) -> Self {
        Shared {
            hub: Arc::new(Mutex::new(Hub::default())),
            timeout,
        }
    }

    /// Acquires the hub lock.
    pub fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock()
    }

    /// Registers a new participant as an acceptor and returns its ID.
    pub fn connect(&self, tx: internal::Tx<Message>) -> usize {
        let mut hub = self.lock();
        hub.next += 1;
        let id = hub.next;
        hub.participants.insert(id, Record {
            assignment: Assignment::new(Role::Acceptor),
            tx,
        });
        info!("participant {} connected ({} total)", id, hub.participants.len());
        id
    }

    /// Drops a participant. Any round in flight keeps its acceptor count.
    pub fn disconnect(&self, id: usize) {
        let mut hub = self.lock();
        if hub.participants.remove(&id).is_none() {
            return
        }
        hub.queue.retain(|waiting| waiting.participant != id);
        info!("participant {} disconnected ({} total)", id, hub.participants.len());
        let step = hub.round.withdraw(id);
        self.run(&mut hub, step);
    }

    /// Applies one message received from participant `from`.
    pub fn receive(&self, from: usize, message: Message) {
        let mut hub = self.lock();
        if !hub.participants.contains_key(&from) {
            return
        }
        let step = match message {
        | Message::Role(role) => hub.assign(from, role),
        | Message::Request(id, operation) => hub.request(from, id, operation),
        | Message::Promise(id, prior) => hub.round.promise(from, id, prior),
        | Message::Accepted(id, operation) => hub.round.accepted(from, id, operation),
        | Message::Ignored(id, promised) => hub.round.ignored(from, id, promised),
        | Message::Ping => Step::Wait,
        | other => {
            warn!("participant {} sent unexpected {}", from, other);
            Step::Wait
        }
        };
        self.run(&mut hub, step);
    }

    /// Aborts round `id` if it is still waiting for votes.
    pub fn expire(&self, id: ProposalId) {
        let mut hub = self.lock();
        let step = hub.round.expire(id);
        self.run(&mut hub, step);
    }

    pub fn census(&self) -> Census {
        self.lock().census()
    }

    pub fn phase(&self) -> Phase {
        self.lock().round.phase()
    }

    /// Performs `step`, then starts queued requests while the round is idle.
    fn run(&self, hub: &mut Hub, mut step: Step) {
        loop {
            if let Step::Prepare { id, .. } = &step {
                self.schedule(*id);
            }
            hub.dispatch(step);
            if hub.round.phase() != Phase::Idle {
                return
            }
            step = match hub.queue.pop_front() {
            | Some(waiting) => hub.start(waiting),
            | None => return,
            };
        }
    }

    fn schedule(&self, id: ProposalId) {
        let shared = self.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            shared.expire(id);
        });
    }
}

/// Participant records, the active round and the request queue.
#[derive(Default)]
pub struct Hub {
    next: usize,
    participants: Map<usize, Record>,
    round: Round,
    queue: VecDeque<Waiting>,
}

impl Hub {
    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn participant(&self, id: usize) -> Option<&Record> {
        self.participants.get(&id)
    }

    pub fn census(&self) -> Census {
        let mut census = Census::default();
        for record in self.participants.values() {
            match record.role() {
            | Role::Acceptor => census.acceptors += 1,
            | Role::Proposer => census.proposers += 1,
            | Role::Learner => census.learners += 1,
            }
        }
        census
    }

    /// Connected participants currently holding `role`, in connection order.
    fn with_role(&self, role: Role) -> Vec<usize> {
        let mut ids = self.participants
            .iter()
            .filter(|(_, record)| record.role() == role)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Moves a participant to `role`. An acceptor that leaves the role
    /// stops counting as a voter in the active round.
    fn assign(&mut self, id: usize, role: Role) -> Step {
        let record = match self.participants.get_mut(&id) {
        | Some(record) => record,
        | None => return Step::Wait,
        };
        let previous = record.role();
        match record.assignment.transition(role) {
        | Ok(false) => Step::Wait,
        | Ok(true) => {
            info!("participant {} is now {} (history {:?})", id, role, record.assignment.history());
            if previous == Role::Acceptor {
                self.round.withdraw(id)
            } else {
                Step::Wait
            }
        }
        | Err(error) => {
            warn!("participant {}: {}", id, error);
            Step::Wait
        }
        }
    }

    /// Queues a request and promotes its sender to proposer.
    fn request(&mut self, from: usize, id: ProposalId, operation: Operation) -> Step {
        info!("REQUEST {} {} from participant {}", id, operation, from);
        if let Some(active) = self.round.id() {
            info!("queueing {} behind round {} ({} waiting)", id, active, self.queue.len() + 1);
        }
        self.queue.push_back(Waiting { participant: from, id, operation });
        self.assign(from, Role::Proposer)
    }

    /// Starts a round for a queued request over the current acceptors.
    fn start(&mut self, waiting: Waiting) -> Step {
        if !self.participants.contains_key(&waiting.participant) {
            debug!("dropping {} from departed participant {}", waiting.id, waiting.participant);
            return Step::Wait
        }
        let acceptors = self.with_role(Role::Acceptor);
        match self.round.start(waiting.id, waiting.participant, waiting.operation, acceptors) {
        | Ok(step) => step,
        | Err(busy) => {
            warn!("cannot start {}: {}", waiting.id, busy);
            self.queue.push_front(waiting);
            Step::Wait
        }
        }
    }

    fn dispatch(&self, step: Step) {
        match step {
        | Step::Wait => (),
        | Step::Prepare { id, acceptors } => {
            self.narrowcast(&acceptors, Message::Prepare(id));
        }
        | Step::Accept { id, operation, acceptors } => {
            self.narrowcast(&acceptors, Message::Accept(id, operation));
        }
        | Step::Commit { id, operation, proposer, .. } => {
            debug!("delivering {} from round {} (proposer {})", operation, id, proposer);
            self.broadcast(Message::Commit(id, operation));
            self.narrowcast(&self.with_role(Role::Acceptor), Message::Done);
        }
        | Step::Abort { id, proposer, reason } => {
            warn!("round {} aborted: {}", id, reason);
            self.send(proposer, Message::Abort(id, reason));
        }
        }
    }

    /// Forwards a message to one participant, if it is still connected.
    fn send(&self, id: usize, message: Message) {
        if let Some(record) = self.participants.get(&id) {
            record.tx.try_send(message);
        }
    }

    /// Forwards a message to the provided list of participants.
    fn narrowcast<'a, T>(&self, ids: T, message: Message)
        where T: IntoIterator<Item = &'a usize>
    {
        for id in ids.into_iter() {
            self.send(*id, message.clone());
        }
    }

    /// Forwards a message to every connected participant.
    fn broadcast(&self, message: Message) {
        for record in self.participants.values() {
            record.tx.try_send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AbortReason;

    const PUT: Operation = Operation::Put { key: 1000, value: 3.86 };

    fn connect(shared: &Shared) -> (usize, internal::Rx<Message>) {
        let (rx, tx) = internal::new();
        (shared.connect(tx), rx)
    }

    #[tokio::test]
    async fn request_runs_a_round_and_fans_out_the_commit() {
        let shared = Shared::new(Duration::from_secs(5));
        let (a, mut a_rx) = connect(&shared);
        let (b, mut b_rx) = connect(&shared);
        let (p, mut p_rx) = connect(&shared);
        let id = ProposalId::new(1, 9);

        shared.receive(p, Message::Request(id, PUT));
        assert_eq!(shared.census(), Census { acceptors: 2, proposers: 1, learners: 0 });
        assert_eq!(shared.phase(), Phase::AwaitingPromise);
        assert_eq!(a_rx.recv().await, Some(Message::Prepare(id)));
        assert_eq!(b_rx.recv().await, Some(Message::Prepare(id)));

        shared.receive(a, Message::Promise(id, None));
        shared.receive(b, Message::Promise(id, None));
        assert_eq!(a_rx.recv().await, Some(Message::Accept(id, PUT)));
        assert_eq!(b_rx.recv().await, Some(Message::Accept(id, PUT)));

        shared.receive(a, Message::Accepted(id, PUT));
        shared.receive(b, Message::Accepted(id, PUT));
        assert_eq!(p_rx.recv().await, Some(Message::Commit(id, PUT)));
        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(rx.recv().await, Some(Message::Commit(id, PUT)));
            assert_eq!(rx.recv().await, Some(Message::Done));
        }
        assert_eq!(shared.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn promoted_acceptor_leaves_the_round_and_its_request_runs_next() {
        let shared = Shared::new(Duration::from_secs(5));
        let (_a, mut a_rx) = connect(&shared);
        let (p, mut p_rx) = connect(&shared);
        let (q, mut q_rx) = connect(&shared);
        let first = ProposalId::new(1, 1);
        let second = ProposalId::new(1, 2);

        shared.receive(p, Message::Request(first, PUT));
        assert_eq!(a_rx.recv().await, Some(Message::Prepare(first)));
        assert_eq!(q_rx.recv().await, Some(Message::Prepare(first)));

        // Two acceptors need two promises; losing one makes that impossible.
        shared.receive(q, Message::Request(second, Operation::Get { key: 1000 }));
        assert_eq!(p_rx.recv().await, Some(Message::Abort(first, AbortReason::NoQuorum)));
        assert_eq!(a_rx.recv().await, Some(Message::Prepare(second)));
        assert_eq!(shared.lock().round().id(), Some(second));
        assert_eq!(shared.lock().round().num_acceptors(), 1);
    }

    #[tokio::test]
    async fn requests_queue_behind_the_active_round() {
        let shared = Shared::new(Duration::from_secs(5));
        let (a, mut a_rx) = connect(&shared);
        let (p, mut p_rx) = connect(&shared);
        let (q, mut q_rx) = connect(&shared);
        shared.receive(q, Message::Role(Role::Learner));
        let first = ProposalId::new(1, 1);
        let second = ProposalId::new(2, 1);

        shared.receive(p, Message::Request(first, PUT));
        shared.receive(p, Message::Request(second, Operation::Delete { key: 1000 }));
        assert_eq!(a_rx.recv().await, Some(Message::Prepare(first)));

        shared.receive(a, Message::Promise(first, None));
        assert_eq!(a_rx.recv().await, Some(Message::Accept(first, PUT)));
        shared.receive(a, Message::Accepted(first, PUT));

        assert_eq!(p_rx.recv().await, Some(Message::Commit(first, PUT)));
        assert_eq!(q_rx.recv().await, Some(Message::Commit(first, PUT)));
        assert_eq!(a_rx.recv().await, Some(Message::Commit(first, PUT)));
        assert_eq!(a_rx.recv().await, Some(Message::Done));
        assert_eq!(a_rx.recv().await, Some(Message::Prepare(second)));
    }

    #[tokio::test]
    async fn departed_proposers_lose_their_queued_requests() {
        let shared = Shared::new(Duration::from_secs(5));
        let (a, mut a_rx) = connect(&shared);
        let (p, _p_rx) = connect(&shared);
        let (q, _q_rx) = connect(&shared);
        shared.receive(q, Message::Role(Role::Learner));
        let first = ProposalId::new(1, 1);

        shared.receive(p, Message::Request(first, PUT));
        shared.receive(q, Message::Request(ProposalId::new(1, 2), PUT));
        shared.disconnect(q);
        assert_eq!(a_rx.recv().await, Some(Message::Prepare(first)));

        shared.receive(a, Message::Promise(first, None));
        shared.receive(a, Message::Accepted(first, PUT));
        assert_eq!(shared.phase(), Phase::Idle);
        assert_eq!(shared.census(), Census { acceptors: 1, proposers: 1, learners: 0 });
    }

    #[tokio::test]
    async fn round_times_out() {
        let shared = Shared::new(Duration::from_millis(50));
        let (_a, _a_rx) = connect(&shared);
        let (p, mut p_rx) = connect(&shared);
        let id = ProposalId::new(1, 1);

        shared.receive(p, Message::Request(id, PUT));
        assert_eq!(p_rx.recv().await, Some(Message::Abort(id, AbortReason::Timeout)));
        assert_eq!(shared.phase(), Phase::Idle);
    }
}
