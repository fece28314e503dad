//! # Summary
//!
//! This module holds the bookkeeping each participant keeps for itself:
//! its role, the promise and acceptance state it maintains while acting as
//! an acceptor, and the generator for the proposal IDs it issues.

use crate::message::{Message, Operation, ProposalId, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot change role from {from} to {to}")]
pub struct RoleError {
    pub from: Role,
    pub to: Role,
}

/// Role of a participant over the lifetime of one connection.
///
/// Starts out as the configured role and only ever moves away from
/// `Acceptor`. Every change is recorded.
#[derive(Clone, Debug)]
pub struct Assignment {
    history: Vec<Role>,
}

impl Assignment {
    pub fn new(role: Role) -> Self {
        Assignment { history: vec![role] }
    }

    pub fn role(&self) -> Role {
        *self.history.last().unwrap_or(&Role::Acceptor)
    }

    /// Roles held so far, oldest first.
    pub fn history(&self) -> &[Role] {
        &self.history
    }

    /// Moves to `role`, returning whether anything changed.
    pub fn transition(&mut self, role: Role) -> Result<bool, RoleError> {
        let current = self.role();
        if current == role {
            return Ok(false)
        }
        if role == Role::Acceptor {
            return Err(RoleError { from: current, to: role })
        }
        self.history.push(role);
        Ok(true)
    }
}

/// Acceptor half of a participant: the highest promise made and the
/// proposal accepted since the last DONE.
#[derive(Clone, Debug, Default)]
pub struct Acceptor {
    /// Highest proposal promised
    promised: Option<ProposalId>,

    /// Most recently accepted proposal
    accepted: Option<(ProposalId, Operation)>,
}

impl Acceptor {
    pub fn promised(&self) -> Option<ProposalId> {
        self.promised
    }

    pub fn accepted(&self) -> Option<(ProposalId, Operation)> {
        self.accepted
    }

    /// Promises `id` unless an equal or higher proposal was already promised.
    pub fn prepare(&mut self, id: ProposalId) -> Message {
        match self.promised {
        | Some(promised) if id <= promised => {
            debug!("ignoring PREPARE {} below promise {}", id, promised);
            Message::Ignored(id, Some(promised))
        }
        | _ => {
            self.promised = Some(id);
            Message::Promise(id, self.accepted)
        }
        }
    }

    /// Accepts `(id, op)` unless a higher proposal was promised.
    pub fn accept(&mut self, id: ProposalId, op: Operation) -> Message {
        match self.promised {
        | Some(promised) if id < promised => {
            debug!("ignoring ACCEPT {} below promise {}", id, promised);
            Message::Ignored(id, Some(promised))
        }
        | _ => {
            self.promised = Some(id);
            self.accepted = Some((id, op));
            Message::Accepted(id, op)
        }
        }
    }

    /// Forgets the finished round.
    pub fn reset(&mut self) {
        self.promised = None;
        self.accepted = None;
    }
}

/// Generator for the proposal IDs issued by one node.
#[derive(Copy, Clone, Debug)]
pub struct Ballots {
    node: u32,
    counter: u64,
}

impl Ballots {
    pub fn new(node: u32) -> Self {
        Ballots { node, counter: 0 }
    }

    /// Issues an ID strictly greater than every ID issued so far.
    pub fn next(&mut self) -> ProposalId {
        self.counter += 1;
        ProposalId::new(self.counter, self.node)
    }

    /// Records a competing proposal so that the next ID outranks it.
    pub fn observe(&mut self, seen: ProposalId) {
        self.counter = std::cmp::max(self.counter, seen.counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(counter: u64, node: u32) -> ProposalId {
        ProposalId::new(counter, node)
    }

    const PUT: Operation = Operation::Put { key: 1000, value: 2.0 };

    #[test]
    fn role_never_returns_to_acceptor() {
        let mut assignment = Assignment::new(Role::Acceptor);
        assert_eq!(assignment.transition(Role::Acceptor), Ok(false));
        assert_eq!(assignment.transition(Role::Proposer), Ok(true));
        assert_eq!(assignment.transition(Role::Proposer), Ok(false));
        assert_eq!(
            assignment.transition(Role::Acceptor),
            Err(RoleError { from: Role::Proposer, to: Role::Acceptor }),
        );
        assert_eq!(assignment.role(), Role::Proposer);
        assert_eq!(assignment.history(), &[Role::Acceptor, Role::Proposer]);
    }

    #[test]
    fn promise_carries_prior_acceptance() {
        let mut acceptor = Acceptor::default();
        assert_eq!(acceptor.prepare(id(5, 1)), Message::Promise(id(5, 1), None));
        assert_eq!(acceptor.accept(id(5, 1), PUT), Message::Accepted(id(5, 1), PUT));
        assert_eq!(
            acceptor.prepare(id(10, 2)),
            Message::Promise(id(10, 2), Some((id(5, 1), PUT))),
        );
    }

    #[test]
    fn stale_proposals_are_ignored() {
        let mut acceptor = Acceptor::default();
        acceptor.prepare(id(7, 1));
        assert_eq!(acceptor.prepare(id(7, 1)), Message::Ignored(id(7, 1), Some(id(7, 1))));
        assert_eq!(acceptor.prepare(id(6, 9)), Message::Ignored(id(6, 9), Some(id(7, 1))));
        assert_eq!(acceptor.accept(id(6, 9), PUT), Message::Ignored(id(6, 9), Some(id(7, 1))));
        assert_eq!(acceptor.accept(id(7, 1), PUT), Message::Accepted(id(7, 1), PUT));
        assert_eq!(acceptor.accepted(), Some((id(7, 1), PUT)));
    }

    #[test]
    fn safety_holds_over_interleavings() {
        // Deterministic walk over prepares and accepts with mixed IDs.
        let ids = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9];
        let mut acceptor = Acceptor::default();
        for (step, counter) in ids.iter().enumerate() {
            let proposal = id(*counter, (step % 3) as u32);
            let before = acceptor.promised();
            let reply = if step % 2 == 0 {
                acceptor.prepare(proposal)
            } else {
                acceptor.accept(proposal, PUT)
            };
            match reply {
            | Message::Promise(promised, _) => {
                assert!(before.map_or(true, |before| promised > before));
            }
            | Message::Accepted(accepted, _) => {
                assert!(before.map_or(true, |before| accepted >= before));
            }
            | Message::Ignored(..) => assert_eq!(acceptor.promised(), before),
            | other => panic!("unexpected reply {:?}", other),
            }
            assert!(acceptor.promised() >= before);
        }
    }

    #[test]
    fn reset_forgets_round() {
        let mut acceptor = Acceptor::default();
        acceptor.prepare(id(2, 0));
        acceptor.accept(id(2, 0), PUT);
        acceptor.reset();
        acceptor.reset();
        assert_eq!(acceptor.promised(), None);
        assert_eq!(acceptor.accepted(), None);
        assert_eq!(acceptor.prepare(id(1, 0)), Message::Promise(id(1, 0), None));
    }

    #[test]
    fn ballots_outrank_observed_proposals() {
        let mut ballots = Ballots::new(4);
        assert_eq!(ballots.next(), id(1, 4));
        assert_eq!(ballots.next(), id(2, 4));
        ballots.observe(id(10, 7));
        assert_eq!(ballots.next(), id(11, 4));
        ballots.observe(id(3, 1));
        assert_eq!(ballots.next(), id(12, 4));
    }
}
