//! # Summary
//!
//! This module implements the quorum-tracking state machine for the single
//! round the coordinator runs at a time.
//!
//! `Round` performs no I/O. Each transition returns a `Step` describing the
//! broadcast the caller must perform. Votes are tracked per acceptor, so
//! duplicates never count twice, and a majority is always measured against
//! the acceptors that were connected when the round started.

use hashbrown::HashSet as Set;

use crate::message::{AbortReason, Operation, ProposalId};

/// Number of positive votes needed out of `acceptors`.
pub fn quorum(acceptors: usize) -> usize {
    acceptors / 2 + 1
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingPromise,
    AwaitingAccept,
    Committed,
}

/// Effect of a transition.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Nothing to send yet.
    Wait,

    /// Send PREPARE to `acceptors`.
    Prepare {
        id: ProposalId,
        acceptors: Vec<usize>,
    },

    /// Send ACCEPT to `acceptors`.
    Accept {
        id: ProposalId,
        operation: Operation,
        acceptors: Vec<usize>,
    },

    /// Deliver the decided operation and release the acceptors.
    Commit {
        id: ProposalId,
        operation: Operation,
        proposer: usize,
        acceptors: Vec<usize>,
    },

    /// Report failure to the proposer.
    Abort {
        id: ProposalId,
        proposer: usize,
        reason: AbortReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("round {0} is still in flight")]
pub struct Busy(pub ProposalId);

#[derive(Debug)]
struct Active {
    id: ProposalId,
    proposer: usize,

    /// Operation under vote; replaced by recovered prior acceptances
    operation: Operation,

    /// Highest prior acceptance adopted so far
    adopted: Option<ProposalId>,

    /// Acceptors eligible to vote, frozen at round start
    acceptors: Vec<usize>,
    quorum: usize,
    phase: Phase,
    promised: Set<usize>,
    accepted: Set<usize>,
    refused: Set<usize>,
    departed: Set<usize>,

    /// Highest promise reported by a refusing acceptor
    highest: Option<ProposalId>,
}

impl Active {
    fn is_voter(&self, participant: usize) -> bool {
        self.acceptors.contains(&participant) && !self.departed.contains(&participant)
    }

    fn votes(&self) -> Option<&Set<usize>> {
        match self.phase {
        | Phase::AwaitingPromise => Some(&self.promised),
        | Phase::AwaitingAccept => Some(&self.accepted),
        | Phase::Idle | Phase::Committed => None,
        }
    }

    fn has_voted(&self, participant: usize) -> bool {
        self.votes().map_or(false, |votes| votes.contains(&participant))
    }

    /// Whether the outstanding acceptors can still complete a majority.
    fn reachable(&self) -> bool {
        let votes = match self.votes() {
        | Some(votes) => votes,
        | None => return true,
        };
        let outstanding = self.acceptors
            .iter()
            .filter(|id| !votes.contains(*id))
            .filter(|id| !self.refused.contains(*id))
            .filter(|id| !self.departed.contains(*id))
            .count();
        votes.len() + outstanding >= self.quorum
    }
}

/// The coordinator's one round, idle between requests.
#[derive(Debug, Default)]
pub struct Round {
    active: Option<Active>,
}

impl Round {
    pub fn new() -> Self {
        Round::default()
    }

    pub fn phase(&self) -> Phase {
        self.active.as_ref().map_or(Phase::Idle, |active| active.phase)
    }

    pub fn id(&self) -> Option<ProposalId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn operation(&self) -> Option<Operation> {
        self.active.as_ref().map(|active| active.operation)
    }

    pub fn num_acceptors(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.acceptors.len())
    }

    pub fn num_promised(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.promised.len())
    }

    pub fn num_accepted(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.accepted.len())
    }

    /// Starts a round for `operation` over the given acceptor snapshot.
    pub fn start(
        &mut self,
        id: ProposalId,
        proposer: usize,
        operation: Operation,
        acceptors: Vec<usize>,
    ) -> Result<Step, Busy> {
        if let Some(active) = &self.active {
            return Err(Busy(active.id))
        }
        if acceptors.is_empty() {
            warn!("round {} has no acceptors", id);
            return Ok(Step::Abort { id, proposer, reason: AbortReason::NoAcceptors })
        }
        let quorum = quorum(acceptors.len());
        info!(
            "starting round {} for {} with {} acceptors (quorum {})",
            id, operation, acceptors.len(), quorum,
        );
        self.active = Some(Active {
            id,
            proposer,
            operation,
            adopted: None,
            acceptors: acceptors.clone(),
            quorum,
            phase: Phase::AwaitingPromise,
            promised: Set::default(),
            accepted: Set::default(),
            refused: Set::default(),
            departed: Set::default(),
            highest: None,
        });
        Ok(Step::Prepare { id, acceptors })
    }

    /// Counts a PROMISE, adopting any higher prior acceptance it carries.
    pub fn promise(
        &mut self,
        from: usize,
        id: ProposalId,
        prior: Option<(ProposalId, Operation)>,
    ) -> Step {
        let active = match self.current(id) {
        | Some(active) => active,
        | None => return Step::Wait,
        };
        if active.phase != Phase::AwaitingPromise || !active.is_voter(from) {
            debug!("dropping PROMISE {} from {} in {:?}", id, from, active.phase);
            return Step::Wait
        }
        if !active.promised.insert(from) {
            debug!("duplicate PROMISE {} from {}", id, from);
            return Step::Wait
        }
        if let Some((prior_id, operation)) = prior {
            if active.adopted.map_or(true, |adopted| prior_id > adopted) {
                info!("round {} adopts {} accepted in {}", id, operation, prior_id);
                active.adopted = Some(prior_id);
                active.operation = operation;
            }
        }
        if active.promised.len() == active.quorum {
            info!("round {} reached promise majority ({}/{})", id, active.promised.len(), active.acceptors.len());
            active.phase = Phase::AwaitingAccept;
            return Step::Accept {
                id,
                operation: active.operation,
                acceptors: active.acceptors.clone(),
            }
        }
        trace!("round {} has {}/{} promises", id, active.promised.len(), active.quorum);
        Step::Wait
    }

    /// Counts an ACCEPTED vote, committing on majority.
    pub fn accepted(&mut self, from: usize, id: ProposalId, operation: Operation) -> Step {
        let active = match self.current(id) {
        | Some(active) => active,
        | None => return Step::Wait,
        };
        if active.phase != Phase::AwaitingAccept || !active.is_voter(from) {
            debug!("dropping ACCEPTED {} from {} in {:?}", id, from, active.phase);
            return Step::Wait
        }
        if operation != active.operation {
            warn!("ACCEPTED {} from {} carries {} instead of {}", id, from, operation, active.operation);
            return Step::Wait
        }
        if !active.accepted.insert(from) {
            debug!("duplicate ACCEPTED {} from {}", id, from);
            return Step::Wait
        }
        if active.accepted.len() < active.quorum {
            trace!("round {} has {}/{} accepts", id, active.accepted.len(), active.quorum);
            return Step::Wait
        }
        active.phase = Phase::Committed;
        info!("round {} committed {} ({}/{})", id, active.operation, active.accepted.len(), active.acceptors.len());
        match self.active.take() {
        | Some(done) => Step::Commit {
            id: done.id,
            operation: done.operation,
            proposer: done.proposer,
            acceptors: done.acceptors,
        },
        | None => Step::Wait,
        }
    }

    /// Records an IGNORED reply; aborts once a majority is out of reach.
    pub fn ignored(&mut self, from: usize, id: ProposalId, promised: Option<ProposalId>) -> Step {
        let active = match self.current(id) {
        | Some(active) => active,
        | None => return Step::Wait,
        };
        if !active.is_voter(from) || active.has_voted(from) {
            return Step::Wait
        }
        debug!("acceptor {} refused round {} (promised {:?})", from, id, promised);
        active.refused.insert(from);
        if let Some(promised) = promised {
            active.highest = std::cmp::max(active.highest, Some(promised));
        }
        self.check_reachable()
    }

    /// Removes an acceptor from the live voters, either because it
    /// disconnected or because it became a proposer.
    pub fn withdraw(&mut self, participant: usize) -> Step {
        match self.active.as_mut() {
        | Some(active) if active.acceptors.contains(&participant) => {
            debug!("acceptor {} left round {}", participant, active.id);
            active.departed.insert(participant);
        }
        | _ => return Step::Wait,
        }
        self.check_reachable()
    }

    /// Aborts round `id` if it is still in flight.
    pub fn expire(&mut self, id: ProposalId) -> Step {
        if self.current(id).is_none() {
            return Step::Wait
        }
        warn!(
            "round {} timed out with {} promises and {} accepts",
            id, self.num_promised(), self.num_accepted(),
        );
        self.abort(AbortReason::Timeout)
    }

    fn current(&mut self, id: ProposalId) -> Option<&mut Active> {
        match self.active.as_mut() {
        | Some(active) if active.id == id => Some(active),
        | Some(active) => {
            debug!("dropping vote for {} during round {}", id, active.id);
            None
        }
        | None => {
            debug!("dropping vote for {} while idle", id);
            None
        }
        }
    }

    fn check_reachable(&mut self) -> Step {
        let reason = match &self.active {
        | Some(active) if !active.reachable() => match active.highest {
            | Some(highest) => AbortReason::Preempted(highest),
            | None => AbortReason::NoQuorum,
        },
        | _ => return Step::Wait,
        };
        warn!("round {:?} can no longer reach a majority", self.id());
        self.abort(reason)
    }

    fn abort(&mut self, reason: AbortReason) -> Step {
        match self.active.take() {
        | Some(active) => Step::Abort {
            id: active.id,
            proposer: active.proposer,
            reason,
        },
        | None => Step::Wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: ProposalId = ProposalId { counter: 10, node: 1 };
    const MINE: Operation = Operation::Put { key: 1000, value: 9.9 };
    const PROPOSER: usize = 0;

    fn started(acceptors: &[usize]) -> Round {
        let mut round = Round::new();
        let step = round.start(P, PROPOSER, MINE, acceptors.to_vec()).unwrap();
        assert_eq!(step, Step::Prepare { id: P, acceptors: acceptors.to_vec() });
        round
    }

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(2), 2);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn three_acceptors_commit_with_two_votes() {
        let put = Operation::Put { key: 1000, value: 3.86 };
        let mut round = Round::new();
        round.start(P, PROPOSER, put, vec![1, 2, 3]).unwrap();
        assert_eq!(round.phase(), Phase::AwaitingPromise);

        assert_eq!(round.promise(1, P, None), Step::Wait);
        let step = round.promise(2, P, None);
        assert_eq!(step, Step::Accept { id: P, operation: put, acceptors: vec![1, 2, 3] });
        assert!(round.num_promised() >= quorum(round.num_acceptors()));
        assert_eq!(round.phase(), Phase::AwaitingAccept);

        // Majority crossing is only reported once.
        assert_eq!(round.promise(3, P, None), Step::Wait);

        assert_eq!(round.accepted(1, P, put), Step::Wait);
        assert_eq!(
            round.accepted(3, P, put),
            Step::Commit { id: P, operation: put, proposer: PROPOSER, acceptors: vec![1, 2, 3] },
        );
        assert_eq!(round.phase(), Phase::Idle);
        assert_eq!(round.num_accepted(), 0);
    }

    #[test]
    fn accepts_match_a_recovered_nan_value() {
        // Stores written before values were checked may still hold one.
        let nan = Operation::Put { key: 1, value: f32::NAN };
        let mut round = started(&[1]);
        assert_eq!(
            round.promise(1, P, Some((ProposalId::new(3, 3), nan))),
            Step::Accept { id: P, operation: nan, acceptors: vec![1] },
        );
        assert!(matches!(round.accepted(1, P, nan), Step::Commit { .. }));
        assert_eq!(round.phase(), Phase::Idle);
    }

    #[test]
    fn adopts_prior_accepted_value() {
        let prior = Operation::Put { key: 1000, value: 2.0 };
        let mut round = started(&[1, 2, 3]);
        round.promise(1, P, Some((ProposalId::new(5, 2), prior)));
        match round.promise(2, P, None) {
        | Step::Accept { operation, .. } => assert_eq!(operation, prior),
        | other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn adopts_highest_prior_acceptance() {
        let older = Operation::Put { key: 1, value: 1.0 };
        let newer = Operation::Delete { key: 1 };
        let mut round = started(&[1, 2, 3, 4, 5]);
        round.promise(1, P, Some((ProposalId::new(7, 3), newer)));
        round.promise(2, P, Some((ProposalId::new(4, 1), older)));
        assert_eq!(round.operation(), Some(newer));
        match round.promise(3, P, None) {
        | Step::Accept { operation, .. } => assert_eq!(operation, newer),
        | other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn duplicates_and_strangers_do_not_count() {
        let mut round = started(&[1, 2, 3]);
        assert_eq!(round.promise(1, P, None), Step::Wait);
        assert_eq!(round.promise(1, P, None), Step::Wait);
        assert_eq!(round.promise(9, P, None), Step::Wait);
        assert_eq!(round.promise(2, ProposalId::new(3, 3), None), Step::Wait);
        assert_eq!(round.num_promised(), 1);
        assert_eq!(round.phase(), Phase::AwaitingPromise);

        // Accepts before the promise majority are ignored.
        assert_eq!(round.accepted(2, P, MINE), Step::Wait);
        assert_eq!(round.num_accepted(), 0);
    }

    #[test]
    fn late_messages_after_commit_are_ignored() {
        let mut round = started(&[1, 2, 3]);
        round.promise(1, P, None);
        round.promise(2, P, None);
        round.accepted(1, P, MINE);
        assert!(matches!(round.accepted(2, P, MINE), Step::Commit { .. }));
        assert_eq!(round.promise(3, P, None), Step::Wait);
        assert_eq!(round.accepted(3, P, MINE), Step::Wait);
        assert_eq!(round.phase(), Phase::Idle);
    }

    #[test]
    fn second_request_is_rejected_while_busy() {
        let mut round = started(&[1, 2, 3]);
        round.promise(1, P, None);
        let other = ProposalId::new(11, 2);
        assert_eq!(round.start(other, 4, MINE, vec![1, 2]), Err(Busy(P)));
        assert_eq!(round.id(), Some(P));
        assert_eq!(round.num_acceptors(), 3);
        assert_eq!(round.num_promised(), 1);
    }

    #[test]
    fn timeout_aborts_and_frees_the_round() {
        let mut round = started(&[1, 2, 3]);
        round.promise(1, P, None);
        assert_eq!(round.expire(ProposalId::new(1, 1)), Step::Wait);
        assert_eq!(
            round.expire(P),
            Step::Abort { id: P, proposer: PROPOSER, reason: AbortReason::Timeout },
        );
        assert_eq!(round.phase(), Phase::Idle);
        assert_eq!(round.expire(P), Step::Wait);

        let next = ProposalId::new(12, 1);
        assert!(matches!(round.start(next, PROPOSER, MINE, vec![1]), Ok(Step::Prepare { .. })));
        assert!(matches!(round.promise(1, next, None), Step::Accept { .. }));
    }

    #[test]
    fn refusals_preempt_the_round() {
        let mut round = started(&[1, 2, 3]);
        assert_eq!(round.ignored(1, P, Some(ProposalId::new(20, 4))), Step::Wait);
        assert_eq!(
            round.ignored(2, P, Some(ProposalId::new(15, 2))),
            Step::Abort {
                id: P,
                proposer: PROPOSER,
                reason: AbortReason::Preempted(ProposalId::new(20, 4)),
            },
        );
    }

    #[test]
    fn disconnects_keep_the_denominator() {
        let mut round = started(&[1, 2, 3]);
        round.promise(1, P, None);
        assert_eq!(round.withdraw(2), Step::Wait);
        assert_eq!(round.num_acceptors(), 3);
        // Departed acceptors can no longer vote.
        assert_eq!(round.promise(2, P, None), Step::Wait);
        assert!(matches!(round.promise(3, P, None), Step::Accept { .. }));
        assert_eq!(
            round.withdraw(3),
            Step::Abort { id: P, proposer: PROPOSER, reason: AbortReason::NoQuorum },
        );
    }

    #[test]
    fn withdrawing_a_stranger_is_harmless() {
        let mut round = started(&[1, 2, 3]);
        assert_eq!(round.withdraw(PROPOSER), Step::Wait);
        assert_eq!(round.withdraw(7), Step::Wait);
        assert_eq!(round.phase(), Phase::AwaitingPromise);
    }

    #[test]
    fn no_acceptors_aborts_immediately() {
        let mut round = Round::new();
        assert_eq!(
            round.start(P, PROPOSER, MINE, Vec::new()),
            Ok(Step::Abort { id: P, proposer: PROPOSER, reason: AbortReason::NoAcceptors }),
        );
        assert_eq!(round.phase(), Phase::Idle);
    }
}
