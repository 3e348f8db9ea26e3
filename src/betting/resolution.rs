use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use super::Settlement;
use crate::engine::{BetEngine, BetSlot};
use crate::error::{BetError, Result};
use crate::events::BetEvent;
use crate::storage::Record;
use crate::types::{BetId, BetOutcome, BetStatus, ResolutionMethod, ResolverCapability, UserId};

/// One consensus ballot. At most one per (bet, voter); updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionVote {
    pub bet_id: BetId,
    pub voter: UserId,
    pub voted_outcome: BetOutcome,
    pub reasoning: Option<String>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authority over one bet granted by its creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverGrant {
    pub bet_id: BetId,
    pub resolver: UserId,
    pub capability: ResolverCapability,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ResolverGrant {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    pub fn can_resolve(&self) -> bool {
        self.is_active() && self.capability.can_resolve()
    }
}

/// Active ballots per outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub counts: BTreeMap<BetOutcome, u32>,
    pub total: u32,
}

impl VoteCounts {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a ResolutionVote>) -> Self {
        let mut tally = Self::default();
        for vote in votes.into_iter().filter(|v| !v.revoked) {
            *tally.counts.entry(vote.voted_outcome).or_insert(0) += 1;
            tally.total += 1;
        }
        tally
    }

    pub fn count(&self, outcome: BetOutcome) -> u32 {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    /// Outcome holding a strict majority of the ballots cast, if any.
    pub fn majority(&self) -> Option<BetOutcome> {
        self.counts
            .iter()
            .find(|(_, count)| **count * 2 > self.total)
            .map(|(outcome, _)| *outcome)
    }
}

/// Consensus decision: quorum met and one outcome holds a strict majority of
/// the non-revoked ballots. Shared by vote casting and the resolution sweep.
pub fn tally<'a>(votes: impl IntoIterator<Item = &'a ResolutionVote>, quorum: u32) -> Option<BetOutcome> {
    let counts = VoteCounts::from_votes(votes);
    if counts.total < quorum {
        return None;
    }
    counts.majority()
}

/// What a cast or revoked vote did.
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub vote: ResolutionVote,
    pub counts: VoteCounts,
    /// Set when this ballot completed the consensus
    pub settlement: Option<Settlement>,
}

/// What the resolution sweep did with one bet.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepAction {
    Resolved(Settlement),
    Prompted,
    Skipped,
}

impl BetEngine {
    /// Direct resolution for CREATOR_ONLY and ASSIGNED_RESOLVER bets.
    pub fn resolve_bet(&self, actor: UserId, bet_id: BetId, outcome: BetOutcome) -> Result<Settlement> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();

        match slot.bet.resolution_method {
            ResolutionMethod::ConsensusVoting => {
                return Err(BetError::Authorization(format!(
                    "bet {} resolves by consensus vote, use the voting entrypoint",
                    bet_id
                )));
            }
            ResolutionMethod::CreatorOnly if slot.bet.creator != actor => {
                return Err(BetError::Authorization(format!("only the creator can resolve bet {}", bet_id)));
            }
            ResolutionMethod::AssignedResolver
                if !slot.resolvers.get(&actor).map(|g| g.can_resolve()).unwrap_or(false) =>
            {
                return Err(BetError::Authorization(format!("{} holds no resolve grant on bet {}", actor, bet_id)));
            }
            _ => {}
        }
        slot.bet.validate_outcome(outcome)?;
        self.require_closed(&mut slot)?;

        info!(bet_id = %bet_id, resolver = actor.0, outcome = %outcome, "Resolving bet");
        self.settle_locked(&mut slot, outcome)
    }

    /// Cast or change a consensus ballot; resolves the bet once a majority forms.
    pub fn vote_on_resolution(
        &self,
        voter: UserId,
        bet_id: BetId,
        outcome: BetOutcome,
        reasoning: Option<String>,
    ) -> Result<VoteReceipt> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        if slot.bet.resolution_method != ResolutionMethod::ConsensusVoting {
            return Err(BetError::Authorization(format!("bet {} is not resolved by vote", bet_id)));
        }
        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", bet_id, slot.bet.status)));
        }
        if !eligible_voter(&slot, voter) {
            return Err(BetError::Authorization(format!("{} is not eligible to vote on bet {}", voter, bet_id)));
        }
        slot.bet.validate_outcome(outcome)?;
        self.require_closed(&mut slot)?;

        let vote = match slot.votes.get(&voter) {
            Some(existing) => ResolutionVote {
                voted_outcome: outcome,
                reasoning,
                revoked: false,
                revoked_at: None,
                updated_at: now,
                ..existing.clone()
            },
            None => ResolutionVote {
                bet_id,
                voter,
                voted_outcome: outcome,
                reasoning,
                revoked: false,
                revoked_at: None,
                created_at: now,
                updated_at: now,
            },
        };
        self.store.commit(&[Record::Vote(vote.clone())])?;
        slot.votes.insert(voter, vote.clone());

        let counts = VoteCounts::from_votes(slot.votes.values());
        info!(bet_id = %bet_id, voter = voter.0, outcome = %outcome, ballots = counts.total, "Vote cast");
        self.notify(BetEvent::VoteCast { bet_id, voter, outcome });

        let settlement = self.settle_after_ballot(&mut slot);
        Ok(VoteReceipt { vote, counts, settlement })
    }

    /// Withdraw a ballot. Revoked ballots do not count; casting again reactivates it.
    pub fn revoke_vote(&self, voter: UserId, bet_id: BetId) -> Result<VoteReceipt> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", bet_id, slot.bet.status)));
        }
        let mut vote = match slot.votes.get(&voter) {
            Some(vote) if !vote.revoked => vote.clone(),
            _ => return Err(BetError::NotFound(format!("no active vote by {} on bet {}", voter, bet_id))),
        };
        vote.revoked = true;
        vote.revoked_at = Some(now);
        vote.updated_at = now;
        self.store.commit(&[Record::Vote(vote.clone())])?;
        slot.votes.insert(voter, vote.clone());
        info!(bet_id = %bet_id, voter = voter.0, "Vote revoked");

        let counts = VoteCounts::from_votes(slot.votes.values());
        let settlement = self.settle_after_ballot(&mut slot);
        Ok(VoteReceipt { vote, counts, settlement })
    }

    pub fn get_vote_counts(&self, bet_id: BetId) -> Result<VoteCounts> {
        let cell = self.slot(bet_id)?;
        let slot = cell.lock();
        Ok(VoteCounts::from_votes(slot.votes.values()))
    }

    /// Grant `resolver` authority over a bet. Re-granting replaces the capability.
    pub fn assign_resolver(
        &self,
        actor: UserId,
        bet_id: BetId,
        resolver: UserId,
        capability: ResolverCapability,
    ) -> Result<ResolverGrant> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        if slot.bet.creator != actor {
            return Err(BetError::Authorization(format!("only the creator can assign resolvers on bet {}", bet_id)));
        }
        if !slot.bet.resolution_method.accepts_resolvers() {
            return Err(BetError::Validation(format!("bet {} is resolved by its creator only", bet_id)));
        }
        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", bet_id, slot.bet.status)));
        }
        if !self.groups.is_member(resolver, slot.bet.group) {
            return Err(BetError::Validation(format!("{} is not a member of {}", resolver, slot.bet.group)));
        }
        if slot.bet.resolution_method == ResolutionMethod::ConsensusVoting
            && resolver == slot.bet.creator
            && !slot.bet.allow_creator_vote
        {
            return Err(BetError::Validation(format!("creator of bet {} is not allowed to vote on it", bet_id)));
        }

        let grant = ResolverGrant {
            bet_id,
            resolver,
            capability,
            granted_by: actor,
            granted_at: now,
            revoked_at: None,
        };
        self.store.commit(&[Record::Resolver(grant.clone())])?;
        slot.resolvers.insert(resolver, grant.clone());
        info!(bet_id = %bet_id, resolver = resolver.0, capability = ?capability, "Resolver assigned");
        Ok(grant)
    }

    /// Revoke a grant. A ballot its holder can no longer cast is revoked with it.
    pub fn revoke_resolver(&self, actor: UserId, bet_id: BetId, resolver: UserId) -> Result<ResolverGrant> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        if slot.bet.creator != actor {
            return Err(BetError::Authorization(format!("only the creator can revoke resolvers on bet {}", bet_id)));
        }
        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", bet_id, slot.bet.status)));
        }
        let mut grant = match slot.resolvers.get(&resolver) {
            Some(grant) if grant.is_active() => grant.clone(),
            _ => return Err(BetError::NotFound(format!("no active grant for {} on bet {}", resolver, bet_id))),
        };
        grant.revoked_at = Some(now);

        let mut records = vec![Record::Resolver(grant.clone())];
        let still_creator_voter = resolver == slot.bet.creator && slot.bet.allow_creator_vote;
        let dropped_vote = match slot.votes.get(&resolver) {
            Some(vote) if !vote.revoked && !still_creator_voter => {
                let mut vote = vote.clone();
                vote.revoked = true;
                vote.revoked_at = Some(now);
                vote.updated_at = now;
                records.push(Record::Vote(vote.clone()));
                Some(vote)
            }
            _ => None,
        };
        self.store.commit(&records)?;
        slot.resolvers.insert(resolver, grant.clone());
        if let Some(vote) = dropped_vote {
            slot.votes.insert(resolver, vote);
        }
        info!(bet_id = %bet_id, resolver = resolver.0, "Resolver revoked");

        self.settle_if_consensus(&mut slot)?;
        Ok(grant)
    }

    /// One bet's turn in the resolution sweep.
    ///
    /// Retries a settlement that already has a staged outcome, lets a
    /// consensus bet resolve itself when its ballots allow, and otherwise
    /// reminds the group at most once per `reminder`.
    pub fn advance_resolution(&self, bet_id: BetId, reminder: Duration) -> Result<SweepAction> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        if slot.bet.status.is_terminal() || slot.bet.is_deleted() {
            return Ok(SweepAction::Skipped);
        }
        if let (BetStatus::Closed, Some(staged)) = (slot.bet.status, slot.bet.outcome) {
            info!(bet_id = %bet_id, outcome = %staged, "Retrying interrupted settlement");
            return self.settle_locked(&mut slot, staged).map(SweepAction::Resolved);
        }
        if let Some(settlement) = self.settle_if_consensus(&mut slot)? {
            return Ok(SweepAction::Resolved(settlement));
        }
        if !slot.bet.resolution_due(now) {
            return Ok(SweepAction::Skipped);
        }
        self.close_if_expired(&mut slot)?;
        if slot.bet.status != BetStatus::Closed {
            return Ok(SweepAction::Skipped);
        }

        let recently_prompted = slot
            .bet
            .resolution_prompted_at
            .map(|at| now - at < reminder)
            .unwrap_or(false);
        if recently_prompted {
            debug!(bet_id = %bet_id, "Resolution reminder already sent");
            return Ok(SweepAction::Skipped);
        }

        let mut prompted = slot.bet.clone();
        prompted.resolution_prompted_at = Some(now);
        self.store.commit(&[Record::Bet(prompted.clone())])?;
        slot.bet = prompted;

        info!(bet_id = %bet_id, method = ?slot.bet.resolution_method, "Bet awaiting resolution");
        self.notify(BetEvent::AwaitingResolution { bet_id, group: slot.bet.group, creator: slot.bet.creator });
        Ok(SweepAction::Prompted)
    }

    /// Resolution needs a CLOSED bet; one left OPEN past its deadline is closed first.
    fn require_closed(&self, slot: &mut BetSlot) -> Result<()> {
        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", slot.bet.id, slot.bet.status)));
        }
        self.close_if_expired(slot)?;
        if slot.bet.status != BetStatus::Closed {
            return Err(BetError::StateConflict(format!(
                "bet {} is still open for betting until {}",
                slot.bet.id, slot.bet.betting_deadline
            )));
        }
        Ok(())
    }

    /// The ballot is already committed, so a failed settlement is logged and
    /// left for the resolution sweep instead of failing the vote.
    fn settle_after_ballot(&self, slot: &mut BetSlot) -> Option<Settlement> {
        match self.settle_if_consensus(slot) {
            Ok(settlement) => settlement,
            Err(e) => {
                error!(bet_id = %slot.bet.id, error = %e, "Consensus settlement failed, sweep will retry");
                None
            }
        }
    }

    /// Settle a CLOSED consensus bet whose ballots have reached a majority.
    fn settle_if_consensus(&self, slot: &mut BetSlot) -> Result<Option<Settlement>> {
        if slot.bet.resolution_method != ResolutionMethod::ConsensusVoting || slot.bet.status != BetStatus::Closed {
            return Ok(None);
        }
        match tally(slot.votes.values(), slot.bet.minimum_votes_required) {
            Some(outcome) => {
                info!(bet_id = %slot.bet.id, outcome = %outcome, "Consensus reached");
                self.settle_locked(slot, outcome).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// The creator when the bet allows it, plus anyone else holding an active grant.
/// A grant never lets the creator vote on a bet that forbids it.
fn eligible_voter(slot: &BetSlot, user: UserId) -> bool {
    if user == slot.bet.creator {
        return slot.bet.allow_creator_vote;
    }
    slot.resolvers.get(&user).map(|g| g.is_active()).unwrap_or(false)
}
