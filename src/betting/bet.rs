use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::odds;
use crate::error::{BetError, Result};
use crate::ledger::validate_amount;
use crate::types::{
    BetId, BetOutcome, BetStatus, GroupId, ResolutionMethod, UserId, MAX_OPTIONS, MIN_OPTIONS,
};

/// Group bet: a proposition members stake credits on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    /// Unique bet identifier
    pub id: BetId,

    pub creator: UserId,

    /// Group the bet lives in
    pub group: GroupId,

    /// Bet question/title
    pub title: String,

    pub description: String,

    /// Option labels, 2 to 4. Option numbers are 1-based.
    pub options: Vec<String>,

    pub status: BetStatus,

    /// Staged when settlement begins, final once status is RESOLVED
    pub outcome: Option<BetOutcome>,

    /// Fixed at creation
    pub resolution_method: ResolutionMethod,

    /// Stakes are accepted strictly before this instant
    pub betting_deadline: DateTime<Utc>,

    /// When the result is expected to be known
    pub resolve_date: Option<DateTime<Utc>>,

    pub minimum_bet: Decimal,

    pub maximum_bet: Option<Decimal>,

    /// Consensus quorum: active ballots needed before a majority can resolve
    pub minimum_votes_required: u32,

    pub allow_creator_vote: bool,

    /// Credits staked on each option
    pools: Vec<Decimal>,

    /// Active stakes on each option
    participant_counts: Vec<u32>,

    total_pool: Decimal,

    total_participants: u32,

    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Soft delete: hidden from listings, never physically removed
    pub deleted_at: Option<DateTime<Utc>>,

    /// Last "awaiting resolution" reminder
    pub resolution_prompted_at: Option<DateTime<Utc>>,
}

/// Request to create a bet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBet {
    pub group: GroupId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<String>,
    pub resolution_method: ResolutionMethod,
    pub betting_deadline: DateTime<Utc>,
    pub resolve_date: Option<DateTime<Utc>>,
    pub minimum_bet: Decimal,
    pub maximum_bet: Option<Decimal>,
    #[serde(default = "default_minimum_votes")]
    pub minimum_votes_required: u32,
    #[serde(default)]
    pub allow_creator_vote: bool,
}

fn default_minimum_votes() -> u32 {
    1
}

impl Bet {
    pub fn new(id: BetId, creator: UserId, request: NewBet, now: DateTime<Utc>) -> Result<Self> {
        if request.title.trim().is_empty() {
            return Err(BetError::Validation("title must not be empty".into()));
        }
        if request.options.len() < MIN_OPTIONS || request.options.len() > MAX_OPTIONS {
            return Err(BetError::Validation(format!(
                "a bet needs {} to {} options, got {}",
                MIN_OPTIONS,
                MAX_OPTIONS,
                request.options.len()
            )));
        }
        if request.options.iter().any(|o| o.trim().is_empty()) {
            return Err(BetError::Validation("option labels must not be empty".into()));
        }
        if request.betting_deadline <= now {
            return Err(BetError::Validation("betting deadline must be in the future".into()));
        }
        if let Some(resolve_date) = request.resolve_date {
            if resolve_date < request.betting_deadline {
                return Err(BetError::Validation("resolve date must not precede the betting deadline".into()));
            }
        }
        validate_amount(request.minimum_bet)?;
        if let Some(max) = request.maximum_bet {
            validate_amount(max)?;
            if max < request.minimum_bet {
                return Err(BetError::Validation(format!(
                    "maximum bet {} is below minimum bet {}",
                    max, request.minimum_bet
                )));
            }
        }
        if request.resolution_method == ResolutionMethod::ConsensusVoting && request.minimum_votes_required == 0 {
            return Err(BetError::Validation("consensus bets need at least one vote".into()));
        }

        let option_count = request.options.len();
        Ok(Self {
            id,
            creator,
            group: request.group,
            title: request.title.trim().to_string(),
            description: request.description,
            options: request.options.into_iter().map(|o| o.trim().to_string()).collect(),
            status: BetStatus::Open,
            outcome: None,
            resolution_method: request.resolution_method,
            betting_deadline: request.betting_deadline,
            resolve_date: request.resolve_date,
            minimum_bet: request.minimum_bet,
            maximum_bet: request.maximum_bet,
            minimum_votes_required: request.minimum_votes_required,
            allow_creator_vote: request.allow_creator_vote,
            pools: vec![Decimal::ZERO; option_count],
            participant_counts: vec![0; option_count],
            total_pool: Decimal::ZERO,
            total_participants: 0,
            created_at: now,
            closed_at: None,
            resolved_at: None,
            cancelled_at: None,
            deleted_at: None,
            resolution_prompted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_open_for_betting(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Open && now < self.betting_deadline && !self.is_deleted()
    }

    /// OPEN, but the betting deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Open && now >= self.betting_deadline
    }

    /// Unfinished and past its resolve date.
    pub fn resolution_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.resolve_date.map(|d| d <= now).unwrap_or(false)
    }

    /// Vector index for a 1-based option number.
    pub fn option_index(&self, option: u8) -> Result<usize> {
        let index = (option as usize).wrapping_sub(1);
        if index < self.options.len() {
            Ok(index)
        } else {
            Err(BetError::Validation(format!(
                "option {} does not exist, this bet has {} options",
                option,
                self.options.len()
            )))
        }
    }

    /// Outcome must name an option this bet has (DRAW/CANCELLED always allowed).
    pub fn validate_outcome(&self, outcome: BetOutcome) -> Result<()> {
        match outcome.winning_option() {
            Some(option) => self.option_index(option).map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn pool(&self, option: u8) -> Decimal {
        self.option_index(option).map(|i| self.pools[i]).unwrap_or_default()
    }

    pub fn participant_count(&self, option: u8) -> u32 {
        self.option_index(option).map(|i| self.participant_counts[i]).unwrap_or_default()
    }

    pub fn total_pool(&self) -> Decimal {
        self.total_pool
    }

    pub fn total_participants(&self) -> u32 {
        self.total_participants
    }

    /// Current pari-mutuel odds for an option.
    pub fn odds(&self, option: u8) -> Decimal {
        odds::odds(self.total_pool, self.pool(option))
    }

    /// Grow the pools by one stake. Non-positive amounts are ignored.
    pub fn add_stake(&mut self, option: u8, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let index = self.option_index(option)?;
        self.pools[index] += amount;
        self.participant_counts[index] += 1;
        self.total_pool += amount;
        self.total_participants += 1;
        Ok(())
    }

    /// Undo one stake. Going below zero means participations and pools disagree.
    pub fn remove_stake(&mut self, option: u8, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let index = self.option_index(option)?;
        if self.pools[index] < amount
            || self.total_pool < amount
            || self.participant_counts[index] == 0
            || self.total_participants == 0
        {
            return Err(BetError::PoolDesync(format!(
                "bet {} option {}: removing {} from pool {} ({} participants)",
                self.id, option, amount, self.pools[index], self.participant_counts[index]
            )));
        }
        self.pools[index] -= amount;
        self.participant_counts[index] -= 1;
        self.total_pool -= amount;
        self.total_participants -= 1;
        Ok(())
    }

    /// OPEN -> CLOSED
    pub fn close(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != BetStatus::Open {
            return Err(BetError::StateConflict(format!("bet {} is {}, only open bets can close", self.id, self.status)));
        }
        self.status = BetStatus::Closed;
        self.closed_at = Some(now);
        Ok(())
    }

    /// Record the outcome settlement is about to pay out. A retry must use the same one.
    pub fn stage_outcome(&mut self, outcome: BetOutcome) -> Result<()> {
        if self.status != BetStatus::Closed {
            return Err(BetError::StateConflict(format!(
                "bet {} is {}, only closed bets can be settled",
                self.id, self.status
            )));
        }
        self.validate_outcome(outcome)?;
        match self.outcome {
            Some(staged) if staged != outcome => Err(BetError::StateConflict(format!(
                "bet {} is already settling as {}",
                self.id, staged
            ))),
            _ => {
                self.outcome = Some(outcome);
                Ok(())
            }
        }
    }

    /// CLOSED -> RESOLVED
    pub fn resolve(&mut self, outcome: BetOutcome, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", self.id, self.status)));
        }
        self.stage_outcome(outcome)?;
        self.status = BetStatus::Resolved;
        self.resolved_at = Some(now);
        Ok(())
    }

    /// OPEN or CLOSED -> CANCELLED
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", self.id, self.status)));
        }
        self.status = BetStatus::Cancelled;
        self.cancelled_at = Some(now);
        Ok(())
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(now);
        }
    }
}
