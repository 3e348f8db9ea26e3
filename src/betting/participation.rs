use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::odds;
use crate::directory::GroupAction;
use crate::engine::{BetEngine, BetSlot};
use crate::error::{BetError, Result};
use crate::events::BetEvent;
use crate::ledger::{validate_amount, LedgerChange};
use crate::storage::Record;
use crate::types::{BetId, ParticipationStatus, UserId};

/// One user's stake on one bet. At most one row per (user, bet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participation {
    pub id: Uuid,
    pub bet_id: BetId,
    pub user: UserId,
    /// 1-based option; None on a creator row that never staked
    pub chosen_option: Option<u8>,
    pub stake_amount: Decimal,
    /// Snapshot taken at stake time, not a guarantee
    pub potential_winnings: Decimal,
    /// Set once at settlement
    pub actual_winnings: Option<Decimal>,
    pub status: ParticipationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Participation {
    /// Zero-stake bookkeeping row created with the bet.
    pub fn creator_row(bet_id: BetId, user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bet_id,
            user,
            chosen_option: None,
            stake_amount: Decimal::ZERO,
            potential_winnings: Decimal::ZERO,
            actual_winnings: None,
            status: ParticipationStatus::Creator,
            created_at: now,
            updated_at: now,
            settled_at: None,
        }
    }

    pub fn active(bet_id: BetId, user: UserId, option: u8, amount: Decimal, potential: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            chosen_option: Some(option),
            stake_amount: amount,
            potential_winnings: potential,
            status: ParticipationStatus::Active,
            ..Self::creator_row(bet_id, user, now)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ParticipationStatus::Active
    }

    /// Creator row upgrade, or re-staking after a cancel.
    pub fn stake(&mut self, option: u8, amount: Decimal, potential: Decimal, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            ParticipationStatus::Creator | ParticipationStatus::Cancelled => {
                self.chosen_option = Some(option);
                self.stake_amount = amount;
                self.potential_winnings = potential;
                self.status = ParticipationStatus::Active;
                self.updated_at = now;
                Ok(())
            }
            ParticipationStatus::Active => Err(BetError::StateConflict(format!(
                "{} already has an active stake on bet {}",
                self.user, self.bet_id
            ))),
            other => Err(BetError::StateConflict(format!(
                "{} can not stake again on bet {}, participation is {:?}",
                self.user, self.bet_id, other
            ))),
        }
    }

    pub fn mark_won(&mut self, payout: Decimal, now: DateTime<Utc>) -> Result<()> {
        self.settle(ParticipationStatus::Won, Some(payout), now)
    }

    pub fn mark_lost(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.settle(ParticipationStatus::Lost, Some(Decimal::ZERO), now)
    }

    pub fn mark_refunded(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.settle(ParticipationStatus::Refunded, None, now)
    }

    /// Active stake withdrawn, or a creator row closed with its bet.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == ParticipationStatus::Creator {
            self.status = ParticipationStatus::Cancelled;
            self.updated_at = now;
            return Ok(());
        }
        self.settle(ParticipationStatus::Cancelled, None, now)
    }

    fn settle(&mut self, status: ParticipationStatus, winnings: Option<Decimal>, now: DateTime<Utc>) -> Result<()> {
        if self.status != ParticipationStatus::Active {
            return Err(BetError::StateConflict(format!(
                "participation of {} on bet {} is {:?}, not active",
                self.user, self.bet_id, self.status
            )));
        }
        self.status = status;
        self.actual_winnings = winnings;
        self.settled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

impl BetEngine {
    /// Stake `amount` credits on `option` (1-based).
    ///
    /// The debit, the pool growth and the participation row are committed in
    /// one transaction; a failed debit leaves the pools untouched.
    pub fn place_bet(&self, user: UserId, bet_id: BetId, option: u8, amount: Decimal) -> Result<Participation> {
        validate_amount(amount)?;
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        let bet = &slot.bet;
        if !self.groups.is_member(user, bet.group) {
            return Err(BetError::Authorization(format!("{} is not a member of {}", user, bet.group)));
        }
        if !self.groups.has_permission(user, bet.group, GroupAction::PlaceBet) {
            return Err(BetError::Authorization(format!("{} may not place bets in {}", user, bet.group)));
        }
        if !bet.is_open_for_betting(now) {
            return Err(BetError::StateConflict(format!("bet {} is not open for betting", bet_id)));
        }
        bet.option_index(option)?;
        if amount < bet.minimum_bet {
            return Err(BetError::Validation(format!("minimum bet is {}, got {}", bet.minimum_bet, amount)));
        }
        if let Some(max) = bet.maximum_bet {
            if amount > max {
                return Err(BetError::Validation(format!("maximum bet is {}, got {}", max, amount)));
            }
        }

        // snapshot at the odds the user saw, before this stake moves them
        let potential = odds::potential_winnings(amount, bet.odds(option));
        let mut next_bet = bet.clone();
        next_bet.add_stake(option, amount)?;

        let row = match slot.participations.get(&user) {
            Some(existing) => {
                let mut row = existing.clone();
                row.stake(option, amount, potential, now)?;
                row
            }
            None => Participation::active(bet_id, user, option, amount, potential, now),
        };

        self.ledger.post(
            user,
            LedgerChange::Debit(amount),
            "bet stake",
            Some(bet_id),
            |stats| stats.record_stake(amount),
            vec![Record::Bet(next_bet.clone()), Record::Participation(row.clone())],
        )?;

        let total_pool = next_bet.total_pool();
        slot.bet = next_bet;
        slot.participations.insert(user, row.clone());
        drop(slot);
        self.index_user(user, bet_id);

        info!(
            bet_id = %bet_id,
            user_id = user.0,
            option,
            amount = %amount,
            potential = %potential,
            total_pool = %total_pool,
            "Stake placed"
        );
        self.notify(BetEvent::StakePlaced { bet_id, user, option, amount, total_pool });
        Ok(row)
    }

    /// Withdraw an active stake while betting is still open. Full refund.
    pub fn cancel_participation(&self, user: UserId, bet_id: BetId) -> Result<Participation> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        let now = self.now();

        if !slot.bet.is_open_for_betting(now) {
            return Err(BetError::StateConflict(format!(
                "bet {} is no longer open, stakes can not be withdrawn",
                bet_id
            )));
        }
        let row = self.refund_locked(&mut slot, user, ParticipationStatus::Cancelled, "stake cancelled")?;
        drop(slot);

        info!(bet_id = %bet_id, user_id = user.0, refunded = %row.stake_amount, "Participation cancelled");
        self.notify(BetEvent::ParticipationCancelled { bet_id, user, refunded: row.stake_amount });
        Ok(row)
    }

    /// Creator kicks a participant off a bet that has not finished. Full refund.
    ///
    /// Pools stop moving once settlement has staged an outcome.
    pub fn remove_participant(&self, actor: UserId, bet_id: BetId, user: UserId) -> Result<Participation> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();

        if slot.bet.creator != actor {
            return Err(BetError::Authorization(format!("only the creator of bet {} can remove participants", bet_id)));
        }
        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", bet_id, slot.bet.status)));
        }
        if let Some(staged) = slot.bet.outcome {
            return Err(BetError::StateConflict(format!(
                "bet {} is being settled as {}, its pools are frozen",
                bet_id, staged
            )));
        }
        let row = self.refund_locked(&mut slot, user, ParticipationStatus::Refunded, "removed from bet")?;
        drop(slot);

        info!(bet_id = %bet_id, user_id = user.0, removed_by = actor.0, refunded = %row.stake_amount, "Participant removed");
        self.notify(BetEvent::ParticipationCancelled { bet_id, user, refunded: row.stake_amount });
        Ok(row)
    }

    /// Return an active stake to its owner and shrink the pools by it.
    /// `status` is CANCELLED (withdrawn) or REFUNDED (removed, bet cancelled).
    pub(crate) fn refund_locked(
        &self,
        slot: &mut BetSlot,
        user: UserId,
        status: ParticipationStatus,
        reason: &str,
    ) -> Result<Participation> {
        let now = self.now();
        let bet_id = slot.bet.id;
        let mut row = match slot.participations.get(&user) {
            Some(row) if row.status != ParticipationStatus::Creator => row.clone(),
            _ => return Err(BetError::NotFound(format!("no stake by {} on bet {}", user, bet_id))),
        };
        if !row.is_active() {
            return Err(BetError::StateConflict(format!(
                "stake by {} on bet {} is already {:?}",
                user, bet_id, row.status
            )));
        }
        let option = row
            .chosen_option
            .ok_or_else(|| BetError::Internal(format!("active stake by {} on bet {} has no option", user, bet_id)))?;
        let stake = row.stake_amount;

        let mut next_bet = slot.bet.clone();
        next_bet.remove_stake(option, stake)?;
        match status {
            ParticipationStatus::Refunded => row.mark_refunded(now)?,
            _ => row.mark_cancelled(now)?,
        }

        self.ledger.post(
            user,
            LedgerChange::Credit(stake),
            reason,
            Some(bet_id),
            |stats| stats.record_refund(stake),
            vec![Record::Bet(next_bet.clone()), Record::Participation(row.clone())],
        )?;

        slot.bet = next_bet;
        slot.participations.insert(user, row.clone());
        Ok(row)
    }
}
