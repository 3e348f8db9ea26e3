use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::odds;
use crate::engine::{BetEngine, BetSlot};
use crate::error::Result;
use crate::events::BetEvent;
use crate::ledger::LedgerChange;
use crate::storage::Record;
use crate::types::{BetId, BetOutcome, ParticipationStatus, UserId};

/// Result of paying out a bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub bet_id: BetId,
    pub outcome: BetOutcome,
    pub winners: usize,
    pub losers: usize,
    pub total_paid: Decimal,
    pub total_pool: Decimal,
}

impl BetEngine {
    /// Pay out a CLOSED bet and move it to RESOLVED.
    ///
    /// The outcome is staged on the bet first. Every ACTIVE row is then settled
    /// on its own, its credit and statistics committed together, so an
    /// interrupted run can be repeated with the same outcome: rows already WON
    /// or LOST are skipped.
    pub(crate) fn settle_locked(&self, slot: &mut BetSlot, outcome: BetOutcome) -> Result<Settlement> {
        let now = self.now();
        let bet_id = slot.bet.id;

        let mut staged = slot.bet.clone();
        staged.stage_outcome(outcome)?;
        if slot.bet.outcome != staged.outcome {
            self.store.commit(&[Record::Bet(staged.clone())])?;
            slot.bet = staged;
        }

        let winning_option = outcome.winning_option();
        let winning_pool = winning_option.map(|o| slot.bet.pool(o)).unwrap_or_default();
        let total_pool = slot.bet.total_pool();

        let mut pending: Vec<UserId> =
            slot.participations.values().filter(|p| p.is_active()).map(|p| p.user).collect();
        pending.sort();

        for user in pending {
            let Some(mut row) = slot.participations.get(&user).cloned() else {
                continue;
            };
            let won = winning_option.is_some() && row.chosen_option == winning_option && !winning_pool.is_zero();

            if won {
                let payout = odds::payout(row.stake_amount, winning_pool, total_pool);
                row.mark_won(payout, now)?;
                if payout.is_zero() {
                    self.ledger.update_stats(user, |stats| stats.record_win(payout), vec![Record::Participation(row.clone())])?;
                } else {
                    self.ledger.post(
                        user,
                        LedgerChange::Credit(payout),
                        "bet payout",
                        Some(bet_id),
                        |stats| stats.record_win(payout),
                        vec![Record::Participation(row.clone())],
                    )?;
                }
                info!(bet_id = %bet_id, user_id = user.0, stake = %row.stake_amount, payout = %payout, "Winner paid");
            } else {
                row.mark_lost(now)?;
                self.ledger.update_stats(user, |stats| stats.record_loss(), vec![Record::Participation(row.clone())])?;
            }
            slot.participations.insert(user, row);
        }

        let mut resolved = slot.bet.clone();
        resolved.resolve(outcome, now)?;
        self.store.commit(&[Record::Bet(resolved.clone())])?;
        slot.bet = resolved;

        let settlement = summarize(slot, outcome);
        info!(
            bet_id = %bet_id,
            outcome = %outcome,
            winners = settlement.winners,
            losers = settlement.losers,
            total_paid = %settlement.total_paid,
            total_pool = %settlement.total_pool,
            "Bet resolved"
        );
        self.notify(BetEvent::BetResolved {
            bet_id,
            outcome,
            winners: settlement.winners,
            total_paid: settlement.total_paid,
        });
        Ok(settlement)
    }
}

/// Totals over every settled row, including those settled by an earlier attempt.
fn summarize(slot: &BetSlot, outcome: BetOutcome) -> Settlement {
    let mut settlement = Settlement {
        bet_id: slot.bet.id,
        outcome,
        winners: 0,
        losers: 0,
        total_paid: Decimal::ZERO,
        total_pool: slot.bet.total_pool(),
    };
    for row in slot.participations.values() {
        match row.status {
            ParticipationStatus::Won => {
                settlement.winners += 1;
                settlement.total_paid += row.actual_winnings.unwrap_or_default();
            }
            ParticipationStatus::Lost => settlement.losers += 1,
            _ => {}
        }
    }
    settlement
}
