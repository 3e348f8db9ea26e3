// Bet engine state
//
// Holds every bet behind its own lock (a "slot": the bet plus its
// participations, ballots and resolver grants) next to the credit ledger.
// Operations on different bets never contend; operations on the same bet
// serialize on its slot.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::betting::{Bet, NewBet, Participation, ResolutionVote, ResolverGrant, VoteCounts};
use crate::directory::{GroupAction, GroupDirectory, User, UserDirectory};
use crate::error::{BetError, Result};
use crate::events::{BetEvent, Notifier};
use crate::ledger::{Account, AuditEntry, BalanceBreakdown, Ledger};
use crate::storage::{Record, Store};
use crate::types::{
    BetId, BetOutcome, BetStatus, Clock, GroupId, ParticipationStatus, ResolutionMethod, UserId,
};

/// A bet and every row that hangs off it, locked as one unit.
#[derive(Debug, Clone)]
pub struct BetSlot {
    pub bet: Bet,
    pub participations: HashMap<UserId, Participation>,
    pub votes: HashMap<UserId, ResolutionVote>,
    pub resolvers: HashMap<UserId, ResolverGrant>,
}

impl BetSlot {
    fn new(bet: Bet) -> Self {
        Self {
            bet,
            participations: HashMap::new(),
            votes: HashMap::new(),
            resolvers: HashMap::new(),
        }
    }
}

/// External services the engine consults.
#[derive(Clone)]
pub struct Collaborators {
    pub groups: Arc<dyn GroupDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

/// Per-option view for callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionStats {
    pub option: u8,
    pub label: String,
    pub pool: Decimal,
    pub participants: u32,
    pub odds: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetStats {
    pub bet_id: BetId,
    pub title: String,
    pub status: BetStatus,
    pub outcome: Option<BetOutcome>,
    pub resolution_method: ResolutionMethod,
    pub betting_deadline: DateTime<Utc>,
    pub resolve_date: Option<DateTime<Utc>>,
    pub total_pool: Decimal,
    pub total_participants: u32,
    pub options: Vec<OptionStats>,
    /// Present for consensus bets
    pub votes: Option<VoteCounts>,
}

/// A bet as seen from one participant
#[derive(Debug, Clone)]
pub struct UserBet {
    pub bet: Bet,
    pub participation: Participation,
}

pub struct BetEngine {
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) store: Arc<Store>,
    pub(crate) bets: DashMap<BetId, Arc<Mutex<BetSlot>>>,
    /// Bets each user holds a participation row on
    pub(crate) user_bets: DashMap<UserId, Vec<BetId>>,
    pub(crate) groups: Arc<dyn GroupDirectory>,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    initial_credits: Decimal,
}

impl BetEngine {
    pub fn new(store: Arc<Store>, collaborators: Collaborators, clock: Arc<dyn Clock>, initial_credits: Decimal) -> Self {
        Self {
            ledger: Arc::new(Ledger::new(store.clone(), clock.clone())),
            store,
            bets: DashMap::new(),
            user_bets: DashMap::new(),
            groups: collaborators.groups,
            users: collaborators.users,
            notifier: collaborators.notifier,
            clock,
            initial_credits,
        }
    }

    /// Rebuild the engine from everything the store holds.
    pub fn restore(
        store: Arc<Store>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        initial_credits: Decimal,
    ) -> Result<Self> {
        let ledger = Ledger::restore(store.clone(), clock.clone())?;
        let mut engine = Self::new(store, collaborators, clock, initial_credits);
        engine.ledger = Arc::new(ledger);

        let mut slots: HashMap<BetId, BetSlot> =
            engine.store.load_bets()?.into_iter().map(|bet| (bet.id, BetSlot::new(bet))).collect();

        for row in engine.store.load_participations()? {
            match slots.get_mut(&row.bet_id) {
                Some(slot) => {
                    engine.user_bets.entry(row.user).or_default().push(row.bet_id);
                    slot.participations.insert(row.user, row);
                }
                None => warn!(bet_id = %row.bet_id, user_id = row.user.0, "Participation for unknown bet"),
            }
        }
        for vote in engine.store.load_votes()? {
            if let Some(slot) = slots.get_mut(&vote.bet_id) {
                slot.votes.insert(vote.voter, vote);
            }
        }
        for grant in engine.store.load_resolvers()? {
            if let Some(slot) = slots.get_mut(&grant.bet_id) {
                slot.resolvers.insert(grant.resolver, grant);
            }
        }

        let bet_count = slots.len();
        for (id, slot) in slots {
            engine.bets.insert(id, Arc::new(Mutex::new(slot)));
        }
        info!(bets = bet_count, users = engine.user_bets.len(), "Bet engine restored");
        Ok(engine)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ========================================================================
    // USERS
    // ========================================================================

    /// Open an account with the configured starting credits.
    pub fn register_user(&self, user: UserId, display_name: &str) -> Result<Account> {
        if display_name.trim().is_empty() {
            return Err(BetError::Validation("display name must not be empty".into()));
        }
        let account = self.ledger.open_account(user, self.initial_credits)?;
        self.users.record_user(User { id: user, display_name: display_name.trim().to_string() });
        info!(user_id = user.0, display_name, credits = %self.initial_credits, "User registered");
        Ok(account)
    }

    pub fn user(&self, user: UserId) -> Result<User> {
        self.users.get_user(user).ok_or_else(|| BetError::NotFound(format!("{}", user)))
    }

    pub fn account(&self, user: UserId) -> Result<Account> {
        self.ledger.account(user)
    }

    pub fn balance(&self, user: UserId) -> Result<BalanceBreakdown> {
        self.ledger.balance_breakdown(user)
    }

    pub fn audit_log(&self, user: UserId) -> Result<Vec<AuditEntry>> {
        self.ledger.audit_log(user)
    }

    // ========================================================================
    // BET LIFECYCLE
    // ========================================================================

    pub fn create_bet(&self, creator: UserId, request: NewBet) -> Result<Bet> {
        if !self.ledger.has_account(creator) {
            return Err(BetError::NotFound(format!("account for {}", creator)));
        }
        if !self.groups.is_member(creator, request.group) {
            return Err(BetError::Authorization(format!("{} is not a member of {}", creator, request.group)));
        }
        if !self.groups.has_permission(creator, request.group, GroupAction::CreateBet) {
            return Err(BetError::Authorization(format!("{} may not create bets in {}", creator, request.group)));
        }

        let now = self.now();
        let bet = Bet::new(BetId::new(), creator, request, now)?;
        let creator_row = Participation::creator_row(bet.id, creator, now);
        self.store.commit(&[Record::Bet(bet.clone()), Record::Participation(creator_row.clone())])?;

        let mut slot = BetSlot::new(bet.clone());
        slot.participations.insert(creator, creator_row);
        self.bets.insert(bet.id, Arc::new(Mutex::new(slot)));
        self.index_user(creator, bet.id);

        info!(
            bet_id = %bet.id,
            creator = creator.0,
            group = bet.group.0,
            options = bet.options.len(),
            method = ?bet.resolution_method,
            "Bet created"
        );
        self.notify(BetEvent::BetCreated { bet_id: bet.id, group: bet.group, creator, title: bet.title.clone() });
        Ok(bet)
    }

    /// Creator calls the bet off; every active stake is refunded.
    pub fn cancel_bet(&self, actor: UserId, bet_id: BetId) -> Result<Bet> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        if slot.bet.creator != actor {
            return Err(BetError::Authorization(format!("only the creator can cancel bet {}", bet_id)));
        }
        self.cancel_locked(&mut slot)?;
        Ok(slot.bet.clone())
    }

    /// Hide a bet from every listing, cancelling it first if it is still running.
    pub fn delete_bet(&self, actor: UserId, bet_id: BetId) -> Result<()> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        if slot.bet.creator != actor {
            return Err(BetError::Authorization(format!("only the creator can delete bet {}", bet_id)));
        }
        if slot.bet.is_deleted() {
            return Err(BetError::NotFound(format!("bet {}", bet_id)));
        }
        if !slot.bet.status.is_terminal() {
            self.cancel_locked(&mut slot)?;
        }
        let mut deleted = slot.bet.clone();
        deleted.mark_deleted(self.now());
        self.store.commit(&[Record::Bet(deleted.clone())])?;
        slot.bet = deleted;
        info!(bet_id = %bet_id, actor = actor.0, "Bet deleted");
        Ok(())
    }

    /// Refund every active stake, then move the bet to CANCELLED.
    ///
    /// Each refund commits on its own, so a failure part way leaves the bet
    /// running with the remaining stakes intact and the call can be repeated.
    fn cancel_locked(&self, slot: &mut BetSlot) -> Result<()> {
        let bet_id = slot.bet.id;
        if slot.bet.status.is_terminal() {
            return Err(BetError::StateConflict(format!("bet {} is already {}", bet_id, slot.bet.status)));
        }
        if let Some(staged) = slot.bet.outcome {
            return Err(BetError::StateConflict(format!(
                "bet {} is being settled as {}, it can not be cancelled",
                bet_id, staged
            )));
        }

        let mut active: Vec<UserId> =
            slot.participations.values().filter(|p| p.is_active()).map(|p| p.user).collect();
        active.sort();
        let mut refunded = Decimal::ZERO;
        for user in active {
            let row = self.refund_locked(slot, user, ParticipationStatus::Refunded, "bet cancelled")?;
            refunded += row.stake_amount;
        }

        let now = self.now();
        let mut cancelled = slot.bet.clone();
        cancelled.cancel(now)?;
        let mut records = vec![Record::Bet(cancelled.clone())];
        let mut closed_rows = Vec::new();
        for row in slot.participations.values() {
            if row.status == ParticipationStatus::Creator {
                let mut row = row.clone();
                row.mark_cancelled(now)?;
                records.push(Record::Participation(row.clone()));
                closed_rows.push(row);
            }
        }
        self.store.commit(&records)?;
        slot.bet = cancelled;
        for row in closed_rows {
            slot.participations.insert(row.user, row);
        }

        info!(bet_id = %bet_id, refunded = %refunded, "Bet cancelled");
        self.notify(BetEvent::BetCancelled { bet_id, refunded });
        Ok(())
    }

    /// OPEN -> CLOSED once the betting deadline has passed. Returns whether it closed.
    pub(crate) fn close_if_expired(&self, slot: &mut BetSlot) -> Result<bool> {
        let now = self.now();
        if !slot.bet.is_expired(now) {
            return Ok(false);
        }
        let mut closed = slot.bet.clone();
        closed.close(now)?;
        self.store.commit(&[Record::Bet(closed.clone())])?;
        slot.bet = closed;

        info!(bet_id = %slot.bet.id, total_pool = %slot.bet.total_pool(), "Betting closed");
        self.notify(BetEvent::DeadlineReached { bet_id: slot.bet.id, group: slot.bet.group });
        Ok(true)
    }

    /// Close one bet if it is still OPEN past its deadline; re-checked under the lock.
    pub fn close_expired(&self, bet_id: BetId) -> Result<bool> {
        let cell = self.slot(bet_id)?;
        let mut slot = cell.lock();
        if slot.bet.is_deleted() {
            return Ok(false);
        }
        self.close_if_expired(&mut slot)
    }

    /// Candidates for the expiry sweep.
    pub fn open_bets_past_deadline(&self) -> Vec<BetId> {
        let now = self.now();
        self.select(|bet| bet.is_expired(now))
    }

    /// Candidates for the resolution sweep: past their resolve date, or
    /// CLOSED with a staged outcome whose settlement did not finish.
    pub fn bets_awaiting_resolution(&self) -> Vec<BetId> {
        let now = self.now();
        self.select(|bet| {
            bet.resolution_due(now)
                || (bet.status == BetStatus::Closed
                    && (bet.outcome.is_some() || bet.resolution_method == ResolutionMethod::ConsensusVoting))
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get_bet(&self, bet_id: BetId) -> Result<Bet> {
        let bet = self.slot(bet_id)?.lock().bet.clone();
        if bet.is_deleted() {
            return Err(BetError::NotFound(format!("bet {}", bet_id)));
        }
        Ok(bet)
    }

    pub fn get_bet_stats(&self, bet_id: BetId) -> Result<BetStats> {
        let cell = self.slot(bet_id)?;
        let slot = cell.lock();
        let bet = &slot.bet;
        if bet.is_deleted() {
            return Err(BetError::NotFound(format!("bet {}", bet_id)));
        }

        let options = bet
            .options
            .iter()
            .zip(1u8..)
            .map(|(label, option)| OptionStats {
                option,
                label: label.clone(),
                pool: bet.pool(option),
                participants: bet.participant_count(option),
                odds: bet.odds(option),
            })
            .collect();
        let votes = (bet.resolution_method == ResolutionMethod::ConsensusVoting)
            .then(|| VoteCounts::from_votes(slot.votes.values()));

        Ok(BetStats {
            bet_id,
            title: bet.title.clone(),
            status: bet.status,
            outcome: bet.outcome,
            resolution_method: bet.resolution_method,
            betting_deadline: bet.betting_deadline,
            resolve_date: bet.resolve_date,
            total_pool: bet.total_pool(),
            total_participants: bet.total_participants(),
            options,
            votes,
        })
    }

    /// Whether the user has real money on the bet, now or in the past.
    pub fn has_user_participated(&self, user: UserId, bet_id: BetId) -> bool {
        let Ok(cell) = self.slot(bet_id) else {
            return false;
        };
        let slot = cell.lock();
        slot.participations
            .get(&user)
            .map(|p| {
                matches!(
                    p.status,
                    ParticipationStatus::Active | ParticipationStatus::Won | ParticipationStatus::Lost
                )
            })
            .unwrap_or(false)
    }

    /// Non-deleted bets in a group, newest first.
    pub fn list_group_bets(&self, group: GroupId) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self
            .cells()
            .into_iter()
            .map(|cell| cell.lock().bet.clone())
            .filter(|bet| bet.group == group && !bet.is_deleted())
            .collect();
        bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bets
    }

    /// Non-deleted bets a user created or staked on, newest first.
    pub fn list_user_bets(&self, user: UserId) -> Vec<UserBet> {
        let ids = self.user_bets.get(&user).map(|ids| ids.value().clone()).unwrap_or_default();
        let mut bets: Vec<UserBet> = ids
            .into_iter()
            .filter_map(|id| self.bets.get(&id).map(|cell| cell.value().clone()))
            .filter_map(|cell| {
                let slot = cell.lock();
                if slot.bet.is_deleted() {
                    return None;
                }
                slot.participations
                    .get(&user)
                    .map(|p| UserBet { bet: slot.bet.clone(), participation: p.clone() })
            })
            .collect();
        bets.sort_by(|a, b| b.bet.created_at.cmp(&a.bet.created_at));
        bets
    }

    /// Every participation row on a bet, oldest first.
    pub fn participations(&self, bet_id: BetId) -> Result<Vec<Participation>> {
        let cell = self.slot(bet_id)?;
        let slot = cell.lock();
        let mut rows: Vec<Participation> = slot.participations.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.user.cmp(&b.user)));
        Ok(rows)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Clone the slot out so the map shard is released before the slot is locked.
    pub(crate) fn slot(&self, bet_id: BetId) -> Result<Arc<Mutex<BetSlot>>> {
        self.bets
            .get(&bet_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| BetError::NotFound(format!("bet {}", bet_id)))
    }

    fn cells(&self) -> Vec<Arc<Mutex<BetSlot>>> {
        self.bets.iter().map(|r| r.value().clone()).collect()
    }

    fn select(&self, filter: impl Fn(&Bet) -> bool) -> Vec<BetId> {
        self.cells()
            .into_iter()
            .filter_map(|cell| {
                let slot = cell.lock();
                (!slot.bet.is_deleted() && filter(&slot.bet)).then_some(slot.bet.id)
            })
            .collect()
    }

    pub(crate) fn index_user(&self, user: UserId, bet_id: BetId) {
        let mut ids = self.user_bets.entry(user).or_default();
        if !ids.contains(&bet_id) {
            ids.push(bet_id);
        }
    }

    /// Best effort: a failed publish is logged, never propagated.
    pub(crate) fn notify(&self, event: BetEvent) {
        let kind = event.kind();
        let bet_id = event.bet_id();
        if let Err(err) = self.notifier.publish(event) {
            warn!(kind, bet_id = %bet_id, error = %err, "Failed to publish bet event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{GroupRole, InMemoryDirectory};
    use crate::error::ErrorKind;
    use crate::events::LogNotifier;
    use crate::types::ManualClock;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    const GROUP: GroupId = GroupId(1);

    fn engine(store: Arc<Store>, clock: Arc<ManualClock>) -> BetEngine {
        let directory = Arc::new(InMemoryDirectory::new());
        for id in 1..=3 {
            directory.add_member(GROUP, UserId(id), GroupRole::Member);
        }
        let collaborators = Collaborators {
            groups: directory.clone(),
            users: directory,
            notifier: Arc::new(LogNotifier),
        };
        BetEngine::new(store, collaborators, clock, dec!(100))
    }

    fn request(clock: &ManualClock) -> NewBet {
        NewBet {
            group: GROUP,
            title: "Who wins the office chess final?".into(),
            description: String::new(),
            options: vec!["Ana".into(), "Ben".into()],
            resolution_method: ResolutionMethod::CreatorOnly,
            betting_deadline: clock.now() + Duration::hours(1),
            resolve_date: None,
            minimum_bet: dec!(1),
            maximum_bet: Some(dec!(50)),
            minimum_votes_required: 1,
            allow_creator_vote: false,
        }
    }

    fn setup() -> (BetEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(Arc::new(Store::temporary().unwrap()), clock.clone());
        for id in 1..=3 {
            engine.register_user(UserId(id), &format!("player {}", id)).unwrap();
        }
        (engine, clock)
    }

    #[test]
    fn test_create_bet_adds_creator_row() {
        let (engine, clock) = setup();
        let bet = assert_ok!(engine.create_bet(UserId(1), request(&clock)));

        let rows = engine.participations(bet.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ParticipationStatus::Creator);
        assert!(!engine.has_user_participated(UserId(1), bet.id));
        assert_eq!(engine.list_user_bets(UserId(1)).len(), 1);
    }

    #[test]
    fn test_outsiders_can_not_create_bets() {
        let (engine, clock) = setup();
        engine.register_user(UserId(9), "outsider").unwrap();
        let err = assert_err!(engine.create_bet(UserId(9), request(&clock)));
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_register_twice_conflicts() {
        let (engine, _) = setup();
        let err = assert_err!(engine.register_user(UserId(1), "again"));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(engine.account(UserId(1)).unwrap().total_balance, dec!(100));
    }

    #[test]
    fn test_cancel_bet_refunds_every_stake() {
        let (engine, clock) = setup();
        let bet = engine.create_bet(UserId(1), request(&clock)).unwrap();
        engine.place_bet(UserId(2), bet.id, 1, dec!(30)).unwrap();
        engine.place_bet(UserId(3), bet.id, 2, dec!(20)).unwrap();

        assert_err!(engine.cancel_bet(UserId(2), bet.id));
        let cancelled = assert_ok!(engine.cancel_bet(UserId(1), bet.id));
        assert_eq!(cancelled.status, BetStatus::Cancelled);
        assert_eq!(cancelled.total_pool(), Decimal::ZERO);

        assert_eq!(engine.account(UserId(2)).unwrap().total_balance, dec!(100));
        assert_eq!(engine.account(UserId(3)).unwrap().total_balance, dec!(100));
        let statuses: Vec<_> = engine.participations(bet.id).unwrap().into_iter().map(|p| p.status).collect();
        assert!(statuses.contains(&ParticipationStatus::Cancelled));
        assert_eq!(statuses.iter().filter(|s| **s == ParticipationStatus::Refunded).count(), 2);

        let err = assert_err!(engine.cancel_bet(UserId(1), bet.id));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn test_deleted_bets_are_hidden() {
        let (engine, clock) = setup();
        let kept = engine.create_bet(UserId(1), request(&clock)).unwrap();
        let dropped = engine.create_bet(UserId(1), request(&clock)).unwrap();
        engine.place_bet(UserId(2), dropped.id, 1, dec!(10)).unwrap();

        assert_ok!(engine.delete_bet(UserId(1), dropped.id));
        assert_eq!(engine.account(UserId(2)).unwrap().total_balance, dec!(100));

        let listed: Vec<BetId> = engine.list_group_bets(GROUP).into_iter().map(|b| b.id).collect();
        assert_eq!(listed, vec![kept.id]);
        assert_eq!(assert_err!(engine.get_bet(dropped.id)).kind(), ErrorKind::NotFound);
        assert!(engine.list_user_bets(UserId(2)).is_empty());
    }

    #[test]
    fn test_expired_bet_closes_once() {
        let (engine, clock) = setup();
        let bet = engine.create_bet(UserId(1), request(&clock)).unwrap();
        assert!(engine.open_bets_past_deadline().is_empty());

        clock.advance(Duration::hours(2));
        assert_eq!(engine.open_bets_past_deadline(), vec![bet.id]);
        assert!(engine.close_expired(bet.id).unwrap());
        assert!(!engine.close_expired(bet.id).unwrap());
        assert_eq!(engine.get_bet(bet.id).unwrap().status, BetStatus::Closed);
    }

    #[test]
    fn test_bet_stats_per_option() {
        let (engine, clock) = setup();
        let bet = engine.create_bet(UserId(1), request(&clock)).unwrap();
        engine.place_bet(UserId(2), bet.id, 1, dec!(40)).unwrap();
        engine.place_bet(UserId(3), bet.id, 2, dec!(10)).unwrap();

        let stats = engine.get_bet_stats(bet.id).unwrap();
        assert_eq!(stats.total_pool, dec!(50));
        assert_eq!(stats.options[0].label, "Ana");
        assert_eq!(stats.options[0].odds, dec!(1.25));
        assert_eq!(stats.options[1].odds, dec!(5));
        assert_eq!(stats.options[1].participants, 1);
        assert!(stats.votes.is_none());
    }

    #[test]
    fn test_restore_rebuilds_slots() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Store::temporary().unwrap());
        let first = engine(store.clone(), clock.clone());
        first.register_user(UserId(1), "one").unwrap();
        first.register_user(UserId(2), "two").unwrap();
        let bet = first.create_bet(UserId(1), request(&clock)).unwrap();
        first.place_bet(UserId(2), bet.id, 2, dec!(25)).unwrap();

        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_member(GROUP, UserId(1), GroupRole::Member);
        let restored = BetEngine::restore(
            store,
            Collaborators { groups: directory.clone(), users: directory, notifier: Arc::new(LogNotifier) },
            clock,
            dec!(100),
        )
        .unwrap();

        let bet = restored.get_bet(bet.id).unwrap();
        assert_eq!(bet.pool(2), dec!(25));
        assert!(restored.has_user_participated(UserId(2), bet.id));
        assert_eq!(restored.account(UserId(2)).unwrap().total_balance, dec!(75));
        assert_eq!(restored.list_user_bets(UserId(2)).len(), 1);
    }
}
