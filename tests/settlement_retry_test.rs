/// Interrupted settlements and the resolution sweep
///
/// Each test writes a half-finished state straight into a temporary store,
/// restores a fresh engine from it and checks that the bet finishes exactly
/// once: no stake paid twice, no credits created.

use std::sync::Arc;

use blackbook_group_bets::{
    BetEngine, BetEvent, BetId, BetOutcome, BetStatus, ChannelNotifier, Clock, Collaborators, Config,
    DeadlineScheduler, ErrorKind, GroupId, GroupRole, InMemoryDirectory, ManualClock, NewBet, ParticipationStatus,
    Record, ResolutionMethod, ResolutionVote, ResolverCapability, Store, UserId,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// FIXTURES
// ============================================================================

const GROUP: GroupId = GroupId(3);
const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);
const DAVE: UserId = UserId(4);

struct World {
    store: Arc<Store>,
    clock: Arc<ManualClock>,
    collaborators: Collaborators,
    events: mpsc::Receiver<BetEvent>,
    engine: Arc<BetEngine>,
}

fn world() -> World {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(Store::temporary().unwrap());
    let directory = Arc::new(InMemoryDirectory::new());
    for user in [ALICE, BOB, CAROL, DAVE] {
        directory.add_member(GROUP, user, GroupRole::Member);
    }
    let (notifier, events) = ChannelNotifier::channel(256);
    let collaborators = Collaborators { groups: directory.clone(), users: directory, notifier: Arc::new(notifier) };
    let engine = Arc::new(BetEngine::new(store.clone(), collaborators.clone(), clock.clone(), dec!(100)));
    for (user, name) in [(ALICE, "alice"), (BOB, "bob"), (CAROL, "carol"), (DAVE, "dave")] {
        engine.register_user(user, name).unwrap();
    }
    World { store, clock, collaborators, events, engine }
}

impl World {
    fn bet(&self, method: ResolutionMethod, quorum: u32) -> BetId {
        self.engine
            .create_bet(
                ALICE,
                NewBet {
                    group: GROUP,
                    title: "Does the gig sell out?".into(),
                    description: String::new(),
                    options: vec!["Sold out".into(), "Tickets left".into()],
                    resolution_method: method,
                    betting_deadline: self.clock.now() + Duration::hours(1),
                    resolve_date: Some(self.clock.now() + Duration::hours(3)),
                    minimum_bet: dec!(1),
                    maximum_bet: None,
                    minimum_votes_required: quorum,
                    allow_creator_vote: false,
                },
            )
            .unwrap()
            .id
    }

    /// Bob and Carol back option 1 with 10 each, Dave backs option 2 with 20.
    fn staked_and_closed(&self, method: ResolutionMethod, quorum: u32) -> BetId {
        let bet = self.bet(method, quorum);
        self.engine.place_bet(BOB, bet, 1, dec!(10)).unwrap();
        self.engine.place_bet(CAROL, bet, 1, dec!(10)).unwrap();
        self.engine.place_bet(DAVE, bet, 2, dec!(20)).unwrap();
        self.clock.advance(Duration::hours(2));
        assert!(self.engine.close_expired(bet).unwrap());
        bet
    }

    /// Settlement of OPTION_1 stopped after paying Bob his 20.
    fn interrupt_after_first_winner(&self, bet: BetId) {
        let mut staged = self.engine.get_bet(bet).unwrap();
        staged.stage_outcome(BetOutcome::Option1).unwrap();
        let mut bob = self
            .engine
            .participations(bet)
            .unwrap()
            .into_iter()
            .find(|p| p.user == BOB)
            .unwrap();
        bob.mark_won(dec!(20), self.clock.now()).unwrap();

        self.engine.ledger().credit(BOB, dec!(20), "bet payout").unwrap();
        self.store.commit(&[Record::Bet(staged), Record::Participation(bob)]).unwrap();
    }

    fn restart(&mut self) {
        let restored =
            BetEngine::restore(self.store.clone(), self.collaborators.clone(), self.clock.clone(), dec!(100)).unwrap();
        self.engine = Arc::new(restored);
    }

    fn total_credits(&self) -> Decimal {
        self.engine.ledger().stats().total_balance
    }

    fn balance(&self, user: UserId) -> Decimal {
        self.engine.account(user).unwrap().total_balance
    }

    fn status_of(&self, bet: BetId, user: UserId) -> ParticipationStatus {
        self.engine
            .participations(bet)
            .unwrap()
            .into_iter()
            .find(|p| p.user == user)
            .unwrap()
            .status
    }

    fn drain(&mut self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }
}

// ============================================================================
// HALF-SETTLED BETS
// ============================================================================

#[test]
fn test_half_settled_bet_can_not_be_cancelled_or_trimmed() {
    let mut w = world();
    let bet = w.staked_and_closed(ResolutionMethod::CreatorOnly, 1);
    w.interrupt_after_first_winner(bet);
    w.restart();
    let credits = w.total_credits();

    let err = assert_err!(w.engine.cancel_bet(ALICE, bet));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    let err = assert_err!(w.engine.delete_bet(ALICE, bet));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    let err = assert_err!(w.engine.remove_participant(ALICE, bet, CAROL));
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    assert_eq!(w.total_credits(), credits);
    let stored = w.engine.get_bet(bet).unwrap();
    assert_eq!(stored.status, BetStatus::Closed);
    assert_eq!(stored.total_pool(), dec!(40));
    assert_eq!(w.status_of(bet, CAROL), ParticipationStatus::Active);
}

#[test]
fn test_repeat_resolve_finishes_without_paying_twice() {
    let mut w = world();
    let bet = w.staked_and_closed(ResolutionMethod::CreatorOnly, 1);
    w.interrupt_after_first_winner(bet);
    w.restart();

    let settlement = assert_ok!(w.engine.resolve_bet(ALICE, bet, BetOutcome::Option1));
    assert_eq!(settlement.winners, 2);
    assert_eq!(settlement.losers, 1);
    assert_eq!(settlement.total_paid, dec!(40));

    assert_eq!(w.balance(BOB), dec!(110));
    assert_eq!(w.balance(CAROL), dec!(110));
    assert_eq!(w.balance(DAVE), dec!(80));
    assert_eq!(w.total_credits(), dec!(400));
    assert_eq!(w.engine.get_bet(bet).unwrap().status, BetStatus::Resolved);
}

#[test]
fn test_repeat_resolve_with_other_outcome_conflicts() {
    let mut w = world();
    let bet = w.staked_and_closed(ResolutionMethod::CreatorOnly, 1);
    w.interrupt_after_first_winner(bet);
    w.restart();

    let err = assert_err!(w.engine.resolve_bet(ALICE, bet, BetOutcome::Option2));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert_eq!(w.status_of(bet, BOB), ParticipationStatus::Won);
    assert_eq!(w.status_of(bet, CAROL), ParticipationStatus::Active);
    assert_eq!(w.status_of(bet, DAVE), ParticipationStatus::Active);
    assert_eq!(w.engine.get_bet(bet).unwrap().outcome, Some(BetOutcome::Option1));
}

#[test]
fn test_resolution_sweep_finishes_staged_settlement() {
    let mut w = world();
    let bet = w.staked_and_closed(ResolutionMethod::CreatorOnly, 1);
    w.interrupt_after_first_winner(bet);
    w.restart();
    w.drain();

    let engine = w.engine.clone();
    let scheduler = DeadlineScheduler::new(engine.clone(), &Config::default());

    // resolve date is still an hour away; a staged outcome is retried anyway
    let report = scheduler.run_resolution_sweep();
    assert_eq!(report.resolved, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(engine.get_bet(bet).unwrap().status, BetStatus::Resolved);
    assert_eq!(engine.account(BOB).unwrap().total_balance, dec!(110));
    assert_eq!(engine.account(CAROL).unwrap().total_balance, dec!(110));
    assert_eq!(engine.ledger().stats().total_balance, dec!(400));
    assert_eq!(w.drain(), vec!["bet_resolved"]);

    assert_eq!(scheduler.run_resolution_sweep().resolved, 0);
}

// ============================================================================
// CONSENSUS SWEEP
// ============================================================================

fn grant_voters(w: &World, bet: BetId) {
    for voter in [BOB, CAROL, DAVE] {
        w.engine.assign_resolver(ALICE, bet, voter, ResolverCapability::VoteOnly).unwrap();
    }
}

fn ballot(bet: BetId, voter: UserId, outcome: BetOutcome, clock: &ManualClock) -> Record {
    Record::Vote(ResolutionVote {
        bet_id: bet,
        voter,
        voted_outcome: outcome,
        reasoning: None,
        revoked: false,
        revoked_at: None,
        created_at: clock.now(),
        updated_at: clock.now(),
    })
}

#[test]
fn test_resolution_sweep_settles_consensus_left_behind() {
    let mut w = world();
    let bet = w.bet(ResolutionMethod::ConsensusVoting, 2);
    grant_voters(&w, bet);
    w.engine.place_bet(BOB, bet, 1, dec!(10)).unwrap();
    w.engine.place_bet(DAVE, bet, 2, dec!(30)).unwrap();
    w.clock.advance(Duration::hours(2));
    w.engine.close_expired(bet).unwrap();

    // ballots were recorded but the settlement that should follow never ran
    w.store
        .commit(&[
            ballot(bet, BOB, BetOutcome::Option1, &w.clock),
            ballot(bet, CAROL, BetOutcome::Option1, &w.clock),
        ])
        .unwrap();
    w.restart();
    w.drain();

    let engine = w.engine.clone();
    let report = DeadlineScheduler::new(engine.clone(), &Config::default()).run_resolution_sweep();
    assert_eq!(report.resolved, 1);

    let stored = engine.get_bet(bet).unwrap();
    assert_eq!(stored.status, BetStatus::Resolved);
    assert_eq!(stored.outcome, Some(BetOutcome::Option1));
    assert_eq!(engine.account(BOB).unwrap().total_balance, dec!(130));
    assert_eq!(engine.account(DAVE).unwrap().total_balance, dec!(70));
    assert_eq!(w.drain(), vec!["bet_resolved"]);
}

#[test]
fn test_resolution_sweep_prompts_consensus_without_quorum() {
    let mut w = world();
    let bet = w.bet(ResolutionMethod::ConsensusVoting, 2);
    grant_voters(&w, bet);
    w.engine.place_bet(BOB, bet, 1, dec!(10)).unwrap();
    w.clock.advance(Duration::hours(2));

    let receipt = assert_ok!(w.engine.vote_on_resolution(CAROL, bet, BetOutcome::Option1, None));
    assert!(receipt.settlement.is_none());
    assert_eq!(receipt.counts.total, 1);
    w.drain();

    let engine = w.engine.clone();
    let scheduler = DeadlineScheduler::new(engine.clone(), &Config::default());

    // before the resolve date nothing happens
    assert_eq!(scheduler.run_resolution_sweep().prompted, 0);
    assert!(w.drain().is_empty());

    w.clock.advance(Duration::hours(2));
    let report = scheduler.run_resolution_sweep();
    assert_eq!(report.prompted, 1);
    assert_eq!(report.resolved, 0);
    assert_eq!(w.drain(), vec!["awaiting_resolution"]);
    assert_eq!(engine.get_bet(bet).unwrap().status, BetStatus::Closed);

    // the second ballot completes the quorum and settles on the spot
    let receipt = assert_ok!(engine.vote_on_resolution(DAVE, bet, BetOutcome::Option1, None));
    let settlement = receipt.settlement.unwrap();
    assert_eq!(settlement.total_paid, dec!(10));
    assert_eq!(engine.get_bet(bet).unwrap().status, BetStatus::Resolved);
}
