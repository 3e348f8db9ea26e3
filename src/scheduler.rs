use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::betting::SweepAction;
use crate::config::Config;
use crate::engine::BetEngine;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub closed: usize,
    pub resolved: usize,
    pub prompted: usize,
    pub failed: usize,
}

/// Two periodic sweeps moving bets along without a human.
///
/// Every bet is re-checked under its own lock, so a sweep racing a user
/// action (or a second sweep) never closes or notifies the same bet twice.
/// A failure on one bet is logged and the sweep carries on.
pub struct DeadlineScheduler {
    engine: Arc<BetEngine>,
    expiry_every: Duration,
    resolution_every: Duration,
    reminder: chrono::Duration,
}

impl DeadlineScheduler {
    pub fn new(engine: Arc<BetEngine>, cfg: &Config) -> Self {
        Self {
            engine,
            expiry_every: Duration::from_secs(cfg.expiry_sweep_secs.max(1)),
            resolution_every: Duration::from_secs(cfg.resolution_sweep_secs.max(1)),
            reminder: chrono::Duration::seconds(cfg.resolution_reminder_secs as i64),
        }
    }

    /// Close every OPEN bet whose betting deadline has passed.
    pub fn run_expiry_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for bet_id in self.engine.open_bets_past_deadline() {
            report.examined += 1;
            match self.engine.close_expired(bet_id) {
                Ok(true) => report.closed += 1,
                Ok(false) => debug!(bet_id = %bet_id, "Bet already moved on"),
                Err(e) => {
                    report.failed += 1;
                    error!(bet_id = %bet_id, error = %e, "Failed to close expired bet");
                }
            }
        }
        if report.examined > 0 {
            info!(examined = report.examined, closed = report.closed, failed = report.failed, "Expiry sweep complete");
        }
        report
    }

    /// Retry interrupted settlements, auto-resolve consensus bets and prompt
    /// for the rest once their resolve date has passed.
    pub fn run_resolution_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for bet_id in self.engine.bets_awaiting_resolution() {
            report.examined += 1;
            match self.engine.advance_resolution(bet_id, self.reminder) {
                Ok(SweepAction::Resolved(_)) => report.resolved += 1,
                Ok(SweepAction::Prompted) => report.prompted += 1,
                Ok(SweepAction::Skipped) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(bet_id = %bet_id, error = %e, "Resolution sweep failed for bet");
                }
            }
        }
        if report.examined > 0 {
            info!(
                examined = report.examined,
                resolved = report.resolved,
                prompted = report.prompted,
                failed = report.failed,
                "Resolution sweep complete"
            );
        }
        report
    }

    /// Run both sweeps on their own intervals until the tasks are aborted.
    pub fn spawn(self) -> (JoinHandle<()>, JoinHandle<()>) {
        let scheduler = Arc::new(self);
        info!(
            expiry_secs = scheduler.expiry_every.as_secs(),
            resolution_secs = scheduler.resolution_every.as_secs(),
            "Deadline scheduler started"
        );

        let expiry = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut ticker = interval(scheduler.expiry_every);
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    let sweeper = scheduler.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || sweeper.run_expiry_sweep()).await {
                        error!("Expiry sweep task failed: {e}");
                    }
                }
            })
        };

        let resolution = tokio::spawn(async move {
            let mut ticker = interval(scheduler.resolution_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sweeper = scheduler.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || sweeper.run_resolution_sweep()).await {
                    error!("Resolution sweep task failed: {e}");
                }
            }
        });

        (expiry, resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::NewBet;
    use crate::directory::{GroupRole, InMemoryDirectory};
    use crate::engine::Collaborators;
    use crate::events::{BetEvent, ChannelNotifier};
    use crate::storage::Store;
    use crate::types::{BetStatus, Clock, GroupId, ManualClock, ResolutionMethod, UserId};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn setup(cfg: &Config) -> (DeadlineScheduler, Arc<BetEngine>, Arc<ManualClock>, mpsc::Receiver<BetEvent>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_member(GroupId(1), UserId(1), GroupRole::Admin);
        let (notifier, rx) = ChannelNotifier::channel(64);
        let engine = Arc::new(BetEngine::new(
            Arc::new(Store::temporary().unwrap()),
            Collaborators { groups: directory.clone(), users: directory, notifier: Arc::new(notifier) },
            clock.clone(),
            dec!(100),
        ));
        engine.register_user(UserId(1), "host").unwrap();
        (DeadlineScheduler::new(engine.clone(), cfg), engine, clock, rx)
    }

    fn new_bet(clock: &ManualClock, method: ResolutionMethod) -> NewBet {
        NewBet {
            group: GroupId(1),
            title: "Does the build go green today?".into(),
            description: String::new(),
            options: vec!["Yes".into(), "No".into()],
            resolution_method: method,
            betting_deadline: clock.now() + chrono::Duration::minutes(10),
            resolve_date: Some(clock.now() + chrono::Duration::minutes(30)),
            minimum_bet: dec!(1),
            maximum_bet: None,
            minimum_votes_required: 1,
            allow_creator_vote: true,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<BetEvent>) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[test]
    fn test_expiry_sweep_is_idempotent() {
        let (scheduler, engine, clock, mut rx) = setup(&Config::default());
        let bet = engine.create_bet(UserId(1), new_bet(&clock, ResolutionMethod::CreatorOnly)).unwrap();
        drain(&mut rx);

        assert_eq!(scheduler.run_expiry_sweep().closed, 0);
        clock.advance(chrono::Duration::minutes(11));
        assert_eq!(scheduler.run_expiry_sweep().closed, 1);
        assert_eq!(scheduler.run_expiry_sweep(), SweepReport::default());

        assert_eq!(engine.get_bet(bet.id).unwrap().status, BetStatus::Closed);
        assert_eq!(drain(&mut rx), vec!["deadline_reached"]);
    }

    #[test]
    fn test_resolution_sweep_prompts_once_per_reminder() {
        let (scheduler, engine, clock, mut rx) = setup(&Config::default());
        engine.create_bet(UserId(1), new_bet(&clock, ResolutionMethod::CreatorOnly)).unwrap();
        drain(&mut rx);

        clock.advance(chrono::Duration::minutes(31));
        let report = scheduler.run_resolution_sweep();
        assert_eq!(report.prompted, 1);
        assert_eq!(report.resolved, 0);
        assert_eq!(drain(&mut rx), vec!["deadline_reached", "awaiting_resolution"]);

        assert_eq!(scheduler.run_resolution_sweep().prompted, 0);
        assert!(drain(&mut rx).is_empty());

        clock.advance(chrono::Duration::days(1));
        assert_eq!(scheduler.run_resolution_sweep().prompted, 1);
    }

    #[test]
    fn test_resolution_sweep_never_resolves_creator_bets() {
        let (scheduler, engine, clock, _rx) = setup(&Config::default());
        let bet = engine.create_bet(UserId(1), new_bet(&clock, ResolutionMethod::CreatorOnly)).unwrap();
        clock.advance(chrono::Duration::hours(1));
        scheduler.run_resolution_sweep();
        assert_eq!(engine.get_bet(bet.id).unwrap().status, BetStatus::Closed);
    }

    #[tokio::test]
    async fn test_spawned_sweeps_close_expired_bets() {
        let cfg = Config { expiry_sweep_secs: 1, resolution_sweep_secs: 1, ..Config::default() };
        let (scheduler, engine, clock, _rx) = setup(&cfg);
        let bet = engine.create_bet(UserId(1), new_bet(&clock, ResolutionMethod::CreatorOnly)).unwrap();
        clock.advance(chrono::Duration::minutes(11));

        let (expiry, resolution) = scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        expiry.abort();
        resolution.abort();

        assert_eq!(engine.get_bet(bet.id).unwrap().status, BetStatus::Closed);
    }
}
