/// BlackBook Group Bets
/// Settlement core for private group betting: credit ledger, bets, odds,
/// resolution, payouts and the deadline scheduler.

pub mod betting;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use betting::{
    tally, Bet, NewBet, Participation, ResolutionVote, ResolverGrant, Settlement, SweepAction, VoteCounts,
    VoteReceipt,
};
pub use config::Config;
pub use directory::{GroupAction, GroupDirectory, GroupRole, InMemoryDirectory, User, UserDirectory};
pub use engine::{BetEngine, BetSlot, BetStats, Collaborators, OptionStats, UserBet};
pub use error::{BetError, ErrorKind, Result};
pub use events::{BetEvent, ChannelNotifier, LogNotifier, Notifier, NotifyError};
pub use ledger::{Account, AuditEntry, AuditKind, BalanceBreakdown, BettingStats, Ledger, LedgerStats};
pub use scheduler::{DeadlineScheduler, SweepReport};
pub use storage::{Record, Store};
pub use types::{
    BetId, BetOutcome, BetStatus, Clock, GroupId, ManualClock, ParticipationStatus, ResolutionMethod,
    ResolverCapability, SystemClock, UserId,
};
