//! Shared identifiers, lifecycle enums and the clock abstraction.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum number of options a bet may carry.
pub const MAX_OPTIONS: usize = 4;

/// Minimum number of options a bet must carry.
pub const MIN_OPTIONS: usize = 2;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Registered user. Ordered so two-account operations can lock in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BetId(pub Uuid);

impl BetId {
    pub fn new() -> Self {
        BetId(Uuid::new_v4())
    }
}

impl Default for BetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// ============================================================================
// BET LIFECYCLE
// ============================================================================

/// OPEN -> CLOSED -> RESOLVED, or OPEN/CLOSED -> CANCELLED. Never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Open,
    Closed,
    Resolved,
    Cancelled,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Open => "open",
            BetStatus::Closed => "closed",
            BetStatus::Resolved => "resolved",
            BetStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Resolved | BetStatus::Cancelled)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chosen at creation, selects who may move a bet from CLOSED to RESOLVED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionMethod {
    CreatorOnly,
    AssignedResolver,
    ConsensusVoting,
}

impl ResolutionMethod {
    /// Whether resolver grants make sense for this method.
    pub fn accepts_resolvers(&self) -> bool {
        !matches!(self, ResolutionMethod::CreatorOnly)
    }
}

/// Final result of a bet. `Draw` and `Cancelled` mean no option wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetOutcome {
    Option1,
    Option2,
    Option3,
    Option4,
    Draw,
    Cancelled,
}

impl BetOutcome {
    /// Outcome for a 1-based option index.
    pub fn for_option(option: u8) -> Option<Self> {
        match option {
            1 => Some(BetOutcome::Option1),
            2 => Some(BetOutcome::Option2),
            3 => Some(BetOutcome::Option3),
            4 => Some(BetOutcome::Option4),
            _ => None,
        }
    }

    /// The 1-based option that wins under this outcome, if any.
    pub fn winning_option(&self) -> Option<u8> {
        match self {
            BetOutcome::Option1 => Some(1),
            BetOutcome::Option2 => Some(2),
            BetOutcome::Option3 => Some(3),
            BetOutcome::Option4 => Some(4),
            BetOutcome::Draw | BetOutcome::Cancelled => None,
        }
    }
}

impl fmt::Display for BetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.winning_option() {
            Some(option) => write!(f, "OPTION_{}", option),
            None if *self == BetOutcome::Draw => f.write_str("DRAW"),
            None => f.write_str("CANCELLED"),
        }
    }
}

/// Lifecycle of one (user, bet) participation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationStatus {
    /// Zero-stake bookkeeping row for the bet's creator
    Creator,
    Active,
    Won,
    Lost,
    Refunded,
    Cancelled,
}

impl ParticipationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::Won
                | ParticipationStatus::Lost
                | ParticipationStatus::Refunded
                | ParticipationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverCapability {
    /// May resolve the bet alone; also counts as a consensus voter
    Resolve,
    VoteOnly,
}

impl ResolverCapability {
    pub fn can_resolve(&self) -> bool {
        matches!(self, ResolverCapability::Resolve)
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Source of "now" for deadline checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
