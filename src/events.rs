//! Bet lifecycle events and the best-effort notifier they are published on.
//!
//! Publishing is fire-and-forget: a failed publish is logged by the engine
//! and never rolls back the operation that produced the event.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::types::{BetId, BetOutcome, GroupId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BetEvent {
    BetCreated {
        bet_id: BetId,
        group: GroupId,
        creator: UserId,
        title: String,
    },
    StakePlaced {
        bet_id: BetId,
        user: UserId,
        option: u8,
        amount: Decimal,
        total_pool: Decimal,
    },
    ParticipationCancelled {
        bet_id: BetId,
        user: UserId,
        refunded: Decimal,
    },
    DeadlineReached {
        bet_id: BetId,
        group: GroupId,
    },
    AwaitingResolution {
        bet_id: BetId,
        group: GroupId,
        creator: UserId,
    },
    VoteCast {
        bet_id: BetId,
        voter: UserId,
        outcome: BetOutcome,
    },
    BetResolved {
        bet_id: BetId,
        outcome: BetOutcome,
        winners: usize,
        total_paid: Decimal,
    },
    BetCancelled {
        bet_id: BetId,
        refunded: Decimal,
    },
}

impl BetEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BetEvent::BetCreated { .. } => "bet_created",
            BetEvent::StakePlaced { .. } => "stake_placed",
            BetEvent::ParticipationCancelled { .. } => "participation_cancelled",
            BetEvent::DeadlineReached { .. } => "deadline_reached",
            BetEvent::AwaitingResolution { .. } => "awaiting_resolution",
            BetEvent::VoteCast { .. } => "vote_cast",
            BetEvent::BetResolved { .. } => "bet_resolved",
            BetEvent::BetCancelled { .. } => "bet_cancelled",
        }
    }

    pub fn bet_id(&self) -> BetId {
        match self {
            BetEvent::BetCreated { bet_id, .. }
            | BetEvent::StakePlaced { bet_id, .. }
            | BetEvent::ParticipationCancelled { bet_id, .. }
            | BetEvent::DeadlineReached { bet_id, .. }
            | BetEvent::AwaitingResolution { bet_id, .. }
            | BetEvent::VoteCast { bet_id, .. }
            | BetEvent::BetResolved { bet_id, .. }
            | BetEvent::BetCancelled { bet_id, .. } => *bet_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,

    #[error("notification channel full")]
    ChannelFull,
}

pub trait Notifier: Send + Sync {
    fn publish(&self, event: BetEvent) -> Result<(), NotifyError>;
}

/// Hands events to a bounded tokio channel; never blocks the caller.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<BetEvent>,
}

impl ChannelNotifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BetEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, event: BetEvent) -> Result<(), NotifyError> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => NotifyError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::ChannelClosed,
        })
    }
}

/// Writes every event to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish(&self, event: BetEvent) -> Result<(), NotifyError> {
        info!(kind = event.kind(), bet_id = %event.bet_id(), "Bet event");
        Ok(())
    }
}
