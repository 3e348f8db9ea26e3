/// Credit Ledger for BlackBook Group Bets
///
/// Exclusive owner of every user's credit balance:
/// - total balance and the frozen (reserved) part of it
/// - betting statistics, committed together with the balance change they accompany
/// - an append-only, hash-chained audit trail of every mutation
///
/// Each account sits behind its own lock. Two-account operations lock in
/// ascending user-id order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BetError, Result};
use crate::storage::{Record, Store};
use crate::types::{BetId, Clock, UserId};

/// Credits carry at most this many decimal places.
pub const CREDIT_SCALE: u32 = 2;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Win/loss record kept next to the balance it describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BettingStats {
    /// Stakes currently riding on unresolved bets
    pub active_bets: u32,
    pub total_bets: u32,
    pub wins: u32,
    pub losses: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_staked: Decimal,
    pub total_winnings: Decimal,
}

impl BettingStats {
    pub fn record_stake(&mut self, amount: Decimal) {
        self.active_bets += 1;
        self.total_bets += 1;
        self.total_staked += amount;
    }

    pub fn record_win(&mut self, payout: Decimal) {
        self.active_bets = self.active_bets.saturating_sub(1);
        self.wins += 1;
        self.current_streak += 1;
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.total_winnings += payout;
    }

    pub fn record_loss(&mut self) {
        self.active_bets = self.active_bets.saturating_sub(1);
        self.losses += 1;
        self.current_streak = 0;
    }

    /// Stake handed back (cancel, removal, bet cancelled).
    pub fn record_refund(&mut self, amount: Decimal) {
        self.active_bets = self.active_bets.saturating_sub(1);
        self.total_bets = self.total_bets.saturating_sub(1);
        self.total_staked -= amount;
    }
}

/// One user's account. Invariant: `0 <= frozen_balance <= total_balance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user: UserId,
    pub total_balance: Decimal,
    pub frozen_balance: Decimal,
    pub stats: BettingStats,
    /// Sequence number of the latest audit entry
    pub audit_seq: u64,
    /// Hash of the latest audit entry, chains the next one
    pub last_audit_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user: UserId, initial: Decimal) -> Self {
        Self {
            user,
            total_balance: initial,
            frozen_balance: Decimal::ZERO,
            stats: BettingStats::default(),
            audit_seq: 0,
            last_audit_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn available(&self) -> Decimal {
        self.total_balance - self.frozen_balance
    }
}

/// Balance view for callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceBreakdown {
    pub user: UserId,
    pub available: Decimal,
    pub frozen: Decimal,
    pub total: Decimal,
}

impl From<&Account> for BalanceBreakdown {
    fn from(account: &Account) -> Self {
        Self {
            user: account.user,
            available: account.available(),
            frozen: account.frozen_balance,
            total: account.total_balance,
        }
    }
}

/// Audit entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    AccountOpened,
    Credit,
    Debit,
    Freeze,
    Unfreeze,
    TransferIn,
    TransferOut,
}

/// A single balance mutation, chained to the previous one for the same user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub user: UserId,
    pub kind: AuditKind,
    pub amount: Decimal,
    pub old_total: Decimal,
    pub new_total: Decimal,
    pub old_frozen: Decimal,
    pub new_frozen: Decimal,
    pub reason: String,
    pub bet_id: Option<BetId>,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    fn compute_hash(&self) -> String {
        let payload = format!(
            "{}|{}|{}|{:?}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.prev_hash,
            self.seq,
            self.user.0,
            self.kind,
            self.amount,
            self.old_total,
            self.new_total,
            self.old_frozen,
            self.new_frozen,
            self.reason,
            self.bet_id.map(|b| b.to_string()).unwrap_or_default(),
            self.timestamp.to_rfc3339(),
        );
        hash(&payload)
    }
}

/// Balance change applied by [`Ledger`] primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerChange {
    Credit(Decimal),
    Debit(Decimal),
    Freeze(Decimal),
    Unfreeze(Decimal),
}

impl LedgerChange {
    fn amount(&self) -> Decimal {
        match *self {
            LedgerChange::Credit(a)
            | LedgerChange::Debit(a)
            | LedgerChange::Freeze(a)
            | LedgerChange::Unfreeze(a) => a,
        }
    }

    fn kind(&self) -> AuditKind {
        match self {
            LedgerChange::Credit(_) => AuditKind::Credit,
            LedgerChange::Debit(_) => AuditKind::Debit,
            LedgerChange::Freeze(_) => AuditKind::Freeze,
            LedgerChange::Unfreeze(_) => AuditKind::Unfreeze,
        }
    }
}

/// Positive, at most [`CREDIT_SCALE`] decimal places.
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(BetError::Validation(format!("amount must be positive, got {}", amount)));
    }
    if amount.normalize().scale() > CREDIT_SCALE {
        return Err(BetError::Validation(format!(
            "amount {} has more than {} decimal places",
            amount, CREDIT_SCALE
        )));
    }
    Ok(())
}

/// Apply `change` to `account` in place. On error `account` is untouched.
fn apply_change(account: &mut Account, change: LedgerChange) -> Result<()> {
    match change {
        LedgerChange::Credit(amount) => {
            account.total_balance += amount;
        }
        LedgerChange::Debit(amount) => {
            if account.available() < amount {
                return Err(BetError::InsufficientCredits { available: account.available(), required: amount });
            }
            account.total_balance -= amount;
        }
        LedgerChange::Freeze(amount) => {
            if account.available() < amount {
                return Err(BetError::InsufficientCredits { available: account.available(), required: amount });
            }
            account.frozen_balance += amount;
        }
        LedgerChange::Unfreeze(amount) => {
            if account.frozen_balance < amount {
                return Err(BetError::InsufficientFrozenCredits {
                    frozen: account.frozen_balance,
                    required: amount,
                });
            }
            account.frozen_balance -= amount;
        }
    }
    Ok(())
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger {
    accounts: DashMap<UserId, Arc<Mutex<Account>>>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { accounts: DashMap::new(), store, clock }
    }

    /// Rebuild from persisted accounts.
    pub fn restore(store: Arc<Store>, clock: Arc<dyn Clock>) -> Result<Self> {
        let ledger = Self::new(store, clock);
        for account in ledger.store.load_accounts()? {
            ledger.accounts.insert(account.user, Arc::new(Mutex::new(account)));
        }
        info!(accounts = ledger.accounts.len(), "Ledger restored");
        Ok(ledger)
    }

    /// Open an account with `initial` credits. Accounts are never destroyed.
    pub fn open_account(&self, user: UserId, initial: Decimal) -> Result<Account> {
        if initial < Decimal::ZERO {
            return Err(BetError::Validation(format!("initial balance must not be negative, got {}", initial)));
        }
        match self.accounts.entry(user) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BetError::StateConflict(format!("account for {} already exists", user)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut account = Account::new(user, initial);
                account.created_at = self.clock.now();
                let entry = self.chain(&mut account, AuditKind::AccountOpened, initial, "account opened", None, Decimal::ZERO, Decimal::ZERO);
                self.store.commit(&[Record::Account(account.clone()), Record::Audit(entry)])?;
                slot.insert(Arc::new(Mutex::new(account.clone())));
                info!(user_id = user.0, initial = %initial, "Account opened");
                Ok(account)
            }
        }
    }

    pub fn has_account(&self, user: UserId) -> bool {
        self.accounts.contains_key(&user)
    }

    /// Snapshot of an account.
    pub fn account(&self, user: UserId) -> Result<Account> {
        Ok(self.cell(user)?.lock().clone())
    }

    pub fn available(&self, user: UserId) -> Result<Decimal> {
        Ok(self.cell(user)?.lock().available())
    }

    pub fn balance_breakdown(&self, user: UserId) -> Result<BalanceBreakdown> {
        Ok(BalanceBreakdown::from(&*self.cell(user)?.lock()))
    }

    pub fn credit(&self, user: UserId, amount: Decimal, reason: &str) -> Result<Account> {
        self.post(user, LedgerChange::Credit(amount), reason, None, |_| {}, Vec::new())
    }

    /// Fails with `InsufficientCredits` when `available < amount`.
    pub fn debit(&self, user: UserId, amount: Decimal, reason: &str) -> Result<Account> {
        self.post(user, LedgerChange::Debit(amount), reason, None, |_| {}, Vec::new())
    }

    /// Reserve `amount` of the available balance; total is unchanged.
    pub fn freeze(&self, user: UserId, amount: Decimal, reason: &str) -> Result<Account> {
        self.post(user, LedgerChange::Freeze(amount), reason, None, |_| {}, Vec::new())
    }

    pub fn unfreeze(&self, user: UserId, amount: Decimal, reason: &str) -> Result<Account> {
        self.post(user, LedgerChange::Unfreeze(amount), reason, None, |_| {}, Vec::new())
    }

    /// Atomic debit of `from` and credit of `to`.
    pub fn transfer(&self, from: UserId, to: UserId, amount: Decimal, reason: &str) -> Result<(Account, Account)> {
        validate_amount(amount)?;
        if from == to {
            return Err(BetError::Validation("cannot transfer to the same account".into()));
        }
        let from_cell = self.cell(from)?;
        let to_cell = self.cell(to)?;

        // Lower id first, whichever direction the money flows.
        let (mut from_guard, mut to_guard) = if from < to {
            let f = from_cell.lock();
            let t = to_cell.lock();
            (f, t)
        } else {
            let t = to_cell.lock();
            let f = from_cell.lock();
            (f, t)
        };

        let mut next_from = from_guard.clone();
        let mut next_to = to_guard.clone();
        let (from_total, from_frozen) = (next_from.total_balance, next_from.frozen_balance);
        let (to_total, to_frozen) = (next_to.total_balance, next_to.frozen_balance);
        apply_change(&mut next_from, LedgerChange::Debit(amount))?;
        apply_change(&mut next_to, LedgerChange::Credit(amount))?;

        let out_entry = self.chain(&mut next_from, AuditKind::TransferOut, amount, reason, None, from_total, from_frozen);
        let in_entry = self.chain(&mut next_to, AuditKind::TransferIn, amount, reason, None, to_total, to_frozen);

        self.store.commit(&[
            Record::Account(next_from.clone()),
            Record::Account(next_to.clone()),
            Record::Audit(out_entry),
            Record::Audit(in_entry),
        ])?;
        *from_guard = next_from.clone();
        *to_guard = next_to.clone();

        info!(from = from.0, to = to.0, amount = %amount, reason, "Transfer");
        Ok((next_from, next_to))
    }

    /// Apply a balance change plus a statistics update, committing `companions`
    /// (bet, participation, ...) in the same transaction as the account.
    pub(crate) fn post(
        &self,
        user: UserId,
        change: LedgerChange,
        reason: &str,
        bet_id: Option<BetId>,
        update_stats: impl FnOnce(&mut BettingStats),
        companions: Vec<Record>,
    ) -> Result<Account> {
        validate_amount(change.amount())?;
        let cell = self.cell(user)?;
        let mut guard = cell.lock();

        let mut next = guard.clone();
        let (old_total, old_frozen) = (next.total_balance, next.frozen_balance);
        apply_change(&mut next, change)?;
        let entry = self.chain(&mut next, change.kind(), change.amount(), reason, bet_id, old_total, old_frozen);
        update_stats(&mut next.stats);

        let mut records = Vec::with_capacity(companions.len() + 2);
        records.push(Record::Account(next.clone()));
        records.push(Record::Audit(entry));
        records.extend(companions);
        self.store.commit(&records)?;
        *guard = next.clone();

        debug!(
            user_id = user.0,
            change = ?change,
            total = %next.total_balance,
            frozen = %next.frozen_balance,
            reason,
            "Ledger posting"
        );
        Ok(next)
    }

    /// Statistics-only update (a lost stake moves no credits), committed with `companions`.
    pub(crate) fn update_stats(
        &self,
        user: UserId,
        update_stats: impl FnOnce(&mut BettingStats),
        companions: Vec<Record>,
    ) -> Result<Account> {
        let cell = self.cell(user)?;
        let mut guard = cell.lock();
        let mut next = guard.clone();
        update_stats(&mut next.stats);

        let mut records = Vec::with_capacity(companions.len() + 1);
        records.push(Record::Account(next.clone()));
        records.extend(companions);
        self.store.commit(&records)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Audit trail for a user, oldest first.
    pub fn audit_log(&self, user: UserId) -> Result<Vec<AuditEntry>> {
        let mut entries = self.store.audit_for(user)?;
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// Recompute the hash chain; false if any entry was altered or dropped.
    pub fn verify_audit_chain(&self, user: UserId) -> Result<bool> {
        let mut prev = String::new();
        for (i, entry) in self.audit_log(user)?.iter().enumerate() {
            if entry.seq != i as u64 + 1 || entry.prev_hash != prev || entry.compute_hash() != entry.hash {
                return Ok(false);
            }
            prev = entry.hash.clone();
        }
        Ok(true)
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats { accounts: 0, total_balance: Decimal::ZERO, frozen_balance: Decimal::ZERO };
        for cell in self.cells() {
            let account = cell.lock();
            stats.accounts += 1;
            stats.total_balance += account.total_balance;
            stats.frozen_balance += account.frozen_balance;
        }
        stats
    }

    fn cells(&self) -> Vec<Arc<Mutex<Account>>> {
        self.accounts.iter().map(|r| r.value().clone()).collect()
    }

    /// Clone the cell out so no map shard stays locked while we hold the account.
    fn cell(&self, user: UserId) -> Result<Arc<Mutex<Account>>> {
        self.accounts
            .get(&user)
            .map(|r| r.value().clone())
            .ok_or_else(|| BetError::NotFound(format!("account for {}", user)))
    }

    /// Audit entry for a change already applied to `account`; advances its hash chain.
    #[allow(clippy::too_many_arguments)]
    fn chain(
        &self,
        account: &mut Account,
        kind: AuditKind,
        amount: Decimal,
        reason: &str,
        bet_id: Option<BetId>,
        old_total: Decimal,
        old_frozen: Decimal,
    ) -> AuditEntry {
        let mut entry = AuditEntry {
            seq: account.audit_seq + 1,
            user: account.user,
            kind,
            amount,
            old_total,
            new_total: account.total_balance,
            old_frozen,
            new_frozen: account.frozen_balance,
            reason: reason.to_string(),
            bet_id,
            timestamp: self.clock.now(),
            prev_hash: account.last_audit_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        account.audit_seq = entry.seq;
        account.last_audit_hash = entry.hash.clone();
        entry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub accounts: usize,
    pub total_balance: Decimal,
    pub frozen_balance: Decimal,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Compute SHA256 hash
pub fn hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::SystemClock;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(Store::temporary().unwrap()), Arc::new(SystemClock))
    }

    #[test]
    fn test_credit_and_debit() {
        let ledger = ledger();
        ledger.open_account(UserId(1), dec!(100)).unwrap();

        assert_ok!(ledger.credit(UserId(1), dec!(25.50), "gift"));
        let account = assert_ok!(ledger.debit(UserId(1), dec!(20), "stake"));
        assert_eq!(account.total_balance, dec!(105.50));

        let err = assert_err!(ledger.debit(UserId(1), dec!(500), "too much"));
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(ledger.available(UserId(1)).unwrap(), dec!(105.50));
    }

    #[test]
    fn test_freeze_then_unfreeze_restores_available() {
        let ledger = ledger();
        ledger.open_account(UserId(1), dec!(100)).unwrap();

        let frozen = ledger.freeze(UserId(1), dec!(40), "hold").unwrap();
        assert_eq!(frozen.available(), dec!(60));
        assert_eq!(frozen.total_balance, dec!(100));

        // Frozen credits are not spendable
        assert_err!(ledger.debit(UserId(1), dec!(61), "stake"));

        let err = assert_err!(ledger.unfreeze(UserId(1), dec!(41), "release"));
        assert!(matches!(err, BetError::InsufficientFrozenCredits { .. }));

        let restored = ledger.unfreeze(UserId(1), dec!(40), "release").unwrap();
        assert_eq!(restored.available(), dec!(100));
        assert_eq!(restored.frozen_balance, Decimal::ZERO);
    }

    #[test]
    fn test_balance_invariant_over_mixed_sequence() {
        let ledger = ledger();
        let user = UserId(9);
        ledger.open_account(user, dec!(50)).unwrap();

        let ops: Vec<LedgerChange> = vec![
            LedgerChange::Freeze(dec!(30)),
            LedgerChange::Debit(dec!(30)),
            LedgerChange::Credit(dec!(10)),
            LedgerChange::Freeze(dec!(15)),
            LedgerChange::Unfreeze(dec!(45)),
            LedgerChange::Debit(dec!(5)),
            LedgerChange::Unfreeze(dec!(10)),
        ];
        for op in ops {
            let _ = ledger.post(user, op, "mixed", None, |_| {}, Vec::new());
            let account = ledger.account(user).unwrap();
            assert!(account.frozen_balance <= account.total_balance);
            assert!(account.frozen_balance >= Decimal::ZERO);
            assert!(account.available() >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_rejects_bad_amounts() {
        let ledger = ledger();
        ledger.open_account(UserId(1), dec!(100)).unwrap();
        assert_err!(ledger.credit(UserId(1), dec!(0), "zero"));
        assert_err!(ledger.credit(UserId(1), dec!(-1), "negative"));
        assert_err!(ledger.credit(UserId(1), dec!(0.001), "sub-cent"));
        let err = assert_err!(ledger.credit(UserId(2), dec!(1), "nobody"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_open_account_twice_conflicts() {
        let ledger = ledger();
        ledger.open_account(UserId(1), dec!(100)).unwrap();
        let err = assert_err!(ledger.open_account(UserId(1), dec!(100)));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn test_transfer_moves_exact_amount() {
        let ledger = ledger();
        ledger.open_account(UserId(1), dec!(100)).unwrap();
        ledger.open_account(UserId(2), dec!(10)).unwrap();

        let (from, to) = ledger.transfer(UserId(2), UserId(1), dec!(7.25), "settle up").unwrap();
        assert_eq!(from.total_balance, dec!(2.75));
        assert_eq!(to.total_balance, dec!(107.25));

        assert_err!(ledger.transfer(UserId(2), UserId(1), dec!(3), "again"));
        assert_eq!(ledger.stats().total_balance, dec!(110));
    }

    #[test]
    fn test_opposite_transfers_do_not_deadlock() {
        let ledger = Arc::new(ledger());
        ledger.open_account(UserId(1), dec!(1000)).unwrap();
        ledger.open_account(UserId(2), dec!(1000)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let (from, to) = if i % 2 == 0 { (UserId(1), UserId(2)) } else { (UserId(2), UserId(1)) };
                    for _ in 0..25 {
                        ledger.transfer(from, to, dec!(1), "ping-pong").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.account(UserId(1)).unwrap().total_balance, dec!(1000));
        assert_eq!(ledger.account(UserId(2)).unwrap().total_balance, dec!(1000));
    }

    #[test]
    fn test_audit_chain_records_every_mutation() {
        let ledger = ledger();
        ledger.open_account(UserId(1), dec!(100)).unwrap();
        ledger.debit(UserId(1), dec!(30), "stake").unwrap();
        ledger.freeze(UserId(1), dec!(10), "hold").unwrap();
        assert_err!(ledger.debit(UserId(1), dec!(1000), "rejected"));

        let log = ledger.audit_log(UserId(1)).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, AuditKind::AccountOpened);
        assert_eq!(log[1].old_total, dec!(100));
        assert_eq!(log[1].new_total, dec!(70));
        assert_eq!(log[2].new_frozen, dec!(10));
        assert_eq!(log[2].prev_hash, log[1].hash);
        assert!(ledger.verify_audit_chain(UserId(1)).unwrap());
    }

    #[test]
    fn test_restore_reloads_balances() {
        let store = Arc::new(Store::temporary().unwrap());
        let ledger = Ledger::new(store.clone(), Arc::new(SystemClock));
        ledger.open_account(UserId(3), dec!(40)).unwrap();
        ledger.debit(UserId(3), dec!(15), "stake").unwrap();

        let restored = Ledger::restore(store, Arc::new(SystemClock)).unwrap();
        assert_eq!(restored.account(UserId(3)).unwrap().total_balance, dec!(25));
    }

    #[test]
    fn test_streak_statistics() {
        let mut stats = BettingStats::default();
        stats.record_stake(dec!(10));
        stats.record_win(dec!(15));
        stats.record_stake(dec!(10));
        stats.record_win(dec!(12));
        stats.record_stake(dec!(10));
        stats.record_loss();
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 2);
        assert_eq!(stats.active_bets, 0);
        assert_eq!(stats.total_winnings, dec!(27));
    }
}
