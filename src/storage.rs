//! sled-backed persistence.
//!
//! One tree per record kind. Every logical operation hands all the records it
//! touched to [`Store::commit`], which writes them in a single multi-tree
//! transaction: either every record lands or none does.

use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionResult, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use tracing::info;

use crate::betting::{Bet, Participation, ResolutionVote, ResolverGrant};
use crate::error::{BetError, Result};
use crate::ledger::{Account, AuditEntry};
use crate::types::{BetId, UserId};

const ACCOUNTS: &str = "accounts";
const BETS: &str = "bets";
const PARTICIPATIONS: &str = "participations";
const VOTES: &str = "votes";
const RESOLVERS: &str = "resolvers";
const AUDIT: &str = "audit";

/// A record to persist as part of one atomic commit.
#[derive(Debug, Clone)]
pub enum Record {
    Account(Account),
    Bet(Bet),
    Participation(Participation),
    Vote(ResolutionVote),
    Resolver(ResolverGrant),
    Audit(AuditEntry),
}

#[derive(Debug, Clone, Copy)]
enum TreeKind {
    Accounts,
    Bets,
    Participations,
    Votes,
    Resolvers,
    Audit,
}

impl Record {
    fn encode(&self) -> Result<(TreeKind, Vec<u8>, Vec<u8>)> {
        Ok(match self {
            Record::Account(a) => (TreeKind::Accounts, user_key(a.user), serde_json::to_vec(a)?),
            Record::Bet(b) => (TreeKind::Bets, bet_key(b.id), serde_json::to_vec(b)?),
            Record::Participation(p) => (
                TreeKind::Participations,
                pair_key(p.bet_id, p.user),
                serde_json::to_vec(p)?,
            ),
            Record::Vote(v) => (TreeKind::Votes, pair_key(v.bet_id, v.voter), serde_json::to_vec(v)?),
            Record::Resolver(g) => (
                TreeKind::Resolvers,
                pair_key(g.bet_id, g.resolver),
                serde_json::to_vec(g)?,
            ),
            Record::Audit(e) => (TreeKind::Audit, audit_key(e), serde_json::to_vec(e)?),
        })
    }
}

fn user_key(user: UserId) -> Vec<u8> {
    user.0.to_be_bytes().to_vec()
}

fn bet_key(bet: BetId) -> Vec<u8> {
    bet.0.as_bytes().to_vec()
}

fn pair_key(bet: BetId, user: UserId) -> Vec<u8> {
    let mut key = bet_key(bet);
    key.extend_from_slice(&user.0.to_be_bytes());
    key
}

/// (user, timestamp, seq): scans by user prefix come back in time order.
fn audit_key(entry: &AuditEntry) -> Vec<u8> {
    let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
    let mut key = user_key(entry.user);
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(&entry.seq.to_be_bytes());
    key
}

pub struct Store {
    db: Db,
    accounts: Tree,
    bets: Tree,
    participations: Tree,
    votes: Tree,
    resolvers: Tree,
    audit: Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened bet store");
        Self::from_db(db)
    }

    /// Store that is deleted when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            accounts: db.open_tree(ACCOUNTS)?,
            bets: db.open_tree(BETS)?,
            participations: db.open_tree(PARTICIPATIONS)?,
            votes: db.open_tree(VOTES)?,
            resolvers: db.open_tree(RESOLVERS)?,
            audit: db.open_tree(AUDIT)?,
            db,
        })
    }

    /// Write every record atomically.
    pub fn commit(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let encoded = records.iter().map(Record::encode).collect::<Result<Vec<_>>>()?;

        (
            &self.accounts,
            &self.bets,
            &self.participations,
            &self.votes,
            &self.resolvers,
            &self.audit,
        )
            .transaction(
                |(accounts, bets, participations, votes, resolvers, audit)| -> ConflictableTransactionResult<(), BetError> {
                    for (kind, key, value) in &encoded {
                        let tree = match kind {
                            TreeKind::Accounts => accounts,
                            TreeKind::Bets => bets,
                            TreeKind::Participations => participations,
                            TreeKind::Votes => votes,
                            TreeKind::Resolvers => resolvers,
                            TreeKind::Audit => audit,
                        };
                        tree.insert(key.as_slice(), value.as_slice())?;
                    }
                    Ok(())
                },
            )?;
        Ok(())
    }

    pub fn load_accounts(&self) -> Result<Vec<Account>> {
        load_all(&self.accounts)
    }

    pub fn load_bets(&self) -> Result<Vec<Bet>> {
        load_all(&self.bets)
    }

    pub fn load_participations(&self) -> Result<Vec<Participation>> {
        load_all(&self.participations)
    }

    pub fn load_votes(&self) -> Result<Vec<ResolutionVote>> {
        load_all(&self.votes)
    }

    pub fn load_resolvers(&self) -> Result<Vec<ResolverGrant>> {
        load_all(&self.resolvers)
    }

    /// A user's audit trail, oldest first.
    pub fn audit_for(&self, user: UserId) -> Result<Vec<AuditEntry>> {
        self.audit
            .scan_prefix(user_key(user))
            .values()
            .map(|value| Ok(serde_json::from_slice(&value?)?))
            .collect()
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

fn load_all<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
    tree.iter()
        .values()
        .map(|value| Ok(serde_json::from_slice(&value?)?))
        .collect()
}
