// ============================================================================
// Betting Module - Group Bet Settlement Core
// ============================================================================
//
// Everything that happens to a bet between creation and payout:
//   - bet: the proposition record and the only writer of its pools
//   - odds: pari-mutuel odds and payout arithmetic
//   - participation: one stake per (user, bet); place / cancel / remove
//   - resolution: creator, assigned-resolver and consensus-vote resolution
//   - settlement: pays winners out of the pool once an outcome is final
//
// Lock order: a bet's slot lock is always taken before any account lock.
// The ledger never takes a bet lock, so the two can not deadlock.
//
// ============================================================================

pub mod bet;
pub mod odds;
pub mod participation;
pub mod resolution;
pub mod settlement;

pub use bet::*;
pub use participation::*;
pub use resolution::*;
pub use settlement::*;
