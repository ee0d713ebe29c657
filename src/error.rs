use thiserror::Error;

use crate::db::models::BetResult;

/// Errors raised by the ledger core. Every failed operation leaves the
/// persisted state exactly as it was before the call.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed odds, probability, modifier, stake or payout.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient bankroll: stake {stake:.2} exceeds balance {balance:.2}")]
    InsufficientBankroll { stake: f64, balance: f64 },

    #[error("bankroll would go negative: balance {balance:.2}, change {delta:+.2}")]
    NegativeBankroll { balance: f64, delta: f64 },

    #[error("bet {bet_id} is already settled as {result}")]
    AlreadySettled { bet_id: i64, result: BetResult },

    #[error("bet {0} not found")]
    BetNotFound(i64),

    /// History replay disagrees with the stored balances.
    #[error("audit mismatch: {0}")]
    AuditMismatch(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        LedgerError::InvalidInput(msg.into())
    }

    /// Whether the caller can fix the failure by changing its input.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidInput(_)
                | LedgerError::InsufficientBankroll { .. }
                | LedgerError::NegativeBankroll { .. }
                | LedgerError::AlreadySettled { .. }
                | LedgerError::BetNotFound(_)
        )
    }
}
