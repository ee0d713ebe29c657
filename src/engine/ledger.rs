use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::models::{BankrollEntry, Bet, BetResult, ChangeType, AMOUNT_EPSILON};
use crate::db::{self, Database};
use crate::error::{LedgerError, Result};

/// The single authoritative bankroll.
///
/// The balance is the `amount` of the latest history row, so updating the
/// balance and appending history are the same write. All changes go through
/// [`BankrollLedger::apply_change`] or bet settlement.
#[derive(Clone)]
pub struct BankrollLedger {
    db: Database,
}

/// Result of a committed bankroll change.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedChange {
    pub new_balance: f64,
    pub entry: BankrollEntry,
}

/// Summary of a full history replay.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub entries: usize,
    pub balance: f64,
    pub deposits: f64,
    pub withdrawals: f64,
    pub adjustments: f64,
    pub bet_profit_loss: f64,
    pub settled_bets: usize,
}

impl BankrollLedger {
    pub fn new(db: Database) -> Self {
        BankrollLedger { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Latest committed balance; 0 until the first deposit.
    pub fn current_balance(&self) -> Result<f64> {
        self.db.get_balance()
    }

    /// Apply a signed change outside of bet settlement.
    ///
    /// Bet-driven change types are refused here: those entries only exist as
    /// the side effect of settling a bet.
    pub fn apply_change(
        &self,
        delta: f64,
        change_type: ChangeType,
        description: &str,
    ) -> Result<AppliedChange> {
        if change_type.is_bet() {
            return Err(LedgerError::invalid(format!(
                "{change_type} entries are only written by bet settlement"
            )));
        }
        let res = self
            .db
            .write(|tx| apply_in(tx, delta, change_type, description, None));
        match &res {
            Ok(applied) => info!(
                "Bankroll {} {:+.2} → {:.2}",
                change_type, delta, applied.new_balance
            ),
            Err(e @ LedgerError::NegativeBankroll { .. }) => {
                warn!("Rejected {} of {:+.2}: {}", change_type, delta, e)
            }
            Err(_) => {}
        }
        res
    }

    pub fn deposit(&self, amount: f64, description: &str) -> Result<AppliedChange> {
        check_positive("deposit", amount)?;
        self.apply_change(amount, ChangeType::Deposit, description)
    }

    pub fn withdraw(&self, amount: f64, description: &str) -> Result<AppliedChange> {
        check_positive("withdrawal", amount)?;
        self.apply_change(-amount, ChangeType::Withdrawal, description)
    }

    /// Compensating entry for corrections; never edits existing rows.
    pub fn adjust(&self, delta: f64, description: &str) -> Result<AppliedChange> {
        if delta == 0.0 {
            return Err(LedgerError::invalid("adjustment must be non-zero"));
        }
        self.apply_change(delta, ChangeType::ManualAdjustment, description)
    }

    /// History, newest first.
    pub fn history(&self, limit: i64, offset: i64) -> Result<Vec<BankrollEntry>> {
        self.db.get_bankroll_history(limit, offset)
    }

    /// Rebuild the balance from history and cross-check it against settled
    /// bets. Reads one consistent snapshot.
    pub fn replay(&self) -> Result<ReplayReport> {
        self.db.read(|conn| {
            let entries = db::history_rows(conn)?;
            let bets = db::settled_bet_rows(conn)?;
            replay_entries(&entries, &bets)
        })
    }
}

/// Validate and commit one change on an open transaction.
pub(crate) fn apply_in(
    conn: &Connection,
    delta: f64,
    change_type: ChangeType,
    description: &str,
    bet_id: Option<i64>,
) -> Result<AppliedChange> {
    if !delta.is_finite() {
        return Err(LedgerError::invalid(format!("change must be finite, got {delta}")));
    }
    let balance = db::latest_balance(conn)?;
    let new_balance = balance + delta;
    if new_balance < 0.0 {
        return Err(LedgerError::NegativeBankroll { balance, delta });
    }
    let mut entry = BankrollEntry {
        id: None,
        recorded_at: Utc::now(),
        amount: new_balance,
        change: delta,
        change_type,
        description: description.to_string(),
        bet_id,
    };
    entry.id = Some(db::insert_history(conn, &entry)?);
    Ok(AppliedChange { new_balance, entry })
}

fn check_positive(what: &str, amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::invalid(format!(
            "{what} amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn replay_entries(
    entries: &[BankrollEntry],
    bets: &[Bet],
) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();
    let mut by_bet: HashMap<i64, &BankrollEntry> = HashMap::new();

    for entry in entries {
        let expected = report.balance + entry.change;
        if (expected - entry.amount).abs() > AMOUNT_EPSILON {
            return Err(LedgerError::AuditMismatch(format!(
                "history entry {:?}: {:.2} + {:+.2} != {:.2}",
                entry.id, report.balance, entry.change, entry.amount
            )));
        }
        if entry.amount < 0.0 {
            return Err(LedgerError::AuditMismatch(format!(
                "history entry {:?} has negative balance {:.2}",
                entry.id, entry.amount
            )));
        }
        match entry.change_type {
            ChangeType::Deposit => report.deposits += entry.change,
            ChangeType::Withdrawal => report.withdrawals -= entry.change,
            ChangeType::ManualAdjustment => report.adjustments += entry.change,
            ChangeType::BetWin | ChangeType::BetLoss | ChangeType::BetCashout => {
                report.bet_profit_loss += entry.change;
                let bet_id = entry.bet_id.ok_or_else(|| {
                    LedgerError::AuditMismatch(format!(
                        "bet entry {:?} is not linked to a bet",
                        entry.id
                    ))
                })?;
                by_bet.insert(bet_id, entry);
            }
        }
        report.balance = entry.amount;
        report.entries += 1;
    }

    for bet in bets {
        let id = bet.id.unwrap_or_default();
        let linked = by_bet.remove(&id);
        match (bet.result, linked) {
            (Some(BetResult::Void), None) => {}
            (Some(BetResult::Void), Some(_)) => {
                return Err(LedgerError::AuditMismatch(format!(
                    "void bet {id} has a bankroll entry"
                )))
            }
            (Some(result), Some(entry)) => {
                if result.change_type() != Some(entry.change_type)
                    || (entry.change - bet.profit_loss).abs() > AMOUNT_EPSILON
                    || bet
                        .bankroll_after
                        .map_or(true, |after| (after - entry.amount).abs() > AMOUNT_EPSILON)
                {
                    return Err(LedgerError::AuditMismatch(format!(
                        "bet {id} disagrees with its bankroll entry {:?}",
                        entry.id
                    )));
                }
            }
            (_, None) => {
                return Err(LedgerError::AuditMismatch(format!(
                    "settled bet {id} has no bankroll entry"
                )))
            }
            (None, Some(_)) => {
                return Err(LedgerError::AuditMismatch(format!(
                    "pending bet {id} has a bankroll entry"
                )))
            }
        }
        report.settled_bets += 1;
    }

    if let Some(orphan) = by_bet.keys().next() {
        return Err(LedgerError::AuditMismatch(format!(
            "bankroll entry references unsettled bet {orphan}"
        )));
    }
    Ok(report)
}
