use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::kelly::{KellyRecommendation, Odds};
use super::ledger::{apply_in, BankrollLedger};
use crate::db::models::{Bet, BetResult, Participants, Sport};
use crate::db::{self, Database};
use crate::error::{LedgerError, Result};

/// Tolerance when matching a recommendation's odds against the slip.
const ODDS_EPSILON: f64 = 1e-9;

/// A prospective bet as entered by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSlip {
    pub sport: Sport,
    pub market: String,
    pub participants: Participants,
    pub bet_type: String,
    pub odds: Odds,
    pub stake: f64,
}

/// How a pending bet ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Settlement {
    pub result: BetResult,
    /// Total returned to the bettor, stake included
    pub payout: f64,
    pub settled_at: DateTime<Utc>,
}

impl Settlement {
    pub fn new(result: BetResult, payout: f64) -> Self {
        Settlement {
            result,
            payout,
            settled_at: Utc::now(),
        }
    }

    pub fn win(payout: f64) -> Self {
        Self::new(BetResult::Win, payout)
    }

    pub fn loss() -> Self {
        Self::new(BetResult::Loss, 0.0)
    }

    pub fn cashout(payout: f64) -> Self {
        Self::new(BetResult::Cashout, payout)
    }

    pub fn void() -> Self {
        Self::new(BetResult::Void, 0.0)
    }

    /// Backdate or postdate the settlement time.
    pub fn at(mut self, settled_at: DateTime<Utc>) -> Self {
        self.settled_at = settled_at;
        self
    }
}

/// Bet lifecycle: `Pending → {Win, Loss, Cashout, Void}`.
///
/// Opening and settling each run as one transaction on the shared database,
/// which serialises them against every other ledger writer.
#[derive(Clone)]
pub struct BetBook {
    ledger: BankrollLedger,
}

impl BetBook {
    pub fn new(db: Database) -> Self {
        BetBook {
            ledger: BankrollLedger::new(db),
        }
    }

    pub fn ledger(&self) -> &BankrollLedger {
        &self.ledger
    }

    fn db(&self) -> &Database {
        self.ledger.database()
    }

    /// Record a new pending bet.
    ///
    /// The stake must be covered by the current balance but is not deducted;
    /// the bankroll only moves when the bet settles.
    pub fn open(&self, slip: &BetSlip, kelly: &KellyRecommendation) -> Result<Bet> {
        if !slip.stake.is_finite() || slip.stake < 0.0 {
            return Err(LedgerError::invalid(format!(
                "stake must be non-negative, got {}",
                slip.stake
            )));
        }
        if slip.market.trim().is_empty() || slip.bet_type.trim().is_empty() {
            return Err(LedgerError::invalid("market and bet type are required"));
        }
        let decimal_odds = slip.odds.to_decimal()?;
        let odds = slip.odds.to_american()?;
        if (kelly.decimal_odds - decimal_odds).abs() > ODDS_EPSILON {
            return Err(LedgerError::invalid(format!(
                "recommendation was computed for odds {:.3}, slip has {:.3}",
                kelly.decimal_odds, decimal_odds
            )));
        }
        if !(0.0..=1.0).contains(&kelly.win_probability) || kelly.fraction < 0.0 {
            return Err(LedgerError::invalid("malformed Kelly recommendation"));
        }

        let bet = self.db().write(|tx| {
            let balance = db::latest_balance(tx)?;
            if slip.stake > balance {
                return Err(LedgerError::InsufficientBankroll {
                    stake: slip.stake,
                    balance,
                });
            }
            let mut bet = Bet {
                id: None,
                placed_at: Utc::now(),
                settled_at: None,
                sport: slip.sport,
                market: slip.market.trim().to_string(),
                participants: slip.participants.clone(),
                bet_type: slip.bet_type.trim().to_string(),
                odds,
                decimal_odds,
                stake: slip.stake,
                win_probability: kelly.win_probability,
                kelly_fraction: kelly.fraction,
                expected_value: kelly.expected_value * slip.stake,
                edge: kelly.edge,
                result: None,
                payout: 0.0,
                profit_loss: 0.0,
                bankroll_before: balance,
                bankroll_after: None,
            };
            bet.validate()?;
            bet.id = Some(db::insert_bet(tx, &bet)?);
            Ok(bet)
        });

        match &bet {
            Ok(bet) => {
                if !kelly.has_edge() {
                    warn!(
                        "Bet {:?} has no edge: p={:.3} vs implied {:.3}",
                        bet.id, kelly.win_probability, kelly.implied_probability
                    );
                }
                let recommended = kelly.fraction * bet.bankroll_before;
                if bet.stake > recommended + ODDS_EPSILON {
                    warn!(
                        "Bet {:?} stake ${:.2} exceeds Kelly recommendation ${:.2}",
                        bet.id, bet.stake, recommended
                    );
                }
                info!(
                    "Opened bet {:?}: {} {} {} @ {:+} stake ${:.2} (bankroll ${:.2})",
                    bet.id,
                    bet.sport,
                    bet.participants.describe(),
                    bet.bet_type,
                    bet.odds,
                    bet.stake,
                    bet.bankroll_before
                );
            }
            Err(e @ LedgerError::InsufficientBankroll { .. }) => warn!("Rejected bet: {}", e),
            Err(_) => {}
        }
        bet
    }

    /// Settle a pending bet, moving the bankroll and appending history in
    /// one transaction.
    ///
    /// Void bets return the stake: profit/loss is zero and no history entry
    /// is written. If the bankroll cannot absorb the loss the bet stays
    /// pending and nothing is written.
    pub fn settle(&self, bet_id: i64, settlement: Settlement) -> Result<Bet> {
        if settlement.result != BetResult::Void
            && (!settlement.payout.is_finite() || settlement.payout < 0.0)
        {
            return Err(LedgerError::invalid(format!(
                "payout must be non-negative, got {}",
                settlement.payout
            )));
        }

        let res = self.db().write(|tx| {
            let pending = db::find_bet(tx, bet_id)?.ok_or(LedgerError::BetNotFound(bet_id))?;
            if let Some(result) = pending.result {
                return Err(LedgerError::AlreadySettled { bet_id, result });
            }

            let balance = db::latest_balance(tx)?;
            if (balance - pending.bankroll_before).abs() > f64::EPSILON {
                debug!(
                    "Bet {} opened at bankroll ${:.2}, settling at ${:.2}",
                    bet_id, pending.bankroll_before, balance
                );
            }

            let mut settled = pending.clone();
            settled.result = Some(settlement.result);
            settled.settled_at = Some(settlement.settled_at);
            settled.bankroll_before = balance;

            match settlement.result.change_type() {
                None => {
                    settled.payout = pending.stake;
                    settled.profit_loss = 0.0;
                    settled.bankroll_after = Some(balance);
                }
                Some(change_type) => {
                    let profit_loss = settlement.payout - pending.stake;
                    let description = format!(
                        "{} {}: {} - {} {} @ {:+}",
                        pending.sport,
                        settlement.result,
                        pending.participants.describe(),
                        pending.market,
                        pending.bet_type,
                        pending.odds
                    );
                    let applied =
                        apply_in(tx, profit_loss, change_type, &description, Some(bet_id))?;
                    settled.payout = settlement.payout;
                    settled.profit_loss = profit_loss;
                    settled.bankroll_after = Some(applied.new_balance);
                }
            }

            settled.validate()?;
            db::record_settlement(tx, &settled)?;
            Ok(settled)
        });

        match &res {
            Ok(bet) => info!(
                "Settled bet {} as {}: P/L {:+.2}, bankroll ${:.2} → ${:.2}",
                bet_id,
                settlement.result,
                bet.profit_loss,
                bet.bankroll_before,
                bet.bankroll_after.unwrap_or(bet.bankroll_before)
            ),
            Err(e) if e.is_rejection() => warn!("Settlement of bet {} rejected: {}", bet_id, e),
            Err(_) => {}
        }
        res
    }

    pub fn get(&self, bet_id: i64) -> Result<Bet> {
        self.db()
            .get_bet(bet_id)?
            .ok_or(LedgerError::BetNotFound(bet_id))
    }

    pub fn list(&self, sport: Option<Sport>, limit: i64) -> Result<Vec<Bet>> {
        self.db().list_bets(sport, limit)
    }
}
