use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::engine::kelly::check_american_odds;
use crate::error::{LedgerError, Result};

/// Tolerance used when checking bankroll arithmetic on stored rows.
pub const AMOUNT_EPSILON: f64 = 1e-6;

/// Implements text conversions (Display, FromStr, SQLite TEXT column) for a
/// fieldless enum.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[allow(dead_code)]
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(LedgerError::invalid(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        s
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sport {
    Soccer,
    Tennis,
    Cricket,
    F1,
}

text_enum!(Sport {
    Soccer => "soccer",
    Tennis => "tennis",
    Cricket => "cricket",
    F1 => "f1",
});

/// Terminal outcome of a bet. A bet with no result is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetResult {
    Win,
    Loss,
    Cashout,
    Void,
}

text_enum!(BetResult {
    Win => "win",
    Loss => "loss",
    Cashout => "cashout",
    Void => "void",
});

impl BetResult {
    /// History entry type written when a bet settles with this result.
    /// Void settlements do not touch the bankroll.
    pub fn change_type(&self) -> Option<ChangeType> {
        match self {
            BetResult::Win => Some(ChangeType::BetWin),
            BetResult::Loss => Some(ChangeType::BetLoss),
            BetResult::Cashout => Some(ChangeType::BetCashout),
            BetResult::Void => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    BetWin,
    BetLoss,
    BetCashout,
    Deposit,
    Withdrawal,
    ManualAdjustment,
}

text_enum!(ChangeType {
    BetWin => "bet_win",
    BetLoss => "bet_loss",
    BetCashout => "bet_cashout",
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    ManualAdjustment => "manual_adjustment",
});

impl ChangeType {
    pub fn is_bet(&self) -> bool {
        matches!(
            self,
            ChangeType::BetWin | ChangeType::BetLoss | ChangeType::BetCashout
        )
    }
}

/// Who the bet is on. Names are denormalised and may drift from the
/// reference tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Participants {
    pub team1: Option<String>,
    pub team2: Option<String>,
    pub player: Option<String>,
}

impl Participants {
    /// Short label for log lines and history descriptions.
    pub fn describe(&self) -> String {
        match (&self.team1, &self.team2, &self.player) {
            (_, _, Some(p)) => p.clone(),
            (Some(a), Some(b), None) => format!("{a} vs {b}"),
            (Some(a), None, None) | (None, Some(a), None) => a.clone(),
            (None, None, None) => "unnamed".to_string(),
        }
    }
}

/// A single wager. Pending while `result` is `None`; immutable once settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Option<i64>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub sport: Sport,
    /// e.g. "Moneyline", "Over/Under 2.5 Goals"
    pub market: String,
    pub participants: Participants,
    pub bet_type: String,
    /// American odds (+150, -110, ...)
    pub odds: i32,
    /// Exact decimal price the bet was taken at; `odds` is its nearest
    /// American form.
    pub decimal_odds: f64,
    pub stake: f64,
    pub win_probability: f64,
    /// Fraction of bankroll the calculator recommended
    pub kelly_fraction: f64,
    /// Expected profit of this stake in currency units
    pub expected_value: f64,
    pub edge: f64,
    pub result: Option<BetResult>,
    pub payout: f64,
    pub profit_loss: f64,
    pub bankroll_before: f64,
    pub bankroll_after: Option<f64>,
}

impl Bet {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }

    /// Row-level constraints, checked before every write.
    pub fn validate(&self) -> Result<()> {
        check_american_odds(self.odds)?;
        if !self.decimal_odds.is_finite() || self.decimal_odds <= 1.0 {
            return Err(LedgerError::invalid(format!(
                "decimal odds must be greater than 1.0, got {}",
                self.decimal_odds
            )));
        }
        check_non_negative("stake", self.stake)?;
        if !(0.0..=1.0).contains(&self.win_probability) {
            return Err(LedgerError::invalid(format!(
                "win_probability must be within [0, 1], got {}",
                self.win_probability
            )));
        }
        check_non_negative("kelly_fraction", self.kelly_fraction)?;
        check_non_negative("payout", self.payout)?;
        check_non_negative("bankroll_before", self.bankroll_before)?;

        match (self.result, self.bankroll_after) {
            (None, None) => {
                if self.profit_loss != 0.0 || self.settled_at.is_some() {
                    return Err(LedgerError::invalid(
                        "pending bet cannot carry settlement fields",
                    ));
                }
            }
            (Some(_), Some(after)) => {
                check_non_negative("bankroll_after", after)?;
                if (self.bankroll_before + self.profit_loss - after).abs() > AMOUNT_EPSILON {
                    return Err(LedgerError::invalid(format!(
                        "bankroll_after {after:.2} != bankroll_before {:.2} + profit_loss {:.2}",
                        self.bankroll_before, self.profit_loss
                    )));
                }
                if self.settled_at.is_none() {
                    return Err(LedgerError::invalid("settled bet is missing settled_at"));
                }
            }
            (None, Some(_)) => {
                return Err(LedgerError::invalid("pending bet cannot have bankroll_after"))
            }
            (Some(_), None) => {
                return Err(LedgerError::invalid("settled bet requires bankroll_after"))
            }
        }
        Ok(())
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(LedgerError::invalid(format!(
            "{field} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

/// One committed bankroll change. `amount` is the balance after the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankrollEntry {
    pub id: Option<i64>,
    pub recorded_at: DateTime<Utc>,
    pub amount: f64,
    pub change: f64,
    pub change_type: ChangeType,
    pub description: String,
    /// Set for entries produced by settling a bet
    pub bet_id: Option<i64>,
}

/// Recorded outcome of a Monte-Carlo run. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub sport: Option<Sport>,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub num_bets: i64,
    pub wins: i64,
    pub win_rate: f64,
    pub roi: f64,
    pub max_drawdown: f64,
    pub kelly_modifier: f64,
    pub parameters: serde_json::Value,
}

/// A played or scheduled fixture, supplied by the ingestion side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Option<i64>,
    pub sport: Sport,
    pub team1: String,
    pub team2: String,
    pub date: NaiveDate,
    pub result: Option<String>,
    pub score: Option<String>,
    pub venue: Option<String>,
    pub league: Option<String>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStats {
    pub id: Option<i64>,
    pub sport: Sport,
    pub player_name: String,
    pub team: Option<String>,
    pub season: String,
    #[serde(default)]
    pub games_played: i64,
    #[serde(default)]
    pub goals: i64,
    #[serde(default)]
    pub assists: i64,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub wins: i64,
    #[serde(default)]
    pub losses: i64,
    /// Sport-specific extras, free-form
    pub other_stats: Option<String>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

/// A bookmaker price observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsQuote {
    pub id: Option<i64>,
    pub sport: Sport,
    pub match_id: String,
    pub bookmaker: String,
    pub market: String,
    /// American odds
    pub odds: i32,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
impl Participants {
    pub fn teams(team1: impl Into<String>, team2: impl Into<String>) -> Self {
        Participants {
            team1: Some(team1.into()),
            team2: Some(team2.into()),
            player: None,
        }
    }

    pub fn player(name: impl Into<String>) -> Self {
        Participants {
            player: Some(name.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_bet() -> Bet {
        Bet {
            id: None,
            placed_at: Utc::now(),
            settled_at: None,
            sport: Sport::Tennis,
            market: "Match Winner".into(),
            participants: Participants::teams("Alcaraz", "Sinner"),
            bet_type: "Alcaraz".into(),
            odds: 120,
            decimal_odds: 2.2,
            stake: 50.0,
            win_probability: 0.5,
            kelly_fraction: 0.08,
            expected_value: 5.0,
            edge: 0.1,
            result: None,
            payout: 0.0,
            profit_loss: 0.0,
            bankroll_before: 500.0,
            bankroll_after: None,
        }
    }

    #[test]
    fn test_text_enums_parse() {
        assert_eq!("Soccer".parse::<Sport>().unwrap(), Sport::Soccer);
        assert_eq!(" f1 ".parse::<Sport>().unwrap(), Sport::F1);
        assert!("basketball".parse::<Sport>().is_err());
        assert_eq!("cashout".parse::<BetResult>().unwrap(), BetResult::Cashout);
        assert_eq!(
            "manual_adjustment".parse::<ChangeType>().unwrap(),
            ChangeType::ManualAdjustment
        );
        assert_eq!(ChangeType::BetLoss.to_string(), "bet_loss");
    }

    #[test]
    fn test_result_change_types() {
        assert_eq!(BetResult::Win.change_type(), Some(ChangeType::BetWin));
        assert_eq!(BetResult::Loss.change_type(), Some(ChangeType::BetLoss));
        assert_eq!(BetResult::Cashout.change_type(), Some(ChangeType::BetCashout));
        assert_eq!(BetResult::Void.change_type(), None);
        assert!(ChangeType::BetCashout.is_bet());
        assert!(!ChangeType::Deposit.is_bet());
    }

    #[test]
    fn test_participants_describe() {
        assert_eq!(Participants::teams("Arsenal", "Chelsea").describe(), "Arsenal vs Chelsea");
        assert_eq!(Participants::player("Max Verstappen").describe(), "Max Verstappen");
        assert_eq!(Participants::default().describe(), "unnamed");
    }

    #[test]
    fn test_validate_pending_bet() {
        assert!(pending_bet().validate().is_ok());

        let mut bet = pending_bet();
        bet.stake = -1.0;
        assert!(bet.validate().is_err());

        let mut bet = pending_bet();
        bet.win_probability = 1.2;
        assert!(bet.validate().is_err());

        let mut bet = pending_bet();
        bet.odds = 50;
        assert!(bet.validate().is_err());

        let mut bet = pending_bet();
        bet.odds = i32::MIN;
        assert!(bet.validate().is_err());

        let mut bet = pending_bet();
        bet.decimal_odds = 1.0;
        assert!(bet.validate().is_err());

        let mut bet = pending_bet();
        bet.bankroll_after = Some(500.0);
        assert!(bet.validate().is_err());
    }

    #[test]
    fn test_validate_settled_invariant() {
        let mut bet = pending_bet();
        bet.result = Some(BetResult::Loss);
        bet.settled_at = Some(Utc::now());
        bet.profit_loss = -50.0;
        bet.bankroll_after = Some(450.0);
        assert!(bet.validate().is_ok());

        bet.bankroll_after = Some(460.0);
        assert!(bet.validate().is_err());
    }
}
