use clap::{Parser, Subcommand};
use std::net::SocketAddr;

use crate::db::models::{BetResult, Sport};
use crate::db::settings::UserSettings;
use crate::engine::kelly::{KellyModifier, Odds, RiskTolerance};

/// Kelly-criterion bankroll ledger for sports betting
#[derive(Parser, Debug, Clone)]
#[command(name = "kelly-ledger", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "kelly_betting.db")]
    pub database_path: String,

    /// Bankroll deposited by --seed and stored as the default_bankroll setting
    #[arg(long, env = "DEFAULT_BANKROLL", default_value = "5000.0")]
    pub default_bankroll: f64,

    /// Default Kelly modifier ("Quarter Kelly", "Half Kelly", "Full Kelly" or 0–1)
    #[arg(long, env = "KELLY_FRACTION", default_value = "Half Kelly")]
    pub kelly_fraction: String,

    /// Default risk tolerance (low, medium, high)
    #[arg(long, env = "RISK_TOLERANCE", default_value = "medium")]
    pub risk_tolerance: String,

    /// Cap on the share of bankroll available for a single stake (0.0–1.0]
    #[arg(long, env = "MAX_BANKROLL_PERCENT", default_value = "1.0")]
    pub max_bankroll_percent: f64,

    /// Dashboard listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "127.0.0.1:8080")]
    pub dashboard_addr: String,

    /// Deposit the default bankroll if the ledger has no history yet
    #[arg(long, env = "SEED_BANKROLL", default_value = "false")]
    pub seed: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the read-only JSON dashboard
    Serve,

    /// Add funds to the bankroll
    Deposit {
        amount: f64,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Take funds out of the bankroll
    Withdraw {
        amount: f64,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Record a signed correction entry
    Adjust {
        #[arg(allow_hyphen_values = true)]
        delta: f64,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Kelly stake for a price and win probability
    Recommend {
        /// Decimal (2.10) or American (+110, -120) odds
        #[arg(allow_hyphen_values = true)]
        odds: Odds,
        probability: f64,
        /// Override the stored Kelly modifier
        #[arg(long)]
        modifier: Option<KellyModifier>,
        /// Size by risk tolerance instead of the Kelly modifier
        #[arg(long)]
        risk: Option<RiskTolerance>,
        /// Size against this bankroll instead of the ledger balance
        #[arg(long)]
        bankroll: Option<f64>,
    },

    /// Rank several "name:odds:probability" scenarios by expected value
    Compare {
        #[arg(required = true, allow_hyphen_values = true)]
        scenarios: Vec<String>,
    },

    /// Open a pending bet
    Open {
        sport: Sport,
        #[arg(long)]
        market: String,
        #[arg(long)]
        bet_type: String,
        #[arg(long, allow_hyphen_values = true)]
        odds: Odds,
        #[arg(long)]
        probability: f64,
        /// Defaults to the recommended stake
        #[arg(long)]
        stake: Option<f64>,
        #[arg(long)]
        team1: Option<String>,
        #[arg(long)]
        team2: Option<String>,
        #[arg(long)]
        player: Option<String>,
        #[arg(long)]
        modifier: Option<KellyModifier>,
    },

    /// Settle a pending bet
    Settle {
        bet_id: i64,
        result: BetResult,
        /// Total returned, stake included. Defaults to stake × odds on a win
        #[arg(long)]
        payout: Option<f64>,
    },

    /// List recent bets
    Bets {
        #[arg(long)]
        sport: Option<Sport>,
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Bankroll history, newest first
    History {
        #[arg(long, default_value = "20")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Win/loss statistics, per sport or overall
    Summary {
        #[arg(long)]
        sport: Option<Sport>,
    },

    /// Profit/loss per month and sport
    Monthly,

    /// Monte-Carlo run of repeated Kelly bets
    Simulate {
        #[arg(allow_hyphen_values = true)]
        odds: Odds,
        probability: f64,
        #[arg(long, default_value = "100")]
        bets: u32,
        #[arg(long)]
        bankroll: Option<f64>,
        #[arg(long)]
        modifier: Option<KellyModifier>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        sport: Option<Sport>,
        /// Persist the run in the simulations table
        #[arg(long)]
        save: bool,
    },

    /// Replay history and cross-check it against settled bets
    Audit,

    /// Show settings, or get/set one key
    Settings {
        key: Option<String>,
        value: Option<String>,
        /// Overwrite every key with the configured defaults
        #[arg(long, conflicts_with = "key")]
        reset: bool,
    },

    /// Load reference data from a JSON array file
    Import {
        kind: ImportKind,
        path: std::path::PathBuf,
    },

    /// Drop old odds and match rows
    Cleanup {
        #[arg(long, default_value = "365")]
        days: i64,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Matches,
    Players,
    Odds,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.default_bankroll.is_finite() && self.default_bankroll > 0.0) {
            anyhow::bail!("default_bankroll must be positive");
        }
        if let Err(e) = self.kelly_fraction.parse::<KellyModifier>() {
            anyhow::bail!("KELLY_FRACTION: {}", e);
        }
        if let Err(e) = self.risk_tolerance.parse::<RiskTolerance>() {
            anyhow::bail!("RISK_TOLERANCE: {}", e);
        }
        if !(self.max_bankroll_percent > 0.0 && self.max_bankroll_percent <= 1.0) {
            anyhow::bail!("max_bankroll_percent must be within (0.0, 1.0]");
        }
        if self.dashboard_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("DASHBOARD_ADDR is not a socket address: {}", self.dashboard_addr);
        }
        Ok(())
    }

    /// Settings used to fill keys missing from the database.
    pub fn user_defaults(&self) -> anyhow::Result<UserSettings> {
        Ok(UserSettings {
            default_bankroll: self.default_bankroll,
            default_kelly_fraction: self.kelly_fraction.parse()?,
            risk_tolerance: self.risk_tolerance.parse()?,
            ..UserSettings::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["kelly-ledger"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let config = parse(&["audit"]);
        assert_eq!(config.kelly_fraction, "Half Kelly");
        assert!(config.validate().is_ok());
        let defaults = config.user_defaults().unwrap();
        assert_eq!(defaults.default_kelly_fraction, KellyModifier::Half);
        assert_eq!(defaults.risk_tolerance, RiskTolerance::Medium);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["--kelly-fraction", "Double Kelly", "audit"]).validate().is_err());
        assert!(parse(&["--max-bankroll-percent", "1.5", "audit"]).validate().is_err());
        assert!(parse(&["--default-bankroll", "0", "audit"]).validate().is_err());
        assert!(parse(&["--risk-tolerance", "reckless", "audit"]).validate().is_err());
    }

    #[test]
    fn test_subcommand_arguments() {
        match parse(&["recommend", "-110", "0.55", "--modifier", "quarter"]).command {
            Command::Recommend { odds, probability, modifier, .. } => {
                assert_eq!(odds, Odds::American(-110));
                assert_eq!(probability, 0.55);
                assert_eq!(modifier, Some(KellyModifier::Quarter));
            }
            other => panic!("unexpected command {other:?}"),
        }
        match parse(&["settle", "7", "cashout", "--payout", "42.5"]).command {
            Command::Settle { bet_id, result, payout } => {
                assert_eq!(bet_id, 7);
                assert_eq!(result, BetResult::Cashout);
                assert_eq!(payout, Some(42.5));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            parse(&["adjust", "-12.5"]).command,
            Command::Adjust { delta, .. } if delta == -12.5
        ));
        assert!(matches!(
            parse(&["import", "odds", "quotes.json"]).command,
            Command::Import { kind: ImportKind::Odds, .. }
        ));
        assert!(Config::try_parse_from(["kelly-ledger", "settings", "theme", "--reset"]).is_err());
    }
}
