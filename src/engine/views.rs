//! Read-only aggregates over settled bets and bankroll history.
//!
//! Nothing here is cached; every view is recomputed from committed rows.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::models::{Bet, BetResult, Sport};
use crate::db::Database;
use crate::error::Result;

/// Win/loss statistics for one sport, or all sports when `sport` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BettingSummary {
    pub sport: Option<Sport>,
    /// Settled bets, voids included
    pub total_bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub cashouts: usize,
    pub voids: usize,
    /// wins / (wins + losses) × 100
    pub win_percentage: f64,
    pub total_profit_loss: f64,
    pub total_staked: f64,
    pub average_stake: f64,
    /// Mean decimal odds
    pub average_odds: f64,
    /// total P/L / total staked × 100
    pub roi: f64,
}

/// Aggregate the settled bets in `bets` that match `sport`.
///
/// Stake, odds and ROI cover every settled bet; win percentage only counts
/// wins and losses.
pub fn summarize(sport: Option<Sport>, bets: &[Bet]) -> BettingSummary {
    let mut summary = BettingSummary {
        sport,
        ..Default::default()
    };
    let mut odds_sum = 0.0;

    for bet in bets {
        if sport.is_some_and(|s| s != bet.sport) {
            continue;
        }
        let Some(result) = bet.result else { continue };
        summary.total_bets += 1;
        match result {
            BetResult::Win => summary.wins += 1,
            BetResult::Loss => summary.losses += 1,
            BetResult::Cashout => summary.cashouts += 1,
            BetResult::Void => summary.voids += 1,
        }
        summary.total_profit_loss += bet.profit_loss;
        summary.total_staked += bet.stake;
        odds_sum += bet.decimal_odds;
    }

    let decided = summary.wins + summary.losses;
    if decided > 0 {
        summary.win_percentage = summary.wins as f64 / decided as f64 * 100.0;
    }
    if summary.total_bets > 0 {
        summary.average_stake = summary.total_staked / summary.total_bets as f64;
        summary.average_odds = odds_sum / summary.total_bets as f64;
    }
    if summary.total_staked > 0.0 {
        summary.roi = summary.total_profit_loss / summary.total_staked * 100.0;
    }
    summary
}

pub fn betting_summary(db: &Database, sport: Option<Sport>) -> Result<BettingSummary> {
    Ok(summarize(sport, &db.settled_bets()?))
}

/// One summary per sport that has at least one settled bet.
pub fn summary_by_sport(db: &Database) -> Result<Vec<BettingSummary>> {
    let bets = db.settled_bets()?;
    Ok(Sport::ALL
        .iter()
        .map(|sport| summarize(Some(*sport), &bets))
        .filter(|s| s.total_bets > 0)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPerformance {
    /// "YYYY-MM" of the settlement date
    pub month: String,
    pub sport: Sport,
    pub bets: usize,
    pub profit_loss: f64,
    /// Mean bankroll after each settlement in the month
    pub average_bankroll: f64,
}

/// Group settled bets by (month, sport), most recent month first.
pub fn monthly(bets: &[Bet]) -> Vec<MonthlyPerformance> {
    let mut groups: BTreeMap<(String, Sport), (usize, f64, f64)> = BTreeMap::new();
    for bet in bets {
        let (Some(settled_at), Some(after)) = (bet.settled_at, bet.bankroll_after) else {
            continue;
        };
        let key = (settled_at.format("%Y-%m").to_string(), bet.sport);
        let group = groups.entry(key).or_default();
        group.0 += 1;
        group.1 += bet.profit_loss;
        group.2 += after;
    }

    let mut rows: Vec<MonthlyPerformance> = groups
        .into_iter()
        .map(|((month, sport), (n, pl, bankroll_sum))| MonthlyPerformance {
            month,
            sport,
            bets: n,
            profit_loss: pl,
            average_bankroll: bankroll_sum / n as f64,
        })
        .collect();
    rows.sort_by(|a, b| b.month.cmp(&a.month).then(a.sport.cmp(&b.sport)));
    rows
}

pub fn monthly_performance(db: &Database) -> Result<Vec<MonthlyPerformance>> {
    Ok(monthly(&db.settled_bets()?))
}

/// Peak-to-trough decline of a balance series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawdown {
    pub peak: f64,
    pub max_drawdown: f64,
    /// Percent of the peak the trough fell from
    pub max_drawdown_pct: f64,
}

pub fn max_drawdown(balances: &[f64]) -> Drawdown {
    let mut peak = f64::MIN;
    let mut worst = Drawdown::default();
    for &value in balances {
        if value > peak {
            peak = value;
        }
        let drawdown = peak - value;
        if drawdown > worst.max_drawdown {
            worst.max_drawdown = drawdown;
            worst.max_drawdown_pct = if peak > 0.0 {
                drawdown / peak * 100.0
            } else {
                0.0
            };
        }
    }
    worst.peak = if balances.is_empty() { 0.0 } else { peak };
    worst
}

/// Drawdown over the full bankroll history.
pub fn bankroll_drawdown(db: &Database) -> Result<Drawdown> {
    let amounts: Vec<f64> = db.history_in_order()?.iter().map(|e| e.amount).collect();
    Ok(max_drawdown(&amounts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Participants;
    use crate::engine::bets::{BetBook, BetSlip, Settlement};
    use crate::engine::kelly::{american_to_decimal, recommend, Odds};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn settled(sport: Sport, result: BetResult, odds: i32, stake: f64, pl: f64) -> Bet {
        Bet {
            id: None,
            placed_at: Utc::now(),
            settled_at: Some(Utc::now()),
            sport,
            market: "Moneyline".into(),
            participants: Participants::default(),
            bet_type: "home".into(),
            odds,
            decimal_odds: american_to_decimal(odds).unwrap(),
            stake,
            win_probability: 0.5,
            kelly_fraction: 0.1,
            expected_value: 0.0,
            edge: 0.0,
            result: Some(result),
            payout: stake + pl,
            profit_loss: pl,
            bankroll_before: 1000.0,
            bankroll_after: Some(1000.0 + pl),
        }
    }

    #[test]
    fn test_summarize_mixed_results() {
        let bets = vec![
            settled(Sport::Soccer, BetResult::Win, 100, 100.0, 100.0),
            settled(Sport::Soccer, BetResult::Loss, 150, 50.0, -50.0),
            settled(Sport::Soccer, BetResult::Void, 200, 80.0, 0.0),
            settled(Sport::Soccer, BetResult::Cashout, 100, 50.0, 10.0),
            settled(Sport::Tennis, BetResult::Win, 100, 500.0, 500.0),
        ];
        let s = summarize(Some(Sport::Soccer), &bets);
        assert_eq!(s.total_bets, 4);
        assert_eq!((s.wins, s.losses, s.cashouts, s.voids), (1, 1, 1, 1));
        assert_relative_eq!(s.win_percentage, 50.0, epsilon = 1e-9);
        assert_relative_eq!(s.total_profit_loss, 60.0, epsilon = 1e-9);
        assert_relative_eq!(s.total_staked, 280.0, epsilon = 1e-9);
        assert_relative_eq!(s.average_stake, 70.0, epsilon = 1e-9);
        assert_relative_eq!(s.average_odds, (2.0 + 2.5 + 3.0 + 2.0) / 4.0, epsilon = 1e-9);
        assert_relative_eq!(s.roi, 60.0 / 280.0 * 100.0, epsilon = 1e-9);

        let all = summarize(None, &bets);
        assert_eq!(all.total_bets, 5);
        assert_relative_eq!(all.total_profit_loss, 560.0, epsilon = 1e-9);
    }

    #[test]
    fn test_summarize_empty_and_void_only() {
        let empty = summarize(Some(Sport::F1), &[]);
        assert_eq!(empty.total_bets, 0);
        assert_eq!(empty.win_percentage, 0.0);
        assert_eq!(empty.roi, 0.0);

        let voids = vec![settled(Sport::F1, BetResult::Void, 300, 40.0, 0.0)];
        let s = summarize(Some(Sport::F1), &voids);
        assert_eq!(s.total_bets, 1);
        assert_eq!(s.voids, 1);
        assert_eq!(s.win_percentage, 0.0);
        assert_eq!(s.total_staked, 40.0);
        assert_relative_eq!(s.average_odds, 4.0, epsilon = 1e-9);
        assert_eq!(s.roi, 0.0);
    }

    #[test]
    fn test_void_stake_counts_toward_roi() {
        let bets = vec![
            settled(Sport::Soccer, BetResult::Win, 100, 100.0, 100.0),
            settled(Sport::Soccer, BetResult::Void, 100, 100.0, 0.0),
        ];
        let s = summarize(Some(Sport::Soccer), &bets);
        assert_eq!(s.total_bets, 2);
        assert_relative_eq!(s.win_percentage, 100.0, epsilon = 1e-9);
        assert_relative_eq!(s.total_staked, 200.0, epsilon = 1e-9);
        assert_relative_eq!(s.average_stake, 100.0, epsilon = 1e-9);
        assert_relative_eq!(s.roi, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_monthly_grouping() {
        let mut jan = settled(Sport::Soccer, BetResult::Win, 100, 100.0, 100.0);
        jan.settled_at = Some(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap());
        let mut jan2 = settled(Sport::Soccer, BetResult::Loss, 100, 100.0, -100.0);
        jan2.settled_at = Some(Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap());
        let mut feb = settled(Sport::Cricket, BetResult::Loss, 100, 20.0, -20.0);
        feb.settled_at = Some(Utc.with_ymd_and_hms(2024, 2, 3, 12, 0, 0).unwrap());
        let mut feb_soccer = settled(Sport::Soccer, BetResult::Win, 100, 10.0, 10.0);
        feb_soccer.settled_at = Some(Utc.with_ymd_and_hms(2024, 2, 5, 12, 0, 0).unwrap());

        let rows = monthly(&[jan, jan2, feb, feb_soccer]);
        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].month.as_str(), rows[0].sport), ("2024-02", Sport::Soccer));
        assert_eq!((rows[1].month.as_str(), rows[1].sport), ("2024-02", Sport::Cricket));
        assert_eq!(rows[2].month, "2024-01");
        assert_eq!(rows[2].bets, 2);
        assert_relative_eq!(rows[2].profit_loss, 0.0, epsilon = 1e-9);
        assert_relative_eq!(rows[2].average_bankroll, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_max_drawdown() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 104.0, 110.0]);
        assert_relative_eq!(dd.peak, 130.0, epsilon = 1e-9);
        assert_relative_eq!(dd.max_drawdown, 30.0, epsilon = 1e-9);
        assert_relative_eq!(dd.max_drawdown_pct, 25.0, epsilon = 1e-9);

        assert_eq!(max_drawdown(&[]), Drawdown::default());
        assert_eq!(max_drawdown(&[5.0, 6.0]).max_drawdown, 0.0);
    }

    #[test]
    fn test_summary_after_settled_win() {
        let db = Database::open_in_memory().unwrap();
        let book = BetBook::new(db.clone());
        book.ledger().deposit(1000.0, "seed").unwrap();
        let slip = BetSlip {
            sport: Sport::Soccer,
            market: "Moneyline".into(),
            participants: Participants::teams("Arsenal", "Chelsea"),
            bet_type: "Arsenal".into(),
            odds: Odds::Decimal(2.0),
            stake: 100.0,
        };
        let bet = book.open(&slip, &recommend(2.0, 0.6, 1.0).unwrap()).unwrap();
        book.settle(bet.id.unwrap(), Settlement::win(200.0)).unwrap();

        let s = betting_summary(&db, Some(Sport::Soccer)).unwrap();
        assert_eq!(s.total_bets, 1);
        assert_eq!(s.wins, 1);
        assert_relative_eq!(s.win_percentage, 100.0, epsilon = 1e-9);
        assert_relative_eq!(s.roi, 100.0, epsilon = 1e-9);
        assert_relative_eq!(s.average_odds, 2.0, epsilon = 1e-9);

        let per_sport = summary_by_sport(&db).unwrap();
        assert_eq!(per_sport.len(), 1);
        assert_eq!(per_sport[0].sport, Some(Sport::Soccer));

        let months = monthly_performance(&db).unwrap();
        assert_eq!(months.len(), 1);
        assert_relative_eq!(months[0].average_bankroll, 1100.0, epsilon = 1e-9);

        book.ledger().withdraw(330.0, "payout").unwrap();
        let dd = bankroll_drawdown(&db).unwrap();
        assert_relative_eq!(dd.peak, 1100.0, epsilon = 1e-9);
        assert_relative_eq!(dd.max_drawdown_pct, 30.0, epsilon = 1e-9);
    }
}
