//! Monte-Carlo runs of repeated Kelly-sized bets on the same price.
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::kelly::{recommend_odds, Odds};
use super::views::max_drawdown;
use crate::db::models::{Simulation, Sport};
use crate::db::Database;
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    pub win_probability: f64,
    pub odds: Odds,
    pub initial_bankroll: f64,
    pub num_bets: u32,
    pub kelly_modifier: f64,
    /// Fixed seed for reproducible runs; entropy when absent
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub total_bets: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub roi: f64,
    /// Percent below the running peak at the worst point
    pub max_drawdown: f64,
    /// Bankroll before the first bet and after each one
    pub bankroll_path: Vec<f64>,
}

/// Stake `fraction × bankroll` on every bet, compounding, until `num_bets`
/// are placed or the bankroll is gone.
pub fn run(params: &SimulationParams) -> Result<SimulationOutcome> {
    if !params.initial_bankroll.is_finite() || params.initial_bankroll <= 0.0 {
        return Err(LedgerError::invalid(format!(
            "initial bankroll must be positive, got {}",
            params.initial_bankroll
        )));
    }
    let rec = recommend_odds(params.odds, params.win_probability, params.kelly_modifier)?;

    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut bankroll = params.initial_bankroll;
    let mut path = Vec::with_capacity(params.num_bets as usize + 1);
    path.push(bankroll);
    let (mut wins, mut losses) = (0u32, 0u32);

    for _ in 0..params.num_bets {
        let stake = bankroll * rec.fraction;
        if rng.gen::<f64>() < params.win_probability {
            bankroll += stake * (rec.decimal_odds - 1.0);
            wins += 1;
        } else {
            bankroll -= stake;
            losses += 1;
        }
        path.push(bankroll);
        if bankroll <= 0.0 {
            break;
        }
    }

    let total_bets = wins + losses;
    Ok(SimulationOutcome {
        initial_bankroll: params.initial_bankroll,
        final_bankroll: bankroll,
        total_bets,
        wins,
        losses,
        win_rate: if total_bets > 0 {
            wins as f64 / total_bets as f64 * 100.0
        } else {
            0.0
        },
        roi: (bankroll - params.initial_bankroll) / params.initial_bankroll * 100.0,
        max_drawdown: max_drawdown(&path).max_drawdown_pct,
        bankroll_path: path,
    })
}

/// Persist a finished run. Simulation rows are never updated afterwards.
pub fn record(
    db: &Database,
    sport: Option<Sport>,
    params: &SimulationParams,
    outcome: &SimulationOutcome,
) -> Result<Simulation> {
    let mut sim = Simulation {
        id: None,
        created_at: Utc::now(),
        sport,
        initial_bankroll: outcome.initial_bankroll,
        final_bankroll: outcome.final_bankroll,
        num_bets: outcome.total_bets as i64,
        wins: outcome.wins as i64,
        win_rate: outcome.win_rate,
        roi: outcome.roi,
        max_drawdown: outcome.max_drawdown,
        kelly_modifier: params.kelly_modifier,
        parameters: serde_json::to_value(params)?,
    };
    sim.id = Some(db.insert_simulation(&sim)?);
    info!(
        "Recorded simulation {:?}: {} bets, ${:.2} → ${:.2} (ROI {:.1}%)",
        sim.id, sim.num_bets, sim.initial_bankroll, sim.final_bankroll, sim.roi
    );
    Ok(sim)
}
