use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;

mod config;
mod dashboard;
mod db;
mod engine;
mod error;

use config::{Command, Config, ImportKind};
use dashboard::AppState;
use db::models::{Bet, BetResult, MatchRecord, OddsQuote, Participants, PlayerStats, AMOUNT_EPSILON};
use db::settings::UserSettings;
use db::Database;
use engine::kelly::{self, Scenario};
use engine::simulation::{self, SimulationParams};
use engine::views;
use engine::{BetBook, BetSlip, Settlement};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let defaults = config.user_defaults()?;
    let seeded = db.seed_settings(&defaults)?;
    if seeded > 0 {
        info!("Seeded {} default setting(s)", seeded);
    }
    let settings = db.load_settings(&defaults)?;

    let book = BetBook::new(db.clone());
    if config.seed && db.count_history()? == 0 {
        book.ledger()
            .deposit(settings.default_bankroll, "initial bankroll")?;
    }

    match config.command.clone() {
        Command::Serve => serve(&config, db, settings).await?,
        command => run_command(&config, &book, &settings, command)?,
    }
    Ok(())
}

async fn serve(config: &Config, db: Database, settings: UserSettings) -> Result<()> {
    let state = AppState {
        db,
        defaults: settings,
        max_bankroll_percent: config.max_bankroll_percent,
    };
    let app = dashboard::router(state);
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    info!("Dashboard listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run dashboard server (blocks until shutdown)
    axum::serve(listener, app).await?;
    Ok(())
}

fn run_command(
    config: &Config,
    book: &BetBook,
    settings: &UserSettings,
    command: Command,
) -> Result<()> {
    let ledger = book.ledger();
    let db = ledger.database();
    match command {
        Command::Serve => anyhow::bail!("serve runs on the async runtime"),
        Command::Deposit { amount, description } => {
            print_json(&ledger.deposit(amount, &description)?)
        }
        Command::Withdraw { amount, description } => {
            print_json(&ledger.withdraw(amount, &description)?)
        }
        Command::Adjust { delta, description } => print_json(&ledger.adjust(delta, &description)?),
        Command::Recommend {
            odds,
            probability,
            modifier,
            risk,
            bankroll,
        } => {
            let multiplier = match (risk, modifier) {
                (Some(risk), _) => risk.multiplier(),
                (None, Some(m)) => m.value(),
                (None, None) => settings.default_kelly_fraction.value(),
            };
            let rec = kelly::recommend_odds(odds, probability, multiplier)?;
            let bankroll = match bankroll {
                Some(b) => b,
                None => ledger.current_balance()?,
            };
            print_json(&kelly::recommended_stake(
                &rec,
                bankroll,
                config.max_bankroll_percent,
            )?)
        }
        Command::Compare { scenarios } => {
            let scenarios = scenarios
                .iter()
                .map(|s| parse_scenario(s))
                .collect::<Result<Vec<_>>>()?;
            let ranked = kelly::rank_scenarios(
                &scenarios,
                ledger.current_balance()?,
                settings.default_kelly_fraction.value(),
            )?;
            print_json(&ranked)
        }
        Command::Open {
            sport,
            market,
            bet_type,
            odds,
            probability,
            stake,
            team1,
            team2,
            player,
            modifier,
        } => {
            let multiplier = modifier.unwrap_or(settings.default_kelly_fraction).value();
            let rec = kelly::recommend_odds(odds, probability, multiplier)?;
            let stake = match stake {
                Some(s) => s,
                None => {
                    let balance = ledger.current_balance()?;
                    kelly::recommended_stake(&rec, balance, config.max_bankroll_percent)?.stake
                }
            };
            let slip = BetSlip {
                sport,
                market,
                participants: Participants {
                    team1,
                    team2,
                    player,
                },
                bet_type,
                odds,
                stake,
            };
            print_json(&book.open(&slip, &rec)?)
        }
        Command::Settle {
            bet_id,
            result,
            payout,
        } => {
            let settlement = settlement_for(&book.get(bet_id)?, result, payout)?;
            print_json(&book.settle(bet_id, settlement)?)
        }
        Command::Bets { sport, limit } => print_json(&book.list(sport, limit)?),
        Command::History { limit, offset } => print_json(&ledger.history(limit, offset)?),
        Command::Summary { sport: Some(sport) } => {
            print_json(&views::betting_summary(db, Some(sport))?)
        }
        Command::Summary { sport: None } => {
            let mut summaries = views::summary_by_sport(db)?;
            summaries.push(views::betting_summary(db, None)?);
            print_json(&summaries)
        }
        Command::Monthly => print_json(&views::monthly_performance(db)?),
        Command::Simulate {
            odds,
            probability,
            bets,
            bankroll,
            modifier,
            seed,
            sport,
            save,
        } => {
            let params = SimulationParams {
                win_probability: probability,
                odds,
                initial_bankroll: bankroll.unwrap_or(settings.default_bankroll),
                num_bets: bets,
                kelly_modifier: modifier.unwrap_or(settings.default_kelly_fraction).value(),
                seed,
            };
            let outcome = simulation::run(&params)?;
            if save {
                simulation::record(db, sport, &params, &outcome)?;
            }
            print_json(&outcome)
        }
        Command::Audit => {
            let report = ledger.replay()?;
            let balance = ledger.current_balance()?;
            if (report.balance - balance).abs() > AMOUNT_EPSILON {
                anyhow::bail!(
                    "replayed balance {:.2} differs from current balance {:.2}",
                    report.balance,
                    balance
                );
            }
            let (pending, exposure) = db.pending_exposure()?;
            info!(
                "Audit passed: {} entries, {} pending bet(s) staking ${:.2}",
                report.entries, pending, exposure
            );
            print_json(&report)
        }
        Command::Settings { reset: true, .. } => {
            db.save_settings(&config.user_defaults()?)?;
            print_json(&config.user_defaults()?)
        }
        Command::Settings { key: None, .. } => print_json(settings),
        Command::Settings {
            key: Some(key),
            value: None,
            ..
        } => {
            let value = db
                .get_setting(&key)?
                .with_context(|| format!("setting {key} is not set"))?;
            println!("{value}");
            Ok(())
        }
        Command::Settings {
            key: Some(key),
            value: Some(value),
            ..
        } => {
            db.set_setting(&key, &value)?;
            Ok(())
        }
        Command::Cleanup { days } => print_json(&db.cleanup_old_data(days)?),
        Command::Import { kind, path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let imported = match kind {
                ImportKind::Matches => {
                    let records: Vec<MatchRecord> = serde_json::from_str(&raw)?;
                    for m in &records {
                        db.save_match(m)?;
                    }
                    records.len()
                }
                ImportKind::Players => {
                    let records: Vec<PlayerStats> = serde_json::from_str(&raw)?;
                    for p in &records {
                        db.save_player_stats(p)?;
                    }
                    records.len()
                }
                ImportKind::Odds => db.save_odds(&serde_json::from_str::<Vec<OddsQuote>>(&raw)?)?,
            };
            info!("Imported {} {:?} row(s) from {}", imported, kind, path.display());
            Ok(())
        }
    }
}

/// A win without an explicit payout returns stake × the price the bet was
/// taken at.
fn settlement_for(bet: &Bet, result: BetResult, payout: Option<f64>) -> Result<Settlement> {
    Ok(match (result, payout) {
        (BetResult::Win, None) => Settlement::win(bet.stake * bet.decimal_odds),
        (BetResult::Cashout, None) => anyhow::bail!("--payout is required for a cashout"),
        (result, payout) => Settlement::new(result, payout.unwrap_or_default()),
    })
}

/// "name:odds:probability", e.g. "home:-110:0.55"
fn parse_scenario(raw: &str) -> Result<Scenario> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(probability), Some(odds), Some(name)) = (parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("scenario must look like name:odds:probability, got {raw:?}");
    };
    Ok(Scenario {
        name: name.to_string(),
        odds: odds.parse()?,
        win_probability: probability
            .trim()
            .parse()
            .with_context(|| format!("bad probability in scenario {raw:?}"))?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
