use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::db::models::{PlayerStats, Sport};
use crate::db::settings::UserSettings;
use crate::db::Database;
use crate::engine::views;
use crate::error::LedgerError;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Fallbacks for keys missing from the settings table
    pub defaults: UserSettings,
    pub max_bankroll_percent: f64,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Build the Axum router for the dashboard. Every route is read-only.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/balance", get(balance_handler))
        .route("/api/bets", get(bets_handler))
        .route("/api/bets/:id", get(bet_handler))
        .route("/api/history", get(history_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/monthly", get(monthly_handler))
        .route("/api/drawdown", get(drawdown_handler))
        .route("/api/simulations", get(simulations_handler))
        .route("/api/settings", get(settings_handler))
        .route("/api/tables", get(tables_handler))
        .route("/api/matches/:sport/:team", get(team_matches_handler))
        .route("/api/players/:sport/:name", get(player_handler))
        .route("/api/odds/:sport", get(recent_odds_handler))
        .route("/api/odds/:sport/:match_id", get(match_odds_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn api_error(e: LedgerError) -> (StatusCode, String) {
    let status = match &e {
        LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::BetNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientBankroll { .. }
        | LedgerError::NegativeBankroll { .. }
        | LedgerError::AlreadySettled { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[derive(Debug, Serialize)]
struct BalanceView {
    balance: f64,
    pending_bets: i64,
    pending_stake: f64,
    max_bankroll_percent: f64,
}

/// GET /api/balance
async fn balance_handler(State(state): State<Arc<AppState>>) -> ApiResult<BalanceView> {
    let balance = state.db.get_balance().map_err(api_error)?;
    let (pending_bets, pending_stake) = state.db.pending_exposure().map_err(api_error)?;
    Ok(Json(BalanceView {
        balance,
        pending_bets,
        pending_stake,
        max_bankroll_percent: state.max_bankroll_percent,
    }))
}

#[derive(Debug, Deserialize)]
struct BetsQuery {
    sport: Option<Sport>,
    limit: Option<i64>,
    #[serde(default)]
    pending: bool,
}

/// GET /api/bets?sport=soccer&limit=50&pending=true
async fn bets_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<BetsQuery>,
) -> impl IntoResponse {
    state
        .db
        .list_bets(q.sport, q.limit.unwrap_or(50))
        .map(|bets| {
            Json(
                bets.into_iter()
                    .filter(|b| !q.pending || b.is_pending())
                    .collect::<Vec<_>>(),
            )
        })
        .map_err(api_error)
}

/// GET /api/bets/:id
async fn bet_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    state
        .db
        .get_bet(id)
        .and_then(|b| b.ok_or(LedgerError::BetNotFound(id)))
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /api/history?limit=200&offset=0
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> impl IntoResponse {
    state
        .db
        .get_bankroll_history(q.limit.unwrap_or(200), q.offset.unwrap_or(0))
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
struct SportQuery {
    sport: Option<Sport>,
}

/// GET /api/summary, or /api/summary?sport=tennis for one sport
async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SportQuery>,
) -> ApiResult<Vec<views::BettingSummary>> {
    let summaries = match q.sport {
        Some(sport) => vec![views::betting_summary(&state.db, Some(sport)).map_err(api_error)?],
        None => {
            let mut all = views::summary_by_sport(&state.db).map_err(api_error)?;
            all.push(views::betting_summary(&state.db, None).map_err(api_error)?);
            all
        }
    };
    Ok(Json(summaries))
}

/// GET /api/monthly
async fn monthly_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    views::monthly_performance(&state.db)
        .map(Json)
        .map_err(api_error)
}

/// GET /api/drawdown
async fn drawdown_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    views::bankroll_drawdown(&state.db)
        .map(Json)
        .map_err(api_error)
}

/// GET /api/simulations
async fn simulations_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> impl IntoResponse {
    state
        .db
        .list_simulations(q.limit.unwrap_or(20))
        .map(Json)
        .map_err(api_error)
}

/// GET /api/settings
async fn settings_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .db
        .load_settings(&state.defaults)
        .map(Json)
        .map_err(api_error)
}

/// GET /api/tables
async fn tables_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .db
        .table_counts()
        .map(|counts| Json(counts.into_iter().collect::<std::collections::BTreeMap<_, _>>()))
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

/// GET /api/matches/:sport/:team?limit=5
async fn team_matches_handler(
    State(state): State<Arc<AppState>>,
    Path((sport, team)): Path<(Sport, String)>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    state
        .db
        .team_matches(&team, sport, q.limit.unwrap_or(5))
        .map(Json)
        .map_err(api_error)
}

/// GET /api/players/:sport/:name
async fn player_handler(
    State(state): State<Arc<AppState>>,
    Path((sport, name)): Path<(Sport, String)>,
) -> ApiResult<PlayerStats> {
    match state.db.player_stats(&name, sport).map_err(api_error)? {
        Some(stats) => Ok(Json(stats)),
        None => Err((StatusCode::NOT_FOUND, format!("no stats for {name}"))),
    }
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    hours: Option<i64>,
}

/// GET /api/odds/:sport?hours=24
async fn recent_odds_handler(
    State(state): State<Arc<AppState>>,
    Path(sport): Path<Sport>,
    Query(q): Query<HoursQuery>,
) -> impl IntoResponse {
    state
        .db
        .recent_odds(sport, q.hours.unwrap_or(24))
        .map(Json)
        .map_err(api_error)
}

/// GET /api/odds/:sport/:match_id
async fn match_odds_handler(
    State(state): State<Arc<AppState>>,
    Path((sport, match_id)): Path<(Sport, String)>,
) -> impl IntoResponse {
    state
        .db
        .latest_odds(sport, &match_id)
        .map(Json)
        .map_err(api_error)
}
