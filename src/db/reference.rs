//! Reference data written by the ingestion side: fixtures, player stats and
//! bookmaker prices. Nothing in the ledger depends on these tables.
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::info;

use super::models::{MatchRecord, OddsQuote, PlayerStats, Sport};
use super::Database;
use crate::engine::kelly::american_to_decimal;
use crate::error::{LedgerError, Result};

/// Rows removed by [`Database::cleanup_old_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub odds_deleted: usize,
    pub matches_deleted: usize,
}

impl Database {
    // ── Matches ──────────────────────────────────────────────────────────────

    /// Insert or refresh a fixture, keyed by (sport, team1, team2, date).
    pub fn save_match(&self, m: &MatchRecord) -> Result<i64> {
        if m.team1.trim().is_empty() || m.team2.trim().is_empty() {
            return Err(LedgerError::invalid("match needs both team names"));
        }
        self.write(|tx| {
            Ok(tx.query_row(
                "INSERT INTO match_data (
                    sport, team1, team2, date, result, score, venue, league, last_updated
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
                 ON CONFLICT(sport, team1, team2, date) DO UPDATE SET
                    result = excluded.result,
                    score = excluded.score,
                    venue = excluded.venue,
                    league = excluded.league,
                    last_updated = excluded.last_updated
                 RETURNING id",
                params![
                    m.sport,
                    m.team1,
                    m.team2,
                    m.date,
                    m.result,
                    m.score,
                    m.venue,
                    m.league,
                    m.last_updated,
                ],
                |r| r.get(0),
            )?)
        })
    }

    /// Most recent fixtures involving `team`, home or away.
    pub fn team_matches(&self, team: &str, sport: Sport, limit: i64) -> Result<Vec<MatchRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sport, team1, team2, date, result, score, venue, league, last_updated
                 FROM match_data
                 WHERE (team1 = ?1 OR team2 = ?1) AND sport = ?2
                 ORDER BY date DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![team, sport, limit], map_match)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // ── Players ──────────────────────────────────────────────────────────────

    /// Insert or refresh a player's line for one season.
    pub fn save_player_stats(&self, p: &PlayerStats) -> Result<i64> {
        if p.player_name.trim().is_empty() {
            return Err(LedgerError::invalid("player name is required"));
        }
        self.write(|tx| {
            Ok(tx.query_row(
                "INSERT INTO player_stats (
                    sport, player_name, team, season, games_played, goals, assists,
                    points, wins, losses, other_stats, last_updated
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                 ON CONFLICT(sport, player_name, season) DO UPDATE SET
                    team = excluded.team,
                    games_played = excluded.games_played,
                    goals = excluded.goals,
                    assists = excluded.assists,
                    points = excluded.points,
                    wins = excluded.wins,
                    losses = excluded.losses,
                    other_stats = excluded.other_stats,
                    last_updated = excluded.last_updated
                 RETURNING id",
                params![
                    p.sport,
                    p.player_name,
                    p.team,
                    p.season,
                    p.games_played,
                    p.goals,
                    p.assists,
                    p.points,
                    p.wins,
                    p.losses,
                    p.other_stats,
                    p.last_updated,
                ],
                |r| r.get(0),
            )?)
        })
    }

    /// Latest stats line for a player.
    pub fn player_stats(&self, player_name: &str, sport: Sport) -> Result<Option<PlayerStats>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, sport, player_name, team, season, games_played, goals, assists,
                            points, wins, losses, other_stats, last_updated
                     FROM player_stats
                     WHERE player_name = ?1 AND sport = ?2
                     ORDER BY last_updated DESC LIMIT 1",
                    params![player_name, sport],
                    map_player,
                )
                .optional()?)
        })
    }

    // ── Odds ─────────────────────────────────────────────────────────────────

    /// Append a batch of price observations.
    pub fn save_odds(&self, quotes: &[OddsQuote]) -> Result<usize> {
        for q in quotes {
            american_to_decimal(q.odds)?;
        }
        self.write(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO odds_history (sport, match_id, bookmaker, market, odds, recorded_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
            )?;
            for q in quotes {
                stmt.execute(params![
                    q.sport,
                    q.match_id,
                    q.bookmaker,
                    q.market,
                    q.odds,
                    q.recorded_at
                ])?;
            }
            Ok(quotes.len())
        })
    }

    /// Every quote for a match, newest first.
    pub fn latest_odds(&self, sport: Sport, match_id: &str) -> Result<Vec<OddsQuote>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sport, match_id, bookmaker, market, odds, recorded_at
                 FROM odds_history WHERE sport = ?1 AND match_id = ?2
                 ORDER BY recorded_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(params![sport, match_id], map_odds)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Quotes for a sport recorded within the last `hours`.
    pub fn recent_odds(&self, sport: Sport, hours: i64) -> Result<Vec<OddsQuote>> {
        if hours <= 0 {
            return Err(LedgerError::invalid(format!(
                "hours must be positive, got {hours}"
            )));
        }
        let cutoff = cutoff_before(Utc::now(), Duration::try_hours(hours), "hours", hours)?;
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sport, match_id, bookmaker, market, odds, recorded_at
                 FROM odds_history WHERE sport = ?1 AND recorded_at > ?2
                 ORDER BY recorded_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(params![sport, cutoff], map_odds)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // ── Retention ────────────────────────────────────────────────────────────

    /// Drop odds older than `days_to_keep` and fixtures not refreshed in half
    /// that window.
    pub fn cleanup_old_data(&self, days_to_keep: i64) -> Result<CleanupReport> {
        if days_to_keep <= 0 {
            return Err(LedgerError::invalid(format!(
                "days_to_keep must be positive, got {days_to_keep}"
            )));
        }
        let now = Utc::now();
        let odds_cutoff =
            cutoff_before(now, Duration::try_days(days_to_keep), "days", days_to_keep)?;
        let match_cutoff = cutoff_before(
            now,
            Duration::try_days(days_to_keep / 2),
            "days",
            days_to_keep,
        )?;
        let report = self.write(|tx| {
            Ok(CleanupReport {
                odds_deleted: tx.execute(
                    "DELETE FROM odds_history WHERE recorded_at < ?1",
                    params![odds_cutoff],
                )?,
                matches_deleted: tx.execute(
                    "DELETE FROM match_data WHERE last_updated < ?1",
                    params![match_cutoff],
                )?,
            })
        })?;
        info!(
            "Cleanup removed {} odds rows and {} matches",
            report.odds_deleted, report.matches_deleted
        );
        Ok(report)
    }
}

/// `now - window`, or `InvalidInput` when the window or the result is out of
/// range.
fn cutoff_before(
    now: DateTime<Utc>,
    window: Option<Duration>,
    unit: &str,
    value: i64,
) -> Result<DateTime<Utc>> {
    window
        .and_then(|w| now.checked_sub_signed(w))
        .ok_or_else(|| LedgerError::invalid(format!("{unit} out of range: {value}")))
}

fn map_match(row: &rusqlite::Row) -> rusqlite::Result<MatchRecord> {
    Ok(MatchRecord {
        id: row.get(0)?,
        sport: row.get(1)?,
        team1: row.get(2)?,
        team2: row.get(3)?,
        date: row.get(4)?,
        result: row.get(5)?,
        score: row.get(6)?,
        venue: row.get(7)?,
        league: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

fn map_player(row: &rusqlite::Row) -> rusqlite::Result<PlayerStats> {
    Ok(PlayerStats {
        id: row.get(0)?,
        sport: row.get(1)?,
        player_name: row.get(2)?,
        team: row.get(3)?,
        season: row.get(4)?,
        games_played: row.get(5)?,
        goals: row.get(6)?,
        assists: row.get(7)?,
        points: row.get(8)?,
        wins: row.get(9)?,
        losses: row.get(10)?,
        other_stats: row.get(11)?,
        last_updated: row.get(12)?,
    })
}

fn map_odds(row: &rusqlite::Row) -> rusqlite::Result<OddsQuote> {
    Ok(OddsQuote {
        id: row.get(0)?,
        sport: row.get(1)?,
        match_id: row.get(2)?,
        bookmaker: row.get(3)?,
        market: row.get(4)?,
        odds: row.get(5)?,
        recorded_at: row.get(6)?,
    })
}
