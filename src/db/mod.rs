use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{LedgerError, Result};

pub mod models;
pub mod reference;
pub mod settings;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex).
///
/// Every write runs inside one immediate transaction while the mutex is held,
/// so readers only ever observe committed state.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Run `f` against committed state.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` as one atomic unit. Any error rolls back everything `f` wrote.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Balance ──────────────────────────────────────────────────────────────

    /// Current balance from the latest bankroll_history entry (0 when empty)
    pub fn get_balance(&self) -> Result<f64> {
        self.read(latest_balance)
    }

    /// Bankroll history, newest first
    pub fn get_bankroll_history(&self, limit: i64, offset: i64) -> Result<Vec<BankrollEntry>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recorded_at, amount, change_amount, change_type, description, bet_id
                 FROM bankroll_history ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], map_history)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Full history in commit order, for replay
    pub fn history_in_order(&self) -> Result<Vec<BankrollEntry>> {
        self.read(history_rows)
    }

    pub fn count_history(&self) -> Result<i64> {
        self.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM bankroll_history", [], |r| r.get(0))?)
        })
    }

    // ── Bets ─────────────────────────────────────────────────────────────────

    pub fn get_bet(&self, id: i64) -> Result<Option<Bet>> {
        self.read(|conn| find_bet(conn, id))
    }

    /// List bets newest first, optionally for one sport
    pub fn list_bets(&self, sport: Option<Sport>, limit: i64) -> Result<Vec<Bet>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {BET_COLUMNS} FROM bets
                 WHERE (?1 IS NULL OR sport = ?1)
                 ORDER BY placed_at DESC, id DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let bets = stmt
                .query_map(params![sport, limit], map_bet)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(bets)
        })
    }

    /// Every settled bet in settlement order
    pub fn settled_bets(&self) -> Result<Vec<Bet>> {
        self.read(settled_bet_rows)
    }

    /// Number of pending bets and the sum of their stakes
    pub fn pending_exposure(&self) -> Result<(i64, f64)> {
        self.read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(stake), 0) FROM bets WHERE result IS NULL",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?)
        })
    }

    // ── Simulations ──────────────────────────────────────────────────────────

    /// Insert a simulation record. There is no update path.
    pub fn insert_simulation(&self, sim: &Simulation) -> Result<i64> {
        let parameters = serde_json::to_string(&sim.parameters)?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO simulations (
                    created_at, sport, initial_bankroll, final_bankroll, num_bets,
                    wins, win_rate, roi, max_drawdown, kelly_modifier, parameters
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    sim.created_at,
                    sim.sport,
                    sim.initial_bankroll,
                    sim.final_bankroll,
                    sim.num_bets,
                    sim.wins,
                    sim.win_rate,
                    sim.roi,
                    sim.max_drawdown,
                    sim.kelly_modifier,
                    parameters,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn list_simulations(&self, limit: i64) -> Result<Vec<Simulation>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, created_at, sport, initial_bankroll, final_bankroll, num_bets,
                        wins, win_rate, roi, max_drawdown, kelly_modifier, parameters
                 FROM simulations ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    let parameters: String = row.get(11)?;
                    Ok((
                        Simulation {
                            id: row.get(0)?,
                            created_at: row.get(1)?,
                            sport: row.get(2)?,
                            initial_bankroll: row.get(3)?,
                            final_bankroll: row.get(4)?,
                            num_bets: row.get(5)?,
                            wins: row.get(6)?,
                            win_rate: row.get(7)?,
                            roi: row.get(8)?,
                            max_drawdown: row.get(9)?,
                            kelly_modifier: row.get(10)?,
                            parameters: serde_json::Value::Null,
                        },
                        parameters,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(mut sim, raw)| -> Result<Simulation> {
                    sim.parameters = serde_json::from_str(&raw)?;
                    Ok(sim)
                })
                .collect()
        })
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Row counts per table
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        self.read(|conn| {
            TABLES
                .iter()
                .map(|table| -> Result<(&'static str, i64)> {
                    let count: i64 =
                        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| {
                            r.get(0)
                        })?;
                    Ok((*table, count))
                })
                .collect()
        })
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────
//
// These run on a borrowed connection so the engine can compose them inside a
// single `Database::write` transaction.

pub(crate) fn latest_balance(conn: &Connection) -> Result<f64> {
    let balance = conn
        .query_row(
            "SELECT amount FROM bankroll_history ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0.0))
}

pub(crate) fn history_rows(conn: &Connection) -> Result<Vec<BankrollEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, recorded_at, amount, change_amount, change_type, description, bet_id
         FROM bankroll_history ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], map_history)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn settled_bet_rows(conn: &Connection) -> Result<Vec<Bet>> {
    let sql = format!(
        "SELECT {BET_COLUMNS} FROM bets
         WHERE result IS NOT NULL ORDER BY settled_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let bets = stmt
        .query_map([], map_bet)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bets)
}

pub(crate) fn insert_history(conn: &Connection, entry: &BankrollEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO bankroll_history (
            recorded_at, amount, change_amount, change_type, description, bet_id
         ) VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            entry.recorded_at,
            entry.amount,
            entry.change,
            entry.change_type,
            entry.description,
            entry.bet_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_bet(conn: &Connection, bet: &Bet) -> Result<i64> {
    conn.execute(
        "INSERT INTO bets (
            placed_at, sport, market, team1, team2, player_name, bet_type, odds,
            decimal_odds, stake, win_probability, kelly_fraction, expected_value,
            edge, payout, profit_loss, bankroll_before
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        params![
            bet.placed_at,
            bet.sport,
            bet.market,
            bet.participants.team1,
            bet.participants.team2,
            bet.participants.player,
            bet.bet_type,
            bet.odds,
            bet.decimal_odds,
            bet.stake,
            bet.win_probability,
            bet.kelly_fraction,
            bet.expected_value,
            bet.edge,
            bet.payout,
            bet.profit_loss,
            bet.bankroll_before,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn find_bet(conn: &Connection, id: i64) -> Result<Option<Bet>> {
    let sql = format!("SELECT {BET_COLUMNS} FROM bets WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_bet).optional()?)
}

/// Write the terminal fields of a bet. Only matches a row that is still
/// pending.
pub(crate) fn record_settlement(conn: &Connection, bet: &Bet) -> Result<()> {
    let id = bet.id.ok_or_else(|| LedgerError::invalid("bet has no id"))?;
    let updated = conn.execute(
        "UPDATE bets SET result=?1, payout=?2, profit_loss=?3, bankroll_before=?4,
                         bankroll_after=?5, settled_at=?6
         WHERE id=?7 AND result IS NULL",
        params![
            bet.result,
            bet.payout,
            bet.profit_loss,
            bet.bankroll_before,
            bet.bankroll_after,
            bet.settled_at,
            id,
        ],
    )?;
    if updated != 1 {
        return Err(LedgerError::AuditMismatch(format!(
            "bet {id} was not pending at settlement time"
        )));
    }
    Ok(())
}

const BET_COLUMNS: &str = "id, placed_at, settled_at, sport, market, team1, team2, player_name,
    bet_type, odds, decimal_odds, stake, win_probability, kelly_fraction, expected_value,
    edge, result, payout, profit_loss, bankroll_before, bankroll_after";

fn map_bet(row: &rusqlite::Row) -> rusqlite::Result<Bet> {
    Ok(Bet {
        id: row.get(0)?,
        placed_at: row.get(1)?,
        settled_at: row.get(2)?,
        sport: row.get(3)?,
        market: row.get(4)?,
        participants: Participants {
            team1: row.get(5)?,
            team2: row.get(6)?,
            player: row.get(7)?,
        },
        bet_type: row.get(8)?,
        odds: row.get(9)?,
        decimal_odds: row.get(10)?,
        stake: row.get(11)?,
        win_probability: row.get(12)?,
        kelly_fraction: row.get(13)?,
        expected_value: row.get(14)?,
        edge: row.get(15)?,
        result: row.get(16)?,
        payout: row.get(17)?,
        profit_loss: row.get(18)?,
        bankroll_before: row.get(19)?,
        bankroll_after: row.get(20)?,
    })
}

fn map_history(row: &rusqlite::Row) -> rusqlite::Result<BankrollEntry> {
    Ok(BankrollEntry {
        id: row.get(0)?,
        recorded_at: row.get(1)?,
        amount: row.get(2)?,
        change: row.get(3)?,
        change_type: row.get(4)?,
        description: row.get(5)?,
        bet_id: row.get(6)?,
    })
}

const TABLES: &[&str] = &[
    "bets",
    "bankroll_history",
    "user_settings",
    "simulations",
    "match_data",
    "player_stats",
    "odds_history",
];

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bets (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    placed_at       TEXT    NOT NULL,
    settled_at      TEXT,
    sport           TEXT    NOT NULL CHECK (sport IN ('soccer','tennis','cricket','f1')),
    market          TEXT    NOT NULL,
    team1           TEXT,
    team2           TEXT,
    player_name     TEXT,
    bet_type        TEXT    NOT NULL,
    odds            INTEGER NOT NULL,
    decimal_odds    REAL    NOT NULL CHECK (decimal_odds > 1),
    stake           REAL    NOT NULL CHECK (stake >= 0),
    win_probability REAL    NOT NULL CHECK (win_probability BETWEEN 0 AND 1),
    kelly_fraction  REAL    NOT NULL CHECK (kelly_fraction >= 0),
    expected_value  REAL    NOT NULL,
    edge            REAL    NOT NULL,
    result          TEXT    CHECK (result IS NULL OR result IN ('win','loss','cashout','void')),
    payout          REAL    NOT NULL DEFAULT 0 CHECK (payout >= 0),
    profit_loss     REAL    NOT NULL DEFAULT 0,
    bankroll_before REAL    NOT NULL CHECK (bankroll_before >= 0),
    bankroll_after  REAL    CHECK (bankroll_after IS NULL OR bankroll_after >= 0)
);

CREATE TABLE IF NOT EXISTS bankroll_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at   TEXT    NOT NULL,
    amount        REAL    NOT NULL CHECK (amount >= 0),
    change_amount REAL    NOT NULL,
    change_type   TEXT    NOT NULL CHECK (change_type IN (
                      'bet_win','bet_loss','bet_cashout',
                      'deposit','withdrawal','manual_adjustment')),
    description   TEXT    NOT NULL DEFAULT '',
    bet_id        INTEGER UNIQUE,
    FOREIGN KEY (bet_id) REFERENCES bets(id)
);

CREATE TABLE IF NOT EXISTS user_settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS simulations (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at       TEXT    NOT NULL,
    sport            TEXT,
    initial_bankroll REAL    NOT NULL,
    final_bankroll   REAL    NOT NULL,
    num_bets         INTEGER NOT NULL,
    wins             INTEGER NOT NULL,
    win_rate         REAL    NOT NULL,
    roi              REAL    NOT NULL,
    max_drawdown     REAL    NOT NULL,
    kelly_modifier   REAL    NOT NULL,
    parameters       TEXT    NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS match_data (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sport        TEXT NOT NULL,
    team1        TEXT NOT NULL,
    team2        TEXT NOT NULL,
    date         TEXT NOT NULL,
    result       TEXT,
    score        TEXT,
    venue        TEXT,
    league       TEXT,
    last_updated TEXT NOT NULL,
    UNIQUE (sport, team1, team2, date)
);

CREATE TABLE IF NOT EXISTS player_stats (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sport        TEXT    NOT NULL,
    player_name  TEXT    NOT NULL,
    team         TEXT,
    season       TEXT    NOT NULL,
    games_played INTEGER NOT NULL DEFAULT 0,
    goals        INTEGER NOT NULL DEFAULT 0,
    assists      INTEGER NOT NULL DEFAULT 0,
    points       INTEGER NOT NULL DEFAULT 0,
    wins         INTEGER NOT NULL DEFAULT 0,
    losses       INTEGER NOT NULL DEFAULT 0,
    other_stats  TEXT,
    last_updated TEXT    NOT NULL,
    UNIQUE (sport, player_name, season)
);

CREATE TABLE IF NOT EXISTS odds_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sport       TEXT    NOT NULL,
    match_id    TEXT    NOT NULL,
    bookmaker   TEXT    NOT NULL,
    market      TEXT    NOT NULL,
    odds        INTEGER NOT NULL,
    recorded_at TEXT    NOT NULL
);

CREATE TRIGGER IF NOT EXISTS bankroll_history_no_update
BEFORE UPDATE ON bankroll_history
BEGIN
    SELECT RAISE(ABORT, 'bankroll_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS bankroll_history_no_delete
BEFORE DELETE ON bankroll_history
BEGIN
    SELECT RAISE(ABORT, 'bankroll_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS settled_bets_immutable
BEFORE UPDATE ON bets
WHEN OLD.result IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'settled bets are immutable');
END;

CREATE TRIGGER IF NOT EXISTS simulations_write_once
BEFORE UPDATE ON simulations
BEGIN
    SELECT RAISE(ABORT, 'simulations are write-once');
END;

CREATE INDEX IF NOT EXISTS idx_bets_sport ON bets(sport);
CREATE INDEX IF NOT EXISTS idx_bets_result ON bets(result);
CREATE INDEX IF NOT EXISTS idx_match_data_teams ON match_data(sport, team1, team2);
CREATE INDEX IF NOT EXISTS idx_odds_history_match ON odds_history(sport, match_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(amount: f64, change: f64, change_type: ChangeType) -> BankrollEntry {
        BankrollEntry {
            id: None,
            recorded_at: Utc::now(),
            amount,
            change,
            change_type,
            description: String::new(),
            bet_id: None,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().unwrap();
        let counts = db.table_counts().unwrap();
        assert_eq!(counts.len(), TABLES.len());
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_empty_balance_is_zero() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_balance().unwrap(), 0.0);
    }

    #[test]
    fn test_latest_history_entry_is_balance() {
        let db = Database::open_in_memory().unwrap();
        db.write(|tx| {
            insert_history(tx, &entry(100.0, 100.0, ChangeType::Deposit))?;
            insert_history(tx, &entry(80.0, -20.0, ChangeType::Withdrawal))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.get_balance().unwrap(), 80.0);
        let history = db.get_bankroll_history(10, 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].change_type, ChangeType::Withdrawal);
        assert_eq!(db.history_in_order().unwrap()[0].change_type, ChangeType::Deposit);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let res: Result<()> = db.write(|tx| {
            insert_history(tx, &entry(100.0, 100.0, ChangeType::Deposit))?;
            Err(LedgerError::invalid("abort"))
        });
        assert!(res.is_err());
        assert_eq!(db.count_history().unwrap(), 0);
    }

    #[test]
    fn test_history_is_append_only() {
        let db = Database::open_in_memory().unwrap();
        db.write(|tx| insert_history(tx, &entry(100.0, 100.0, ChangeType::Deposit)))
            .unwrap();
        let res = db.write(|tx| {
            tx.execute("UPDATE bankroll_history SET amount = 1", [])?;
            Ok(())
        });
        assert!(matches!(res, Err(LedgerError::Storage(_))));
        let res = db.write(|tx| {
            tx.execute("DELETE FROM bankroll_history", [])?;
            Ok(())
        });
        assert!(res.is_err());
        assert_eq!(db.get_balance().unwrap(), 100.0);
    }

    #[test]
    fn test_negative_amount_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        let res = db.write(|tx| insert_history(tx, &entry(-1.0, -1.0, ChangeType::Withdrawal)));
        assert!(res.is_err());
    }

    #[test]
    fn test_simulation_roundtrip_and_write_once() {
        let db = Database::open_in_memory().unwrap();
        let sim = Simulation {
            id: None,
            created_at: Utc::now(),
            sport: Some(Sport::Cricket),
            initial_bankroll: 1000.0,
            final_bankroll: 1200.0,
            num_bets: 50,
            wins: 30,
            win_rate: 60.0,
            roi: 20.0,
            max_drawdown: 12.5,
            kelly_modifier: 0.5,
            parameters: serde_json::json!({ "odds": 2.0, "seed": 7 }),
        };
        let id = db.insert_simulation(&sim).unwrap();
        let listed = db.list_simulations(5).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, Some(id));
        assert_eq!(listed[0].sport, Some(Sport::Cricket));
        assert_eq!(listed[0].parameters["seed"], 7);

        let res = db.write(|tx| {
            tx.execute("UPDATE simulations SET roi = 0", [])?;
            Ok(())
        });
        assert!(res.is_err());
    }
}
