use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::models::Sport;
use super::Database;
use crate::engine::kelly::{KellyModifier, RiskTolerance};
use crate::error::{LedgerError, Result};

pub const DEFAULT_BANKROLL: &str = "default_bankroll";
pub const DEFAULT_KELLY_FRACTION: &str = "default_kelly_fraction";
pub const RISK_TOLERANCE: &str = "risk_tolerance";
pub const PREFERRED_SPORTS: &str = "preferred_sports";
pub const THEME: &str = "theme";

pub const KNOWN_KEYS: &[&str] = &[
    DEFAULT_BANKROLL,
    DEFAULT_KELLY_FRACTION,
    RISK_TOLERANCE,
    PREFERRED_SPORTS,
    THEME,
];

/// User preferences. Only changed by explicit user action; the ledger never
/// writes here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub default_bankroll: f64,
    pub default_kelly_fraction: KellyModifier,
    pub risk_tolerance: RiskTolerance,
    pub preferred_sports: Vec<Sport>,
    pub theme: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        UserSettings {
            default_bankroll: 5000.0,
            default_kelly_fraction: KellyModifier::Half,
            risk_tolerance: RiskTolerance::Medium,
            preferred_sports: Sport::ALL.to_vec(),
            theme: "light".to_string(),
        }
    }
}

impl UserSettings {
    /// Parse and apply one stored value.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            DEFAULT_BANKROLL => {
                let amount: f64 = value.trim().parse().map_err(|_| {
                    LedgerError::invalid(format!("{key} must be a number, got {value:?}"))
                })?;
                if !amount.is_finite() || amount <= 0.0 {
                    return Err(LedgerError::invalid(format!(
                        "{key} must be positive, got {amount}"
                    )));
                }
                self.default_bankroll = amount;
            }
            DEFAULT_KELLY_FRACTION => self.default_kelly_fraction = value.parse()?,
            RISK_TOLERANCE => self.risk_tolerance = value.parse()?,
            PREFERRED_SPORTS => {
                let sports: Vec<Sport> = if value.trim_start().starts_with('[') {
                    serde_json::from_str(value)?
                } else {
                    value
                        .split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| s.parse::<Sport>())
                        .collect::<Result<_>>()?
                };
                self.preferred_sports = sports;
            }
            THEME => {
                if value.trim().is_empty() {
                    return Err(LedgerError::invalid("theme cannot be empty"));
                }
                self.theme = value.trim().to_string();
            }
            _ => return Err(LedgerError::invalid(format!("unknown setting: {key}"))),
        }
        Ok(())
    }

    /// Stored representation of every key.
    pub fn to_pairs(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![
            (DEFAULT_BANKROLL, self.default_bankroll.to_string()),
            (DEFAULT_KELLY_FRACTION, self.default_kelly_fraction.to_string()),
            (RISK_TOLERANCE, self.risk_tolerance.to_string()),
            (PREFERRED_SPORTS, serde_json::to_string(&self.preferred_sports)?),
            (THEME, self.theme.clone()),
        ])
    }
}

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM user_settings WHERE key = ?1",
                    params![key],
                    |r| r.get(0),
                )
                .optional()?)
        })
    }

    /// Set one known key. The value is validated and stored normalised.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(LedgerError::invalid(format!("unknown setting: {key}")));
        }
        let mut parsed = UserSettings::default();
        parsed.apply(key, value)?;
        let stored = parsed
            .to_pairs()?
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| LedgerError::invalid(format!("unknown setting: {key}")))?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO user_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, stored, Utc::now()],
            )?;
            Ok(())
        })?;
        info!("Setting {} = {}", key, stored);
        Ok(())
    }

    pub fn all_settings(&self) -> Result<Vec<(String, String)>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM user_settings ORDER BY key")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Stored settings layered over `defaults`. Unreadable values keep the
    /// default and are logged.
    pub fn load_settings(&self, defaults: &UserSettings) -> Result<UserSettings> {
        let mut settings = defaults.clone();
        for (key, value) in self.all_settings()? {
            if let Err(e) = settings.apply(&key, &value) {
                warn!("Ignoring stored setting {}={:?}: {}", key, value, e);
            }
        }
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        let pairs = settings.to_pairs()?;
        let now = Utc::now();
        self.write(|tx| {
            for (key, value) in &pairs {
                tx.execute(
                    "INSERT INTO user_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                    updated_at = excluded.updated_at",
                    params![key, value, now],
                )?;
            }
            Ok(())
        })
    }

    /// Insert any missing keys from `defaults`; existing values are kept.
    /// Returns how many keys were added.
    pub fn seed_settings(&self, defaults: &UserSettings) -> Result<usize> {
        let pairs = defaults.to_pairs()?;
        let now = Utc::now();
        self.write(|tx| {
            let mut added = 0;
            for (key, value) in &pairs {
                added += tx.execute(
                    "INSERT OR IGNORE INTO user_settings (key, value, updated_at)
                     VALUES (?1, ?2, ?3)",
                    params![key, value, now],
                )?;
            }
            Ok(added)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_then_load_defaults() {
        let db = Database::open_in_memory().unwrap();
        let defaults = UserSettings::default();
        assert_eq!(db.seed_settings(&defaults).unwrap(), KNOWN_KEYS.len());
        assert_eq!(db.seed_settings(&defaults).unwrap(), 0);

        let loaded = db.load_settings(&defaults).unwrap();
        assert_eq!(loaded, defaults);
        assert_eq!(
            db.get_setting(DEFAULT_KELLY_FRACTION).unwrap().as_deref(),
            Some("Half Kelly")
        );
    }

    #[test]
    fn test_seed_keeps_user_values() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting(RISK_TOLERANCE, "High").unwrap();
        db.seed_settings(&UserSettings::default()).unwrap();
        let loaded = db.load_settings(&UserSettings::default()).unwrap();
        assert_eq!(loaded.risk_tolerance, RiskTolerance::High);
        assert_eq!(db.get_setting(RISK_TOLERANCE).unwrap().as_deref(), Some("high"));
    }

    #[test]
    fn test_set_setting_validates() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.set_setting("colour", "blue").is_err());
        assert!(db.set_setting(DEFAULT_BANKROLL, "-10").is_err());
        assert!(db.set_setting(DEFAULT_KELLY_FRACTION, "Double Kelly").is_err());
        assert!(db.set_setting(PREFERRED_SPORTS, "soccer,darts").is_err());
        assert!(db.all_settings().unwrap().is_empty());

        db.set_setting(PREFERRED_SPORTS, "tennis, f1").unwrap();
        db.set_setting(DEFAULT_KELLY_FRACTION, "quarter").unwrap();
        let loaded = db.load_settings(&UserSettings::default()).unwrap();
        assert_eq!(loaded.preferred_sports, vec![Sport::Tennis, Sport::F1]);
        assert_eq!(loaded.default_kelly_fraction, KellyModifier::Quarter);
        assert_eq!(
            db.get_setting(PREFERRED_SPORTS).unwrap().as_deref(),
            Some(r#"["tennis","f1"]"#)
        );
    }

    #[test]
    fn test_save_settings_overwrites() {
        let db = Database::open_in_memory().unwrap();
        db.seed_settings(&UserSettings::default()).unwrap();
        let custom = UserSettings {
            default_bankroll: 1200.0,
            default_kelly_fraction: KellyModifier::Full,
            risk_tolerance: RiskTolerance::Low,
            preferred_sports: vec![Sport::Cricket],
            theme: "dark".into(),
        };
        db.save_settings(&custom).unwrap();
        assert_eq!(db.load_settings(&UserSettings::default()).unwrap(), custom);
    }
}
