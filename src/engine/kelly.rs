//! Kelly Criterion betting size calculator.
//!
//! The Kelly formula sizes a bet to maximise the expected logarithm of wealth,
//! which balances risk and reward optimally over the long run.
//!
//! Standard formula:
//!   f* = (b·p − q) / b
//! where
//!   b  = net odds received on the bet (decimal odds − 1)
//!   p  = estimated probability of winning
//!   q  = 1 − p  (probability of losing)
//!
//! A *fractional* Kelly modifier (0 < modifier ≤ 1) is applied on top to
//! reduce variance at the cost of slightly lower expected growth.
//!
//! Everything in this module is pure: no shared state, safe to call from any
//! thread.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, Result};

// ── Odds ──────────────────────────────────────────────────────────────────────

/// Convert American odds (+150, -110) to a decimal payout multiple.
pub fn american_to_decimal(american: i32) -> Result<f64> {
    check_american_odds(american)?;
    let american = american as f64;
    Ok(if american > 0.0 {
        american / 100.0 + 1.0
    } else {
        100.0 / american.abs() + 1.0
    })
}

/// Convert decimal odds to the nearest American odds.
pub fn decimal_to_american(decimal: f64) -> Result<i32> {
    check_decimal_odds(decimal)?;
    let american = if decimal >= 2.0 {
        (decimal - 1.0) * 100.0
    } else {
        -100.0 / (decimal - 1.0)
    };
    let american = american.round();
    if american.abs() > MAX_AMERICAN as f64 {
        return Err(LedgerError::invalid(format!(
            "decimal odds {decimal} are outside the American odds range"
        )));
    }
    Ok(american as i32)
}

/// Largest magnitude an American price may have.
pub const MAX_AMERICAN: i32 = i32::MAX;

/// |american| must lie within [100, MAX_AMERICAN].
pub fn check_american_odds(american: i32) -> Result<()> {
    let magnitude = american.unsigned_abs();
    if magnitude < 100 || magnitude > MAX_AMERICAN.unsigned_abs() {
        return Err(LedgerError::invalid(format!(
            "American odds must be <= -100 or >= +100, got {american}"
        )));
    }
    Ok(())
}

/// Probability implied by the price, ignoring bookmaker margin.
pub fn implied_probability(decimal_odds: f64) -> Result<f64> {
    check_decimal_odds(decimal_odds)?;
    Ok(1.0 / decimal_odds)
}

fn check_decimal_odds(decimal: f64) -> Result<()> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return Err(LedgerError::invalid(format!(
            "decimal odds must be greater than 1.0, got {decimal}"
        )));
    }
    Ok(())
}

/// Odds as supplied by the caller, in either convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Odds {
    Decimal(f64),
    American(i32),
}

impl Odds {
    pub fn to_decimal(self) -> Result<f64> {
        match self {
            Odds::Decimal(d) => {
                check_decimal_odds(d)?;
                Ok(d)
            }
            Odds::American(a) => american_to_decimal(a),
        }
    }

    pub fn to_american(self) -> Result<i32> {
        match self {
            Odds::Decimal(d) => decimal_to_american(d),
            Odds::American(a) => {
                american_to_decimal(a)?;
                Ok(a)
            }
        }
    }
}

impl FromStr for Odds {
    type Err = LedgerError;

    /// "+150" / "-110" read as American, "1.91" / "2" as decimal.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if !s.contains('.') {
            if let Ok(v) = s.parse::<i32>() {
                if v.unsigned_abs() >= 100 {
                    return Ok(Odds::American(v));
                }
            }
        }
        s.parse::<f64>()
            .map(Odds::Decimal)
            .map_err(|_| LedgerError::invalid(format!("unparseable odds: {s}")))
    }
}

// ── Kelly modifier ────────────────────────────────────────────────────────────

/// Fraction of full Kelly to stake, stored in settings by its label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum KellyModifier {
    Quarter,
    Half,
    Full,
    Custom(f64),
}

impl KellyModifier {
    pub fn value(&self) -> f64 {
        match self {
            KellyModifier::Quarter => 0.25,
            KellyModifier::Half => 0.5,
            KellyModifier::Full => 1.0,
            KellyModifier::Custom(v) => *v,
        }
    }

    pub fn custom(value: f64) -> Result<Self> {
        check_modifier(value)?;
        Ok(KellyModifier::Custom(value))
    }
}

impl fmt::Display for KellyModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KellyModifier::Quarter => f.write_str("Quarter Kelly"),
            KellyModifier::Half => f.write_str("Half Kelly"),
            KellyModifier::Full => f.write_str("Full Kelly"),
            KellyModifier::Custom(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for KellyModifier {
    type Err = LedgerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quarter kelly" | "quarter" => Ok(KellyModifier::Quarter),
            "half kelly" | "half" => Ok(KellyModifier::Half),
            "full kelly" | "full" => Ok(KellyModifier::Full),
            other => other
                .parse::<f64>()
                .map_err(|_| LedgerError::invalid(format!("unknown Kelly modifier: {s}")))
                .and_then(KellyModifier::custom),
        }
    }
}

impl From<KellyModifier> for String {
    fn from(m: KellyModifier) -> Self {
        m.to_string()
    }
}

impl TryFrom<String> for KellyModifier {
    type Error = LedgerError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

fn check_modifier(value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(LedgerError::invalid(format!(
            "Kelly modifier must be within (0, 1], got {value}"
        )));
    }
    Ok(())
}

/// User appetite for variance; maps onto a Kelly multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl RiskTolerance {
    pub fn multiplier(&self) -> f64 {
        match self {
            RiskTolerance::Low => 0.25,
            RiskTolerance::Medium => 0.5,
            RiskTolerance::High => 0.75,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTolerance::Low => "low",
            RiskTolerance::Medium => "medium",
            RiskTolerance::High => "high",
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTolerance {
    type Err = LedgerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskTolerance::Low),
            "medium" => Ok(RiskTolerance::Medium),
            "high" => Ok(RiskTolerance::High),
            _ => Err(LedgerError::invalid(format!("unknown risk tolerance: {s}"))),
        }
    }
}

// ── Recommendation ────────────────────────────────────────────────────────────

/// Output of [`recommend`]. `fraction` is what should be staked as a share
/// of bankroll after the modifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyRecommendation {
    pub decimal_odds: f64,
    pub win_probability: f64,
    /// Break-even probability priced in by the bookmaker
    pub implied_probability: f64,
    pub kelly_modifier: f64,
    /// Unmodified f*, may be negative
    pub full_kelly: f64,
    pub fraction: f64,
    /// b·p − q
    pub edge: f64,
    /// Expected profit per unit staked
    pub expected_value: f64,
}

impl KellyRecommendation {
    pub fn has_edge(&self) -> bool {
        self.edge > 0.0
    }
}

/// Recommend a stake fraction.
///
/// # Arguments
/// * `decimal_odds`    – Payout multiple including stake (> 1.0).
/// * `win_probability` – Estimated probability that the bet wins (0.0–1.0).
/// * `kelly_modifier`  – Fractional Kelly multiplier (0.0 exclusive – 1.0).
///
/// Negative f* means no edge; the fraction is clamped to `0.0`, never short.
pub fn recommend(
    decimal_odds: f64,
    win_probability: f64,
    kelly_modifier: f64,
) -> Result<KellyRecommendation> {
    check_decimal_odds(decimal_odds)?;
    if !(0.0..=1.0).contains(&win_probability) {
        return Err(LedgerError::invalid(format!(
            "win probability must be within [0, 1], got {win_probability}"
        )));
    }
    check_modifier(kelly_modifier)?;

    let b = decimal_odds - 1.0;
    let p = win_probability;
    let q = 1.0 - p;

    let edge = b * p - q;
    let full_kelly = edge / b;
    let fraction = if edge <= 0.0 {
        0.0 // no edge
    } else {
        full_kelly * kelly_modifier
    };

    Ok(KellyRecommendation {
        decimal_odds,
        win_probability,
        implied_probability: implied_probability(decimal_odds)?,
        kelly_modifier,
        full_kelly,
        fraction,
        edge,
        expected_value: edge,
    })
}

/// Same as [`recommend`] for odds in either convention.
pub fn recommend_odds(
    odds: Odds,
    win_probability: f64,
    kelly_modifier: f64,
) -> Result<KellyRecommendation> {
    recommend(odds.to_decimal()?, win_probability, kelly_modifier)
}

// ── Stake sizing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Stake share of bankroll (fraction, not percent) below which a bet is low risk.
pub const LOW_RISK_THRESHOLD: f64 = 0.05;
/// Upper bound for medium risk; anything at or above is high risk.
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.15;

/// Classify a stake by the percentage of bankroll it represents.
pub fn assess_risk(stake_percentage: f64) -> RiskLevel {
    if stake_percentage < LOW_RISK_THRESHOLD * 100.0 {
        RiskLevel::Low
    } else if stake_percentage < MEDIUM_RISK_THRESHOLD * 100.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Currency amounts derived from a recommendation and a bankroll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeAdvice {
    pub recommendation: KellyRecommendation,
    pub bankroll: f64,
    pub available_bankroll: f64,
    pub stake: f64,
    pub stake_percentage: f64,
    /// Expected profit of `stake`
    pub expected_value: f64,
    pub risk: RiskLevel,
}

/// Turn a fraction into a stake, capped to `max_bankroll_percent` (0–1] of
/// the bankroll.
pub fn recommended_stake(
    rec: &KellyRecommendation,
    bankroll: f64,
    max_bankroll_percent: f64,
) -> Result<StakeAdvice> {
    if !bankroll.is_finite() || bankroll < 0.0 {
        return Err(LedgerError::invalid(format!(
            "bankroll must be non-negative, got {bankroll}"
        )));
    }
    if !(max_bankroll_percent > 0.0 && max_bankroll_percent <= 1.0) {
        return Err(LedgerError::invalid(format!(
            "max bankroll percent must be within (0, 1], got {max_bankroll_percent}"
        )));
    }
    let available_bankroll = bankroll * max_bankroll_percent;
    let stake = available_bankroll * rec.fraction;
    let stake_percentage = if bankroll > 0.0 {
        stake / bankroll * 100.0
    } else {
        0.0
    };
    Ok(StakeAdvice {
        recommendation: *rec,
        bankroll,
        available_bankroll,
        stake,
        stake_percentage,
        expected_value: stake * rec.expected_value,
        risk: assess_risk(stake_percentage),
    })
}

/// A candidate bet to compare against others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub odds: Odds,
    pub win_probability: f64,
}

/// Size every scenario against the same bankroll and order them by expected
/// profit, best first.
pub fn rank_scenarios(
    scenarios: &[Scenario],
    bankroll: f64,
    kelly_modifier: f64,
) -> Result<Vec<(String, StakeAdvice)>> {
    let mut ranked = scenarios
        .iter()
        .map(|s| -> Result<(String, StakeAdvice)> {
            let rec = recommend_odds(s.odds, s.win_probability, kelly_modifier)?;
            Ok((s.name.clone(), recommended_stake(&rec, bankroll, 1.0)?))
        })
        .collect::<Result<Vec<_>>>()?;
    ranked.sort_by(|a, b| b.1.expected_value.total_cmp(&a.1.expected_value));
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kelly_positive_edge() {
        // b = 1.0, p = 0.6, q = 0.4 → f = (1*0.6 - 0.4)/1 = 0.2
        let rec = recommend(2.0, 0.6, 1.0).unwrap();
        assert_relative_eq!(rec.fraction, 0.2, epsilon = 1e-9);
        assert_relative_eq!(rec.edge, 0.2, epsilon = 1e-9);
        assert_relative_eq!(rec.expected_value, 0.2, epsilon = 1e-9);
        assert!(rec.has_edge());
    }

    #[test]
    fn test_kelly_fractional_multiplier() {
        let rec = recommend(2.0, 0.6, 0.5).unwrap();
        assert_relative_eq!(rec.fraction, 0.1, epsilon = 1e-9);
        assert_relative_eq!(rec.full_kelly, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_no_edge() {
        let rec = recommend(2.0, 0.5, 1.0).unwrap();
        assert_relative_eq!(rec.fraction, 0.0, epsilon = 1e-12);
        assert!(!rec.has_edge());
    }

    #[test]
    fn test_kelly_negative_edge_clamps_to_zero() {
        let rec = recommend(2.0, 0.3, 1.0).unwrap();
        assert!(rec.full_kelly < 0.0);
        assert_eq!(rec.fraction, 0.0);
    }

    #[test]
    fn test_kelly_never_negative_over_grid() {
        for odds in [1.01, 1.25, 1.5, 1.91, 2.0, 3.5, 10.0, 101.0] {
            for i in 0..=20 {
                let p = i as f64 / 20.0;
                for modifier in [0.25, 0.5, 1.0] {
                    let rec = recommend(odds, p, modifier).unwrap();
                    assert!(rec.fraction >= 0.0, "odds={odds} p={p}");
                    if rec.edge <= 0.0 {
                        assert_eq!(rec.fraction, 0.0, "odds={odds} p={p}");
                    }
                    assert!(rec.fraction <= 1.0);
                }
            }
        }
    }

    #[test]
    fn test_kelly_rejects_bad_inputs() {
        assert!(matches!(recommend(1.0, 0.5, 1.0), Err(LedgerError::InvalidInput(_))));
        assert!(recommend(0.5, 0.5, 1.0).is_err());
        assert!(recommend(f64::NAN, 0.5, 1.0).is_err());
        assert!(recommend(2.0, -0.1, 1.0).is_err());
        assert!(recommend(2.0, 1.1, 1.0).is_err());
        assert!(recommend(2.0, 0.5, 0.0).is_err());
        assert!(recommend(2.0, 0.5, -0.5).is_err());
        assert!(recommend(2.0, 0.5, 1.5).is_err());
    }

    #[test]
    fn test_american_conversions() {
        assert_relative_eq!(american_to_decimal(150).unwrap(), 2.5, epsilon = 1e-9);
        assert_relative_eq!(american_to_decimal(-200).unwrap(), 1.5, epsilon = 1e-9);
        assert_relative_eq!(american_to_decimal(100).unwrap(), 2.0, epsilon = 1e-9);
        assert!(american_to_decimal(0).is_err());
        assert!(american_to_decimal(-99).is_err());

        assert_eq!(decimal_to_american(2.0).unwrap(), 100);
        assert_eq!(decimal_to_american(2.5).unwrap(), 150);
        assert_eq!(decimal_to_american(1.5).unwrap(), -200);
        assert_eq!(decimal_to_american(1.91).unwrap(), -110);
        assert!(decimal_to_american(1.0).is_err());
    }

    #[test]
    fn test_american_range_limits() {
        // Prices whose American form does not fit an i32 are rejected, not saturated.
        assert!(decimal_to_american(1.000_000_01).is_err());
        assert!(decimal_to_american(1.0e8).is_err());
        assert!(Odds::Decimal(1.0e8).to_american().is_err());
        assert_eq!(decimal_to_american(1.01).unwrap(), -10_000);

        assert!(american_to_decimal(i32::MIN).is_err());
        assert!(american_to_decimal(MAX_AMERICAN).is_ok());
        let parsed = "-2147483648".parse::<Odds>().unwrap();
        assert_eq!(parsed, Odds::American(i32::MIN));
        assert!(parsed.to_decimal().is_err());
    }

    #[test]
    fn test_implied_probability() {
        assert_relative_eq!(implied_probability(2.0).unwrap(), 0.5, epsilon = 1e-9);
        assert_relative_eq!(implied_probability(4.0).unwrap(), 0.25, epsilon = 1e-9);
        assert!(implied_probability(0.9).is_err());
    }

    #[test]
    fn test_odds_parsing() {
        assert_eq!("+150".parse::<Odds>().unwrap(), Odds::American(150));
        assert_eq!("-110".parse::<Odds>().unwrap(), Odds::American(-110));
        assert_eq!("1.91".parse::<Odds>().unwrap(), Odds::Decimal(1.91));
        assert_eq!("2".parse::<Odds>().unwrap(), Odds::Decimal(2.0));
        assert!("evens".parse::<Odds>().is_err());
        assert_eq!(Odds::Decimal(2.0).to_american().unwrap(), 100);
        assert!(Odds::Decimal(1.0).to_decimal().is_err());
    }

    #[test]
    fn test_modifier_labels() {
        assert_eq!("Half Kelly".parse::<KellyModifier>().unwrap(), KellyModifier::Half);
        assert_eq!("quarter kelly".parse::<KellyModifier>().unwrap().value(), 0.25);
        assert_eq!("Full Kelly".parse::<KellyModifier>().unwrap().value(), 1.0);
        assert_eq!("0.4".parse::<KellyModifier>().unwrap().value(), 0.4);
        assert!("Double Kelly".parse::<KellyModifier>().is_err());
        assert!("1.5".parse::<KellyModifier>().is_err());
        assert_eq!(KellyModifier::Half.to_string(), "Half Kelly");

        let json = serde_json::to_string(&KellyModifier::Quarter).unwrap();
        assert_eq!(json, "\"Quarter Kelly\"");
        let back: KellyModifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KellyModifier::Quarter);
    }

    #[test]
    fn test_risk_tolerance_multipliers() {
        assert_eq!("low".parse::<RiskTolerance>().unwrap().multiplier(), 0.25);
        assert_eq!(RiskTolerance::Medium.multiplier(), 0.5);
        assert_eq!("HIGH".parse::<RiskTolerance>().unwrap().multiplier(), 0.75);
        assert!("reckless".parse::<RiskTolerance>().is_err());
    }

    #[test]
    fn test_recommended_stake_and_risk() {
        let rec = recommend(2.0, 0.6, 0.5).unwrap();
        let advice = recommended_stake(&rec, 1000.0, 1.0).unwrap();
        assert_relative_eq!(advice.stake, 100.0, epsilon = 1e-9);
        assert_relative_eq!(advice.stake_percentage, 10.0, epsilon = 1e-9);
        assert_relative_eq!(advice.expected_value, 20.0, epsilon = 1e-9);
        assert_eq!(advice.risk, RiskLevel::Medium);

        let capped = recommended_stake(&rec, 1000.0, 0.25).unwrap();
        assert_relative_eq!(capped.stake, 25.0, epsilon = 1e-9);
        assert_eq!(capped.risk, RiskLevel::Low);

        assert!(recommended_stake(&rec, -1.0, 1.0).is_err());
        assert!(recommended_stake(&rec, 1000.0, 0.0).is_err());
    }

    #[test]
    fn test_assess_risk_boundaries() {
        assert_eq!(assess_risk(4.99), RiskLevel::Low);
        assert_eq!(assess_risk(5.0), RiskLevel::Medium);
        assert_eq!(assess_risk(14.99), RiskLevel::Medium);
        assert_eq!(assess_risk(15.0), RiskLevel::High);
    }

    #[test]
    fn test_rank_scenarios_by_expected_value() {
        let scenarios = vec![
            Scenario {
                name: "no edge".into(),
                odds: Odds::Decimal(2.0),
                win_probability: 0.5,
            },
            Scenario {
                name: "strong".into(),
                odds: Odds::American(150),
                win_probability: 0.55,
            },
            Scenario {
                name: "mild".into(),
                odds: Odds::Decimal(2.0),
                win_probability: 0.55,
            },
        ];
        let ranked = rank_scenarios(&scenarios, 1000.0, 1.0).unwrap();
        let names: Vec<_> = ranked.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["strong", "mild", "no edge"]);
        assert_eq!(ranked[2].1.stake, 0.0);
    }
}
