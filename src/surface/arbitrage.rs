//! Static-arbitrage checks across the calibrated expiries of one underlying.
//!
//! Three independent checks:
//! - calendar: reconstructed option values must not fall with expiry,
//!   within the quoted bid-ask tolerance
//! - butterfly: closed-form sufficient conditions on raw SVI parameters
//! - wing: Lee's moment bound `b(1 + ρ) < 2`
//!
//! The validator never fails; findings are data. The Gatheral–Jacquier
//! `g`-function profile is a diagnostic and does not feed the report.
//!
//! # References
//! - Gatheral, J. & Jacquier, A. "Arbitrage-free SVI Volatility Surfaces" (2014)
//! - Ferhati, T. "Robust Calibration for SVI Model Arbitrage Free" (2020)
//! - Lee, R. "The Moment Formula for Implied Volatility at Extreme Strikes" (2004)

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calibration::linspace;
use crate::config::GFunctionConfig;
use crate::reconstruct::ReconstructedPrice;
use crate::smile::SviParameters;
use crate::types::OptionType;

/// A later expiry whose value does not exceed the earlier expiry's floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarViolation {
    pub strike: f64,
    pub option_type: OptionType,
    /// Expiry that breaks monotonicity.
    pub expiry: NaiveDate,
    /// Expiry that set the floor.
    pub previous_expiry: NaiveDate,
    /// Reconstructed value plus half the quoted spread.
    pub value_ask_terms: f64,
    /// Previous value minus half its quoted spread.
    pub floor: f64,
}

/// Static-arbitrage findings for one underlying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageReport {
    pub calendar: Vec<CalendarViolation>,
    /// Expiries failing the closed-form butterfly conditions.
    pub butterfly: Vec<NaiveDate>,
    /// Expiries failing the wing-slope bound.
    pub wing: Vec<NaiveDate>,
}

impl ArbitrageReport {
    /// `true` when no check flagged anything.
    pub fn is_free(&self) -> bool {
        self.calendar.is_empty() && self.butterfly.is_empty() && self.wing.is_empty()
    }

    /// One line per category.
    pub fn summary(&self) -> String {
        let dates = |v: &[NaiveDate]| {
            if v.is_empty() {
                "none".to_string()
            } else {
                v.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            }
        };
        let mut out = String::new();
        let _ = writeln!(out, "calendar: {} violation(s)", self.calendar.len());
        for v in &self.calendar {
            let _ = writeln!(
                out,
                "  {} {} {} after {}: {:.6} <= {:.6}",
                v.option_type, v.strike, v.expiry, v.previous_expiry, v.value_ask_terms, v.floor
            );
        }
        let _ = writeln!(out, "butterfly: {}", dates(&self.butterfly));
        let _ = write!(out, "wing: {}", dates(&self.wing));
        out
    }
}

/// Closed-form butterfly conditions; `true` when any fails.
///
/// Non-finite intermediate values count as a failure.
pub fn butterfly_violated(p: &SviParameters) -> bool {
    let (a, b, rho, m) = (p.a(), p.b(), p.rho(), p.m());
    let side = |r: f64| {
        let slope2 = b * b * r * r;
        let level = a - m * b * r;
        let ratio = level * (4.0 - level) / slope2;
        ratio > 1.0 && slope2 > 0.0 && slope2 < 4.0
    };
    !(side(rho + 1.0) && side(rho - 1.0))
}

/// Lee's bound on the right wing; `true` when `b(1 + ρ) ≥ 2`.
pub fn wing_violated(p: &SviParameters) -> bool {
    !(p.b() * (1.0 + p.rho()) < 2.0)
}

/// Calendar check over reconstructed prices of several expiries.
///
/// Per strike and option type, in increasing expiry: the floor starts at
/// zero; an expiry is flagged when `price + half_spread ≤ floor`; the floor
/// then becomes `price − half_spread`.
pub fn calendar_violations(prices: &[ReconstructedPrice]) -> Vec<CalendarViolation> {
    let mut series: BTreeMap<(u64, OptionType), Vec<&ReconstructedPrice>> = BTreeMap::new();
    for p in prices {
        series
            .entry((strike_key(p.strike), p.option_type))
            .or_default()
            .push(p);
    }
    let mut out = Vec::new();
    for (_, mut rows) in series {
        rows.sort_by_key(|p| p.expiry);
        let mut floor = 0.0;
        let mut previous: Option<NaiveDate> = None;
        for p in rows {
            let ask_terms = p.price + p.half_spread();
            if let Some(prev) = previous
                && ask_terms <= floor
            {
                out.push(CalendarViolation {
                    strike: p.strike,
                    option_type: p.option_type,
                    expiry: p.expiry,
                    previous_expiry: prev,
                    value_ask_terms: ask_terms,
                    floor,
                });
            }
            floor = p.price - p.half_spread();
            previous = Some(p.expiry);
        }
    }
    out.sort_by(|a, b| a.expiry.cmp(&b.expiry).then(a.strike.total_cmp(&b.strike)));
    out
}

/// Order-preserving key for grouping equal strikes.
fn strike_key(strike: f64) -> u64 {
    let bits = strike.to_bits();
    if strike.is_sign_negative() { !bits } else { bits | (1 << 63) }
}

/// `g(x)` on a log-moneyness grid from finite differences of `w`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GFunctionProfile {
    pub log_moneyness: Vec<f64>,
    pub g: Vec<f64>,
}

impl GFunctionProfile {
    /// Smallest `g` on the grid, `None` for an empty grid.
    pub fn min(&self) -> Option<f64> {
        self.g.iter().copied().reduce(f64::min)
    }

    /// Grid points where `g < 0`.
    pub fn negative_regions(&self) -> Vec<f64> {
        self.log_moneyness
            .iter()
            .zip(&self.g)
            .filter(|(_, g)| **g < 0.0)
            .map(|(x, _)| *x)
            .collect()
    }
}

/// Runs the static-arbitrage checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArbitrageValidator {
    g_function: GFunctionConfig,
}

impl ArbitrageValidator {
    pub fn new(g_function: GFunctionConfig) -> Self {
        Self { g_function }
    }

    /// Run all three checks for one underlying. Call after every expiry of
    /// the underlying has been calibrated and re-priced.
    pub fn validate(
        &self,
        slices: &[(NaiveDate, SviParameters)],
        prices: &[ReconstructedPrice],
    ) -> ArbitrageReport {
        let mut butterfly = Vec::new();
        let mut wing = Vec::new();
        for (expiry, p) in slices {
            if butterfly_violated(p) {
                butterfly.push(*expiry);
            }
            if wing_violated(p) {
                wing.push(*expiry);
            }
        }
        butterfly.sort();
        wing.sort();
        let report = ArbitrageReport {
            calendar: calendar_violations(prices),
            butterfly,
            wing,
        };

        #[cfg(feature = "logging")]
        tracing::debug!(
            expiries = slices.len(),
            calendar = report.calendar.len(),
            butterfly = report.butterfly.len(),
            wing = report.wing.len(),
            "arbitrage checks complete"
        );

        report
    }

    /// `g`-function of `params` by centred finite differences on
    /// `x = ln(k)` for `k` evenly spaced over the configured strike-ratio
    /// range. End points copy their neighbours.
    pub fn g_function(&self, params: &SviParameters) -> GFunctionProfile {
        let (lo, hi) = self.g_function.strike_ratio_range;
        let x: Vec<f64> = linspace(lo, hi, self.g_function.points).map(f64::ln).collect();
        let w: Vec<f64> = x.iter().map(|&x| params.total_variance(x)).collect();
        let n = x.len();
        let mut g = vec![f64::NAN; n];
        if n < 3 {
            return GFunctionProfile { log_moneyness: x, g };
        }
        for i in 1..n - 1 {
            let h1 = x[i] - x[i - 1];
            let h2 = x[i + 1] - x[i];
            let den = h1 * h2 * (h1 + h2);
            let w1 = (h1 * h1 * w[i + 1] - h2 * h2 * w[i - 1] + (h2 * h2 - h1 * h1) * w[i]) / den;
            let w2 = 2.0 * (h1 * w[i + 1] - (h1 + h2) * w[i] + h2 * w[i - 1]) / den;
            g[i] = g_value(x[i], w[i], w1, w2);
        }
        g[0] = g[1];
        g[n - 1] = g[n - 2];
        GFunctionProfile { log_moneyness: x, g }
    }
}

/// `g = (1 − x w'/(2w))² − (w'²/4)(1/w + 1/4) + w''/2`.
fn g_value(x: f64, w: f64, w1: f64, w2: f64) -> f64 {
    let t = 1.0 - x * w1 / (2.0 * w);
    t * t - 0.25 * w1 * w1 * (1.0 / w + 0.25) + 0.5 * w2
}
