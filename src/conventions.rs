//! Market conventions: day counts, moneyness and the naive forward.
//!
//! Year fractions are measured from an as-of timestamp to the calendar date
//! of expiry, counting whole days. Actual/365 is the convention used by every
//! downstream computation; Actual/360 is reported alongside it.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Day-count convention for year fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayCount {
    /// Actual days / 360.
    Actual360,
    /// Actual days / 365. Used for all pricing and calibration.
    Actual365,
}

impl DayCount {
    fn denominator(self) -> f64 {
        match self {
            DayCount::Actual360 => 360.0,
            DayCount::Actual365 => 365.0,
        }
    }

    /// Year fraction from `as_of` to `expiry` under this convention.
    ///
    /// Counts whole days between the as-of timestamp and midnight of the
    /// expiry date; negative when the expiry lies in the past.
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use svisurf::conventions::DayCount;
    ///
    /// let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    /// let expiry = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    /// assert!((DayCount::Actual365.year_fraction(as_of, expiry) - 366.0 / 365.0).abs() < 1e-15);
    /// ```
    pub fn year_fraction(self, as_of: NaiveDateTime, expiry: NaiveDate) -> f64 {
        days_to_expiry(as_of, expiry) as f64 / self.denominator()
    }
}

/// Seconds from `as_of` to midnight of `expiry`; negative once it has passed.
pub fn seconds_to_expiry(as_of: NaiveDateTime, expiry: NaiveDate) -> i64 {
    (expiry.and_time(chrono::NaiveTime::MIN) - as_of).num_seconds()
}

/// Whole days from `as_of` to midnight of `expiry` (floor semantics).
pub fn days_to_expiry(as_of: NaiveDateTime, expiry: NaiveDate) -> i64 {
    seconds_to_expiry(as_of, expiry).div_euclid(86_400)
}

/// Both year fractions the surface reports for an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearFractions {
    /// Actual/360 year fraction.
    pub act360: f64,
    /// Actual/365 year fraction.
    pub act365: f64,
}

impl YearFractions {
    /// Compute both conventions between `as_of` and `expiry`.
    pub fn between(as_of: NaiveDateTime, expiry: NaiveDate) -> Self {
        Self {
            act360: DayCount::Actual360.year_fraction(as_of, expiry),
            act365: DayCount::Actual365.year_fraction(as_of, expiry),
        }
    }
}

/// Convert a strike to log-moneyness: x = ln(K / F).
pub fn log_moneyness(strike: f64, forward: f64) -> f64 {
    (strike / forward).ln()
}

/// Convert a strike to simple moneyness: K / F.
pub fn moneyness(strike: f64, forward: f64) -> f64 {
    strike / forward
}

/// Naive forward `F₀ = S · DF · exp(−q·T)`.
///
/// `discount_factor` follows the quote-table convention: it converts
/// present-value quantities into forward terms by multiplication.
pub fn naive_forward(spot: f64, discount_factor: f64, dividend_yield: f64, expiry: f64) -> f64 {
    spot * discount_factor * (-dividend_yield * expiry).exp()
}
