//! Per-underlying SVI surfaces.
//!
//! A [`Surface`] holds every successfully calibrated expiry of one
//! underlying as a [`SurfaceSlice`], the expiries that were skipped as
//! [`Omission`]s, and the static-arbitrage report computed across the
//! slices. [`SurfaceBuilder`] runs the whole pipeline over a quote table
//! and returns a [`BatchOutcome`].
//!
//! Slices are calibrated independently; only the arbitrage validator looks
//! across expiries.

pub mod arbitrage;
pub mod builder;

pub use arbitrage::{ArbitrageReport, ArbitrageValidator, CalendarViolation, GFunctionProfile};
pub use builder::SurfaceBuilder;

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::calibration::SviFit;
use crate::conventions::YearFractions;
use crate::error::{self, VolSurfError};
use crate::forward::ForwardEstimate;
use crate::market::RejectedRow;
use crate::reconstruct::ReconstructedPrice;
use crate::smile::{Smile, SmileSection, SviParameters};
use crate::types::{Variance, Vol};

/// One calibrated expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSlice {
    pub expiry: NaiveDate,
    pub year_fractions: YearFractions,
    pub forward: ForwardEstimate,
    pub discount_factor: f64,
    pub smile: Smile,
    pub fit: SviFit,
    pub prices: Vec<ReconstructedPrice>,
}

impl SurfaceSlice {
    pub fn params(&self) -> &SviParameters {
        &self.fit.params
    }

    /// Actual/365 year fraction.
    pub fn time_to_expiry(&self) -> f64 {
        self.year_fractions.act365
    }
}

/// Why an expiry is missing from a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OmissionReason {
    /// The expiry is not after the as-of timestamp.
    Expired { days: i64 },
    /// The expiry is still ahead but less than one whole day away, so its
    /// day-count year fraction is zero.
    WithinOneDay { seconds: i64 },
    /// No usable data: empty smile, missing discount factor, bad rows.
    Data { message: String },
    /// Every calibration attempt failed.
    CalibrationFailure {
        message: String,
        attempts: usize,
        best_objective: Option<f64>,
    },
    /// Anything else raised while processing the expiry.
    Other { message: String },
}

impl From<VolSurfError> for OmissionReason {
    fn from(err: VolSurfError) -> Self {
        match err {
            VolSurfError::DataError { message, .. } => Self::Data { message },
            VolSurfError::CalibrationFailure {
                message,
                attempts,
                best_objective,
                ..
            } => Self::CalibrationFailure {
                message,
                attempts,
                best_objective,
            },
            other => Self::Other {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for OmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired { days } => write!(f, "expired ({days} days to expiry)"),
            Self::WithinOneDay { seconds } => {
                write!(f, "expires in {seconds}s, less than one whole day")
            }
            Self::Data { message } | Self::Other { message } => f.write_str(message),
            Self::CalibrationFailure {
                message, attempts, ..
            } => write!(f, "calibration failed after {attempts} attempt(s): {message}"),
        }
    }
}

/// An expiry left out of a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Omission {
    pub expiry: NaiveDate,
    pub reason: OmissionReason,
}

/// Calibrated surface of one underlying at one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub underlying: String,
    pub as_of: NaiveDateTime,
    pub spot: f64,
    /// Ordered by expiry.
    pub slices: Vec<SurfaceSlice>,
    pub omissions: Vec<Omission>,
    pub arbitrage: ArbitrageReport,
}

impl Surface {
    pub fn expiries(&self) -> Vec<NaiveDate> {
        self.slices.iter().map(|s| s.expiry).collect()
    }

    pub fn slice(&self, expiry: NaiveDate) -> Option<&SurfaceSlice> {
        self.slices.iter().find(|s| s.expiry == expiry)
    }

    /// Fitted Black vol at a calibrated expiry.
    ///
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for an expiry without a slice or
    /// a non-positive strike, and [`VolSurfError::NumericalError`] where the
    /// fitted variance is negative.
    pub fn vol(&self, expiry: NaiveDate, strike: f64) -> error::Result<Vol> {
        self.curve(expiry)?.vol(strike)
    }

    /// Fitted total variance at a calibrated expiry.
    ///
    /// # Errors
    /// See [`Surface::vol`].
    pub fn variance(&self, expiry: NaiveDate, strike: f64) -> error::Result<Variance> {
        self.curve(expiry)?.variance(strike)
    }

    fn curve(&self, expiry: NaiveDate) -> error::Result<&dyn SmileSection> {
        self.slice(expiry)
            .map(|s| &s.fit.curve as &dyn SmileSection)
            .ok_or_else(|| VolSurfError::InvalidInput {
                message: format!("{} has no calibrated slice at {expiry}", self.underlying),
            })
    }

    /// All reconstructed prices across slices, ordered by expiry then strike.
    pub fn prices(&self) -> impl Iterator<Item = &ReconstructedPrice> {
        self.slices.iter().flat_map(|s| s.prices.iter())
    }
}

/// An underlying whose surface could not be built at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub underlying: String,
    pub message: String,
}

/// Result of running the pipeline over a quote table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub surfaces: Vec<Surface>,
    pub failures: Vec<BatchFailure>,
    /// Quote rows the table set aside while loading.
    #[serde(default)]
    pub rejected: Vec<RejectedRow>,
}

impl BatchOutcome {
    pub fn surface(&self, underlying: &str) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.underlying == underlying)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_omission_reasons() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let data: OmissionReason = VolSurfError::data("smile is empty", Some(expiry)).into();
        assert_eq!(
            data,
            OmissionReason::Data {
                message: "smile is empty".into()
            }
        );

        let failed: OmissionReason = VolSurfError::CalibrationFailure {
            message: "no feasible fit".into(),
            model: "SVI",
            attempts: 5,
            best_objective: Some(0.2),
        }
        .into();
        assert!(matches!(
            failed,
            OmissionReason::CalibrationFailure { attempts: 5, best_objective: Some(_), .. }
        ));
        assert!(failed.to_string().contains("5 attempt"));

        let other: OmissionReason = VolSurfError::NumericalError {
            message: "NaN".into(),
        }
        .into();
        assert!(matches!(other, OmissionReason::Other { .. }));
    }

    #[test]
    fn omission_reason_serializes_with_kind_tag() {
        let json = serde_json::to_string(&OmissionReason::Expired { days: -3 }).unwrap();
        assert_eq!(json, r#"{"kind":"expired","days":-3}"#);
        assert_eq!(OmissionReason::Expired { days: -3 }.to_string(), "expired (-3 days to expiry)");
        let soon = OmissionReason::WithinOneDay { seconds: 3600 };
        assert_eq!(
            serde_json::to_string(&soon).unwrap(),
            r#"{"kind":"within_one_day","seconds":3600}"#
        );
        assert!(!soon.to_string().contains("expired"));
    }

    #[test]
    fn batch_outcome_lookup_by_underlying() {
        let outcome = BatchOutcome::default();
        assert!(outcome.surface("SPY").is_none());
    }
}
