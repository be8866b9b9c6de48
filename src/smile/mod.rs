//! Single-expiry smiles: market points and the fitted SVI curve.
//!
//! A [`Smile`] is the cleaned, ordered set of OTM quotes of one expiry with
//! their implied vols. [`SmileBuilder`] produces it from an expiry chain;
//! [`SviSmile`] is the calibrated curve for the same expiry and implements
//! [`SmileSection`].

pub mod builder;
pub mod svi;

pub use builder::SmileBuilder;
pub use svi::{SviParameters, SviSmile};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::conventions::{YearFractions, log_moneyness};
use crate::error;
use crate::forward::ForwardEstimate;
use crate::implied::SolveStatus;
use crate::types::{OptionType, Variance, Vol};

/// A single-tenor volatility smile.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` so calibrated slices can be
/// shared across worker threads.
pub trait SmileSection: Send + Sync {
    /// Implied Black volatility σ at the given strike.
    fn vol(&self, strike: f64) -> error::Result<Vol>;

    /// Total Black variance σ²T at the given strike.
    ///
    /// Default implementation derives from [`vol`](SmileSection::vol).
    fn variance(&self, strike: f64) -> error::Result<Variance> {
        let v = self.vol(strike)?;
        Ok(Variance(v.0 * v.0 * self.expiry()))
    }

    /// Forward price F at this tenor.
    fn forward(&self) -> f64;

    /// Time to expiry T in years.
    fn expiry(&self) -> f64;
}

/// One retained quote of a smile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmilePoint {
    pub strike: f64,
    /// OTM side the quote was taken from.
    pub option_type: OptionType,
    /// Present-value premiums as quoted.
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub mid_iv: f64,
    /// `None` when bid/ask inversion is disabled.
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    /// How the mid inversion ended.
    pub mid_status: SolveStatus,
}

/// The cleaned smile of one expiry, ordered by strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Smile {
    pub expiry: NaiveDate,
    pub year_fractions: YearFractions,
    pub forward: ForwardEstimate,
    pub discount_factor: f64,
    pub points: Vec<SmilePoint>,
}

impl Smile {
    /// Actual/365 year fraction, the one used for pricing and calibration.
    pub fn time_to_expiry(&self) -> f64 {
        self.year_fractions.act365
    }

    /// Reference forward.
    pub fn forward_price(&self) -> f64 {
        self.forward.forward
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn strikes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.strike).collect()
    }

    /// `x = ln(K/F)` per point.
    pub fn log_moneyness(&self) -> Vec<f64> {
        let f = self.forward_price();
        self.points.iter().map(|p| log_moneyness(p.strike, f)).collect()
    }

    /// Market total variance `w = σ_mid²·T` per point.
    pub fn total_variances(&self) -> Vec<f64> {
        let t = self.time_to_expiry();
        self.points.iter().map(|p| p.mid_iv * p.mid_iv * t).collect()
    }
}
