//! Two-stage SVI calibration of one expiry.
//!
//! Stage 1 ([`inner`]) solves the constrained linear problem in `(a, d, c)`
//! for fixed `(m, σ)`; stage 2 ([`annealing`]) searches `(m, σ)` globally.
//! A failed attempt is retried with a fresh seed up to
//! [`CalibrationConfig::max_attempts`] times and within the optional
//! wall-clock budget, then reported as [`VolSurfError::CalibrationFailure`].
//!
//! # References
//! - Zeliade Systems, "Quasi-Explicit Calibration of Gatheral's SVI Model" (2009)

pub mod annealing;
pub mod inner;

pub use annealing::{AnnealOutcome, DualAnnealing, SearchBox};
pub use inner::{InnerFit, SliceData};

use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::{CalibrationConfig, GridConfig};
use crate::error::{Result, VolSurfError};
use crate::smile::{Smile, SviParameters, SviSmile};
use crate::types::OptionType;

use annealing::AnnealAbort;

const MODEL: &str = "SVI";

/// Outcome of the global search on raw `(x, w)` data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceCalibration {
    pub params: SviParameters,
    /// `½ Σ (w_fit − w)²` at the optimum.
    pub objective: f64,
    /// Attempts used, including the successful one.
    pub attempts: usize,
    pub evaluations: usize,
}

/// Fit diagnostics at one smile point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitPoint {
    pub strike: f64,
    pub option_type: OptionType,
    pub log_moneyness: f64,
    pub mid_iv: f64,
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    pub fitted_iv: f64,
    /// Zero inside `[bid_iv, ask_iv]`, else the signed distance to the
    /// nearer edge (positive above the ask, negative below the bid).
    pub band_error: f64,
    /// `(fitted − mid)/mid`.
    pub relative_error: f64,
}

/// Fitted curve on a log-moneyness grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarianceGrid {
    pub log_moneyness: Vec<f64>,
    pub total_variance: Vec<f64>,
    /// `None` where the total variance is negative.
    pub implied_vol: Vec<Option<f64>>,
}

impl VarianceGrid {
    /// Evaluate `params` at `x`, converting to vols with year fraction `t`.
    pub fn evaluate(params: &SviParameters, t: f64, x: Vec<f64>) -> Self {
        let total_variance = x.iter().map(|&x| params.total_variance(x)).collect();
        let implied_vol = x.iter().map(|&x| params.implied_vol(x, t)).collect();
        Self {
            log_moneyness: x,
            total_variance,
            implied_vol,
        }
    }

    pub fn len(&self) -> usize {
        self.log_moneyness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_moneyness.is_empty()
    }
}

/// Calibrated slice of one expiry with its diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SviFit {
    pub expiry: NaiveDate,
    pub params: SviParameters,
    pub curve: SviSmile,
    pub objective: f64,
    pub attempts: usize,
    pub evaluations: usize,
    pub points: Vec<FitPoint>,
    /// Largest `|band_error|` excluding the two end points.
    pub max_abs_band_error: f64,
    pub grid: VarianceGrid,
}

/// Two-stage SVI calibrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SviCalibrator {
    config: CalibrationConfig,
    grid: GridConfig,
}

impl SviCalibrator {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for inconsistent settings.
    pub fn new(config: CalibrationConfig, grid: GridConfig) -> Result<Self> {
        config.validate()?;
        grid.validate()?;
        Ok(Self { config, grid })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate a built smile, optionally warm-starting the global search
    /// from previously fitted `(m, σ)`.
    ///
    /// # Errors
    /// - [`VolSurfError::DataError`] for an empty smile
    /// - [`VolSurfError::CalibrationFailure`] when every attempt fails, or
    ///   the fitted variance is negative at a smile point
    pub fn calibrate(&self, smile: &Smile, warm_start: Option<&SviParameters>) -> Result<SviFit> {
        if smile.is_empty() {
            return Err(VolSurfError::data("cannot calibrate an empty smile", Some(smile.expiry)));
        }
        let t = smile.time_to_expiry();
        let x = smile.log_moneyness();
        let w = smile.total_variances();
        let key = smile.expiry.num_days_from_ce() as u64;
        let fit = self
            .fit_slice(&x, &w, warm_start, key)
            .map_err(|e| with_expiry(e, smile.expiry))?;

        let curve = SviSmile::new(smile.forward_price(), t, fit.params)?;
        let points = fit_points(&fit.params, smile, &x).map_err(|reason| {
            VolSurfError::CalibrationFailure {
                message: format!("{}: {reason}", smile.expiry),
                model: MODEL,
                attempts: fit.attempts,
                best_objective: Some(fit.objective),
            }
        })?;
        let max_abs_band_error = interior_max_abs(&points);

        let grid_x = if self.grid.extrapolate {
            let (lo, hi) = self.grid.strike_ratio_range;
            linspace(lo, hi, self.grid.points)
                .map(f64::ln)
                .collect()
        } else {
            x
        };

        #[cfg(feature = "logging")]
        tracing::debug!(
            expiry = %smile.expiry,
            points = points.len(),
            objective = fit.objective,
            attempts = fit.attempts,
            max_abs_band_error,
            "SVI slice calibrated"
        );

        Ok(SviFit {
            expiry: smile.expiry,
            params: fit.params,
            curve,
            objective: fit.objective,
            attempts: fit.attempts,
            evaluations: fit.evaluations,
            points,
            max_abs_band_error,
            grid: VarianceGrid::evaluate(&fit.params, t, grid_x),
        })
    }

    /// Calibrate raw log-moneyness / total-variance data.
    ///
    /// `key` distinguishes slices sharing a base seed (the expiry's day
    /// number in [`calibrate`](Self::calibrate)).
    ///
    /// # Errors
    /// - [`VolSurfError::InvalidInput`] for empty, mismatched or non-finite data
    /// - [`VolSurfError::CalibrationFailure`] when every attempt fails
    pub fn fit_slice(
        &self,
        x: &[f64],
        w: &[f64],
        warm_start: Option<&SviParameters>,
        key: u64,
    ) -> Result<SliceCalibration> {
        let data = SliceData::new(x.to_vec(), w.to_vec())?;
        let (x_lo, x_hi) = data.x_range();
        let bounds = SearchBox::new(
            [x_lo, self.config.sigma_min],
            [x_hi, self.config.sigma_max],
        )?;
        let deadline = self
            .config
            .time_budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let annealer = DualAnnealing::new(bounds, self.config.annealing, self.config.local_search)
            .deadline(deadline);
        let warm = warm_start.map(|p| [p.m(), p.sigma()]);

        let ((params, objective, evaluations), attempts) =
            with_retries(MODEL, self.config.max_attempts, deadline, |attempt| {
                let seed = attempt_seed(self.config.seed, key, attempt);
                let x0 = if attempt == 0 { warm } else { None };
                let outcome = annealer
                    .minimize(
                        |[m, sigma]| data.fit(m, sigma).map_or(f64::NAN, |f| f.objective),
                        x0,
                        seed,
                    )
                    .map_err(AttemptFailure::from)?;
                let (params, objective) = recover(&data, &outcome)?;
                if params.min_total_variance_on(x_lo, x_hi) < 0.0 {
                    return Err(AttemptFailure {
                        reason: "fitted total variance is negative on the quoted range".into(),
                        objective: Some(objective),
                    });
                }
                Ok((params, objective, outcome.evaluations))
            })?;

        Ok(SliceCalibration {
            params,
            objective,
            attempts,
            evaluations,
        })
    }
}

/// Stage-1 solution at the best `(m, σ)` of a search.
fn recover(
    data: &SliceData,
    outcome: &AnnealOutcome,
) -> std::result::Result<(SviParameters, f64), AttemptFailure> {
    let [m, sigma] = outcome.point;
    let fit = data.fit(m, sigma).ok_or_else(|| AttemptFailure {
        reason: format!("no finite stage-1 solution at m = {m}, sigma = {sigma}"),
        objective: None,
    })?;
    let params = fit.to_params(m, sigma).map_err(|e| AttemptFailure {
        reason: e.to_string(),
        objective: Some(fit.objective),
    })?;
    Ok((params, fit.objective))
}

/// One failed calibration attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AttemptFailure {
    pub reason: String,
    /// Best objective reached before failing, if any.
    pub objective: Option<f64>,
}

impl From<AnnealAbort> for AttemptFailure {
    fn from(abort: AnnealAbort) -> Self {
        match abort {
            AnnealAbort::NoFiniteStart => Self {
                reason: "objective is not finite at any starting point".into(),
                objective: None,
            },
            AnnealAbort::NonFiniteEnergy { point, best } => Self {
                reason: format!("objective is not finite at m = {}, sigma = {}", point[0], point[1]),
                objective: best,
            },
        }
    }
}

/// Run `attempt(0), attempt(1), …` until one succeeds, `max_attempts` are
/// spent or `deadline` passes. Returns the value and the attempts used.
pub(crate) fn with_retries<T, F>(
    model: &'static str,
    max_attempts: usize,
    deadline: Option<Instant>,
    mut attempt: F,
) -> Result<(T, usize)>
where
    F: FnMut(usize) -> std::result::Result<T, AttemptFailure>,
{
    let mut best: Option<f64> = None;
    let mut last_reason = String::from("no attempt was made");
    let mut used = 0;
    while used < max_attempts {
        if used > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
            last_reason = format!("time budget exhausted; last failure: {last_reason}");
            break;
        }
        let index = used;
        used += 1;
        match attempt(index) {
            Ok(value) => return Ok((value, used)),
            Err(failure) => {
                #[cfg(feature = "logging")]
                tracing::warn!(model, attempt = index, reason = %failure.reason, "calibration attempt failed");
                if let Some(obj) = failure.objective.filter(|v| v.is_finite()) {
                    best = Some(best.map_or(obj, |b| b.min(obj)));
                }
                last_reason = failure.reason;
            }
        }
    }
    Err(VolSurfError::CalibrationFailure {
        message: format!("{model} calibration failed after {used} attempt(s): {last_reason}"),
        model,
        attempts: used,
        best_objective: best,
    })
}

/// Independent RNG stream per (base seed, slice, attempt), via the
/// SplitMix64 finalizer.
pub(crate) fn attempt_seed(base: u64, key: u64, attempt: usize) -> u64 {
    let mut z = base
        ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (attempt as u64).wrapping_add(1).wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Fitted IV and band/mid errors at every smile point.
///
/// Fails on the first point where the fitted total variance is negative.
fn fit_points(
    params: &SviParameters,
    smile: &Smile,
    x: &[f64],
) -> std::result::Result<Vec<FitPoint>, String> {
    let t = smile.time_to_expiry();
    smile
        .points
        .iter()
        .zip(x)
        .map(|(p, &x)| {
            let fitted_iv = params.implied_vol(x, t).ok_or_else(|| {
                format!(
                    "fitted total variance {} is negative at strike {}",
                    params.total_variance(x),
                    p.strike
                )
            })?;
            let bid = p.bid_iv.unwrap_or(p.mid_iv);
            let ask = p.ask_iv.unwrap_or(p.mid_iv);
            Ok(FitPoint {
                strike: p.strike,
                option_type: p.option_type,
                log_moneyness: x,
                mid_iv: p.mid_iv,
                bid_iv: p.bid_iv,
                ask_iv: p.ask_iv,
                fitted_iv,
                band_error: band_error(fitted_iv, bid, ask),
                relative_error: (fitted_iv - p.mid_iv) / p.mid_iv,
            })
        })
        .collect()
}

fn band_error(fitted: f64, bid: f64, ask: f64) -> f64 {
    if fitted > ask {
        fitted - ask
    } else if fitted < bid {
        fitted - bid
    } else {
        0.0
    }
}

fn interior_max_abs(points: &[FitPoint]) -> f64 {
    if points.len() <= 2 {
        return 0.0;
    }
    points[1..points.len() - 1]
        .iter()
        .map(|p| p.band_error.abs())
        .fold(0.0, f64::max)
}

pub(crate) fn linspace(lo: f64, hi: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (hi - lo) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| if i + 1 == n && n > 1 { hi } else { lo + step * i as f64 })
}

/// Attach the expiry to a calibration failure raised on raw slice data.
fn with_expiry(err: VolSurfError, expiry: NaiveDate) -> VolSurfError {
    match err {
        VolSurfError::CalibrationFailure {
            message,
            model,
            attempts,
            best_objective,
        } => VolSurfError::CalibrationFailure {
            message: format!("{expiry}: {message}"),
            model,
            attempts,
            best_objective,
        },
        VolSurfError::InvalidInput { message } => VolSurfError::data(message, Some(expiry)),
        other => other,
    }
}
