//! Black-76 pricing and Newton-Raphson implied-volatility inversion.
//!
//! # Formula
//! ```text
//! d1 = ln(F/K)/(σ√T) + σ√T/2,   d2 = d1 − σ√T
//! price = ε·(F·Φ(ε·d1) − K·Φ(ε·d2)),   ε = +1 call, −1 put
//! ```
//! Prices are undiscounted (forward premiums).

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::config::SolverConfig;
use crate::error::{Result, VolSurfError};
use crate::types::OptionType;
use crate::validate::{validate_finite, validate_positive};

/// Standard normal CDF Φ(x).
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x * FRAC_1_SQRT_2)
}

/// Standard normal density φ(x).
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

fn d1(forward: f64, strike: f64, stddev: f64) -> f64 {
    (forward / strike).ln() / stddev + 0.5 * stddev
}

/// Raw Black-76 formula without input validation.
///
/// Accepts any volatility sign so the Newton iteration can step through
/// non-physical values the way the solver contract allows.
fn price_unchecked(forward: f64, strike: f64, vol: f64, expiry: f64, eps: f64) -> f64 {
    let stddev = vol * expiry.sqrt();
    let d1 = d1(forward, strike, stddev);
    let d2 = d1 - stddev;
    eps * (forward * norm_cdf(eps * d1) - strike * norm_cdf(eps * d2))
}

fn vega_unchecked(forward: f64, strike: f64, vol: f64, expiry: f64) -> f64 {
    let sqrt_t = expiry.sqrt();
    forward * norm_pdf(d1(forward, strike, vol * sqrt_t)) * sqrt_t
}

/// Undiscounted Black-76 option price.
///
/// # Errors
/// Returns [`VolSurfError::InvalidInput`] if forward, strike, vol or expiry
/// is non-positive or non-finite.
///
/// # Examples
/// ```
/// use svisurf::implied::black_price;
/// use svisurf::OptionType;
///
/// let call = black_price(100.0, 100.0, 0.2, 1.0, OptionType::Call)?;
/// let put = black_price(100.0, 100.0, 0.2, 1.0, OptionType::Put)?;
/// assert!((call - put).abs() < 1e-12); // parity at the forward
/// # Ok::<(), svisurf::VolSurfError>(())
/// ```
pub fn black_price(
    forward: f64,
    strike: f64,
    vol: f64,
    expiry: f64,
    option_type: OptionType,
) -> Result<f64> {
    validate_inputs(forward, strike, expiry)?;
    validate_positive(vol, "vol")?;
    Ok(price_unchecked(forward, strike, vol, expiry, option_type.sign()))
}

/// Black-76 vega `∂price/∂σ = F·φ(d1)·√T`.
///
/// # Errors
/// Same validation as [`black_price`].
pub fn black_vega(forward: f64, strike: f64, vol: f64, expiry: f64) -> Result<f64> {
    validate_inputs(forward, strike, expiry)?;
    validate_positive(vol, "vol")?;
    Ok(vega_unchecked(forward, strike, vol, expiry))
}

/// Black-76 forward delta `δ = ε·Φ(ε·d1)`.
///
/// # Errors
/// Same validation as [`black_price`].
pub fn black_delta(
    forward: f64,
    strike: f64,
    vol: f64,
    expiry: f64,
    option_type: OptionType,
) -> Result<f64> {
    validate_inputs(forward, strike, expiry)?;
    validate_positive(vol, "vol")?;
    let eps = option_type.sign();
    Ok(eps * norm_cdf(eps * d1(forward, strike, vol * expiry.sqrt())))
}

fn validate_inputs(forward: f64, strike: f64, expiry: f64) -> Result<()> {
    validate_positive(forward, "forward")?;
    validate_positive(strike, "strike")?;
    validate_positive(expiry, "expiry")?;
    Ok(())
}

/// How a Newton-Raphson inversion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolveStatus {
    /// The price residual fell below the tolerance.
    Converged,
    /// The iteration cap was hit; the best estimate reached is returned.
    MaxIterations,
    /// Vega underflowed (deep OTM or degenerate inputs); the initial guess is returned.
    VegaUnderflow,
}

/// Result of an implied-vol inversion: always a best estimate, tagged with how
/// it was obtained.
///
/// Only [`SolveStatus::Converged`] means the model price matches the target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpliedVol {
    /// Best volatility estimate. May be negative for inconsistent prices.
    pub vol: f64,
    pub status: SolveStatus,
    /// Newton steps taken.
    pub iterations: usize,
}

impl ImpliedVol {
    /// Whether the estimate reproduces the target price within tolerance.
    pub fn is_converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Black-76 implied-volatility solver.
///
/// Newton-Raphson from `σ₀` with step `(target − price)/vega`, stopping once
/// `|target − price| < min(tol, target/F)`. When the target lies strictly
/// between intrinsic value and the no-arbitrage upper bound, the iterate is
/// kept inside a shrinking bracket: steps that leave it are replaced by
/// bisection (or doubling while no upper bound is known). Targets outside
/// that range are iterated unguarded.
///
/// # Examples
/// ```
/// use svisurf::implied::{black_price, BlackImpliedVol};
/// use svisurf::OptionType;
///
/// let price = black_price(100.0, 110.0, 0.35, 0.5, OptionType::Call)?;
/// let iv = BlackImpliedVol::default().solve(price, 100.0, 110.0, 0.5, OptionType::Call)?;
/// assert!(iv.is_converged());
/// assert!((iv.vol - 0.35).abs() < 1e-6);
/// # Ok::<(), svisurf::VolSurfError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BlackImpliedVol {
    config: SolverConfig,
}

impl BlackImpliedVol {
    /// Create a solver with explicit settings.
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Solve with default settings (σ₀ = 0.5, 200 iterations, tolerance 1e-5).
    ///
    /// # Errors
    /// See [`solve`](Self::solve).
    pub fn compute(
        option_price: f64,
        forward: f64,
        strike: f64,
        expiry: f64,
        option_type: OptionType,
    ) -> Result<ImpliedVol> {
        Self::default().solve(option_price, forward, strike, expiry, option_type)
    }

    /// Invert an undiscounted premium for the Black-76 volatility.
    ///
    /// Never fails on numerical grounds: exhausting the iteration budget or
    /// hitting a vanishing vega yields a tagged estimate instead.
    ///
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for non-positive forward, strike
    /// or expiry, or a non-finite price.
    pub fn solve(
        &self,
        undiscounted_price: f64,
        forward: f64,
        strike: f64,
        expiry: f64,
        option_type: OptionType,
    ) -> Result<ImpliedVol> {
        validate_inputs(forward, strike, expiry)?;
        validate_finite(undiscounted_price, "option price")?;

        let target = undiscounted_price;
        let eps = option_type.sign();
        let tolerance = self.config.abs_tolerance.min(target / forward);
        let initial = self.config.initial_guess;

        let intrinsic = (eps * (forward - strike)).max(0.0);
        let upper_bound = match option_type {
            OptionType::Call => forward,
            OptionType::Put => strike,
        };
        let bracketed = target > intrinsic && target < upper_bound;
        let (mut lo, mut hi) = (0.0_f64, f64::INFINITY);

        let mut sigma = initial;
        let mut best = (f64::INFINITY, initial);
        for iteration in 0..self.config.max_iterations {
            let price = price_unchecked(forward, strike, sigma, expiry, eps);
            let vega = vega_unchecked(forward, strike, sigma, expiry);
            let diff = target - price;
            let stalled = !(vega > f64::EPSILON);

            if diff.abs() < tolerance {
                // One last Newton step tightens the vol without another price check.
                let polished = sigma + diff / vega;
                let vol = if !stalled && polished > 0.0 { polished } else { sigma };
                return Ok(ImpliedVol {
                    vol,
                    status: SolveStatus::Converged,
                    iterations: iteration,
                });
            }
            if stalled && !(bracketed && iteration > 0) {
                return Ok(ImpliedVol {
                    vol: initial,
                    status: SolveStatus::VegaUnderflow,
                    iterations: iteration,
                });
            }
            if diff.abs() < best.0 {
                best = (diff.abs(), sigma);
            }

            let newton = if stalled { f64::NAN } else { sigma + diff / vega };
            sigma = if bracketed {
                if diff > 0.0 {
                    lo = lo.max(sigma);
                } else {
                    hi = hi.min(sigma);
                }
                if newton > lo && newton < hi {
                    newton
                } else if hi.is_finite() {
                    0.5 * (lo + hi)
                } else {
                    2.0 * sigma
                }
            } else {
                newton
            };
        }

        Ok(ImpliedVol {
            vol: best.1,
            status: SolveStatus::MaxIterations,
            iterations: self.config.max_iterations,
        })
    }
}
