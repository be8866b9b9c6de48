//! Raw SVI (Stochastic Volatility Inspired) parameterization.
//!
//! Total implied variance as a function of log-moneyness `x = ln(K/F)`:
//!
//! ```text
//! w(x) = a + b·[ρ(x − m) + √((x − m)² + σ²)]
//! ```
//!
//! # References
//! - Gatheral, J. "The Volatility Surface: A Practitioner's Guide" (2006)
//! - Gatheral, J. & Jacquier, A. "Arbitrage-free SVI Volatility Surfaces" (2014)

use serde::{Deserialize, Serialize};

use crate::error::{self, VolSurfError};
use crate::smile::SmileSection;
use crate::types::Vol;
use crate::validate::validate_positive;

/// The five raw SVI parameters `(a, b, ρ, m, σ)`.
///
/// Construction enforces `b ≥ 0`, `|ρ| < 1`, `σ > 0` and finite `a`, `m`.
/// Non-negativity of `w` is a property of the range it is evaluated on; see
/// [`min_total_variance_on`](SviParameters::min_total_variance_on).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SviParametersRaw", into = "SviParametersRaw")]
pub struct SviParameters {
    /// Variance level.
    a: f64,
    /// Wing slope.
    b: f64,
    /// Skew ρ ∈ (−1, 1).
    rho: f64,
    /// Horizontal shift.
    m: f64,
    /// ATM curvature.
    sigma: f64,
}

#[derive(Serialize, Deserialize)]
struct SviParametersRaw {
    a: f64,
    b: f64,
    rho: f64,
    m: f64,
    sigma: f64,
}

impl TryFrom<SviParametersRaw> for SviParameters {
    type Error = VolSurfError;
    fn try_from(raw: SviParametersRaw) -> Result<Self, Self::Error> {
        Self::new(raw.a, raw.b, raw.rho, raw.m, raw.sigma)
    }
}

impl From<SviParameters> for SviParametersRaw {
    fn from(p: SviParameters) -> Self {
        Self {
            a: p.a,
            b: p.b,
            rho: p.rho,
            m: p.m,
            sigma: p.sigma,
        }
    }
}

impl SviParameters {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] if `b < 0`, `|ρ| ≥ 1`, `σ ≤ 0`,
    /// or `a`/`m` is not finite.
    pub fn new(a: f64, b: f64, rho: f64, m: f64, sigma: f64) -> error::Result<Self> {
        if !(b >= 0.0) || !b.is_finite() {
            return Err(VolSurfError::InvalidInput {
                message: format!("b must be non-negative, got {b}"),
            });
        }
        if !(rho.abs() < 1.0) {
            return Err(VolSurfError::InvalidInput {
                message: format!("|rho| must be less than 1, got {rho}"),
            });
        }
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(VolSurfError::InvalidInput {
                message: format!("sigma must be positive, got {sigma}"),
            });
        }
        if !m.is_finite() {
            return Err(VolSurfError::InvalidInput {
                message: format!("m must be finite, got {m}"),
            });
        }
        if !a.is_finite() {
            return Err(VolSurfError::InvalidInput {
                message: format!("a must be finite, got {a}"),
            });
        }
        Ok(Self {
            a,
            b,
            rho,
            m,
            sigma,
        })
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn m(&self) -> f64 {
        self.m
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Total variance w(x).
    pub fn total_variance(&self, x: f64) -> f64 {
        let dx = x - self.m;
        self.a + self.b * (self.rho * dx + (dx * dx + self.sigma * self.sigma).sqrt())
    }

    /// First derivative: w'(x) = b·[ρ + (x−m)/√((x−m)² + σ²)].
    pub fn w_prime(&self, x: f64) -> f64 {
        let dx = x - self.m;
        let r = (dx * dx + self.sigma * self.sigma).sqrt();
        self.b * (self.rho + dx / r)
    }

    /// Second derivative: w''(x) = b·σ²/((x−m)² + σ²)^(3/2).
    pub fn w_double_prime(&self, x: f64) -> f64 {
        let dx = x - self.m;
        let r2 = dx * dx + self.sigma * self.sigma;
        self.b * self.sigma * self.sigma / (r2 * r2.sqrt())
    }

    /// Gatheral g-function from the closed-form derivatives.
    ///
    /// g(x) ≥ 0 everywhere implies no butterfly arbitrage.
    ///
    /// # Reference
    /// Gatheral & Jacquier (2014), Definition 4.1.
    pub fn g_function(&self, x: f64) -> f64 {
        let w = self.total_variance(x);
        if w <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let wp = self.w_prime(x);
        let wpp = self.w_double_prime(x);
        let term1 = 1.0 - x * wp / (2.0 * w);
        term1 * term1 - wp * wp / 4.0 * (1.0 / w + 0.25) + wpp / 2.0
    }

    /// Global minimum of w: `a + bσ√(1 − ρ²)`.
    pub fn min_total_variance(&self) -> f64 {
        self.a + self.b * self.sigma * (1.0 - self.rho * self.rho).sqrt()
    }

    /// Minimum of w over `[lo, hi]`.
    ///
    /// w is convex with its vertex at `m − ρσ/√(1 − ρ²)`, so the minimum is
    /// at that vertex clamped to the interval.
    pub fn min_total_variance_on(&self, lo: f64, hi: f64) -> f64 {
        let vertex = self.m - self.rho * self.sigma / (1.0 - self.rho * self.rho).sqrt();
        self.total_variance(vertex.clamp(lo.min(hi), hi.max(lo)))
    }

    /// Black implied vol `√(w/T)`, or `None` where w is negative.
    pub fn implied_vol(&self, x: f64, expiry: f64) -> Option<f64> {
        let w = self.total_variance(x);
        (w >= 0.0 && expiry > 0.0).then(|| (w / expiry).sqrt())
    }
}

/// A calibrated SVI smile anchored at a forward and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SviSmile {
    forward: f64,
    expiry: f64,
    params: SviParameters,
}

impl SviSmile {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for a non-positive forward or expiry.
    pub fn new(forward: f64, expiry: f64, params: SviParameters) -> error::Result<Self> {
        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        Ok(Self {
            forward,
            expiry,
            params,
        })
    }

    pub fn params(&self) -> &SviParameters {
        &self.params
    }

    /// Total variance at log-moneyness `x`.
    pub fn total_variance_at(&self, x: f64) -> f64 {
        self.params.total_variance(x)
    }
}

impl SmileSection for SviSmile {
    fn vol(&self, strike: f64) -> error::Result<Vol> {
        validate_positive(strike, "strike")?;
        let x = (strike / self.forward).ln();
        self.params
            .implied_vol(x, self.expiry)
            .map(Vol)
            .ok_or_else(|| VolSurfError::NumericalError {
                message: format!(
                    "SVI total variance is negative: w({x}) = {}",
                    self.params.total_variance(x)
                ),
            })
    }

    fn forward(&self) -> f64 {
        self.forward
    }

    fn expiry(&self) -> f64 {
        self.expiry
    }
}
