//! Policy parameters for surface construction.
//!
//! Every threshold the pipeline applies lives here rather than as a literal in
//! the algorithm code. The defaults reproduce the reference behavior for
//! equity and crypto chains; none of them is claimed to be optimal for every
//! underlying, so a JSON config can override any subset of fields:
//!
//! ```
//! use svisurf::config::SurfaceConfig;
//!
//! let cfg = SurfaceConfig::from_json_str(r#"{ "filter": { "delta_limit": 0.005 } }"#)?;
//! assert_eq!(cfg.filter.delta_limit, 0.005);
//! assert_eq!(cfg.filter.moneyness_band, (0.4, 2.5));
//! # Ok::<(), svisurf::VolSurfError>(())
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolSurfError};
use crate::validate::{validate_band, validate_non_negative, validate_positive};

/// Top-level configuration for one calibration run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub solver: SolverConfig,
    pub filter: SmileFilter,
    pub calibration: CalibrationConfig,
    pub grid: GridConfig,
    pub reconstruction: ReconstructionScope,
    pub g_function: GFunctionConfig,
}

impl SurfaceConfig {
    /// Parse a (possibly partial) JSON configuration; missing fields take defaults.
    ///
    /// # Errors
    /// Returns [`VolSurfError::Json`] for malformed JSON and
    /// [`VolSurfError::InvalidInput`] if the result fails [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: SurfaceConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    /// Same as [`from_json_str`](Self::from_json_str), plus [`VolSurfError::Io`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check internal consistency of all sections.
    ///
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.solver.validate()?;
        self.filter.validate()?;
        self.calibration.validate()?;
        self.grid.validate()?;
        self.g_function.validate()?;
        Ok(())
    }
}

/// Newton-Raphson settings for Black-76 implied-vol inversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Starting volatility, also returned when vega underflows.
    pub initial_guess: f64,
    /// Iteration cap; the best estimate so far is returned when it is hit.
    pub max_iterations: usize,
    /// Absolute price tolerance. The effective threshold is
    /// `min(abs_tolerance, target / F)`.
    pub abs_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            initial_guess: 0.5,
            max_iterations: 200,
            abs_tolerance: 1e-5,
        }
    }
}

impl SolverConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_positive(self.initial_guess, "solver.initial_guess")?;
        validate_positive(self.abs_tolerance, "solver.abs_tolerance")?;
        if self.max_iterations == 0 {
            return Err(VolSurfError::InvalidInput {
                message: "solver.max_iterations must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Quote cleaning rules applied when turning an expiry's quotes into a smile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmileFilter {
    /// Retained strikes satisfy `lo·F ≤ K ≤ hi·F`.
    pub moneyness_band: (f64, f64),
    /// Strikes whose Black-76 delta satisfies `|δ| ≤ delta_limit` are dropped.
    pub delta_limit: f64,
    /// Also invert bid and ask premiums, and drop rows whose bid or ask IV is negative.
    pub bid_ask: bool,
}

impl Default for SmileFilter {
    fn default() -> Self {
        Self {
            moneyness_band: (0.4, 2.5),
            delta_limit: 0.001,
            bid_ask: true,
        }
    }
}

impl SmileFilter {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_band(self.moneyness_band.0, self.moneyness_band.1, "filter.moneyness_band")?;
        validate_non_negative(self.delta_limit, "filter.delta_limit")?;
        if self.delta_limit >= 1.0 {
            return Err(VolSurfError::InvalidInput {
                message: format!("filter.delta_limit must be below 1, got {}", self.delta_limit),
            });
        }
        Ok(())
    }
}

/// Two-stage SVI calibration settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Lower bound of the SVI `σ` search interval.
    pub sigma_min: f64,
    /// Upper bound of the SVI `σ` search interval.
    pub sigma_max: f64,
    /// Global-search attempts before the expiry is reported as failed.
    pub max_attempts: usize,
    /// Optional wall-clock budget per expiry, in milliseconds.
    pub time_budget_ms: Option<u64>,
    /// Base seed; each expiry and attempt derives its own stream from it.
    pub seed: u64,
    pub annealing: AnnealingConfig,
    pub local_search: LocalSearchConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sigma_min: 1e-4,
            sigma_max: 10.0,
            max_attempts: 5,
            time_budget_ms: None,
            seed: 0x5EED_5715,
            annealing: AnnealingConfig::default(),
            local_search: LocalSearchConfig::default(),
        }
    }
}

impl CalibrationConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_band(self.sigma_min, self.sigma_max, "calibration sigma bounds")?;
        if self.max_attempts == 0 {
            return Err(VolSurfError::InvalidInput {
                message: "calibration.max_attempts must be at least 1".into(),
            });
        }
        self.annealing.validate()?;
        self.local_search.validate()
    }
}

/// Generalized simulated annealing ("dual annealing") parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    /// Number of temperature steps.
    pub max_iter: usize,
    pub initial_temp: f64,
    /// Reannealing starts when the temperature falls below `initial_temp * restart_temp_ratio`.
    pub restart_temp_ratio: f64,
    /// Visiting distribution parameter `q_v ∈ (1, 3)`.
    pub visit: f64,
    /// Acceptance distribution parameter `q_a < 1`.
    pub accept: f64,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            initial_temp: 5230.0,
            restart_temp_ratio: 2e-5,
            visit: 2.62,
            accept: -5.0,
        }
    }
}

impl AnnealingConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(VolSurfError::InvalidInput {
                message: "annealing.max_iter must be at least 1".into(),
            });
        }
        validate_positive(self.initial_temp, "annealing.initial_temp")?;
        if !(self.restart_temp_ratio > 0.0 && self.restart_temp_ratio < 1.0) {
            return Err(VolSurfError::InvalidInput {
                message: format!(
                    "annealing.restart_temp_ratio must be in (0, 1), got {}",
                    self.restart_temp_ratio
                ),
            });
        }
        if !(self.visit > 1.0 && self.visit < 3.0) {
            return Err(VolSurfError::InvalidInput {
                message: format!("annealing.visit must be in (1, 3), got {}", self.visit),
            });
        }
        if !(self.accept < 1.0) || !self.accept.is_finite() {
            return Err(VolSurfError::InvalidInput {
                message: format!("annealing.accept must be finite and below 1, got {}", self.accept),
            });
        }
        Ok(())
    }
}

/// Nelder-Mead refinement used as the local step of the global search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSearchConfig {
    pub max_iter: usize,
    /// Convergence threshold on simplex diameter.
    pub diameter_tol: f64,
    /// Convergence threshold on objective value spread.
    pub fvalue_tol: f64,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            max_iter: 400,
            diameter_tol: 1e-8,
            fvalue_tol: 1e-12,
        }
    }
}

impl LocalSearchConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_positive(self.diameter_tol, "local_search.diameter_tol")?;
        validate_positive(self.fvalue_tol, "local_search.fvalue_tol")?;
        Ok(())
    }
}

/// Evaluation grid for the fitted curve handed to downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Evaluate on a dense strike-ratio grid; otherwise on the observed log-moneyness.
    pub extrapolate: bool,
    /// Strike-ratio range `K/F` of the dense grid.
    pub strike_ratio_range: (f64, f64),
    pub points: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            extrapolate: true,
            strike_ratio_range: (0.1, 2.5),
            points: 1000,
        }
    }
}

impl GridConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_band(self.strike_ratio_range.0, self.strike_ratio_range.1, "grid.strike_ratio_range")?;
        if self.extrapolate && self.points < 2 {
            return Err(VolSurfError::InvalidInput {
                message: format!("grid.points must be at least 2, got {}", self.points),
            });
        }
        Ok(())
    }
}

/// Which quotes the price reconstructor re-prices off the fitted curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionScope {
    /// Only the OTM quotes retained in the smile.
    #[default]
    Retained,
    /// Every quote of the expiry, in-the-money ones included.
    AllQuotes,
}

/// Grid for the finite-difference g-function diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GFunctionConfig {
    pub strike_ratio_range: (f64, f64),
    pub points: usize,
}

impl Default for GFunctionConfig {
    fn default() -> Self {
        Self {
            strike_ratio_range: (0.1, 3.0),
            points: 1000,
        }
    }
}

impl GFunctionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_band(
            self.strike_ratio_range.0,
            self.strike_ratio_range.1,
            "g_function.strike_ratio_range",
        )?;
        if self.points < 3 {
            return Err(VolSurfError::InvalidInput {
                message: format!("g_function.points must be at least 3, got {}", self.points),
            });
        }
        Ok(())
    }
}
