//! Stage 1: constrained linear least squares for `(a, d, c)` at fixed `(m, σ)`.
//!
//! With `u = (x − m)/σ` and `v = √(u² + 1)` the model is
//! `w ≈ a + d·u + c·v`, fitted under
//!
//! ```text
//! a ≤ max(w),   0 ≤ c ≤ 4σ,   |d| ≤ c,   c + |d| ≤ 4σ
//! ```
//!
//! Substituting `p = c + d`, `q = c − d` turns the feasible set into the box
//! `a ≤ max(w)`, `p, q ∈ [0, 4σ]` with design columns `1, (v+u)/2, (v−u)/2`.
//! A convex quadratic over a box attains its minimum on one of the box's
//! faces, so the exact optimum is the best feasible unconstrained optimum
//! over the 2·3·3 faces.
//!
//! # References
//! - Zeliade Systems, "Quasi-Explicit Calibration of Gatheral's SVI Model" (2009)

use nalgebra::{Matrix3, Vector3};

use crate::error::{self, VolSurfError};
use crate::smile::SviParameters;

/// Where a variable sits for one face of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Free,
    Lower,
    Upper,
}

const A_STATES: [Bound; 2] = [Bound::Free, Bound::Upper];
const PQ_STATES: [Bound; 3] = [Bound::Free, Bound::Lower, Bound::Upper];

/// `|ρ|` is kept strictly inside 1 when a face pins `p` or `q` at zero.
const RHO_LIMIT: f64 = 1.0 - 1e-9;

/// Optimal `(a, d, c)` for one `(m, σ)` and its objective `½‖r‖²`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InnerFit {
    pub a: f64,
    pub d: f64,
    pub c: f64,
    pub objective: f64,
}

impl InnerFit {
    /// Raw SVI parameters `ρ = d/c`, `b = c/σ`; a vanishing `c` gives a flat smile.
    ///
    /// # Errors
    /// Propagates [`SviParameters::new`] validation.
    pub fn to_params(&self, m: f64, sigma: f64) -> error::Result<SviParameters> {
        let (b, rho) = if self.c > f64::EPSILON * sigma.max(1.0) {
            (
                self.c / sigma,
                (self.d / self.c).clamp(-RHO_LIMIT, RHO_LIMIT),
            )
        } else {
            (0.0, 0.0)
        };
        SviParameters::new(self.a, b, rho, m, sigma)
    }
}

/// Observed smile in calibration coordinates.
#[derive(Debug, Clone)]
pub struct SliceData {
    x: Vec<f64>,
    w: Vec<f64>,
    w_max: f64,
}

impl SliceData {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for empty or mismatched inputs
    /// or non-finite values.
    pub fn new(x: Vec<f64>, w: Vec<f64>) -> error::Result<Self> {
        if x.is_empty() || x.len() != w.len() {
            return Err(VolSurfError::InvalidInput {
                message: format!(
                    "calibration needs matching non-empty x and w, got {} and {}",
                    x.len(),
                    w.len()
                ),
            });
        }
        if x.iter().chain(&w).any(|v| !v.is_finite()) {
            return Err(VolSurfError::InvalidInput {
                message: "log-moneyness and total variance must be finite".into(),
            });
        }
        let w_max = w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self { x, w, w_max })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn w(&self) -> &[f64] {
        &self.w
    }

    pub fn x_range(&self) -> (f64, f64) {
        let lo = self.x.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = self.x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    }

    fn columns(&self, m: f64, sigma: f64) -> impl Iterator<Item = (Vector3<f64>, f64)> + '_ {
        self.x.iter().zip(&self.w).map(move |(&x, &w)| {
            let u = (x - m) / sigma;
            let v = (u * u + 1.0).sqrt();
            (Vector3::new(1.0, 0.5 * (v + u), 0.5 * (v - u)), w)
        })
    }

    /// Stage-1 fit at `(m, σ)`.
    ///
    /// Returns `None` when `σ` is not positive or the fit is not finite.
    pub fn fit(&self, m: f64, sigma: f64) -> Option<InnerFit> {
        if !(sigma > 0.0) || !m.is_finite() || !sigma.is_finite() {
            return None;
        }
        let mut gram = Matrix3::zeros();
        let mut rhs = Vector3::zeros();
        let mut ww = 0.0;
        for (col, w) in self.columns(m, sigma) {
            gram += col * col.transpose();
            rhs += col * w;
            ww += w * w;
        }

        let upper = Vector3::new(self.w_max, 4.0 * sigma, 4.0 * sigma);
        let lower = Vector3::new(f64::NEG_INFINITY, 0.0, 0.0);
        let tol = Vector3::new(
            1e-12 * self.w_max.abs().max(1.0),
            1e-12 * upper[1].max(1e-300),
            1e-12 * upper[2].max(1e-300),
        );

        let mut best: Option<(Vector3<f64>, f64)> = None;
        for &sa in &A_STATES {
            for &sp in &PQ_STATES {
                for &sq in &PQ_STATES {
                    let states = [sa, sp, sq];
                    let Some(z) = solve_face(&gram, &rhs, &states, &lower, &upper) else {
                        continue;
                    };
                    let feasible =
                        (0..3).all(|i| z[i] >= lower[i] - tol[i] && z[i] <= upper[i] + tol[i]);
                    if !feasible {
                        continue;
                    }
                    let z = Vector3::from_fn(|i, _| z[i].clamp(lower[i], upper[i]));
                    // ½‖Az − w‖² expanded through the Gram matrix
                    let value = 0.5 * (z.dot(&(gram * z)) - 2.0 * z.dot(&rhs) + ww);
                    if best.is_none_or(|(_, v)| value < v) {
                        best = Some((z, value));
                    }
                }
            }
        }

        let (z, _) = best?;
        let objective = 0.5
            * self
                .columns(m, sigma)
                .map(|(col, w)| (col.dot(&z) - w).powi(2))
                .sum::<f64>();
        let (a, p, q) = (z[0], z[1], z[2]);
        let fit = InnerFit {
            a,
            d: 0.5 * (p - q),
            c: 0.5 * (p + q),
            objective,
        };
        (fit.objective.is_finite() && a.is_finite()).then_some(fit)
    }
}

/// Minimize over one face: fixed variables sit on their bound, free ones
/// satisfy the normal equations of the reduced problem.
fn solve_face(
    gram: &Matrix3<f64>,
    rhs: &Vector3<f64>,
    states: &[Bound; 3],
    lower: &Vector3<f64>,
    upper: &Vector3<f64>,
) -> Option<Vector3<f64>> {
    let mut system = *gram;
    let mut target = *rhs;
    for (i, state) in states.iter().enumerate() {
        let value = match state {
            Bound::Free => continue,
            Bound::Lower => lower[i],
            Bound::Upper => upper[i],
        };
        if !value.is_finite() {
            return None;
        }
        system.set_row(i, &Vector3::ith(i, 1.0).transpose());
        target[i] = value;
    }
    if let Some(z) = system.lu().solve(&target) {
        if z.iter().all(|v| v.is_finite()) {
            return Some(z);
        }
    }
    // Singular reduced system: take the minimum-norm solution.
    system
        .svd(true, true)
        .solve(&target, 1e-14)
        .ok()
        .filter(|z| z.iter().all(|v| v.is_finite()))
}
