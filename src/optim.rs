//! Internal optimization utilities for smile calibration.
//!
//! A 2D Nelder-Mead simplex used as the local refinement step of the
//! global `(m, σ)` search. Objectives signal infeasible points by returning
//! `f64::MAX`; non-finite values sort last. The simplex stops once both its
//! diameter and its spread of objective values are below tolerance.

use crate::config::LocalSearchConfig;

/// Result of a 2D Nelder-Mead optimization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NelderMeadResult {
    /// Best vertex.
    pub point: [f64; 2],
    /// Objective value at the best vertex.
    pub fval: f64,
    /// Objective evaluations spent.
    pub evaluations: usize,
}

/// Minimize `objective` over the plane with the Nelder-Mead simplex method.
///
/// Starts from `start` with initial perturbations `steps` to form the
/// initial simplex. Returns the best vertex found.
pub(crate) fn nelder_mead_2d<F>(
    mut objective: F,
    start: [f64; 2],
    steps: [f64; 2],
    config: &LocalSearchConfig,
) -> NelderMeadResult
where
    F: FnMut([f64; 2]) -> f64,
{
    let mut evaluations = 0usize;
    let mut eval = |p: [f64; 2]| {
        evaluations += 1;
        let v = objective(p);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    let [x0, y0] = start;
    let mut simplex = [start, [x0 + steps[0], y0], [x0, y0 + steps[1]]];
    let mut f_vals = [eval(simplex[0]), eval(simplex[1]), eval(simplex[2])];

    for _ in 0..config.max_iter {
        let mut idx = [0usize, 1, 2];
        idx.sort_by(|&a, &b| f_vals[a].total_cmp(&f_vals[b]));
        simplex = [simplex[idx[0]], simplex[idx[1]], simplex[idx[2]]];
        f_vals = [f_vals[idx[0]], f_vals[idx[1]], f_vals[idx[2]]];

        let diameter = simplex
            .iter()
            .flat_map(|a| {
                simplex
                    .iter()
                    .map(move |b| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt())
            })
            .fold(0.0_f64, f64::max);
        let f_spread = f_vals[2] - f_vals[0];
        if diameter < config.diameter_tol && f_spread < config.fvalue_tol {
            break;
        }

        // Centroid of best two
        let c = [
            (simplex[0][0] + simplex[1][0]) / 2.0,
            (simplex[0][1] + simplex[1][1]) / 2.0,
        ];
        let toward = |p: [f64; 2], t: f64| [c[0] + t * (p[0] - c[0]), c[1] + t * (p[1] - c[1])];

        let reflected = toward(simplex[2], -1.0);
        let fr = eval(reflected);

        if fr < f_vals[1] && fr >= f_vals[0] {
            simplex[2] = reflected;
            f_vals[2] = fr;
        } else if fr < f_vals[0] {
            let expanded = toward(simplex[2], -2.0);
            let fe = eval(expanded);
            if fe < fr {
                simplex[2] = expanded;
                f_vals[2] = fe;
            } else {
                simplex[2] = reflected;
                f_vals[2] = fr;
            }
        } else {
            let contracted = if fr < f_vals[2] {
                toward(reflected, 0.5)
            } else {
                toward(simplex[2], 0.5)
            };
            let fh = eval(contracted);
            if fh < f_vals[2].min(fr) {
                simplex[2] = contracted;
                f_vals[2] = fh;
            } else {
                // Shrink toward best vertex
                for j in 1..3 {
                    simplex[j][0] = simplex[0][0] + 0.5 * (simplex[j][0] - simplex[0][0]);
                    simplex[j][1] = simplex[0][1] + 0.5 * (simplex[j][1] - simplex[0][1]);
                    f_vals[j] = eval(simplex[j]);
                }
            }
        }
    }

    let best = (0..3)
        .min_by(|&a, &b| f_vals[a].total_cmp(&f_vals[b]))
        .unwrap_or(0);
    NelderMeadResult {
        point: simplex[best],
        fval: f_vals[best],
        evaluations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn minimizes_shifted_quadratic() {
        let config = LocalSearchConfig::default();
        let res = nelder_mead_2d(
            |[x, y]| (x - 1.5).powi(2) + 3.0 * (y + 0.25).powi(2),
            [0.0, 0.0],
            [0.5, 0.5],
            &config,
        );
        assert_abs_diff_eq!(res.point[0], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(res.point[1], -0.25, epsilon = 1e-6);
        assert!(res.evaluations > 3);
    }

    #[test]
    fn respects_infeasible_barrier() {
        // Unconstrained optimum at y = -1 is walled off below y = 0.1.
        let config = LocalSearchConfig::default();
        let res = nelder_mead_2d(
            |[x, y]| {
                if y < 0.1 {
                    f64::MAX
                } else {
                    x * x + (y + 1.0).powi(2)
                }
            },
            [0.3, 0.5],
            [0.1, 0.1],
            &config,
        );
        assert!(res.point[1] >= 0.1);
        // Constrained optimum is (0, 0.1) with value 1.21.
        assert!(res.fval < 1.3, "fval = {}", res.fval);
    }

    #[test]
    fn nan_objective_never_wins() {
        let config = LocalSearchConfig::default();
        let res = nelder_mead_2d(
            |[x, y]| if x > 0.5 { f64::NAN } else { (x - 0.4).powi(2) + y * y },
            [0.0, 0.0],
            [0.2, 0.2],
            &config,
        );
        assert!(res.fval.is_finite());
        assert!(res.point[0] <= 0.5);
    }
}
