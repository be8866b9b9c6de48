//! Generalized simulated annealing over a 2D box ("dual annealing").
//!
//! Tsallis–Stariolo visiting distribution, the generalized Metropolis
//! acceptance rule and a Nelder-Mead local step, as in Xiang et al. The
//! search is deterministic for a given seed.
//!
//! # References
//! - Tsallis, C. & Stariolo, D. A. "Generalized Simulated Annealing" (1996)
//! - Xiang, Y., Gubian, S., Suomela, B. & Hoeng, J. "Generalized Simulated
//!   Annealing for Global Optimization: The GenSA Package" (2013)

use std::f64::consts::PI;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use statrs::function::gamma::ln_gamma;

use crate::config::{AnnealingConfig, LocalSearchConfig};
use crate::error::{Result, VolSurfError};
use crate::optim::nelder_mead_2d;

const DIM: usize = 2;
/// Visits beyond this magnitude are resampled uniformly below it.
const TAIL_LIMIT: f64 = 1e8;
const MIN_VISIT_BOUND: f64 = 1e-10;
/// Random restarts allowed when the starting energy is not finite.
const MAX_REINIT: usize = 1000;
const MAX_EVALUATIONS: usize = 10_000_000;
const NOT_IMPROVED_LIMIT: usize = 1000;

/// Axis-aligned search region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBox {
    pub lower: [f64; DIM],
    pub upper: [f64; DIM],
}

impl SearchBox {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for non-finite or inverted bounds.
    pub fn new(lower: [f64; DIM], upper: [f64; DIM]) -> Result<Self> {
        for i in 0..DIM {
            if !lower[i].is_finite() || !upper[i].is_finite() || lower[i] > upper[i] {
                return Err(VolSurfError::InvalidInput {
                    message: format!(
                        "search bounds must be finite with lower <= upper, got [{}, {}]",
                        lower[i], upper[i]
                    ),
                });
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, p: [f64; DIM]) -> bool {
        (0..DIM).all(|i| p[i] >= self.lower[i] && p[i] <= self.upper[i])
    }

    pub fn clamp(&self, p: [f64; DIM]) -> [f64; DIM] {
        std::array::from_fn(|i| p[i].clamp(self.lower[i], self.upper[i]))
    }

    fn width(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    /// Fold a coordinate back into `[lower, upper)` periodically.
    fn wrap(&self, i: usize, value: f64) -> f64 {
        let range = self.width(i);
        if !(range > 0.0) {
            return self.lower[i];
        }
        let shifted = (value - self.lower[i]) % range + range;
        let mut wrapped = shifted % range + self.lower[i];
        if (wrapped - self.lower[i]).abs() < MIN_VISIT_BOUND {
            wrapped += MIN_VISIT_BOUND;
        }
        wrapped.min(self.upper[i])
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> [f64; DIM] {
        std::array::from_fn(|i| self.lower[i] + rng.r#gen::<f64>() * self.width(i))
    }
}

/// Distorted Cauchy–Lorentz visiting distribution with parameter `q_v`.
#[derive(Debug, Clone, Copy)]
struct Visiting {
    qv: f64,
    factor4_p: f64,
    factor6: f64,
}

impl Visiting {
    fn new(qv: f64) -> Self {
        let factor2 = ((4.0 - qv) * (qv - 1.0).ln()).exp();
        let factor3 = ((2.0 - qv) * 2f64.ln() / (qv - 1.0)).exp();
        let factor4_p = PI.sqrt() * factor2 / (factor3 * (3.0 - qv));
        let factor5 = 1.0 / (qv - 1.0) - 0.5;
        let d1 = 2.0 - factor5;
        let factor6 = PI * (1.0 - factor5) / (PI * (1.0 - factor5)).sin() / ln_gamma(d1).exp();
        Self {
            qv,
            factor4_p,
            factor6,
        }
    }

    /// One draw of the step length at `temperature`.
    fn draw<R: Rng>(&self, rng: &mut R, temperature: f64) -> f64 {
        let qv = self.qv;
        let x: f64 = rng.sample(StandardNormal);
        let y: f64 = rng.sample(StandardNormal);
        let factor1 = (temperature.ln() / (qv - 1.0)).exp();
        let factor4 = self.factor4_p * factor1;
        let x = x * (-(qv - 1.0) * (self.factor6 / factor4).ln() / (3.0 - qv)).exp();
        let den = ((qv - 1.0) * y.abs().ln() / (3.0 - qv)).exp();
        let visit = x / den;
        if visit > TAIL_LIMIT {
            TAIL_LIMIT * rng.r#gen::<f64>()
        } else if visit < -TAIL_LIMIT {
            -TAIL_LIMIT * rng.r#gen::<f64>()
        } else {
            visit
        }
    }

    /// Steps `0..DIM` move every coordinate; steps `DIM..2·DIM` move the
    /// single coordinate `step − DIM`.
    fn visit<R: Rng>(
        &self,
        rng: &mut R,
        bounds: &SearchBox,
        x: [f64; DIM],
        step: usize,
        temperature: f64,
    ) -> [f64; DIM] {
        if step < DIM {
            std::array::from_fn(|i| bounds.wrap(i, x[i] + self.draw(rng, temperature)))
        } else {
            let mut next = x;
            let i = step - DIM;
            next[i] = bounds.wrap(i, x[i] + self.draw(rng, temperature));
            next
        }
    }
}

/// Best point of one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealOutcome {
    pub point: [f64; DIM],
    pub energy: f64,
    /// Temperature steps completed.
    pub iterations: usize,
    pub evaluations: usize,
    /// The deadline cut the search short.
    pub timed_out: bool,
}

/// Why a search was abandoned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnnealAbort {
    /// No finite starting energy after repeated random restarts.
    NoFiniteStart,
    /// The objective returned a non-finite value at a visited point.
    NonFiniteEnergy { point: [f64; DIM], best: Option<f64> },
}

/// Dual-annealing minimizer for a 2D objective.
#[derive(Debug, Clone, Copy)]
pub struct DualAnnealing {
    bounds: SearchBox,
    annealing: AnnealingConfig,
    local: LocalSearchConfig,
    deadline: Option<Instant>,
}

impl DualAnnealing {
    pub fn new(bounds: SearchBox, annealing: AnnealingConfig, local: LocalSearchConfig) -> Self {
        Self {
            bounds,
            annealing,
            local,
            deadline: None,
        }
    }

    /// Stop at `deadline`, returning the best point found so far.
    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Minimize `objective` starting from `x0` (clamped into the box) or a
    /// random point.
    pub fn minimize<F>(
        &self,
        objective: F,
        x0: Option<[f64; DIM]>,
        seed: u64,
    ) -> std::result::Result<AnnealOutcome, AnnealAbort>
    where
        F: FnMut([f64; DIM]) -> f64,
    {
        let cfg = &self.annealing;
        let visiting = Visiting::new(cfg.visit);
        let mut search = Search::start(self, objective, x0, seed)?;

        let qv1 = cfg.visit - 1.0;
        let t1 = (qv1 * 2f64.ln()).exp() - 1.0;
        let restart_temp = cfg.initial_temp * cfg.restart_temp_ratio;
        let mut iteration = 0;
        let mut timed_out = false;

        'outer: while iteration < cfg.max_iter {
            for i in 0..cfg.max_iter {
                let t2 = (qv1 * (i as f64 + 2.0).ln()).exp() - 1.0;
                let temperature = cfg.initial_temp * t1 / t2;
                if iteration >= cfg.max_iter {
                    break 'outer;
                }
                if self.deadline.is_some_and(|d| Instant::now() >= d) {
                    timed_out = true;
                    break 'outer;
                }
                if temperature < restart_temp {
                    search.reset(None)?;
                    continue 'outer;
                }
                if search.chain(&visiting, i, temperature)? || search.local_step() {
                    break 'outer;
                }
                iteration += 1;
            }
        }

        Ok(AnnealOutcome {
            point: search.best,
            energy: search.best_energy,
            iterations: iteration,
            evaluations: search.evaluations,
            timed_out,
        })
    }
}

/// Mutable state of one search: energy bookkeeping plus the Markov chain.
struct Search<F> {
    objective: F,
    rng: StdRng,
    bounds: SearchBox,
    local: LocalSearchConfig,
    accept: f64,
    evaluations: usize,
    current: [f64; DIM],
    current_energy: f64,
    best: [f64; DIM],
    best_energy: f64,
    xmin: [f64; DIM],
    emin: f64,
    not_improved: usize,
    not_improved_max: usize,
    temperature_step: f64,
    improved: bool,
}

impl<F: FnMut([f64; DIM]) -> f64> Search<F> {
    fn start(
        owner: &DualAnnealing,
        objective: F,
        x0: Option<[f64; DIM]>,
        seed: u64,
    ) -> std::result::Result<Self, AnnealAbort> {
        let mut search = Self {
            objective,
            rng: StdRng::seed_from_u64(seed),
            bounds: owner.bounds,
            local: owner.local,
            accept: owner.annealing.accept,
            evaluations: 0,
            current: [0.0; DIM],
            current_energy: f64::INFINITY,
            best: [0.0; DIM],
            best_energy: f64::INFINITY,
            xmin: [0.0; DIM],
            emin: f64::INFINITY,
            not_improved: 0,
            not_improved_max: NOT_IMPROVED_LIMIT,
            temperature_step: 0.0,
            improved: false,
        };
        search.reset(x0.map(|p| owner.bounds.clamp(p)))?;
        search.best = search.current;
        search.best_energy = search.current_energy;
        search.xmin = search.current;
        search.emin = search.current_energy;
        Ok(search)
    }

    fn energy(&mut self, x: [f64; DIM]) -> f64 {
        self.evaluations += 1;
        (self.objective)(x)
    }

    /// Move the chain to `x0` or a random point with finite energy.
    fn reset(&mut self, x0: Option<[f64; DIM]>) -> std::result::Result<(), AnnealAbort> {
        let mut x = match x0 {
            Some(x) => x,
            None => self.bounds.sample(&mut self.rng),
        };
        for _ in 0..=MAX_REINIT {
            let e = self.energy(x);
            if e.is_finite() {
                self.current = x;
                self.current_energy = e;
                return Ok(());
            }
            x = self.bounds.sample(&mut self.rng);
        }
        Err(AnnealAbort::NoFiniteStart)
    }

    fn improve_best(&mut self, e: f64, x: [f64; DIM]) {
        self.best = x;
        self.best_energy = e;
    }

    /// One temperature step of `2·DIM` visits. Returns `true` once the
    /// evaluation budget is spent.
    fn chain(
        &mut self,
        visiting: &Visiting,
        step: usize,
        temperature: f64,
    ) -> std::result::Result<bool, AnnealAbort> {
        self.temperature_step = temperature / (step as f64 + 1.0);
        self.not_improved += 1;
        self.improved = step == 0;
        for j in 0..2 * DIM {
            let candidate = visiting.visit(&mut self.rng, &self.bounds, self.current, j, temperature);
            let e = self.energy(candidate);
            if !e.is_finite() {
                return Err(AnnealAbort::NonFiniteEnergy {
                    point: candidate,
                    best: self.best_energy.is_finite().then_some(self.best_energy),
                });
            }
            if e < self.current_energy {
                self.current = candidate;
                self.current_energy = e;
                if e < self.best_energy {
                    self.improve_best(e, candidate);
                    self.improved = true;
                    self.not_improved = 0;
                }
            } else {
                self.accept_reject(j, e, candidate);
            }
            if self.evaluations >= MAX_EVALUATIONS {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn accept_reject(&mut self, j: usize, e: f64, candidate: [f64; DIM]) {
        let r: f64 = self.rng.r#gen();
        let qa = self.accept;
        let base = 1.0 - (1.0 - qa) * (e - self.current_energy) / self.temperature_step;
        let p = if base <= 0.0 {
            0.0
        } else {
            (base.ln() / (1.0 - qa)).exp()
        };
        if r <= p {
            self.current = candidate;
            self.current_energy = e;
            self.xmin = candidate;
        }
        if self.not_improved >= self.not_improved_max && (j == 0 || self.current_energy < self.emin)
        {
            self.emin = self.current_energy;
            self.xmin = self.current;
        }
    }

    /// Local refinement after a chain. Returns `true` once the evaluation
    /// budget is spent.
    fn local_step(&mut self) -> bool {
        if self.improved {
            let (e, x) = self.local_search(self.best, self.best_energy);
            if e < self.best_energy {
                self.not_improved = 0;
                self.improve_best(e, x);
                self.current = x;
                self.current_energy = e;
            }
        }
        if self.not_improved >= self.not_improved_max {
            let (e, x) = self.local_search(self.xmin, self.emin);
            self.xmin = x;
            self.emin = e;
            self.not_improved = 0;
            self.not_improved_max = DIM;
            if e < self.best_energy {
                self.improve_best(e, x);
                self.current = x;
                self.current_energy = e;
            }
        }
        self.evaluations >= MAX_EVALUATIONS
    }

    /// Nelder-Mead from `x`; the result is kept only when it is finite, in
    /// bounds and better than `e`.
    fn local_search(&mut self, x: [f64; DIM], e: f64) -> (f64, [f64; DIM]) {
        let bounds = self.bounds;
        let steps: [f64; DIM] = std::array::from_fn(|i| {
            if bounds.width(i) == 0.0 {
                0.0
            } else if x[i] != 0.0 {
                0.05 * x[i]
            } else {
                0.00025
            }
        });
        let objective = &mut self.objective;
        let result = nelder_mead_2d(
            |p| {
                if bounds.contains(p) {
                    objective(p)
                } else {
                    f64::MAX
                }
            },
            x,
            steps,
            &self.local,
        );
        self.evaluations += result.evaluations;
        let valid = result.fval.is_finite()
            && result.point.iter().all(|v| v.is_finite())
            && bounds.contains(result.point);
        if valid && result.fval < e {
            (result.fval, result.point)
        } else {
            (e, x)
        }
    }
}
