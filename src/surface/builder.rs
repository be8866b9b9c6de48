//! Ergonomic builder API for running the surface pipeline.
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use svisurf::market::{FlatDiscount, QuoteTable};
//! use svisurf::surface::SurfaceBuilder;
//!
//! let table = QuoteTable::from_csv_path("quotes.csv")?;
//! let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(16, 0, 0).unwrap();
//!
//! let outcome = SurfaceBuilder::new()
//!     .as_of(as_of)
//!     .discount_curve(FlatDiscount(0.99))
//!     .build(&table)?;
//!
//! for surface in &outcome.surfaces {
//!     println!("{}: {}", surface.underlying, surface.arbitrage.summary());
//! }
//! # Ok::<(), svisurf::VolSurfError>(())
//! ```

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::calibration::SviCalibrator;
use crate::config::SurfaceConfig;
use crate::conventions::{YearFractions, days_to_expiry, seconds_to_expiry};
use crate::error::{Result, VolSurfError};
use crate::forward::estimate_forward;
use crate::history::CalibrationHistory;
use crate::market::{DiscountCurve, ExpiryQuotes, FlatDiscount, QuoteTable};
use crate::reconstruct::PriceReconstructor;
use crate::smile::SmileBuilder;
use crate::surface::arbitrage::ArbitrageValidator;
use crate::surface::{BatchFailure, BatchOutcome, Omission, OmissionReason, Surface, SurfaceSlice};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Builder for calibrating SVI surfaces from a quote table.
///
/// Holds the run settings: the policy config, the snapshot timestamp, the
/// discount curve and an optional warm-start history. Expiries of one
/// underlying are processed independently (in parallel with the `parallel`
/// feature); the arbitrage checks run once all of them are done.
#[derive(Debug, Clone)]
pub struct SurfaceBuilder {
    config: SurfaceConfig,
    as_of: Option<NaiveDateTime>,
    discount_curve: Arc<dyn DiscountCurve>,
    history: Option<CalibrationHistory>,
}

/// Per-run pipeline stages, built once from the config.
struct Stages {
    smile: SmileBuilder,
    calibrator: SviCalibrator,
    reconstructor: PriceReconstructor,
    validator: ArbitrageValidator,
}

impl SurfaceBuilder {
    /// Create a builder with default config and a unit discount factor.
    pub fn new() -> Self {
        Self {
            config: SurfaceConfig::default(),
            as_of: None,
            discount_curve: Arc::new(FlatDiscount::default()),
            history: None,
        }
    }

    pub fn config(mut self, config: SurfaceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the snapshot timestamp. Required.
    pub fn as_of(mut self, as_of: NaiveDateTime) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn discount_curve(mut self, curve: impl DiscountCurve + 'static) -> Self {
        self.discount_curve = Arc::new(curve);
        self
    }

    /// Warm-start each expiry's global search from previously fitted `(m, σ)`.
    pub fn history(mut self, history: CalibrationHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Calibrate every underlying of `table`.
    ///
    /// An underlying none of whose expiries could be calibrated is reported
    /// in [`BatchOutcome::failures`]; the others still produce surfaces.
    /// Rows the table rejected while loading are carried over into
    /// [`BatchOutcome::rejected`].
    ///
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] if the as-of timestamp is
    /// missing or the config is inconsistent.
    pub fn build(&self, table: &QuoteTable) -> Result<BatchOutcome> {
        let (stages, as_of) = self.prepare()?;
        let mut outcome = BatchOutcome {
            rejected: table.rejected().to_vec(),
            ..BatchOutcome::default()
        };
        #[cfg(feature = "logging")]
        for row in &outcome.rejected {
            tracing::warn!(ticker = ?row.ticker, expiry = ?row.expiry, "quote row rejected: {row}");
        }
        for ticker in table.underlyings() {
            match self.run_underlying(&stages, as_of, table, ticker) {
                Ok(surface) => outcome.surfaces.push(surface),
                Err(err) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!(underlying = ticker, error = %err, "underlying failed");
                    outcome.failures.push(BatchFailure {
                        underlying: ticker.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        #[cfg(feature = "logging")]
        tracing::info!(
            surfaces = outcome.surfaces.len(),
            failures = outcome.failures.len(),
            rejected_rows = outcome.rejected.len(),
            "batch complete"
        );

        Ok(outcome)
    }

    /// Calibrate a single underlying.
    ///
    /// # Errors
    /// - [`VolSurfError::InvalidInput`] for a missing as-of or bad config
    /// - [`VolSurfError::DataError`] if `ticker` has no quotes or none of
    ///   its expiries could be calibrated
    pub fn build_underlying(&self, table: &QuoteTable, ticker: &str) -> Result<Surface> {
        let (stages, as_of) = self.prepare()?;
        self.run_underlying(&stages, as_of, table, ticker)
    }

    fn prepare(&self) -> Result<(Stages, NaiveDateTime)> {
        let as_of = self.as_of.ok_or_else(|| VolSurfError::InvalidInput {
            message: "as-of timestamp is required".into(),
        })?;
        self.config.validate()?;
        let cfg = &self.config;
        let stages = Stages {
            smile: SmileBuilder::new(cfg.solver, cfg.filter)?,
            calibrator: SviCalibrator::new(cfg.calibration, cfg.grid)?,
            reconstructor: PriceReconstructor::new(cfg.reconstruction),
            validator: ArbitrageValidator::new(cfg.g_function),
        };
        Ok((stages, as_of))
    }

    fn run_underlying(
        &self,
        stages: &Stages,
        as_of: NaiveDateTime,
        table: &QuoteTable,
        ticker: &str,
    ) -> Result<Surface> {
        let chains = table.expiries_for(ticker);
        let spot = chains
            .first()
            .and_then(|c| c.spot())
            .ok_or_else(|| VolSurfError::data(format!("no quotes for underlying {ticker}"), None))?;

        #[cfg(feature = "logging")]
        tracing::debug!(underlying = ticker, expiries = chains.len(), "surface build started");

        let process = |chain: &ExpiryQuotes<'_>| {
            let seconds = seconds_to_expiry(as_of, chain.expiry);
            let outcome = if seconds <= 0 {
                Err(OmissionReason::Expired {
                    days: days_to_expiry(as_of, chain.expiry),
                })
            } else if seconds < 86_400 {
                Err(OmissionReason::WithinOneDay { seconds })
            } else {
                self.calibrate_expiry(stages, as_of, chain)
                    .map_err(OmissionReason::from)
            };
            (chain.expiry, outcome)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<_> = chains.par_iter().map(process).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = chains.iter().map(process).collect();

        let mut slices = Vec::with_capacity(results.len());
        let mut omissions = Vec::new();
        for (expiry, outcome) in results {
            match outcome {
                Ok(slice) => slices.push(slice),
                Err(reason) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!(underlying = ticker, %expiry, %reason, "expiry omitted");
                    omissions.push(Omission { expiry, reason });
                }
            }
        }
        if slices.is_empty() {
            let detail: Vec<String> = omissions
                .iter()
                .map(|o| format!("{}: {}", o.expiry, o.reason))
                .collect();
            return Err(VolSurfError::data(
                format!("no expiry of {ticker} could be calibrated ({})", detail.join("; ")),
                None,
            ));
        }
        slices.sort_by_key(|s| s.expiry);

        let params: Vec<_> = slices.iter().map(|s| (s.expiry, s.fit.params)).collect();
        let prices: Vec<_> = slices.iter().flat_map(|s| s.prices.iter().cloned()).collect();
        let arbitrage = stages.validator.validate(&params, &prices);

        #[cfg(feature = "logging")]
        tracing::info!(
            underlying = ticker,
            slices = slices.len(),
            omitted = omissions.len(),
            arbitrage_free = arbitrage.is_free(),
            "surface built"
        );

        Ok(Surface {
            underlying: ticker.to_string(),
            as_of,
            spot,
            slices,
            omissions,
            arbitrage,
        })
    }

    fn calibrate_expiry(
        &self,
        stages: &Stages,
        as_of: NaiveDateTime,
        chain: &ExpiryQuotes<'_>,
    ) -> Result<SurfaceSlice> {
        let year_fractions = YearFractions::between(as_of, chain.expiry);
        let discount_factor = self
            .discount_curve
            .discount_factor(chain.expiry)
            .map_err(|e| match e {
                VolSurfError::InvalidInput { message } => VolSurfError::data(message, Some(chain.expiry)),
                other => other,
            })?;
        let forward = estimate_forward(chain, discount_factor, year_fractions.act365)?;
        let smile = stages
            .smile
            .build(chain, forward, discount_factor, year_fractions)?;
        let warm_start = self
            .history
            .as_ref()
            .and_then(|h| h.get(chain.ticker, chain.expiry))
            .map(|e| &e.params);
        let fit = stages.calibrator.calibrate(&smile, warm_start)?;
        let prices = stages.reconstructor.reconstruct(&fit, &smile, chain)?;
        Ok(SurfaceSlice {
            expiry: chain.expiry,
            year_fractions,
            forward,
            discount_factor,
            smile,
            fit,
            prices,
        })
    }
}

impl Default for SurfaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implied::black_price;
    use crate::market::Quote;
    use crate::smile::{SmileSection, SviParameters};
    use crate::types::OptionType;
    use chrono::NaiveDate;

    const SPOT: f64 = 100.0;

    fn as_of() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(16, 0, 0)
            .unwrap()
    }

    fn params() -> SviParameters {
        SviParameters::new(0.01, 0.1, -0.4, 0.0, 0.2).unwrap()
    }

    /// Calls and puts at every strike, priced off `params()` with DF = 1.
    fn chain(ticker: &str, expiry: NaiveDate, strikes: &[f64]) -> Vec<Quote> {
        let t = YearFractions::between(as_of(), expiry).act365;
        let mut quotes = Vec::new();
        for &k in strikes {
            let iv = params().implied_vol((k / SPOT).ln(), t).unwrap();
            for kind in [OptionType::Call, OptionType::Put] {
                let px = black_price(SPOT, k, iv, t, kind).unwrap();
                quotes.push(Quote {
                    ticker: ticker.into(),
                    expiry,
                    strike: k,
                    option_type: kind,
                    bid: px * 0.98,
                    ask: px * 1.02,
                    mid: Some(px),
                    last_trade: None,
                    spot: SPOT,
                    dividend_yield: 0.0,
                });
            }
        }
        quotes
    }

    fn strikes() -> Vec<f64> {
        (0..13).map(|i| 70.0 + 5.0 * i as f64).collect()
    }

    fn june() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    fn table() -> QuoteTable {
        QuoteTable::new(chain("SPY", june(), &strikes()))
    }

    #[test]
    fn builds_surface_from_synthetic_chain() {
        let surface = SurfaceBuilder::new()
            .as_of(as_of())
            .build_underlying(&table(), "SPY")
            .unwrap();
        assert_eq!(surface.expiries(), vec![june()]);
        assert_eq!(surface.spot, SPOT);
        assert!(surface.omissions.is_empty());
        let slice = surface.slice(june()).unwrap();
        assert!(slice.fit.max_abs_band_error.abs() < 1e-2);
        assert!(!slice.prices.is_empty());
        let t = slice.time_to_expiry();
        let expected = params().implied_vol((95.0_f64 / SPOT).ln(), t).unwrap();
        let vol = surface.vol(june(), 95.0).unwrap();
        assert!((vol.0 - expected).abs() < 5e-3, "{} vs {expected}", vol.0);
    }

    #[test]
    fn expired_and_empty_expiries_become_omissions() {
        let past = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let far = NaiveDate::from_ymd_opt(2024, 9, 20).unwrap();
        let mut quotes = chain("SPY", june(), &strikes());
        // only a strike outside the moneyness band
        quotes.extend(chain("SPY", far, &[1_000.0]));
        for expiry in [past, tomorrow] {
            quotes.extend(chain("SPY", june(), &[100.0]).into_iter().map(|mut q| {
                q.expiry = expiry;
                q
            }));
        }
        let table = QuoteTable::new(quotes);
        let surface = SurfaceBuilder::new()
            .as_of(as_of())
            .build_underlying(&table, "SPY")
            .unwrap();
        assert_eq!(surface.expiries(), vec![june()]);
        assert_eq!(surface.omissions.len(), 3);
        assert!(matches!(
            surface.omissions[0].reason,
            OmissionReason::Expired { days } if days < 0
        ));
        // 16:00 to midnight
        assert_eq!(surface.omissions[1].expiry, tomorrow);
        assert_eq!(
            surface.omissions[1].reason,
            OmissionReason::WithinOneDay { seconds: 8 * 3600 }
        );
        assert_eq!(surface.omissions[2].expiry, far);
        assert!(matches!(surface.omissions[2].reason, OmissionReason::Data { .. }));
    }

    #[test]
    fn failed_calibration_is_omitted_and_siblings_survive() {
        // Total variance climbs 0.4 over 0.05 of log-moneyness on both wings.
        // SVI wing slopes are capped at 4, so the best fit dips far below
        // zero at the money and every attempt is rejected.
        let far = NaiveDate::from_ymd_opt(2024, 9, 20).unwrap();
        let t = YearFractions::between(as_of(), far).act365;
        let mut quotes = chain("SPY", june(), &strikes());
        for (x, w) in [(-0.5, 0.5), (-0.45, 0.1), (0.45, 0.1), (0.5, 0.5)] {
            let (k, iv) = (SPOT * f64::exp(x), f64::sqrt(w / t));
            for kind in [OptionType::Call, OptionType::Put] {
                let px = black_price(SPOT, k, iv, t, kind).unwrap();
                quotes.push(Quote {
                    ticker: "SPY".into(),
                    expiry: far,
                    strike: k,
                    option_type: kind,
                    bid: px * 0.99,
                    ask: px * 1.01,
                    mid: Some(px),
                    last_trade: None,
                    spot: SPOT,
                    dividend_yield: 0.0,
                });
            }
        }
        let mut config = SurfaceConfig::default();
        config.calibration.max_attempts = 2;
        let surface = SurfaceBuilder::new()
            .as_of(as_of())
            .config(config)
            .build_underlying(&QuoteTable::new(quotes), "SPY")
            .unwrap();

        assert_eq!(surface.expiries(), vec![june()]);
        assert_eq!(surface.omissions.len(), 1);
        assert_eq!(surface.omissions[0].expiry, far);
        match &surface.omissions[0].reason {
            OmissionReason::CalibrationFailure { attempts, message, .. } => {
                assert_eq!(*attempts, 2);
                assert!(message.contains("negative"), "{message}");
            }
            other => panic!("expected CalibrationFailure, got {other:?}"),
        }
    }

    #[test]
    fn batch_collects_surfaces_and_failures() {
        let mut quotes = chain("SPY", june(), &strikes());
        quotes.extend(chain("QQQ", june(), &[1_000.0]));
        let table = QuoteTable::new(quotes);
        let outcome = SurfaceBuilder::new().as_of(as_of()).build(&table).unwrap();
        assert_eq!(outcome.surfaces.len(), 1);
        assert!(outcome.surface("SPY").is_some());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].underlying, "QQQ");
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn rejected_rows_reach_the_outcome() {
        let mut quotes = chain("SPY", june(), &strikes());
        let mut bad = chain("QQQ", june(), &[100.0]);
        bad[0].strike = 0.0;
        quotes.extend(bad);
        let table = QuoteTable::new(quotes);
        assert_eq!(table.rejected().len(), 1);

        let outcome = SurfaceBuilder::new().as_of(as_of()).build(&table).unwrap();
        assert!(outcome.surface("SPY").is_some());
        assert_eq!(outcome.rejected, table.rejected());
        assert_eq!(outcome.rejected[0].ticker.as_deref(), Some("QQQ"));
    }

    #[test]
    fn history_round_trip_through_builder() {
        let table = table();
        let first = SurfaceBuilder::new()
            .as_of(as_of())
            .build_underlying(&table, "SPY")
            .unwrap();
        let mut history = CalibrationHistory::new();
        assert_eq!(history.absorb(&first), 1);

        let warm = SurfaceBuilder::new()
            .as_of(as_of())
            .history(history)
            .build_underlying(&table, "SPY")
            .unwrap();
        let (a, b) = (first.slices[0].params(), warm.slices[0].params());
        assert!((a.total_variance(0.0) - b.total_variance(0.0)).abs() < 1e-4);
    }

    #[test]
    fn missing_as_of_returns_invalid_input() {
        let err = SurfaceBuilder::new().build(&table()).unwrap_err();
        assert!(matches!(err, VolSurfError::InvalidInput { .. }));
    }

    #[test]
    fn invalid_config_returns_invalid_input() {
        let mut config = SurfaceConfig::default();
        config.calibration.max_attempts = 0;
        let err = SurfaceBuilder::new()
            .as_of(as_of())
            .config(config)
            .build(&table())
            .unwrap_err();
        assert!(matches!(err, VolSurfError::InvalidInput { .. }));
    }

    #[test]
    fn unknown_underlying_is_data_error() {
        let err = SurfaceBuilder::new()
            .as_of(as_of())
            .build_underlying(&table(), "IWM")
            .unwrap_err();
        assert!(matches!(err, VolSurfError::DataError { .. }));
    }

    #[test]
    fn discount_curve_scales_forward() {
        let surface = SurfaceBuilder::new()
            .as_of(as_of())
            .discount_curve(FlatDiscount(1.0))
            .build_underlying(&table(), "SPY")
            .unwrap();
        let slice = &surface.slices[0];
        assert_eq!(slice.discount_factor, 1.0);
        assert!((slice.forward.forward - SPOT).abs() < 1e-9);
        assert!(slice.fit.curve.vol(SPOT).is_ok());
    }

    #[test]
    fn default_is_same_as_new() {
        let a = SurfaceBuilder::default();
        let b = SurfaceBuilder::new();
        assert_eq!(a.config, b.config);
        assert_eq!(a.as_of, b.as_of);
    }
}
