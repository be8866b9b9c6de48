//! Smile construction: OTM selection, implied-vol inversion and cleaning.

use crate::config::{SmileFilter, SolverConfig};
use crate::conventions::YearFractions;
use crate::error::{Result, VolSurfError};
use crate::forward::ForwardEstimate;
use crate::implied::{BlackImpliedVol, black_delta};
use crate::market::ExpiryQuotes;
use crate::smile::{Smile, SmilePoint};
use crate::validate::validate_positive;

/// Turns the quotes of one expiry into a [`Smile`].
///
/// Steps, in order:
/// 1. keep OTM quotes (calls at `K ≥ F`, puts at `K < F`), sorted by strike
/// 2. drop strikes outside `[L·F, H·F]`
/// 3. invert `mid·DF` (and `bid·DF`, `ask·DF` when enabled) for Black-76 vols
/// 4. [`filter`](SmileBuilder::filter): drop negative bid/ask vols,
///    non-positive mid vols and strikes with `|δ| ≤ limit`
#[derive(Debug, Clone, Copy, Default)]
pub struct SmileBuilder {
    solver: BlackImpliedVol,
    filter: SmileFilter,
}

impl SmileBuilder {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for an invalid filter.
    pub fn new(solver: SolverConfig, filter: SmileFilter) -> Result<Self> {
        filter.validate()?;
        Ok(Self {
            solver: BlackImpliedVol::new(solver),
            filter,
        })
    }

    /// Build the smile of one expiry chain.
    ///
    /// # Errors
    /// Returns [`VolSurfError::DataError`] when no point survives filtering
    /// and [`VolSurfError::InvalidInput`] for a non-positive discount factor
    /// or year fraction.
    pub fn build(
        &self,
        chain: &ExpiryQuotes<'_>,
        forward: ForwardEstimate,
        discount_factor: f64,
        year_fractions: YearFractions,
    ) -> Result<Smile> {
        validate_positive(discount_factor, "discount factor")?;
        let t = validate_positive(year_fractions.act365, "time to expiry")?;
        let f = validate_positive(forward.forward, "forward")?;
        let (lo, hi) = self.filter.moneyness_band;

        let mut quotes: Vec<_> = chain
            .quotes
            .iter()
            .filter(|q| q.option_type.is_otm(q.strike, f))
            .filter(|q| q.strike >= lo * f && q.strike <= hi * f)
            .collect();
        quotes.sort_by(|a, b| a.strike.total_cmp(&b.strike));

        let mut points = Vec::with_capacity(quotes.len());
        for q in quotes {
            let kind = q.option_type;
            let invert = |premium: f64| {
                self.solver
                    .solve(premium * discount_factor, f, q.strike, t, kind)
            };
            let mid = q.mid();
            let mid_iv = invert(mid)?;
            let (bid_iv, ask_iv) = if self.filter.bid_ask {
                (Some(invert(q.bid)?.vol), Some(invert(q.ask)?.vol))
            } else {
                (None, None)
            };
            points.push(SmilePoint {
                strike: q.strike,
                option_type: kind,
                bid: q.bid,
                ask: q.ask,
                mid,
                mid_iv: mid_iv.vol,
                bid_iv,
                ask_iv,
                mid_status: mid_iv.status,
            });
        }

        let smile = self.filter(&Smile {
            expiry: chain.expiry,
            year_fractions,
            forward,
            discount_factor,
            points,
        });

        #[cfg(feature = "logging")]
        tracing::debug!(
            ticker = chain.ticker,
            expiry = %chain.expiry,
            quotes = chain.quotes.len(),
            retained = smile.len(),
            forward = f,
            "smile built"
        );

        if smile.is_empty() {
            return Err(VolSurfError::data(
                format!("{} smile is empty after filtering", chain.ticker),
                Some(chain.expiry),
            ));
        }
        Ok(smile)
    }

    /// Apply the point filters to an existing smile.
    ///
    /// Idempotent: a point's keep/drop decision depends only on its own
    /// strike and implied vols and on the smile's forward.
    pub fn filter(&self, smile: &Smile) -> Smile {
        let f = smile.forward_price();
        let t = smile.time_to_expiry();
        let (lo, hi) = self.filter.moneyness_band;
        let points = smile
            .points
            .iter()
            .filter(|p| p.strike >= lo * f && p.strike <= hi * f)
            .filter(|p| !p.bid_iv.is_some_and(|v| v < 0.0) && !p.ask_iv.is_some_and(|v| v < 0.0))
            .filter(|p| p.mid_iv.is_finite() && p.mid_iv > 0.0)
            .filter(|p| {
                black_delta(f, p.strike, p.mid_iv, t, p.option_type)
                    .is_ok_and(|delta| delta.abs() > self.filter.delta_limit)
            })
            .cloned()
            .collect();
        Smile {
            points,
            ..smile.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardMethod;
    use crate::implied::{SolveStatus, black_price};
    use crate::market::Quote;
    use crate::types::OptionType;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    const F: f64 = 100.0;
    const T: f64 = 0.5;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    fn fwd() -> ForwardEstimate {
        ForwardEstimate {
            forward: F,
            naive: F,
            method: ForwardMethod::Naive,
        }
    }

    fn yf() -> YearFractions {
        YearFractions {
            act360: T * 365.0 / 360.0,
            act365: T,
        }
    }

    fn smile_vol(k: f64) -> f64 {
        let x = (k / F).ln();
        0.2 + 0.3 * x * x - 0.1 * x
    }

    fn quote(strike: f64, kind: OptionType, df: f64) -> Quote {
        let mid = black_price(F, strike, smile_vol(strike), T, kind).unwrap() / df;
        Quote {
            ticker: "TEST".into(),
            expiry: expiry(),
            strike,
            option_type: kind,
            bid: mid * 0.98,
            ask: mid * 1.02,
            mid: None,
            last_trade: None,
            spot: F,
            dividend_yield: 0.0,
        }
    }

    fn chain_quotes(df: f64) -> Vec<Quote> {
        let mut qs = Vec::new();
        for k in [30.0, 60.0, 80.0, 90.0, 100.0, 110.0, 120.0, 150.0, 300.0] {
            qs.push(quote(k, OptionType::Call, df));
            qs.push(quote(k, OptionType::Put, df));
        }
        qs
    }

    fn build(qs: &[Quote], builder: &SmileBuilder, df: f64) -> Result<Smile> {
        let chain = ExpiryQuotes {
            ticker: "TEST",
            expiry: expiry(),
            quotes: qs.iter().collect(),
        };
        builder.build(&chain, fwd(), df, yf())
    }

    #[test]
    fn keeps_otm_side_within_band() {
        let qs = chain_quotes(1.0);
        let smile = build(&qs, &SmileBuilder::default(), 1.0).unwrap();
        assert_eq!(smile.strikes(), vec![60.0, 80.0, 90.0, 100.0, 110.0, 120.0, 150.0]);
        for p in &smile.points {
            assert!(p.option_type.is_otm(p.strike, F));
            assert_eq!(p.mid_status, SolveStatus::Converged);
            assert_abs_diff_eq!(p.mid_iv, smile_vol(p.strike), epsilon = 1e-4);
            let (bid_iv, ask_iv) = (p.bid_iv.unwrap(), p.ask_iv.unwrap());
            assert!(bid_iv < p.mid_iv && p.mid_iv < ask_iv);
        }
        assert_eq!(smile.points[0].option_type, OptionType::Put);
        assert_eq!(smile.points[3].option_type, OptionType::Call);
    }

    #[test]
    fn discount_factor_scales_premiums_into_forward_terms() {
        let qs = chain_quotes(0.9);
        let smile = build(&qs, &SmileBuilder::default(), 0.9).unwrap();
        for p in &smile.points {
            assert_abs_diff_eq!(p.mid_iv, smile_vol(p.strike), epsilon = 1e-4);
        }
    }

    #[test]
    fn drops_rows_with_negative_band_vols() {
        let qs = chain_quotes(1.0);
        let builder = SmileBuilder::default();
        let mut smile = build(&qs, &builder, 1.0).unwrap();
        let n = smile.len();
        smile.points[1].bid_iv = Some(-0.05);
        smile.points[4].ask_iv = Some(-0.3);
        let cleaned = builder.filter(&smile);
        assert_eq!(cleaned.len(), n - 2);
        assert!(cleaned.points.iter().all(|p| p.strike != smile.points[1].strike));
        assert!(cleaned.points.iter().all(|p| p.strike != smile.points[4].strike));
    }

    #[test]
    fn delta_filter_removes_deep_wings() {
        let qs = chain_quotes(1.0);
        let builder = SmileBuilder::new(
            SolverConfig::default(),
            SmileFilter {
                delta_limit: 0.05,
                ..SmileFilter::default()
            },
        )
        .unwrap();
        let smile = build(&qs, &builder, 1.0).unwrap();
        for p in &smile.points {
            let d = black_delta(F, p.strike, p.mid_iv, T, p.option_type).unwrap();
            assert!(d.abs() > 0.05);
        }
        assert!(smile.len() < 7);
    }

    #[test]
    fn filtering_is_idempotent() {
        let qs = chain_quotes(1.0);
        let builder = SmileBuilder::new(
            SolverConfig::default(),
            SmileFilter {
                moneyness_band: (0.7, 1.6),
                delta_limit: 0.02,
                bid_ask: true,
            },
        )
        .unwrap();
        let once = build(&qs, &builder, 1.0).unwrap();
        let twice = builder.filter(&once);
        assert_eq!(once, twice);
        assert_eq!(builder.filter(&twice), twice);
    }

    #[test]
    fn empty_smile_is_data_error() {
        let qs = vec![quote(500.0, OptionType::Call, 1.0)];
        match build(&qs, &SmileBuilder::default(), 1.0) {
            Err(VolSurfError::DataError { expiry: e, .. }) => assert_eq!(e, Some(expiry())),
            other => panic!("expected DataError, got {other:?}"),
        }
    }

    #[test]
    fn bid_ask_inversion_can_be_disabled() {
        let qs = chain_quotes(1.0);
        let builder = SmileBuilder::new(
            SolverConfig::default(),
            SmileFilter {
                bid_ask: false,
                ..SmileFilter::default()
            },
        )
        .unwrap();
        let smile = build(&qs, &builder, 1.0).unwrap();
        assert!(smile.points.iter().all(|p| p.bid_iv.is_none() && p.ask_iv.is_none()));
    }
}
