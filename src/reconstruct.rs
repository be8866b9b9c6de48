//! Re-pricing quotes off a calibrated SVI slice.
//!
//! Each quote is priced with Black-76 at the fitted vol of its
//! log-moneyness, converted back to present value with the expiry's
//! discount factor, and classified against the quoted `[bid, ask]`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calibration::SviFit;
use crate::config::ReconstructionScope;
use crate::conventions::log_moneyness;
use crate::error::Result;
use crate::implied::black_price;
use crate::market::ExpiryQuotes;
use crate::smile::Smile;
use crate::types::OptionType;
use crate::validate::validate_positive;

/// Where a reconstructed price sits relative to the quoted band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceBand {
    Inside,
    Below,
    Above,
}

impl PriceBand {
    pub fn classify(price: f64, bid: f64, ask: f64) -> Self {
        if price < bid {
            Self::Below
        } else if price > ask {
            Self::Above
        } else {
            Self::Inside
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inside => "inside",
            Self::Below => "below",
            Self::Above => "above",
        }
    }
}

/// One quote re-priced off the fitted curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedPrice {
    pub expiry: NaiveDate,
    pub strike: f64,
    pub option_type: OptionType,
    pub fitted_iv: f64,
    /// Present-value premium, comparable with `bid` and `ask`.
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub band: PriceBand,
}

impl ReconstructedPrice {
    pub fn half_spread(&self) -> f64 {
        0.5 * (self.ask - self.bid)
    }
}

/// Prices the quotes of one expiry from its calibrated slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceReconstructor {
    scope: ReconstructionScope,
}

impl PriceReconstructor {
    pub fn new(scope: ReconstructionScope) -> Self {
        Self { scope }
    }

    /// Reconstruct prices for the smile's retained points or, with
    /// [`ReconstructionScope::AllQuotes`], for every quote of `chain`.
    ///
    /// Quotes where the fitted total variance is negative are skipped.
    /// Output is ordered by strike, puts before calls at equal strikes.
    ///
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`](crate::VolSurfError::InvalidInput)
    /// for a non-positive forward, expiry or discount factor.
    pub fn reconstruct(
        &self,
        fit: &SviFit,
        smile: &Smile,
        chain: &ExpiryQuotes<'_>,
    ) -> Result<Vec<ReconstructedPrice>> {
        let f = validate_positive(smile.forward_price(), "forward")?;
        let t = validate_positive(smile.time_to_expiry(), "time to expiry")?;
        let df = validate_positive(smile.discount_factor, "discount factor")?;

        let rows: Vec<(f64, OptionType, f64, f64)> = match self.scope {
            ReconstructionScope::Retained => smile
                .points
                .iter()
                .map(|p| (p.strike, p.option_type, p.bid, p.ask))
                .collect(),
            ReconstructionScope::AllQuotes => chain
                .quotes
                .iter()
                .map(|q| (q.strike, q.option_type, q.bid, q.ask))
                .collect(),
        };

        let mut out = Vec::with_capacity(rows.len());
        for (strike, kind, bid, ask) in rows {
            let Some(iv) = fit.params.implied_vol(log_moneyness(strike, f), t) else {
                #[cfg(feature = "logging")]
                tracing::debug!(expiry = %smile.expiry, strike, "negative fitted variance, quote not repriced");
                continue;
            };
            let forward_premium = if iv > 0.0 {
                black_price(f, strike, iv, t, kind)?
            } else {
                (kind.sign() * (f - strike)).max(0.0)
            };
            let price = forward_premium / df;
            out.push(ReconstructedPrice {
                expiry: smile.expiry,
                strike,
                option_type: kind,
                fitted_iv: iv,
                price,
                bid,
                ask,
                band: PriceBand::classify(price, bid, ask),
            });
        }
        out.sort_by(|a, b| {
            a.strike
                .total_cmp(&b.strike)
                .then_with(|| (a.option_type == OptionType::Call).cmp(&(b.option_type == OptionType::Call)))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{SviFit, VarianceGrid};
    use crate::conventions::YearFractions;
    use crate::forward::{ForwardEstimate, ForwardMethod};
    use crate::implied::SolveStatus;
    use crate::market::Quote;
    use crate::smile::{SmilePoint, SviParameters, SviSmile};
    use approx::assert_abs_diff_eq;

    const F: f64 = 100.0;
    const T: f64 = 0.5;
    const DF: f64 = 0.98;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 20).unwrap()
    }

    fn params() -> SviParameters {
        SviParameters::new(0.02, 0.1, -0.3, 0.0, 0.2).unwrap()
    }

    fn fit() -> SviFit {
        let p = params();
        SviFit {
            expiry: expiry(),
            params: p,
            curve: SviSmile::new(F, T, p).unwrap(),
            objective: 0.0,
            attempts: 1,
            evaluations: 0,
            points: Vec::new(),
            max_abs_band_error: 0.0,
            grid: VarianceGrid::default(),
        }
    }

    fn model_pv(strike: f64, kind: OptionType) -> f64 {
        let iv = params().implied_vol((strike / F).ln(), T).unwrap();
        black_price(F, strike, iv, T, kind).unwrap() / DF
    }

    fn quote(strike: f64, kind: OptionType, bid: f64, ask: f64) -> Quote {
        Quote {
            ticker: "TEST".into(),
            expiry: expiry(),
            strike,
            option_type: kind,
            bid,
            ask,
            mid: None,
            last_trade: None,
            spot: F,
            dividend_yield: 0.0,
        }
    }

    fn smile_from(quotes: &[Quote]) -> Smile {
        Smile {
            expiry: expiry(),
            year_fractions: YearFractions {
                act360: T * 365.0 / 360.0,
                act365: T,
            },
            forward: ForwardEstimate {
                forward: F,
                naive: F,
                method: ForwardMethod::Naive,
            },
            discount_factor: DF,
            points: quotes
                .iter()
                .filter(|q| q.option_type.is_otm(q.strike, F))
                .map(|q| SmilePoint {
                    strike: q.strike,
                    option_type: q.option_type,
                    bid: q.bid,
                    ask: q.ask,
                    mid: q.mid(),
                    mid_iv: 0.2,
                    bid_iv: None,
                    ask_iv: None,
                    mid_status: SolveStatus::Converged,
                })
                .collect(),
        }
    }

    fn market() -> Vec<Quote> {
        let put90 = model_pv(90.0, OptionType::Put);
        let call110 = model_pv(110.0, OptionType::Call);
        let call120 = model_pv(120.0, OptionType::Call);
        let call90 = model_pv(90.0, OptionType::Call);
        vec![
            // band brackets the model price
            quote(90.0, OptionType::Put, put90 - 0.1, put90 + 0.1),
            // market above the model
            quote(110.0, OptionType::Call, call110 + 0.5, call110 + 0.6),
            // market below the model
            quote(120.0, OptionType::Call, call120 - 0.3, call120 - 0.2),
            // ITM call, only in the all-quotes scope
            quote(90.0, OptionType::Call, call90 - 0.1, call90 + 0.1),
        ]
    }

    #[test]
    fn retained_scope_classifies_against_band() {
        let quotes = market();
        let smile = smile_from(&quotes);
        let chain = ExpiryQuotes {
            ticker: "TEST",
            expiry: expiry(),
            quotes: quotes.iter().collect(),
        };
        let prices = PriceReconstructor::default()
            .reconstruct(&fit(), &smile, &chain)
            .unwrap();
        assert_eq!(prices.len(), 3);
        assert_eq!(prices[0].band, PriceBand::Inside);
        assert_eq!(prices[1].band, PriceBand::Below);
        assert_eq!(prices[2].band, PriceBand::Above);
        assert_abs_diff_eq!(prices[0].price, model_pv(90.0, OptionType::Put), epsilon = 1e-12);
    }

    #[test]
    fn all_quotes_scope_includes_itm() {
        let quotes = market();
        let smile = smile_from(&quotes);
        let chain = ExpiryQuotes {
            ticker: "TEST",
            expiry: expiry(),
            quotes: quotes.iter().collect(),
        };
        let prices = PriceReconstructor::new(ReconstructionScope::AllQuotes)
            .reconstruct(&fit(), &smile, &chain)
            .unwrap();
        assert_eq!(prices.len(), 4);
        assert_eq!(prices[0].option_type, OptionType::Put);
        assert_eq!(prices[1].option_type, OptionType::Call);
        assert_eq!(prices[1].strike, 90.0);
        assert_eq!(prices[1].band, PriceBand::Inside);
        // Put-call parity holds on the reconstructed pair.
        let parity = (prices[1].price - prices[0].price) * DF;
        assert_abs_diff_eq!(parity, F - 90.0, epsilon = 1e-9);
    }

    #[test]
    fn classification_edges_are_inside() {
        assert_eq!(PriceBand::classify(1.0, 1.0, 2.0), PriceBand::Inside);
        assert_eq!(PriceBand::classify(2.0, 1.0, 2.0), PriceBand::Inside);
        assert_eq!(PriceBand::classify(0.99, 1.0, 2.0), PriceBand::Below);
        assert_eq!(PriceBand::classify(2.01, 1.0, 2.0), PriceBand::Above);
        assert_eq!(PriceBand::Above.as_str(), "above");
    }
}
