//! Per-expiry forward estimation from put-call parity.
//!
//! Starts from the naive forward `F₀ = S·DF·exp(−q·T)` and refines it with
//! strikes quoted on both sides ("duplicate strikes"), whose parity forward
//! is `(C_mid − P_mid)·DF + K`:
//!
//! - no duplicate strike: `F₀`
//! - one duplicate strike: its parity forward
//! - several: the mean of the parity forwards at the nearest duplicate
//!   strikes below and above `F₀`, or `F₀` if either side is empty. A
//!   duplicate strike equal to `F₀` is used on its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::conventions::naive_forward;
use crate::error::{Result, VolSurfError};
use crate::market::{ExpiryQuotes, Quote};
use crate::types::OptionType;
use crate::validate::{validate_finite, validate_positive};

/// How the reference forward was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ForwardMethod {
    /// No usable parity information; `F₀` is returned.
    Naive,
    /// Parity at a single strike.
    Parity { strike: f64 },
    /// Mean of the parity forwards at the strikes bracketing `F₀`.
    Bracket { below: f64, above: f64 },
}

/// Reference forward of one expiry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForwardEstimate {
    pub forward: f64,
    /// `F₀ = S·DF·exp(−q·T)`.
    pub naive: f64,
    pub method: ForwardMethod,
}

/// Forward implied by put-call parity at `strike`.
pub fn parity_forward(call_mid: f64, put_mid: f64, strike: f64, discount_factor: f64) -> f64 {
    (call_mid - put_mid) * discount_factor + strike
}

/// Estimate the reference forward of an expiry chain.
///
/// # Errors
/// Returns [`VolSurfError::DataError`] for an empty chain and
/// [`VolSurfError::InvalidInput`] for a non-positive discount factor or a
/// non-finite year fraction.
pub fn estimate_forward(
    chain: &ExpiryQuotes<'_>,
    discount_factor: f64,
    expiry: f64,
) -> Result<ForwardEstimate> {
    validate_positive(discount_factor, "discount factor")?;
    validate_finite(expiry, "expiry")?;
    let spot = chain.spot().ok_or_else(|| {
        VolSurfError::data(
            format!("{} has no quotes to estimate a forward from", chain.ticker),
            Some(chain.expiry),
        )
    })?;
    let naive = naive_forward(spot, discount_factor, chain.dividend_yield(), expiry);
    Ok(refine_forward(&chain.quotes, naive, discount_factor))
}

/// Apply the duplicate-strike policy around an already computed `F₀`.
pub fn refine_forward(quotes: &[&Quote], naive: f64, discount_factor: f64) -> ForwardEstimate {
    let pairs = duplicate_strikes(quotes);
    let at = |strike: f64, (call, put): (f64, f64)| parity_forward(call, put, strike, discount_factor);
    let naive_estimate = ForwardEstimate {
        forward: naive,
        naive,
        method: ForwardMethod::Naive,
    };

    let mut iter = pairs.iter();
    let (forward, method) = match (iter.next(), iter.next()) {
        (None, _) => return naive_estimate,
        (Some((&strike, &mids)), None) => (at(strike.0, mids), ForwardMethod::Parity { strike: strike.0 }),
        _ => {
            let below = pairs.range(..OrdF64(naive)).next_back();
            let above = pairs.range(OrdF64(naive)..).find(|(k, _)| k.0 > naive);
            let (Some((&lo, &lo_mids)), Some((&hi, &hi_mids))) = (below, above) else {
                return naive_estimate;
            };
            if let Some(&exact) = pairs.get(&OrdF64(naive)) {
                (at(naive, exact), ForwardMethod::Parity { strike: naive })
            } else {
                let forward = 0.5 * (at(lo.0, lo_mids) + at(hi.0, hi_mids));
                (
                    forward,
                    ForwardMethod::Bracket {
                        below: lo.0,
                        above: hi.0,
                    },
                )
            }
        }
    };

    #[cfg(feature = "logging")]
    tracing::debug!(naive, forward, ?method, "forward refined by parity");

    ForwardEstimate {
        forward,
        naive,
        method,
    }
}

/// Strikes quoted as both call and put, with their (call, put) mids.
fn duplicate_strikes(quotes: &[&Quote]) -> BTreeMap<OrdF64, (f64, f64)> {
    let mut calls = BTreeMap::new();
    let mut puts = BTreeMap::new();
    for q in quotes {
        let side = match q.option_type {
            OptionType::Call => &mut calls,
            OptionType::Put => &mut puts,
        };
        side.entry(OrdF64(q.strike)).or_insert(q.mid());
    }
    calls
        .into_iter()
        .filter_map(|(k, c)| puts.get(&k).map(|&p| (k, (c, p))))
        .collect()
}

/// Strike key with a total order; quote strikes are validated finite.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF64(f64);

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
