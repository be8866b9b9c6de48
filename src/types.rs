//! Core domain types for volatility surface construction.
//!
//! These newtypes wrap `f64` to provide compile-time type safety, preventing
//! accidental parameter swapping (e.g., passing a total variance where a
//! volatility is expected).
//!
//! # Newtype Strategy
//!
//! **Outputs use newtypes.** [`Vol`], [`Variance`] wrap return values so
//! callers can't accidentally mix a volatility with a variance.
//!
//! **Inputs use bare `f64`.** API methods like `black_price(forward, strike, ..)`
//! accept raw floats for ergonomics; inputs are self-documenting via parameter
//! names.
//!
//! # Why no `Eq` or `Ord`?
//! These types wrap `f64`, which does not implement `Eq` or `Ord` because `NaN`
//! breaks total ordering. We derive `PartialEq` and `PartialOrd` only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Implied volatility `σ`, measured as annualized standard deviation.
///
/// # Examples
/// ```
/// use svisurf::types::Vol;
/// let vol = Vol(0.20);
/// assert_eq!(vol.0, 0.20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Vol(pub f64);

/// Total implied variance `w = σ²T`.
///
/// Calendar no-arbitrage is a statement about total variance being
/// non-decreasing in time at fixed log-moneyness.
///
/// # Examples
/// ```
/// use svisurf::types::Variance;
/// let w = Variance(0.04); // 20% vol over one year
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Variance(pub f64);

/// Option kind: call or put.
///
/// Quote tables spell these `"calls"` / `"puts"`; `"call"` / `"put"` are
/// accepted on input as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionType {
    /// Right to buy at strike price.
    #[serde(rename = "calls", alias = "call", alias = "Call", alias = "C")]
    Call,
    /// Right to sell at strike price.
    #[serde(rename = "puts", alias = "put", alias = "Put", alias = "P")]
    Put,
}

impl OptionType {
    /// Payoff sign `ε`: +1 for calls, −1 for puts.
    ///
    /// ```
    /// use svisurf::OptionType;
    /// assert_eq!(OptionType::Call.sign(), 1.0);
    /// assert_eq!(OptionType::Put.sign(), -1.0);
    /// ```
    pub fn sign(self) -> f64 {
        match self {
            OptionType::Call => 1.0,
            OptionType::Put => -1.0,
        }
    }

    /// The kind that is out of the money at `strike` relative to `forward`.
    ///
    /// Strikes at or above the forward are represented by calls, strikes
    /// below it by puts.
    pub fn otm_for(strike: f64, forward: f64) -> Self {
        if strike >= forward {
            OptionType::Call
        } else {
            OptionType::Put
        }
    }

    /// Whether a quote of this kind at `strike` lies on the OTM side of `forward`.
    pub fn is_otm(self, strike: f64, forward: f64) -> bool {
        self == Self::otm_for(strike, forward)
    }

    /// Table spelling used by quote files and exports.
    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::Call => "calls",
            OptionType::Put => "puts",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
