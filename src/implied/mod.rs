//! Implied volatility extraction from option prices.
//!
//! Black-76 on undiscounted (forward) premiums, inverted by Newton-Raphson.
//! The solver always returns a best estimate tagged with a [`SolveStatus`];
//! callers decide what to do with non-converged values.

pub mod black;

pub use black::{
    BlackImpliedVol, ImpliedVol, SolveStatus, black_delta, black_price, black_vega, norm_cdf,
    norm_pdf,
};
