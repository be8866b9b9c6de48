//! Input validation helpers.
//!
//! Every check uses `!is_finite()` first so NaN, +Inf and -Inf are rejected
//! uniformly, then applies the sign or ordering condition.

use crate::error::{Result, VolSurfError};

/// Validate that a value is strictly positive and finite.
pub(crate) fn validate_positive(value: f64, name: &str) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(VolSurfError::InvalidInput {
            message: format!("{name} must be positive and finite, got {value}"),
        });
    }
    Ok(value)
}

/// Validate that a value is non-negative and finite.
pub(crate) fn validate_non_negative(value: f64, name: &str) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(VolSurfError::InvalidInput {
            message: format!("{name} must be non-negative and finite, got {value}"),
        });
    }
    Ok(value)
}

/// Validate that a value is finite (zero and negatives allowed).
pub(crate) fn validate_finite(value: f64, name: &str) -> Result<f64> {
    if !value.is_finite() {
        return Err(VolSurfError::InvalidInput {
            message: format!("{name} must be finite, got {value}"),
        });
    }
    Ok(value)
}

/// Validate a positive, finite interval `lo < hi`.
pub(crate) fn validate_band(lo: f64, hi: f64, name: &str) -> Result<(f64, f64)> {
    validate_positive(lo, &format!("{name} lower bound"))?;
    validate_positive(hi, &format!("{name} upper bound"))?;
    if lo >= hi {
        return Err(VolSurfError::InvalidInput {
            message: format!("{name} must satisfy lower < upper, got [{lo}, {hi}]"),
        });
    }
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_rejects_zero_nan_inf() {
        assert!(validate_positive(1.0, "x").is_ok());
        assert!(validate_positive(0.0, "x").is_err());
        assert!(validate_positive(f64::NAN, "x").is_err());
        assert!(validate_positive(f64::INFINITY, "x").is_err());
    }

    #[test]
    fn non_negative_allows_zero() {
        assert!(validate_non_negative(0.0, "x").is_ok());
        assert!(validate_non_negative(-1e-12, "x").is_err());
    }

    #[test]
    fn finite_allows_negative() {
        assert!(validate_finite(-3.0, "x").is_ok());
        assert!(validate_finite(f64::NEG_INFINITY, "x").is_err());
    }

    #[test]
    fn band_requires_ordering() {
        assert!(validate_band(0.4, 2.5, "moneyness band").is_ok());
        assert!(validate_band(2.5, 0.4, "moneyness band").is_err());
        assert!(validate_band(1.0, 1.0, "moneyness band").is_err());
        assert!(validate_band(0.0, 1.0, "moneyness band").is_err());
    }
}
