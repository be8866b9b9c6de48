//! Error types for the svisurf library.
//!
//! All fallible operations return `Result<T, VolSurfError>` rather than panicking.
//! Failures are scoped to the smallest unit that produced them. A bad quote
//! row is set aside on the quote table, an empty smile becomes a
//! [`VolSurfError::DataError`] and an exhausted SVI fit a
//! [`VolSurfError::CalibrationFailure`]. The surface builder turns the last
//! two into omissions on the run instead of aborting sibling expiries.

use chrono::NaiveDate;
use thiserror::Error;

/// Convenience type alias for results in this crate.
pub type Result<T> = std::result::Result<T, VolSurfError>;

/// Errors that can occur while building and validating a volatility surface.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VolSurfError {
    /// Input data is invalid (e.g., negative strike, zero expiry, inverted band).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Quote data is unusable: missing column, unparseable row, or an expiry
    /// whose smile is empty after filtering.
    #[error("data error: {message}")]
    DataError {
        message: String,
        /// Expiry the problem is scoped to, when there is one.
        expiry: Option<NaiveDate>,
    },

    /// SVI calibration produced no feasible fit within the attempt budget.
    #[error("calibration failed after {attempts} attempt(s): {message}")]
    CalibrationFailure {
        message: String,
        /// Model that failed (e.g., "SVI").
        model: &'static str,
        /// Number of global-search attempts that were made.
        attempts: usize,
        /// Best stage-2 objective reached, if any attempt got that far.
        best_objective: Option<f64>,
    },

    /// Numerical computation failed (e.g., NaN, singular system).
    #[error("numerical error: {message}")]
    NumericalError { message: String },

    /// Filesystem failure while reading quotes or writing exports.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VolSurfError {
    pub(crate) fn data(message: impl Into<String>, expiry: Option<NaiveDate>) -> Self {
        Self::DataError {
            message: message.into(),
            expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_failure_fields_accessible() {
        let err = VolSurfError::CalibrationFailure {
            message: "objective not finite".into(),
            model: "SVI",
            attempts: 5,
            best_objective: Some(0.05),
        };
        match &err {
            VolSurfError::CalibrationFailure {
                message,
                model,
                attempts,
                best_objective,
            } => {
                assert_eq!(message, "objective not finite");
                assert_eq!(*model, "SVI");
                assert_eq!(*attempts, 5);
                assert_eq!(*best_objective, Some(0.05));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn calibration_failure_display_mentions_attempts() {
        let err = VolSurfError::CalibrationFailure {
            message: "no feasible fit".into(),
            model: "SVI",
            attempts: 3,
            best_objective: None,
        };
        let display = format!("{err}");
        assert!(display.contains("3 attempt"));
        assert!(display.contains("no feasible fit"));
    }

    #[test]
    fn data_error_carries_expiry() {
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let err = VolSurfError::data("smile is empty", Some(expiry));
        match err {
            VolSurfError::DataError { message, expiry: e } => {
                assert!(message.contains("empty"));
                assert_eq!(e, Some(expiry));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_display_includes_message() {
        let err = VolSurfError::InvalidInput {
            message: "bad input".into(),
        };
        assert!(format!("{err}").contains("bad input"));

        let err = VolSurfError::NumericalError {
            message: "NaN detected".into(),
        };
        assert!(format!("{err}").contains("NaN detected"));

        let err = VolSurfError::data("missing column `strike`", None);
        assert!(format!("{err}").contains("strike"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "quotes.csv");
        let err: VolSurfError = io.into();
        assert!(matches!(err, VolSurfError::Io(_)));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VolSurfError>();
    }
}
