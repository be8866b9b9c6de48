//! # svisurf
//!
//! Implied-volatility surfaces from raw option quotes.
//!
//! Provides the full pipeline: quote table → forward estimation → Black-76
//! implied vols → two-stage SVI calibration per expiry → price
//! reconstruction → static-arbitrage checks across expiries.
//!
//! ## Architecture
//!
//! - **`market`**: quote table (CSV) and discount curves
//! - **`forward`**: naive and put-call-parity forwards
//! - **`implied`**: Black-76 pricing and bracketed Newton inversion
//! - **`smile`**: OTM smile construction and the raw SVI curve
//! - **`calibration`**: exact inner least squares over `(a, d, c)` nested in
//!   a dual-annealing search over `(m, σ)`
//! - **`reconstruct`**: re-pricing quotes off the fitted curve
//! - **`surface`**: the batch builder and calendar/butterfly/wing checks
//! - **`history`**, **`export`**: warm-start persistence and tabular output
//!
//! ## Design
//!
//! - **Newtypes for outputs, bare `f64` for inputs.** [`Vol`] and [`Variance`]
//!   wrap return values of the fitted curves.
//! - **No panics.** Every fallible operation returns [`Result`]. Library code
//!   never calls `unwrap()` or `expect()`.
//! - **Failures are scoped.** A bad expiry becomes an omission on its
//!   surface and a bad underlying an entry in the batch failures; neither
//!   stops the rest of the run.
//! - **Deterministic.** Every expiry derives its random streams from the
//!   configured seed, so results do not depend on thread scheduling.
//! - **Serializable.** All value types implement Serde `Serialize` /
//!   `Deserialize`, with validation on deserialization for SVI parameters.
//!
//! ## Example
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use svisurf::{QuoteTable, SurfaceBuilder};
//!
//! let table = QuoteTable::from_csv_path("quotes.csv")?;
//! let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(16, 0, 0).unwrap();
//! let outcome = SurfaceBuilder::new().as_of(as_of).build(&table)?;
//! svisurf::export::export_all(&outcome, "out")?;
//! # Ok::<(), svisurf::VolSurfError>(())
//! ```

pub mod calibration;
pub mod config;
pub mod conventions;
pub mod error;
pub mod export;
pub mod forward;
pub mod history;
pub mod implied;
pub mod market;
mod optim;
pub mod reconstruct;
pub mod smile;
pub mod surface;
pub mod types;
mod validate;

#[doc(inline)]
pub use config::SurfaceConfig;
#[doc(inline)]
pub use error::{Result, VolSurfError};
#[doc(inline)]
pub use history::CalibrationHistory;
#[doc(inline)]
pub use market::{DiscountCurve, QuoteTable};
#[doc(inline)]
pub use smile::{SmileSection, SviParameters};
#[doc(inline)]
pub use surface::{BatchOutcome, Surface, SurfaceBuilder};
#[doc(inline)]
pub use types::{OptionType, Variance, Vol};
