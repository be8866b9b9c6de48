//! Tabular and JSON export of a batch run.
//!
//! Five long-format CSV tables, one row per observation:
//!
//! | file | row |
//! |---|---|
//! | `slices.csv` | smile point with its fit diagnostics and the slice parameters |
//! | `grid.csv` | fitted curve sample |
//! | `prices.csv` | reconstructed price against its quoted band |
//! | `arbitrage.csv` | one flag per violated check |
//! | `rejected.csv` | quote row set aside while loading the table |
//!
//! plus `surfaces.json`, the whole [`BatchOutcome`].

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::surface::BatchOutcome;
use crate::types::OptionType;

#[derive(Serialize)]
struct SliceRow<'a> {
    underlying: &'a str,
    expiry: NaiveDate,
    t: f64,
    forward: f64,
    discount_factor: f64,
    strike: f64,
    option_type: OptionType,
    log_moneyness: f64,
    mid_iv: f64,
    bid_iv: Option<f64>,
    ask_iv: Option<f64>,
    fitted_iv: f64,
    band_error: f64,
    relative_error: f64,
    a: f64,
    b: f64,
    rho: f64,
    m: f64,
    sigma: f64,
    objective: f64,
}

#[derive(Serialize)]
struct GridRow<'a> {
    underlying: &'a str,
    expiry: NaiveDate,
    log_moneyness: f64,
    strike: f64,
    total_variance: f64,
    implied_vol: Option<f64>,
}

#[derive(Serialize)]
struct PriceRow<'a> {
    underlying: &'a str,
    expiry: NaiveDate,
    strike: f64,
    option_type: OptionType,
    fitted_iv: f64,
    price: f64,
    bid: f64,
    ask: f64,
    band: &'static str,
}

#[derive(Serialize)]
struct ArbitrageRow<'a> {
    underlying: &'a str,
    check: &'static str,
    expiry: NaiveDate,
    previous_expiry: Option<NaiveDate>,
    strike: Option<f64>,
    option_type: Option<OptionType>,
    value: Option<f64>,
    floor: Option<f64>,
}

/// Paths written by [`export_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub slices: PathBuf,
    pub grid: PathBuf,
    pub prices: PathBuf,
    pub arbitrage: PathBuf,
    pub rejected: PathBuf,
    pub json: PathBuf,
}

/// Write one row per smile point of every calibrated slice.
///
/// # Errors
/// Returns [`VolSurfError::Csv`](crate::VolSurfError::Csv) on write failure.
pub fn write_slices_csv<W: Write>(outcome: &BatchOutcome, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for surface in &outcome.surfaces {
        for slice in &surface.slices {
            let p = slice.params();
            for point in &slice.fit.points {
                wtr.serialize(SliceRow {
                    underlying: &surface.underlying,
                    expiry: slice.expiry,
                    t: slice.time_to_expiry(),
                    forward: slice.forward.forward,
                    discount_factor: slice.discount_factor,
                    strike: point.strike,
                    option_type: point.option_type,
                    log_moneyness: point.log_moneyness,
                    mid_iv: point.mid_iv,
                    bid_iv: point.bid_iv,
                    ask_iv: point.ask_iv,
                    fitted_iv: point.fitted_iv,
                    band_error: point.band_error,
                    relative_error: point.relative_error,
                    a: p.a(),
                    b: p.b(),
                    rho: p.rho(),
                    m: p.m(),
                    sigma: p.sigma(),
                    objective: slice.fit.objective,
                })?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write the fitted variance grid of every slice.
///
/// # Errors
/// Returns [`VolSurfError::Csv`](crate::VolSurfError::Csv) on write failure.
pub fn write_grid_csv<W: Write>(outcome: &BatchOutcome, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for surface in &outcome.surfaces {
        for slice in &surface.slices {
            let grid = &slice.fit.grid;
            let f = slice.forward.forward;
            for i in 0..grid.len() {
                let x = grid.log_moneyness[i];
                wtr.serialize(GridRow {
                    underlying: &surface.underlying,
                    expiry: slice.expiry,
                    log_moneyness: x,
                    strike: f * x.exp(),
                    total_variance: grid.total_variance[i],
                    implied_vol: grid.implied_vol[i],
                })?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write every reconstructed price.
///
/// # Errors
/// Returns [`VolSurfError::Csv`](crate::VolSurfError::Csv) on write failure.
pub fn write_prices_csv<W: Write>(outcome: &BatchOutcome, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for surface in &outcome.surfaces {
        for p in surface.prices() {
            wtr.serialize(PriceRow {
                underlying: &surface.underlying,
                expiry: p.expiry,
                strike: p.strike,
                option_type: p.option_type,
                fitted_iv: p.fitted_iv,
                price: p.price,
                bid: p.bid,
                ask: p.ask,
                band: p.band.as_str(),
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write one row per arbitrage flag. A clean run writes an empty file.
///
/// # Errors
/// Returns [`VolSurfError::Csv`](crate::VolSurfError::Csv) on write failure.
pub fn write_arbitrage_csv<W: Write>(outcome: &BatchOutcome, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for surface in &outcome.surfaces {
        let report = &surface.arbitrage;
        let underlying = surface.underlying.as_str();
        for v in &report.calendar {
            wtr.serialize(ArbitrageRow {
                underlying,
                check: "calendar",
                expiry: v.expiry,
                previous_expiry: Some(v.previous_expiry),
                strike: Some(v.strike),
                option_type: Some(v.option_type),
                value: Some(v.value_ask_terms),
                floor: Some(v.floor),
            })?;
        }
        let slice_flags = report
            .butterfly
            .iter()
            .map(|&e| ("butterfly", e))
            .chain(report.wing.iter().map(|&e| ("wing", e)));
        for (check, expiry) in slice_flags {
            wtr.serialize(ArbitrageRow {
                underlying,
                check,
                expiry,
                previous_expiry: None,
                strike: None,
                option_type: None,
                value: None,
                floor: None,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write one row per rejected quote row.
///
/// # Errors
/// Returns [`VolSurfError::Csv`](crate::VolSurfError::Csv) on write failure.
pub fn write_rejected_csv<W: Write>(outcome: &BatchOutcome, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in &outcome.rejected {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the whole outcome as pretty-printed JSON.
///
/// # Errors
/// Returns [`VolSurfError::Json`](crate::VolSurfError::Json) on failure.
pub fn write_json<W: Write>(outcome: &BatchOutcome, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, outcome)?;
    Ok(())
}

/// Write all tables and the JSON document into `dir`, creating it if needed.
///
/// # Errors
/// Returns [`VolSurfError::Io`](crate::VolSurfError::Io) if the directory
/// or a file cannot be created, otherwise as the individual writers.
pub fn export_all(outcome: &BatchOutcome, dir: impl AsRef<Path>) -> Result<ExportPaths> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let paths = ExportPaths {
        slices: dir.join("slices.csv"),
        grid: dir.join("grid.csv"),
        prices: dir.join("prices.csv"),
        arbitrage: dir.join("arbitrage.csv"),
        rejected: dir.join("rejected.csv"),
        json: dir.join("surfaces.json"),
    };
    write_slices_csv(outcome, std::fs::File::create(&paths.slices)?)?;
    write_grid_csv(outcome, std::fs::File::create(&paths.grid)?)?;
    write_prices_csv(outcome, std::fs::File::create(&paths.prices)?)?;
    write_arbitrage_csv(outcome, std::fs::File::create(&paths.arbitrage)?)?;
    write_rejected_csv(outcome, std::fs::File::create(&paths.rejected)?)?;
    let json = std::io::BufWriter::new(std::fs::File::create(&paths.json)?);
    write_json(outcome, json)?;

    #[cfg(feature = "logging")]
    tracing::debug!(dir = %dir.display(), "exports written");

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{SviCalibrator, VarianceGrid};
    use crate::conventions::YearFractions;
    use crate::forward::{ForwardEstimate, ForwardMethod};
    use crate::implied::SolveStatus;
    use crate::market::RejectedRow;
    use crate::reconstruct::{PriceBand, ReconstructedPrice};
    use crate::smile::{Smile, SmilePoint, SviParameters};
    use crate::surface::arbitrage::CalendarViolation;
    use crate::surface::{ArbitrageReport, Surface, SurfaceSlice};
    use chrono::NaiveDateTime;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn as_of() -> NaiveDateTime {
        date(3, 1).and_hms_opt(16, 0, 0).unwrap()
    }

    fn slice() -> SurfaceSlice {
        let expiry = date(6, 21);
        let year_fractions = YearFractions::between(as_of(), expiry);
        let t = year_fractions.act365;
        let params = SviParameters::new(0.01, 0.1, -0.4, 0.0, 0.2).unwrap();
        let points: Vec<SmilePoint> = [90.0, 100.0, 110.0]
            .into_iter()
            .map(|k: f64| SmilePoint {
                strike: k,
                option_type: OptionType::otm_for(k, 100.0),
                bid: 1.0,
                ask: 1.2,
                mid: 1.1,
                mid_iv: params.implied_vol((k / 100.0).ln(), t).unwrap(),
                bid_iv: None,
                ask_iv: None,
                mid_status: SolveStatus::Converged,
            })
            .collect();
        let smile = Smile {
            expiry,
            year_fractions,
            forward: ForwardEstimate {
                forward: 100.0,
                naive: 100.0,
                method: ForwardMethod::Naive,
            },
            discount_factor: 1.0,
            points,
        };
        let fit = SviCalibrator::default().calibrate(&smile, Some(&params)).unwrap();
        SurfaceSlice {
            expiry,
            year_fractions,
            forward: smile.forward,
            discount_factor: 1.0,
            prices: vec![ReconstructedPrice {
                expiry,
                strike: 100.0,
                option_type: OptionType::Call,
                fitted_iv: 0.2,
                price: 1.3,
                bid: 1.0,
                ask: 1.2,
                band: PriceBand::Above,
            }],
            smile,
            fit,
        }
    }

    fn outcome() -> BatchOutcome {
        let s = slice();
        let expiry = s.expiry;
        BatchOutcome {
            surfaces: vec![Surface {
                underlying: "SPY".into(),
                as_of: as_of(),
                spot: 100.0,
                slices: vec![s],
                omissions: Vec::new(),
                arbitrage: ArbitrageReport {
                    calendar: vec![CalendarViolation {
                        strike: 100.0,
                        option_type: OptionType::Call,
                        expiry,
                        previous_expiry: date(4, 19),
                        value_ask_terms: 1.4,
                        floor: 1.5,
                    }],
                    butterfly: Vec::new(),
                    wing: vec![expiry],
                },
            }],
            failures: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn to_string(write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        write(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn slices_have_one_row_per_point() {
        let out = outcome();
        let text = to_string(|b| write_slices_csv(&out, b));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("underlying,expiry,t,forward"));
        assert!(lines[1].starts_with("SPY,2024-06-21,"));
        assert!(lines[1].contains(",puts,"));
    }

    #[test]
    fn grid_rows_match_grid_length() {
        let out = outcome();
        let n = out.surfaces[0].slices[0].fit.grid.len();
        let text = to_string(|b| write_grid_csv(&out, b));
        assert_eq!(text.lines().count(), n + 1);
    }

    #[test]
    fn prices_carry_band_label() {
        let out = outcome();
        let text = to_string(|b| write_prices_csv(&out, b));
        assert!(text.lines().nth(1).unwrap().ends_with(",above"));
    }

    #[test]
    fn arbitrage_rows_per_flag() {
        let out = outcome();
        let text = to_string(|b| write_arbitrage_csv(&out, b));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("calendar"));
        assert!(lines[2].starts_with("SPY,wing,2024-06-21,,,,,"));
    }

    #[test]
    fn rejected_rows_are_listed() {
        let mut out = outcome();
        out.rejected.push(RejectedRow {
            line: Some(7),
            ticker: Some("QQQ".into()),
            expiry: Some(date(6, 21)),
            message: "data error: QQQ calls quote has non-positive strike 0".into(),
        });
        let text = to_string(|b| write_rejected_csv(&out, b));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "line,ticker,expiry,message");
        assert!(lines[1].starts_with("7,QQQ,2024-06-21,"));
    }

    #[test]
    fn empty_grid_writes_nothing() {
        let mut out = outcome();
        out.surfaces[0].slices[0].fit.grid = VarianceGrid::default();
        let text = to_string(|b| write_grid_csv(&out, b));
        assert!(text.is_empty());
    }

    #[test]
    fn json_round_trips() {
        let out = outcome();
        let text = to_string(|b| write_json(&out, b));
        let back: BatchOutcome = serde_json::from_str(&text).unwrap();
        assert_eq!(back.surfaces[0].underlying, "SPY");
        assert_eq!(back.surfaces[0].arbitrage.wing.len(), 1);
    }

    #[test]
    fn export_all_writes_every_file() {
        let dir = std::env::temp_dir().join(format!("svisurf-export-{}", std::process::id()));
        let paths = export_all(&outcome(), &dir).unwrap();
        for p in [
            &paths.slices,
            &paths.grid,
            &paths.prices,
            &paths.arbitrage,
            &paths.rejected,
            &paths.json,
        ] {
            assert!(p.exists(), "{}", p.display());
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
