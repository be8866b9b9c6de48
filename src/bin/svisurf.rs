//! Calibrate SVI surfaces for every underlying of a quote table.
//!
//! Usage:
//!   svisurf --quotes chain.csv --as-of 2024-03-01T16:00:00 --out run/
//!   svisurf --quotes chain.csv --as-of 2024-03-01 --discount curve.csv \
//!       --history history.json --underlying SPY --underlying QQQ

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use svisurf::market::{DatedDiscountCurve, FlatDiscount};
use svisurf::surface::BatchFailure;
use svisurf::{BatchOutcome, CalibrationHistory, QuoteTable, SurfaceBuilder, SurfaceConfig};

#[derive(Parser, Debug)]
#[command(name = "svisurf")]
#[command(about = "SVI implied-volatility surfaces with static-arbitrage checks")]
struct Args {
    /// Quote table CSV
    #[arg(long)]
    quotes: PathBuf,

    /// Snapshot timestamp (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
    #[arg(long, value_parser = parse_as_of)]
    as_of: NaiveDateTime,

    /// JSON config; missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Discount curve CSV with `date` and `factor` columns
    #[arg(long)]
    discount: Option<PathBuf>,

    /// Constant discount factor for every expiry
    #[arg(long, default_value = "1.0")]
    flat_discount: f64,

    /// Warm-start history JSON, read if present and updated after the run
    #[arg(long)]
    history: Option<PathBuf>,

    /// Restrict the run to these underlyings
    #[arg(long)]
    underlying: Vec<String>,

    /// Override the base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory for CSV and JSON exports
    #[arg(long, default_value = "svisurf-out")]
    out: PathBuf,
}

fn parse_as_of(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN)))
        .map_err(|e| format!("invalid as-of '{raw}': {e}"))
}

/// `RUST_LOG`-style directives, with INFO only where they set no level.
fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}

fn main() -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&directives))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SurfaceConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => SurfaceConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.calibration.seed = seed;
    }

    let table = QuoteTable::from_csv_path(&args.quotes)
        .with_context(|| format!("reading quotes {}", args.quotes.display()))?;
    info!(
        rows = table.len(),
        rejected = table.rejected().len(),
        underlyings = table.underlyings().len(),
        "quote table loaded"
    );

    let mut history = match &args.history {
        Some(path) if path.exists() => CalibrationHistory::from_json_path(path)
            .with_context(|| format!("reading history {}", path.display()))?,
        _ => CalibrationHistory::new(),
    };

    let mut builder = SurfaceBuilder::new()
        .config(config)
        .as_of(args.as_of)
        .history(history.clone());
    builder = match &args.discount {
        Some(path) => builder.discount_curve(
            DatedDiscountCurve::from_csv_path(path)
                .with_context(|| format!("reading discount curve {}", path.display()))?,
        ),
        None => builder.discount_curve(FlatDiscount(args.flat_discount)),
    };

    let outcome = if args.underlying.is_empty() {
        builder.build(&table)?
    } else {
        let mut outcome = BatchOutcome {
            rejected: table
                .rejected()
                .iter()
                .filter(|row| row.ticker.as_ref().is_none_or(|t| args.underlying.contains(t)))
                .cloned()
                .collect(),
            ..BatchOutcome::default()
        };
        for row in &outcome.rejected {
            warn!("quote row rejected: {row}");
        }
        for ticker in &args.underlying {
            match builder.build_underlying(&table, ticker) {
                Ok(surface) => outcome.surfaces.push(surface),
                Err(err) => outcome.failures.push(BatchFailure {
                    underlying: ticker.clone(),
                    message: err.to_string(),
                }),
            }
        }
        outcome
    };

    for surface in &outcome.surfaces {
        info!(
            underlying = %surface.underlying,
            slices = surface.slices.len(),
            omitted = surface.omissions.len(),
            "surface calibrated"
        );
        for omission in &surface.omissions {
            warn!(underlying = %surface.underlying, expiry = %omission.expiry, reason = %omission.reason, "omitted");
        }
        if surface.arbitrage.is_free() {
            info!(underlying = %surface.underlying, "no static arbitrage detected");
        } else {
            warn!(
                underlying = %surface.underlying,
                "static arbitrage detected\n{}",
                surface.arbitrage.summary()
            );
        }
    }
    for failure in &outcome.failures {
        warn!(underlying = %failure.underlying, "{}", failure.message);
    }

    let paths = svisurf::export::export_all(&outcome, &args.out)
        .with_context(|| format!("writing exports to {}", args.out.display()))?;
    info!(json = %paths.json.display(), "exports written");

    if let Some(path) = &args.history {
        let accepted: usize = outcome.surfaces.iter().map(|s| history.absorb(s)).sum();
        history
            .save_json(path)
            .with_context(|| format!("writing history {}", path.display()))?;
        info!(accepted, entries = history.len(), "history updated");
    }

    if outcome.surfaces.is_empty() {
        return Err(anyhow!("no surface could be built"));
    }
    Ok(())
}
