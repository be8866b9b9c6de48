//! Market inputs: the quote table and the discount curve.
//!
//! The quote table is an already-shaped option chain, one row per listed
//! option, with the column names used by the upstream scraper:
//!
//! | column | meaning |
//! |---|---|
//! | `ticker` | underlying |
//! | `expiryDate` | ISO expiry date |
//! | `strike` | strike price |
//! | `optionType` | `calls` or `puts` |
//! | `bid`, `ask` | present-value premiums |
//! | `mid` | optional, defaults to `(bid + ask) / 2` |
//! | `lastTradeDate` | optional last-trade timestamp |
//! | `last close` | reference spot (alias `referenceSpot`) |
//! | `dividendYield` | optional continuous yield (alias `yFinance_dividend_yield`) |

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, VolSurfError};
use crate::types::OptionType;
use crate::validate::validate_positive;

/// Required columns and the header spellings accepted for each.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("ticker", &["ticker"]),
    ("expiryDate", &["expiryDate"]),
    ("strike", &["strike"]),
    ("optionType", &["optionType"]),
    ("bid", &["bid"]),
    ("ask", &["ask"]),
    ("last close", &["last close", "referenceSpot"]),
];

/// One listed option as delivered by the quote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    #[serde(rename = "expiryDate")]
    pub expiry: NaiveDate,
    pub strike: f64,
    #[serde(rename = "optionType")]
    pub option_type: OptionType,
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub mid: Option<f64>,
    #[serde(
        rename = "lastTradeDate",
        default,
        deserialize_with = "deserialize_timestamp"
    )]
    pub last_trade: Option<NaiveDateTime>,
    #[serde(rename = "last close", alias = "referenceSpot")]
    pub spot: f64,
    #[serde(rename = "dividendYield", alias = "yFinance_dividend_yield", default)]
    pub dividend_yield: f64,
}

impl Quote {
    /// Mid premium: the `mid` column if present, else `(bid + ask) / 2`.
    pub fn mid(&self) -> f64 {
        self.mid.unwrap_or(0.5 * (self.bid + self.ask))
    }

    /// Half the quoted bid-ask spread.
    pub fn half_spread(&self) -> f64 {
        0.5 * (self.ask - self.bid)
    }

    fn check(&self) -> Result<()> {
        let fail = |what: String| VolSurfError::data(what, Some(self.expiry));
        if !self.strike.is_finite() || self.strike <= 0.0 {
            return Err(fail(format!(
                "{} {} quote has non-positive strike {}",
                self.ticker, self.option_type, self.strike
            )));
        }
        if !self.bid.is_finite() || !self.ask.is_finite() || !self.mid().is_finite() {
            return Err(fail(format!(
                "{} {} K={} has non-finite premium",
                self.ticker, self.option_type, self.strike
            )));
        }
        if !self.spot.is_finite() || self.spot <= 0.0 {
            return Err(fail(format!(
                "{} quote has non-positive reference spot {}",
                self.ticker, self.spot
            )));
        }
        if !self.dividend_yield.is_finite() {
            return Err(fail(format!("{} quote has non-finite dividend yield", self.ticker)));
        }
        Ok(())
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[+offset]` and bare dates; blank is `None`.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp '{raw}'")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

/// All quotes of one underlying at one expiry.
#[derive(Debug, Clone)]
pub struct ExpiryQuotes<'a> {
    pub ticker: &'a str,
    pub expiry: NaiveDate,
    pub quotes: Vec<&'a Quote>,
}

impl ExpiryQuotes<'_> {
    /// Reference spot of the chain (first row; rows share one snapshot).
    pub fn spot(&self) -> Option<f64> {
        self.quotes.first().map(|q| q.spot)
    }

    /// Dividend yield of the chain.
    pub fn dividend_yield(&self) -> f64 {
        self.quotes.first().map_or(0.0, |q| q.dividend_yield)
    }
}

/// A quote row set aside while loading the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based line in the source file, when read from CSV.
    pub line: Option<u64>,
    pub ticker: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub message: String,
}

impl fmt::Display for RejectedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// Immutable table of usable option quotes.
///
/// Rows that cannot be parsed or fail the sanity checks are kept aside in
/// [`QuoteTable::rejected`]; they never prevent the other rows from loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteTable {
    quotes: Vec<Quote>,
    #[serde(default)]
    rejected: Vec<RejectedRow>,
}

impl QuoteTable {
    /// Build a table from rows, setting aside unusable ones (non-positive
    /// strike or spot, non-finite premium or yield).
    pub fn new(quotes: Vec<Quote>) -> Self {
        let mut table = Self::default();
        for q in quotes {
            table.push(q, None);
        }
        table
    }

    fn push(&mut self, quote: Quote, line: Option<u64>) {
        match quote.check() {
            Ok(()) => self.quotes.push(quote),
            Err(err) => self.reject(RejectedRow {
                line,
                ticker: Some(quote.ticker),
                expiry: Some(quote.expiry),
                message: err.to_string(),
            }),
        }
    }

    /// Read a table from CSV with a header row.
    ///
    /// Unknown columns (e.g. a leading index column) are ignored. Rows that
    /// do not parse or fail the checks of [`QuoteTable::new`] are recorded
    /// in [`QuoteTable::rejected`].
    ///
    /// # Errors
    /// Returns [`VolSurfError::DataError`] naming the first missing required
    /// column, and [`VolSurfError::Csv`] if the header cannot be read.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        for (column, spellings) in REQUIRED_COLUMNS {
            if !spellings.iter().any(|s| headers.iter().any(|h| h == *s)) {
                return Err(VolSurfError::data(
                    format!("quote table is missing required column '{column}'"),
                    None,
                ));
            }
        }
        let field = |record: &csv::StringRecord, name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        let mut table = Self::default();
        for row in rdr.records() {
            let record = match row {
                Ok(record) => record,
                Err(err) => {
                    table.reject(RejectedRow {
                        line: err.position().map(|p| p.line()),
                        ticker: None,
                        expiry: None,
                        message: VolSurfError::from(err).to_string(),
                    });
                    continue;
                }
            };
            let line = record.position().map(|p| p.line());
            match record.deserialize::<Quote>(Some(&headers)) {
                Ok(quote) => table.push(quote, line),
                Err(err) => table.reject(RejectedRow {
                    line,
                    ticker: field(&record, "ticker"),
                    expiry: field(&record, "expiryDate").and_then(|d| d.parse().ok()),
                    message: VolSurfError::from(err).to_string(),
                }),
            }
        }
        Ok(table)
    }

    fn reject(&mut self, row: RejectedRow) {
        #[cfg(feature = "logging")]
        tracing::debug!(line = ?row.line, reason = %row.message, "quote row rejected");
        self.rejected.push(row);
    }

    /// Read a table from a CSV file.
    ///
    /// # Errors
    /// See [`QuoteTable::from_csv_reader`].
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(std::io::BufReader::new(file))
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    /// Rows set aside while loading, in input order.
    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Distinct underlyings, sorted.
    pub fn underlyings(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.quotes.iter().map(|q| q.ticker.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Quotes of one underlying grouped by expiry, earliest first.
    pub fn expiries_for<'a>(&'a self, ticker: &'a str) -> Vec<ExpiryQuotes<'a>> {
        let mut groups: BTreeMap<NaiveDate, Vec<&Quote>> = BTreeMap::new();
        for q in self.quotes.iter().filter(|q| q.ticker == ticker) {
            groups.entry(q.expiry).or_default().push(q);
        }
        groups
            .into_iter()
            .map(|(expiry, quotes)| ExpiryQuotes {
                ticker,
                expiry,
                quotes,
            })
            .collect()
    }
}

/// Source of discount factors by expiry date.
///
/// Factors follow the quote-table convention: multiplying a present-value
/// premium by the factor gives the forward (undiscounted) premium.
pub trait DiscountCurve: Send + Sync + fmt::Debug {
    /// Discount factor for `expiry`.
    ///
    /// # Errors
    /// Implementations return [`VolSurfError::DataError`] when no factor can
    /// be derived for the date.
    fn discount_factor(&self, expiry: NaiveDate) -> Result<f64>;
}

/// Constant discount factor for every expiry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlatDiscount(pub f64);

impl Default for FlatDiscount {
    fn default() -> Self {
        Self(1.0)
    }
}

impl DiscountCurve for FlatDiscount {
    fn discount_factor(&self, _expiry: NaiveDate) -> Result<f64> {
        validate_positive(self.0, "discount factor")
    }
}

/// A dated pillar of a [`DatedDiscountCurve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountPillar {
    pub date: NaiveDate,
    #[serde(alias = "discount_factor", alias = "df")]
    pub factor: f64,
}

/// Date-indexed discount factors.
///
/// Log-linear interpolation in calendar days between pillars, flat
/// extrapolation outside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedDiscountCurve {
    pillars: Vec<DiscountPillar>,
}

impl DatedDiscountCurve {
    /// # Errors
    /// Returns [`VolSurfError::InvalidInput`] for an empty curve, a
    /// non-positive factor or a repeated date.
    pub fn new(mut pillars: Vec<DiscountPillar>) -> Result<Self> {
        if pillars.is_empty() {
            return Err(VolSurfError::InvalidInput {
                message: "discount curve needs at least one pillar".into(),
            });
        }
        for p in &pillars {
            validate_positive(p.factor, "discount factor")?;
        }
        pillars.sort_by_key(|p| p.date);
        if pillars.windows(2).any(|w| w[0].date == w[1].date) {
            return Err(VolSurfError::InvalidInput {
                message: "discount curve has duplicate pillar dates".into(),
            });
        }
        Ok(Self { pillars })
    }

    /// Read pillars from CSV with `date` and `factor` (or `discount_factor`) columns.
    ///
    /// # Errors
    /// CSV failures and the checks of [`DatedDiscountCurve::new`].
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let pillars = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<DiscountPillar>, _>>()?;
        Self::new(pillars)
    }

    /// # Errors
    /// See [`DatedDiscountCurve::from_csv_reader`].
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(std::io::BufReader::new(file))
    }

    pub fn pillars(&self) -> &[DiscountPillar] {
        &self.pillars
    }
}

impl DiscountCurve for DatedDiscountCurve {
    fn discount_factor(&self, expiry: NaiveDate) -> Result<f64> {
        let idx = self.pillars.partition_point(|p| p.date <= expiry);
        let factor = match idx {
            0 => self.pillars[0].factor,
            i if i == self.pillars.len() => self.pillars[i - 1].factor,
            i => {
                let (left, right) = (self.pillars[i - 1], self.pillars[i]);
                let span = (right.date - left.date).num_days() as f64;
                let t = (expiry - left.date).num_days() as f64 / span;
                (left.factor.ln() * (1.0 - t) + right.factor.ln() * t).exp()
            }
        };
        Ok(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const CSV: &str = "\
,ticker,expiryDate,strike,optionType,bid,ask,mid,lastTradeDate,last close,dividendYield
0,AAPL,2024-03-15,180,calls,5.0,5.4,,2024-01-31 20:59:58+00:00,184.4,0.005
1,AAPL,2024-03-15,180,puts,2.1,2.3,2.2,2024-01-31 20:59:58+00:00,184.4,0.005
2,AAPL,2024-06-21,190,calls,6.0,6.6,6.3,,184.4,0.005
3,MSFT,2024-03-15,400,puts,10.0,11.0,10.5,2024-01-31,397.6,0.007
";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn reads_table_and_groups() {
        let table = QuoteTable::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.underlyings(), vec!["AAPL", "MSFT"]);

        let aapl = table.expiries_for("AAPL");
        assert_eq!(aapl.len(), 2);
        assert_eq!(aapl[0].expiry, d(2024, 3, 15));
        assert_eq!(aapl[0].quotes.len(), 2);
        assert_eq!(aapl[0].spot(), Some(184.4));
        assert_abs_diff_eq!(aapl[0].dividend_yield(), 0.005, epsilon = 1e-15);

        let first = &table.quotes()[0];
        assert_eq!(first.option_type, OptionType::Call);
        assert_abs_diff_eq!(first.mid(), 5.2, epsilon = 1e-12);
        assert_eq!(
            first.last_trade,
            Some(d(2024, 1, 31).and_hms_opt(20, 59, 58).unwrap())
        );
        assert!(table.quotes()[2].last_trade.is_none());
    }

    #[test]
    fn missing_column_is_data_error() {
        let csv = "ticker,expiryDate,strike,optionType,bid,ask\nX,2024-03-15,1,calls,1,2\n";
        match QuoteTable::from_csv_reader(csv.as_bytes()) {
            Err(VolSurfError::DataError { message, expiry }) => {
                assert!(message.contains("last close"), "{message}");
                assert!(expiry.is_none());
            }
            other => panic!("expected DataError, got {other:?}"),
        }
    }

    #[test]
    fn alias_columns_accepted() {
        let csv = "ticker,expiryDate,strike,optionType,bid,ask,referenceSpot,yFinance_dividend_yield\n\
                   X,2024-03-15,100,put,1,2,101,0.01\n";
        let table = QuoteTable::from_csv_reader(csv.as_bytes()).unwrap();
        let q = &table.quotes()[0];
        assert_eq!(q.option_type, OptionType::Put);
        assert_eq!(q.spot, 101.0);
        assert_eq!(q.dividend_yield, 0.01);
        assert_abs_diff_eq!(q.half_spread(), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn bad_rows_are_set_aside() {
        let csv = "ticker,expiryDate,strike,optionType,bid,ask,last close\n\
                   X,2024-03-15,0,calls,1,2,100\n\
                   X,2024-03-15,100,calls,1,2,100\n\
                   Y,2024-03-15,100,puts,,2,100\n\
                   Y,2024-03-15,100,puts,1,2,100\n";
        let table = QuoteTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.underlyings(), vec!["X", "Y"]);

        let rejected = table.rejected();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].line, Some(2));
        assert_eq!(rejected[0].ticker.as_deref(), Some("X"));
        assert_eq!(rejected[0].expiry, Some(d(2024, 3, 15)));
        assert!(rejected[0].message.contains("non-positive strike"), "{}", rejected[0]);
        assert_eq!(rejected[1].line, Some(4));
        assert_eq!(rejected[1].ticker.as_deref(), Some("Y"));
        assert!(rejected[1].to_string().starts_with("line 4: "));
    }

    #[test]
    fn new_keeps_good_rows() {
        let good = Quote {
            ticker: "X".into(),
            expiry: d(2024, 3, 15),
            strike: 100.0,
            option_type: OptionType::Call,
            bid: 1.0,
            ask: 2.0,
            mid: None,
            last_trade: None,
            spot: 100.0,
            dividend_yield: 0.0,
        };
        let bad = Quote {
            bid: f64::NAN,
            ..good.clone()
        };
        let table = QuoteTable::new(vec![good, bad]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rejected().len(), 1);
        assert!(table.rejected()[0].line.is_none());
        assert!(table.rejected()[0].message.contains("non-finite premium"));
    }

    #[test]
    fn flat_discount_is_constant() {
        let curve = FlatDiscount::default();
        assert_eq!(curve.discount_factor(d(2030, 1, 1)).unwrap(), 1.0);
        assert!(FlatDiscount(0.0).discount_factor(d(2030, 1, 1)).is_err());
    }

    #[test]
    fn dated_curve_interpolates_log_linearly() {
        let curve = DatedDiscountCurve::new(vec![
            DiscountPillar { date: d(2025, 1, 1), factor: 0.95 },
            DiscountPillar { date: d(2024, 1, 1), factor: 1.0 },
        ])
        .unwrap();
        // 2024 is a leap year: 2024-07-02 is day 183 of 366.
        let t = 183.0 / 366.0;
        let expected = (0.95_f64.ln() * t).exp();
        assert_abs_diff_eq!(
            curve.discount_factor(d(2024, 7, 2)).unwrap(),
            expected,
            epsilon = 1e-14
        );
        assert_eq!(curve.discount_factor(d(2023, 6, 1)).unwrap(), 1.0);
        assert_eq!(curve.discount_factor(d(2026, 6, 1)).unwrap(), 0.95);
        assert_eq!(curve.discount_factor(d(2025, 1, 1)).unwrap(), 0.95);
    }

    #[test]
    fn dated_curve_from_csv() {
        let csv = "date,discount_factor\n2024-01-01,1.0\n2024-12-31,0.96\n";
        let curve = DatedDiscountCurve::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(curve.pillars().len(), 2);
        assert!(DatedDiscountCurve::new(vec![]).is_err());
    }
}
