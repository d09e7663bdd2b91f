//! Observation series: the log-returns the model is conditioned on.
use crate::error::{Error, Result};
use crate::Array1;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::{fs::File, path::Path};
use tracing::{debug, warn};

/// Date formats accepted by [`read_price_csv`], tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d-%b-%y", "%b %d, %Y"];

/// One row of a price history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub price: f64,
}

/// An ordered, immutable sequence of finite observations, optionally
/// anchored to strictly increasing calendar dates.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSeries {
    values: Array1,
    dates: Option<Vec<NaiveDate>>,
}

impl ObservationSeries {
    pub fn new(values: Array1) -> Result<Self> {
        validate_values(&values)?;
        Ok(Self {
            values,
            dates: None,
        })
    }

    pub fn with_dates(values: Array1, dates: Vec<NaiveDate>) -> Result<Self> {
        validate_values(&values)?;
        if dates.len() != values.len() {
            return Err(Error::InvalidInput(format!(
                "{} dates given for {} observations",
                dates.len(),
                values.len()
            )));
        }
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::InvalidInput(format!(
                "dates must be strictly increasing ({} is followed by {})",
                w[0], w[1]
            )));
        }
        Ok(Self {
            values,
            dates: Some(dates),
        })
    }

    /// Builds the log-return series of a price history.
    ///
    /// Records are sorted by date, rows with a non-finite or non-positive
    /// price are dropped, and each return is dated with the later of its
    /// two prices, so the series is one shorter than the cleaned history.
    pub fn from_prices(mut records: Vec<PriceRecord>) -> Result<Self> {
        let total = records.len();
        records.retain(|r| r.price.is_finite() && r.price > 0.0);
        if records.len() < total {
            warn!(
                dropped = total - records.len(),
                "dropped price rows with non-positive or non-finite prices"
            );
        }
        records.sort_by_key(|r| r.date);
        records.dedup_by_key(|r| r.date);
        if records.len() < 2 {
            return Err(Error::InvalidInput(
                "at least two valid prices are needed to compute log-returns".to_string(),
            ));
        }

        let (values, dates) = records
            .windows(2)
            .map(|w| (w[1].price.ln() - w[0].price.ln(), w[1].date))
            .unzip();
        Self::with_dates(values, dates)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dates(&self) -> Option<&[NaiveDate]> {
        self.dates.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Date of observation `index`, if the series is dated and the index is
    /// inside it.
    pub fn date_at(&self, index: usize) -> Option<NaiveDate> {
        self.dates.as_ref().and_then(|d| d.get(index).copied())
    }
}

pub(crate) fn validate_values(values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::InvalidInput("observation series is empty".to_string()));
    }
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "observation {} is not finite ({})",
            i, values[i]
        )));
    }
    Ok(())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Prices may carry thousands separators, as in `"1,013.77"`.
fn parse_price(text: &str) -> Option<f64> {
    text.trim().replace(',', "").parse::<f64>().ok()
}

fn parse_record(record: &StringRecord) -> Option<PriceRecord> {
    Some(PriceRecord {
        date: parse_date(record.get(0)?)?,
        price: parse_price(record.get(1)?)?,
    })
}

/// Reads a `Date,Price` CSV with a header row.
///
/// Quoted fields such as `"Apr 22, 2020"` or `"1,013.77"` are unquoted by
/// the CSV reader. Rows that do not parse are skipped.
pub fn read_price_csv(path: &Path) -> Result<Vec<PriceRecord>> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(file);
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => match e.into_kind() {
                csv::ErrorKind::Io(io) => return Err(Error::Io(io)),
                kind => {
                    skipped += 1;
                    debug!(?kind, "skipping malformed csv row");
                    continue;
                }
            },
        };
        match parse_record(&row) {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                debug!(row = ?row, "skipping unparseable price row");
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, path = %path.display(), "skipped unparseable price rows");
    }
    Ok(records)
}
