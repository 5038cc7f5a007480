//! Transaction records and the CSV source / score sink built on Polars

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CltvError, Result};
use crate::pipeline::CltvRecord;

/// One invoice line as delivered by the data source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub invoice: String,
    /// `None` when the source row had no customer id
    pub customer_id: Option<i64>,
    pub description: Option<String>,
    /// NaN when the source value was missing or unparseable
    pub quantity: f64,
    /// NaN when the source value was missing or unparseable
    pub price: f64,
    pub invoice_date: NaiveDateTime,
    pub country: String,
}

impl RawTransaction {
    /// Return invoices carry a `C` marker in their identifier.
    pub fn is_cancellation(&self) -> bool {
        self.invoice.contains('C')
    }
}

/// A transaction that passed filtering: known customer, positive quantity and price.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub invoice: String,
    pub customer_id: i64,
    pub quantity: f64,
    pub price: f64,
    pub invoice_date: NaiveDateTime,
    pub country: String,
}

impl Transaction {
    /// Line revenue (quantity × unit price)
    pub fn revenue(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Read side of the external data store.
pub trait TransactionSource {
    fn read_transactions(&self) -> Result<Vec<RawTransaction>>;
}

/// Write side of the external data store. Each call replaces the previous output.
pub trait ScoreSink {
    fn write_scores(&self, records: &[CltvRecord]) -> Result<()>;
}

impl TransactionSource for Vec<RawTransaction> {
    fn read_transactions(&self) -> Result<Vec<RawTransaction>> {
        Ok(self.clone())
    }
}

const INVOICE_COLUMNS: [&str; 2] = ["Invoice", "InvoiceNo"];
const CUSTOMER_COLUMNS: [&str; 2] = ["Customer ID", "CustomerID"];
const DESCRIPTION_COLUMNS: [&str; 1] = ["Description"];
const QUANTITY_COLUMNS: [&str; 1] = ["Quantity"];
const PRICE_COLUMNS: [&str; 2] = ["Price", "UnitPrice"];
const DATE_COLUMNS: [&str; 1] = ["InvoiceDate"];
const COUNTRY_COLUMNS: [&str; 1] = ["Country"];

/// Online Retail style CSV export.
#[derive(Debug, Clone)]
pub struct CsvTransactionSource {
    path: PathBuf,
}

impl CsvTransactionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionSource for CsvTransactionSource {
    fn read_transactions(&self) -> Result<Vec<RawTransaction>> {
        // Every column is read as text so mixed invoice ids ("536365", "C536379")
        // and float-formatted customer ids survive schema inference.
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(self.path.clone()))?
            .finish()?;

        let invoices = text_column(&df, &INVOICE_COLUMNS)?;
        let customers = text_column(&df, &CUSTOMER_COLUMNS)?;
        let descriptions = optional_text_column(&df, &DESCRIPTION_COLUMNS)?;
        let quantities = text_column(&df, &QUANTITY_COLUMNS)?;
        let prices = text_column(&df, &PRICE_COLUMNS)?;
        let dates = text_column(&df, &DATE_COLUMNS)?;
        let countries = text_column(&df, &COUNTRY_COLUMNS)?;

        let mut records = Vec::with_capacity(df.height());
        let mut undated = 0usize;
        for row in 0..df.height() {
            let Some(invoice_date) = dates[row].and_then(parse_timestamp) else {
                undated += 1;
                continue;
            };
            records.push(RawTransaction {
                invoice: owned_text(invoices[row]),
                customer_id: customers[row].and_then(parse_customer_id),
                description: descriptions
                    .as_ref()
                    .and_then(|column| column[row].map(str::to_string)),
                quantity: parse_number(quantities[row]),
                price: parse_number(prices[row]),
                invoice_date,
                country: owned_text(countries[row]),
            });
        }

        if undated > 0 {
            warn!(rows = undated, "skipped rows with missing or unparseable invoice dates");
        }
        info!(
            path = %self.path.display(),
            rows = records.len(),
            "loaded transactions"
        );
        Ok(records)
    }
}

fn find_column<'a>(df: &'a DataFrame, names: &[&str]) -> Option<&'a Series> {
    names.iter().find_map(|name| df.column(name).ok())
}

fn text_column<'a>(df: &'a DataFrame, names: &[&str]) -> Result<Vec<Option<&'a str>>> {
    optional_text_column(df, names)?.ok_or_else(|| {
        CltvError::InvalidInput(format!("missing column (expected one of {:?})", names))
    })
}

fn optional_text_column<'a>(
    df: &'a DataFrame,
    names: &[&str],
) -> Result<Option<Vec<Option<&'a str>>>> {
    match find_column(df, names) {
        Some(series) => Ok(Some(series.str()?.into_iter().collect())),
        None => Ok(None),
    }
}

fn owned_text(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn parse_number(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Customer ids are integers, but spreadsheet exports often write them as `17850.0`.
pub fn parse_customer_id(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(id) = value.parse::<i64>() {
        return Some(id);
    }
    match value.parse::<f64>() {
        Ok(id) if id.is_finite() && id.fract() == 0.0 => Some(id as i64),
        _ => None,
    }
}

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse the timestamp layouts found in retail exports.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Writes the scored table as CSV, truncating any previous file.
#[derive(Debug, Clone)]
pub struct CsvScoreSink {
    path: PathBuf,
}

impl CsvScoreSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScoreSink for CsvScoreSink {
    fn write_scores(&self, records: &[CltvRecord]) -> Result<()> {
        let mut df = scores_frame(records)?;
        let mut file = File::create(&self.path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        debug!(path = %self.path.display(), rows = records.len(), "wrote scores");
        Ok(())
    }
}

/// Output schema: one row per scored customer.
pub fn scores_frame(records: &[CltvRecord]) -> Result<DataFrame> {
    let customer_id: Vec<i64> = records.iter().map(|r| r.customer_id).collect();
    let recency: Vec<f64> = records.iter().map(|r| r.recency).collect();
    let tenure: Vec<f64> = records.iter().map(|r| r.t).collect();
    let frequency: Vec<u32> = records.iter().map(|r| r.frequency).collect();
    let monetary: Vec<f64> = records.iter().map(|r| r.monetary).collect();
    let short: Vec<f64> = records
        .iter()
        .map(|r| r.expected_purchases_short_horizon)
        .collect();
    let mid: Vec<f64> = records
        .iter()
        .map(|r| r.expected_purchases_mid_horizon)
        .collect();
    let profit: Vec<f64> = records.iter().map(|r| r.expected_average_profit).collect();
    let clv: Vec<f64> = records.iter().map(|r| r.clv).collect();
    let scaled: Vec<f64> = records.iter().map(|r| r.scaled_clv).collect();
    let segment: Vec<String> = records.iter().map(|r| r.segment.label()).collect();

    let df = df!(
        "customer_id" => customer_id,
        "recency" => recency,
        "T" => tenure,
        "frequency" => frequency,
        "monetary" => monetary,
        "expected_purchases_short_horizon" => short,
        "expected_purchases_mid_horizon" => mid,
        "expected_average_profit" => profit,
        "clv" => clv,
        "scaled_clv" => scaled,
        "segment" => segment
    )?;
    Ok(df)
}
